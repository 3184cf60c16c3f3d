//! Append-only time-series of per-container resource samples.
//!
//! Samples are written once per observed container per poll and never
//! modified. Queries select a half-open window `[since, before)` and may ask
//! for the window to be averaged down to at most `limit` points.

mod error;
mod file;
mod mysql;
mod query;

pub use error::{Error, Result};
pub use file::FileStats;
pub use mysql::MySqlStats;
pub use query::{
    PopulatedStat, QueryError, StatsOptions, StatsQuery, TimeWindow, downsample,
    stats_by_container, stats_by_probe, stats_by_probe_populated,
};

use crate::container::{ContainerID, Observation};

/// Default query window when no bound is given.
pub const DEFAULT_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Largest accepted `limit`.
pub const MAX_LIMIT: usize = 10_000;

/// One raw sample as written by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Stat {
    pub container_id: ContainerID,
    /// Unix seconds, taken from the probe's observation.
    pub time: i64,
    pub size_root_fs: u64,
    pub size_rw: u64,
    pub memory_used: u64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub cpu_usage: u64,
    pub running: bool,
}

impl Stat {
    pub fn from_observation(container_id: ContainerID, observation: &Observation) -> Self {
        Self {
            container_id,
            time: observation.observation_time,
            size_root_fs: observation.size_root_fs,
            size_rw: observation.size_rw,
            memory_used: observation.memory_used,
            net_rx: observation.net_rx,
            net_tx: observation.net_tx,
            cpu_usage: observation.cpu_usage,
            running: observation.running,
        }
    }
}

/// A query result: either a raw sample or a bucket average.
///
/// `running` is only present on raw samples.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StatPoint {
    pub container_id: ContainerID,
    pub time: i64,
    pub size_root_fs: u64,
    pub size_rw: u64,
    pub memory_used: u64,
    pub net_rx: u64,
    pub net_tx: u64,
    pub cpu_usage: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
}

impl From<Stat> for StatPoint {
    fn from(stat: Stat) -> Self {
        Self {
            container_id: stat.container_id,
            time: stat.time,
            size_root_fs: stat.size_root_fs,
            size_rw: stat.size_rw,
            memory_used: stat.memory_used,
            net_rx: stat.net_rx,
            net_tx: stat.net_tx,
            cpu_usage: stat.cpu_usage,
            running: Some(stat.running),
        }
    }
}

pub trait StatsStore: Send + Sync + 'static {
    /// Appends one sample. Durable once this returns `Ok`.
    fn insert(&self, stat: &Stat) -> impl Future<Output = Result<()>> + Send;

    /// Appends several samples at once; equivalent to inserting them one by one.
    fn insert_batch(&self, stats: &[Stat]) -> impl Future<Output = Result<()>> + Send;

    /// Returns the samples of `container_id` inside the query window, raw or
    /// down-sampled, ascending by time.
    fn query(
        &self,
        container_id: &ContainerID,
        query: &StatsQuery,
    ) -> impl Future<Output = Result<Vec<StatPoint>>> + Send;

    /// Returns the most recent raw sample of `container_id`, if any.
    fn last(
        &self,
        container_id: &ContainerID,
    ) -> impl Future<Output = Result<Option<StatPoint>>> + Send;
}

/// Current time in unix seconds.
pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

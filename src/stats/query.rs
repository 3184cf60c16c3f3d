use crate::container::{Container, ContainerID};
use crate::inventory::{self, InventoryStore};

use super::{DEFAULT_WINDOW_SECS, Error, MAX_LIMIT, Result, Stat, StatPoint, StatsStore, now_unix};

/// Query options as supplied by a caller; every field is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsOptions {
    pub since: Option<i64>,
    pub before: Option<i64>,
    pub limit: Option<usize>,
}

/// Half-open time range `[since, before)` in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub since: i64,
    pub before: i64,
}

impl TimeWindow {
    pub fn contains(&self, time: i64) -> bool {
        self.since <= time && time < self.before
    }

    /// Width of the buckets that split this window into at most `limit` parts.
    pub fn bucket_width(&self, limit: usize) -> i64 {
        let span = i128::from(self.before) - i128::from(self.since);
        let limit = limit.max(1) as i128;
        ((span + limit - 1) / limit).clamp(1, i128::from(i64::MAX)) as i64
    }

    /// Index of the bucket of `width` that `time` falls into.
    fn bucket_of(&self, time: i64, width: i64) -> i64 {
        ((i128::from(time) - i128::from(self.since)) / i128::from(width)) as i64
    }

    /// Start time of bucket `index`, saturating at the bounds of `i64`.
    pub fn bucket_start(&self, index: i64, width: i64) -> i64 {
        let start = i128::from(self.since) + i128::from(index) * i128::from(width);
        start.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

/// Fully resolved query: concrete window and optional down-sampling limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsQuery {
    pub window: TimeWindow,
    pub limit: Option<usize>,
}

impl StatsOptions {
    /// Fills in missing bounds relative to `now` and validates the result.
    ///
    /// Without bounds the window is the last [`DEFAULT_WINDOW_SECS`] up to
    /// `now`. A missing `before` defaults to `now`, a missing `since` to the
    /// start of that default window.
    pub fn resolve(&self, now: i64) -> Result<StatsQuery> {
        match self.limit {
            Some(0) => return Err(Error::InvalidLimit),
            Some(limit) if limit > MAX_LIMIT => {
                return Err(Error::LimitTooLarge {
                    limit,
                    max: MAX_LIMIT,
                });
            }
            _ => {}
        }

        let since = self.since.unwrap_or(now.saturating_sub(DEFAULT_WINDOW_SECS));
        let before = self.before.unwrap_or(now);
        if since >= before {
            return Err(Error::InvalidRange { since, before });
        }
        // bucket arithmetic on both backends needs the span to fit an i64
        if before.checked_sub(since).is_none() {
            return Err(Error::WindowTooWide { since, before });
        }

        Ok(StatsQuery {
            window: TimeWindow { since, before },
            limit: self.limit,
        })
    }
}

#[derive(Default)]
struct Bucket {
    index: i64,
    count: u128,
    sums: [u128; 6],
}

impl Bucket {
    fn add(&mut self, stat: &Stat) {
        self.count += 1;
        let values = [
            stat.size_root_fs,
            stat.size_rw,
            stat.memory_used,
            stat.net_rx,
            stat.net_tx,
            stat.cpu_usage,
        ];
        for (sum, value) in self.sums.iter_mut().zip(values) {
            *sum += u128::from(value);
        }
    }

    fn point(&self, container_id: ContainerID, window: &TimeWindow, width: i64) -> StatPoint {
        let avg = |i: usize| (self.sums[i] / self.count) as u64;
        StatPoint {
            container_id,
            time: window.bucket_start(self.index, width),
            size_root_fs: avg(0),
            size_rw: avg(1),
            memory_used: avg(2),
            net_rx: avg(3),
            net_tx: avg(4),
            cpu_usage: avg(5),
            running: None,
        }
    }
}

/// Averages time-ascending samples inside `window` into at most `limit`
/// buckets aligned at `window.since`. Empty buckets produce no point.
pub fn downsample<'a>(
    samples: impl IntoIterator<Item = &'a Stat>,
    window: &TimeWindow,
    limit: usize,
) -> Vec<StatPoint> {
    let width = window.bucket_width(limit);
    let mut out = Vec::new();
    let mut current: Option<(ContainerID, Bucket)> = None;

    for stat in samples.into_iter().filter(|s| window.contains(s.time)) {
        let index = window.bucket_of(stat.time, width);
        match current.as_mut() {
            Some((_, bucket)) if bucket.index == index => bucket.add(stat),
            _ => {
                if let Some((id, bucket)) = current.take() {
                    out.push(bucket.point(id, window, width));
                }
                let mut bucket = Bucket {
                    index,
                    ..Bucket::default()
                };
                bucket.add(stat);
                current = Some((stat.container_id.clone(), bucket));
            }
        }
    }
    if let Some((id, bucket)) = current {
        out.push(bucket.point(id, window, width));
    }

    out
}

/// A stat point together with the container it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PopulatedStat {
    pub container: Container,
    #[serde(flatten)]
    pub point: StatPoint,
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Inventory(#[from] inventory::Error),
    #[error(transparent)]
    Stats(#[from] Error),
}

pub async fn stats_by_container<S: StatsStore>(
    stats: &S,
    container_id: &ContainerID,
    options: &StatsOptions,
) -> Result<Vec<StatPoint>> {
    let query = options.resolve(now_unix())?;
    stats.query(container_id, &query).await
}

/// Concatenates the stats of every container currently in `probe`'s
/// inventory. The window is resolved once and shared by all containers.
pub async fn stats_by_probe<I: InventoryStore, S: StatsStore>(
    inventory: &I,
    stats: &S,
    probe: &str,
    options: &StatsOptions,
) -> std::result::Result<Vec<StatPoint>, QueryError> {
    let query = options.resolve(now_unix())?;
    let mut out = Vec::new();
    for container in inventory.list(probe).await? {
        out.extend(stats.query(&container.id, &query).await?);
    }
    Ok(out)
}

pub async fn stats_by_probe_populated<I: InventoryStore, S: StatsStore>(
    inventory: &I,
    stats: &S,
    probe: &str,
    options: &StatsOptions,
) -> std::result::Result<Vec<PopulatedStat>, QueryError> {
    let query = options.resolve(now_unix())?;
    let mut out = Vec::new();
    for container in inventory.list(probe).await? {
        let points = stats.query(&container.id, &query).await?;
        out.extend(points.into_iter().map(|point| PopulatedStat {
            container: container.clone(),
            point,
        }));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(id: &str, time: i64, memory_used: u64) -> Stat {
        Stat {
            container_id: ContainerID::new(id).unwrap(),
            time,
            size_root_fs: 100,
            size_rw: 10,
            memory_used,
            net_rx: 0,
            net_tx: 0,
            cpu_usage: 1,
            running: true,
        }
    }

    #[test]
    fn test_resolve_without_bounds() {
        let q = StatsOptions::default().resolve(100_000).unwrap();
        assert_eq!(
            q.window,
            TimeWindow {
                since: 100_000 - DEFAULT_WINDOW_SECS,
                before: 100_000
            }
        );
        assert_eq!(q.limit, None);
    }

    #[test]
    fn test_resolve_single_bound() {
        let since_only = StatsOptions {
            since: Some(10),
            ..Default::default()
        };
        assert_eq!(
            since_only.resolve(500).unwrap().window,
            TimeWindow {
                since: 10,
                before: 500
            }
        );

        let before_only = StatsOptions {
            before: Some(99_000),
            ..Default::default()
        };
        assert_eq!(
            before_only.resolve(100_000).unwrap().window,
            TimeWindow {
                since: 100_000 - DEFAULT_WINDOW_SECS,
                before: 99_000
            }
        );
    }

    #[test]
    fn test_resolve_rejects_bad_input() {
        let empty = StatsOptions {
            since: Some(10),
            before: Some(10),
            limit: None,
        };
        assert!(matches!(empty.resolve(0), Err(Error::InvalidRange { .. })));

        let zero = StatsOptions {
            limit: Some(0),
            ..Default::default()
        };
        assert!(matches!(zero.resolve(0), Err(Error::InvalidLimit)));

        let huge = StatsOptions {
            limit: Some(MAX_LIMIT + 1),
            ..Default::default()
        };
        let err = huge.resolve(0).unwrap_err();
        assert!(matches!(err, Error::LimitTooLarge { .. }));
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_bucket_width() {
        let w = TimeWindow {
            since: 0,
            before: 100,
        };
        assert_eq!(w.bucket_width(10), 10);
        assert_eq!(w.bucket_width(3), 34);
        assert_eq!(w.bucket_width(1000), 1);
    }

    #[test]
    fn test_downsample_averages_buckets() {
        let window = TimeWindow {
            since: 0,
            before: 40,
        };
        let samples = vec![
            stat("c1", 0, 10),
            stat("c1", 5, 20),
            stat("c1", 12, 7),
            stat("c1", 31, 1),
            stat("c1", 39, 4),
        ];

        let points = downsample(&samples, &window, 4);

        assert_eq!(points.len(), 3);
        assert_eq!((points[0].time, points[0].memory_used), (0, 15));
        assert_eq!((points[1].time, points[1].memory_used), (10, 7));
        assert_eq!((points[2].time, points[2].memory_used), (30, 2));
        assert!(points.iter().all(|p| p.running.is_none()));
        assert!(points.iter().all(|p| p.size_root_fs == 100));
    }

    #[test]
    fn test_downsample_never_exceeds_limit() {
        let window = TimeWindow {
            since: 0,
            before: 1000,
        };
        let samples: Vec<Stat> = (0..1000).map(|t| stat("c1", t, t as u64)).collect();
        for limit in [1, 3, 7, 10, 999, 1000, 5000] {
            let points = downsample(&samples, &window, limit);
            assert!(points.len() <= limit, "limit {limit} gave {}", points.len());
            assert_eq!(points.first().unwrap().time, 0);
        }
        let one = downsample(&samples, &window, 1);
        assert_eq!(one[0].memory_used, 499);
    }

    #[test]
    fn test_wide_window() {
        let samples: Vec<Stat> = (0..10).map(|t| stat("c1", t * 100, 1)).collect();
        let query = StatsOptions {
            since: Some(0),
            before: Some(i64::MAX),
            limit: Some(2),
        }
        .resolve(0)
        .unwrap();
        assert_eq!(query.window.bucket_width(2), i64::MAX / 2 + 1);
        let points = downsample(&samples, &query.window, 2);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].time, 0);

        for (since, before) in [(i64::MIN + 1, 1000), (i64::MIN, i64::MAX)] {
            let err = StatsOptions {
                since: Some(since),
                before: Some(before),
                limit: Some(2),
            }
            .resolve(0)
            .unwrap_err();
            assert!(matches!(err, Error::WindowTooWide { .. }));
            assert!(err.is_invalid_input());
        }

        let unchecked = TimeWindow {
            since: i64::MIN + 1,
            before: 1000,
        };
        assert!(unchecked.bucket_width(2) >= 1);
        assert!(downsample(&samples, &unchecked, 2).len() <= 2);
    }

    #[test]
    fn test_downsample_ignores_out_of_window() {
        let window = TimeWindow {
            since: 10,
            before: 20,
        };
        let samples = vec![stat("c1", 9, 1), stat("c1", 15, 2), stat("c1", 20, 3)];
        let points = downsample(&samples, &window, 10);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].memory_used, 2);
    }
}

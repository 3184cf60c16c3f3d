use tokio_util::sync::CancellationToken;

use crate::config::Probe;
use crate::container::Snapshot;
use crate::event::EventSink;
use crate::inventory::InventoryStore;
use crate::reconcile::{CycleReport, Reconciler};
use crate::stats::StatsStore;

use super::{ProbeClient, Result};

/// Drives the poll cycle of one probe.
///
/// The previous snapshot is kept in memory and only replaced after a
/// successful fetch and reconciliation, so a failed cycle never loses a
/// transition.
pub struct Poller<I, S, E> {
    probe: Probe,
    client: ProbeClient,
    reconciler: Reconciler<I, S, E>,
    previous: Snapshot,
}

impl<I, S, E> Poller<I, S, E>
where
    I: InventoryStore,
    S: StatsStore,
    E: EventSink,
{
    pub fn new(probe: Probe, reconciler: Reconciler<I, S, E>) -> Result<Self> {
        let client = ProbeClient::new(&probe)?;
        Ok(Self {
            probe,
            client,
            reconciler,
            previous: Snapshot::default(),
        })
    }

    /// Runs one fetch and reconciliation. Returns `None` if the cycle was skipped.
    pub async fn cycle(&mut self) -> Option<CycleReport> {
        let name = &self.probe.name;
        let snapshot = match self.client.fetch().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                log::error!("probe={name}: {err}");
                return None;
            }
        };
        log::debug!("probe={name}: fetched {} containers", snapshot.len());

        let reconciled = self
            .reconciler
            .reconcile(name, &self.previous, &snapshot)
            .await;
        match reconciled {
            Ok(report) => {
                self.previous = snapshot;
                Some(report)
            }
            Err(err) => {
                log::error!("probe={name}: failed to read inventory: {err}");
                None
            }
        }
    }

    /// Polls until `shutdown` is cancelled, sleeping the probe's interval
    /// between the end of one cycle and the start of the next.
    pub async fn run(mut self, shutdown: CancellationToken) {
        log::info!(
            "polling probe `{}` at {} every {:?}",
            self.probe.name,
            self.client.url(),
            self.probe.interval
        );

        while !shutdown.is_cancelled() {
            self.cycle().await;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.probe.interval) => {}
            }
        }

        log::info!("stopped polling probe `{}`", self.probe.name);
    }
}

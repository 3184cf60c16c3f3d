//! Turns consecutive probe snapshots into inventory mutations, lifecycle
//! events and stat samples.

mod plan;

pub use plan::{Plan, created_event, plan, removed_event};

use std::collections::HashSet;
use std::sync::Arc;

use crate::container::{ContainerID, Snapshot};
use crate::error::ResultOkLogExt;
use crate::event::EventSink;
use crate::inventory::{self, InventoryStore};
use crate::stats::StatsStore;

/// What one reconciliation cycle actually applied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub removed: usize,
    pub transitions: usize,
    pub created: usize,
    pub stats: usize,
    pub failures: usize,
}

pub struct Reconciler<I, S, E> {
    inventory: Arc<I>,
    stats: Arc<S>,
    events: Arc<E>,
}

impl<I, S, E> Clone for Reconciler<I, S, E> {
    fn clone(&self) -> Self {
        Self {
            inventory: Arc::clone(&self.inventory),
            stats: Arc::clone(&self.stats),
            events: Arc::clone(&self.events),
        }
    }
}

impl<I, S, E> Reconciler<I, S, E>
where
    I: InventoryStore,
    S: StatsStore,
    E: EventSink,
{
    pub fn new(inventory: Arc<I>, stats: Arc<S>, events: Arc<E>) -> Self {
        Self {
            inventory,
            stats,
            events,
        }
    }

    /// Applies the difference between `previous` and `current` for `probe`.
    ///
    /// Removals run first, then transitions, then inserts, then stat appends.
    /// A failing mutation is logged and skipped; its event is not emitted and
    /// the rest of the cycle proceeds. Only a failure to read the inventory
    /// aborts the cycle.
    pub async fn reconcile(
        &self,
        probe: &str,
        previous: &Snapshot,
        current: &Snapshot,
    ) -> inventory::Result<CycleReport> {
        let known = match self.inventory.list(probe).await {
            Ok(containers) => containers,
            Err(err) if err.is_not_found() => Vec::new(),
            Err(err) => return Err(err),
        };

        let plan = plan(probe, previous, current, &known);
        let mut report = CycleReport::default();

        for container in &plan.removed {
            match self.inventory.delete(probe, &container.id).await {
                Ok(()) => {
                    self.events.dispatch(&removed_event(container)).await;
                    report.removed += 1;
                }
                Err(err) if err.is_not_found() => {
                    log::debug!(
                        "probe={probe} container={}: already removed",
                        container.id
                    );
                }
                Err(err) => {
                    log::error!(
                        "probe={probe} container={}: failed to remove: {err}",
                        container.id
                    );
                    report.failures += 1;
                }
            }
        }

        for event in &plan.transitions {
            self.events.dispatch(event).await;
            report.transitions += 1;
        }

        let mut skipped: HashSet<ContainerID> = HashSet::new();
        for container in plan.created {
            let event = created_event(&container);
            let id = container.id.clone();
            let inserted = self
                .inventory
                .insert(container)
                .await
                .ok_log_context(format!("probe={probe} container={id}: failed to insert"));
            match inserted {
                Some(()) => {
                    self.events.dispatch(&event).await;
                    report.created += 1;
                }
                None => {
                    report.failures += 1;
                    skipped.insert(id);
                }
            }
        }

        for stat in plan
            .stats
            .iter()
            .filter(|s| !skipped.contains(&s.container_id))
        {
            let appended = self.stats.insert(stat).await.ok_log_context(format!(
                "probe={probe} container={}: failed to append stat",
                stat.container_id
            ));
            match appended {
                Some(()) => report.stats += 1,
                None => report.failures += 1,
            }
        }

        log::debug!("probe={probe}: {report:?}");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::plan::tests::snapshot;
    use super::*;
    use crate::container::Container;
    use crate::event::{Event, EventType};
    use crate::inventory::FileInventory;
    use crate::stats::{FileStats, StatsOptions, StatsQuery};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        fn take(&self) -> Vec<(EventType, String)> {
            self.events
                .lock()
                .unwrap()
                .drain(..)
                .map(|e| (e.kind, e.target))
                .collect()
        }
    }

    impl EventSink for RecordingSink {
        async fn dispatch(&self, event: &Event) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    /// Delegates to a file inventory but rejects inserts of one container id.
    struct RejectingInventory {
        inner: FileInventory,
        reject: &'static str,
    }

    impl InventoryStore for RejectingInventory {
        async fn register_probe(&self, probe: &str) -> inventory::Result<()> {
            self.inner.register_probe(probe).await
        }

        async fn insert(&self, container: Container) -> inventory::Result<()> {
            if container.id.as_ref() == self.reject {
                return Err(inventory::Error::WriteError(sqlx::Error::PoolTimedOut));
            }
            self.inner.insert(container).await
        }

        async fn delete(&self, probe: &str, id: &ContainerID) -> inventory::Result<()> {
            self.inner.delete(probe, id).await
        }

        async fn get(&self, id: &ContainerID) -> inventory::Result<Container> {
            self.inner.get(id).await
        }

        async fn list(&self, probe: &str) -> inventory::Result<Vec<Container>> {
            self.inner.list(probe).await
        }
    }

    struct Harness<I> {
        _dir: tempfile::TempDir,
        inventory: Arc<I>,
        stats: Arc<FileStats>,
        sink: Arc<RecordingSink>,
        reconciler: Reconciler<I, FileStats, RecordingSink>,
    }

    fn harness_with<I: InventoryStore>(make: impl FnOnce(&std::path::Path) -> I) -> Harness<I> {
        let dir = tempfile::tempdir().unwrap();
        let inventory = Arc::new(make(&dir.path().join("inventory.json")));
        let stats = Arc::new(FileStats::open(dir.path().join("stats.jsonl")).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let reconciler = Reconciler::new(
            Arc::clone(&inventory),
            Arc::clone(&stats),
            Arc::clone(&sink),
        );
        Harness {
            _dir: dir,
            inventory,
            stats,
            sink,
            reconciler,
        }
    }

    fn harness() -> Harness<FileInventory> {
        harness_with(|path| FileInventory::open(path).unwrap())
    }

    fn id(raw: &str) -> ContainerID {
        ContainerID::new(raw).unwrap()
    }

    fn everything() -> StatsQuery {
        StatsOptions {
            since: Some(0),
            before: Some(i64::MAX),
            limit: None,
        }
        .resolve(0)
        .unwrap()
    }

    #[tokio::test]
    async fn test_first_sighting_then_removal() {
        let h = harness();
        h.inventory.register_probe("web1").await.unwrap();

        let first = snapshot(&[("c1", true)], 100);
        let report = h
            .reconciler
            .reconcile("web1", &Snapshot::default(), &first)
            .await
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.stats, 1);
        assert_eq!(h.sink.take(), vec![(EventType::Created, "host-c1 (c1)".to_owned())]);
        assert_eq!(h.inventory.list("web1").await.unwrap().len(), 1);
        assert_eq!(h.stats.query(&id("c1"), &everything()).await.unwrap().len(), 1);

        let report = h
            .reconciler
            .reconcile("web1", &first, &Snapshot::default())
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(h.sink.take(), vec![(EventType::Removed, "host-c1 (c1)".to_owned())]);
        assert!(h.inventory.list("web1").await.unwrap().is_empty());
        // history survives removal
        assert_eq!(h.stats.query(&id("c1"), &everything()).await.unwrap().len(), 1);

        let report = h
            .reconciler
            .reconcile("web1", &Snapshot::default(), &Snapshot::default())
            .await
            .unwrap();
        assert_eq!(report, CycleReport::default());
        assert!(h.sink.take().is_empty());
    }

    #[tokio::test]
    async fn test_stop_start_sequence() {
        let h = harness();
        let s1 = snapshot(&[("c1", true)], 100);
        let s2 = snapshot(&[("c1", false)], 110);
        let s3 = snapshot(&[("c1", true)], 120);

        h.reconciler
            .reconcile("web1", &Snapshot::default(), &s1)
            .await
            .unwrap();
        h.sink.take();

        h.reconciler.reconcile("web1", &s1, &s2).await.unwrap();
        assert_eq!(h.sink.take(), vec![(EventType::Stopped, "host-c1 (c1)".to_owned())]);

        h.reconciler.reconcile("web1", &s2, &s3).await.unwrap();
        assert_eq!(h.sink.take(), vec![(EventType::Started, "host-c1 (c1)".to_owned())]);

        let points = h.stats.query(&id("c1"), &everything()).await.unwrap();
        let running: Vec<Option<bool>> = points.iter().map(|p| p.running).collect();
        assert_eq!(running, vec![Some(true), Some(false), Some(true)]);
    }

    #[tokio::test]
    async fn test_repeated_snapshot_only_appends_stats() {
        let h = harness();
        let s = snapshot(&[("c1", true), ("c2", false)], 100);
        h.reconciler
            .reconcile("web1", &Snapshot::default(), &s)
            .await
            .unwrap();
        h.sink.take();

        let report = h.reconciler.reconcile("web1", &s, &s).await.unwrap();
        assert_eq!(
            report,
            CycleReport {
                stats: 2,
                ..CycleReport::default()
            }
        );
        assert!(h.sink.take().is_empty());
        assert_eq!(h.inventory.list("web1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_restart_with_persisted_inventory_emits_no_created() {
        let dir = tempfile::tempdir().unwrap();
        let inventory_path = dir.path().join("inventory.json");
        let stats = Arc::new(FileStats::open(dir.path().join("stats.jsonl")).unwrap());
        let s = snapshot(&[("c1", true)], 100);

        {
            let inventory = Arc::new(FileInventory::open(&inventory_path).unwrap());
            let sink = Arc::new(RecordingSink::default());
            Reconciler::new(inventory, Arc::clone(&stats), Arc::clone(&sink))
                .reconcile("web1", &Snapshot::default(), &s)
                .await
                .unwrap();
            assert_eq!(sink.take().len(), 1);
        }

        let inventory = Arc::new(FileInventory::open(&inventory_path).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let report = Reconciler::new(inventory, stats, Arc::clone(&sink))
            .reconcile("web1", &Snapshot::default(), &s)
            .await
            .unwrap();
        assert_eq!(report.created, 0);
        assert!(sink.take().is_empty());
    }

    #[tokio::test]
    async fn test_probes_are_isolated() {
        let h = harness();
        let s = snapshot(&[("c1", true)], 100);
        h.reconciler
            .reconcile("web1", &Snapshot::default(), &s)
            .await
            .unwrap();
        h.reconciler
            .reconcile("web2", &Snapshot::default(), &Snapshot::default())
            .await
            .unwrap();

        assert_eq!(h.inventory.list("web1").await.unwrap().len(), 1);
        let events = h.sink.take();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, EventType::Created);
    }

    #[tokio::test]
    async fn test_failed_insert_skips_event_and_stat() {
        let h = harness_with(|path| RejectingInventory {
            inner: FileInventory::open(path).unwrap(),
            reject: "bad",
        });
        let s = snapshot(&[("bad", true), ("good", true)], 100);

        let report = h
            .reconciler
            .reconcile("web1", &Snapshot::default(), &s)
            .await
            .unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(report.stats, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(h.sink.take(), vec![(EventType::Created, "host-good (good)".to_owned())]);
        assert!(h.stats.query(&id("bad"), &everything()).await.unwrap().is_empty());
        assert_eq!(h.stats.query(&id("good"), &everything()).await.unwrap().len(), 1);

        // the rejected container is retried on the next cycle
        let report = h.reconciler.reconcile("web1", &s, &s).await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(report.created, 0);
    }
}

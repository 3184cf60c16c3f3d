use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::container::{Container, ContainerID};
use crate::fsutil;

use super::{Error, InventoryStore, Result};

type Registry = BTreeMap<String, BTreeMap<ContainerID, Container>>;

/// Inventory kept in a single JSON file.
///
/// One mutex guards the whole registry for reads and writes. Every mutation is
/// written through before the lock is released; if the write fails the
/// in-memory registry is restored so memory and disk never diverge. All
/// registry access runs on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct FileInventory {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    registry: Mutex<Registry>,
}

impl FileInventory {
    /// Opens the registry at `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let registry = if path.exists() {
            let reader = fsutil::open_file_reader(&path)?;
            serde_json::from_reader(reader).map_err(|source| Error::Decode {
                path: path.clone(),
                source,
            })?
        } else {
            Registry::default()
        };
        log::debug!(
            "loaded container registry `{}` ({} probes)",
            path.display(),
            registry.len()
        );

        Ok(Self {
            shared: Arc::new(Shared {
                path,
                registry: Mutex::new(registry),
            }),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Shared) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || f(&shared)).await?
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, registry: &Registry) -> Result<()> {
        let bytes = serde_json::to_vec(registry).map_err(Error::Encode)?;
        fsutil::write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    fn register_probe(&self, probe: String) -> Result<()> {
        let mut registry = self.lock();
        if registry.contains_key(&probe) {
            return Ok(());
        }
        registry.insert(probe.clone(), BTreeMap::new());
        if let Err(err) = self.persist(&registry) {
            registry.remove(&probe);
            return Err(err);
        }
        Ok(())
    }

    fn insert(&self, container: Container) -> Result<()> {
        let mut registry = self.lock();
        let new_probe = !registry.contains_key(&container.probe);
        let probe = registry.entry(container.probe.clone()).or_default();
        if probe.contains_key(&container.id) {
            return Err(Error::AlreadyExists {
                probe: container.probe,
                id: container.id.to_string(),
            });
        }

        let (probe_name, id) = (container.probe.clone(), container.id.clone());
        probe.insert(id.clone(), container);
        if let Err(err) = self.persist(&registry) {
            if new_probe {
                registry.remove(&probe_name);
            } else if let Some(probe) = registry.get_mut(&probe_name) {
                probe.remove(&id);
            }
            return Err(err);
        }
        Ok(())
    }

    fn delete(&self, probe: &str, id: &ContainerID) -> Result<()> {
        let mut registry = self.lock();
        let containers = registry
            .get_mut(probe)
            .ok_or_else(|| Error::ProbeNotFound(probe.to_owned()))?;
        let removed = containers
            .remove(id)
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))?;

        if let Err(err) = self.persist(&registry) {
            if let Some(containers) = registry.get_mut(probe) {
                containers.insert(id.clone(), removed);
            }
            return Err(err);
        }
        Ok(())
    }

    fn get(&self, id: &ContainerID) -> Result<Container> {
        self.lock()
            .values()
            .find_map(|containers| containers.get(id))
            .cloned()
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
    }

    fn list(&self, probe: &str) -> Result<Vec<Container>> {
        self.lock()
            .get(probe)
            .map(|containers| containers.values().cloned().collect())
            .ok_or_else(|| Error::ProbeNotFound(probe.to_owned()))
    }
}

impl InventoryStore for FileInventory {
    async fn register_probe(&self, probe: &str) -> Result<()> {
        let probe = probe.to_owned();
        self.blocking(move |shared| shared.register_probe(probe))
            .await
    }

    async fn insert(&self, container: Container) -> Result<()> {
        self.blocking(move |shared| shared.insert(container)).await
    }

    async fn delete(&self, probe: &str, id: &ContainerID) -> Result<()> {
        let (probe, id) = (probe.to_owned(), id.clone());
        self.blocking(move |shared| shared.delete(&probe, &id)).await
    }

    async fn get(&self, id: &ContainerID) -> Result<Container> {
        let id = id.clone();
        self.blocking(move |shared| shared.get(&id)).await
    }

    async fn list(&self, probe: &str) -> Result<Vec<Container>> {
        let probe = probe.to_owned();
        self.blocking(move |shared| shared.list(&probe)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn container(probe: &str, id: &str) -> Container {
        Container {
            probe: probe.to_owned(),
            id: ContainerID::new(id).unwrap(),
            hostname: format!("host-{id}"),
            image: "nginx:1.27".to_owned(),
            ip: "172.17.0.2".to_owned(),
            mac: "02:42:ac:11:00:02".to_owned(),
        }
    }

    #[tokio::test]
    async fn test_insert_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInventory::open(dir.path().join("containers.json")).unwrap();

        store.insert(container("web1", "c1")).await.unwrap();
        store.insert(container("web1", "c2")).await.unwrap();
        store.insert(container("db1", "c3")).await.unwrap();

        let c3 = ContainerID::new("c3").unwrap();
        assert_eq!(store.get(&c3).await.unwrap().probe, "db1");
        assert_eq!(store.list("web1").await.unwrap().len(), 2);

        store.delete("web1", &ContainerID::new("c1").unwrap()).await.unwrap();
        let remaining = store.list("web1").await.unwrap();
        assert_eq!(remaining, vec![container("web1", "c2")]);
    }

    #[tokio::test]
    async fn test_not_found_is_distinct() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInventory::open(dir.path().join("containers.json")).unwrap();
        let c1 = ContainerID::new("c1").unwrap();

        let err = store.list("nope").await.unwrap_err();
        assert!(matches!(err, Error::ProbeNotFound(_)));
        assert!(err.is_not_found());
        assert!(matches!(store.get(&c1).await, Err(Error::ContainerNotFound(_))));
        assert!(matches!(
            store.delete("nope", &c1).await,
            Err(Error::ProbeNotFound(_))
        ));

        store.register_probe("web1").await.unwrap();
        assert!(store.list("web1").await.unwrap().is_empty());
        assert!(matches!(
            store.delete("web1", &c1).await,
            Err(Error::ContainerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_duplicate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInventory::open(dir.path().join("containers.json")).unwrap();

        store.insert(container("web1", "c1")).await.unwrap();
        assert!(matches!(
            store.insert(container("web1", "c1")).await,
            Err(Error::AlreadyExists { .. })
        ));
        assert_eq!(store.list("web1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_every_mutation_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("containers.json");
        {
            let store = FileInventory::open(&path).unwrap();
            store.register_probe("idle").await.unwrap();
            store.insert(container("web1", "c1")).await.unwrap();
            store.insert(container("web1", "c2")).await.unwrap();
            store.delete("web1", &ContainerID::new("c2").unwrap()).await.unwrap();
        }

        let reopened = FileInventory::open(&path).unwrap();
        assert_eq!(
            reopened.list("web1").await.unwrap(),
            vec![container("web1", "c1")]
        );
        assert!(reopened.list("idle").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_registry_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let store = FileInventory::open(sub.join("containers.json")).unwrap();
        store.insert(container("web1", "c1")).await.unwrap();

        std::fs::remove_dir_all(&sub).unwrap();

        assert!(matches!(
            store.insert(container("web1", "c2")).await,
            Err(Error::FileWrite(_))
        ));
        assert!(matches!(
            store.insert(container("db1", "c3")).await,
            Err(Error::FileWrite(_))
        ));
        assert!(
            store
                .delete("web1", &ContainerID::new("c1").unwrap())
                .await
                .is_err()
        );

        assert_eq!(
            store.list("web1").await.unwrap(),
            vec![container("web1", "c1")]
        );
        assert!(store.list("db1").await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("containers.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            FileInventory::open(&path),
            Err(Error::Decode { .. })
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_writes_leave_runtime_responsive() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileInventory::open(dir.path().join("containers.json")).unwrap());
        let ticks = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };
        for i in 0..20 {
            store.insert(container("web1", &format!("c{i}"))).await.unwrap();
        }
        ticker.abort();

        // a single-threaded runtime only makes progress on other tasks while
        // the writes wait on the blocking pool
        assert!(ticks.load(std::sync::atomic::Ordering::SeqCst) > 0);
        assert_eq!(store.list("web1").await.unwrap().len(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_inserts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("containers.json");
        let store = Arc::new(FileInventory::open(&path).unwrap());

        let mut handles = Vec::new();
        for p in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let probe = format!("probe{p}");
                for i in 0..25 {
                    store.insert(container(&probe, &format!("c{p}-{i}"))).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let reopened = FileInventory::open(&path).unwrap();
        for p in 0..4 {
            assert_eq!(reopened.list(&format!("probe{p}")).await.unwrap().len(), 25);
        }
    }
}

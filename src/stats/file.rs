use std::fs::{File, OpenOptions};
use std::io::{BufRead, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;

use crate::container::ContainerID;
use crate::fsutil;

use super::{Error, Result, Stat, StatPoint, StatsQuery, StatsStore, downsample};

/// Stats kept in an append-only JSON-lines log.
///
/// The log is replayed into a per-container, time-ordered index on open.
/// Appends are synced to disk on the blocking thread pool before they are
/// acknowledged.
///
/// There is no retention: every sample ever written stays in the log and in
/// memory, and the whole log is replayed at startup. Memory and startup time
/// grow with the history. The MySQL backend has no such limit.
#[derive(Debug, Clone)]
pub struct FileStats {
    shared: Arc<Shared>,
}

#[derive(Debug)]
struct Shared {
    path: PathBuf,
    log: Mutex<File>,
    index: DashMap<ContainerID, Vec<Stat>>,
}

impl FileStats {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let index: DashMap<ContainerID, Vec<Stat>> = DashMap::default();

        if path.exists() {
            let reader = fsutil::open_file_reader(&path)?;
            let mut count = 0usize;
            for (n, line) in reader.lines().enumerate() {
                let line = line.map_err(|source| Error::Io {
                    path: path.clone(),
                    source,
                })?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Stat>(&line) {
                    Ok(stat) => {
                        insert_sorted(&mut index.entry(stat.container_id.clone()).or_default(), stat);
                        count += 1;
                    }
                    Err(err) => log::warn!(
                        "skipping unreadable line {} of stats log `{}`: {}",
                        n + 1,
                        path.display(),
                        err
                    ),
                }
            }
            log::debug!("replayed {count} stats from `{}`", path.display());
        }

        let log = open_log(&path).map_err(|source| Error::Io {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            shared: Arc::new(Shared {
                path,
                log: Mutex::new(log),
                index,
            }),
        })
    }

    async fn append(&self, stats: Vec<Stat>) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.append(&stats)).await?
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, File> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn append(&self, stats: &[Stat]) -> Result<()> {
        let mut buf = Vec::with_capacity(stats.len() * 192);
        for stat in stats {
            serde_json::to_writer(&mut buf, stat).map_err(Error::Encode)?;
            buf.push(b'\n');
        }

        let mut log = self.lock();
        log.write_all(&buf)
            .and_then(|_| log.sync_data())
            .map_err(|source| Error::Io {
                path: self.path.clone(),
                source,
            })?;

        for stat in stats {
            insert_sorted(
                &mut self.index.entry(stat.container_id.clone()).or_default(),
                stat.clone(),
            );
        }
        Ok(())
    }
}

/// Opens the log for appending. A torn last line is terminated so the next
/// record starts on a line of its own.
fn open_log(path: &Path) -> std::io::Result<File> {
    let mut log = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)?;
    let len = log.metadata()?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        log.seek(SeekFrom::Start(len - 1))?;
        log.read_exact(&mut last)?;
        if last[0] != b'\n' {
            log.write_all(b"\n")?;
            log.sync_data()?;
        }
    }
    Ok(log)
}

fn insert_sorted(samples: &mut Vec<Stat>, stat: Stat) {
    let at = samples.partition_point(|s| s.time <= stat.time);
    samples.insert(at, stat);
}

impl StatsStore for FileStats {
    async fn insert(&self, stat: &Stat) -> Result<()> {
        self.append(vec![stat.clone()]).await
    }

    async fn insert_batch(&self, stats: &[Stat]) -> Result<()> {
        if stats.is_empty() {
            return Ok(());
        }
        self.append(stats.to_vec()).await
    }

    async fn query(&self, container_id: &ContainerID, query: &StatsQuery) -> Result<Vec<StatPoint>> {
        let Some(samples) = self.shared.index.get(container_id) else {
            return Ok(Vec::new());
        };
        let window = &query.window;
        let start = samples.partition_point(|s| s.time < window.since);
        let end = samples.partition_point(|s| s.time < window.before);
        let in_window = &samples[start..end.max(start)];

        Ok(match query.limit {
            Some(limit) => downsample(in_window, window, limit),
            None => in_window.iter().cloned().map(StatPoint::from).collect(),
        })
    }

    async fn last(&self, container_id: &ContainerID) -> Result<Option<StatPoint>> {
        Ok(self
            .shared
            .index
            .get(container_id)
            .and_then(|samples| samples.last().cloned())
            .map(StatPoint::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::{StatsOptions, TimeWindow};

    fn stat(id: &str, time: i64) -> Stat {
        Stat {
            container_id: ContainerID::new(id).unwrap(),
            time,
            size_root_fs: 1000,
            size_rw: 10,
            memory_used: time as u64 * 2,
            net_rx: 5,
            net_tx: 6,
            cpu_usage: 7,
            running: time % 2 == 0,
        }
    }

    fn window(since: i64, before: i64, limit: Option<usize>) -> StatsQuery {
        StatsQuery {
            window: TimeWindow { since, before },
            limit,
        }
    }

    #[tokio::test]
    async fn test_raw_query_is_half_open_and_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStats::open(dir.path().join("stats.jsonl")).unwrap();
        for t in [30, 10, 20, 40, 50] {
            store.insert(&stat("c1", t)).await.unwrap();
        }
        store.insert(&stat("c2", 25)).await.unwrap();

        let c1 = ContainerID::new("c1").unwrap();
        let points = store.query(&c1, &window(20, 50, None)).await.unwrap();
        let times: Vec<i64> = points.iter().map(|p| p.time).collect();
        assert_eq!(times, vec![20, 30, 40]);
        assert!(points.iter().all(|p| p.running.is_some()));
        assert!(points.iter().all(|p| p.container_id == c1));
    }

    #[tokio::test]
    async fn test_limited_query_spans_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStats::open(dir.path().join("stats.jsonl")).unwrap();
        let batch: Vec<Stat> = (0..100).map(|t| stat("c1", t)).collect();
        store.insert_batch(&batch).await.unwrap();

        let c1 = ContainerID::new("c1").unwrap();
        let points = store.query(&c1, &window(0, 100, Some(10))).await.unwrap();
        assert_eq!(points.len(), 10);
        assert_eq!(points.first().unwrap().time, 0);
        assert_eq!(points.last().unwrap().time, 90);
        assert!(points.iter().all(|p| p.running.is_none()));
    }

    #[tokio::test]
    async fn test_unknown_container_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStats::open(dir.path().join("stats.jsonl")).unwrap();
        let nope = ContainerID::new("nope").unwrap();
        assert!(store.query(&nope, &window(0, 10, None)).await.unwrap().is_empty());
        assert!(store.last(&nope).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_single_and_batch_inserts_are_equivalent() {
        let dir = tempfile::tempdir().unwrap();
        let single = FileStats::open(dir.path().join("single.jsonl")).unwrap();
        let batched = FileStats::open(dir.path().join("batched.jsonl")).unwrap();
        let samples: Vec<Stat> = (0..20).map(|t| stat("c1", t * 3)).collect();

        for s in &samples {
            single.insert(s).await.unwrap();
        }
        batched.insert_batch(&samples).await.unwrap();

        let c1 = ContainerID::new("c1").unwrap();
        for q in [window(0, 60, None), window(5, 40, Some(4))] {
            assert_eq!(
                single.query(&c1, &q).await.unwrap(),
                batched.query(&c1, &q).await.unwrap()
            );
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_appends_leave_runtime_responsive() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempfile::tempdir().unwrap();
        let store = FileStats::open(dir.path().join("stats.jsonl")).unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        let ticker = {
            let ticks = Arc::clone(&ticks);
            tokio::spawn(async move {
                loop {
                    ticks.fetch_add(1, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        for t in 0..20 {
            store.insert(&stat("c1", t)).await.unwrap();
        }
        ticker.abort();

        assert!(ticks.load(Ordering::SeqCst) > 0);
        let c1 = ContainerID::new("c1").unwrap();
        assert_eq!(store.last(&c1).await.unwrap().unwrap().time, 19);
    }

    #[tokio::test]
    async fn test_log_is_replayed_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.jsonl");
        {
            let store = FileStats::open(&path).unwrap();
            store.insert(&stat("c1", 1)).await.unwrap();
            store.insert(&stat("c1", 2)).await.unwrap();
        }
        // a torn write at the tail must not prevent startup
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"container_id\":\"c1\",\"ti").unwrap();
        drop(f);

        let store = FileStats::open(&path).unwrap();
        let c1 = ContainerID::new("c1").unwrap();
        let last = store.last(&c1).await.unwrap().unwrap();
        assert_eq!(last.time, 2);
        assert_eq!(last.running, Some(true));
        let all = stats_via_options(&store, &c1).await;
        assert_eq!(all.len(), 2);

        store.insert(&stat("c1", 3)).await.unwrap();
        drop(store);
        let store = FileStats::open(&path).unwrap();
        assert_eq!(stats_via_options(&store, &c1).await.len(), 3);
    }

    async fn stats_via_options(store: &FileStats, id: &ContainerID) -> Vec<StatPoint> {
        let options = StatsOptions {
            since: Some(0),
            before: Some(10),
            limit: None,
        };
        crate::stats::stats_by_container(store, id, &options)
            .await
            .unwrap()
    }
}

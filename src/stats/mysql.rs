use sqlx::MySqlPool;

use crate::container::ContainerID;

use super::{Error, Result, Stat, StatPoint, StatsQuery, StatsStore};

const INSERT_QUERY: &str = r#"
INSERT INTO stats (
    container_id, time,
    size_root_fs, size_rw, size_memory,
    net_rx, net_tx, cpu_usage,
    running
) VALUES (
    ?, ?,
    ?, ?, ?,
    ?, ?, ?,
    ?
)
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
struct StatRow {
    container_id: String,
    time: i64,
    size_root_fs: u64,
    size_rw: u64,
    size_memory: u64,
    net_rx: u64,
    net_tx: u64,
    cpu_usage: u64,
    running: bool,
}

impl TryFrom<StatRow> for StatPoint {
    type Error = Error;

    fn try_from(row: StatRow) -> Result<Self> {
        Ok(StatPoint {
            container_id: ContainerID::new(row.container_id)?,
            time: row.time,
            size_root_fs: row.size_root_fs,
            size_rw: row.size_rw,
            memory_used: row.size_memory,
            net_rx: row.net_rx,
            net_tx: row.net_tx,
            cpu_usage: row.cpu_usage,
            running: Some(row.running),
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct BucketRow {
    bucket: i64,
    size_root_fs: u64,
    size_rw: u64,
    size_memory: u64,
    net_rx: u64,
    net_tx: u64,
    cpu_usage: u64,
}

fn bind_stat<'q>(
    query: sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>,
    stat: &'q Stat,
) -> sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments> {
    query
        .bind(stat.container_id.as_ref())
        .bind(stat.time)
        .bind(stat.size_root_fs)
        .bind(stat.size_rw)
        .bind(stat.memory_used)
        .bind(stat.net_rx)
        .bind(stat.net_tx)
        .bind(stat.cpu_usage)
        .bind(stat.running)
}

/// Stats kept in the `stats` table, one row per sample.
#[derive(Debug, Clone)]
pub struct MySqlStats {
    db: MySqlPool,
}

impl MySqlStats {
    pub fn new(db: MySqlPool) -> Self {
        Self { db }
    }
}

impl StatsStore for MySqlStats {
    async fn insert(&self, stat: &Stat) -> Result<()> {
        bind_stat(sqlx::query(INSERT_QUERY), stat)
            .execute(&self.db)
            .await
            .map_err(Error::InsertError)?;
        Ok(())
    }

    /// Inserts all samples in a single transaction; either all of them are
    /// stored or none is.
    async fn insert_batch(&self, stats: &[Stat]) -> Result<()> {
        let mut tx: sqlx::Transaction<'_, sqlx::MySql> =
            self.db.begin().await.map_err(Error::InsertError)?;

        for stat in stats {
            bind_stat(sqlx::query(INSERT_QUERY), stat)
                .execute(&mut *tx)
                .await
                .map_err(Error::InsertError)?;
        }
        tx.commit().await.map_err(Error::InsertError)?;

        Ok(())
    }

    async fn query(&self, container_id: &ContainerID, query: &StatsQuery) -> Result<Vec<StatPoint>> {
        let window = &query.window;
        let Some(limit) = query.limit else {
            let rows = sqlx::query_as::<_, StatRow>(
                r#"
SELECT container_id, time, size_root_fs, size_rw, size_memory, net_rx, net_tx, cpu_usage, running
FROM stats
WHERE container_id = ? AND time >= ? AND time < ?
ORDER BY time
"#,
            )
            .bind(container_id.as_ref())
            .bind(window.since)
            .bind(window.before)
            .fetch_all(&self.db)
            .await
            .map_err(Error::ReadError)?;

            return rows.into_iter().map(StatPoint::try_from).collect();
        };

        let width = window.bucket_width(limit);
        let rows = sqlx::query_as::<_, BucketRow>(
            r#"
SELECT
    (time - ?) DIV ? AS bucket,
    CAST(FLOOR(AVG(size_root_fs)) AS UNSIGNED) AS size_root_fs,
    CAST(FLOOR(AVG(size_rw)) AS UNSIGNED) AS size_rw,
    CAST(FLOOR(AVG(size_memory)) AS UNSIGNED) AS size_memory,
    CAST(FLOOR(AVG(net_rx)) AS UNSIGNED) AS net_rx,
    CAST(FLOOR(AVG(net_tx)) AS UNSIGNED) AS net_tx,
    CAST(FLOOR(AVG(cpu_usage)) AS UNSIGNED) AS cpu_usage
FROM stats
WHERE container_id = ? AND time >= ? AND time < ?
GROUP BY bucket
ORDER BY bucket
"#,
        )
        .bind(window.since)
        .bind(width)
        .bind(container_id.as_ref())
        .bind(window.since)
        .bind(window.before)
        .fetch_all(&self.db)
        .await
        .map_err(Error::ReadError)?;

        Ok(rows
            .into_iter()
            .map(|row| StatPoint {
                container_id: container_id.clone(),
                time: window.bucket_start(row.bucket, width),
                size_root_fs: row.size_root_fs,
                size_rw: row.size_rw,
                memory_used: row.size_memory,
                net_rx: row.net_rx,
                net_tx: row.net_tx,
                cpu_usage: row.cpu_usage,
                running: None,
            })
            .collect())
    }

    async fn last(&self, container_id: &ContainerID) -> Result<Option<StatPoint>> {
        let row = sqlx::query_as::<_, StatRow>(
            r#"
SELECT container_id, time, size_root_fs, size_rw, size_memory, net_rx, net_tx, cpu_usage, running
FROM stats
WHERE container_id = ?
ORDER BY time DESC
LIMIT 1
"#,
        )
        .bind(container_id.as_ref())
        .fetch_optional(&self.db)
        .await
        .map_err(Error::ReadError)?;

        row.map(StatPoint::try_from).transpose()
    }
}

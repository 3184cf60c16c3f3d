use dashmap::DashMap;
use sqlx::MySqlPool;

use crate::container::{Container, ContainerID};

use super::models::ContainerRow;
use super::{ContainerField, Error, FieldValue, InventoryStore, Result};

const SELECT_CONTAINERS: &str = r#"
SELECT c.container_id, p.name AS probe, c.hostname, c.image, c.ip, c.mac
FROM containers c
JOIN probes p ON p.id = c.probe_id
"#;

/// Inventory kept in the `probes` and `containers` tables.
#[derive(Debug)]
pub struct MySqlInventory {
    db: MySqlPool,
    probe_ids: DashMap<String, i64>,
}

impl MySqlInventory {
    pub fn new(db: MySqlPool) -> Self {
        Self {
            db,
            probe_ids: DashMap::default(),
        }
    }

    async fn probe_id(&self, probe: &str) -> Result<i64> {
        if let Some(id) = self.probe_ids.get(probe) {
            return Ok(*id);
        }
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM probes WHERE name = ?")
            .bind(probe)
            .fetch_optional(&self.db)
            .await
            .map_err(Error::ReadError)?;
        let id = id.ok_or_else(|| Error::ProbeNotFound(probe.to_owned()))?;
        self.probe_ids.insert(probe.to_owned(), id);
        Ok(id)
    }

    /// Returns every container whose `field` equals `value`.
    pub async fn find_by(&self, field: ContainerField, value: FieldValue<'_>) -> Result<Vec<Container>> {
        let sql = format!("{SELECT_CONTAINERS} WHERE c.{} = ?", field.column());
        let query = sqlx::query_as::<_, ContainerRow>(&sql);
        let query = match value {
            FieldValue::Int(v) => query.bind(v),
            FieldValue::Text(v) => query.bind(v),
        };
        let rows = query.fetch_all(&self.db).await.map_err(Error::ReadError)?;

        rows.into_iter().map(Container::try_from).collect()
    }
}

impl InventoryStore for MySqlInventory {
    async fn register_probe(&self, probe: &str) -> Result<()> {
        sqlx::query("INSERT IGNORE INTO probes (name) VALUES (?)")
            .bind(probe)
            .execute(&self.db)
            .await
            .map_err(Error::WriteError)?;
        let id = self.probe_id(probe).await?;
        log::debug!("probe `{probe}` has id {id}");
        Ok(())
    }

    async fn insert(&self, container: Container) -> Result<()> {
        let probe_id = self.probe_id(&container.probe).await?;
        let result = sqlx::query(
            r#"
INSERT INTO containers (container_id, probe_id, hostname, image, ip, mac)
VALUES (?, ?, ?, ?, ?, ?)
"#,
        )
        .bind(container.id.as_ref())
        .bind(probe_id)
        .bind(&container.hostname)
        .bind(&container.image)
        .bind(&container.ip)
        .bind(&container.mac)
        .execute(&self.db)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::AlreadyExists {
                    probe: container.probe,
                    id: container.id.to_string(),
                })
            }
            Err(err) => Err(Error::WriteError(err)),
        }
    }

    async fn delete(&self, probe: &str, id: &ContainerID) -> Result<()> {
        let probe_id = self.probe_id(probe).await?;
        let result = sqlx::query("DELETE FROM containers WHERE probe_id = ? AND container_id = ?")
            .bind(probe_id)
            .bind(id.as_ref())
            .execute(&self.db)
            .await
            .map_err(Error::WriteError)?;

        if result.rows_affected() == 0 {
            return Err(Error::ContainerNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &ContainerID) -> Result<Container> {
        self.find_by(ContainerField::ContainerId, FieldValue::Text(id.as_ref()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::ContainerNotFound(id.to_string()))
    }

    async fn list(&self, probe: &str) -> Result<Vec<Container>> {
        let probe_id = self.probe_id(probe).await?;
        self.find_by(ContainerField::ProbeId, FieldValue::Int(probe_id))
            .await
    }
}

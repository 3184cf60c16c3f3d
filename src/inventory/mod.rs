//! Durable registry of the containers known on each probe.
//!
//! Two backends implement [`InventoryStore`]: a JSON registry file guarded by
//! a single lock ([`FileInventory`]) and MySQL ([`MySqlInventory`]).

mod error;
mod file;
mod models;
mod mysql;

pub use error::{Error, Result};
pub use file::FileInventory;
pub use models::{ContainerField, FieldValue};
pub use mysql::MySqlInventory;

use crate::container::{Container, ContainerID};

pub trait InventoryStore: Send + Sync + 'static {
    /// Makes `probe` known to the store so that listing it yields an empty
    /// list instead of `NotFound`. Idempotent.
    fn register_probe(&self, probe: &str) -> impl Future<Output = Result<()>> + Send;

    /// Inserts a new container. Fails with [`Error::AlreadyExists`] if
    /// `(probe, id)` is already present.
    fn insert(&self, container: Container) -> impl Future<Output = Result<()>> + Send;

    fn delete(&self, probe: &str, id: &ContainerID) -> impl Future<Output = Result<()>> + Send;

    /// Looks a container up by id across all probes.
    fn get(&self, id: &ContainerID) -> impl Future<Output = Result<Container>> + Send;

    fn list(&self, probe: &str) -> impl Future<Output = Result<Vec<Container>>> + Send;
}

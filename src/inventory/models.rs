use crate::container::{Container, ContainerID};

use super::Error;

/// Columns of the `containers` table that lookups may filter on.
///
/// Only these names can ever reach a query string; the compared value is
/// always bound as a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerField {
    Id,
    ContainerId,
    ProbeId,
    Hostname,
    Image,
    Ip,
    Mac,
}

impl ContainerField {
    pub fn column(self) -> &'static str {
        match self {
            ContainerField::Id => "id",
            ContainerField::ContainerId => "container_id",
            ContainerField::ProbeId => "probe_id",
            ContainerField::Hostname => "hostname",
            ContainerField::Image => "image",
            ContainerField::Ip => "ip",
            ContainerField::Mac => "mac",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
    Int(i64),
    Text(&'a str),
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub(super) struct ContainerRow {
    pub container_id: String,
    pub probe: String,
    pub hostname: String,
    pub image: String,
    pub ip: String,
    pub mac: String,
}

impl TryFrom<ContainerRow> for Container {
    type Error = Error;

    fn try_from(row: ContainerRow) -> Result<Self, Self::Error> {
        Ok(Container {
            probe: row.probe,
            id: ContainerID::new(row.container_id)?,
            hostname: row.hostname,
            image: row.image,
            ip: row.ip,
            mac: row.mac,
        })
    }
}

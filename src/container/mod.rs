//! Container identity, persisted container records and the transient
//! observations a probe reports for one poll cycle.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

mod error;

pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// A validated container identifier as reported by a probe.
///
/// # Examples
///
/// ```
/// # use probe_monitor::container::ContainerID;
/// let container_id = ContainerID::new("3f4e1c2b9a7d").unwrap();
/// assert_eq!(container_id.as_ref(), "3f4e1c2b9a7d");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the input is empty or its length
    /// exceeds [`CONTAINER_ID_MAX_LEN`].
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty() || src.len() > CONTAINER_ID_MAX_LEN {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl serde::Serialize for ContainerID {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ContainerID {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        ContainerID::new(raw).map_err(serde::de::Error::custom)
    }
}

/// A container known to the inventory, unique per `(probe, id)`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Container {
    pub probe: String,
    pub id: ContainerID,
    pub hostname: String,
    pub image: String,
    pub ip: String,
    pub mac: String,
}

impl Container {
    /// Builds the inventory record for a container first observed on `probe`.
    pub fn from_observation(probe: &str, id: ContainerID, observation: &Observation) -> Self {
        Self {
            probe: probe.to_owned(),
            id,
            hostname: observation.hostname.clone(),
            image: observation.image.clone(),
            ip: observation.ip.clone(),
            mac: observation.mac.clone(),
        }
    }
}

/// One container as reported by a probe's `/list` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Observation {
    pub hostname: String,
    pub image: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mac: String,
    pub running: bool,
    #[serde(default)]
    pub size_root_fs: u64,
    #[serde(default)]
    pub size_rw: u64,
    #[serde(default)]
    pub memory_used: u64,
    #[serde(default)]
    pub net_rx: u64,
    #[serde(default)]
    pub net_tx: u64,
    #[serde(default)]
    pub cpu_usage: u64,
    /// Unix seconds at which the probe sampled the container.
    pub observation_time: i64,
}

/// The full set of containers a probe reported in one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(transparent)]
pub struct Snapshot(HashMap<ContainerID, Observation>);

impl Snapshot {
    pub fn get(&self, id: &str) -> Option<&Observation> {
        self.0.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContainerID, &Observation)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(ContainerID, Observation)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (ContainerID, Observation)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

//! YAML configuration: probes to poll, storage backend, alerting rules and
//! the query API listener.
//!
//! Everything is validated once at load; a [`Config`] that exists is usable
//! as-is and is never mutated afterwards.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::RegexSet;
use reqwest::Url;

use crate::fsutil;

const DEFAULT_LISTEN: &str = "0.0.0.0:8124";
const DEFAULT_TRANSPORT_TIMEOUT_SECS: f64 = 30.0;
const MAX_DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    FileOpen(#[from] fsutil::FileOpenError),
    #[error("failed to parse configuration file `{path}`: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("probe name `{0}` must be non-empty and only contain [0-9A-Za-z_-]")]
    InvalidProbeName(String),
    #[error("probe `{0}` is configured more than once")]
    DuplicateProbe(String),
    #[error("probe `{probe}` has an invalid uri `{uri}`: {reason}")]
    InvalidUri {
        probe: String,
        uri: String,
        reason: String,
    },
    #[error("{scope}: `{field}` must be a positive number of seconds, got {value}")]
    InvalidDuration {
        scope: String,
        field: &'static str,
        value: f64,
    },
    #[error("invalid watch pattern: {0}")]
    InvalidWatch(#[source] regex::Error),
    #[error("transport `{0}` has an empty path")]
    EmptyTransportPath(String),
    #[error("`api.login` and `api.password` must be set together")]
    IncompleteApiLogin,
    #[error("mysql storage needs `storage.url` or the DATABASE_URL environment variable")]
    MissingDatabaseUrl,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Validated program configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub event: EventConfig,
    pub probes: Vec<Probe>,
}

#[derive(Clone, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Basic-auth user name; the API is open when unset.
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl ApiConfig {
    /// Returns the basic-auth credentials the API requires, if any.
    pub fn credentials(&self) -> Option<ApiLogin> {
        match (&self.login, &self.password) {
            (Some(login), Some(password)) => Some(ApiLogin {
                login: login.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            login: None,
            password: None,
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("listen", &self.listen)
            .field("login", &self.login)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// User name and password the query API expects in basic auth.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiLogin {
    pub login: String,
    pub password: String,
}

impl ApiLogin {
    pub fn matches(&self, login: &str, password: &str) -> bool {
        self.login == login && self.password == password
    }
}

impl fmt::Debug for ApiLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiLogin")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_owned()
}

/// Which backend holds the inventory and the stats time-series.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum StorageConfig {
    File {
        inventory_path: PathBuf,
        stats_path: PathBuf,
    },
    Mysql {
        #[serde(default)]
        url: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::File {
            inventory_path: PathBuf::from("./containers.json"),
            stats_path: PathBuf::from("./stats.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventConfig {
    /// Regular expressions matched against an event's target. Empty means
    /// nothing is ever dispatched.
    #[serde(default)]
    pub watch: Vec<String>,
    #[serde(default)]
    pub transports: Vec<Transport>,
    /// Upper bound for a single transport run, in seconds.
    #[serde(default)]
    pub transport_timeout: Option<f64>,
}

impl EventConfig {
    /// Compiles the watch patterns into a single matcher.
    pub fn watch_set(&self) -> Result<RegexSet> {
        RegexSet::new(&self.watch).map_err(Error::InvalidWatch)
    }

    /// Configured transport timeout; validated at load.
    pub fn transport_timeout(&self) -> Duration {
        self.transport_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TRANSPORT_TIMEOUT_SECS))
    }
}

/// An external program that delivers an alert.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct Transport {
    pub name: String,
    pub path: PathBuf,
}

/// A remote agent listing the containers of one host.
#[derive(Clone)]
pub struct Probe {
    pub name: String,
    pub uri: Url,
    pub secret: String,
    /// Delay between the end of one poll cycle and the start of the next.
    pub interval: Duration,
    /// Bound on a single `/list` request, connect through body.
    pub timeout: Duration,
}

impl Probe {
    /// Returns the URL of the probe's container listing.
    pub fn list_url(&self) -> String {
        format!("{}/list", self.uri.as_str().trim_end_matches('/'))
    }
}

impl fmt::Debug for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Probe")
            .field("name", &self.name)
            .field("uri", &self.uri.as_str())
            .field("secret", &"<redacted>")
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    #[serde(default)]
    api: ApiConfig,
    #[serde(default)]
    storage: StorageConfig,
    #[serde(default)]
    event: EventConfig,
    #[serde(default)]
    probes: Vec<RawProbe>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawProbe {
    name: String,
    uri: String,
    #[serde(default)]
    api_password: String,
    reload_time: f64,
    #[serde(default)]
    timeout: Option<f64>,
}

impl Config {
    /// Reads and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = fsutil::open_file_reader(path)?;
        let raw: RawConfig = serde_yaml::from_reader(reader).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    /// Parses and validates a configuration document.
    pub fn from_yaml(src: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(src).map_err(|source| Error::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut probes = Vec::with_capacity(raw.probes.len());
        for p in raw.probes {
            let probe = validate_probe(p)?;
            if !seen.insert(probe.name.clone()) {
                return Err(Error::DuplicateProbe(probe.name));
            }
            probes.push(probe);
        }

        raw.event.watch_set()?;
        if let Some(secs) = raw.event.transport_timeout {
            positive_secs("event", "transport-timeout", secs)?;
        }
        if raw.api.login.is_some() != raw.api.password.is_some() {
            return Err(Error::IncompleteApiLogin);
        }
        if let Some(t) = raw.event.transports.iter().find(|t| t.path.as_os_str().is_empty()) {
            return Err(Error::EmptyTransportPath(t.name.clone()));
        }

        let storage = match raw.storage {
            StorageConfig::Mysql { url } => {
                let url = url
                    .or_else(|| std::env::var("DATABASE_URL").ok())
                    .ok_or(Error::MissingDatabaseUrl)?;
                StorageConfig::Mysql { url: Some(url) }
            }
            file => file,
        };

        Ok(Self {
            api: raw.api,
            storage,
            event: raw.event,
            probes,
        })
    }

    pub fn probe(&self, name: &str) -> Option<&Probe> {
        self.probes.iter().find(|p| p.name == name)
    }
}

pub(crate) fn is_valid_probe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn positive_secs(scope: &str, field: &'static str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| Error::InvalidDuration {
            scope: scope.to_owned(),
            field,
            value,
        })
}

fn validate_probe(raw: RawProbe) -> Result<Probe> {
    if !is_valid_probe_name(&raw.name) {
        return Err(Error::InvalidProbeName(raw.name));
    }
    let uri = Url::parse(&raw.uri).map_err(|e| Error::InvalidUri {
        probe: raw.name.clone(),
        uri: raw.uri.clone(),
        reason: e.to_string(),
    })?;
    if !matches!(uri.scheme(), "http" | "https") {
        return Err(Error::InvalidUri {
            probe: raw.name,
            uri: raw.uri,
            reason: "scheme must be http or https".to_owned(),
        });
    }

    let scope = format!("probe `{}`", raw.name);
    let interval = positive_secs(&scope, "reload-time", raw.reload_time)?;
    let timeout = match raw.timeout {
        Some(t) => positive_secs(&scope, "timeout", t)?,
        None => interval.min(MAX_DEFAULT_REQUEST_TIMEOUT),
    };

    Ok(Probe {
        name: raw.name,
        uri,
        secret: raw.api_password,
        interval,
        timeout,
    })
}

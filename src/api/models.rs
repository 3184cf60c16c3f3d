use crate::config::Probe;
use crate::stats::StatsOptions;

/// Public view of a configured probe. The secret is never exposed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ProbeInfo {
    pub name: String,
    pub uri: String,
}

impl From<&Probe> for ProbeInfo {
    fn from(probe: &Probe) -> Self {
        Self {
            name: probe.name.clone(),
            uri: probe.uri.to_string(),
        }
    }
}

/// Query string of the stats routes.
#[derive(Debug, Default, serde::Deserialize)]
pub struct StatsParams {
    pub since: Option<i64>,
    pub before: Option<i64>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub populate: bool,
}

impl StatsParams {
    pub fn options(&self) -> StatsOptions {
        StatsOptions {
            since: self.since,
            before: self.before,
            limit: self.limit,
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ErrorBody {
    pub error: String,
}

use crate::config::Probe;
use crate::container::Snapshot;

use super::{Error, Result};

/// Header carrying the probe's shared secret.
const AUTH_HEADER: &str = "Auth";

/// Fetches container snapshots from a single probe.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    http: reqwest::Client,
    url: String,
    secret: String,
}

impl ProbeClient {
    /// Builds a client whose requests are bounded by the probe's timeout.
    pub fn new(probe: &Probe) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(probe.timeout)
            .build()
            .map_err(Error::Client)?;

        Ok(Self {
            http,
            url: probe.list_url(),
            secret: probe.secret.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Requests the probe's current container list.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and timeouts, on any non-2xx status and on
    /// a body that is not a valid container listing.
    pub async fn fetch(&self) -> Result<Snapshot> {
        let request_error = |source| Error::Request {
            url: self.url.clone(),
            source,
        };

        let response = self
            .http
            .get(&self.url)
            .header(AUTH_HEADER, &self.secret)
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status {
                url: self.url.clone(),
                status,
            });
        }

        let body = response.bytes().await.map_err(request_error)?;
        log::trace!("{} -> {}", self.url, String::from_utf8_lossy(&body));

        serde_json::from_slice(&body).map_err(|source| Error::Parse {
            url: self.url.clone(),
            source,
        })
    }
}

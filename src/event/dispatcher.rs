use std::process::Stdio;
use std::time::Duration;

use regex::RegexSet;

use crate::config::{self, EventConfig, Transport};

use super::{Event, EventSink, TransportError};

/// Filters events against the watch patterns and runs every transport for
/// the ones that match.
///
/// An empty watch list never dispatches anything.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    watch: RegexSet,
    transports: Vec<Transport>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(watch: RegexSet, transports: Vec<Transport>, timeout: Duration) -> Self {
        Self {
            watch,
            transports,
            timeout,
        }
    }

    pub fn from_config(config: &EventConfig) -> config::Result<Self> {
        Ok(Self::new(
            config.watch_set()?,
            config.transports.clone(),
            config.transport_timeout(),
        ))
    }

    /// Returns whether `target` matches at least one watch pattern.
    pub fn is_watched(&self, target: &str) -> bool {
        self.watch.is_match(target)
    }

    /// Runs one transport for `event` and returns its standard output.
    pub async fn run_transport(
        &self,
        transport: &Transport,
        event: &Event,
    ) -> Result<String, TransportError> {
        let child = tokio::process::Command::new(&transport.path)
            .args(event.transport_args())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(output) => output.map_err(|source| TransportError::Spawn {
                name: transport.name.clone(),
                path: transport.path.clone(),
                source,
            })?,
            Err(_) => {
                return Err(TransportError::Timeout {
                    name: transport.name.clone(),
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(TransportError::Exit {
                name: transport.name.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl EventSink for Dispatcher {
    async fn dispatch(&self, event: &Event) {
        if !self.is_watched(&event.target) {
            log::debug!("event not watched, dropping: {event}");
            return;
        }

        log::info!("dispatching event: {event}");
        for transport in &self.transports {
            match self.run_transport(transport, event).await {
                Ok(out) => log::debug!("transport `{}` output: {}", transport.name, out.trim()),
                Err(err) => log::error!("{err}"),
            }
        }
    }
}

//! Container lifecycle events and their delivery to external transports.

use std::fmt;

mod dispatcher;
mod error;

pub use dispatcher::Dispatcher;
pub use error::TransportError;

use crate::container::ContainerID;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Notice,
    Warning,
    Critical,
}

impl Severity {
    /// Numeric rendering passed to transports.
    pub fn as_number(self) -> u8 {
        match self {
            Severity::Notice => 1,
            Severity::Warning => 2,
            Severity::Critical => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_number())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Created,
    Started,
    Stopped,
    Removed,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Created => "created",
            EventType::Started => "started",
            EventType::Stopped => "stopped",
            EventType::Removed => "removed",
        }
    }

    /// The severity a lifecycle transition is reported with.
    pub fn severity(self) -> Severity {
        match self {
            EventType::Stopped => Severity::Critical,
            EventType::Created | EventType::Started | EventType::Removed => Severity::Notice,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle transition observed on a probe. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub severity: Severity,
    pub kind: EventType,
    pub target: String,
    pub probe: String,
    pub data: String,
}

impl Event {
    /// Builds a lifecycle event for container `id` running as `hostname` on `probe`.
    pub fn lifecycle(
        kind: EventType,
        probe: &str,
        hostname: &str,
        id: &ContainerID,
        data: impl Into<String>,
    ) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            target: format!("{hostname} ({id})"),
            probe: probe.to_owned(),
            data: data.into(),
        }
    }

    /// Positional arguments handed to a transport executable.
    pub fn transport_args(&self) -> [String; 5] {
        [
            self.severity.to_string(),
            self.kind.to_string(),
            self.target.clone(),
            self.probe.clone(),
            self.data.clone(),
        ]
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} on probe {} (severity={})",
            self.target, self.kind, self.probe, self.severity
        )
    }
}

/// Receives the events produced by reconciliation.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: &Event) -> impl std::future::Future<Output = ()> + Send;
}

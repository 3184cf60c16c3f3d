//! Polling of remote probes over HTTP.

mod client;
mod error;
mod poller;

pub use client::ProbeClient;
pub use error::{Error, Result};
pub use poller::Poller;

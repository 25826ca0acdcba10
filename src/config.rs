//! Client configuration parameters
//!
//! All tunable parameters for the punchcard client.
//! Values can be overridden from a JSON file; missing fields keep their
//! defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::subscription::Backpressure;

/// Core client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    // --- Addressing ---
    /// Remote REP endpoint, `tcp://host:port`
    pub endpoint: String,

    // --- Timing ---
    /// Delay between the end of one poll and the start of the next (milliseconds)
    pub poll_interval_ms: u32,
    /// Maximum wait for a reply before the request fails (milliseconds)
    pub reply_timeout_ms: u32,
    /// Maximum wait for the TCP connection to establish (milliseconds)
    pub connect_timeout_ms: u32,
    /// Socket read tick; bounds how long shutdown takes to be observed (milliseconds)
    pub io_tick_ms: u32,

    // --- Recovery ---
    /// Re-establish a desynchronised channel before the next request
    pub reconnect: bool,

    // --- Delivery ---
    /// What a subscription does when its consumer falls behind
    pub backpressure: Backpressure,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://127.0.0.1:1234".to_owned(),

            poll_interval_ms: 1000, // 1 Hz
            reply_timeout_ms: 5000,
            connect_timeout_ms: 2000,
            io_tick_ms: 50,

            reconnect: true,

            backpressure: Backpressure::Unbounded,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(format!("invalid JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn endpoint(&self) -> Result<Endpoint> {
        self.endpoint.parse()
    }

    /// Reject values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.endpoint()?;
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.io_tick_ms == 0 || self.io_tick_ms > self.reply_timeout_ms {
            return Err(Error::Config(
                "io_tick_ms must be positive and not exceed reply_timeout_ms".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(Error::Config("connect_timeout_ms must be positive".into()));
        }
        if self.backpressure == (Backpressure::DropOldest { depth: 0 }) {
            return Err(Error::Config("drop_oldest depth must be positive".into()));
        }
        Ok(())
    }
}

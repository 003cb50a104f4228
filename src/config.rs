//! Client configuration parsed from environment variables.
//!
//! Every knob has a default; unset or unparsable variables fall back to it.
//!
//! - `TABWIRE_HEARTBEAT_SECS`: heartbeat interval, default 15
//! - `TABWIRE_MAX_MESSAGE_BYTES`: websocket message/frame size limit, default 1 GiB
//! - `TABWIRE_OUTBOUND_CAPACITY`: queued outbound frame batches, default 256
//! - `TABWIRE_CLOSE_TIMEOUT_MS`: how long `terminate` waits for the close handshake, default 5000

use std::time::Duration;

use frames::Command;

pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024 * 1024;
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5000;

/// Id of the handshake command sent as soon as the connection opens.
pub const HANDSHAKE_ID: i64 = -1;

/// Name of the handshake command.
pub const HANDSHAKE_CMD: &str = "init";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub heartbeat_interval: Duration,
    pub max_message_bytes: usize,
    pub outbound_capacity: usize,
    pub close_timeout: Duration,
    pub handshake: Command,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            close_timeout: Duration::from_millis(DEFAULT_CLOSE_TIMEOUT_MS),
            handshake: Command::new(HANDSHAKE_ID, HANDSHAKE_CMD),
        }
    }
}

impl ClientConfig {
    /// Build config from `TABWIRE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let heartbeat_secs = env_parse("TABWIRE_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS);
        let close_timeout_ms = env_parse("TABWIRE_CLOSE_TIMEOUT_MS", DEFAULT_CLOSE_TIMEOUT_MS);

        Self {
            heartbeat_interval: Duration::from_secs(heartbeat_secs.max(1)),
            max_message_bytes: env_parse("TABWIRE_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES),
            outbound_capacity: env_parse("TABWIRE_OUTBOUND_CAPACITY", DEFAULT_OUTBOUND_CAPACITY).max(1),
            close_timeout: Duration::from_millis(close_timeout_ms),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_handshake(mut self, handshake: Command) -> Self {
        self.handshake = handshake;
        self
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

//! Client configuration with environment variable overrides.
//!
//! Override rules match the settings loader convention: integers must be
//! valid and within range, empty strings are ignored, and invalid values
//! fall back to the default with a warning.

use std::time::Duration;

/// Configuration for a [`crate::GatewayClient`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Gateway WebSocket endpoint.
    pub endpoint: String,
    /// Optional bearer token attached to the connect request.
    pub token: Option<String>,
    /// Default deadline for [`crate::GatewayClient::call`].
    pub call_timeout: Duration,
    /// Deadline for the connect-time handshake call.
    pub handshake_timeout: Duration,
    /// Capacity of each subscription queue.
    pub queue_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:4700/gateway".to_owned(),
            token: None,
            call_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(10),
            queue_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Defaults with `GANTRY_*` environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_string("GANTRY_GATEWAY_URL") {
            self.endpoint = v;
        }
        if let Some(v) = read_env_string("GANTRY_GATEWAY_TOKEN") {
            self.token = Some(v);
        }
        if let Some(v) = read_env_u64("GANTRY_CALL_TIMEOUT_MS", 1, 600_000) {
            self.call_timeout = Duration::from_millis(v);
        }
        if let Some(v) = read_env_u64("GANTRY_HANDSHAKE_TIMEOUT_MS", 1, 600_000) {
            self.handshake_timeout = Duration::from_millis(v);
        }
        if let Some(v) = read_env_usize("GANTRY_QUEUE_CAPACITY", 1, 65_536) {
            self.queue_capacity = v;
        }
    }
}

// ── Strict parsers ──────────────────────────────────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

fn read_env_usize(name: &str, min: usize, max: usize) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let result = parse_usize_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
    }
    result
}

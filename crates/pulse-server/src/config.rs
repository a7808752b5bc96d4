//! Server configuration.
//!
//! Defaults first, then `PULSE_*` environment overrides. Each override has
//! strict parsing rules; invalid values are silently ignored (fall back to
//! the default).

use serde::{Deserialize, Serialize};

/// Fallback HMAC secret for token verification.
///
/// Only acceptable for local development; deployments set
/// `PULSE_JWT_SECRET`.
pub const DEFAULT_JWT_SECRET: &str = "your-jwt-secret";

/// Configuration for the broadcast server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `3001`, `0` for auto-assign).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Transport heartbeat ping interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Close after this long without a pong.
    pub heartbeat_timeout_secs: u64,
    /// Capacity of each connection's outbound send queue.
    pub send_queue_capacity: usize,
    /// Metrics stream interval applied when a request omits one (ms).
    pub metrics_default_interval_ms: u64,
    /// Metrics stream interval floor (ms); requests below it are clamped.
    pub metrics_min_interval_ms: u64,
    /// How long shutdown waits for open connections to drain (seconds).
    pub shutdown_grace_secs: u64,
    /// HMAC secret for bearer-token verification.
    pub jwt_secret: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3001,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            send_queue_capacity: 256,
            metrics_default_interval_ms: 5000,
            metrics_min_interval_ms: 1000,
            shutdown_grace_secs: 30,
            jwt_secret: DEFAULT_JWT_SECRET.into(),
        }
    }
}

impl ServerConfig {
    /// Defaults with `PULSE_*` environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = read_env_string("PULSE_HOST") {
            self.host = v;
        }
        if let Some(v) = read_env_u16("PULSE_PORT") {
            self.port = v;
        }
        if let Some(v) = read_env_u64("PULSE_MAX_CONNECTIONS", 1, 1_000_000) {
            self.max_connections = usize::try_from(v).unwrap_or(usize::MAX);
        }
        if let Some(v) = read_env_u64("PULSE_HEARTBEAT_INTERVAL_SECS", 1, 3600) {
            self.heartbeat_interval_secs = v;
        }
        if let Some(v) = read_env_u64("PULSE_HEARTBEAT_TIMEOUT_SECS", 1, 86_400) {
            self.heartbeat_timeout_secs = v;
        }
        if let Some(v) = read_env_u64("PULSE_SEND_QUEUE_CAPACITY", 1, 65_536) {
            self.send_queue_capacity = usize::try_from(v).unwrap_or(usize::MAX);
        }
        if let Some(v) = read_env_u64("PULSE_METRICS_DEFAULT_INTERVAL_MS", 1000, 3_600_000) {
            self.metrics_default_interval_ms = v;
        }
        if let Some(v) = read_env_u64("PULSE_METRICS_MIN_INTERVAL_MS", 1000, 3_600_000) {
            self.metrics_min_interval_ms = v;
        }
        if let Some(v) = read_env_u64("PULSE_SHUTDOWN_GRACE_SECS", 1, 3600) {
            self.shutdown_grace_secs = v;
        }
        if let Some(v) = read_env_string("PULSE_JWT_SECRET") {
            self.jwt_secret = v;
        }
    }

    /// Whether the verification secret is still the development fallback.
    #[must_use]
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|v| parse_u16(&v))
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_u64_in_range(&v, min, max))
}

fn parse_u16(value: &str) -> Option<u16> {
    value.trim().parse().ok()
}

fn parse_u64_in_range(value: &str, min: u64, max: u64) -> Option<u64> {
    value
        .trim()
        .parse()
        .ok()
        .filter(|v| (min..=max).contains(v))
}

// ============================================================================
// mailsink-config - Centralized configuration management
// ============================================================================
//
// Loads service configuration from environment variables. Required store
// endpoints abort startup when missing; everything else has a sensible
// default.
//
// ============================================================================

mod constants;

pub use constants::{
    DEFAULT_MAX_DATA_STREAMS, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_PROBE_INTERVAL_SECS,
    DEFAULT_PROCESS_CONCURRENCY, DEFAULT_SHUTDOWN_DRAIN_SECS, DEFAULT_SMTP_BIND,
    DEFAULT_SMTP_PORT,
};

use mailsink_error::{IngestError, IngestResult};

/// SMTP listener configuration
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub bind_address: String,
    pub port: u16,
    /// Messages larger than this are rejected during the DATA phase.
    pub max_message_bytes: usize,
}

impl SmtpConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Admission and concurrency limits
#[derive(Clone, Debug)]
pub struct LimitsConfig {
    /// Hard ceiling on simultaneously accepted DATA streams.
    pub max_data_streams: usize,
    /// Concurrency cap on parse/persist work.
    pub process_concurrency: usize,
}

/// Main configuration structure for the mailsink service
#[derive(Clone, Debug)]
pub struct Config {
    /// Primary store endpoint (private mailboxes, message records, domain
    /// allow-list). Required.
    pub redis_url: String,
    /// Secondary store endpoint (ephemeral inbox provisioning). Required.
    pub database_url: String,

    pub smtp: SmtpConfig,
    pub limits: LimitsConfig,

    /// Liveness beacon endpoint; unset disables the beacon entirely.
    pub beacon_url: Option<String>,

    pub probe_interval_secs: u64,
    pub shutdown_drain_secs: u64,

    pub rust_log: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Missing store endpoints are a fatal startup error, not a retryable
    /// condition.
    pub fn from_env() -> IngestResult<Self> {
        dotenvy::dotenv().ok();

        let redis_url = require("REDIS_URL")?;
        let database_url = require("DATABASE_URL")?;

        Ok(Self {
            redis_url,
            database_url,
            smtp: SmtpConfig {
                bind_address: std::env::var("SMTP_BIND")
                    .unwrap_or_else(|_| DEFAULT_SMTP_BIND.to_string()),
                port: parse_or("SMTP_PORT", DEFAULT_SMTP_PORT),
                max_message_bytes: parse_or("MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES),
            },
            limits: LimitsConfig {
                max_data_streams: parse_or("MAX_DATA_STREAMS", DEFAULT_MAX_DATA_STREAMS),
                process_concurrency: parse_or("PROCESS_CONCURRENCY", DEFAULT_PROCESS_CONCURRENCY),
            },
            beacon_url: std::env::var("BEACON_URL").ok().filter(|url| !url.is_empty()),
            probe_interval_secs: parse_or("PROBE_INTERVAL_SECS", DEFAULT_PROBE_INTERVAL_SECS),
            shutdown_drain_secs: parse_or("SHUTDOWN_DRAIN_SECS", DEFAULT_SHUTDOWN_DRAIN_SECS),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require(name: &str) -> IngestResult<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| IngestError::config(format!("{} is required", name)))
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_joins_bind_and_port() {
        let smtp = SmtpConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 2525,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        };
        assert_eq!(smtp.listen_addr(), "127.0.0.1:2525");
    }

    #[test]
    fn missing_required_var_is_a_config_error() {
        // Variable name chosen to never exist in a real environment.
        let err = require("MAILSINK_TEST_NO_SUCH_VAR").unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }
}

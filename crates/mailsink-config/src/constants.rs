//! Default values for optional configuration.

/// Default SMTP listen port.
pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Default SMTP bind address.
pub const DEFAULT_SMTP_BIND: &str = "0.0.0.0";

/// Hard ceiling on concurrently accepted DATA streams. Excess senders get a
/// transient rejection and are expected to retry.
pub const DEFAULT_MAX_DATA_STREAMS: usize = 256;

/// Cap on messages being parsed/persisted at once. Accepted tasks above the
/// cap queue in arrival order.
pub const DEFAULT_PROCESS_CONCURRENCY: usize = 32;

/// Maximum accepted message size in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Interval between background liveness probes of the primary store.
pub const DEFAULT_PROBE_INTERVAL_SECS: u64 = 30;

/// How long a graceful shutdown waits for in-flight work to drain.
pub const DEFAULT_SHUTDOWN_DRAIN_SECS: u64 = 30;

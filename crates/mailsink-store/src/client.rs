//! Store client with explicit connection management
//!
//! The primary store is reached through a single multiplexed connection.
//! The client starts disconnected and connects on first use; a failed
//! liveness probe or a connection-classified command error drops the handle
//! so the next call re-establishes it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::RedisError;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::Result;

const INITIAL_BACKOFF_MS: u64 = 200;
const MAX_BACKOFF_MS: u64 = 5_000;

/// True for errors that indicate the connection itself is unusable, as
/// opposed to errors the server returned for a well-delivered command.
pub fn is_connection_error(err: &RedisError) -> bool {
    err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
}

fn backoff_ms(failures: u32) -> u64 {
    INITIAL_BACKOFF_MS
        .saturating_mul(2_u64.saturating_pow(failures.saturating_sub(1)))
        .min(MAX_BACKOFF_MS)
}

/// Resilient handle to the primary store.
///
/// One instance is constructed at startup and shared (`Arc`) by every call
/// site. Internal state is a mutex over the optional live connection:
/// `None` means disconnected, and holding the mutex across a connection
/// attempt gives `connect` single-flight semantics: concurrent callers
/// await the in-flight attempt instead of issuing their own.
pub struct StoreClient {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    failed_attempts: AtomicU32,
}

impl StoreClient {
    /// Create a disconnected client. Fails only on an invalid URL; the
    /// first connection attempt happens on first use.
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            failed_attempts: AtomicU32::new(0),
        })
    }

    /// Get the live connection, establishing it if necessary.
    ///
    /// Consecutive failed attempts back off exponentially (capped); the
    /// delay runs while the state mutex is held, so callers arriving during
    /// the backoff window wait for the same attempt.
    pub async fn connect(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let failures = self.failed_attempts.load(Ordering::Relaxed);
        if failures > 0 {
            let delay = backoff_ms(failures);
            debug!(failures, delay_ms = delay, "delaying store reconnect attempt");
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                self.failed_attempts.store(0, Ordering::Relaxed);
                info!("connected to primary store");
                *guard = Some(conn.clone());
                Ok(conn)
            }
            Err(err) => {
                self.failed_attempts.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "primary store connection attempt failed");
                Err(err)
            }
        }
    }

    /// Whether the client currently believes it holds a live connection.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    async fn mark_disconnected(&self) {
        *self.conn.lock().await = None;
    }

    /// Liveness probe. A failed probe drops the handle so the next command
    /// reconnects; the caller decides whether the failure is worth escalating.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connect().await?;
        let outcome: Result<()> = redis::cmd("PING").query_async(&mut conn).await;
        if let Err(ref err) = outcome {
            if is_connection_error(err) {
                self.mark_disconnected().await;
            }
        }
        outcome
    }

    /// Run a command against the live connection.
    ///
    /// If the command fails with a connection-classified error the client
    /// reconnects and retries exactly once; any other error, and any error
    /// from the retry, is surfaced as-is.
    pub async fn execute<T, F>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: for<'a> FnMut(
            &'a mut MultiplexedConnection,
        )
            -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>,
    {
        let mut conn = self.connect().await?;
        match f(&mut conn).await {
            Ok(value) => Ok(value),
            Err(err) if is_connection_error(&err) => {
                warn!(
                    operation,
                    error = %err,
                    "store operation hit a connection error, reconnecting"
                );
                self.mark_disconnected().await;
                let mut conn = self.connect().await?;
                let retried = f(&mut conn).await;
                if retried.is_ok() {
                    info!(operation, "store operation succeeded after reconnect");
                }
                retried
            }
            Err(err) => Err(err),
        }
    }

    /// Open a dedicated subscription connection for `channel`.
    ///
    /// Pub/sub cannot share the multiplexed command connection. A returned
    /// `Ok` means the subscription is active on the server.
    pub async fn subscribe(&self, channel: &str) -> Result<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(pubsub)
    }

    /// Background liveness probe at a fixed interval, independent of
    /// traffic. Failures are logged, not escalated; the next command
    /// self-heals through `execute`.
    pub fn spawn_probe(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let client = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; consume it so probing
            // starts one interval in and the first real query stays lazy.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match client.ping().await {
                    Ok(()) => debug!("primary store liveness probe ok"),
                    Err(err) => warn!(error = %err, "primary store liveness probe failed"),
                }
            }
        })
    }
}

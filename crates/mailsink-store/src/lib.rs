//! # mailsink-store
//!
//! Low-level client for the mailsink primary store (Redis).
//!
//! ## Design Principles
//!
//! - **No business logic** - Pure infrastructure layer
//! - **No dependencies** on other mailsink-* crates
//! - **Self-healing** - Lazy connect, liveness probing, reconnect with
//!   backoff, retry-once on connection-classified errors
//!
//! The service holds exactly one [`StoreClient`] and injects it into every
//! call site; all primary-store traffic goes through it.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mailsink_store::StoreClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = StoreClient::new("redis://localhost:6379")?;
//!
//!     let members: Vec<String> = store
//!         .execute("smembers", |conn| {
//!             Box::pin(async move {
//!                 redis::cmd("SMEMBERS")
//!                     .arg("domains:allowed")
//!                     .query_async(conn)
//!                     .await
//!             })
//!         })
//!         .await?;
//!
//!     println!("{} domains", members.len());
//!     Ok(())
//! }
//! ```

mod client;

pub use client::{is_connection_error, StoreClient};

// Re-export commonly used types
pub use redis::RedisError;

/// Result type for store operations
pub type Result<T> = std::result::Result<T, RedisError>;

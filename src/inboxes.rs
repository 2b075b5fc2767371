//! Ephemeral inbox provisioning against the secondary store.
//!
//! The secondary store is PostgreSQL behind a connection pool; the pool's
//! own health checking is the only resilience layer here. The unique
//! constraint on `email_address` is the enforcement point for concurrent
//! first-contact provisioning.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use tracing::{debug, info};
use uuid::Uuid;

use mailsink_error::{IngestError, IngestResult};

pub type DbPool = Pool<Postgres>;

const MAX_CONNECTIONS: u32 = 16;
const ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Create the secondary store connection pool.
pub async fn create_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .acquire_timeout(Duration::from_secs(ACQUIRE_TIMEOUT_SECS))
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .context("failed to connect to secondary store")?;
    Ok(pool)
}

/// An auto-provisioned, disposable mailbox created on first contact.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EphemeralInbox {
    pub id: Uuid,
    pub email_address: String,
    pub created_at: DateTime<Utc>,
}

/// Client handle for ephemeral inbox rows.
#[derive(Clone)]
pub struct InboxStore {
    pool: PgPool,
}

impl InboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up an inbox by address.
    pub async fn find(&self, email: &str) -> IngestResult<Option<EphemeralInbox>> {
        let inbox = sqlx::query_as::<_, EphemeralInbox>(
            r#"
            SELECT id, email_address, created_at
            FROM inboxes
            WHERE email_address = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inbox)
    }

    /// Resolve the inbox for `email`, creating it on first contact.
    ///
    /// Two concurrent first contacts race on the unique constraint; the
    /// loser re-queries and adopts the winner's identity, so callers always
    /// observe a single inbox per address.
    pub async fn get_or_create(&self, email: &str) -> IngestResult<EphemeralInbox> {
        if let Some(inbox) = self.find(email).await? {
            return Ok(inbox);
        }

        let inserted = sqlx::query_as::<_, EphemeralInbox>(
            r#"
            INSERT INTO inboxes (email_address)
            VALUES ($1)
            RETURNING id, email_address, created_at
            "#,
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(inbox) => {
                info!(email = %email, inbox_id = %inbox.id, "provisioned ephemeral inbox");
                Ok(inbox)
            }
            Err(err) if is_unique_violation(&err) => {
                debug!(email = %email, "inbox insert lost a provisioning race, re-fetching");
                self.find(email)
                    .await?
                    .ok_or(IngestError::Provisioning(err))
            }
            Err(err) => Err(err.into()),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

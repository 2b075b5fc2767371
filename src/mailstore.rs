//! Mailbox, message, and domain operations on the primary store.
//!
//! Key layout:
//! - `domains:allowed` - set of allowed recipient domains
//! - `domains:events` - pub/sub channel carrying domain change events
//! - `mailbox:{email}` - private mailbox record (hash)
//! - `mailbox:{email}:messages` - message ids owned by a private mailbox
//! - `message:{id}` - one stored message (hash)
//! - `inbox:{id}:messages` - message ids owned by an ephemeral inbox
//!
//! Every operation goes through the shared [`StoreClient`], which handles
//! reconnection and the single retry on connection errors. Timestamps come
//! from the store server (`TIME`), not the service clock.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use mailsink_store::{Result, StoreClient};

const DOMAINS_KEY: &str = "domains:allowed";
const DOMAIN_EVENTS_CHANNEL: &str = "domains:events";

fn mailbox_key(email: &str) -> String {
    format!("mailbox:{}", email)
}

fn mailbox_messages_key(email: &str) -> String {
    format!("mailbox:{}:messages", email)
}

fn message_key(id: &str) -> String {
    format!("message:{}", id)
}

fn inbox_messages_key(inbox_id: &Uuid) -> String {
    format!("inbox:{}:messages", inbox_id)
}

/// Operation tag on a domain change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainOp {
    Insert,
    Update,
    Delete,
}

/// One incremental change to the allowed-domain set.
///
/// `previous` carries the before-value on updates so a renamed domain can
/// be evicted; inserts and deletes leave it unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub op: DomainOp,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

/// A provisioned private mailbox with a known owner.
#[derive(Debug, Clone)]
pub struct PrivateMailbox {
    pub email: String,
    /// Unix seconds, store server time.
    pub last_updated_at: i64,
}

/// Fields of a message about to be stored. Absent subject/content/html are
/// empty strings, never a null-like marker.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub content: String,
    pub html: String,
}

/// The one owning mailbox reference of a message record.
#[derive(Debug, Clone)]
pub enum MessageOwner {
    Private { email: String },
    Ephemeral { inbox_id: Uuid },
}

/// Primary-store operations used by the ingestion pipeline.
pub struct Mailstore {
    client: Arc<StoreClient>,
}

impl Mailstore {
    pub fn new(client: Arc<StoreClient>) -> Self {
        Self { client }
    }

    /// Full scan of the allowed-domain set.
    pub async fn load_domains(&self) -> Result<Vec<String>> {
        self.client
            .execute("load_domains", |conn| {
                Box::pin(async move {
                    redis::cmd("SMEMBERS").arg(DOMAINS_KEY).query_async(conn).await
                })
            })
            .await
    }

    /// Store server time in unix seconds.
    pub async fn server_time(&self) -> Result<i64> {
        let (secs, _micros): (i64, i64) = self
            .client
            .execute("server_time", |conn| {
                Box::pin(async move { redis::cmd("TIME").query_async(conn).await })
            })
            .await?;
        Ok(secs)
    }

    /// Look up a private mailbox by exact address. `None` routes the
    /// recipient to the ephemeral path.
    pub async fn find_private_mailbox(&self, email: &str) -> Result<Option<PrivateMailbox>> {
        let key = mailbox_key(email);
        let fields: HashMap<String, String> = self
            .client
            .execute("find_private_mailbox", |conn| {
                let key = key.clone();
                Box::pin(async move { redis::cmd("HGETALL").arg(&key).query_async(conn).await })
            })
            .await?;

        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(PrivateMailbox {
            email: fields
                .get("email")
                .cloned()
                .unwrap_or_else(|| email.to_string()),
            last_updated_at: fields
                .get("last_updated_at")
                .and_then(|value| value.parse().ok())
                .unwrap_or(0),
        }))
    }

    /// Refresh a private mailbox's `last_updated_at` to store server time.
    pub async fn touch_private_mailbox(&self, email: &str) -> Result<()> {
        let now = self.server_time().await?;
        let key = mailbox_key(email);
        self.client
            .execute("touch_private_mailbox", |conn| {
                let key = key.clone();
                Box::pin(async move {
                    let _: () = redis::cmd("HSET")
                        .arg(&key)
                        .arg("last_updated_at")
                        .arg(now)
                        .query_async(conn)
                        .await?;
                    Ok(())
                })
            })
            .await
    }

    /// Store one message record and link it to its owning mailbox.
    ///
    /// The record hash and the ownership link are written in one MULTI/EXEC
    /// pipeline so a record can never exist unlinked. Returns the message id.
    pub async fn insert_message(
        &self,
        message: &NewMessage,
        owner: &MessageOwner,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let created_at = self.server_time().await?.to_string();
        let key = message_key(&id);
        let (owner_field, owner_value, link_key) = match owner {
            MessageOwner::Private { email } => {
                ("mailbox_email", email.clone(), mailbox_messages_key(email))
            }
            MessageOwner::Ephemeral { inbox_id } => {
                ("inbox_id", inbox_id.to_string(), inbox_messages_key(inbox_id))
            }
        };

        self.client
            .execute("insert_message", |conn| {
                let id = id.clone();
                let key = key.clone();
                let link_key = link_key.clone();
                let created_at = created_at.clone();
                let owner_value = owner_value.clone();
                let msg = message.clone();
                Box::pin(async move {
                    let mut pipe = redis::pipe();
                    pipe.atomic();
                    pipe.cmd("HSET")
                        .arg(&key)
                        .arg("to")
                        .arg(msg.to.as_str())
                        .arg("from")
                        .arg(msg.from.as_str())
                        .arg("subject")
                        .arg(msg.subject.as_str())
                        .arg("content")
                        .arg(msg.content.as_str())
                        .arg("html")
                        .arg(msg.html.as_str())
                        .arg("created_at")
                        .arg(created_at.as_str())
                        .arg(owner_field)
                        .arg(owner_value.as_str())
                        .ignore();
                    pipe.cmd("RPUSH").arg(&link_key).arg(&id).ignore();
                    let _: () = pipe.query_async(conn).await?;
                    Ok(())
                })
            })
            .await?;

        Ok(id)
    }

    /// Subscribe to domain change events.
    ///
    /// The returned stream yields decoded events; malformed payloads are
    /// logged and skipped. A successful return means the subscription is
    /// active on the server.
    pub async fn domain_events(&self) -> Result<impl Stream<Item = DomainEvent>> {
        let pubsub = self.client.subscribe(DOMAIN_EVENTS_CHANNEL).await?;
        Ok(pubsub.into_on_message().filter_map(|msg| async move {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(error = %err, "unreadable domain event payload");
                    return None;
                }
            };
            match serde_json::from_str::<DomainEvent>(&payload) {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(error = %err, payload = %payload, "malformed domain event");
                    None
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_events_decode_from_json() {
        let event: DomainEvent =
            serde_json::from_str(r#"{"op":"insert","domain":"Example.com"}"#).unwrap();
        assert_eq!(event.op, DomainOp::Insert);
        assert_eq!(event.domain, "Example.com");
        assert_eq!(event.previous, None);

        let event: DomainEvent = serde_json::from_str(
            r#"{"op":"update","domain":"new.org","previous":"old.org"}"#,
        )
        .unwrap();
        assert_eq!(event.op, DomainOp::Update);
        assert_eq!(event.previous.as_deref(), Some("old.org"));
    }

    #[test]
    fn key_layout_is_stable() {
        assert_eq!(mailbox_key("a@b.com"), "mailbox:a@b.com");
        assert_eq!(mailbox_messages_key("a@b.com"), "mailbox:a@b.com:messages");
        let id = Uuid::nil();
        assert_eq!(
            inbox_messages_key(&id),
            format!("inbox:{}:messages", Uuid::nil())
        );
    }
}

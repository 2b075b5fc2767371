//! # mailsink
//!
//! Receive-only SMTP ingestion service.
//!
//! Inbound sessions are filtered against a live-synchronized recipient-domain
//! allow-list; accepted messages are parsed and routed either to a
//! provisioned private mailbox in the primary store or to an ephemeral inbox
//! provisioned on first contact in the secondary store.
//!
//! Module map:
//! - [`whitelist`] - in-memory domain allow-list, kept current by a
//!   change-event subscription
//! - [`mailstore`] - mailbox, message, and domain operations on the primary
//!   store
//! - [`inboxes`] - ephemeral inbox provisioning against the secondary store
//! - [`ingest`] - admission limits and the routing engine
//! - [`smtp`] - protocol session loop and its hook contract
//! - [`parser`] - raw message to structured fields
//! - [`beacon`] - best-effort liveness ping after successful processing

pub mod beacon;
pub mod inboxes;
pub mod ingest;
pub mod mailstore;
pub mod parser;
pub mod smtp;
pub mod whitelist;

pub use mailsink_config::Config;
pub use mailsink_error::{IngestError, IngestResult};
pub use mailsink_store::StoreClient;

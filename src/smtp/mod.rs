//! Protocol-session layer.
//!
//! The session loop speaks just enough SMTP to receive mail (HELO/EHLO,
//! MAIL, RCPT, DATA, RSET, NOOP, QUIT) and delegates every decision to a
//! [`SessionHooks`] implementation. Rejections are first-class return
//! values, never exceptions: permanent denials reply 5xx, transient ones
//! (capacity, shutdown) reply 4xx so the sender retries later.

pub mod session;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use mailsink_error::IngestResult;

use crate::ingest::limits::DataSlot;

/// Envelope state accumulated over one mail transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipients: Vec<String>,
}

/// Admission decision for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RcptDecision {
    Accept,
    /// 550 - the sender should not retry.
    DeniedPermanent,
    /// 450 - the sender is expected to retry later.
    DeniedTemporary,
}

/// Service-side contract of the protocol session.
#[async_trait]
pub trait SessionHooks: Send + Sync + 'static {
    /// Admission decision for one recipient, made at RCPT time.
    async fn recipient(&self, address: &str) -> RcptDecision;

    /// Claim a slot for an inbound DATA stream. `CapacityExceeded` maps to
    /// a transient rejection at the protocol layer.
    fn begin_data(&self) -> IngestResult<DataSlot>;

    /// Hand over a fully received message. Must not block the session on
    /// parse/persist work; once this returns, the sender gets its 250.
    async fn message(&self, slot: DataSlot, envelope: Envelope, raw: Vec<u8>);
}

/// Accept loop. Each connection runs as its own task; a shutdown signal
/// stops accepting while established sessions run on.
pub async fn serve<H: SessionHooks>(
    listener: TcpListener,
    hooks: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
    max_message_bytes: usize,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                debug!(peer = %peer, "smtp connection accepted");
                let hooks = Arc::clone(&hooks);
                tokio::spawn(async move {
                    let session = session::Session::new(hooks, max_message_bytes);
                    if let Err(err) = session.run(socket).await {
                        debug!(peer = %peer, error = %err, "smtp session ended with error");
                    }
                });
            }
            _ = shutdown.changed() => {
                info!("smtp listener stopped accepting connections");
                return Ok(());
            }
        }
    }
}

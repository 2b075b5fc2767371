//! Routing engine.
//!
//! One call per accepted recipient of a fully received message: re-check
//! admission, resolve the owning mailbox (private record in the primary
//! store, or ephemeral inbox provisioned in the secondary store), persist
//! the message record against that owner, then fire the liveness beacon.

use std::sync::Arc;

use tracing::{debug, info, warn};

use mailsink_error::{IngestError, IngestResult};

use crate::beacon::Beacon;
use crate::inboxes::InboxStore;
use crate::mailstore::{Mailstore, MessageOwner, NewMessage};
use crate::whitelist::DomainWhitelist;

/// A parsed message bound to a single recipient.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

pub struct Router {
    whitelist: Arc<DomainWhitelist>,
    mailstore: Arc<Mailstore>,
    inboxes: InboxStore,
    beacon: Beacon,
}

impl Router {
    pub fn new(
        whitelist: Arc<DomainWhitelist>,
        mailstore: Arc<Mailstore>,
        inboxes: InboxStore,
        beacon: Beacon,
    ) -> Self {
        Self {
            whitelist,
            mailstore,
            inboxes,
            beacon,
        }
    }

    /// Route and persist one message.
    ///
    /// `AdmissionDenied` is a silent drop (already accepted at the protocol
    /// layer, so nothing surfaces to the sender); `Query` and
    /// `Provisioning` errors mean the message was not stored.
    pub async fn process(&self, message: InboundMessage) -> IngestResult<()> {
        let recipient = message.to.trim().to_ascii_lowercase();
        if recipient.is_empty() {
            debug!("message without recipient dropped");
            return Err(IngestError::AdmissionDenied("<missing recipient>".into()));
        }

        // Protocol-time admission may be stale by now; re-check before
        // touching the stores.
        if !self.whitelist.is_allowed(&recipient).await {
            info!(recipient = %recipient, "recipient no longer admitted, dropping message");
            return Err(IngestError::AdmissionDenied(recipient));
        }

        let record = NewMessage {
            to: recipient.clone(),
            from: message.from,
            subject: message.subject,
            content: message.text,
            html: message.html,
        };

        match self.mailstore.find_private_mailbox(&recipient).await {
            Ok(Some(_)) => {
                let message_id = self
                    .mailstore
                    .insert_message(&record, &MessageOwner::Private {
                        email: recipient.clone(),
                    })
                    .await?;
                info!(
                    recipient = %recipient,
                    message_id = %message_id,
                    "stored message for private mailbox"
                );
                // Freshness bookkeeping is best-effort; the message is
                // already persisted.
                if let Err(err) = self.mailstore.touch_private_mailbox(&recipient).await {
                    warn!(recipient = %recipient, error = %err, "private mailbox touch failed");
                }
                self.beacon.fire();
                return Ok(());
            }
            Ok(None) => {}
            Err(err) => {
                // Private-path unavailability must not drop mail the
                // ephemeral path can still capture.
                warn!(
                    recipient = %recipient,
                    error = %err,
                    "private mailbox lookup failed, falling back to ephemeral path"
                );
            }
        }

        let inbox = self.inboxes.get_or_create(&recipient).await?;
        let message_id = self
            .mailstore
            .insert_message(&record, &MessageOwner::Ephemeral { inbox_id: inbox.id })
            .await?;
        info!(
            recipient = %recipient,
            inbox_id = %inbox.id,
            message_id = %message_id,
            "stored message for ephemeral inbox"
        );
        self.beacon.fire();
        Ok(())
    }
}

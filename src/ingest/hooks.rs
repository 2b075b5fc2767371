//! Production wiring of the protocol hooks onto the ingestion pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use mailsink_error::{IngestError, IngestResult};

use crate::ingest::limits::{DataSlot, IngestLimits};
use crate::ingest::router::{InboundMessage, Router};
use crate::parser;
use crate::smtp::{Envelope, RcptDecision, SessionHooks};
use crate::whitelist::DomainWhitelist;

pub struct IngestHooks {
    whitelist: Arc<DomainWhitelist>,
    limits: Arc<IngestLimits>,
    router: Arc<Router>,
}

impl IngestHooks {
    pub fn new(
        whitelist: Arc<DomainWhitelist>,
        limits: Arc<IngestLimits>,
        router: Arc<Router>,
    ) -> Self {
        Self {
            whitelist,
            limits,
            router,
        }
    }
}

#[async_trait]
impl SessionHooks for IngestHooks {
    async fn recipient(&self, address: &str) -> RcptDecision {
        if self.whitelist.is_allowed(address).await {
            RcptDecision::Accept
        } else {
            RcptDecision::DeniedPermanent
        }
    }

    fn begin_data(&self) -> IngestResult<DataSlot> {
        self.limits.try_begin_data()
    }

    async fn message(&self, slot: DataSlot, envelope: Envelope, raw: Vec<u8>) {
        let router = Arc::clone(&self.router);
        let limits = Arc::clone(&self.limits);
        // The sender already got its reply; processing continues as an
        // independently scheduled unit under the concurrency cap.
        tokio::spawn(async move {
            let _slot = slot;
            let _permit = limits.acquire_processing().await;

            let parsed = parser::parse_message_blocking(raw).await;
            let Envelope { sender, recipients } = envelope;
            for recipient in recipients {
                let message = InboundMessage {
                    to: recipient,
                    from: sender.clone(),
                    subject: parsed.subject.clone(),
                    text: parsed.text.clone(),
                    html: parsed.html.clone(),
                };
                match router.process(message).await {
                    Ok(()) => {}
                    // Denials are logged inside the router; nothing else to do.
                    Err(IngestError::AdmissionDenied(_)) => {}
                    Err(err) => {
                        error!(error = %err, "message processing failed");
                    }
                }
            }
        });
    }
}

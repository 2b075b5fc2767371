//! Recipient-domain allow-list.
//!
//! The cache is seeded from a full scan of the primary store and kept
//! current by the store's change-event subscription. Admission is
//! fail-closed: until the set is populated, nothing is allowed.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use mailsink_error::IngestResult;

use crate::mailstore::{DomainEvent, DomainOp, Mailstore};

const RESYNC_DELAY: Duration = Duration::from_secs(5);

/// In-memory set of allowed recipient domains.
///
/// Reads happen on every RCPT and again at processing time; writes come from
/// a single event-subscription task. Entries are stored lowercased.
pub struct DomainWhitelist {
    domains: RwLock<HashSet<String>>,
}

impl DomainWhitelist {
    pub fn new() -> Self {
        Self {
            domains: RwLock::new(HashSet::new()),
        }
    }

    /// Whether mail for `address` is admitted.
    ///
    /// The domain after `@` must equal an entry or fall under one as a
    /// sub-domain, case-insensitively. Addresses without `@` are never
    /// allowed, and an empty set admits nothing.
    pub async fn is_allowed(&self, address: &str) -> bool {
        let Some((_, domain)) = address.rsplit_once('@') else {
            return false;
        };
        let domain = domain.to_ascii_lowercase();

        let domains = self.domains.read().await;
        if domains.contains(domain.as_str()) {
            return true;
        }
        // Walk parent labels: "a.b.example.com" matches an entry
        // "example.com" because it ends with ".example.com".
        let mut rest = domain.as_str();
        while let Some((_, parent)) = rest.split_once('.') {
            if domains.contains(parent) {
                return true;
            }
            rest = parent;
        }
        false
    }

    pub async fn len(&self) -> usize {
        self.domains.read().await.len()
    }

    /// Replace the whole set atomically.
    pub async fn replace(&self, domains: HashSet<String>) {
        let mut guard = self.domains.write().await;
        *guard = domains;
    }

    /// Reload the set from a full scan of the primary store. On failure the
    /// current set is left untouched and the error is surfaced for logging.
    pub async fn reload(&self, store: &Mailstore) -> IngestResult<()> {
        let fresh: HashSet<String> = store
            .load_domains()
            .await?
            .into_iter()
            .map(|domain| domain.to_ascii_lowercase())
            .collect();
        let count = fresh.len();
        self.replace(fresh).await;
        info!(domains = count, "domain allow-list reloaded");
        Ok(())
    }

    /// Apply one incremental change event. Events are applied eagerly
    /// whether or not any pending decision cares about the domain; the
    /// cache tracks the upstream source of truth, not traffic.
    pub async fn apply(&self, event: DomainEvent) {
        let domain = event.domain.to_ascii_lowercase();
        let mut guard = self.domains.write().await;
        match event.op {
            DomainOp::Insert | DomainOp::Update => {
                // An update that renamed the domain must evict the old value.
                if let Some(previous) = &event.previous {
                    let previous = previous.to_ascii_lowercase();
                    if previous != domain && guard.remove(&previous) {
                        debug!(domain = %previous, "domain superseded in allow-list");
                    }
                }
                if guard.insert(domain.clone()) {
                    debug!(domain = %domain, "domain added to allow-list");
                }
            }
            DomainOp::Delete => {
                if guard.remove(&domain) {
                    debug!(domain = %domain, "domain removed from allow-list");
                }
            }
        }
    }
}

impl Default for DomainWhitelist {
    fn default() -> Self {
        Self::new()
    }
}

/// Background synchronization with the primary store's domain events.
///
/// Each time the subscription (re)activates the set is reloaded in full, so
/// events missed while disconnected cannot leave the cache stale.
pub fn spawn_sync(whitelist: Arc<DomainWhitelist>, store: Arc<Mailstore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match store.domain_events().await {
                Ok(events) => {
                    info!("domain event subscription active");
                    if let Err(err) = whitelist.reload(&store).await {
                        warn!(error = %err, "domain allow-list reload failed");
                    }
                    tokio::pin!(events);
                    while let Some(event) = events.next().await {
                        whitelist.apply(event).await;
                    }
                    warn!("domain event stream ended, resubscribing");
                }
                Err(err) => {
                    warn!(error = %err, "domain event subscription failed");
                }
            }
            tokio::time::sleep(RESYNC_DELAY).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(op: DomainOp, domain: &str) -> DomainEvent {
        DomainEvent {
            op,
            domain: domain.to_string(),
            previous: None,
        }
    }

    #[tokio::test]
    async fn empty_set_admits_nothing() {
        let whitelist = DomainWhitelist::new();
        assert!(!whitelist.is_allowed("user@example.com").await);
    }

    #[tokio::test]
    async fn exact_and_subdomain_matches() {
        let whitelist = DomainWhitelist::new();
        whitelist.apply(event(DomainOp::Insert, "example.com")).await;

        assert!(whitelist.is_allowed("user@example.com").await);
        assert!(whitelist.is_allowed("user@sub.example.com").await);
        assert!(whitelist.is_allowed("user@a.b.example.com").await);
        assert!(!whitelist.is_allowed("user@notexample.com").await);
        assert!(!whitelist.is_allowed("user@example.com.evil.org").await);
    }

    #[tokio::test]
    async fn matching_is_case_insensitive() {
        let whitelist = DomainWhitelist::new();
        whitelist.apply(event(DomainOp::Insert, "Example.COM")).await;

        assert!(whitelist.is_allowed("User@EXAMPLE.com").await);
        assert!(whitelist.is_allowed("user@Sub.Example.Com").await);
    }

    #[tokio::test]
    async fn address_without_at_is_denied() {
        let whitelist = DomainWhitelist::new();
        whitelist.apply(event(DomainOp::Insert, "example.com")).await;

        assert!(!whitelist.is_allowed("example.com").await);
        assert!(!whitelist.is_allowed("").await);
    }

    #[tokio::test]
    async fn delete_event_revokes_admission() {
        let whitelist = DomainWhitelist::new();
        whitelist.apply(event(DomainOp::Insert, "example.com")).await;
        assert!(whitelist.is_allowed("user@sub.example.com").await);

        whitelist.apply(event(DomainOp::Delete, "example.com")).await;
        assert!(!whitelist.is_allowed("user@sub.example.com").await);
    }

    #[tokio::test]
    async fn update_event_behaves_like_insert() {
        let whitelist = DomainWhitelist::new();
        whitelist.apply(event(DomainOp::Update, "example.org")).await;
        assert!(whitelist.is_allowed("user@example.org").await);
    }

    #[tokio::test]
    async fn rename_update_evicts_the_previous_domain() {
        let whitelist = DomainWhitelist::new();
        whitelist.apply(event(DomainOp::Insert, "old.org")).await;

        whitelist
            .apply(DomainEvent {
                op: DomainOp::Update,
                domain: "new.org".to_string(),
                previous: Some("old.org".to_string()),
            })
            .await;

        assert!(!whitelist.is_allowed("user@old.org").await);
        assert!(whitelist.is_allowed("user@new.org").await);
    }

    #[tokio::test]
    async fn replace_swaps_the_whole_set() {
        let whitelist = DomainWhitelist::new();
        whitelist.apply(event(DomainOp::Insert, "old.com")).await;

        let fresh: HashSet<String> = ["new.com".to_string()].into_iter().collect();
        whitelist.replace(fresh).await;

        assert!(!whitelist.is_allowed("user@old.com").await);
        assert!(whitelist.is_allowed("user@new.com").await);
        assert_eq!(whitelist.len().await, 1);
    }
}

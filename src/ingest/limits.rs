//! Bounded admission of in-flight message work.
//!
//! Two independent limits protect the service:
//! - a hard ceiling on simultaneously accepted DATA streams; at the
//!   ceiling new streams are rejected with a transient error, and
//! - a concurrency cap on parse/persist work; accepted tasks above the cap
//!   queue in arrival order.
//!
//! Both are semaphores; the slot handed to an accepted stream is an RAII
//! permit, so the in-flight count is released on every path, including
//! panics and error returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use mailsink_config::LimitsConfig;
use mailsink_error::{IngestError, IngestResult};

/// Permit for one accepted DATA stream, held until its message is fully
/// processed (or the stream fails). Dropping it frees the slot.
pub struct DataSlot {
    _permit: OwnedSemaphorePermit,
}

pub struct IngestLimits {
    data_streams: Arc<Semaphore>,
    processing: Arc<Semaphore>,
    max_data_streams: usize,
    process_concurrency: usize,
    closed: AtomicBool,
}

impl IngestLimits {
    pub fn new(config: &LimitsConfig) -> Self {
        Self {
            data_streams: Arc::new(Semaphore::new(config.max_data_streams)),
            processing: Arc::new(Semaphore::new(config.process_concurrency)),
            max_data_streams: config.max_data_streams,
            process_concurrency: config.process_concurrency,
            closed: AtomicBool::new(false),
        }
    }

    /// Claim a slot for a new DATA stream.
    ///
    /// Fails with `CapacityExceeded` at the ceiling and after `close`; the
    /// protocol layer maps that to a transient rejection so the sender
    /// retries later.
    pub fn try_begin_data(&self) -> IngestResult<DataSlot> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(IngestError::CapacityExceeded);
        }
        match Arc::clone(&self.data_streams).try_acquire_owned() {
            Ok(permit) => Ok(DataSlot { _permit: permit }),
            Err(_) => Err(IngestError::CapacityExceeded),
        }
    }

    /// Acquire a processing permit; waits FIFO when the cap is reached.
    pub async fn acquire_processing(&self) -> OwnedSemaphorePermit {
        Arc::clone(&self.processing)
            .acquire_owned()
            .await
            .expect("processing semaphore closed")
    }

    /// Number of DATA streams currently holding slots.
    pub fn in_flight(&self) -> usize {
        self.max_data_streams - self.data_streams.available_permits()
    }

    /// Stop admitting new DATA streams (graceful shutdown).
    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }

    /// Resolves once every slot and every processing permit has been
    /// returned, i.e. all admitted work has finished.
    pub async fn drained(&self) {
        let _slots = self
            .data_streams
            .acquire_many(self.max_data_streams as u32)
            .await
            .expect("data stream semaphore closed");
        let _permits = self
            .processing
            .acquire_many(self.process_concurrency as u32)
            .await
            .expect("processing semaphore closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limits(max_data_streams: usize, process_concurrency: usize) -> IngestLimits {
        IngestLimits::new(&LimitsConfig {
            max_data_streams,
            process_concurrency,
        })
    }

    #[tokio::test]
    async fn ceiling_rejects_excess_streams() {
        let limits = limits(2, 4);

        let a = limits.try_begin_data().expect("first slot");
        let _b = limits.try_begin_data().expect("second slot");
        assert!(matches!(
            limits.try_begin_data(),
            Err(IngestError::CapacityExceeded)
        ));
        assert_eq!(limits.in_flight(), 2);

        drop(a);
        limits.try_begin_data().expect("slot freed by drop");
    }

    #[tokio::test]
    async fn slot_release_happens_on_drop_not_success() {
        let limits = limits(1, 1);

        {
            let _slot = limits.try_begin_data().expect("slot");
            // Simulated failure path: the slot goes out of scope without
            // any explicit release call.
        }
        assert_eq!(limits.in_flight(), 0);
        limits.try_begin_data().expect("slot available again");
    }

    #[tokio::test]
    async fn closed_limits_reject_new_streams() {
        let limits = limits(4, 4);
        limits.close();
        assert!(matches!(
            limits.try_begin_data(),
            Err(IngestError::CapacityExceeded)
        ));
    }

    #[tokio::test]
    async fn drained_resolves_when_all_work_returns() {
        let limits = Arc::new(limits(2, 2));

        let slot = limits.try_begin_data().expect("slot");
        let drained = {
            let limits = Arc::clone(&limits);
            tokio::spawn(async move { limits.drained().await })
        };

        // Still holding a slot: drained must not resolve yet.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drained.is_finished());

        drop(slot);
        tokio::time::timeout(Duration::from_secs(1), drained)
            .await
            .expect("drained after release")
            .expect("join");
    }

    #[tokio::test]
    async fn processing_permits_queue_fifo() {
        let limits = Arc::new(limits(4, 1));

        let first = limits.acquire_processing().await;
        let waiting = {
            let limits = Arc::clone(&limits);
            tokio::spawn(async move {
                let _permit = limits.acquire_processing().await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiting.is_finished());

        drop(first);
        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("permit handed over")
            .expect("join");
    }
}

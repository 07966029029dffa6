//! Single-flight delivery queue
//!
//! Producers push records through a [`QueueHandle`]; one worker task owns the
//! pending sequence and sends its head through the [`Transport`], awaiting
//! each result before taking the next record.
//!
//! ```text
//!   enqueue ──► channel ──► pending (VecDeque) ──► Transport::send ──► ok: drop
//!                               ▲                                 │
//!                               └────────── err: push_back ◄──────┘
//! ```
//!
//! A failed record goes to the tail, behind everything enqueued while its
//! attempt was in flight. It is retried immediately when it reaches the head
//! again, with no attempt limit. Pending records are dropped when the queue
//! shuts down.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;

use crate::event::EventRecord;

use super::transport::Transport;

/// Counters shared between the worker and handles
#[derive(Debug, Default)]
struct Shared {
    /// Enqueued and not yet delivered, including the record in flight
    pending: AtomicUsize,
    sending: AtomicBool,
    attempts: AtomicU64,
    delivered: AtomicU64,
    failures: AtomicU64,
    /// Woken after every completed attempt
    progress: Notify,
}

/// Delivery statistics snapshot
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Records waiting or in flight
    pub pending: usize,
    /// Total send attempts made
    pub attempts: u64,
    /// Records the collector accepted
    pub delivered: u64,
    /// Failed attempts (each one re-queued)
    pub failures: u64,
}

/// Cloneable producer side of the delivery queue
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<EventRecord>,
    shared: Arc<Shared>,
}

impl QueueHandle {
    /// Append a record to the tail of the pending sequence
    ///
    /// Never blocks and never fails; if the worker has shut down the record
    /// is dropped with a warning.
    pub fn enqueue(&self, record: EventRecord) {
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::error::SendError(record)) = self.tx.send(record) {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!(
                event_name = %record.event_name,
                "Delivery queue is closed, dropping event"
            );
        }
    }

    /// True while an attempt is outstanding
    pub fn is_sending(&self) -> bool {
        self.shared.sending.load(Ordering::SeqCst)
    }

    /// Get current delivery statistics
    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            pending: self.shared.pending.load(Ordering::SeqCst),
            attempts: self.shared.attempts.load(Ordering::SeqCst),
            delivered: self.shared.delivered.load(Ordering::SeqCst),
            failures: self.shared.failures.load(Ordering::SeqCst),
        }
    }

    /// Get number of records waiting or in flight
    pub fn pending_count(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until nothing is pending or in flight
    ///
    /// Returns false on timeout. This only observes the queue; it does not
    /// change delivery behavior.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        tokio::time::timeout(timeout, async {
            loop {
                let progressed = shared.progress.notified();
                if shared.pending.load(Ordering::SeqCst) == 0 {
                    return;
                }
                progressed.await;
            }
        })
        .await
        .is_ok()
    }
}

impl std::fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Owner of the delivery worker task
#[derive(Debug)]
pub struct DeliveryQueue {
    handle: QueueHandle,
    worker: JoinHandle<()>,
}

impl DeliveryQueue {
    /// Spawn the worker on the given runtime
    ///
    /// With `log_deliveries` every accepted record is logged at info level;
    /// otherwise at debug.
    pub fn spawn<T: Transport>(transport: T, runtime: &Handle, log_deliveries: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());

        let worker = runtime.spawn(run_sender(
            transport,
            rx,
            Arc::clone(&shared),
            log_deliveries,
        ));

        Self {
            handle: QueueHandle { tx, shared },
            worker,
        }
    }

    /// Producer handle for this queue
    pub fn handle(&self) -> QueueHandle {
        self.handle.clone()
    }

    /// Stop the worker, abandoning pending records and any attempt in flight
    pub fn shutdown(self) {
        let pending = self.handle.pending_count();
        self.worker.abort();
        if pending > 0 {
            tracing::info!(pending, "Delivery queue stopped with undelivered events");
        }
    }
}

impl Drop for DeliveryQueue {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Move everything already enqueued to the tail of `pending`
fn drain_channel(rx: &mut mpsc::UnboundedReceiver<EventRecord>, pending: &mut VecDeque<EventRecord>) {
    while let Ok(record) = rx.try_recv() {
        pending.push_back(record);
    }
}

/// Sender loop: Idle until a record is pending, then Sending until it completes
async fn run_sender<T: Transport>(
    transport: T,
    mut rx: mpsc::UnboundedReceiver<EventRecord>,
    shared: Arc<Shared>,
    log_deliveries: bool,
) {
    let mut pending: VecDeque<EventRecord> = VecDeque::new();

    loop {
        drain_channel(&mut rx, &mut pending);

        let record = match pending.pop_front() {
            Some(record) => record,
            None => match rx.recv().await {
                Some(record) => record,
                None => break,
            },
        };

        shared.sending.store(true, Ordering::SeqCst);
        let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let result = transport.send(&record).await;

        // Records enqueued during the attempt go ahead of a failed record
        drain_channel(&mut rx, &mut pending);

        let failed = match result {
            Ok(()) => {
                shared.delivered.fetch_add(1, Ordering::SeqCst);
                shared.pending.fetch_sub(1, Ordering::SeqCst);
                if log_deliveries {
                    tracing::info!(
                        event_type = %record.event_type,
                        event_name = %record.event_name,
                        "Event sent successfully"
                    );
                } else {
                    tracing::debug!(
                        event_type = %record.event_type,
                        event_name = %record.event_name,
                        attempt,
                        "Event sent successfully"
                    );
                }
                false
            }
            Err(e) => {
                shared.failures.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    event_type = %record.event_type,
                    event_name = %record.event_name,
                    error = %e,
                    "Failed to send event, re-queued"
                );
                pending.push_back(record);
                true
            }
        };

        shared.sending.store(false, Ordering::SeqCst);
        shared.progress.notify_waiters();

        if failed {
            // Immediate retry; yield so producers sharing the runtime still progress
            tokio::task::yield_now().await;
        }
    }

    if !pending.is_empty() {
        tracing::debug!(
            dropped = pending.len(),
            "Delivery queue closed with pending events"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::event::EventBuilder;
    use crate::identity::{Identity, StaticDeviceId, SystemClock};
    use std::sync::Mutex;

    /// Records every attempt; fails the first attempt of each name in `fail_once`
    #[derive(Clone, Default)]
    struct RecordingTransport {
        attempts: Arc<Mutex<Vec<String>>>,
        fail_once: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for RecordingTransport {
        async fn send(&self, record: &EventRecord) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            self.attempts.lock().unwrap().push(record.event_name.clone());
            let mut fail_once = self.fail_once.lock().unwrap();
            if let Some(pos) = fail_once.iter().position(|n| n == &record.event_name) {
                fail_once.remove(pos);
                return Err(Error::Delivery("API error (503): unavailable".to_string()));
            }
            Ok(())
        }
    }

    fn builder() -> EventBuilder {
        let identity = Identity::new("vr_test", "http://collector", &StaticDeviceId("d".into()));
        EventBuilder::new(Arc::new(identity), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_drains_in_order() {
        let transport = RecordingTransport::default();
        let queue = DeliveryQueue::spawn(transport.clone(), &Handle::current(), false);
        let handle = queue.handle();
        let builder = builder();

        for name in ["a", "b", "c"] {
            handle.enqueue(builder.custom(name, None));
        }

        assert!(handle.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(*transport.attempts.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(
            handle.stats(),
            DeliveryStats {
                pending: 0,
                attempts: 3,
                delivered: 3,
                failures: 0,
            }
        );
        assert!(!handle.is_sending());
    }

    #[tokio::test]
    async fn test_failed_record_goes_to_tail() {
        let transport = RecordingTransport::default();
        transport.fail_once.lock().unwrap().push("a".to_string());
        let queue = DeliveryQueue::spawn(transport.clone(), &Handle::current(), false);
        let handle = queue.handle();
        let builder = builder();

        for name in ["a", "b", "c"] {
            handle.enqueue(builder.custom(name, None));
        }

        assert!(handle.wait_idle(Duration::from_secs(5)).await);
        assert_eq!(*transport.attempts.lock().unwrap(), vec!["a", "b", "c", "a"]);
        let stats = handle.stats();
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.delivered, 3);
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_dropped() {
        let queue = DeliveryQueue::spawn(RecordingTransport::default(), &Handle::current(), false);
        let handle = queue.handle();
        queue.shutdown();
        // Let the abort take effect so the receiver is dropped
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle.enqueue(builder().custom("late", None));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_idle_times_out_while_pending() {
        #[derive(Clone)]
        struct Stalled;
        impl Transport for Stalled {
            async fn send(&self, _record: &EventRecord) -> Result<()> {
                std::future::pending::<Result<()>>().await
            }
        }

        let queue = DeliveryQueue::spawn(Stalled, &Handle::current(), false);
        let handle = queue.handle();
        handle.enqueue(builder().custom("stuck", None));

        assert!(!handle.wait_idle(Duration::from_millis(50)).await);
        assert!(handle.is_sending());
        assert_eq!(handle.pending_count(), 1);
    }
}

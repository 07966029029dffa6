//! Event delivery to the EVAVEO collector
//!
//! Delivery is fire-and-forget from the producer's point of view:
//! - Tracking calls only enqueue; they never wait on the network
//! - One record is in flight at a time, across all producers
//! - Failed records are re-queued at the tail and retried without limit
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use evaveo_core::delivery::{DeliveryQueue, HttpTransport};
//! use evaveo_core::event::EventBuilder;
//! use evaveo_core::identity::{HostDeviceId, Identity, SystemClock};
//!
//! # async fn demo() -> evaveo_core::Result<()> {
//! let identity = Arc::new(Identity::new("vr_key", "https://collector.example.com", &HostDeviceId::new()));
//! let transport = HttpTransport::new(&identity, std::time::Duration::from_secs(30))?;
//! let queue = DeliveryQueue::spawn(transport, &tokio::runtime::Handle::current(), false);
//!
//! let builder = EventBuilder::new(identity, Arc::new(SystemClock));
//! queue.handle().enqueue(builder.custom("level_complete", None));
//! # Ok(())
//! # }
//! ```

mod queue;
mod transport;

pub use queue::{DeliveryQueue, DeliveryStats, QueueHandle};
pub use transport::{HttpTransport, Transport, EVENT_PATH};

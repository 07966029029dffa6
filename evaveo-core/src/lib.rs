//! # evaveo-core
//!
//! Core library for the EVAVEO VR Manager telemetry SDK.
//!
//! This library provides:
//! - Event records and the builder that stamps identity onto them
//! - A single-flight delivery queue posting records to the collector
//! - Session tracking, performance snapshots and crash reporting
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Producers never talk to the network:
//! - **Producers:** host code, [`session::SessionTracker`],
//!   [`performance::PerformanceMonitor`] and [`crash::CrashHandler`] build
//!   records with [`event::EventBuilder`] and enqueue them
//! - **Queue:** [`delivery::DeliveryQueue`] holds pending records in order
//! - **Sender:** one worker task posts the head record, drops it on success
//!   and re-queues it at the tail on failure
//!
//! ## Example
//!
//! ```rust,no_run
//! use evaveo_core::{Config, Payload, Sdk};
//!
//! # async fn demo() -> evaveo_core::Result<()> {
//! let config = Config::load()?;
//!
//! let sdk = Sdk::current()?;
//! sdk.initialize_with(&config);
//! sdk.set_user_id("emp_12345");
//! sdk.track_event(
//!     "module_started",
//!     Some(Payload::new().with("moduleId", "safety_height_01")),
//! );
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use error::{Error, Result};
pub use event::{EventRecord, EventType, Payload, PayloadValue};
pub use sdk::Sdk;

// Public modules
pub mod config;
pub mod crash;
pub mod delivery;
pub mod error;
pub mod event;
pub mod identity;
pub mod logging;
pub mod performance;
pub mod sdk;
pub mod session;

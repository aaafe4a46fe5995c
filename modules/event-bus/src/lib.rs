//! # Iris Event Bus
//!
//! Process-wide typed publish/subscribe for inter-module communication.
//! Named channels carry type-tagged values between publisher and subscriber
//! endpoints; subscriptions marked required can be blocked on until their
//! payload arrives.
//!
//! The registry of signals is global to the process: modules in different
//! graphs exchange data through the same key space. A [`BusHandle`] is the
//! per-owner view over that registry; dropping it withdraws every endpoint
//! it enrolled.

pub mod bus;
pub mod error;
pub mod key;
pub mod metrics;
pub mod signal;
pub mod tag;

// Re-export public API
pub use bus::{cancel_all_waits, cancel_waits_on_channel, signal_stats, BusHandle};
pub use error::{EventBusError, EventBusResult};
pub use key::{Key, KeyFragment};
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use signal::Requirement;
pub use tag::TypeTag;

//! Shutter event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`LedgerEvent`]: a download request status transition.

pub mod bus;

pub use bus::{EventBus, LedgerEvent};

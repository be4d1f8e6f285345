//! Shutter domain core.
//!
//! Constants, validation and naming rules shared by the ledger, the
//! archive pipeline and the HTTP layer. Nothing in here performs I/O.

pub mod download;
pub mod error;
pub mod naming;
pub mod types;

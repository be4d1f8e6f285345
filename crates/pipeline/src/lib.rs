//! Bulk-download pipeline.
//!
//! - [`fetcher`]: one image over HTTP with retry and backoff.
//! - [`archiver`]: a batch of images into one ZIP.
//! - [`store`]: object storage for published archives.
//! - [`ledger`]: persistent request rows and their status lifecycle.
//! - [`processor`]: one claimed request end to end.
//! - [`dispatch`] / [`drainer`]: scheduled, budgeted batch processing.

pub mod archiver;
pub mod config;
pub mod dispatch;
pub mod drainer;
pub mod error;
pub mod fetcher;
pub mod ledger;
pub mod processor;
pub mod store;

pub use archiver::{ArchiveOutput, Archiver};
pub use dispatch::{Dispatch, LocalDispatch, RemoteDispatch};
pub use drainer::{DrainOutcome, DrainReport, DrainRequest, Drainer};
pub use error::PipelineError;
pub use fetcher::Fetcher;
pub use ledger::{Ledger, MemoryLedger, PgLedger};
pub use processor::{DownloadProcessor, ProcessOutcome, Reservation};
pub use store::{LocalStore, MemoryStore, ObjectStore, S3Store};

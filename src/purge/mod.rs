//! Bulk deletion of aged messages
//!
//! A [`PurgeWorker`] pages a folder oldest first, keeps the messages received before the
//! cutoff, and deletes them in sequential batches through a [`BatchDeleter`]. Each batch is
//! followed by a progress event. A [`CancellationFlag`], raised by the
//! [`CancellationListener`] when the operator types `QUIT`, is honoured between batches.

pub mod batch;
pub mod cancel;
pub mod report;
pub mod worker;

pub use batch::{BatchDeleter, BatchOutcome, DeleteOutcome};
pub use cancel::{CancellationFlag, CancellationListener, QUIT_MESSAGE};
pub use report::{
    DelimitedReporter, ProgressEvent, PurgeAction, PurgeEvent, PurgeReporter, PurgeSummary,
    RecordingReporter,
};
pub use worker::{PurgeConfig, PurgeProgress, PurgeWorker};

//! Per-table transfer state machine and batch statistics.

mod stats;
mod task;

pub use stats::TransferStats;
pub use task::{
    FailureKind, Phase, RowCountMismatch, TableFailure, TableOutcome, TableSuccess,
    TableTransferTask, TaskSettings,
};

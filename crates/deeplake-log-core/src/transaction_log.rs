//! Branch-aware, append-only transaction log with columnar checkpoints.
//!
//! This module implements format 4 of the Deep Lake dataset log: an ordered
//! history of typed actions, grouped into monotonically numbered commits per
//! branch, materialized back into state by replaying commits (optionally
//! starting from a Parquet checkpoint).
//!
//! - Actions are a closed variant set ([`Action`]): protocol settings,
//!   dataset metadata, branch creation, file additions, tensor declarations,
//!   and commit markers. Some variants carry *replace semantics*: a later
//!   action supersedes (or annihilates) an earlier matching one during
//!   reconstruction.
//! - A commit serializes an ordered action batch as one immutable JSON
//!   artifact under `_deeplake_log/<branch_id>/`, named by its zero-padded
//!   version. Writers race for a version slot with create-only-if-absent
//!   semantics and lose cleanly with [`LogError::ConcurrentCommit`].
//! - Readers fold the checkpoint (if any) plus all newer commits into one
//!   Arrow table over the unified schema ([`schema::unified_schema`]), then
//!   decode rows back into actions with replace-folding applied in order.
//! - A checkpoint collapses the folded action list of a branch into a
//!   Snappy-compressed Parquet artifact and publishes a
//!   `_last_checkpoint.json` pointer declaring it authoritative.
//!
//! ## On-disk layout
//!
//! ```text
//! <root>/
//!   _deeplake_log/
//!     _meta/
//!       00000000000000000001.json              # initial protocol/metadata/branch
//!       00000000000000000002.json
//!       00000000000000000005.checkpoint.parquet
//!       _last_checkpoint.json                  # {"version": 5, "size": ...}
//!     <branch_id>/
//!       00000000000000000001.json
//! ```
//!
//! Commit artifacts are a byte stream of JSON objects concatenated without
//! separators; each object has exactly one key (the action tag). The reader
//! is whitespace-tolerant.
//!
//! The log is designed to be:
//!
//! - **Append-only**: commit artifacts are written exactly once and never
//!   mutated.
//! - **Deterministic**: the reconstructed action list at version `V` depends
//!   only on the bytes of commits `1..=V` (and any checkpoint at `K <= V`);
//!   checkpoint-then-tail and pure replay agree.
//! - **Human-inspectable**: JSON commits and a small set of actions make it
//!   easy to debug with basic tools.
pub mod actions;
pub mod checkpoint;
pub mod legacy;
pub mod log_store;
pub mod schema;
pub mod tensor;
pub mod transaction;

pub use actions::{
    Action, AddFileAction, CreateBranchAction, CreateCommitAction, MetadataAction, ProtocolAction,
};
pub use checkpoint::LastCheckpoint;
pub use legacy::LegacyLog;
pub use log_store::{DatasetLog, TransactionLog, create, open, zero_pad};
pub use tensor::{CreateTensorAction, TensorLink};
pub use transaction::OptimisticTransaction;

use snafu::{Backtrace, prelude::*};

use crate::storage::StorageError;

/// Branch id of the reserved meta branch carrying protocol, dataset
/// metadata, and branch-creation actions.
pub const META_BRANCH_ID: &str = "_meta";

/// Directory under the dataset root that holds all log artifacts.
pub const LOG_DIR: &str = "_deeplake_log";

/// Pointer file declaring the newest available checkpoint of a branch.
pub const LAST_CHECKPOINT_FILE: &str = "_last_checkpoint.json";

/// Errors surfaced by the transaction log core.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum LogError {
    /// `create` was called against a root that already carries a log.
    #[snafu(display("A transaction log already exists at this location"))]
    AlreadyInitialized {
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// `open` was called against a root that is neither format 3 nor 4.
    #[snafu(display("Cannot determine the log format at this location"))]
    UnknownFormat {
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// `create` was called with a log format older than 3.
    #[snafu(display("Log format {requested} is not supported"))]
    UnsupportedVersion {
        /// The rejected format number.
        requested: u32,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A commit lost the race for its version slot, or its base version no
    /// longer matches the branch tip.
    #[snafu(display(
        "Concurrent commit on branch '{branch_id}': version {version} is already taken"
    ))]
    ConcurrentCommit {
        /// The branch the commit targeted.
        branch_id: String,
        /// The version slot that was contested.
        version: u64,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// An artifact cannot be parsed, a required action is missing from a
    /// snapshot, or a checkpoint table violates the unified schema.
    #[snafu(display("Corrupt log state: {msg}"))]
    CorruptLog {
        /// A description of the corrupt state.
        msg: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A column in the unified table does not match any known action tag.
    #[snafu(display("Unknown action type: {name}"))]
    UnknownAction {
        /// The unrecognized column name.
        name: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// A branch lookup by id or name found nothing.
    #[snafu(display("Branch '{address}' not found"))]
    BranchNotFound {
        /// The id or name that was looked up.
        address: String,
        /// Backtrace for debugging.
        backtrace: Backtrace,
    },

    /// Underlying storage failure; backtraces are delegated to the inner
    /// [`StorageError`].
    #[snafu(context(false))]
    #[snafu(display("Storage error while accessing the transaction log: {source}"))]
    Storage {
        /// Underlying storage error returned by the storage backend.
        #[snafu(backtrace)]
        source: StorageError,
    },
}

/// Result alias for log operations.
pub type LogResult<T> = Result<T, LogError>;

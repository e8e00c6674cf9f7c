//! Core engine for the Deep Lake branch-aware transaction log.
//!
//! This crate implements format 4 of the dataset log: an append-only history
//! of typed actions grouped into per-branch commits, with columnar
//! checkpoints so readers can recover state without replaying every commit.
//!
//! Responsibilities (high level):
//! - A byte-level storage adapter over the log root ([`storage`]).
//! - The closed action variant set with textual and columnar encodings and
//!   replace semantics ([`transaction_log::actions`],
//!   [`transaction_log::tensor`]).
//! - The unified Arrow schema shared by reconstruction and checkpointing
//!   ([`transaction_log::schema`]).
//! - Commit writing with optimistic concurrency, log reading with
//!   replace-folding, and checkpoint publication ([`transaction_log`]).
//! - Typed snapshot views over a reconstructed action list ([`snapshot`]).
//!
//! Higher-level dataset APIs, CLIs, and language bindings are expected to
//! depend on this crate (or on the `deeplake-log-format` facade) rather than
//! re-implementing the storage and replay logic. The tensor-data plane — the
//! file contents referenced by `add` actions — is out of scope here; the log
//! records artifacts, it does not read them.
pub mod common;
pub mod snapshot;
pub mod storage;
pub mod transaction_log;

pub use snapshot::{MetadataSnapshot, Snapshot};
pub use storage::{FileRef, LogLocation, StorageError};
pub use transaction_log::{
    Action, AddFileAction, CreateBranchAction, CreateCommitAction, CreateTensorAction, DatasetLog,
    LAST_CHECKPOINT_FILE, LOG_DIR, LastCheckpoint, LegacyLog, LogError, LogResult, META_BRANCH_ID,
    MetadataAction, OptimisticTransaction, ProtocolAction, TensorLink, TransactionLog, create,
    open,
};

//! # deeplake-log-format
//!
//! Versioned, branch-aware transaction log for dataset management.
//!
//! This crate is the supported public entry point and provides a small,
//! stable surface over `deeplake-log-core`: create or open a log, commit
//! action batches, checkpoint a branch, and materialize snapshots.
//!
//! ## Example
//!
//! ```rust,ignore
//! use deeplake_log_format::prelude::*;
//!
//! let location = LogLocation::local("/data/my-dataset");
//! let log = create(location, 4).await?.into_format4().unwrap();
//! let meta = MetadataSnapshot::load(&log, None).await?;
//! println!("dataset {}", meta.metadata()?.id);
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Action namespace (wrapper-only).
pub mod actions {
    pub use deeplake_log_core::transaction_log::actions::{
        Action, AddFileAction, CreateBranchAction, CreateCommitAction, MetadataAction,
        ProtocolAction, Replaces,
    };
    pub use deeplake_log_core::transaction_log::tensor::{CreateTensorAction, TensorLink};
}

pub use deeplake_log_core::snapshot::{MetadataSnapshot, Snapshot};
pub use deeplake_log_core::storage::LogLocation;
pub use deeplake_log_core::transaction_log::{
    DatasetLog, LastCheckpoint, LegacyLog, LogError, LogResult, META_BRANCH_ID,
    OptimisticTransaction, TransactionLog, create, open,
};

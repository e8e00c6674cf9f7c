//! Wrapper prelude.
//!
//! The `deeplake-log-format` crate is the supported public entry point.
//! Downstream code should prefer importing from this prelude instead of
//! depending on internal core module paths.

pub use crate::actions::{
    Action, AddFileAction, CreateBranchAction, CreateCommitAction, CreateTensorAction,
    MetadataAction, ProtocolAction, TensorLink,
};
pub use crate::{
    DatasetLog, LogError, LogLocation, LogResult, META_BRANCH_ID, MetadataSnapshot,
    OptimisticTransaction, Snapshot, TransactionLog, create, open,
};

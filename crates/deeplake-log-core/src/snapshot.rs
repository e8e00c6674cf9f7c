//! Typed views over a reconstructed action list.
//!
//! A snapshot materializes `(actions, version)` for one branch once and then
//! answers purely in-memory queries. [`Snapshot`] exposes the data plane of
//! a branch (files, tensors, commit markers); [`MetadataSnapshot`] is pinned
//! to the `_meta` branch and exposes the control plane (protocol, dataset
//! metadata, branches). Snapshots are independent values computed from the
//! log handle; a stale snapshot stays internally consistent and can simply
//! be reloaded.
use snafu::prelude::*;

use crate::transaction_log::actions::{
    Action, AddFileAction, CreateBranchAction, CreateCommitAction, MetadataAction, ProtocolAction,
};
use crate::transaction_log::tensor::CreateTensorAction;
use crate::transaction_log::{
    BranchNotFoundSnafu, CorruptLogSnafu, LogResult, META_BRANCH_ID, OptimisticTransaction,
    TransactionLog,
};

/// A consistent view of one branch at a version.
#[derive(Debug, Clone)]
pub struct Snapshot {
    branch_id: String,
    version: u64,
    actions: Vec<Action>,
}

impl Snapshot {
    /// Materialize a branch at `version`, or at its tip when `None`.
    pub async fn load(
        log: &TransactionLog,
        branch_id: impl Into<String>,
        version: Option<u64>,
    ) -> LogResult<Self> {
        let branch_id = branch_id.into();
        let (actions, version) = log.get_actions(&branch_id, version).await?;
        Ok(Self {
            branch_id,
            version,
            actions,
        })
    }

    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// The replace-folded action list, in log order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Stage an optimistic transaction against this snapshot's tip.
    pub fn transaction(&self) -> OptimisticTransaction {
        OptimisticTransaction::new(self.branch_id.clone(), self.version)
    }

    /// All data artifacts recorded on the branch.
    pub fn data_files(&self) -> Vec<&AddFileAction> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Add(add) => Some(add),
                _ => None,
            })
            .collect()
    }

    /// All tensor declarations on the branch.
    pub fn tensors(&self) -> Vec<&CreateTensorAction> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::CreateTensor(tensor) => Some(tensor),
                _ => None,
            })
            .collect()
    }

    /// All commit markers on the branch.
    pub fn commits(&self) -> Vec<&CreateCommitAction> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::CreateCommit(commit) => Some(commit),
                _ => None,
            })
            .collect()
    }
}

/// A consistent view of the `_meta` branch: protocol, dataset metadata, and
/// the branch catalog.
#[derive(Debug, Clone)]
pub struct MetadataSnapshot {
    snapshot: Snapshot,
}

impl MetadataSnapshot {
    /// Materialize the meta branch at `version`, or at its tip when `None`.
    pub async fn load(log: &TransactionLog, version: Option<u64>) -> LogResult<Self> {
        let snapshot = Snapshot::load(log, META_BRANCH_ID, version).await?;
        Ok(Self { snapshot })
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }

    /// The underlying branch snapshot.
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Stage an optimistic transaction against the meta branch tip.
    pub fn transaction(&self) -> OptimisticTransaction {
        self.snapshot.transaction()
    }

    /// The effective protocol declaration. Every initialized log carries
    /// one; its absence means the log is corrupt.
    pub fn protocol(&self) -> LogResult<&ProtocolAction> {
        self.snapshot
            .actions
            .iter()
            .find_map(|a| match a {
                Action::Protocol(protocol) => Some(protocol),
                _ => None,
            })
            .context(CorruptLogSnafu {
                msg: "no protocol action in the meta branch".to_string(),
            })
    }

    /// The effective dataset metadata record.
    pub fn metadata(&self) -> LogResult<&MetadataAction> {
        self.snapshot
            .actions
            .iter()
            .find_map(|a| match a {
                Action::Metadata(metadata) => Some(metadata),
                _ => None,
            })
            .context(CorruptLogSnafu {
                msg: "no metadata action in the meta branch".to_string(),
            })
    }

    /// All branches in creation order; `main` is always first because it is
    /// created at log initialization.
    pub fn branches(&self) -> Vec<&CreateBranchAction> {
        self.snapshot
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::CreateBranch(branch) => Some(branch),
                _ => None,
            })
            .collect()
    }

    /// Resolve a branch by id or name.
    pub fn find_branch(&self, address: &str) -> LogResult<&CreateBranchAction> {
        self.branches()
            .into_iter()
            .find(|b| b.id == address || b.name == address)
            .context(BranchNotFoundSnafu { address })
    }
}

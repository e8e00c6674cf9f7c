//! Optimistic write transactions.
//!
//! A transaction buffers actions against the branch tip its snapshot
//! observed. On commit it races for the next version slot; when it loses, it
//! refreshes the tip and tries again, since an action batch prepared against
//! an older tip is still appendable as long as the caller has not re-read
//! state. Callers that need read-your-writes validation should rebuild their
//! snapshot instead of retrying blindly.
use log::debug;

use crate::transaction_log::actions::Action;
use crate::transaction_log::log_store::TransactionLog;
use crate::transaction_log::{LogError, LogResult};

const MAX_COMMIT_ATTEMPTS: u32 = 8;

/// An ordered action batch staged for commit against an observed branch tip.
#[derive(Debug, Clone)]
pub struct OptimisticTransaction {
    branch_id: String,
    base_version: u64,
    actions: Vec<Action>,
}

impl OptimisticTransaction {
    /// Stage a transaction against the given branch at the observed tip.
    pub fn new(branch_id: impl Into<String>, base_version: u64) -> Self {
        Self {
            branch_id: branch_id.into(),
            base_version,
            actions: Vec::new(),
        }
    }

    /// Append an action to the staged batch.
    pub fn add(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// The staged actions, in commit order.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Commit the staged batch, retrying with a refreshed tip when another
    /// writer wins the version slot. Returns the committed version.
    pub async fn commit(&self, log: &TransactionLog) -> LogResult<u64> {
        let mut base_version = self.base_version;
        let mut attempts = 0;

        loop {
            match log.commit(&self.branch_id, base_version, &self.actions).await {
                Ok(version) => return Ok(version),
                Err(e @ LogError::ConcurrentCommit { .. }) => {
                    attempts += 1;
                    if attempts >= MAX_COMMIT_ATTEMPTS {
                        return Err(e);
                    }
                    debug!(
                        "commit of branch '{}' lost version {}, retrying",
                        self.branch_id,
                        base_version + 1
                    );
                    base_version = log.version(&self.branch_id).await?;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LogLocation;
    use crate::transaction_log::actions::{AddFileAction, ProtocolAction};
    use crate::transaction_log::{META_BRANCH_ID, create};
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[tokio::test]
    async fn commit_lands_on_next_slot_after_losing_a_race() -> TestResult {
        let tmp = TempDir::new()?;
        let log = create(LogLocation::local(tmp.path()), 4)
            .await?
            .into_format4()
            .expect("format 4 log");

        // Staged against tip 1, but another writer lands version 2 first.
        let mut tx = OptimisticTransaction::new(META_BRANCH_ID, 1);
        tx.add(Action::Add(AddFileAction::new("f", "chunk", 1, 1, true, 1)));

        log.commit(
            META_BRANCH_ID,
            1,
            &[Action::Protocol(ProtocolAction::new(5, 6))],
        )
        .await?;

        let version = tx.commit(&log).await?;

        assert_eq!(version, 3);
        assert_eq!(log.version(META_BRANCH_ID).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn commit_without_contention_uses_the_staged_base() -> TestResult {
        let tmp = TempDir::new()?;
        let log = create(LogLocation::local(tmp.path()), 4)
            .await?
            .into_format4()
            .expect("format 4 log");

        let mut tx = OptimisticTransaction::new(META_BRANCH_ID, log.version(META_BRANCH_ID).await?);
        tx.add(Action::Protocol(ProtocolAction::new(5, 6)));

        assert_eq!(tx.commit(&log).await?, 2);
        Ok(())
    }
}

//! Reading and writing the per-branch commit log.
//!
//! This module owns the on-disk interactions with `_deeplake_log/`:
//!
//! - Writing zero-padded commit files with create-only-if-not-exists
//!   semantics so each version slot is taken exactly once.
//! - Enumerating checkpoint and commit artifacts of a branch and merging
//!   them into one unified-schema table, tip-version sentinel last.
//! - Bootstrapping a fresh log ([`create`]) and probing an existing root for
//!   its format ([`open`]).
//!
//! ## Concurrency semantics
//!
//! The check against the branch tip before a commit is advisory and subject
//! to races; two writers may observe the same tip and prepare the same next
//! version. The actual guard is the atomic creation of the commit file: the
//! loser fails with a `ConcurrentCommit` error and no partial state,
//! because a commit is a single artifact write. Readers never lock and may
//! observe commits created after their directory listing began; both orders
//! are valid reads.
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use log::debug;
use snafu::prelude::*;

use crate::common::{current_timestamp, generate_id};
use crate::storage::{self, LogLocation, StorageError};
use crate::transaction_log::actions::{
    Action, CreateBranchAction, MetadataAction, ProtocolAction, encode_action_stream,
    parse_action_stream,
};
use crate::transaction_log::checkpoint::{self, LastCheckpoint};
use crate::transaction_log::legacy::{DATASET_META_FILE, LegacyLog};
use crate::transaction_log::schema::{batch_of_actions, decode_batch, unified_schema, version_row};
use crate::transaction_log::{
    AlreadyInitializedSnafu, ConcurrentCommitSnafu, CorruptLogSnafu, LAST_CHECKPOINT_FILE, LOG_DIR,
    LogResult, META_BRANCH_ID, UnknownFormatSnafu, UnsupportedVersionSnafu,
};

/// Number of digits in zero-padded commit and checkpoint file names.
pub const VERSION_DIGITS: usize = 20;

/// Format a version for use in artifact file names.
pub fn zero_pad(version: u64) -> String {
    format!("{version:0width$}", width = VERSION_DIGITS)
}

/// Parse the version out of a commit file name such as
/// `00000000000000000002.json`.
fn file_version(file_name: &str) -> LogResult<u64> {
    let stem = file_name.strip_suffix(".json").with_context(|| CorruptLogSnafu {
        msg: format!("commit file '{file_name}' has no .json suffix"),
    })?;
    stem.parse::<u64>().map_err(|e| {
        CorruptLogSnafu {
            msg: format!("commit file '{file_name}' has no numeric version: {e}"),
        }
        .build()
    })
}

/// A format-4 transaction log rooted at a storage location.
///
/// The handle holds only the storage location; it is cheap to clone and safe
/// to share between concurrent readers. Concurrent commits from the same
/// process should be serialized by the caller (see
/// [`OptimisticTransaction`](super::OptimisticTransaction)).
#[derive(Debug, Clone)]
pub struct TransactionLog {
    location: LogLocation,
}

impl TransactionLog {
    pub(crate) fn new(location: LogLocation) -> Self {
        Self { location }
    }

    /// The storage location this log reads from and writes to.
    pub fn location(&self) -> &LogLocation {
        &self.location
    }

    pub fn log_format(&self) -> u32 {
        4
    }

    pub(crate) fn branch_dir(branch_id: &str) -> String {
        format!("{LOG_DIR}/{branch_id}")
    }

    pub(crate) fn commit_rel_path(branch_id: &str, version: u64) -> String {
        format!("{}/{}.json", Self::branch_dir(branch_id), zero_pad(version))
    }

    /// The tip of a branch; `0` if it has no commits yet.
    pub async fn version(&self, branch_id: &str) -> LogResult<u64> {
        let (_, version) = self.get_actions(branch_id, None).await?;
        Ok(version)
    }

    /// Serialize an ordered action batch into the next version slot of a
    /// branch.
    ///
    /// `base_version` is the tip the caller observed. The observed tip is
    /// re-checked first (advisory), then the artifact is created with
    /// create-only-if-absent semantics; losing either check fails with
    /// [`LogError::ConcurrentCommit`](super::LogError::ConcurrentCommit) and
    /// leaves no trace. Returns the committed version.
    pub async fn commit(
        &self,
        branch_id: &str,
        base_version: u64,
        actions: &[Action],
    ) -> LogResult<u64> {
        let version = base_version.checked_add(1).context(CorruptLogSnafu {
            msg: "version counter overflow".to_string(),
        })?;

        let tip = self.version(branch_id).await?;
        ensure!(
            tip == base_version,
            ConcurrentCommitSnafu {
                branch_id,
                version: tip.saturating_add(1),
            }
        );

        let rel = Self::commit_rel_path(branch_id, version);
        debug!("committing {} actions to {rel}", actions.len());

        let payload = encode_action_stream(actions)?;
        match storage::set_bytes_new(&self.location, &rel, &payload).await {
            Ok(()) => Ok(version),
            Err(StorageError::AlreadyExists { .. }) => {
                ConcurrentCommitSnafu { branch_id, version }.fail()
            }
            Err(source) => Err(source.into()),
        }
    }

    /// Merge the branch's checkpoint (if any) and the commits in
    /// `max(from, checkpoint + 1)..=to` into one unified-schema table, with
    /// the version sentinel row last.
    pub async fn action_data(
        &self,
        branch_id: &str,
        from: u64,
        to: Option<u64>,
    ) -> LogResult<RecordBatch> {
        debug!("reading action data for branch '{branch_id}' from {from} to {to:?}");

        let mut highest_version: u64 = 0;
        let mut next_from = from;
        let mut tables: Vec<RecordBatch> = Vec::new();

        let branch_dir = Self::branch_dir(branch_id);
        let pointer_rel = format!("{branch_dir}/{LAST_CHECKPOINT_FILE}");

        if storage::exists(&self.location, &pointer_rel).await? {
            let bytes = storage::get_bytes(&self.location, &pointer_rel).await?;
            let pointer: LastCheckpoint = serde_json::from_slice(&bytes).map_err(|e| {
                CorruptLogSnafu {
                    msg: format!("invalid checkpoint pointer: {e}"),
                }
                .build()
            })?;

            tables.extend(
                checkpoint::read_checkpoint(&self.location, &branch_dir, pointer.version).await?,
            );
            highest_version = pointer.version;
            next_from = next_from.max(pointer.version + 1);
        }

        let mut selected: Vec<(u64, String)> = Vec::new();
        if storage::exists(&self.location, &branch_dir).await? {
            for file_ref in storage::list_files(&self.location, &branch_dir).await? {
                let name = file_ref.file_name();
                if !name.ends_with(".json") || name == LAST_CHECKPOINT_FILE {
                    continue;
                }
                let found_version = file_version(name)?;
                if to.is_some_and(|t| found_version > t) {
                    continue;
                }
                highest_version = highest_version.max(found_version);
                if found_version >= next_from {
                    selected.push((found_version, file_ref.path.clone()));
                }
            }
        }
        selected.sort_unstable_by_key(|(version, _)| *version);

        let mut tail_actions = Vec::new();
        for (_, path) in &selected {
            debug!("reading commit data from {path}");
            let bytes = storage::get_bytes(&self.location, path).await?;
            tail_actions.extend(parse_action_stream(&bytes)?);
        }
        tables.push(batch_of_actions(&tail_actions)?);
        tables.push(version_row(highest_version)?);

        debug!("finished loading '{branch_id}' to version {highest_version}");
        concat_batches(&unified_schema(), tables.iter()).map_err(|e| {
            CorruptLogSnafu {
                msg: format!("failed to concatenate action tables: {e}"),
            }
            .build()
        })
    }

    /// Reconstruct the replace-folded action list of a branch up to `to`
    /// (inclusive; the tip when `None`), together with the version actually
    /// observed.
    pub async fn get_actions(
        &self,
        branch_id: &str,
        to: Option<u64>,
    ) -> LogResult<(Vec<Action>, u64)> {
        let table = self.action_data(branch_id, 0, to).await?;
        let (actions, version) = decode_batch(&table)?;
        debug!(
            "loaded {} actions for branch '{branch_id}' at version {version}",
            actions.len()
        );
        Ok((actions, version))
    }
}

/// A log opened from storage: either the current format 4 engine or the
/// opaque legacy format 3 loader.
#[derive(Debug, Clone)]
pub enum DatasetLog {
    /// Format 4: branch-aware commit log with columnar checkpoints.
    Format4(TransactionLog),
    /// Legacy format 3, exposed only through its single entry point.
    Legacy(LegacyLog),
}

impl DatasetLog {
    pub fn log_format(&self) -> u32 {
        match self {
            DatasetLog::Format4(log) => log.log_format(),
            DatasetLog::Legacy(log) => log.log_format(),
        }
    }

    pub fn as_format4(&self) -> Option<&TransactionLog> {
        match self {
            DatasetLog::Format4(log) => Some(log),
            DatasetLog::Legacy(_) => None,
        }
    }

    pub fn into_format4(self) -> Option<TransactionLog> {
        match self {
            DatasetLog::Format4(log) => Some(log),
            DatasetLog::Legacy(_) => None,
        }
    }
}

fn first_meta_commit_rel() -> String {
    TransactionLog::commit_rel_path(META_BRANCH_ID, 1)
}

fn meta_pointer_rel() -> String {
    format!("{LOG_DIR}/{META_BRANCH_ID}/{LAST_CHECKPOINT_FILE}")
}

/// Create a new log against an empty storage root.
///
/// Rejects formats older than 3, delegates format 3 wholly to the legacy
/// loader, and otherwise writes the initial meta commit: a protocol
/// declaration, a freshly generated dataset metadata record, and the `main`
/// branch.
pub async fn create(location: LogLocation, log_format: u32) -> LogResult<DatasetLog> {
    ensure!(log_format >= 3, UnsupportedVersionSnafu { requested: log_format });
    if log_format == 3 {
        return Ok(DatasetLog::Legacy(LegacyLog::attach(location)));
    }

    let initialized = storage::exists(&location, &first_meta_commit_rel()).await?
        || storage::exists(&location, &meta_pointer_rel()).await?;
    ensure!(!initialized, AlreadyInitializedSnafu);

    let log = TransactionLog::new(location);
    let actions = vec![
        Action::Protocol(ProtocolAction::new(4, 4)),
        Action::Metadata(MetadataAction::new(generate_id(), None, None, current_timestamp())),
        Action::CreateBranch(CreateBranchAction::new(generate_id(), "main", None, None)),
    ];
    log.commit(META_BRANCH_ID, 0, &actions).await?;

    Ok(DatasetLog::Format4(log))
}

/// Open an existing log, detecting its format from the storage contents.
pub async fn open(location: LogLocation) -> LogResult<DatasetLog> {
    debug!("opening log at {location:?}");

    if storage::exists(&location, &first_meta_commit_rel()).await?
        || storage::exists(&location, &meta_pointer_rel()).await?
    {
        return Ok(DatasetLog::Format4(TransactionLog::new(location)));
    }
    if storage::exists(&location, DATASET_META_FILE).await? {
        return Ok(DatasetLog::Legacy(LegacyLog::attach(location)));
    }

    UnknownFormatSnafu.fail()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction_log::LogError;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn zero_pad_is_twenty_digits() {
        assert_eq!(zero_pad(1), "00000000000000000001");
        assert_eq!(zero_pad(1).len(), VERSION_DIGITS);
        assert_eq!(zero_pad(12345), "00000000000000012345");
    }

    #[test]
    fn file_version_parses_padded_names() {
        assert_eq!(file_version("00000000000000000017.json").expect("parse"), 17);

        let err = file_version("notaversion.json").expect_err("non-numeric stem");
        assert!(matches!(err, LogError::CorruptLog { .. }));
    }

    #[tokio::test]
    async fn fresh_branch_has_version_zero() -> TestResult {
        let tmp = TempDir::new()?;
        let log = TransactionLog::new(LogLocation::local(tmp.path()));

        assert_eq!(log.version("nonexistent").await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn commit_with_stale_base_version_is_a_conflict() -> TestResult {
        let tmp = TempDir::new()?;
        let log = create(LogLocation::local(tmp.path()), 4)
            .await?
            .into_format4()
            .expect("format 4 log");

        let action = Action::Protocol(ProtocolAction::new(5, 6));
        let result = log.commit(META_BRANCH_ID, 0, std::slice::from_ref(&action)).await;

        assert!(matches!(result, Err(LogError::ConcurrentCommit { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn commit_into_occupied_slot_is_a_conflict() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());
        let log = TransactionLog::new(location.clone());

        // Another writer landed version 1 between our tip check and write.
        let action = Action::Protocol(ProtocolAction::new(4, 4));
        storage::set_bytes_new(
            &location,
            &TransactionLog::commit_rel_path("b1", 1),
            br#"{"protocol":{"min_reader_version":4,"min_writer_version":4}}"#,
        )
        .await?;

        // The advisory tip check already sees the occupied slot.
        let result = log.commit("b1", 0, std::slice::from_ref(&action)).await;
        assert!(matches!(result, Err(LogError::ConcurrentCommit { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn create_rejects_old_formats_and_double_create() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        let err = create(location.clone(), 2).await.expect_err("format 2");
        assert!(matches!(err, LogError::UnsupportedVersion { requested: 2, .. }));

        create(location.clone(), 4).await?;
        let err = create(location, 4).await.expect_err("double create");
        assert!(matches!(err, LogError::AlreadyInitialized { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn open_detects_formats() -> TestResult {
        let tmp = TempDir::new()?;
        let location = LogLocation::local(tmp.path());

        let err = open(location.clone()).await.expect_err("empty root");
        assert!(matches!(err, LogError::UnknownFormat { .. }));

        storage::set_bytes(&location, DATASET_META_FILE, b"{}").await?;
        assert_eq!(open(location.clone()).await?.log_format(), 3);

        create(location.clone(), 4).await?;
        assert_eq!(open(location).await?.log_format(), 4);
        Ok(())
    }
}

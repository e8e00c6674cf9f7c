//! Integration tests for the checkpoint pipeline.
//!
//! These validate that checkpoints collapse replace-folded history into a
//! Parquet artifact equivalent to full replay, and that a branch stays
//! readable from the checkpoint alone after its commit artifacts disappear.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::Path;

use arrow::array::{Array, StringArray, StructArray};
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use deeplake_log_core::snapshot::MetadataSnapshot;
use deeplake_log_core::storage::LogLocation;
use deeplake_log_core::transaction_log::{
    Action, AddFileAction, LastCheckpoint, LogError, MetadataAction, META_BRANCH_ID,
    TransactionLog, create, open,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn create_format4_log(tmp: &TempDir) -> Result<TransactionLog, LogError> {
    let opened = create(LogLocation::local(tmp.path()), 4).await?;
    Ok(opened.into_format4().expect("format 4 log"))
}

async fn read_parquet_table(path: &Path) -> Result<RecordBatch, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(path).await?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes))?;
    let schema = builder.schema().clone();
    let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, batches.iter())?)
}

async fn commit_metadata_rename(log: &TransactionLog, name: &str, desc: &str) -> Result<(), LogError> {
    let original = MetadataSnapshot::load(log, None).await?.metadata()?.clone();
    let updated = MetadataAction::new(
        original.id,
        Some(name.to_string()),
        Some(desc.to_string()),
        original.created_time,
    );
    log.commit(
        META_BRANCH_ID,
        log.version(META_BRANCH_ID).await?,
        &[Action::Metadata(updated)],
    )
    .await?;
    Ok(())
}

async fn delete_commit_artifacts(root: &Path, branch_id: &str) -> Result<(), std::io::Error> {
    let dir = root.join("_deeplake_log").join(branch_id);
    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".json") && name != "_last_checkpoint.json" {
            tokio::fs::remove_file(entry.path()).await?;
        }
    }
    Ok(())
}

/// Scenario: two metadata renames, then a checkpoint. The checkpoint table
/// holds exactly one metadata row, the final one.
#[tokio::test]
async fn checkpoint_collapses_replaced_actions() -> TestResult {
    let tmp = TempDir::new()?;
    let log = create_format4_log(&tmp).await?;

    commit_metadata_rename(&log, "first name", "first desc").await?;
    commit_metadata_rename(&log, "final name", "final desc").await?;

    log.checkpoint(META_BRANCH_ID).await?;

    let checkpoint_path = tmp
        .path()
        .join("_deeplake_log/_meta/00000000000000000003.checkpoint.parquet");
    assert!(checkpoint_path.exists());

    let table = read_parquet_table(&checkpoint_path).await?;
    let metadata_column = table
        .column_by_name("metadata")
        .expect("metadata column")
        .as_any()
        .downcast_ref::<StructArray>()
        .expect("struct column");

    let valid_rows: Vec<usize> = (0..metadata_column.len())
        .filter(|&row| metadata_column.is_valid(row))
        .collect();
    assert_eq!(valid_rows.len(), 1);

    let names = metadata_column
        .column_by_name("name")
        .expect("name field")
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("string field");
    assert_eq!(names.value(valid_rows[0]), "final name");

    let descriptions = metadata_column
        .column_by_name("description")
        .expect("description field")
        .as_any()
        .downcast_ref::<StringArray>()
        .expect("string field");
    assert_eq!(descriptions.value(valid_rows[0]), "final desc");
    Ok(())
}

/// Scenario: checkpoint a branch, delete every commit artifact, and recover
/// the full state from the checkpoint alone.
#[tokio::test]
async fn checkpoint_enables_replay_without_commit_artifacts() -> TestResult {
    let tmp = TempDir::new()?;
    let log = create_format4_log(&tmp).await?;
    let original = MetadataSnapshot::load(&log, None).await?.metadata()?.clone();

    for i in 0..4 {
        commit_metadata_rename(&log, &format!("name {i}"), &format!("desc {i}")).await?;
    }
    assert_eq!(log.version(META_BRANCH_ID).await?, 5);

    log.checkpoint(META_BRANCH_ID).await?;

    let pointer_path = tmp.path().join("_deeplake_log/_meta/_last_checkpoint.json");
    let pointer: LastCheckpoint =
        serde_json::from_slice(&tokio::fs::read(&pointer_path).await?)?;
    assert_eq!(pointer.version, 5);

    delete_commit_artifacts(tmp.path(), META_BRANCH_ID).await?;
    assert!(
        !tmp.path()
            .join("_deeplake_log/_meta/00000000000000000001.json")
            .exists()
    );

    let reopened = open(LogLocation::local(tmp.path()))
        .await?
        .into_format4()
        .expect("format 4 log");
    assert_eq!(reopened.version(META_BRANCH_ID).await?, 5);

    let meta = MetadataSnapshot::load(&reopened, None).await?;
    assert_eq!(meta.metadata()?.id, original.id);
    assert_eq!(meta.metadata()?.name.as_deref(), Some("name 3"));
    Ok(())
}

/// Reading via checkpoint-then-tail yields the same action list as pure
/// replay.
#[tokio::test]
async fn checkpoint_and_replay_reconstruct_identically() -> TestResult {
    let tmp = TempDir::new()?;
    let log = create_format4_log(&tmp).await?;
    let main_id = MetadataSnapshot::load(&log, None)
        .await?
        .find_branch("main")?
        .id
        .clone();

    for i in 0..3u64 {
        log.commit(
            &main_id,
            i,
            &[Action::Add(AddFileAction::new(
                format!("data/{i}"),
                "chunk",
                i,
                45,
                true,
                i,
            ))],
        )
        .await?;
    }

    let (replayed, replay_version) = log.get_actions(&main_id, None).await?;

    log.checkpoint(&main_id).await?;
    let (checkpointed, checkpoint_version) = log.get_actions(&main_id, None).await?;

    assert_eq!(replay_version, checkpoint_version);
    assert_eq!(replayed, checkpointed);

    // Commits after the checkpoint are folded on top of it.
    log.commit(
        &main_id,
        3,
        &[Action::Add(AddFileAction::new("data/3", "chunk", 3, 45, true, 3))],
    )
    .await?;
    let (with_tail, tail_version) = log.get_actions(&main_id, None).await?;

    assert_eq!(tail_version, 4);
    assert_eq!(with_tail.len(), replayed.len() + 1);
    assert_eq!(&with_tail[..replayed.len()], &replayed[..]);
    Ok(())
}

#[tokio::test]
async fn checkpoint_is_idempotent_for_a_fixed_version() -> TestResult {
    let tmp = TempDir::new()?;
    let log = create_format4_log(&tmp).await?;
    commit_metadata_rename(&log, "stable", "stable").await?;

    log.checkpoint(META_BRANCH_ID).await?;
    let (first, first_version) = log.get_actions(META_BRANCH_ID, None).await?;

    log.checkpoint(META_BRANCH_ID).await?;
    let (second, second_version) = log.get_actions(META_BRANCH_ID, None).await?;

    assert_eq!(first_version, second_version);
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn checkpoint_artifacts_use_padded_names() -> TestResult {
    let tmp = TempDir::new()?;
    let log = create_format4_log(&tmp).await?;

    log.checkpoint(META_BRANCH_ID).await?;

    let meta_dir = tmp.path().join("_deeplake_log/_meta");
    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(&meta_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }

    assert!(names.contains(&"00000000000000000001.checkpoint.parquet".to_string()));
    assert!(names.contains(&"_last_checkpoint.json".to_string()));

    for name in names {
        if let Some(stem) = name.strip_suffix(".checkpoint.parquet") {
            assert_eq!(stem.len(), 20);
            assert!(stem.chars().all(|c| c.is_ascii_digit()));
        } else if let Some(stem) = name.strip_suffix(".json") {
            if name != "_last_checkpoint.json" {
                assert_eq!(stem.len(), 20);
                assert!(stem.chars().all(|c| c.is_ascii_digit()));
            }
        }
    }
    Ok(())
}

/// The pointer's `size` field mirrors the artifact length but is not
/// consumed on read; a checkpoint with a foreign size value still loads.
#[tokio::test]
async fn pointer_size_field_is_informational() -> TestResult {
    let tmp = TempDir::new()?;
    let log = create_format4_log(&tmp).await?;
    log.checkpoint(META_BRANCH_ID).await?;

    let pointer_path = tmp.path().join("_deeplake_log/_meta/_last_checkpoint.json");
    let pointer: LastCheckpoint =
        serde_json::from_slice(&tokio::fs::read(&pointer_path).await?)?;
    let artifact = tmp
        .path()
        .join("_deeplake_log/_meta/00000000000000000001.checkpoint.parquet");
    assert_eq!(pointer.size, tokio::fs::metadata(&artifact).await?.len());

    // Rewrite the pointer with the constant historical size.
    let foreign = LastCheckpoint { version: pointer.version, size: 3013 };
    tokio::fs::write(&pointer_path, serde_json::to_vec(&foreign)?).await?;

    assert_eq!(log.version(META_BRANCH_ID).await?, 1);
    Ok(())
}

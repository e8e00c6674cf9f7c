//! Checkpointing: collapsing a branch's history into a columnar artifact.
//!
//! A checkpoint at version `K` holds the replace-folded action list over
//! commits `1..=K` as one Parquet table conforming to the unified schema,
//! sentinel row last, so readers can recover state without replaying the
//! commits it covers. The `_last_checkpoint.json` pointer makes a checkpoint
//! authoritative; earlier checkpoint files may remain on storage and are
//! ignored. Checkpoints are idempotent and safe to overlap with readers and
//! with each other: artifacts are published atomically and the last pointer
//! write wins.
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use log::debug;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};

use crate::storage::{self, LogLocation};
use crate::transaction_log::log_store::{TransactionLog, zero_pad};
use crate::transaction_log::schema::{
    batch_of_actions, unified_schema, validate_unified_schema, version_row,
};
use crate::transaction_log::{CorruptLogSnafu, LAST_CHECKPOINT_FILE, LogResult};

/// Contents of the `_last_checkpoint.json` pointer file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCheckpoint {
    /// The branch version the checkpoint collapses.
    pub version: u64,
    /// Byte length of the checkpoint artifact. Kept for wire compatibility;
    /// readers do not consume it.
    pub size: u64,
}

pub(crate) fn checkpoint_rel_path(branch_dir: &str, version: u64) -> String {
    format!("{branch_dir}/{}.checkpoint.parquet", zero_pad(version))
}

/// Read the checkpoint table of `branch_dir` at `version` and validate it
/// against the unified schema.
pub(crate) async fn read_checkpoint(
    location: &LogLocation,
    branch_dir: &str,
    version: u64,
) -> LogResult<Vec<RecordBatch>> {
    let rel = checkpoint_rel_path(branch_dir, version);
    let bytes = storage::get_bytes(location, &rel).await?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(Bytes::from(bytes)).map_err(|e| {
        CorruptLogSnafu {
            msg: format!("failed to open checkpoint {rel}: {e}"),
        }
        .build()
    })?;
    validate_unified_schema(builder.schema())?;

    let reader = builder.build().map_err(|e| {
        CorruptLogSnafu {
            msg: format!("failed to read checkpoint {rel}: {e}"),
        }
        .build()
    })?;
    reader.collect::<Result<Vec<_>, _>>().map_err(|e| {
        CorruptLogSnafu {
            msg: format!("failed to decode checkpoint {rel}: {e}"),
        }
        .build()
    })
}

impl TransactionLog {
    /// Fold the branch's current action set into a Snappy-compressed Parquet
    /// artifact and publish the pointer declaring it the newest checkpoint.
    pub async fn checkpoint(&self, branch_id: &str) -> LogResult<()> {
        let version = self.version(branch_id).await?;
        let (actions, _) = self.get_actions(branch_id, Some(version)).await?;
        debug!(
            "checkpointing branch '{branch_id}' at version {version} with {} actions",
            actions.len()
        );

        let folded = batch_of_actions(&actions)?;
        let sentinel = version_row(version)?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut buffer: Vec<u8> = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, unified_schema(), Some(props))
            .map_err(|e| {
                CorruptLogSnafu {
                    msg: format!("failed to start checkpoint writer: {e}"),
                }
                .build()
            })?;
        for batch in [&folded, &sentinel] {
            writer.write(batch).map_err(|e| {
                CorruptLogSnafu {
                    msg: format!("failed to write checkpoint table: {e}"),
                }
                .build()
            })?;
        }
        writer.close().map_err(|e| {
            CorruptLogSnafu {
                msg: format!("failed to finish checkpoint table: {e}"),
            }
            .build()
        })?;

        let branch_dir = Self::branch_dir(branch_id);
        let pointer = LastCheckpoint {
            version,
            size: buffer.len() as u64,
        };

        storage::set_bytes(
            self.location(),
            &checkpoint_rel_path(&branch_dir, version),
            &buffer,
        )
        .await?;

        let pointer_bytes = serde_json::to_vec(&pointer).map_err(|e| {
            CorruptLogSnafu {
                msg: format!("failed to serialize checkpoint pointer: {e}"),
            }
            .build()
        })?;
        storage::set_bytes(
            self.location(),
            &format!("{branch_dir}/{LAST_CHECKPOINT_FILE}"),
            &pointer_bytes,
        )
        .await?;

        Ok(())
    }
}

//! The unified table schema and its row codec.
//!
//! Reconstruction and checkpointing share one fixed schema: a nullable
//! struct column per action variant plus a nullable `version` column. Each
//! row holds exactly one non-null action cell, except the *version sentinel
//! row* appended last, which holds only the tip version and carries it
//! through the same pipeline as the actions.
use std::sync::{Arc, OnceLock};

use arrow::array::{
    Array, ArrayRef, BooleanArray, Int64Array, StringArray, StructArray, UInt32Array, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use snafu::prelude::*;

use crate::transaction_log::actions::{
    Action, AddFileAction, CreateBranchAction, CreateCommitAction, MetadataAction, ProtocolAction,
    apply_action,
};
use crate::transaction_log::tensor::CreateTensorAction;
use crate::transaction_log::{CorruptLogSnafu, LogResult, UnknownActionSnafu};

/// Name of the tip-version sentinel column.
pub const VERSION_COLUMN: &str = "version";

/// The unified schema composing all action variants as nullable struct
/// columns plus the version column.
pub fn unified_schema() -> SchemaRef {
    static SCHEMA: OnceLock<SchemaRef> = OnceLock::new();
    SCHEMA
        .get_or_init(|| {
            Arc::new(Schema::new(vec![
                Field::new(
                    ProtocolAction::TAG,
                    DataType::Struct(ProtocolAction::fields()),
                    true,
                ),
                Field::new(
                    MetadataAction::TAG,
                    DataType::Struct(MetadataAction::fields()),
                    true,
                ),
                Field::new(
                    AddFileAction::TAG,
                    DataType::Struct(AddFileAction::fields()),
                    true,
                ),
                Field::new(
                    CreateBranchAction::TAG,
                    DataType::Struct(CreateBranchAction::fields()),
                    true,
                ),
                Field::new(
                    CreateTensorAction::TAG,
                    DataType::Struct(CreateTensorAction::fields()),
                    true,
                ),
                Field::new(
                    CreateCommitAction::TAG,
                    DataType::Struct(CreateCommitAction::fields()),
                    true,
                ),
                Field::new(VERSION_COLUMN, DataType::UInt64, true),
            ]))
        })
        .clone()
}

/// Check that a table read back from storage matches the unified schema.
pub fn validate_unified_schema(schema: &Schema) -> LogResult<()> {
    let expected = unified_schema();
    ensure!(
        schema.fields() == expected.fields(),
        CorruptLogSnafu {
            msg: format!("table schema does not match the unified schema: {schema}"),
        }
    );
    Ok(())
}

/// Encode an ordered action list as unified-schema rows, one row per action,
/// with the version column all-null.
pub fn batch_of_actions(actions: &[Action]) -> LogResult<RecordBatch> {
    macro_rules! rows_of {
        ($variant:ident) => {
            actions
                .iter()
                .map(|a| match a {
                    Action::$variant(inner) => Some(inner),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(ProtocolAction::to_struct_array(&rows_of!(Protocol))),
        Arc::new(MetadataAction::to_struct_array(&rows_of!(Metadata))),
        Arc::new(AddFileAction::to_struct_array(&rows_of!(Add))),
        Arc::new(CreateBranchAction::to_struct_array(&rows_of!(CreateBranch))),
        Arc::new(CreateTensorAction::to_struct_array(&rows_of!(CreateTensor))),
        Arc::new(CreateCommitAction::to_struct_array(&rows_of!(CreateCommit))),
        Arc::new(UInt64Array::new_null(actions.len())),
    ];

    RecordBatch::try_new(unified_schema(), columns).map_err(|e| {
        CorruptLogSnafu {
            msg: format!("failed to assemble action table: {e}"),
        }
        .build()
    })
}

/// The version sentinel row: all action columns null, `version` set to the
/// highest observed commit version.
pub fn version_row(version: u64) -> LogResult<RecordBatch> {
    let schema = unified_schema();
    let columns: Vec<ArrayRef> = schema
        .fields()
        .iter()
        .map(|field| match field.data_type() {
            DataType::Struct(fields) => {
                Arc::new(StructArray::new_null(fields.clone(), 1)) as ArrayRef
            }
            _ => Arc::new(UInt64Array::from(vec![version])) as ArrayRef,
        })
        .collect();

    RecordBatch::try_new(schema, columns).map_err(|e| {
        CorruptLogSnafu {
            msg: format!("failed to assemble version row: {e}"),
        }
        .build()
    })
}

fn struct_cells<'a>(tag: &str, column: &'a ArrayRef) -> LogResult<&'a StructArray> {
    column
        .as_any()
        .downcast_ref::<StructArray>()
        .with_context(|| CorruptLogSnafu {
            msg: format!("column '{tag}' is not a struct column"),
        })
}

fn decode_cell(tag: &str, column: &ArrayRef, row: usize) -> LogResult<Action> {
    match tag {
        ProtocolAction::TAG => Ok(Action::Protocol(ProtocolAction::from_struct_row(
            struct_cells(tag, column)?,
            row,
        )?)),
        MetadataAction::TAG => Ok(Action::Metadata(MetadataAction::from_struct_row(
            struct_cells(tag, column)?,
            row,
        )?)),
        AddFileAction::TAG => Ok(Action::Add(AddFileAction::from_struct_row(
            struct_cells(tag, column)?,
            row,
        )?)),
        CreateBranchAction::TAG => Ok(Action::CreateBranch(CreateBranchAction::from_struct_row(
            struct_cells(tag, column)?,
            row,
        )?)),
        CreateTensorAction::TAG => Ok(Action::CreateTensor(CreateTensorAction::from_struct_row(
            struct_cells(tag, column)?,
            row,
        )?)),
        CreateCommitAction::TAG => Ok(Action::CreateCommit(CreateCommitAction::from_struct_row(
            struct_cells(tag, column)?,
            row,
        )?)),
        _ => UnknownActionSnafu { name: tag }.fail(),
    }
}

/// Decode unified-schema rows in order into the replace-folded action list
/// and the tip version carried by the sentinel rows.
pub fn decode_batch(batch: &RecordBatch) -> LogResult<(Vec<Action>, u64)> {
    let schema = batch.schema();
    let mut actions: Vec<Action> = Vec::new();
    let mut version: u64 = 0;

    for row in 0..batch.num_rows() {
        for (field, column) in schema.fields().iter().zip(batch.columns()) {
            if column.is_null(row) {
                continue;
            }
            if field.name() == VERSION_COLUMN {
                let cells = column
                    .as_any()
                    .downcast_ref::<UInt64Array>()
                    .with_context(|| CorruptLogSnafu {
                        msg: "version column is not u64".to_string(),
                    })?;
                version = cells.value(row);
            } else {
                let action = decode_cell(field.name(), column, row)?;
                apply_action(&mut actions, action);
            }
        }
    }

    Ok((actions, version))
}

pub(crate) fn typed_column<'a, A: Array + 'static>(
    array: &'a StructArray,
    name: &str,
) -> LogResult<&'a A> {
    let column = array.column_by_name(name).with_context(|| CorruptLogSnafu {
        msg: format!("missing field '{name}' in action struct"),
    })?;
    column
        .as_any()
        .downcast_ref::<A>()
        .with_context(|| CorruptLogSnafu {
            msg: format!("field '{name}' has an unexpected type"),
        })
}

pub(crate) fn opt_str(array: &StructArray, name: &str, row: usize) -> LogResult<Option<String>> {
    let cells = typed_column::<StringArray>(array, name)?;
    Ok(cells.is_valid(row).then(|| cells.value(row).to_string()))
}

pub(crate) fn req_str(array: &StructArray, name: &str, row: usize) -> LogResult<String> {
    opt_str(array, name, row)?.with_context(|| CorruptLogSnafu {
        msg: format!("missing required field '{name}'"),
    })
}

pub(crate) fn opt_u64(array: &StructArray, name: &str, row: usize) -> LogResult<Option<u64>> {
    let cells = typed_column::<UInt64Array>(array, name)?;
    Ok(cells.is_valid(row).then(|| cells.value(row)))
}

pub(crate) fn req_u64(array: &StructArray, name: &str, row: usize) -> LogResult<u64> {
    opt_u64(array, name, row)?.with_context(|| CorruptLogSnafu {
        msg: format!("missing required field '{name}'"),
    })
}

pub(crate) fn req_u32(array: &StructArray, name: &str, row: usize) -> LogResult<u32> {
    let cells = typed_column::<UInt32Array>(array, name)?;
    cells
        .is_valid(row)
        .then(|| cells.value(row))
        .with_context(|| CorruptLogSnafu {
            msg: format!("missing required field '{name}'"),
        })
}

pub(crate) fn req_i64(array: &StructArray, name: &str, row: usize) -> LogResult<i64> {
    let cells = typed_column::<Int64Array>(array, name)?;
    cells
        .is_valid(row)
        .then(|| cells.value(row))
        .with_context(|| CorruptLogSnafu {
            msg: format!("missing required field '{name}'"),
        })
}

pub(crate) fn opt_bool(array: &StructArray, name: &str, row: usize) -> LogResult<Option<bool>> {
    let cells = typed_column::<BooleanArray>(array, name)?;
    Ok(cells.is_valid(row).then(|| cells.value(row)))
}

pub(crate) fn req_bool(array: &StructArray, name: &str, row: usize) -> LogResult<bool> {
    opt_bool(array, name, row)?.with_context(|| CorruptLogSnafu {
        msg: format!("missing required field '{name}'"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction_log::LogError;
    use arrow::compute::concat_batches;

    fn sample_actions() -> Vec<Action> {
        vec![
            Action::Protocol(ProtocolAction::new(4, 4)),
            Action::Metadata(MetadataAction::new("d1", Some("ds".into()), None, 9)),
            Action::Add(AddFileAction::new("a/b", "chunk", 3, 45, true, 3)),
            Action::CreateBranch(CreateBranchAction::new("b1", "main", None, None)),
            Action::CreateCommit(CreateCommitAction::new("c1", "b1", 1, Some("init".into()), 7)),
        ]
    }

    #[test]
    fn batch_has_one_non_null_cell_per_action_row() {
        let actions = sample_actions();
        let batch = batch_of_actions(&actions).expect("batch");

        assert_eq!(batch.num_rows(), actions.len());
        for row in 0..batch.num_rows() {
            let non_null = batch.columns().iter().filter(|c| c.is_valid(row)).count();
            assert_eq!(non_null, 1, "row {row} must hold exactly one cell");
        }
    }

    #[test]
    fn version_row_is_all_null_except_version() {
        let batch = version_row(17).expect("version row");

        assert_eq!(batch.num_rows(), 1);
        for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
            if field.name() == VERSION_COLUMN {
                assert!(column.is_valid(0));
            } else {
                assert!(column.is_null(0), "column {} must be null", field.name());
            }
        }
    }

    #[test]
    fn encode_then_decode_recovers_actions_and_version() {
        let actions = sample_actions();
        let batch = batch_of_actions(&actions).expect("batch");
        let sentinel = version_row(5).expect("sentinel");
        let table =
            concat_batches(&unified_schema(), [&batch, &sentinel]).expect("concatenate tables");

        let (decoded, version) = decode_batch(&table).expect("decode");

        assert_eq!(version, 5);
        assert_eq!(decoded, actions);
    }

    #[test]
    fn decode_applies_replace_folding_in_row_order() {
        let first = Action::Metadata(MetadataAction::new("d1", Some("first".into()), None, 1));
        let second = Action::Metadata(MetadataAction::new("d1", Some("final".into()), None, 1));
        let batch = batch_of_actions(&[first, second]).expect("batch");

        let (decoded, _) = decode_batch(&batch).expect("decode");

        assert_eq!(decoded.len(), 1);
        assert!(matches!(
            &decoded[0],
            Action::Metadata(m) if m.name.as_deref() == Some("final")
        ));
    }

    #[test]
    fn unknown_column_name_is_rejected() {
        let protocol = ProtocolAction::new(4, 4);
        let cells = ProtocolAction::to_struct_array(&[Some(&protocol)]);
        let schema = Arc::new(Schema::new(vec![Field::new(
            "mystery",
            DataType::Struct(ProtocolAction::fields()),
            true,
        )]));
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(cells) as ArrayRef]).expect("batch");

        let err = decode_batch(&batch).expect_err("unknown column");
        assert!(matches!(err, LogError::UnknownAction { name, .. } if name == "mystery"));
    }

    #[test]
    fn schema_validation_flags_mismatch() {
        let other = Schema::new(vec![Field::new("version", DataType::UInt64, true)]);
        let err = validate_unified_schema(&other).expect_err("mismatch");
        assert!(matches!(err, LogError::CorruptLog { .. }));

        validate_unified_schema(&unified_schema()).expect("unified schema is valid");
    }
}

//! The tensor declaration variant.
//!
//! Separated from the other variants because of its nested columnar shape:
//! `links` is an Arrow map of [`TensorLink`] structs and the shape bounds are
//! `u64` lists. The link map is kept in a `BTreeMap` so both encodings are
//! byte-stable across rewrites of the same action set.
use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, ListBuilder, MapArray, StringArray, StructArray, UInt64Array,
    UInt64Builder,
};
use arrow::buffer::{NullBuffer, OffsetBuffer};
use arrow::datatypes::{DataType, Field, Fields};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::transaction_log::schema::{
    opt_bool, opt_str, opt_u64, req_bool, req_str, req_u64, typed_column,
};
use crate::transaction_log::{CorruptLogSnafu, LogResult};

/// Declares a tensor schema on a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTensorAction {
    /// Freshly generated tensor id.
    pub id: String,
    /// Tensor name, unique within the dataset.
    pub name: String,
    /// Element dtype, absent until the first sample fixes it.
    pub dtype: Option<String>,
    /// Semantic type, e.g. `"generic"` or `"image"`.
    pub htype: String,
    /// Number of samples currently in the tensor.
    pub length: u64,
    /// Whether samples are links to external data.
    pub is_link: bool,
    /// Whether samples are sequences.
    pub is_sequence: bool,
    /// Hidden tensors are maintained internally and not user-visible.
    pub hidden: bool,
    /// Chunk-level compression, if any.
    pub chunk_compression: Option<String>,
    /// Sample-level compression, if any.
    pub sample_compression: Option<String>,
    /// Derived tensors kept in sync with this one, keyed by link name.
    pub links: BTreeMap<String, TensorLink>,
    /// Maximum chunk size in bytes.
    pub max_chunk_size: Option<u64>,
    /// Per-dimension lower bound over all sample shapes.
    pub min_shape: Vec<u64>,
    /// Per-dimension upper bound over all sample shapes.
    pub max_shape: Vec<u64>,
    /// Extra dtype qualifier, if any.
    pub dtype_meta: Option<String>,
    /// Array-protocol type string, if any.
    pub typestr: Option<String>,
    /// Whether sample integrity is verified on ingest.
    pub verify: bool,
    /// Tensor format version.
    pub version: String,
}

/// A derived-tensor link: how a linked tensor is extended and updated when
/// its source tensor changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorLink {
    /// Callback applied when the source tensor is extended.
    pub extend: String,
    /// Whether sequence samples are flattened before the callback.
    pub flatten_sequence: Option<bool>,
    /// Callback applied when a source sample is updated.
    pub update: String,
}

impl TensorLink {
    pub fn new(extend: impl Into<String>, flatten_sequence: Option<bool>, update: impl Into<String>) -> Self {
        Self {
            extend: extend.into(),
            flatten_sequence,
            update: update.into(),
        }
    }

    pub fn fields() -> Fields {
        Fields::from(vec![
            Field::new("extend", DataType::Utf8, true),
            Field::new("flatten_sequence", DataType::Boolean, true),
            Field::new("update", DataType::Utf8, true),
        ])
    }

    fn from_struct_row(array: &StructArray, row: usize) -> LogResult<Self> {
        Ok(Self {
            extend: req_str(array, "extend", row)?,
            flatten_sequence: opt_bool(array, "flatten_sequence", row)?,
            update: req_str(array, "update", row)?,
        })
    }
}

fn links_entry_fields() -> Fields {
    Fields::from(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Struct(TensorLink::fields()), true),
    ])
}

fn links_data_type() -> DataType {
    DataType::Map(
        Arc::new(Field::new(
            "entries",
            DataType::Struct(links_entry_fields()),
            false,
        )),
        false,
    )
}

fn shape_data_type() -> DataType {
    DataType::List(Arc::new(Field::new_list_field(DataType::UInt64, true)))
}

fn shape_array(rows: &[Option<&CreateTensorAction>], pick: impl Fn(&CreateTensorAction) -> &[u64]) -> ArrayRef {
    let mut builder = ListBuilder::new(UInt64Builder::new());
    for row in rows {
        match row {
            Some(action) => {
                builder.values().append_slice(pick(action));
                builder.append(true);
            }
            None => builder.append(false),
        }
    }
    Arc::new(builder.finish())
}

fn links_array(rows: &[Option<&CreateTensorAction>]) -> MapArray {
    let mut keys: Vec<&str> = Vec::new();
    let mut extends: Vec<&str> = Vec::new();
    let mut flattens: Vec<Option<bool>> = Vec::new();
    let mut updates: Vec<&str> = Vec::new();
    let mut offsets: Vec<i32> = vec![0];

    for row in rows {
        if let Some(action) = row {
            for (name, link) in &action.links {
                keys.push(name.as_str());
                extends.push(link.extend.as_str());
                flattens.push(link.flatten_sequence);
                updates.push(link.update.as_str());
            }
        }
        offsets.push(keys.len() as i32);
    }

    let link_values = StructArray::new(
        TensorLink::fields(),
        vec![
            Arc::new(StringArray::from(extends)) as ArrayRef,
            Arc::new(BooleanArray::from(flattens)),
            Arc::new(StringArray::from(updates)),
        ],
        None,
    );
    let entries = StructArray::new(
        links_entry_fields(),
        vec![Arc::new(StringArray::from(keys)) as ArrayRef, Arc::new(link_values)],
        None,
    );
    let nulls: NullBuffer = rows.iter().map(Option::is_some).collect();

    MapArray::new(
        Arc::new(Field::new("entries", DataType::Struct(links_entry_fields()), false)),
        OffsetBuffer::new(offsets.into()),
        entries,
        Some(nulls),
        false,
    )
}

fn links_from_row(array: &StructArray, row: usize) -> LogResult<BTreeMap<String, TensorLink>> {
    let map = typed_column::<MapArray>(array, "links")?;
    let mut links = BTreeMap::new();
    if map.is_null(row) {
        return Ok(links);
    }

    let keys = map
        .keys()
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| CorruptLogSnafu {
            msg: "tensor link keys are not strings".to_string(),
        })?;
    let values = map
        .values()
        .as_any()
        .downcast_ref::<StructArray>()
        .with_context(|| CorruptLogSnafu {
            msg: "tensor link values are not structs".to_string(),
        })?;

    let offsets = map.value_offsets();
    for entry in offsets[row]..offsets[row + 1] {
        let entry = entry as usize;
        links.insert(
            keys.value(entry).to_string(),
            TensorLink::from_struct_row(values, entry)?,
        );
    }
    Ok(links)
}

fn shape_from_row(array: &StructArray, name: &str, row: usize) -> LogResult<Vec<u64>> {
    let list = typed_column::<arrow::array::ListArray>(array, name)?;
    if list.is_null(row) {
        return Ok(Vec::new());
    }
    let values = list.value(row);
    let values = values
        .as_any()
        .downcast_ref::<UInt64Array>()
        .with_context(|| CorruptLogSnafu {
            msg: format!("tensor field '{name}' is not a u64 list"),
        })?;
    Ok(values.iter().flatten().collect())
}

impl CreateTensorAction {
    pub const TAG: &'static str = "tensor";

    pub fn fields() -> Fields {
        Fields::from(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("dtype", DataType::Utf8, true),
            Field::new("htype", DataType::Utf8, true),
            Field::new("length", DataType::UInt64, true),
            Field::new("is_link", DataType::Boolean, true),
            Field::new("is_sequence", DataType::Boolean, true),
            Field::new("hidden", DataType::Boolean, true),
            Field::new("chunk_compression", DataType::Utf8, true),
            Field::new("sample_compression", DataType::Utf8, true),
            Field::new("links", links_data_type(), true),
            Field::new("max_chunk_size", DataType::UInt64, true),
            Field::new("min_shape", shape_data_type(), true),
            Field::new("max_shape", shape_data_type(), true),
            Field::new("dtype_meta", DataType::Utf8, true),
            Field::new("typestr", DataType::Utf8, true),
            Field::new("verify", DataType::Boolean, true),
            Field::new("version", DataType::Utf8, true),
        ])
    }

    pub(crate) fn to_struct_array(rows: &[Option<&Self>]) -> StructArray {
        let id: StringArray = rows.iter().map(|r| r.map(|a| a.id.as_str())).collect();
        let name: StringArray = rows.iter().map(|r| r.map(|a| a.name.as_str())).collect();
        let dtype: StringArray = rows.iter().map(|r| r.and_then(|a| a.dtype.as_deref())).collect();
        let htype: StringArray = rows.iter().map(|r| r.map(|a| a.htype.as_str())).collect();
        let length: UInt64Array = rows.iter().map(|r| r.map(|a| a.length)).collect();
        let is_link: BooleanArray = rows.iter().map(|r| r.map(|a| a.is_link)).collect();
        let is_sequence: BooleanArray = rows.iter().map(|r| r.map(|a| a.is_sequence)).collect();
        let hidden: BooleanArray = rows.iter().map(|r| r.map(|a| a.hidden)).collect();
        let chunk_compression: StringArray = rows
            .iter()
            .map(|r| r.and_then(|a| a.chunk_compression.as_deref()))
            .collect();
        let sample_compression: StringArray = rows
            .iter()
            .map(|r| r.and_then(|a| a.sample_compression.as_deref()))
            .collect();
        let max_chunk_size: UInt64Array = rows.iter().map(|r| r.and_then(|a| a.max_chunk_size)).collect();
        let dtype_meta: StringArray = rows
            .iter()
            .map(|r| r.and_then(|a| a.dtype_meta.as_deref()))
            .collect();
        let typestr: StringArray = rows.iter().map(|r| r.and_then(|a| a.typestr.as_deref())).collect();
        let verify: BooleanArray = rows.iter().map(|r| r.map(|a| a.verify)).collect();
        let version: StringArray = rows.iter().map(|r| r.map(|a| a.version.as_str())).collect();
        let nulls: NullBuffer = rows.iter().map(Option::is_some).collect();

        StructArray::new(
            Self::fields(),
            vec![
                Arc::new(id) as ArrayRef,
                Arc::new(name),
                Arc::new(dtype),
                Arc::new(htype),
                Arc::new(length),
                Arc::new(is_link),
                Arc::new(is_sequence),
                Arc::new(hidden),
                Arc::new(chunk_compression),
                Arc::new(sample_compression),
                Arc::new(links_array(rows)),
                Arc::new(max_chunk_size),
                shape_array(rows, |a| a.min_shape.as_slice()),
                shape_array(rows, |a| a.max_shape.as_slice()),
                Arc::new(dtype_meta),
                Arc::new(typestr),
                Arc::new(verify),
                Arc::new(version),
            ],
            Some(nulls),
        )
    }

    pub(crate) fn from_struct_row(array: &StructArray, row: usize) -> LogResult<Self> {
        Ok(Self {
            id: req_str(array, "id", row)?,
            name: req_str(array, "name", row)?,
            dtype: opt_str(array, "dtype", row)?,
            htype: req_str(array, "htype", row)?,
            length: req_u64(array, "length", row)?,
            is_link: req_bool(array, "is_link", row)?,
            is_sequence: req_bool(array, "is_sequence", row)?,
            hidden: req_bool(array, "hidden", row)?,
            chunk_compression: opt_str(array, "chunk_compression", row)?,
            sample_compression: opt_str(array, "sample_compression", row)?,
            links: links_from_row(array, row)?,
            max_chunk_size: opt_u64(array, "max_chunk_size", row)?,
            min_shape: shape_from_row(array, "min_shape", row)?,
            max_shape: shape_from_row(array, "max_shape", row)?,
            dtype_meta: opt_str(array, "dtype_meta", row)?,
            typestr: opt_str(array, "typestr", row)?,
            verify: req_bool(array, "verify", row)?,
            version: req_str(array, "version", row)?,
        })
    }
}

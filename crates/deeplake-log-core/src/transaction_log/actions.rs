//! The closed action variant set and its encodings.
//!
//! Every variant has a stable *tag* used both as the JSON key of its textual
//! encoding (`{"<tag>": {...}}`) and as its column name in the unified
//! schema. Each variant keeps its Arrow struct definition and row codec next
//! to the type so the schema cannot drift from the codec. The tensor variant
//! lives in [`super::tensor`] because of its nested link map.
//!
//! Replace semantics are a capability, not part of the base contract: only
//! variants implementing [`Replaces`] supersede earlier actions during
//! reconstruction, everything else appends. [`apply_action`] performs the
//! fold.
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Int64Array, StringArray, StructArray, UInt32Array, UInt64Array,
};
use arrow::buffer::NullBuffer;
use arrow::datatypes::{DataType, Field, Fields};
use serde::{Deserialize, Serialize};

use crate::transaction_log::schema::{opt_str, opt_u64, req_bool, req_i64, req_str, req_u32, req_u64};
use crate::transaction_log::tensor::CreateTensorAction;
use crate::transaction_log::{CorruptLogSnafu, LogResult};

/// One logical change to the dataset state.
///
/// The serde representation is externally tagged, which is exactly the wire
/// form of a commit artifact entry: a single-key JSON object mapping the tag
/// to the variant's fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Minimum compatible reader/writer format declaration.
    #[serde(rename = "protocol")]
    Protocol(ProtocolAction),

    /// Dataset identity and human metadata.
    #[serde(rename = "metadata")]
    Metadata(MetadataAction),

    /// An immutable data artifact recorded on a branch.
    #[serde(rename = "add")]
    Add(AddFileAction),

    /// Declaration of a new branch, optionally forked from another.
    #[serde(rename = "branch")]
    CreateBranch(CreateBranchAction),

    /// Declaration of a tensor schema.
    #[serde(rename = "tensor")]
    CreateTensor(CreateTensorAction),

    /// A named commit marker on a branch.
    #[serde(rename = "commit")]
    CreateCommit(CreateCommitAction),
}

impl Action {
    /// The stable tag of this action, shared by the JSON key and the unified
    /// schema column.
    pub fn tag(&self) -> &'static str {
        match self {
            Action::Protocol(_) => ProtocolAction::TAG,
            Action::Metadata(_) => MetadataAction::TAG,
            Action::Add(_) => AddFileAction::TAG,
            Action::CreateBranch(_) => CreateBranchAction::TAG,
            Action::CreateTensor(_) => CreateTensorAction::TAG,
            Action::CreateCommit(_) => CreateCommitAction::TAG,
        }
    }

    /// The replace capability of this action, if the variant opts in.
    pub fn as_replaces(&self) -> Option<&dyn Replaces> {
        match self {
            Action::Protocol(a) => Some(a),
            Action::Metadata(a) => Some(a),
            _ => None,
        }
    }
}

/// Replace capability: an action that supersedes or removes a prior action
/// of the same kind for the same subject during reconstruction.
pub trait Replaces {
    /// True iff `prior` is the subject this action supersedes.
    fn replaces(&self, prior: &Action) -> bool;

    /// The action taking the prior's place, or `None` to remove it.
    fn replace(&self, prior: &Action) -> Option<Action>;
}

/// Fold one action into the accumulated list.
///
/// Append-only actions push; replace actions locate the first prior they
/// supersede and substitute (or erase) it in place, keeping the order of
/// untouched entries intact. A replace action with no prior subject appends.
pub fn apply_action(actions: &mut Vec<Action>, action: Action) {
    let replaced = match action.as_replaces() {
        Some(replacer) => actions
            .iter()
            .position(|prior| replacer.replaces(prior))
            .map(|index| (index, replacer.replace(&actions[index]))),
        None => None,
    };

    match replaced {
        Some((index, Some(next))) => actions[index] = next,
        Some((index, None)) => {
            actions.remove(index);
        }
        None => actions.push(action),
    }
}

/// Serialize an ordered action batch as a commit artifact: the byte-wise
/// juxtaposition of per-action JSON objects, no enclosing array, no
/// separators.
pub fn encode_action_stream(actions: &[Action]) -> LogResult<Vec<u8>> {
    let mut out = Vec::new();
    for action in actions {
        serde_json::to_writer(&mut out, action).map_err(|e| {
            CorruptLogSnafu {
                msg: format!("failed to serialize {} action: {e}", action.tag()),
            }
            .build()
        })?;
    }
    Ok(out)
}

/// Parse a commit artifact back into its ordered actions.
///
/// The stream is a whitespace-tolerant sequence of JSON objects; both `null`
/// and omitted optional fields are accepted.
pub fn parse_action_stream(bytes: &[u8]) -> LogResult<Vec<Action>> {
    let mut actions = Vec::new();
    for entry in serde_json::Deserializer::from_slice(bytes).into_iter::<Action>() {
        let action = entry.map_err(|e| {
            CorruptLogSnafu {
                msg: format!("invalid action stream: {e}"),
            }
            .build()
        })?;
        actions.push(action);
    }
    Ok(actions)
}

/// Declares minimum compatible reader/writer format versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAction {
    /// Minimum log format a reader must understand.
    pub min_reader_version: u32,
    /// Minimum log format a writer must understand.
    pub min_writer_version: u32,
}

impl ProtocolAction {
    pub const TAG: &'static str = "protocol";

    pub fn new(min_reader_version: u32, min_writer_version: u32) -> Self {
        Self {
            min_reader_version,
            min_writer_version,
        }
    }

    pub fn fields() -> Fields {
        Fields::from(vec![
            Field::new("min_reader_version", DataType::UInt32, true),
            Field::new("min_writer_version", DataType::UInt32, true),
        ])
    }

    pub(crate) fn to_struct_array(rows: &[Option<&Self>]) -> StructArray {
        let min_reader: UInt32Array = rows.iter().map(|r| r.map(|a| a.min_reader_version)).collect();
        let min_writer: UInt32Array = rows.iter().map(|r| r.map(|a| a.min_writer_version)).collect();
        let nulls: NullBuffer = rows.iter().map(Option::is_some).collect();

        StructArray::new(
            Self::fields(),
            vec![Arc::new(min_reader) as ArrayRef, Arc::new(min_writer)],
            Some(nulls),
        )
    }

    pub(crate) fn from_struct_row(array: &StructArray, row: usize) -> LogResult<Self> {
        Ok(Self {
            min_reader_version: req_u32(array, "min_reader_version", row)?,
            min_writer_version: req_u32(array, "min_writer_version", row)?,
        })
    }
}

impl Replaces for ProtocolAction {
    fn replaces(&self, prior: &Action) -> bool {
        matches!(prior, Action::Protocol(_))
    }

    fn replace(&self, _prior: &Action) -> Option<Action> {
        Some(Action::Protocol(self.clone()))
    }
}

/// Dataset identity and human metadata; a singleton per branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataAction {
    /// Stable dataset id.
    pub id: String,
    /// Human-readable dataset name.
    pub name: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Creation time in epoch milliseconds.
    pub created_time: i64,
}

impl MetadataAction {
    pub const TAG: &'static str = "metadata";

    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        description: Option<String>,
        created_time: i64,
    ) -> Self {
        Self {
            id: id.into(),
            name,
            description,
            created_time,
        }
    }

    pub fn fields() -> Fields {
        Fields::from(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("description", DataType::Utf8, true),
            Field::new("created_time", DataType::Int64, true),
        ])
    }

    pub(crate) fn to_struct_array(rows: &[Option<&Self>]) -> StructArray {
        let id: StringArray = rows.iter().map(|r| r.map(|a| a.id.as_str())).collect();
        let name: StringArray = rows.iter().map(|r| r.and_then(|a| a.name.as_deref())).collect();
        let description: StringArray = rows
            .iter()
            .map(|r| r.and_then(|a| a.description.as_deref()))
            .collect();
        let created_time: Int64Array = rows.iter().map(|r| r.map(|a| a.created_time)).collect();
        let nulls: NullBuffer = rows.iter().map(Option::is_some).collect();

        StructArray::new(
            Self::fields(),
            vec![
                Arc::new(id) as ArrayRef,
                Arc::new(name),
                Arc::new(description),
                Arc::new(created_time),
            ],
            Some(nulls),
        )
    }

    pub(crate) fn from_struct_row(array: &StructArray, row: usize) -> LogResult<Self> {
        Ok(Self {
            id: req_str(array, "id", row)?,
            name: opt_str(array, "name", row)?,
            description: opt_str(array, "description", row)?,
            created_time: req_i64(array, "created_time", row)?,
        })
    }
}

impl Replaces for MetadataAction {
    fn replaces(&self, prior: &Action) -> bool {
        matches!(prior, Action::Metadata(_))
    }

    fn replace(&self, _prior: &Action) -> Option<Action> {
        Some(Action::Metadata(self.clone()))
    }
}

/// Declares a new branch, optionally forked from another branch at a
/// specific version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBranchAction {
    /// Freshly generated branch id.
    pub id: String,
    /// Human-readable branch name.
    pub name: String,
    /// Id of the branch this one was forked from, if any.
    pub from_branch: Option<String>,
    /// Version of the source branch at the fork point.
    pub from_version: Option<u64>,
}

impl CreateBranchAction {
    pub const TAG: &'static str = "branch";

    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        from_branch: Option<String>,
        from_version: Option<u64>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            from_branch,
            from_version,
        }
    }

    pub fn fields() -> Fields {
        Fields::from(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("name", DataType::Utf8, true),
            Field::new("from_branch", DataType::Utf8, true),
            Field::new("from_version", DataType::UInt64, true),
        ])
    }

    pub(crate) fn to_struct_array(rows: &[Option<&Self>]) -> StructArray {
        let id: StringArray = rows.iter().map(|r| r.map(|a| a.id.as_str())).collect();
        let name: StringArray = rows.iter().map(|r| r.map(|a| a.name.as_str())).collect();
        let from_branch: StringArray = rows
            .iter()
            .map(|r| r.and_then(|a| a.from_branch.as_deref()))
            .collect();
        let from_version: UInt64Array = rows.iter().map(|r| r.and_then(|a| a.from_version)).collect();
        let nulls: NullBuffer = rows.iter().map(Option::is_some).collect();

        StructArray::new(
            Self::fields(),
            vec![
                Arc::new(id) as ArrayRef,
                Arc::new(name),
                Arc::new(from_branch),
                Arc::new(from_version),
            ],
            Some(nulls),
        )
    }

    pub(crate) fn from_struct_row(array: &StructArray, row: usize) -> LogResult<Self> {
        Ok(Self {
            id: req_str(array, "id", row)?,
            name: req_str(array, "name", row)?,
            from_branch: opt_str(array, "from_branch", row)?,
            from_version: opt_u64(array, "from_version", row)?,
        })
    }
}

/// Records an immutable data artifact belonging to a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddFileAction {
    /// Path of the artifact, `/`-separated, relative to the dataset root.
    pub path: String,
    /// Artifact kind, e.g. `"chunk"`.
    #[serde(rename = "type")]
    pub file_type: String,
    /// Size in bytes.
    pub size: u64,
    /// Modification time in epoch milliseconds.
    pub modification_time: i64,
    /// Whether the artifact carries sample data (as opposed to derived
    /// metadata).
    pub data_file: bool,
    /// Number of samples contained in the artifact.
    pub num_samples: u64,
}

impl AddFileAction {
    pub const TAG: &'static str = "add";

    pub fn new(
        path: impl Into<String>,
        file_type: impl Into<String>,
        size: u64,
        modification_time: i64,
        data_file: bool,
        num_samples: u64,
    ) -> Self {
        Self {
            path: path.into(),
            file_type: file_type.into(),
            size,
            modification_time,
            data_file,
            num_samples,
        }
    }

    pub fn fields() -> Fields {
        Fields::from(vec![
            Field::new("path", DataType::Utf8, true),
            Field::new("type", DataType::Utf8, true),
            Field::new("size", DataType::UInt64, true),
            Field::new("modification_time", DataType::Int64, true),
            Field::new("data_file", DataType::Boolean, true),
            Field::new("num_samples", DataType::UInt64, true),
        ])
    }

    pub(crate) fn to_struct_array(rows: &[Option<&Self>]) -> StructArray {
        let path: StringArray = rows.iter().map(|r| r.map(|a| a.path.as_str())).collect();
        let file_type: StringArray = rows.iter().map(|r| r.map(|a| a.file_type.as_str())).collect();
        let size: UInt64Array = rows.iter().map(|r| r.map(|a| a.size)).collect();
        let modification_time: Int64Array =
            rows.iter().map(|r| r.map(|a| a.modification_time)).collect();
        let data_file: BooleanArray = rows.iter().map(|r| r.map(|a| a.data_file)).collect();
        let num_samples: UInt64Array = rows.iter().map(|r| r.map(|a| a.num_samples)).collect();
        let nulls: NullBuffer = rows.iter().map(Option::is_some).collect();

        StructArray::new(
            Self::fields(),
            vec![
                Arc::new(path) as ArrayRef,
                Arc::new(file_type),
                Arc::new(size),
                Arc::new(modification_time),
                Arc::new(data_file),
                Arc::new(num_samples),
            ],
            Some(nulls),
        )
    }

    pub(crate) fn from_struct_row(array: &StructArray, row: usize) -> LogResult<Self> {
        Ok(Self {
            path: req_str(array, "path", row)?,
            file_type: req_str(array, "type", row)?,
            size: req_u64(array, "size", row)?,
            modification_time: req_i64(array, "modification_time", row)?,
            data_file: req_bool(array, "data_file", row)?,
            num_samples: req_u64(array, "num_samples", row)?,
        })
    }
}

/// A named commit marker recorded on a branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCommitAction {
    /// Freshly generated commit id.
    pub id: String,
    /// The branch the marker belongs to.
    pub branch_id: String,
    /// The branch version the marker names.
    pub branch_version: u64,
    /// Optional commit message.
    pub message: Option<String>,
    /// Commit time in epoch milliseconds.
    pub commit_time: i64,
}

impl CreateCommitAction {
    pub const TAG: &'static str = "commit";

    pub fn new(
        id: impl Into<String>,
        branch_id: impl Into<String>,
        branch_version: u64,
        message: Option<String>,
        commit_time: i64,
    ) -> Self {
        Self {
            id: id.into(),
            branch_id: branch_id.into(),
            branch_version,
            message,
            commit_time,
        }
    }

    pub fn fields() -> Fields {
        Fields::from(vec![
            Field::new("id", DataType::Utf8, true),
            Field::new("branch_id", DataType::Utf8, true),
            Field::new("branch_version", DataType::UInt64, true),
            Field::new("message", DataType::Utf8, true),
            Field::new("commit_time", DataType::Int64, true),
        ])
    }

    pub(crate) fn to_struct_array(rows: &[Option<&Self>]) -> StructArray {
        let id: StringArray = rows.iter().map(|r| r.map(|a| a.id.as_str())).collect();
        let branch_id: StringArray = rows.iter().map(|r| r.map(|a| a.branch_id.as_str())).collect();
        let branch_version: UInt64Array = rows.iter().map(|r| r.map(|a| a.branch_version)).collect();
        let message: StringArray = rows
            .iter()
            .map(|r| r.and_then(|a| a.message.as_deref()))
            .collect();
        let commit_time: Int64Array = rows.iter().map(|r| r.map(|a| a.commit_time)).collect();
        let nulls: NullBuffer = rows.iter().map(Option::is_some).collect();

        StructArray::new(
            Self::fields(),
            vec![
                Arc::new(id) as ArrayRef,
                Arc::new(branch_id),
                Arc::new(branch_version),
                Arc::new(message),
                Arc::new(commit_time),
            ],
            Some(nulls),
        )
    }

    pub(crate) fn from_struct_row(array: &StructArray, row: usize) -> LogResult<Self> {
        Ok(Self {
            id: req_str(array, "id", row)?,
            branch_id: req_str(array, "branch_id", row)?,
            branch_version: req_u64(array, "branch_version", row)?,
            message: opt_str(array, "message", row)?,
            commit_time: req_i64(array, "commit_time", row)?,
        })
    }
}

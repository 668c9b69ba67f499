use crate::address::CellKey;
use ahash::AHashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::Display;

/// Captured contents of one cell. Absence of a field means the dimension was
/// not captured or is empty; an explicit `Value::Null` is a captured blank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CellSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    /// Serialized style descriptor (JSON), see [`crate::styles`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeState>,
}

impl CellSnapshot {
    pub fn with_value(value: impl Into<Value>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn with_formula(formula: impl Into<String>) -> Self {
        Self {
            formula: Some(formula.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.formula.is_none() && self.style.is_none() && self.merge.is_none()
    }
}

/// Merge membership for a cell inside a merged area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MergeState {
    /// Top-left cell of the merged area; records the full area in A1 form.
    Anchor { area: String },
    /// Cell covered by a merge; records its anchor in `Sheet!A1` form.
    Covered { anchor: String },
}

/// Sparse point-in-time capture of a bounded region, keyed by the canonical
/// `Sheet!A1` cell string. The map itself is unordered; diffing sorts keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkbookSnapshot {
    cells: AHashMap<String, CellSnapshot>,
}

impl WorkbookSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &CellKey, cell: CellSnapshot) {
        self.cells.insert(key.a1(), cell);
    }

    pub fn insert_raw(&mut self, key: String, cell: CellSnapshot) {
        self.cells.insert(key, cell);
    }

    pub fn get(&self, key: &str) -> Option<&CellSnapshot> {
        self.cells.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut CellSnapshot> {
        self.cells.get_mut(key)
    }

    pub fn entry_mut(&mut self, key: &CellKey) -> &mut CellSnapshot {
        self.cells.entry(key.a1()).or_default()
    }

    pub fn remove(&mut self, key: &str) -> Option<CellSnapshot> {
        self.cells.remove(key)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.cells.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CellSnapshot)> {
        self.cells.iter()
    }

    /// Fold another snapshot into this one; colliding keys take the incoming
    /// cell. Used to assemble multi-sheet bounding reads.
    pub fn absorb(&mut self, other: WorkbookSnapshot) {
        self.cells.extend(other.cells);
    }
}

impl FromIterator<(String, CellSnapshot)> for WorkbookSnapshot {
    fn from_iter<T: IntoIterator<Item = (String, CellSnapshot)>>(iter: T) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

/// Classification of a single-cell difference. Exactly one kind per hunk;
/// when several dimensions change at once, formula wins over value, value
/// over style, since a formula change implies a downstream value change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiffKind {
    Added,
    Deleted,
    ValueChanged,
    FormulaChanged,
    StyleChanged,
}

/// One typed, single-cell diff record. `Added` carries only `after`,
/// `Deleted` only `before`, changed kinds carry both.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct DiffHunk {
    pub key: CellKey,
    pub kind: DiffKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<CellSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<CellSnapshot>,
}

/// An edit proposed by the upstream agent, not yet executed anywhere.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProposedOperation {
    /// Identifier assigned by the proposer; execution results are keyed by it.
    pub request_id: String,
    pub tool: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Request ids of operations that must complete successfully first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub priority: i32,
}

impl ProposedOperation {
    pub fn new(request_id: impl Into<String>, tool: impl Into<String>, input: Value) -> Self {
        Self {
            request_id: request_id.into(),
            tool: tool.into(),
            input,
            description: None,
            dependencies: Vec::new(),
            batch_id: None,
            priority: 0,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Approved)
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// An operation parked in the approval queue.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PendingAction {
    pub id: String,
    pub request_id: String,
    pub tool: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: ActionStatus,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub priority: i32,
    /// Derived: true only while every dependency is in a terminal-success
    /// state and this action is still pending.
    pub can_approve: bool,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate queue counts for bulk-action affordances in the UI.
#[derive(Debug, Clone, Default, Serialize, JsonSchema)]
pub struct OperationSummary {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// True iff any pending action has unmet dependencies.
    pub has_blocked: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub batches: Vec<BatchRollup>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct BatchRollup {
    pub id: String,
    pub size: usize,
    pub ready_count: usize,
    pub can_approve_all: bool,
}

/// Per-operation status reported back to the transport layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OperationStatus {
    Queued,
    QueuedForPreview,
    Approved,
    Rejected,
    Executed,
    Failed,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct OperationStatusUpdate {
    pub request_id: String,
    pub status: OperationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationStatusUpdate {
    pub fn new(request_id: impl Into<String>, status: OperationStatus) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Outcome of committing one operation against the live host.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct OperationExecution {
    pub request_id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

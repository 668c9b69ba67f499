use crate::address::RangeRef;
use crate::model::{MergeState, ProposedOperation, WorkbookSnapshot};
use crate::styles::{self, StyleDescriptor, StylePreset};
use anyhow::{Context, Result, bail};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Write-class tools the simulator understands. Anything else is a no-op.
pub const SIMULATED_TOOLS: &[&str] = &[
    "write_range",
    "apply_formula",
    "clear_range",
    "format_range",
    "smart_format_cells",
    "merge_cells",
];

pub fn is_simulated_tool(tool: &str) -> bool {
    SIMULATED_TOOLS.contains(&tool)
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct WriteRangeParams {
    pub range: String,
    pub values: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ApplyFormulaParams {
    pub range: String,
    pub formula: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClearRangeParams {
    pub range: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct FormatRangeParams {
    pub range: String,
    pub style: StyleDescriptor,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SmartFormatParams {
    pub range: String,
    pub preset: StylePreset,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MergeCellsParams {
    pub range: String,
    #[serde(default = "default_preserve_content")]
    pub preserve_content: bool,
}

fn default_preserve_content() -> bool {
    true
}

/// Predict post-edit state without touching the host.
///
/// Applies each operation in array order to a copy of `before`. A malformed
/// range, bad input payload or unknown tool makes that one operation a
/// logged no-op; the rest of the batch still applies.
pub fn simulate(
    before: &WorkbookSnapshot,
    ops: &[ProposedOperation],
    active_sheet: &str,
) -> WorkbookSnapshot {
    let mut next = before.clone();
    for op in ops {
        if let Err(err) = apply_operation(&mut next, op, active_sheet) {
            warn!(
                request_id = %op.request_id,
                tool = %op.tool,
                "operation skipped during simulation: {err:#}"
            );
        }
    }
    next
}

/// Target range of an operation, if its input carries one. Used for bounding
/// range computation and autonomy cell-count checks; parse failures are the
/// caller's signal that the operation will not change anything.
pub fn operation_range(op: &ProposedOperation, active_sheet: &str) -> Option<RangeRef> {
    #[derive(Deserialize)]
    struct RangeOnly {
        range: Option<String>,
    }

    let reference = serde_json::from_value::<RangeOnly>(op.input.clone())
        .ok()?
        .range?;
    RangeRef::parse(&reference, active_sheet).ok()
}

fn apply_operation(
    snapshot: &mut WorkbookSnapshot,
    op: &ProposedOperation,
    active_sheet: &str,
) -> Result<()> {
    match op.tool.as_str() {
        "write_range" => {
            let params: WriteRangeParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            apply_write_range(snapshot, &range, &params.values);
        }
        "apply_formula" => {
            let params: ApplyFormulaParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            apply_formula_fill(snapshot, &range, &params.formula);
        }
        "clear_range" => {
            let params: ClearRangeParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            for key in range.cells() {
                snapshot.remove(&key.a1());
            }
        }
        "format_range" => {
            let params: FormatRangeParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            apply_format(snapshot, &range, &params.style);
        }
        "smart_format_cells" => {
            let params: SmartFormatParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            apply_format(snapshot, &range, &params.preset.descriptor());
        }
        "merge_cells" => {
            let params: MergeCellsParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            apply_merge(snapshot, &range, params.preserve_content)?;
        }
        other => {
            // Forward compatibility: newer proposers may send tools this
            // simulator predates.
            debug!(tool = %other, request_id = %op.request_id, "unknown tool ignored");
        }
    }
    Ok(())
}

fn parse_params<T: serde::de::DeserializeOwned>(op: &ProposedOperation) -> Result<T> {
    serde_json::from_value(op.input.clone())
        .with_context(|| format!("invalid input for tool '{}'", op.tool))
}

/// Values align to the range origin. Empty slots (`null` or empty string)
/// are skipped rather than written as blanks so sibling writes in the same
/// batch are not destroyed. A single-cell target spreads the whole grid;
/// a rectangular target clips the grid to its extent.
fn apply_write_range(snapshot: &mut WorkbookSnapshot, range: &RangeRef, values: &[Vec<Value>]) {
    let spread = range.is_single_cell();
    for (row_offset, row_values) in values.iter().enumerate() {
        let row = range.start_row + row_offset as u32;
        if !spread && row > range.end_row {
            break;
        }
        for (col_offset, incoming) in row_values.iter().enumerate() {
            let col = range.start_col + col_offset as u32;
            if !spread && col > range.end_col {
                break;
            }
            if is_skippable(incoming) {
                continue;
            }
            let key = crate::address::CellKey::new(range.sheet.clone(), row, col);
            let cell = snapshot.entry_mut(&key);
            match formula_text(incoming) {
                Some(formula) => {
                    cell.formula = Some(formula);
                    cell.value = None;
                }
                None => {
                    cell.value = Some(incoming.clone());
                    cell.formula = None;
                }
            }
        }
    }
}

fn is_skippable(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// A string cell starting with '=' is written as a formula, with the prefix
/// stripped, matching how agents tend to phrase grid payloads.
fn formula_text(value: &Value) -> Option<String> {
    let text = value.as_str()?;
    text.strip_prefix('=').map(|rest| rest.to_string())
}

/// Array-style fill: every cell in range gets the same formula string. No
/// per-cell reference translation is attempted. Stale cached values are
/// dropped since the host will recompute them.
fn apply_formula_fill(snapshot: &mut WorkbookSnapshot, range: &RangeRef, formula: &str) {
    let normalized = formula.strip_prefix('=').unwrap_or(formula);
    for key in range.cells() {
        let cell = snapshot.entry_mut(&key);
        cell.formula = Some(normalized.to_string());
        cell.value = None;
    }
}

fn apply_format(snapshot: &mut WorkbookSnapshot, range: &RangeRef, patch: &StyleDescriptor) {
    for key in range.cells() {
        let cell = snapshot.entry_mut(&key);
        cell.style = Some(styles::merge_serialized(cell.style.as_deref(), patch));
    }
}

fn apply_merge(snapshot: &mut WorkbookSnapshot, range: &RangeRef, preserve_content: bool) -> Result<()> {
    if range.is_single_cell() {
        bail!("merge_cells requires a multi-cell range");
    }
    let anchor = range.origin();
    let anchor_a1 = anchor.a1();
    snapshot.entry_mut(&anchor).merge = Some(MergeState::Anchor { area: range.a1() });

    for key in range.cells() {
        if key == anchor {
            continue;
        }
        let cell = snapshot.entry_mut(&key);
        cell.merge = Some(MergeState::Covered {
            anchor: anchor_a1.clone(),
        });
        if !preserve_content {
            cell.value = None;
            cell.formula = None;
        }
    }
    Ok(())
}

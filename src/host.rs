use crate::address::{CellKey, RangeRef};
use crate::model::{ProposedOperation, WorkbookSnapshot};
use crate::simulate::{
    ApplyFormulaParams, ClearRangeParams, FormatRangeParams, MergeCellsParams, SmartFormatParams,
    WriteRangeParams,
};
use crate::styles::StyleDescriptor;
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Visual state of one cell as the host exposes it. Captured before a
/// highlight is painted and written back verbatim on restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellVisualState {
    pub fill_color: Option<String>,
    pub font_color: Option<String>,
    pub italic: bool,
    pub strikethrough: bool,
    pub number_format: Option<String>,
    pub borders: EdgeBorders,
    pub value: Option<Value>,
    pub formula: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeBorders {
    pub top: Option<BorderStroke>,
    pub bottom: Option<BorderStroke>,
    pub left: Option<BorderStroke>,
    pub right: Option<BorderStroke>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderStroke {
    pub style: String,
    pub color: String,
}

impl BorderStroke {
    pub fn new(style: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            style: style.into(),
            color: color.into(),
        }
    }
}

/// One cell's format write, paired with its target.
#[derive(Debug, Clone)]
pub struct CellFormatUpdate {
    pub key: CellKey,
    pub state: CellVisualState,
}

/// Per-cell failure inside an otherwise successful batched format write.
#[derive(Debug, Clone)]
pub struct CellWriteFailure {
    pub key: CellKey,
    pub error: String,
}

/// The live spreadsheet, reduced to the range-oriented capability this
/// engine needs. Implementations are expected to batch: one trait call is
/// one host round trip regardless of cell count.
#[async_trait]
pub trait SheetHost: Send + Sync {
    /// Sparse read of a rectangular region.
    async fn read_range(&self, range: &RangeRef) -> Result<WorkbookSnapshot>;

    async fn write_values(&self, range: &RangeRef, values: &[Vec<Value>]) -> Result<()>;

    async fn write_formula(&self, range: &RangeRef, formula: &str) -> Result<()>;

    async fn clear_range(&self, range: &RangeRef) -> Result<()>;

    async fn write_format(&self, range: &RangeRef, style: &StyleDescriptor) -> Result<()>;

    async fn merge_cells(&self, range: &RangeRef, preserve_content: bool) -> Result<()>;

    /// Read visual state for every key in one round trip, in key order.
    async fn read_cell_formats(&self, keys: &[CellKey]) -> Result<Vec<CellVisualState>>;

    /// Write visual state for every update in one round trip. Cells that
    /// individually fail are reported; the call itself still succeeds.
    async fn write_cell_formats(
        &self,
        updates: &[CellFormatUpdate],
    ) -> Result<Vec<CellWriteFailure>>;
}

/// Commit one approved operation against the live host, mapping the tool's
/// input onto the capability surface. Mirrors the simulator's dispatch so a
/// previewed batch and its commit stay in lockstep.
pub async fn execute_operation(
    host: &dyn SheetHost,
    op: &ProposedOperation,
    active_sheet: &str,
) -> Result<()> {
    match op.tool.as_str() {
        "write_range" => {
            let params: WriteRangeParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            host.write_values(&range, &params.values).await
        }
        "apply_formula" => {
            let params: ApplyFormulaParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            let formula = params.formula.strip_prefix('=').unwrap_or(&params.formula);
            host.write_formula(&range, formula).await
        }
        "clear_range" => {
            let params: ClearRangeParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            host.clear_range(&range).await
        }
        "format_range" => {
            let params: FormatRangeParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            host.write_format(&range, &params.style).await
        }
        "smart_format_cells" => {
            let params: SmartFormatParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            host.write_format(&range, &params.preset.descriptor()).await
        }
        "merge_cells" => {
            let params: MergeCellsParams = parse_params(op)?;
            let range = RangeRef::parse(&params.range, active_sheet)?;
            host.merge_cells(&range, params.preserve_content).await
        }
        other => bail!("tool '{other}' has no host execution mapping"),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(op: &ProposedOperation) -> Result<T> {
    serde_json::from_value(op.input.clone())
        .with_context(|| format!("invalid input for tool '{}'", op.tool))
}

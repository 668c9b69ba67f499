use crate::errors::PreviewError;
use crate::host::{
    BorderStroke, CellFormatUpdate, CellVisualState, CellWriteFailure, EdgeBorders, SheetHost,
};
use crate::model::{DiffHunk, DiffKind};
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

// Kind-specific fills.
const ADDED_FILL: &str = "#D9F2D9";
const DELETED_FILL: &str = "#F8D7DA";
const VALUE_FILL: &str = "#FFF3C4";
const FORMULA_FILL: &str = "#D0E7FF";
const STYLE_FILL: &str = "#E8DFF5";

// Border accents.
const ADDED_ACCENT: &str = "#2EA043";
const DELETED_ACCENT: &str = "#D1242F";
const VALUE_ACCENT: &str = "#D29922";
const FORMULA_ACCENT: &str = "#1F6FEB";
const STYLE_ACCENT: &str = "#8250DF";

/// Written instead of a captured `null` color on restore; hosts may reject
/// null property writes.
pub const DEFAULT_FILL: &str = "#FFFFFF";
pub const DEFAULT_FONT_COLOR: &str = "#000000";
pub const DEFAULT_NUMBER_FORMAT: &str = "General";

#[derive(Debug, Clone, Default)]
pub struct HighlightReport {
    /// Cells included in the batched host write.
    pub cells: usize,
    /// Cells the host reported as individually failed; the pass still
    /// completed for the rest.
    pub failed: Vec<CellWriteFailure>,
}

/// Paints kind-specific visual treatments over diffed cells and restores the
/// original formatting bit-exactly afterwards.
///
/// The captured-state map is the engine's only mutable shared state. It is
/// keyed by canonical cell key, captured at most once per key per session,
/// and must be fully drained by session end; `clear_highlights(None)` drains
/// whatever remains.
pub struct HighlightEngine {
    host: Arc<dyn SheetHost>,
    captured: Mutex<AHashMap<String, CellVisualState>>,
}

impl HighlightEngine {
    pub fn new(host: Arc<dyn SheetHost>) -> Self {
        Self {
            host,
            captured: Mutex::new(AHashMap::new()),
        }
    }

    pub fn captured_len(&self) -> usize {
        self.captured.lock().len()
    }

    /// Capture (once per key) and paint every hunk's cell.
    ///
    /// All property reads go through one host round trip and all writes
    /// through another, independent of cell count.
    pub async fn apply_highlights(
        &self,
        hunks: &[DiffHunk],
    ) -> Result<HighlightReport, PreviewError> {
        if hunks.is_empty() {
            return Ok(HighlightReport::default());
        }

        let to_capture: Vec<_> = {
            let captured = self.captured.lock();
            hunks
                .iter()
                .filter(|hunk| !captured.contains_key(&hunk.key.a1()))
                .map(|hunk| hunk.key.clone())
                .collect()
        };

        if !to_capture.is_empty() {
            let states = self
                .host
                .read_cell_formats(&to_capture)
                .await
                .map_err(PreviewError::Host)?;
            let mut captured = self.captured.lock();
            for (key, state) in to_capture.iter().zip(states) {
                captured.entry(key.a1()).or_insert(state);
            }
        }

        let updates: Vec<CellFormatUpdate> = {
            let captured = self.captured.lock();
            hunks
                .iter()
                .filter_map(|hunk| {
                    let base = captured.get(&hunk.key.a1())?;
                    Some(CellFormatUpdate {
                        key: hunk.key.clone(),
                        state: treated_state(hunk.kind, base),
                    })
                })
                .collect()
        };

        let total = updates.len();
        let failed = self
            .host
            .write_cell_formats(&updates)
            .await
            .map_err(PreviewError::Host)?;
        self.report("paint", total, failed)
    }

    /// Restore captured cells and drop their captures.
    ///
    /// With specific hunks, only those keys are restored; with `None`, every
    /// captured key is. Calling with nothing left captured is a no-op.
    pub async fn clear_highlights(
        &self,
        hunks: Option<&[DiffHunk]>,
    ) -> Result<HighlightReport, PreviewError> {
        let targets: Vec<(crate::address::CellKey, CellVisualState)> = {
            let mut captured = self.captured.lock();
            match hunks {
                Some(hunks) => hunks
                    .iter()
                    .filter_map(|hunk| {
                        captured
                            .remove(&hunk.key.a1())
                            .map(|state| (hunk.key.clone(), state))
                    })
                    .collect(),
                None => {
                    let drained: Vec<_> = captured.drain().collect();
                    drained
                        .into_iter()
                        .filter_map(|(raw, state)| {
                            match crate::address::CellKey::parse(&raw) {
                                Ok(key) => Some((key, state)),
                                Err(err) => {
                                    warn!("dropping capture under malformed key '{raw}': {err}");
                                    None
                                }
                            }
                        })
                        .collect()
                }
            }
        };

        if targets.is_empty() {
            debug!("clear_highlights with nothing captured; no-op");
            return Ok(HighlightReport::default());
        }

        let updates: Vec<CellFormatUpdate> = targets
            .into_iter()
            .map(|(key, state)| CellFormatUpdate {
                key,
                state: restore_state(state),
            })
            .collect();

        let total = updates.len();
        let failed = self
            .host
            .write_cell_formats(&updates)
            .await
            .map_err(PreviewError::Host)?;
        self.report("restore", total, failed)
    }

    fn report(
        &self,
        action: &'static str,
        total: usize,
        failed: Vec<CellWriteFailure>,
    ) -> Result<HighlightReport, PreviewError> {
        for failure in &failed {
            warn!(cell = %failure.key, "highlight {action} failed: {}", failure.error);
        }
        if total > 0 && failed.len() == total {
            return Err(PreviewError::HighlightApply { action, total });
        }
        Ok(HighlightReport {
            cells: total,
            failed,
        })
    }
}

/// The visual treatment for one diff kind, layered over the captured state
/// so untouched dimensions survive the paint.
fn treated_state(kind: DiffKind, base: &CellVisualState) -> CellVisualState {
    let mut state = base.clone();
    match kind {
        DiffKind::Added => {
            state.fill_color = Some(ADDED_FILL.to_string());
            state.italic = true;
            state.borders.right = Some(BorderStroke::new("medium", ADDED_ACCENT));
        }
        DiffKind::Deleted => {
            state.fill_color = Some(DELETED_FILL.to_string());
            state.strikethrough = true;
            state.borders = all_edges("thin", DELETED_ACCENT);
        }
        DiffKind::ValueChanged => {
            state.fill_color = Some(VALUE_FILL.to_string());
            state.borders.left = Some(BorderStroke::new("medium", VALUE_ACCENT));
        }
        DiffKind::FormulaChanged => {
            state.fill_color = Some(FORMULA_FILL.to_string());
            state.borders.top = Some(BorderStroke::new("double", FORMULA_ACCENT));
            state.borders.bottom = Some(BorderStroke::new("double", FORMULA_ACCENT));
        }
        DiffKind::StyleChanged => {
            state.fill_color = Some(STYLE_FILL.to_string());
            state.borders = all_edges("dotted", STYLE_ACCENT);
        }
    }
    state
}

fn all_edges(style: &str, color: &str) -> EdgeBorders {
    EdgeBorders {
        top: Some(BorderStroke::new(style, color)),
        bottom: Some(BorderStroke::new(style, color)),
        left: Some(BorderStroke::new(style, color)),
        right: Some(BorderStroke::new(style, color)),
    }
}

/// Captured state normalized for write-back: hosts may reject null property
/// writes, so absent colors restore to the documented defaults.
fn restore_state(captured: CellVisualState) -> CellVisualState {
    CellVisualState {
        fill_color: captured.fill_color.or_else(|| Some(DEFAULT_FILL.to_string())),
        font_color: captured
            .font_color
            .or_else(|| Some(DEFAULT_FONT_COLOR.to_string())),
        number_format: captured
            .number_format
            .or_else(|| Some(DEFAULT_NUMBER_FORMAT.to_string())),
        ..captured
    }
}

use crate::address::RangeRef;
use crate::config::EngineConfig;
use crate::diff;
use crate::errors::PreviewError;
use crate::highlight::HighlightEngine;
use crate::host::{self, SheetHost};
use crate::model::{DiffHunk, OperationExecution, ProposedOperation, WorkbookSnapshot};
use crate::session::PreviewSession;
use crate::simulate;
use indexmap::IndexMap;
use parking_lot::Mutex;
use schemars::JsonSchema;
use serde::Serialize;
use std::sync::Arc;
use strum::Display;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PreviewState {
    Idle,
    Computing,
    Previewing,
    Applying,
    Applied,
}

impl PreviewState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Computing => "computing",
            Self::Previewing => "previewing",
            Self::Applying => "applying",
            Self::Applied => "applied",
        }
    }
}

/// What the UI boundary needs to render a pending preview.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct PreviewReady {
    pub session_id: String,
    pub workbook_id: String,
    pub hunks: Vec<DiffHunk>,
    pub truncated: bool,
    /// Padded bounding ranges that were snapshotted, in A1 form.
    pub bounding: Vec<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ApplyReport {
    pub applied: bool,
    pub results: Vec<OperationExecution>,
    /// Batch-level error text when some operations failed to commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct ActiveSession {
    session: PreviewSession,
    active_sheet: String,
    operations: Vec<ProposedOperation>,
    hunks: Vec<DiffHunk>,
    truncated: bool,
}

/// Owns the single active preview session per workbook: snapshot the
/// affected region, simulate, diff, paint, then apply or cancel on the
/// user's decision.
///
/// A batch arriving while a session is previewing is rejected with
/// [`PreviewError::SessionActive`]; callers resubmit after resolution.
pub struct PreviewOrchestrator {
    host: Arc<dyn SheetHost>,
    highlighter: HighlightEngine,
    config: EngineConfig,
    state: Mutex<PreviewState>,
    active: Mutex<Option<ActiveSession>>,
}

impl PreviewOrchestrator {
    pub fn new(host: Arc<dyn SheetHost>, config: EngineConfig) -> Self {
        let highlighter = HighlightEngine::new(Arc::clone(&host));
        Self {
            host,
            highlighter,
            config,
            state: Mutex::new(PreviewState::Idle),
            active: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PreviewState {
        *self.state.lock()
    }

    pub fn active_hunks(&self) -> Option<Vec<DiffHunk>> {
        self.active
            .lock()
            .as_ref()
            .map(|session| session.hunks.clone())
    }

    pub fn captured_highlight_cells(&self) -> usize {
        self.highlighter.captured_len()
    }

    /// Snapshot, simulate and diff one flushed batch, then paint the result.
    ///
    /// An empty diff is surfaced as [`PreviewError::NoChanges`]: a proposal
    /// that changes nothing is itself diagnostic information.
    pub async fn begin_preview(
        &self,
        workbook_id: &str,
        operations: Vec<ProposedOperation>,
        active_sheet: &str,
    ) -> Result<PreviewReady, PreviewError> {
        {
            let mut state = self.state.lock();
            if *state != PreviewState::Idle {
                let active_workbook = self
                    .active
                    .lock()
                    .as_ref()
                    .map(|session| session.session.workbook_id.clone())
                    .unwrap_or_else(|| workbook_id.to_string());
                return Err(PreviewError::SessionActive {
                    workbook_id: active_workbook,
                });
            }
            *state = PreviewState::Computing;
        }

        match self
            .compute(workbook_id, operations, active_sheet)
            .await
        {
            Ok(ready) => Ok(ready),
            Err(err) => {
                *self.state.lock() = PreviewState::Idle;
                Err(err)
            }
        }
    }

    async fn compute(
        &self,
        workbook_id: &str,
        operations: Vec<ProposedOperation>,
        active_sheet: &str,
    ) -> Result<PreviewReady, PreviewError> {
        let mut session = PreviewSession::new(workbook_id);
        let operations: Vec<ProposedOperation> = operations
            .into_iter()
            .filter(|op| session.note_operation(op))
            .collect();
        if operations.is_empty() {
            return Err(PreviewError::NoChanges);
        }

        let bounding = bounding_ranges(&operations, active_sheet, self.config.bounding_padding);
        if bounding.is_empty() {
            return Err(PreviewError::NoChanges);
        }

        let mut before = WorkbookSnapshot::new();
        for range in &bounding {
            let slice = self
                .host
                .read_range(range)
                .await
                .map_err(PreviewError::Host)?;
            before.absorb(slice);
        }

        let after = simulate::simulate(&before, &operations, active_sheet);
        let outcome =
            diff::diff_snapshots_chunked(&before, &after, &self.config.diff_options()).await;
        if outcome.hunks.is_empty() {
            return Err(PreviewError::NoChanges);
        }

        let ready = PreviewReady {
            session_id: session.id.clone(),
            workbook_id: workbook_id.to_string(),
            hunks: outcome.hunks.clone(),
            truncated: outcome.truncated,
            bounding: bounding.iter().map(RangeRef::a1).collect(),
        };

        info!(
            workbook_id,
            hunks = outcome.hunks.len(),
            truncated = outcome.truncated,
            "preview computed"
        );

        *self.active.lock() = Some(ActiveSession {
            session,
            active_sheet: active_sheet.to_string(),
            operations,
            hunks: outcome.hunks,
            truncated: outcome.truncated,
        });
        *self.state.lock() = PreviewState::Previewing;

        // Painting failures degrade the preview but do not invalidate it:
        // the diff itself is already available to the UI boundary.
        match self.highlighter.apply_highlights(&ready.hunks).await {
            Ok(report) if !report.failed.is_empty() => {
                warn!(failed = report.failed.len(), "some highlights failed to paint");
            }
            Ok(_) => {}
            Err(err) => warn!("highlight pass failed: {err}"),
        }

        Ok(ready)
    }

    /// Commit the previewed operations against the real host, in original
    /// order. A failed operation does not abort its siblings; on any
    /// failure the session falls back to Previewing so the user can retry
    /// or cancel.
    pub async fn apply_changes(&self) -> Result<ApplyReport, PreviewError> {
        {
            let mut state = self.state.lock();
            if *state != PreviewState::Previewing {
                return Err(PreviewError::InvalidState {
                    state: state.as_str(),
                    action: "apply changes",
                });
            }
            *state = PreviewState::Applying;
        }

        let (operations, active_sheet) = {
            let active = self.active.lock();
            let Some(session) = active.as_ref() else {
                *self.state.lock() = PreviewState::Idle;
                return Err(PreviewError::InvalidState {
                    state: "idle",
                    action: "apply changes",
                });
            };
            (session.operations.clone(), session.active_sheet.clone())
        };

        let mut results = Vec::with_capacity(operations.len());
        let mut failed = 0usize;
        for op in &operations {
            let outcome = host::execute_operation(self.host.as_ref(), op, &active_sheet).await;
            let error = outcome.as_ref().err().map(|err| format!("{err:#}"));
            if let Some(error) = &error {
                warn!(request_id = %op.request_id, "commit failed: {error}");
                failed += 1;
            }
            results.push(OperationExecution {
                request_id: op.request_id.clone(),
                ok: error.is_none(),
                error,
            });
        }

        if failed > 0 {
            *self.state.lock() = PreviewState::Previewing;
            let error = PreviewError::ApplyExecution {
                failed,
                total: operations.len(),
            };
            return Ok(ApplyReport {
                applied: false,
                results,
                error: Some(error.to_string()),
            });
        }

        match self.highlighter.clear_highlights(None).await {
            Ok(report) if !report.failed.is_empty() => {
                warn!(failed = report.failed.len(), "some highlights failed to restore");
            }
            Ok(_) => {}
            Err(err) => warn!("highlight restore failed after apply: {err}"),
        }

        self.active.lock().take();
        *self.state.lock() = PreviewState::Applied;
        debug!(operations = results.len(), "preview applied");
        *self.state.lock() = PreviewState::Idle;

        Ok(ApplyReport {
            applied: true,
            results,
            error: None,
        })
    }

    /// Discard the active preview and restore every painted cell. Safe to
    /// call at any time; cancelling with no active session is a no-op.
    pub async fn cancel_preview(&self) -> Result<(), PreviewError> {
        let state = *self.state.lock();
        match state {
            PreviewState::Previewing => {}
            PreviewState::Idle | PreviewState::Applied => {
                debug!("cancel with no active preview; no-op");
                return Ok(());
            }
            PreviewState::Computing | PreviewState::Applying => {
                return Err(PreviewError::InvalidState {
                    state: state.as_str(),
                    action: "cancel preview",
                });
            }
        }

        // Restore before dropping the session: a host failure here keeps
        // the session alive so the caller can retry the cancel.
        self.highlighter.clear_highlights(None).await?;

        let drained = self.active.lock().take();
        if let Some(session) = drained {
            info!(
                session_id = %session.session.id,
                workbook_id = %session.session.workbook_id,
                "preview cancelled"
            );
        }
        *self.state.lock() = PreviewState::Idle;
        Ok(())
    }
}

/// Minimal per-sheet rectangles covering every target range in the batch,
/// padded on each side to catch adjacency effects.
pub fn bounding_ranges(
    ops: &[ProposedOperation],
    active_sheet: &str,
    padding: u32,
) -> Vec<RangeRef> {
    let mut per_sheet: IndexMap<String, RangeRef> = IndexMap::new();
    for op in ops {
        let Some(range) = simulate::operation_range(op, active_sheet) else {
            continue;
        };
        match per_sheet.get_mut(&range.sheet) {
            Some(existing) => {
                if let Some(merged) = existing.union(&range) {
                    *existing = merged;
                }
            }
            None => {
                per_sheet.insert(range.sheet.clone(), range);
            }
        }
    }
    per_sheet
        .into_values()
        .map(|range| range.padded(padding))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bounding_covers_all_ranges_with_padding() {
        let ops = vec![
            ProposedOperation::new("r1", "write_range", json!({"range": "B2", "values": [[1]]})),
            ProposedOperation::new("r2", "clear_range", json!({"range": "D4:E5"})),
        ];
        let bounding = bounding_ranges(&ops, "S", 1);
        assert_eq!(bounding.len(), 1);
        assert_eq!(bounding[0].a1(), "S!A1:F6");
    }

    #[test]
    fn bounding_splits_by_sheet() {
        let ops = vec![
            ProposedOperation::new("r1", "write_range", json!({"range": "A1", "values": [[1]]})),
            ProposedOperation::new(
                "r2",
                "write_range",
                json!({"range": "Other!C3", "values": [[2]]}),
            ),
        ];
        let bounding = bounding_ranges(&ops, "S", 0);
        assert_eq!(bounding.len(), 2);
    }

    #[test]
    fn operations_without_ranges_are_ignored() {
        let ops = vec![ProposedOperation::new("r1", "pivot", json!({"rows": 2}))];
        assert!(bounding_ranges(&ops, "S", 1).is_empty());
    }
}

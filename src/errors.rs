use thiserror::Error;

/// Typed failures surfaced past the crate's public entry points.
///
/// Per-cell and per-operation failures inside a batch are recovered locally
/// and logged; only batch-level outcomes reach this taxonomy.
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("invalid range reference '{reference}': {reason}")]
    RangeParse { reference: String, reason: String },

    #[error("proposed operations produce no changes to preview")]
    NoChanges,

    #[error("a preview session is already active for workbook '{workbook_id}'")]
    SessionActive { workbook_id: String },

    #[error("cannot {action} while preview is {state}")]
    InvalidState {
        state: &'static str,
        action: &'static str,
    },

    #[error("highlight {action} failed for all {total} cells")]
    HighlightApply { action: &'static str, total: usize },

    #[error("{failed} of {total} operations failed to commit")]
    ApplyExecution { failed: usize, total: usize },

    #[error("host capability error: {0}")]
    Host(anyhow::Error),
}

impl PreviewError {
    pub fn range_parse(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RangeParse {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

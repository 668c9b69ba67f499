//! Preview/approval engine for AI-proposed spreadsheet edits.
//!
//! An upstream agent proposes operations against a live workbook; this crate
//! predicts the post-edit state without touching the document, computes a
//! cell-level diff, paints reversible visual highlights through the host
//! capability, and gates execution behind a declarative autonomy policy.
//! The chat transport, the live spreadsheet API and the UI are external
//! collaborators: the first two arrive as channels and the [`host::SheetHost`]
//! trait, the last consumes the typed values this crate emits.

pub mod address;
pub mod autonomy;
pub mod config;
pub mod diff;
pub mod errors;
pub mod highlight;
pub mod host;
pub mod model;
pub mod preview;
pub mod queue;
pub mod session;
pub mod simulate;
pub mod styles;

pub use address::{CellKey, RangeRef};
pub use autonomy::{ApprovalSweep, AutonomyGate, Disposition};
pub use config::{AutonomyMode, AutonomyPolicy, EngineConfig};
pub use diff::{DiffOptions, DiffOutcome, diff_snapshots, diff_snapshots_chunked};
pub use errors::PreviewError;
pub use highlight::{HighlightEngine, HighlightReport};
pub use host::{CellFormatUpdate, CellVisualState, SheetHost};
pub use model::{
    CellSnapshot, DiffHunk, DiffKind, OperationStatusUpdate, OperationSummary, PendingAction,
    ProposedOperation, WorkbookSnapshot,
};
pub use preview::{ApplyReport, PreviewOrchestrator, PreviewReady, PreviewState};
pub use queue::{BatchQueue, BatchQueueConfig};
pub use session::PreviewSession;
pub use simulate::simulate;

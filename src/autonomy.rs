use crate::config::{AutonomyMode, AutonomyPolicy};
use crate::errors::PreviewError;
use crate::host::{self, SheetHost};
use crate::model::{
    ActionStatus, BatchRollup, OperationExecution, OperationStatus, OperationStatusUpdate,
    OperationSummary, PendingAction, ProposedOperation,
};
use crate::queue::BatchQueue;
use crate::simulate::{self, is_simulated_tool};
use chrono::Utc;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const READ_PREFIXES: &[&str] = &["read_", "get_", "list_", "find_", "describe_"];

static FUNCTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9_]*\(").unwrap());
static REFERENCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?[A-Za-z]{1,3}\$?[0-9]+").unwrap());

/// Where a classified operation went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Read-only; approved without ceremony.
    AutoApproved,
    Rejected { reason: String },
    /// Executed immediately (yolo); `ok` reports the host outcome.
    Executed { ok: bool },
    /// Accumulating in the batch queue for diff preview.
    QueuedForPreview,
    /// Parked as a pending action awaiting explicit approval.
    QueuedForApproval { action_id: String },
}

#[derive(Debug, Clone, Default)]
pub struct ApprovalSweep {
    pub executed: Vec<OperationExecution>,
    /// Request ids still blocked on unmet dependencies when the sweep ended.
    pub blocked: Vec<String>,
}

/// Policy engine deciding, per proposed operation, whether it executes
/// immediately, waits for one-shot approval, or is batched for preview.
///
/// Collaborators are injected: the batch queue receives write-class edits,
/// the host executes approved ones, and the updates channel reports every
/// decision back to the transport layer.
pub struct AutonomyGate {
    mode: AutonomyMode,
    policy: AutonomyPolicy,
    host: Arc<dyn SheetHost>,
    batch: Arc<BatchQueue>,
    actions: Mutex<IndexMap<String, PendingAction>>,
    updates: mpsc::UnboundedSender<OperationStatusUpdate>,
}

impl AutonomyGate {
    pub fn new(
        mode: AutonomyMode,
        policy: AutonomyPolicy,
        host: Arc<dyn SheetHost>,
        batch: Arc<BatchQueue>,
        updates: mpsc::UnboundedSender<OperationStatusUpdate>,
    ) -> Self {
        Self {
            mode,
            policy,
            host,
            batch,
            actions: Mutex::new(IndexMap::new()),
            updates,
        }
    }

    pub fn mode(&self) -> AutonomyMode {
        self.mode
    }

    /// Classify and route one proposed operation.
    pub async fn submit(&self, op: ProposedOperation, active_sheet: &str) -> Disposition {
        if is_read_only_tool(&op.tool) {
            self.send_update(OperationStatusUpdate::new(
                op.request_id.clone(),
                OperationStatus::Approved,
            ));
            return Disposition::AutoApproved;
        }

        match self.mode {
            AutonomyMode::Ask => {
                let reason = format!(
                    "autonomy mode 'ask' does not execute '{}'; re-issue after switching modes \
                     or apply the change manually",
                    op.tool
                );
                self.send_update(
                    OperationStatusUpdate::new(op.request_id.clone(), OperationStatus::Rejected)
                        .with_error(reason.clone()),
                );
                Disposition::Rejected { reason }
            }
            AutonomyMode::AgentYolo => self.execute_now(op, active_sheet).await,
            AutonomyMode::AgentDefault => self.route_default(op, active_sheet).await,
        }
    }

    pub async fn submit_batch(
        &self,
        ops: Vec<ProposedOperation>,
        active_sheet: &str,
    ) -> Vec<Disposition> {
        let mut out = Vec::with_capacity(ops.len());
        for op in ops {
            out.push(self.submit(op, active_sheet).await);
        }
        out
    }

    /// Yolo path: record as approved and run immediately, surfaced through
    /// the updates channel so nothing happens silently.
    async fn execute_now(&self, op: ProposedOperation, active_sheet: &str) -> Disposition {
        let action_id = self.record_action(&op, ActionStatus::Approved);
        let execution = self.run_approved(op, active_sheet).await;
        if let Some(error) = &execution.error {
            warn!(request_id = %execution.request_id, "immediate execution failed: {error}");
        }
        debug!(action_id, ok = execution.ok, "yolo execution recorded");
        Disposition::Executed { ok: execution.ok }
    }

    async fn route_default(&self, op: ProposedOperation, active_sheet: &str) -> Disposition {
        if is_simulated_tool(&op.tool) {
            match self.policy_gate(&op, active_sheet).await {
                Ok(()) => {
                    self.send_update(OperationStatusUpdate::new(
                        op.request_id.clone(),
                        OperationStatus::QueuedForPreview,
                    ));
                    self.batch.add(op);
                    return Disposition::QueuedForPreview;
                }
                Err(reason) => {
                    debug!(reason = %reason, "write-class operation escalated to approval");
                }
            }
        }

        let action_id = self.record_action(&op, ActionStatus::Pending);
        self.send_update(OperationStatusUpdate::new(
            op.request_id.clone(),
            OperationStatus::Queued,
        ));
        Disposition::QueuedForApproval { action_id }
    }

    /// Inside-threshold check for the fast batch-preview path. A violation
    /// is not a rejection; the operation falls back to single approval.
    async fn policy_gate(&self, op: &ProposedOperation, active_sheet: &str) -> Result<(), String> {
        let permitted = match op.tool.as_str() {
            "write_range" | "clear_range" => self.policy.can_modify_values,
            "apply_formula" => self.policy.can_modify_formulas,
            "format_range" | "smart_format_cells" => self.policy.can_modify_formatting,
            "merge_cells" => self.policy.can_modify_layout,
            _ => false,
        };
        if !permitted {
            return Err(format!("policy forbids '{}' without approval", op.tool));
        }

        if let Some(max_cells) = self.policy.max_cells_per_change
            && let Some(range) = simulate::operation_range(op, active_sheet)
            && range.cell_count() > max_cells
        {
            return Err(format!(
                "range {} touches {} cells (limit {max_cells})",
                range.a1(),
                range.cell_count()
            ));
        }

        if let Some(max_complexity) = self.policy.max_formula_complexity
            && op.tool == "apply_formula"
            && let Some(formula) = op.input.get("formula").and_then(|v| v.as_str())
        {
            let score = formula_complexity(formula);
            if score > max_complexity {
                return Err(format!(
                    "formula complexity {score} exceeds limit {max_complexity}"
                ));
            }
        }

        if let Some(max_pct) = self.policy.max_value_change_pct
            && op.tool == "write_range"
        {
            let shift = self.largest_value_shift(op, active_sheet).await;
            if let Some(shift) = shift
                && shift > max_pct
            {
                return Err(format!(
                    "value change of {shift:.0}% exceeds limit {max_pct:.0}%"
                ));
            }
        }

        Ok(())
    }

    /// Largest relative shift a value rewrite applies to any existing
    /// numeric cell. Cells that are empty or non-numeric on either side do
    /// not constrain; neither does a current value of zero (no ratio).
    async fn largest_value_shift(&self, op: &ProposedOperation, active_sheet: &str) -> Option<f64> {
        let range = simulate::operation_range(op, active_sheet)?;
        let before = match self.host.read_range(&range).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("skipping value-shift check; range read failed: {err:#}");
                return None;
            }
        };
        let after = simulate::simulate(&before, std::slice::from_ref(op), active_sheet);

        let mut max_shift: Option<f64> = None;
        for (key, cell) in after.iter() {
            let Some(new) = cell.value.as_ref().and_then(serde_json::Value::as_f64) else {
                continue;
            };
            let Some(old) = before
                .get(key)
                .and_then(|cell| cell.value.as_ref())
                .and_then(serde_json::Value::as_f64)
            else {
                continue;
            };
            if old == 0.0 {
                continue;
            }
            let pct = ((new - old) / old).abs() * 100.0;
            max_shift = Some(max_shift.map_or(pct, |current| current.max(pct)));
        }
        max_shift
    }

    /// Approve and execute one pending action. Fails with a typed error when
    /// the action is unknown, already resolved, or still blocked.
    pub async fn approve(
        &self,
        request_id: &str,
        active_sheet: &str,
    ) -> Result<OperationExecution, PreviewError> {
        let op = {
            let mut actions = self.actions.lock();
            refresh_can_approve(&mut actions);
            let Some(action) = actions.get_mut(request_id) else {
                return Err(PreviewError::InvalidState {
                    state: "unknown",
                    action: "approve",
                });
            };
            if action.status != ActionStatus::Pending {
                return Err(PreviewError::InvalidState {
                    state: "resolved",
                    action: "approve",
                });
            }
            if !action.can_approve {
                return Err(PreviewError::InvalidState {
                    state: "blocked",
                    action: "approve",
                });
            }
            action.status = ActionStatus::Approved;
            ProposedOperation {
                request_id: action.request_id.clone(),
                tool: action.tool.clone(),
                input: action.input.clone(),
                description: action.description.clone(),
                dependencies: action.dependencies.clone(),
                batch_id: action.batch_id.clone(),
                priority: action.priority,
            }
        };

        Ok(self.run_approved(op, active_sheet).await)
    }

    /// Reject one pending action. Dependents are not cascade-failed; they
    /// simply stay blocked until rejected themselves.
    pub fn reject(&self, request_id: &str, reason: Option<String>) -> Result<(), PreviewError> {
        let mut actions = self.actions.lock();
        let Some(action) = actions.get_mut(request_id) else {
            return Err(PreviewError::InvalidState {
                state: "unknown",
                action: "reject",
            });
        };
        if action.status != ActionStatus::Pending {
            return Err(PreviewError::InvalidState {
                state: "resolved",
                action: "reject",
            });
        }
        action.status = ActionStatus::Rejected;
        action.error = reason.clone();
        refresh_can_approve(&mut actions);
        drop(actions);

        let mut update =
            OperationStatusUpdate::new(request_id.to_string(), OperationStatus::Rejected);
        if let Some(reason) = reason {
            update = update.with_error(reason);
        }
        self.send_update(update);
        Ok(())
    }

    /// Approve every approvable pending action, honoring dependency order.
    ///
    /// Ready actions sort by declared priority (higher first), then original
    /// arrival order, so same-batch siblings keep their sequence. One failed
    /// approval is recorded against that action only; the sweep keeps going,
    /// and actions depending on the failure stay blocked.
    pub async fn approve_all_in_order(&self, active_sheet: &str) -> ApprovalSweep {
        let mut sweep = ApprovalSweep::default();

        loop {
            let ready: Vec<ProposedOperation> = {
                let mut actions = self.actions.lock();
                refresh_can_approve(&mut actions);
                let mut ready: Vec<(usize, &mut PendingAction)> = actions
                    .values_mut()
                    .enumerate()
                    .filter(|(_, action)| {
                        action.status == ActionStatus::Pending && action.can_approve
                    })
                    .collect();
                ready.sort_by(|(idx_a, a), (idx_b, b)| {
                    b.priority.cmp(&a.priority).then(idx_a.cmp(idx_b))
                });
                ready
                    .into_iter()
                    .map(|(_, action)| {
                        action.status = ActionStatus::Approved;
                        ProposedOperation {
                            request_id: action.request_id.clone(),
                            tool: action.tool.clone(),
                            input: action.input.clone(),
                            description: action.description.clone(),
                            dependencies: action.dependencies.clone(),
                            batch_id: action.batch_id.clone(),
                            priority: action.priority,
                        }
                    })
                    .collect()
            };

            if ready.is_empty() {
                break;
            }
            for op in ready {
                let execution = self.run_approved(op, active_sheet).await;
                sweep.executed.push(execution);
            }
        }

        let actions = self.actions.lock();
        sweep.blocked = actions
            .values()
            .filter(|action| action.status == ActionStatus::Pending && !action.can_approve)
            .map(|action| action.request_id.clone())
            .collect();
        if !sweep.blocked.is_empty() {
            info!(blocked = sweep.blocked.len(), "approval sweep left blocked actions");
        }
        sweep
    }

    pub fn summary(&self) -> OperationSummary {
        let mut actions = self.actions.lock();
        refresh_can_approve(&mut actions);

        let mut summary = OperationSummary::default();
        let mut batches: IndexMap<String, BatchRollup> = IndexMap::new();

        for action in actions.values() {
            match action.status {
                ActionStatus::Pending => {
                    summary.pending += 1;
                    if !action.can_approve {
                        summary.has_blocked = true;
                    }
                }
                ActionStatus::Approved => summary.approved += 1,
                ActionStatus::Rejected => summary.rejected += 1,
                ActionStatus::Completed => summary.completed += 1,
                ActionStatus::Failed => summary.failed += 1,
                ActionStatus::Cancelled => summary.cancelled += 1,
            }

            if let Some(batch_id) = &action.batch_id {
                let rollup = batches.entry(batch_id.clone()).or_insert(BatchRollup {
                    id: batch_id.clone(),
                    size: 0,
                    ready_count: 0,
                    can_approve_all: true,
                });
                rollup.size += 1;
                if action.status == ActionStatus::Pending {
                    if action.can_approve {
                        rollup.ready_count += 1;
                    } else {
                        rollup.can_approve_all = false;
                    }
                }
            }
        }

        summary.batches = batches.into_values().collect();
        summary
    }

    pub fn action(&self, request_id: &str) -> Option<PendingAction> {
        let mut actions = self.actions.lock();
        refresh_can_approve(&mut actions);
        actions.get(request_id).cloned()
    }

    pub fn pending_len(&self) -> usize {
        self.actions
            .lock()
            .values()
            .filter(|action| action.status == ActionStatus::Pending)
            .count()
    }

    /// Session-end sweep: cancel still-pending actions and drop everything
    /// terminal. Actions never outlive their session.
    pub fn drain_session(&self) {
        let mut actions = self.actions.lock();
        for action in actions.values_mut() {
            if action.status == ActionStatus::Pending || action.status == ActionStatus::Approved {
                action.status = ActionStatus::Cancelled;
            }
        }
        let dropped = actions.len();
        actions.clear();
        if dropped > 0 {
            debug!(dropped, "approval queue drained at session end");
        }
    }

    async fn run_approved(&self, op: ProposedOperation, active_sheet: &str) -> OperationExecution {
        let result = host::execute_operation(self.host.as_ref(), &op, active_sheet).await;
        let error = result.as_ref().err().map(|err| format!("{err:#}"));
        let status = if result.is_ok() {
            ActionStatus::Completed
        } else {
            ActionStatus::Failed
        };
        self.finish_action(&op.request_id, status, error.clone());

        let update_status = if result.is_ok() {
            OperationStatus::Executed
        } else {
            OperationStatus::Failed
        };
        let mut update = OperationStatusUpdate::new(op.request_id.clone(), update_status);
        if let Some(error) = &error {
            update = update.with_error(error.clone());
        }
        self.send_update(update);

        OperationExecution {
            request_id: op.request_id,
            ok: result.is_ok(),
            error,
        }
    }

    fn record_action(&self, op: &ProposedOperation, status: ActionStatus) -> String {
        let id = Uuid::new_v4().to_string();
        let mut actions = self.actions.lock();
        actions.insert(
            op.request_id.clone(),
            PendingAction {
                id: id.clone(),
                request_id: op.request_id.clone(),
                tool: op.tool.clone(),
                input: op.input.clone(),
                description: op.description.clone(),
                status,
                dependencies: op.dependencies.clone(),
                batch_id: op.batch_id.clone(),
                priority: op.priority,
                can_approve: false,
                created_at: Utc::now().to_rfc3339(),
                error: None,
            },
        );
        refresh_can_approve(&mut actions);
        id
    }

    fn finish_action(&self, request_id: &str, status: ActionStatus, error: Option<String>) {
        let mut actions = self.actions.lock();
        if let Some(action) = actions.get_mut(request_id) {
            action.status = status;
            action.error = error;
        }
        refresh_can_approve(&mut actions);
    }

    fn send_update(&self, update: OperationStatusUpdate) {
        if self.updates.send(update).is_err() {
            debug!("status update channel closed");
        }
    }
}

/// Recompute the derived `can_approve` flag: true only for pending actions
/// whose every dependency is present and completed. Unknown dependency ids
/// count as unmet.
fn refresh_can_approve(actions: &mut IndexMap<String, PendingAction>) {
    let resolved: Vec<(String, bool)> = actions
        .values()
        .map(|action| (action.request_id.clone(), action.status.is_success()))
        .collect();
    let is_met = |dep: &str| {
        resolved
            .iter()
            .any(|(request_id, ok)| request_id == dep && *ok)
    };

    for action in actions.values_mut() {
        action.can_approve = action.status == ActionStatus::Pending
            && action.dependencies.iter().all(|dep| is_met(dep));
    }
}

pub fn is_read_only_tool(tool: &str) -> bool {
    READ_PREFIXES.iter().any(|prefix| tool.starts_with(prefix))
}

/// Opaque-string heuristic backing the `max_formula_complexity` threshold:
/// nesting depth weighs double, plus one per function call and referenced
/// cell. No parsing, no evaluation.
pub fn formula_complexity(formula: &str) -> u32 {
    let mut depth: u32 = 0;
    let mut max_depth: u32 = 0;
    for c in formula.chars() {
        match c {
            '(' => {
                depth += 1;
                max_depth = max_depth.max(depth);
            }
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    let functions = FUNCTION_RE.find_iter(formula).count() as u32;
    let references = REFERENCE_RE.find_iter(formula).count() as u32;
    max_depth * 2 + functions + references
}

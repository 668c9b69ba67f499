mod support;

use assert_matches::assert_matches;
use serde_json::json;
use spreadsheet_preview::autonomy::{AutonomyGate, Disposition};
use spreadsheet_preview::config::{AutonomyMode, AutonomyPolicy, EngineConfig};
use spreadsheet_preview::errors::PreviewError;
use spreadsheet_preview::model::{CellSnapshot, DiffKind, ProposedOperation};
use spreadsheet_preview::preview::{PreviewOrchestrator, PreviewState};
use spreadsheet_preview::queue::BatchQueue;
use std::sync::Arc;
use tokio::sync::mpsc;
use support::MemoryHost;

fn write_op(id: &str, range: &str, value: i64) -> ProposedOperation {
    ProposedOperation::new(
        id,
        "write_range",
        json!({"range": range, "values": [[value]]}),
    )
}

#[tokio::test]
async fn preview_computes_hunks_and_paints_highlights() {
    let host = Arc::new(MemoryHost::new());
    host.set_cell("Sheet1!A1", CellSnapshot::with_value(1));
    let orchestrator = PreviewOrchestrator::new(host.clone(), EngineConfig::default());

    let ops = vec![
        write_op("r1", "Sheet1!A1", 2),
        write_op("r2", "Sheet1!A2", 3),
    ];
    let ready = orchestrator
        .begin_preview("wb-1", ops, "Sheet1")
        .await
        .unwrap();

    assert_eq!(orchestrator.state(), PreviewState::Previewing);
    assert_eq!(ready.hunks.len(), 2);
    assert_eq!(ready.hunks[0].kind, DiffKind::ValueChanged);
    assert_eq!(ready.hunks[1].kind, DiffKind::Added);
    assert_eq!(ready.bounding, vec!["Sheet1!A1:B3".to_string()]);
    assert!(!ready.truncated);

    // Highlights are painted on the host, live cells untouched.
    assert!(host.format("Sheet1!A1").fill_color.is_some());
    assert_eq!(host.cell("Sheet1!A1").unwrap().value, Some(json!(1)));
    assert_eq!(orchestrator.captured_highlight_cells(), 2);
}

#[tokio::test]
async fn a_second_batch_is_rejected_while_previewing() {
    let host = Arc::new(MemoryHost::new());
    let orchestrator = PreviewOrchestrator::new(host, EngineConfig::default());

    orchestrator
        .begin_preview("wb-1", vec![write_op("r1", "A1", 1)], "S")
        .await
        .unwrap();

    let err = orchestrator
        .begin_preview("wb-1", vec![write_op("r2", "B1", 2)], "S")
        .await
        .unwrap_err();
    assert_matches!(err, PreviewError::SessionActive { workbook_id } if workbook_id == "wb-1");
}

#[tokio::test]
async fn a_change_free_batch_surfaces_no_changes() {
    let host = Arc::new(MemoryHost::new());
    host.set_cell("S!A1", CellSnapshot::with_value(5));
    let orchestrator = PreviewOrchestrator::new(host, EngineConfig::default());

    let err = orchestrator
        .begin_preview("wb-1", vec![write_op("r1", "A1", 5)], "S")
        .await
        .unwrap_err();
    assert_matches!(err, PreviewError::NoChanges);
    assert_eq!(orchestrator.state(), PreviewState::Idle);
}

#[tokio::test]
async fn apply_commits_in_order_and_clears_highlights() {
    let host = Arc::new(MemoryHost::new());
    host.set_cell("S!A1", CellSnapshot::with_value(1));
    let orchestrator = PreviewOrchestrator::new(host.clone(), EngineConfig::default());

    let ops = vec![write_op("r1", "A1", 2), write_op("r2", "A2", 3)];
    orchestrator.begin_preview("wb-1", ops, "S").await.unwrap();

    let report = orchestrator.apply_changes().await.unwrap();
    assert!(report.applied);
    assert!(report.error.is_none());
    assert_eq!(report.results.len(), 2);
    assert!(report.results.iter().all(|result| result.ok));

    assert_eq!(host.cell("S!A1").unwrap().value, Some(json!(2)));
    assert_eq!(host.cell("S!A2").unwrap().value, Some(json!(3)));
    assert_eq!(orchestrator.state(), PreviewState::Idle);
    assert_eq!(orchestrator.captured_highlight_cells(), 0, "captures drained");
    assert!(host.format("S!A1").fill_color.is_none(), "highlight removed");
}

#[tokio::test]
async fn cancel_restores_highlights_and_is_idempotent() {
    let host = Arc::new(MemoryHost::new());
    host.set_cell("S!A1", CellSnapshot::with_value(1));
    let orchestrator = PreviewOrchestrator::new(host.clone(), EngineConfig::default());

    orchestrator
        .begin_preview("wb-1", vec![write_op("r1", "A1", 2)], "S")
        .await
        .unwrap();
    assert!(host.format("S!A1").fill_color.is_some());

    orchestrator.cancel_preview().await.unwrap();
    assert_eq!(orchestrator.state(), PreviewState::Idle);
    assert!(host.format("S!A1").fill_color.is_none(), "restored");
    assert_eq!(host.cell("S!A1").unwrap().value, Some(json!(1)), "untouched");
    assert_eq!(orchestrator.captured_highlight_cells(), 0);

    // Cancelling again is a no-op, not an error.
    orchestrator.cancel_preview().await.unwrap();
}

#[tokio::test]
async fn apply_outside_previewing_is_a_typed_error() {
    let host = Arc::new(MemoryHost::new());
    let orchestrator = PreviewOrchestrator::new(host, EngineConfig::default());

    let err = orchestrator.apply_changes().await.unwrap_err();
    assert_matches!(err, PreviewError::InvalidState { state: "idle", .. });
}

#[tokio::test]
async fn failed_commits_fall_back_to_previewing() {
    let host = Arc::new(MemoryHost::new());
    let orchestrator = PreviewOrchestrator::new(host.clone(), EngineConfig::default());

    // The second operation survives simulation as a no-op but cannot be
    // committed; its range never parses.
    let ops = vec![
        write_op("r1", "A1", 7),
        ProposedOperation::new("r2", "write_range", json!({"range": "9Z", "values": [[1]]})),
    ];
    orchestrator.begin_preview("wb-1", ops, "S").await.unwrap();

    let report = orchestrator.apply_changes().await.unwrap();
    assert!(!report.applied);
    assert!(report.error.as_deref().unwrap().contains("1 of 2"));

    let failed = &report.results[1];
    assert!(!failed.ok);
    assert!(failed.error.is_some());
    // The sibling still committed.
    assert_eq!(host.cell("S!A1").unwrap().value, Some(json!(7)));

    assert_eq!(orchestrator.state(), PreviewState::Previewing);
    // The user can still walk away cleanly.
    orchestrator.cancel_preview().await.unwrap();
    assert_eq!(orchestrator.state(), PreviewState::Idle);
}

#[tokio::test]
async fn duplicate_proposals_collapse_within_a_session() {
    let host = Arc::new(MemoryHost::new());
    let orchestrator = PreviewOrchestrator::new(host, EngineConfig::default());

    let mut twin = write_op("r1", "A1", 9);
    twin.request_id = "r2".to_string();
    let ready = orchestrator
        .begin_preview("wb-1", vec![write_op("r1", "A1", 9), twin], "S")
        .await
        .unwrap();

    assert_eq!(ready.hunks.len(), 1);
}

#[tokio::test]
async fn gate_to_queue_to_preview_round_trip() {
    let host = Arc::new(MemoryHost::new());
    host.set_cell("S!B1", CellSnapshot::with_value(10));

    let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
    let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
    let config = EngineConfig::default();
    let batch = Arc::new(BatchQueue::new(config.batch_queue(), batch_tx));
    let gate = AutonomyGate::new(
        AutonomyMode::AgentDefault,
        AutonomyPolicy::default(),
        host.clone(),
        batch.clone(),
        updates_tx,
    );
    let orchestrator = PreviewOrchestrator::new(host.clone(), config);

    for (id, range, value) in [("r1", "B1", 11), ("r2", "B2", 12), ("r3", "B3", 13)] {
        let disposition = gate.submit(write_op(id, range, value), "S").await;
        assert_eq!(disposition, Disposition::QueuedForPreview);
    }
    batch.flush();
    let flushed = batch_rx.try_recv().unwrap();
    assert_eq!(flushed.len(), 3);

    let ready = orchestrator
        .begin_preview("wb-1", flushed, "S")
        .await
        .unwrap();
    assert_eq!(ready.hunks.len(), 3);

    let report = orchestrator.apply_changes().await.unwrap();
    assert!(report.applied);
    assert_eq!(host.cell("S!B2").unwrap().value, Some(json!(12)));
}

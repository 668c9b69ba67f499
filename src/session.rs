use crate::model::ProposedOperation;
use ahash::AHashSet;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

/// Content fingerprint over tool plus input payload. Two proposals with the
/// same tool and byte-identical canonical input collapse to one.
pub fn operation_fingerprint(op: &ProposedOperation) -> String {
    let mut hasher = Sha256::new();
    hasher.update(op.tool.as_bytes());
    hasher.update([0]);
    hasher.update(serde_json::to_vec(&op.input).unwrap_or_default());
    let digest = hasher.finalize();
    let hex = format!("{digest:x}");
    hex.chars().take(16).collect()
}

/// Lifetime of one preview: from "batch accepted" to "applied or cancelled".
///
/// Owns the duplicate-suppression set, which is scoped to the session and
/// dies with it; fingerprints never persist across sessions.
#[derive(Debug)]
pub struct PreviewSession {
    pub id: String,
    pub workbook_id: String,
    pub created_at: DateTime<Utc>,
    seen: AHashSet<String>,
}

impl PreviewSession {
    pub fn new(workbook_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workbook_id: workbook_id.into(),
            created_at: Utc::now(),
            seen: AHashSet::new(),
        }
    }

    /// Record an operation; returns false when an identical one was already
    /// seen in this session.
    pub fn note_operation(&mut self, op: &ProposedOperation) -> bool {
        let fingerprint = operation_fingerprint(op);
        if !self.seen.insert(fingerprint) {
            debug!(
                request_id = %op.request_id,
                tool = %op.tool,
                "duplicate operation suppressed"
            );
            return false;
        }
        true
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_operations_are_suppressed_within_a_session() {
        let mut session = PreviewSession::new("wb-1");
        let op = ProposedOperation::new(
            "r1",
            "write_range",
            json!({"range": "A1", "values": [[1]]}),
        );
        let mut twin = op.clone();
        twin.request_id = "r2".to_string();

        assert!(session.note_operation(&op));
        assert!(!session.note_operation(&twin));

        // A fresh session starts clean.
        let mut next = PreviewSession::new("wb-1");
        assert!(next.note_operation(&op));
    }

    #[test]
    fn fingerprint_distinguishes_payloads() {
        let a = ProposedOperation::new("r1", "write_range", json!({"range": "A1"}));
        let b = ProposedOperation::new("r1", "write_range", json!({"range": "A2"}));
        assert_ne!(operation_fingerprint(&a), operation_fingerprint(&b));
    }
}

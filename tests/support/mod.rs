#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use spreadsheet_preview::address::{CellKey, RangeRef};
use spreadsheet_preview::highlight::{DEFAULT_FILL, DEFAULT_FONT_COLOR, DEFAULT_NUMBER_FORMAT};
use spreadsheet_preview::host::{
    CellFormatUpdate, CellVisualState, CellWriteFailure, SheetHost,
};
use spreadsheet_preview::model::{CellSnapshot, MergeState, WorkbookSnapshot};
use spreadsheet_preview::styles::{self, StyleDescriptor};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Default, Clone, Copy)]
pub struct RoundTrips {
    pub reads: usize,
    pub writes: usize,
}

/// In-memory stand-in for the live spreadsheet. Every trait call counts as
/// one round trip, mirroring how real hosts charge.
#[derive(Default)]
pub struct MemoryHost {
    cells: Mutex<HashMap<String, CellSnapshot>>,
    formats: Mutex<HashMap<String, CellVisualState>>,
    /// Keys whose format writes fail individually (per-cell failure path).
    fail_format_writes: Mutex<HashSet<String>>,
    round_trips: Mutex<RoundTrips>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cell(&self, key: &str, cell: CellSnapshot) {
        self.cells.lock().insert(key.to_string(), cell);
    }

    pub fn cell(&self, key: &str) -> Option<CellSnapshot> {
        self.cells.lock().get(key).cloned()
    }

    pub fn set_format(&self, key: &str, state: CellVisualState) {
        self.formats.lock().insert(key.to_string(), state);
    }

    pub fn format(&self, key: &str) -> CellVisualState {
        self.formats.lock().get(key).cloned().unwrap_or_default()
    }

    pub fn fail_format_writes_for(&self, key: &str) {
        self.fail_format_writes.lock().insert(key.to_string());
    }

    pub fn round_trips(&self) -> RoundTrips {
        *self.round_trips.lock()
    }

    pub fn reset_round_trips(&self) {
        *self.round_trips.lock() = RoundTrips::default();
    }

    fn count_read(&self) {
        self.round_trips.lock().reads += 1;
    }

    fn count_write(&self) {
        self.round_trips.lock().writes += 1;
    }
}

#[async_trait]
impl SheetHost for MemoryHost {
    async fn read_range(&self, range: &RangeRef) -> anyhow::Result<WorkbookSnapshot> {
        self.count_read();
        let cells = self.cells.lock();
        let mut snapshot = WorkbookSnapshot::new();
        for key in range.cells() {
            if let Some(cell) = cells.get(&key.a1()) {
                snapshot.insert(&key, cell.clone());
            }
        }
        Ok(snapshot)
    }

    async fn write_values(&self, range: &RangeRef, values: &[Vec<Value>]) -> anyhow::Result<()> {
        self.count_write();
        let mut cells = self.cells.lock();
        let spread = range.is_single_cell();
        for (row_offset, row) in values.iter().enumerate() {
            let target_row = range.start_row + row_offset as u32;
            if !spread && target_row > range.end_row {
                break;
            }
            for (col_offset, value) in row.iter().enumerate() {
                let target_col = range.start_col + col_offset as u32;
                if !spread && target_col > range.end_col {
                    break;
                }
                if value.is_null() || value.as_str().is_some_and(str::is_empty) {
                    continue;
                }
                let key = CellKey::new(range.sheet.clone(), target_row, target_col).a1();
                let cell = cells.entry(key).or_default();
                match value.as_str().and_then(|s| s.strip_prefix('=')) {
                    Some(formula) => {
                        cell.formula = Some(formula.to_string());
                        cell.value = None;
                    }
                    None => {
                        cell.value = Some(value.clone());
                        cell.formula = None;
                    }
                }
            }
        }
        Ok(())
    }

    async fn write_formula(&self, range: &RangeRef, formula: &str) -> anyhow::Result<()> {
        self.count_write();
        let mut cells = self.cells.lock();
        for key in range.cells() {
            let cell = cells.entry(key.a1()).or_default();
            cell.formula = Some(formula.to_string());
            cell.value = None;
        }
        Ok(())
    }

    async fn clear_range(&self, range: &RangeRef) -> anyhow::Result<()> {
        self.count_write();
        let mut cells = self.cells.lock();
        for key in range.cells() {
            cells.remove(&key.a1());
        }
        Ok(())
    }

    async fn write_format(&self, range: &RangeRef, style: &StyleDescriptor) -> anyhow::Result<()> {
        self.count_write();
        let mut cells = self.cells.lock();
        for key in range.cells() {
            let cell = cells.entry(key.a1()).or_default();
            cell.style = Some(styles::merge_serialized(cell.style.as_deref(), style));
        }
        Ok(())
    }

    async fn merge_cells(&self, range: &RangeRef, preserve_content: bool) -> anyhow::Result<()> {
        self.count_write();
        let mut cells = self.cells.lock();
        let anchor = range.origin();
        cells.entry(anchor.a1()).or_default().merge = Some(MergeState::Anchor {
            area: range.a1(),
        });
        for key in range.cells() {
            if key == anchor {
                continue;
            }
            let cell = cells.entry(key.a1()).or_default();
            cell.merge = Some(MergeState::Covered {
                anchor: anchor.a1(),
            });
            if !preserve_content {
                cell.value = None;
                cell.formula = None;
            }
        }
        Ok(())
    }

    async fn read_cell_formats(&self, keys: &[CellKey]) -> anyhow::Result<Vec<CellVisualState>> {
        self.count_read();
        let formats = self.formats.lock();
        Ok(keys
            .iter()
            .map(|key| formats.get(&key.a1()).cloned().unwrap_or_default())
            .collect())
    }

    async fn write_cell_formats(
        &self,
        updates: &[CellFormatUpdate],
    ) -> anyhow::Result<Vec<CellWriteFailure>> {
        self.count_write();
        let failing = self.fail_format_writes.lock();
        let mut formats = self.formats.lock();
        let mut failures = Vec::new();
        for update in updates {
            let raw = update.key.a1();
            if failing.contains(&raw) {
                failures.push(CellWriteFailure {
                    key: update.key.clone(),
                    error: "injected write failure".to_string(),
                });
                continue;
            }
            // Like real hosts, a null color write is rejected.
            if update.state.fill_color.is_none() {
                failures.push(CellWriteFailure {
                    key: update.key.clone(),
                    error: "host rejected null fill write".to_string(),
                });
                continue;
            }
            formats.insert(raw, normalize(update.state.clone()));
        }
        Ok(failures)
    }
}

/// Real hosts treat a write of the documented defaults as clearing the
/// property; mirror that so capture/restore round trips compare clean.
fn normalize(mut state: CellVisualState) -> CellVisualState {
    if state.fill_color.as_deref() == Some(DEFAULT_FILL) {
        state.fill_color = None;
    }
    if state.font_color.as_deref() == Some(DEFAULT_FONT_COLOR) {
        state.font_color = None;
    }
    if state.number_format.as_deref() == Some(DEFAULT_NUMBER_FORMAT) {
        state.number_format = None;
    }
    state
}

pub fn snapshot(entries: &[(&str, CellSnapshot)]) -> WorkbookSnapshot {
    entries
        .iter()
        .map(|(key, cell)| (key.to_string(), cell.clone()))
        .collect()
}

pub fn value_cell(value: impl Into<Value>) -> CellSnapshot {
    CellSnapshot::with_value(value)
}

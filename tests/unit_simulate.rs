mod support;

use serde_json::json;
use spreadsheet_preview::diff::{DiffOptions, diff_snapshots};
use spreadsheet_preview::model::{CellSnapshot, DiffKind, ProposedOperation, WorkbookSnapshot};
use spreadsheet_preview::simulate::simulate;
use spreadsheet_preview::styles;
use support::{snapshot, value_cell};

fn op(id: &str, tool: &str, input: serde_json::Value) -> ProposedOperation {
    ProposedOperation::new(id, tool, input)
}

#[test]
fn write_range_changes_and_adds_cells() {
    let before = snapshot(&[("Sheet1!A1", value_cell(1))]);
    let ops = vec![op(
        "r1",
        "write_range",
        json!({"range": "Sheet1!A1:A2", "values": [[2], [3]]}),
    )];

    let after = simulate(&before, &ops, "Sheet1");
    assert_eq!(after.len(), 2);
    assert_eq!(after.get("Sheet1!A1").unwrap().value, Some(json!(2)));
    assert_eq!(after.get("Sheet1!A2").unwrap().value, Some(json!(3)));

    let outcome = diff_snapshots(&before, &after, &DiffOptions::default());
    assert_eq!(outcome.hunks.len(), 2);
    assert_eq!(outcome.hunks[0].key.a1(), "Sheet1!A1");
    assert_eq!(outcome.hunks[0].kind, DiffKind::ValueChanged);
    assert_eq!(outcome.hunks[1].key.a1(), "Sheet1!A2");
    assert_eq!(outcome.hunks[1].kind, DiffKind::Added);
}

#[test]
fn clear_range_deletes_keys() {
    let before = snapshot(&[
        ("Sheet1!B1", value_cell("x")),
        ("Sheet1!B2", value_cell("y")),
    ]);
    let ops = vec![op("r1", "clear_range", json!({"range": "Sheet1!B1:B2"}))];

    let after = simulate(&before, &ops, "Sheet1");
    assert!(after.is_empty());

    let outcome = diff_snapshots(&before, &after, &DiffOptions::default());
    assert_eq!(outcome.hunks.len(), 2);
    assert!(outcome.hunks.iter().all(|h| h.kind == DiffKind::Deleted));
}

#[test]
fn simulation_does_not_touch_its_input() {
    let before = snapshot(&[("S!A1", value_cell(1))]);
    let pristine = before.clone();

    let _ = simulate(
        &before,
        &[
            op("r1", "write_range", json!({"range": "A1", "values": [[9]]})),
            op("r2", "clear_range", json!({"range": "A1"})),
        ],
        "S",
    );

    assert_eq!(before, pristine);
}

#[test]
fn no_observable_change_diffs_empty() {
    let before = snapshot(&[("S!A1", value_cell(5))]);

    // Writing the identical value and an unknown tool both change nothing.
    let after = simulate(
        &before,
        &[
            op("r1", "write_range", json!({"range": "A1", "values": [[5]]})),
            op("r2", "rotate_chart", json!({"degrees": 90})),
        ],
        "S",
    );

    let outcome = diff_snapshots(&before, &after, &DiffOptions::default());
    assert!(outcome.hunks.is_empty());
}

#[test]
fn apply_formula_fills_the_whole_range() {
    let before = snapshot(&[("S!C1", value_cell(7))]);
    let after = simulate(
        &before,
        &[op(
            "r1",
            "apply_formula",
            json!({"range": "C1:C3", "formula": "=A1*2"}),
        )],
        "S",
    );

    for key in ["S!C1", "S!C2", "S!C3"] {
        let cell = after.get(key).unwrap();
        assert_eq!(cell.formula.as_deref(), Some("A1*2"), "{key}");
        assert!(cell.value.is_none(), "{key} keeps a stale value");
    }
}

#[test]
fn format_range_merges_into_existing_style() {
    let existing = styles::serialize_style(&styles::StyleDescriptor {
        font: Some(styles::FontDescriptor {
            bold: Some(true),
            ..styles::FontDescriptor::default()
        }),
        ..styles::StyleDescriptor::default()
    });
    let before = snapshot(&[(
        "S!A1",
        CellSnapshot {
            value: Some(json!(1)),
            style: Some(existing),
            ..CellSnapshot::default()
        },
    )]);

    let after = simulate(
        &before,
        &[op(
            "r1",
            "format_range",
            json!({"range": "A1", "style": {"number_format": "0.00"}}),
        )],
        "S",
    );

    let style = styles::parse_style(after.get("S!A1").unwrap().style.as_deref().unwrap()).unwrap();
    assert_eq!(style.font.unwrap().bold, Some(true));
    assert_eq!(style.number_format.as_deref(), Some("0.00"));

    let outcome = diff_snapshots(&before, &after, &DiffOptions::default());
    assert_eq!(outcome.hunks.len(), 1);
    assert_eq!(outcome.hunks[0].kind, DiffKind::StyleChanged);
}

#[test]
fn smart_format_resolves_presets() {
    let before = snapshot(&[("S!D1", value_cell(1234.5))]);
    let after = simulate(
        &before,
        &[op(
            "r1",
            "smart_format_cells",
            json!({"range": "D1", "preset": "currency"}),
        )],
        "S",
    );

    let style = styles::parse_style(after.get("S!D1").unwrap().style.as_deref().unwrap()).unwrap();
    assert_eq!(style.number_format.as_deref(), Some("$#,##0.00"));
}

#[test]
fn formatting_an_empty_cell_creates_it() {
    let before = WorkbookSnapshot::new();
    let after = simulate(
        &before,
        &[op(
            "r1",
            "format_range",
            json!({"range": "B2", "style": {"fill": {"color": "#FF0000"}}}),
        )],
        "S",
    );

    let outcome = diff_snapshots(&before, &after, &DiffOptions::default());
    assert_eq!(outcome.hunks.len(), 1);
    assert_eq!(outcome.hunks[0].kind, DiffKind::Added);
}

#[test]
fn operations_apply_in_array_order() {
    let before = WorkbookSnapshot::new();
    let after = simulate(
        &before,
        &[
            op("r1", "write_range", json!({"range": "A1", "values": [[1]]})),
            op("r2", "write_range", json!({"range": "A1", "values": [[2]]})),
        ],
        "S",
    );

    assert_eq!(after.get("S!A1").unwrap().value, Some(json!(2)));
}

#[test]
fn merge_preserving_content_keeps_covered_values() {
    let before = snapshot(&[("S!A1", value_cell("a")), ("S!B1", value_cell("b"))]);
    let after = simulate(
        &before,
        &[op("r1", "merge_cells", json!({"range": "A1:B1"}))],
        "S",
    );

    assert_eq!(after.get("S!B1").unwrap().value, Some(json!("b")));
    let outcome = diff_snapshots(&before, &after, &DiffOptions::default());
    // Merge metadata registers as a style-level change on both cells.
    assert_eq!(outcome.hunks.len(), 2);
    assert!(outcome.hunks.iter().all(|h| h.kind == DiffKind::StyleChanged));
}

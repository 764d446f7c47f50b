//! Tabular views for the presentation layer, built as polars frames.

use polars::prelude::*;
use std::collections::HashSet;

use crate::allocation::AllocationTable;
use crate::calculations::BuildingSummary;
use crate::catalog::Product;
use crate::floor::{Floor, FloorPlateTemplate, resolve_template};

fn highest_first(floors: &[Floor]) -> Vec<&Floor> {
    let mut ordered: Vec<&Floor> = floors.iter().collect();
    ordered.sort_by(|a, b| b.position.cmp(&a.position).then(a.id.cmp(&b.id)));
    ordered
}

/// The floor stack, top floor first. Unresolved templates show as nulls.
pub fn floors_frame(floors: &[Floor], templates: &[FloorPlateTemplate]) -> PolarsResult<DataFrame> {
    let ordered = highest_first(floors);
    let mut ids = Vec::with_capacity(ordered.len());
    let mut positions = Vec::with_capacity(ordered.len());
    let mut labels = Vec::with_capacity(ordered.len());
    let mut kinds = Vec::with_capacity(ordered.len());
    let mut template_names: Vec<Option<String>> = Vec::with_capacity(ordered.len());
    let mut areas: Vec<Option<f64>> = Vec::with_capacity(ordered.len());

    for floor in ordered {
        let template = resolve_template(floor, templates);
        ids.push(floor.id);
        positions.push(floor.position);
        labels.push(floor.label.clone());
        kinds.push(floor.floor_type.as_str().to_string());
        template_names.push(template.map(|t| t.name.clone()));
        areas.push(template.map(|t| t.gross_area));
    }

    DataFrame::new(vec![
        Column::new("id".into(), ids),
        Column::new("position".into(), positions),
        Column::new("label".into(), labels),
        Column::new("floor_type".into(), kinds),
        Column::new("template".into(), template_names),
        Column::new("gross_area".into(), areas),
    ])
}

/// One row per floor (top first), one column per unit type, plus a row total.
pub fn allocation_matrix(
    floors: &[Floor],
    products: &[Product],
    allocations: &AllocationTable,
) -> PolarsResult<DataFrame> {
    let ordered = highest_first(floors);
    let mut columns = vec![Column::new(
        "floor".into(),
        ordered.iter().map(|f| f.label.clone()).collect::<Vec<_>>(),
    )];

    let mut seen = HashSet::new();
    let mut totals = vec![0u64; ordered.len()];
    for unit_type in products.iter().flat_map(|p| p.unit_types.iter()) {
        let name = if seen.insert(unit_type.unit_type.clone()) {
            unit_type.unit_type.clone()
        } else {
            format!("{}#{}", unit_type.unit_type, unit_type.id)
        };
        let quantities: Vec<u32> = ordered
            .iter()
            .map(|floor| allocations.quantity(floor.id, unit_type.id))
            .collect();
        for (total, quantity) in totals.iter_mut().zip(&quantities) {
            *total += u64::from(*quantity);
        }
        columns.push(Column::new(name.into(), quantities));
    }
    columns.push(Column::new("total_units".into(), totals));
    DataFrame::new(columns)
}

pub fn template_usage_frame(summary: &BuildingSummary) -> PolarsResult<DataFrame> {
    let usage = &summary.template_usage;
    DataFrame::new(vec![
        Column::new(
            "template".into(),
            usage.iter().map(|u| u.name.clone()).collect::<Vec<_>>(),
        ),
        Column::new(
            "floors".into(),
            usage.iter().map(|u| u.floor_count as u32).collect::<Vec<_>>(),
        ),
        Column::new(
            "total_area".into(),
            usage.iter().map(|u| u.total_area).collect::<Vec<_>>(),
        ),
        Column::new(
            "percentage".into(),
            usage.iter().map(|u| u.percentage).collect::<Vec<_>>(),
        ),
    ])
}

fn cell(value: &AnyValue<'_>) -> String {
    match value {
        AnyValue::Null => String::new(),
        AnyValue::Int32(v) => v.to_string(),
        AnyValue::Int64(v) => v.to_string(),
        AnyValue::UInt32(v) => v.to_string(),
        AnyValue::Float64(v) => format!("{v:.2}"),
        AnyValue::String(s) => s.to_string(),
        other => other.to_string(),
    }
}

/// Plain-text grid rendering for terminals.
pub fn render_text_table(df: &DataFrame) -> String {
    let columns = df.get_columns();
    let names: Vec<String> = columns.iter().map(|c| c.name().to_string()).collect();
    let rows: Vec<Vec<String>> = (0..df.height())
        .map(|row| {
            columns
                .iter()
                .map(|col| col.get(row).map(|v| cell(&v)).unwrap_or_default())
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = names.iter().map(|n| n.len()).collect();
    for row in &rows {
        for (width, value) in widths.iter_mut().zip(row) {
            *width = (*width).max(value.len());
        }
    }

    let mut sep = String::from("+");
    for w in &widths {
        sep.push_str(&"-".repeat(w + 2));
        sep.push('+');
    }

    let line = |values: &[String]| {
        let mut out = String::from("|");
        for (value, width) in values.iter().zip(&widths) {
            out.push_str(&format!(" {value:<width$} |"));
        }
        out
    };

    let mut out = String::new();
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&line(&names));
    out.push('\n');
    out.push_str(&sep);
    out.push('\n');
    for row in &rows {
        out.push_str(&line(row));
        out.push('\n');
    }
    out.push_str(&sep);
    out.push('\n');
    out
}

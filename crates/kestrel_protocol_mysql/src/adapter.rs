//! Result-shape adaptation.
//!
//! Every reply — backend or synthesized — passes through here before it
//! reaches the wire codec, which requires column names to be non-empty,
//! unique, and to match row arity exactly. Adjustments are logged one per
//! change and are never fatal.

use kestrel_common::row::{ColumnDef, ScalarValue};

/// Enforce the wire codec's result-shape invariants:
/// column/row arity, non-empty names, no literal `NULL` names, uniqueness.
pub fn adapt(
    statement_id: u64,
    mut columns: Vec<ColumnDef>,
    mut rows: Vec<Vec<ScalarValue>>,
) -> (Vec<ColumnDef>, Vec<Vec<ScalarValue>>) {
    // Arity: widen the column list to the widest row, then pad narrow rows
    // with NULL. Real columns are never shed; rows narrower than the column
    // list gain NULLs instead.
    let widest_row = rows.iter().map(|row| row.len()).max().unwrap_or(0);
    if widest_row > columns.len() {
        tracing::warn!(
            statement_id,
            columns = columns.len(),
            widest_row,
            "padding column list with synthetic names to match row width"
        );
        for index in columns.len()..widest_row {
            columns.push(ColumnDef::text(format!("column_{}", index + 1)));
        }
    }
    let width = columns.len();
    for row in rows.iter_mut() {
        if row.len() < width {
            tracing::warn!(
                statement_id,
                row_width = row.len(),
                width,
                "padding short row with NULLs"
            );
            row.resize(width, ScalarValue::Null);
        }
    }

    // A column literally named NULL confuses clients that render NULL
    // headers as missing columns.
    for (index, column) in columns.iter_mut().enumerate() {
        if column.name.eq_ignore_ascii_case("null") {
            let renamed = format!("expr_{}", index + 1);
            tracing::warn!(statement_id, from = %column.name, to = %renamed, "renaming NULL column");
            column.name = renamed;
        }
    }

    // Empty or whitespace-only names.
    for (index, column) in columns.iter_mut().enumerate() {
        if column.name.trim().is_empty() {
            let renamed = format!("column_{}", index + 1);
            tracing::warn!(statement_id, to = %renamed, "naming empty column");
            column.name = renamed;
        }
    }

    // Uniqueness: later duplicates get a positional suffix.
    for index in 0..columns.len() {
        let duplicated = columns[..index]
            .iter()
            .any(|earlier| earlier.name.eq_ignore_ascii_case(&columns[index].name));
        if duplicated {
            let renamed = format!("{}_{}", columns[index].name, index + 1);
            tracing::warn!(
                statement_id,
                from = %columns[index].name,
                to = %renamed,
                "disambiguating duplicate column name"
            );
            columns[index].name = renamed;
        }
    }

    (columns, rows)
}

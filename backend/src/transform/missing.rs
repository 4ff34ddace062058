//! Missing-value policies: drop incomplete rows, or fill per column.

use std::collections::HashMap;

use crate::analysis::profiler::{mean, median};
use crate::models::{Cell, MissingStrategy, Table};

/// What a missing-value pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MissingOutcome {
    pub rows_dropped: usize,
    pub cells_filled: usize,
    /// Columns that still have missing cells because no fill value exists.
    pub unresolved_columns: Vec<String>,
}

pub fn handle_missing(table: &mut Table, strategy: MissingStrategy) -> MissingOutcome {
    match strategy {
        MissingStrategy::None => MissingOutcome::default(),
        MissingStrategy::Drop => drop_incomplete_rows(table),
        MissingStrategy::FillMean | MissingStrategy::FillMedian => fill_numeric(table, strategy),
        MissingStrategy::FillMode => fill_mode(table),
    }
}

fn drop_incomplete_rows(table: &mut Table) -> MissingOutcome {
    let before = table.rows.len();
    table.rows.retain(|row| !row.iter().any(Cell::is_missing));
    MissingOutcome {
        rows_dropped: before - table.rows.len(),
        ..MissingOutcome::default()
    }
}

/// Fill numeric columns with their mean or median. Non-numeric columns are
/// skipped; numeric fills on columns with no values at all are reported.
fn fill_numeric(table: &mut Table, strategy: MissingStrategy) -> MissingOutcome {
    let mut outcome = MissingOutcome::default();

    for index in 0..table.column_count() {
        let mut present = Vec::new();
        let mut missing = 0;
        let mut numeric = true;
        let mut integral = true;
        for cell in table.column(index) {
            if cell.is_missing() {
                missing += 1;
                continue;
            }
            match cell.as_f64() {
                Some(v) => {
                    integral &= cell.is_integral();
                    present.push(v);
                }
                None => {
                    numeric = false;
                    break;
                }
            }
        }
        if !numeric || missing == 0 {
            continue;
        }

        let fill = match strategy {
            MissingStrategy::FillMedian => median(&mut present),
            _ => mean(&present),
        };
        let Some(fill) = fill else {
            outcome.unresolved_columns.push(table.headers[index].clone());
            continue;
        };
        let value = if integral && fill.fract() == 0.0 {
            Cell::Int(fill as i64)
        } else {
            Cell::Float(fill)
        };
        outcome.cells_filled += fill_column(table, index, &value);
    }
    outcome
}

/// Fill every column with its most frequent value; ties go to the value seen first.
fn fill_mode(table: &mut Table) -> MissingOutcome {
    let mut outcome = MissingOutcome::default();

    for index in 0..table.column_count() {
        // printed value -> (count, first row, cell)
        let mut counts: HashMap<String, (usize, usize, &Cell)> = HashMap::new();
        let mut missing = 0;
        for (row, cell) in table.column(index).enumerate() {
            if cell.is_missing() {
                missing += 1;
                continue;
            }
            counts
                .entry(cell.to_string())
                .and_modify(|entry| entry.0 += 1)
                .or_insert((1, row, cell));
        }
        if missing == 0 {
            continue;
        }

        let mode = counts
            .into_values()
            .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(_, _, cell)| cell.clone());
        match mode {
            Some(value) => outcome.cells_filled += fill_column(table, index, &value),
            None => outcome.unresolved_columns.push(table.headers[index].clone()),
        }
    }
    outcome
}

fn fill_column(table: &mut Table, index: usize, value: &Cell) -> usize {
    let mut filled = 0;
    for row in &mut table.rows {
        if let Some(cell) = row.get_mut(index) {
            if cell.is_missing() {
                *cell = value.clone();
                filled += 1;
            }
        }
    }
    filled
}

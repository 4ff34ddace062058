//! Row and column cleaning steps.
//!
//! Every step mutates the table in place and is a no-op on a table it has
//! already cleaned.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::analysis::profiler::{cast_cell, infer_column};
use crate::models::{Cell, ColumnType, Table};

/// Runs of whitespace, punctuation (underscore included) and symbols.
static SEPARATOR_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\p{P}\p{S}]+").expect("separator pattern is a valid regex"));

/// Drop rows that repeat an earlier row exactly; returns how many were dropped.
pub fn remove_duplicates(table: &mut Table) -> usize {
    let before = table.rows.len();
    let mut seen = HashSet::with_capacity(before);
    table.rows.retain(|row| seen.insert(Table::row_key(row)));
    before - table.rows.len()
}

/// Lowercase a header and collapse separator runs into single underscores.
pub fn standardize_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    SEPARATOR_RUN
        .replace_all(&lowered, "_")
        .trim_matches('_')
        .to_string()
}

/// Standardize every header. Names that come out empty become
/// `column_<n>`; collisions get `_2`, `_3`, ... suffixes.
pub fn standardize_columns(table: &mut Table) {
    let mut taken = HashSet::with_capacity(table.headers.len());
    for (i, header) in table.headers.iter_mut().enumerate() {
        let mut base = standardize_name(header);
        if base.is_empty() {
            base = format!("column_{}", i + 1);
        }
        let mut candidate = base.clone();
        let mut n = 2;
        while taken.contains(&candidate) {
            candidate = format!("{base}_{n}");
            n += 1;
        }
        taken.insert(candidate.clone());
        *header = candidate;
    }
}

/// Strip surrounding whitespace from text cells.
pub fn trim_whitespace(table: &mut Table) {
    for cell in table.rows.iter_mut().flatten() {
        if let Cell::Text(s) = cell {
            let trimmed = s.trim();
            if trimmed.len() != s.len() {
                *s = trimmed.to_string();
            }
        }
    }
}

/// Re-infer each column's type and cast its cells. Text columns are left
/// untouched; date columns are read under the single convention that fits
/// every value. Returns the inferred type per column.
pub fn convert_types(table: &mut Table) -> Vec<ColumnType> {
    let mut types = Vec::with_capacity(table.column_count());
    for index in 0..table.column_count() {
        let inference = infer_column(table.column(index));
        if inference.ty != ColumnType::Text {
            for row in &mut table.rows {
                if let Some(cell) = row.get_mut(index) {
                    *cell = cast_cell(cell, inference);
                }
            }
        }
        types.push(inference.ty);
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_duplicates_keeps_first() {
        let mut table = Table::from_strs(&["a", "b"], &[&["1", "x"], &["2", "y"], &["1", "x"], &["1", "z"]]);
        let removed = remove_duplicates(&mut table);

        assert_eq!(removed, 1);
        assert_eq!(table, Table::from_strs(&["a", "b"], &[&["1", "x"], &["2", "y"], &["1", "z"]]));
        assert_eq!(remove_duplicates(&mut table), 0);
    }

    #[test]
    fn test_standardize_name() {
        assert_eq!(standardize_name("First Name"), "first_name");
        assert_eq!(standardize_name("  Total Sales ($) "), "total_sales");
        assert_eq!(standardize_name("a--b__c"), "a_b_c");
        assert_eq!(standardize_name("Café Crème"), "café_crème");
        assert_eq!(standardize_name("first_name"), "first_name");
    }

    #[test]
    fn test_standardize_columns_resolves_collisions() {
        let mut table = Table::from_strs(&["A b", "a-b", "???", "a_b_2"], &[]);
        standardize_columns(&mut table);
        assert_eq!(table.headers, vec!["a_b", "a_b_2", "column_3", "a_b_2_2"]);

        let once = table.headers.clone();
        standardize_columns(&mut table);
        assert_eq!(table.headers, once);
    }

    #[test]
    fn test_trim_whitespace_only_touches_text() {
        let mut table = Table::new(
            vec!["a".into(), "b".into()],
            vec![vec![Cell::text("  hi "), Cell::Int(3)]],
        );
        trim_whitespace(&mut table);
        assert_eq!(table.rows[0], vec![Cell::text("hi"), Cell::Int(3)]);
    }

    #[test]
    fn test_convert_types() {
        let mut table = Table::from_strs(
            &["n", "f", "flag", "when", "name"],
            &[&["1", "1.5", "true", "2024-01-05", "x"], &["", "2", "no", "2024-02-01", " "]],
        );
        let types = convert_types(&mut table);

        assert_eq!(
            types,
            vec![
                ColumnType::Integer,
                ColumnType::Float,
                ColumnType::Boolean,
                ColumnType::DateTime,
                ColumnType::Text
            ]
        );
        assert_eq!(table.rows[0][0], Cell::Int(1));
        assert_eq!(table.rows[1][0], Cell::Null);
        assert_eq!(table.rows[1][1], Cell::Float(2.0));
        assert_eq!(table.rows[1][2], Cell::Bool(false));
        // text columns are not rewritten, not even their missing cells
        assert_eq!(table.rows[1][4], Cell::text(" "));

        let once = table.clone();
        convert_types(&mut table);
        assert_eq!(table, once);
    }

    #[test]
    fn test_convert_types_keeps_date_order_and_fractions() {
        let mut table = Table::from_strs(
            &["us", "stamp"],
            &[
                &["01/13/2024", "2024-01-01 10:00:00.750"],
                &["02/01/2024", "2024-01-01 10:00:00.250"],
            ],
        );
        convert_types(&mut table);

        let printed: Vec<Vec<String>> = table
            .rows
            .iter()
            .map(|row| row.iter().map(|c| c.to_string()).collect())
            .collect();
        assert_eq!(printed[0], vec!["2024-01-13", "2024-01-01 10:00:00.750"]);
        assert_eq!(printed[1], vec!["2024-02-01", "2024-01-01 10:00:00.250"]);

        // distinct timestamps stay distinct for later steps
        assert_eq!(remove_duplicates(&mut table), 0);
    }
}

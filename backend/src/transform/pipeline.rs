//! The cleaning pipeline: a fixed sequence of steps applied in one pass.
//!
//! Order is always `remove_duplicates`, `standardize_columns`,
//! `trim_whitespace`, `convert_types`, `handle_missing`; disabled steps are
//! skipped. Running the same options again on the output changes nothing.
//!
//! # Example
//!
//! ```rust
//! use cleanser::models::{MissingStrategy, PreprocessOptions, Table};
//! use cleanser::transform::run_pipeline;
//!
//! let table = Table::from_strs(&["Value"], &[&["1"], &[""], &["3"]]);
//! let options = PreprocessOptions {
//!     standardize_columns: true,
//!     handle_missing: MissingStrategy::FillMean,
//!     ..PreprocessOptions::default()
//! };
//! let output = run_pipeline(table, &options);
//!
//! assert_eq!(output.table.headers, vec!["value"]);
//! assert_eq!(output.table.rows[1][0].to_string(), "2");
//! ```

use serde::Serialize;
use std::fmt;

use super::missing::handle_missing;
use super::steps;
use crate::models::{MissingStrategy, PreprocessOptions, Table};

/// A pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RemoveDuplicates,
    StandardizeColumns,
    TrimWhitespace,
    ConvertTypes,
    HandleMissing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::RemoveDuplicates => "remove_duplicates",
            Stage::StandardizeColumns => "standardize_columns",
            Stage::TrimWhitespace => "trim_whitespace",
            Stage::ConvertTypes => "convert_types",
            Stage::HandleMissing => "handle_missing",
        };
        f.write_str(name)
    }
}

/// Reported after each enabled stage finishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageProgress {
    pub stage: Stage,
    pub completed: usize,
    pub total: usize,
    pub rows: usize,
}

impl StageProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Pipeline result.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub table: Table,
    /// Rows in the output table.
    pub rows_processed: usize,
    /// Input rows minus output rows.
    pub rows_removed: usize,
    pub duplicates_removed: usize,
    pub unresolved_columns: Vec<String>,
}

/// Run the pipeline without progress reporting.
pub fn run_pipeline(table: Table, options: &PreprocessOptions) -> PipelineOutput {
    run_pipeline_with_progress(table, options, |_| {})
}

/// Run the pipeline, calling `on_stage` after every enabled stage.
pub fn run_pipeline_with_progress(
    mut table: Table,
    options: &PreprocessOptions,
    mut on_stage: impl FnMut(StageProgress),
) -> PipelineOutput {
    let input_rows = table.row_count();
    let total = options.active_steps();
    let mut completed = 0;
    let mut report = |stage: Stage, table: &Table| {
        completed += 1;
        on_stage(StageProgress { stage, completed, total, rows: table.row_count() });
    };

    let mut duplicates_removed = 0;
    if options.remove_duplicates {
        duplicates_removed = steps::remove_duplicates(&mut table);
        report(Stage::RemoveDuplicates, &table);
    }
    if options.standardize_columns {
        steps::standardize_columns(&mut table);
        report(Stage::StandardizeColumns, &table);
    }
    if options.trim_whitespace {
        steps::trim_whitespace(&mut table);
        report(Stage::TrimWhitespace, &table);
    }
    if options.convert_types {
        steps::convert_types(&mut table);
        report(Stage::ConvertTypes, &table);
    }
    let mut unresolved_columns = Vec::new();
    if options.handle_missing != MissingStrategy::None {
        let outcome = handle_missing(&mut table, options.handle_missing);
        unresolved_columns = outcome.unresolved_columns;
        report(Stage::HandleMissing, &table);
    }

    let rows_processed = table.row_count();
    PipelineOutput {
        table,
        rows_processed,
        rows_removed: input_rows - rows_processed,
        duplicates_removed,
        unresolved_columns,
    }
}

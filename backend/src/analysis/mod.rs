//! Data-quality analysis.
//!
//! Small files are scanned in full. Files at or above the sampling threshold
//! are read only up to a fixed row count; the report then describes that
//! sample and says so (`is_sampled`, `sample_fraction`, `accuracy`).
//! Duplicate counts on a sample are reported as found, never rescaled.

pub mod profiler;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use tracing::{debug, info};

use crate::config::Limits;
use crate::error::{AnalysisError, AnalysisResult};
use crate::models::{Cell, Table};
use crate::parser::{self, LoadedTable};

pub use profiler::{ColumnProfile, NumericSummary, UniqueCount};

/// Round to 2 decimals, the precision of every percentage in a report.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether counts in a report are exact or describe a sample only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    Exact,
    SampledEstimate,
}

/// Quality report for one table.
///
/// `total_rows` counts scanned rows, so `total_cells == total_rows * total_columns`
/// always holds. For sampled reports the full-file row count is the
/// extrapolated `estimated_total_rows`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub total_rows: usize,
    pub total_columns: usize,
    pub total_cells: usize,
    pub missing_cells: usize,
    pub missing_percentage: f64,
    pub duplicate_rows: usize,
    /// File size in MiB.
    pub memory_estimate: f64,
    pub is_sampled: bool,
    pub sample_fraction: Option<f64>,
    pub estimated_total_rows: u64,
    pub accuracy: Accuracy,
    #[serde(serialize_with = "columns_as_map")]
    pub columns: Vec<ColumnProfile>,
    pub statistics: BTreeMap<String, NumericSummary>,
}

impl QualityReport {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Serialize profiles as a name-keyed map, keeping header order.
fn columns_as_map<S: Serializer>(columns: &[ColumnProfile], serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(columns.len()))?;
    for profile in columns {
        map.serialize_entry(&profile.name, profile)?;
    }
    map.end()
}

/// How the analyzed table was obtained from its source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanInfo {
    pub byte_size: u64,
    pub is_sampled: bool,
    pub estimated_total_rows: u64,
}

impl ScanInfo {
    /// A complete scan of `rows` rows.
    pub fn full(byte_size: u64, rows: usize) -> Self {
        Self { byte_size, is_sampled: false, estimated_total_rows: rows as u64 }
    }

    fn from_loaded(loaded: &LoadedTable, byte_size: u64, is_sampled: bool) -> Self {
        let rows = loaded.table.row_count() as u64;
        let estimated_total_rows = if is_sampled && loaded.truncated && loaded.bytes_read > 0 {
            let ratio = byte_size as f64 / loaded.bytes_read as f64;
            ((rows as f64 * ratio).ceil() as u64).max(rows)
        } else {
            rows
        };
        Self { byte_size, is_sampled, estimated_total_rows }
    }

    fn sample_fraction(&self, rows: usize) -> Option<f64> {
        if !self.is_sampled {
            return None;
        }
        if self.estimated_total_rows == 0 {
            return Some(1.0);
        }
        Some((rows as f64 / self.estimated_total_rows as f64).min(1.0))
    }
}

/// A report together with the rows it was computed from.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub report: QualityReport,
    pub table: Table,
}

/// Analyze a tabular source of `byte_size` bytes, sampling if it is large.
pub fn analyze_source<R: Read>(reader: R, byte_size: u64, limits: &Limits) -> AnalysisResult<Analysis> {
    let is_sampled = byte_size >= limits.sampling_threshold_bytes;
    let row_limit = is_sampled.then_some(limits.sample_rows);

    let loaded = parser::read_table(reader, row_limit)?;
    debug!(
        encoding = loaded.encoding.label(),
        delimiter = %(loaded.delimiter as char),
        rows = loaded.table.row_count(),
        truncated = loaded.truncated,
        "loaded table for analysis"
    );

    let scan = ScanInfo::from_loaded(&loaded, byte_size, is_sampled);
    let report = analyze_table(&loaded.table, scan, limits)?;
    info!(
        rows = report.total_rows,
        columns = report.total_columns,
        sampled = report.is_sampled,
        "analysis complete"
    );

    Ok(Analysis { report, table: loaded.table })
}

/// Build the report for an already loaded table.
pub fn analyze_table(table: &Table, scan: ScanInfo, limits: &Limits) -> AnalysisResult<QualityReport> {
    if table.column_count() == 0 {
        return Err(AnalysisError::NoColumns);
    }

    let total_rows = table.row_count();
    let total_columns = table.column_count();
    let total_cells = total_rows * total_columns;

    let mut columns = Vec::with_capacity(total_columns);
    let mut statistics = BTreeMap::new();
    for (index, name) in table.headers.iter().enumerate() {
        let cells: Vec<&Cell> = table.column(index).collect();
        let profile = profiler::profile_column(name, &cells, limits);
        if profile.inferred_type.is_numeric() {
            if let Some(summary) = profiler::summarize_numeric(&cells) {
                statistics.insert(name.clone(), summary);
            }
        }
        columns.push(profile);
    }

    let missing_cells: usize = columns.iter().map(|c| c.missing_count).sum();
    let missing_percentage = if total_cells == 0 {
        0.0
    } else {
        round2(missing_cells as f64 / total_cells as f64 * 100.0)
    };

    Ok(QualityReport {
        total_rows,
        total_columns,
        total_cells,
        missing_cells,
        missing_percentage,
        duplicate_rows: count_duplicate_rows(table),
        memory_estimate: round2(scan.byte_size as f64 / (1024.0 * 1024.0)),
        is_sampled: scan.is_sampled,
        sample_fraction: scan.sample_fraction(total_rows),
        estimated_total_rows: scan.estimated_total_rows,
        accuracy: if scan.is_sampled { Accuracy::SampledEstimate } else { Accuracy::Exact },
        columns,
        statistics,
    })
}

/// Rows that exactly repeat an earlier row.
pub fn count_duplicate_rows(table: &Table) -> usize {
    let mut seen = HashSet::with_capacity(table.row_count());
    table
        .rows
        .iter()
        .filter(|row| !seen.insert(Table::row_key(row)))
        .count()
}

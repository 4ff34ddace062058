//! Domain models shared by the analyzer, the transform pipeline and the jobs.
//!
//! - [`Cell`] - one value of a table, raw text until types are converted
//! - [`Table`] - headers plus rows of cells, fully in memory
//! - [`ColumnType`] - the closed set of inferred column types
//! - [`PreprocessOptions`] / [`MissingStrategy`] - what a cleaning job applies
//! - [`UploadedFile`] - metadata kept next to every stored artifact

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Cells
// =============================================================================

/// Markers that count as missing in addition to blank cells.
pub const NULL_MARKERS: &[&str] = &[
    "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "-nan", "null", "NULL", "None", "#N/A", "<NA>",
];

/// True when a raw field is blank, whitespace-only or a null marker.
pub fn is_missing_text(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || NULL_MARKERS.contains(&trimmed)
}

/// A single table value.
///
/// Loading produces `Text` for every field; `convert_types` turns text into
/// the typed variants and normalizes missing cells to `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Null => true,
            Cell::Text(s) => is_missing_text(s),
            Cell::Float(f) => f.is_nan(),
            _ => false,
        }
    }

    /// Numeric value of an `Int`/`Float` cell or of text that parses as a finite number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if f.is_finite() => Some(*f),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    /// True for `Int` cells and for text that parses as an integer.
    pub fn is_integral(&self) -> bool {
        match self {
            Cell::Int(_) => true,
            Cell::Text(s) => s.trim().parse::<i64>().is_ok(),
            _ => false,
        }
    }
}

impl fmt::Display for Cell {
    /// Printable representation. This is what gets written to CSV and what
    /// row-level comparisons (duplicates, mode) operate on.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Bool(b) => write!(f, "{b}"),
            Cell::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Cell::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

// =============================================================================
// Tables
// =============================================================================

/// An in-memory table. Every row has exactly `headers.len()` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self { headers, rows }
    }

    /// Build a table from string literals; blank strings stay as text.
    pub fn from_strs(headers: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|v| Cell::text(*v)).collect())
                .collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Cells of one column in row order.
    pub fn column(&self, index: usize) -> impl Iterator<Item = &Cell> + '_ {
        self.rows.iter().filter_map(move |row| row.get(index))
    }

    /// Printable identity of a row, used for exact-duplicate comparison.
    pub fn row_key(row: &[Cell]) -> String {
        let mut key = String::new();
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                key.push('\u{1f}');
            }
            key.push_str(&cell.to_string());
        }
        key
    }
}

// =============================================================================
// Column Types
// =============================================================================

/// Inferred column type, tried in declaration order. `Text` is the
/// definitive fallback when no stricter type accepts every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    DateTime,
    Boolean,
    Text,
}

impl ColumnType {
    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::DateTime => "datetime",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Preprocess Options
// =============================================================================

/// Policy for cells that are still missing at the end of the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStrategy {
    #[default]
    None,
    Drop,
    FillMean,
    FillMedian,
    FillMode,
}

/// Cleaning steps requested for one job. Immutable once the job exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessOptions {
    pub remove_duplicates: bool,
    pub standardize_columns: bool,
    pub trim_whitespace: bool,
    pub convert_types: bool,
    pub handle_missing: MissingStrategy,
}

impl PreprocessOptions {
    /// Number of pipeline stages these options enable.
    pub fn active_steps(&self) -> usize {
        [
            self.remove_duplicates,
            self.standardize_columns,
            self.trim_whitespace,
            self.convert_types,
            self.handle_missing != MissingStrategy::None,
        ]
        .into_iter()
        .filter(|enabled| *enabled)
        .count()
    }
}

// =============================================================================
// Uploaded Files
// =============================================================================

/// Metadata of a stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_id: String,
    pub byte_size: u64,
    pub row_count_estimate: Option<u64>,
    pub original_name: Option<String>,
    /// Input file this artifact was produced from, for job outputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UploadedFile {
    /// Name offered to a downloading client.
    pub fn download_name(&self) -> String {
        let base = self.original_name.as_deref().unwrap_or("data.csv");
        if self.derived_from.is_some() {
            format!("processed_{base}")
        } else {
            base.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_definition() {
        assert!(Cell::text("").is_missing());
        assert!(Cell::text("   ").is_missing());
        assert!(Cell::text("NA").is_missing());
        assert!(Cell::text(" null ").is_missing());
        assert!(Cell::Null.is_missing());
        assert!(!Cell::text("0").is_missing());
        assert!(!Cell::text("none of these").is_missing());
    }

    #[test]
    fn test_cell_display() {
        assert_eq!(Cell::Float(2.0).to_string(), "2");
        assert_eq!(Cell::Float(2.5).to_string(), "2.5");
        assert_eq!(Cell::Bool(true).to_string(), "true");
        assert_eq!(Cell::Null.to_string(), "");
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(Cell::Date(date).to_string(), "2024-01-05");

        let whole = date.and_hms_opt(10, 0, 0).unwrap();
        assert_eq!(Cell::DateTime(whole).to_string(), "2024-01-05 10:00:00");
        let fraction = date.and_hms_milli_opt(10, 0, 0, 750).unwrap();
        assert_eq!(Cell::DateTime(fraction).to_string(), "2024-01-05 10:00:00.750");
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let opts: PreprocessOptions =
            serde_json::from_str(r#"{"handle_missing": "fill_mean"}"#).unwrap();
        assert_eq!(opts.handle_missing, MissingStrategy::FillMean);
        assert!(!opts.remove_duplicates);
        assert_eq!(opts.active_steps(), 1);
    }

    #[test]
    fn test_download_name() {
        let mut file = UploadedFile {
            file_id: "f1".into(),
            byte_size: 10,
            row_count_estimate: Some(1),
            original_name: Some("sales.csv".into()),
            derived_from: None,
            created_at: Utc::now(),
        };
        assert_eq!(file.download_name(), "sales.csv");
        file.derived_from = Some("f0".into());
        assert_eq!(file.download_name(), "processed_sales.csv");
    }
}

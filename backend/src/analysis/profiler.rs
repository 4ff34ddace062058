//! Per-column profiling: type inference, missing values, cardinality and
//! sample values, plus the value parsers shared with type conversion.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::collections::HashSet;

use crate::config::Limits;
use crate::models::{Cell, ColumnType};

use super::round2;

/// Field orders accepted for dates and timestamps.
///
/// A column is read under exactly one convention so `01/02/2024` never means
/// January in one row and February in the next. Timestamps carrying a UTC
/// offset are not recognized and stay text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateConvention {
    /// `2024-01-31`, `2024-01-31 08:30:00.250`, `2024-01-31T08:30`
    Iso,
    /// `2024/01/31`
    YearSlash,
    /// `31/01/2024`, `31/01/2024 08:30:00`
    DayFirst,
    /// `01/31/2024`, `01/31/2024 08:30:00`
    MonthFirst,
    /// `31.01.2024`
    Dotted,
}

impl DateConvention {
    /// Every convention, in the order ambiguous columns are resolved.
    pub const ALL: [DateConvention; 5] = [
        DateConvention::Iso,
        DateConvention::YearSlash,
        DateConvention::DayFirst,
        DateConvention::MonthFirst,
        DateConvention::Dotted,
    ];

    fn date_format(self) -> &'static str {
        match self {
            DateConvention::Iso => "%Y-%m-%d",
            DateConvention::YearSlash => "%Y/%m/%d",
            DateConvention::DayFirst => "%d/%m/%Y",
            DateConvention::MonthFirst => "%m/%d/%Y",
            DateConvention::Dotted => "%d.%m.%Y",
        }
    }

    // %.f also matches an absent fraction
    fn datetime_formats(self) -> &'static [&'static str] {
        match self {
            DateConvention::Iso => &[
                "%Y-%m-%d %H:%M:%S%.f",
                "%Y-%m-%dT%H:%M:%S%.f",
                "%Y-%m-%d %H:%M",
                "%Y-%m-%dT%H:%M",
            ],
            DateConvention::YearSlash => &["%Y/%m/%d %H:%M:%S%.f", "%Y/%m/%d %H:%M"],
            DateConvention::DayFirst => &["%d/%m/%Y %H:%M:%S%.f", "%d/%m/%Y %H:%M"],
            DateConvention::MonthFirst => &["%m/%d/%Y %H:%M:%S%.f", "%m/%d/%Y %H:%M"],
            DateConvention::Dotted => &["%d.%m.%Y %H:%M:%S%.f", "%d.%m.%Y %H:%M"],
        }
    }

    /// Parse a date or timestamp into a `Cell::Date` / `Cell::DateTime`.
    pub fn parse(self, raw: &str) -> Option<Cell> {
        let raw = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(raw, self.date_format()) {
            return Some(Cell::Date(date));
        }
        self.datetime_formats()
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(Cell::DateTime)
    }
}

/// Type a column is converted to, with the date convention for temporal columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inference {
    pub ty: ColumnType,
    pub dates: Option<DateConvention>,
}

impl From<ColumnType> for Inference {
    fn from(ty: ColumnType) -> Self {
        let dates = (ty == ColumnType::DateTime).then_some(DateConvention::Iso);
        Self { ty, dates }
    }
}

/// Distinct-value count, bounded to keep memory flat on wide keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueCount {
    Exact(usize),
    HighCardinality,
}

impl Serialize for UniqueCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            UniqueCount::Exact(n) => serializer.serialize_u64(*n as u64),
            UniqueCount::HighCardinality => serializer.serialize_str("high-cardinality"),
        }
    }
}

/// Profile of one column over the scanned rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub inferred_type: ColumnType,
    pub missing_count: usize,
    pub missing_percentage: f64,
    pub unique_count: UniqueCount,
    /// First non-missing values in row order, unmodified.
    pub sample_values: Vec<String>,
}

/// Summary statistics of a numeric column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumericSummary {
    pub mean: f64,
    pub median: f64,
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
}

// =============================================================================
// Value parsers
// =============================================================================

pub fn parse_int(raw: &str) -> Option<i64> {
    raw.trim().parse::<i64>().ok()
}

pub fn parse_float(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    }
}

// =============================================================================
// Type inference
// =============================================================================

/// Candidate types still accepting every value seen so far.
#[derive(Debug, Clone, Copy)]
struct Candidates {
    integer: bool,
    float: bool,
    /// Date conventions, indexed like `DateConvention::ALL`.
    dates: [bool; DateConvention::ALL.len()],
    boolean: bool,
    seen: bool,
}

impl Candidates {
    fn new() -> Self {
        Self {
            integer: true,
            float: true,
            dates: [true; DateConvention::ALL.len()],
            boolean: true,
            seen: false,
        }
    }

    fn observe(&mut self, cell: &Cell) {
        self.seen = true;
        match cell {
            Cell::Int(_) => {
                self.dates = [false; DateConvention::ALL.len()];
                self.boolean = false;
            }
            Cell::Float(_) => {
                self.integer = false;
                self.dates = [false; DateConvention::ALL.len()];
                self.boolean = false;
            }
            Cell::Bool(_) => {
                self.integer = false;
                self.float = false;
                self.dates = [false; DateConvention::ALL.len()];
            }
            // already converted, fits whichever convention the column settles on
            Cell::Date(_) | Cell::DateTime(_) => {
                self.integer = false;
                self.float = false;
                self.boolean = false;
            }
            Cell::Text(s) => {
                self.integer = self.integer && parse_int(s).is_some();
                self.float = self.float && parse_float(s).is_some();
                for (alive, convention) in self.dates.iter_mut().zip(DateConvention::ALL) {
                    *alive = *alive && convention.parse(s).is_some();
                }
                self.boolean = self.boolean && parse_bool(s).is_some();
            }
            Cell::Null => {}
        }
    }

    fn date_convention(&self) -> Option<DateConvention> {
        self.dates
            .iter()
            .zip(DateConvention::ALL)
            .find_map(|(alive, convention)| alive.then_some(convention))
    }

    fn exhausted(&self) -> bool {
        !(self.integer || self.float || self.boolean || self.date_convention().is_some())
    }

    fn winner(&self) -> Inference {
        let ty = if !self.seen {
            ColumnType::Text
        } else if self.integer {
            ColumnType::Integer
        } else if self.float {
            ColumnType::Float
        } else if self.date_convention().is_some() {
            ColumnType::DateTime
        } else if self.boolean {
            ColumnType::Boolean
        } else {
            ColumnType::Text
        };
        let dates = (ty == ColumnType::DateTime).then(|| self.date_convention()).flatten();
        Inference { ty, dates }
    }
}

/// Most specific type under which every non-missing cell parses, plus the one
/// date convention all cells share when that type is temporal.
pub fn infer_column<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> Inference {
    let mut candidates = Candidates::new();
    for cell in cells {
        if cell.is_missing() {
            continue;
        }
        candidates.observe(cell);
        if candidates.exhausted() {
            break;
        }
    }
    candidates.winner()
}

/// Most specific type under which every non-missing cell parses.
pub fn infer_type<'a>(cells: impl IntoIterator<Item = &'a Cell>) -> ColumnType {
    infer_column(cells).ty
}

/// Cast a cell to an inferred column type. Missing cells and cells that do not
/// parse become `Null`.
pub fn cast_cell(cell: &Cell, target: Inference) -> Cell {
    if cell.is_missing() {
        return Cell::Null;
    }
    let cast = match (target.ty, cell) {
        (ColumnType::Text, other) => Some(other.clone()),
        (ColumnType::Integer, Cell::Int(i)) => Some(Cell::Int(*i)),
        (ColumnType::Integer, Cell::Text(s)) => parse_int(s).map(Cell::Int),
        (ColumnType::Float, Cell::Float(f)) => Some(Cell::Float(*f)),
        (ColumnType::Float, Cell::Int(i)) => Some(Cell::Float(*i as f64)),
        (ColumnType::Float, Cell::Text(s)) => parse_float(s).map(Cell::Float),
        (ColumnType::DateTime, Cell::Date(_) | Cell::DateTime(_)) => Some(cell.clone()),
        (ColumnType::DateTime, Cell::Text(s)) => target.dates.and_then(|c| c.parse(s)),
        (ColumnType::Boolean, Cell::Bool(b)) => Some(Cell::Bool(*b)),
        (ColumnType::Boolean, Cell::Text(s)) => parse_bool(s).map(Cell::Bool),
        _ => None,
    };
    cast.unwrap_or(Cell::Null)
}

// =============================================================================
// Profiling
// =============================================================================

/// Build the profile of one column.
pub fn profile_column(name: &str, cells: &[&Cell], limits: &Limits) -> ColumnProfile {
    let mut missing_count = 0;
    let mut distinct: HashSet<String> = HashSet::new();
    let mut high_cardinality = false;
    let mut sample_values = Vec::with_capacity(limits.sample_values);

    for cell in cells {
        if cell.is_missing() {
            missing_count += 1;
            continue;
        }
        let printed = cell.to_string();
        if sample_values.len() < limits.sample_values {
            sample_values.push(printed.clone());
        }
        if !high_cardinality {
            distinct.insert(printed);
            high_cardinality = distinct.len() >= limits.cardinality_limit;
        }
    }

    let unique_count = if high_cardinality {
        UniqueCount::HighCardinality
    } else {
        UniqueCount::Exact(distinct.len())
    };
    let missing_percentage = if cells.is_empty() {
        0.0
    } else {
        round2(missing_count as f64 / cells.len() as f64 * 100.0)
    };

    ColumnProfile {
        name: name.to_string(),
        inferred_type: infer_type(cells.iter().copied()),
        missing_count,
        missing_percentage,
        unique_count,
        sample_values,
    }
}

// =============================================================================
// Numeric statistics
// =============================================================================

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median; sorts `values` in place.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Sample standard deviation (n - 1 denominator).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Statistics over the non-missing numeric cells of a column.
pub fn summarize_numeric(cells: &[&Cell]) -> Option<NumericSummary> {
    let mut values: Vec<f64> = cells
        .iter()
        .filter(|c| !c.is_missing())
        .filter_map(|c| c.as_f64())
        .collect();
    let mean = mean(&values)?;
    let std = std_dev(&values);
    let median = median(&mut values)?;
    let min = values.first().copied()?;
    let max = values.last().copied()?;
    Some(NumericSummary { mean, median, std, min, max })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(values: &[&str]) -> Vec<Cell> {
        values.iter().map(|v| Cell::text(*v)).collect()
    }

    fn refs(cells: &[Cell]) -> Vec<&Cell> {
        cells.iter().collect()
    }

    #[test]
    fn test_inference_order() {
        assert_eq!(infer_type(&texts(&["1", "2", "-3"])), ColumnType::Integer);
        assert_eq!(infer_type(&texts(&["1", "2.5"])), ColumnType::Float);
        assert_eq!(infer_type(&texts(&["2024-01-05", "2024-02-10 08:30:00"])), ColumnType::DateTime);
        assert_eq!(infer_type(&texts(&["true", "No", "yes"])), ColumnType::Boolean);
        assert_eq!(infer_type(&texts(&["a", "b"])), ColumnType::Text);
    }

    #[test]
    fn test_single_outlier_demotes_to_text() {
        assert_eq!(infer_type(&texts(&["1", "2", "3", "oops"])), ColumnType::Text);
    }

    #[test]
    fn test_missing_values_ignored_by_inference() {
        assert_eq!(infer_type(&texts(&["1", "", "NA", " ", "4"])), ColumnType::Integer);
        assert_eq!(infer_type(&texts(&["", "NA"])), ColumnType::Text);
    }

    #[test]
    fn test_typed_cells_keep_their_type() {
        let cells = vec![Cell::Float(100000.0), Cell::Float(2.0)];
        assert_eq!(infer_type(&cells), ColumnType::Float);
    }

    #[test]
    fn test_cast_cell() {
        assert_eq!(cast_cell(&Cell::text(" 42 "), ColumnType::Integer.into()), Cell::Int(42));
        assert_eq!(cast_cell(&Cell::text("x"), ColumnType::Integer.into()), Cell::Null);
        assert_eq!(cast_cell(&Cell::text(""), ColumnType::Text.into()), Cell::Null);
        assert_eq!(cast_cell(&Cell::Int(3), ColumnType::Float.into()), Cell::Float(3.0));
        assert_eq!(cast_cell(&Cell::text("YES"), ColumnType::Boolean.into()), Cell::Bool(true));
    }

    #[test]
    fn test_date_column_uses_one_convention() {
        let cells = texts(&["01/13/2024", "02/01/2024"]);
        let inference = infer_column(&cells);
        assert_eq!(inference.ty, ColumnType::DateTime);
        assert_eq!(inference.dates, Some(DateConvention::MonthFirst));

        let cast: Vec<String> = cells.iter().map(|c| cast_cell(c, inference).to_string()).collect();
        assert_eq!(cast, vec!["2024-01-13", "2024-02-01"]);
    }

    #[test]
    fn test_ambiguous_dates_resolve_day_first() {
        let cells = texts(&["01/02/2024", "03/04/2024"]);
        let inference = infer_column(&cells);
        assert_eq!(inference.dates, Some(DateConvention::DayFirst));
        assert_eq!(cast_cell(&cells[0], inference).to_string(), "2024-02-01");
    }

    #[test]
    fn test_conflicting_conventions_demote_to_text() {
        // 13/01 only reads day first, 01/13 only month first
        let cells = texts(&["13/01/2024", "01/13/2024"]);
        assert_eq!(infer_column(&cells), Inference { ty: ColumnType::Text, dates: None });
    }

    #[test]
    fn test_timestamps_keep_fractions_and_reject_offsets() {
        let cells = texts(&["2024-01-01 10:00:00.750", "2024-01-01T10:00:00.250", "2024-01-01 10:00:00"]);
        let inference = infer_column(&cells);
        let cast: Vec<String> = cells.iter().map(|c| cast_cell(c, inference).to_string()).collect();
        assert_eq!(
            cast,
            vec!["2024-01-01 10:00:00.750", "2024-01-01 10:00:00.250", "2024-01-01 10:00:00"]
        );

        let offsets = texts(&["2024-01-01T10:00:00+02:00", "2024-01-01T08:00:00Z"]);
        assert_eq!(infer_type(&offsets), ColumnType::Text);
    }

    #[test]
    fn test_profile_column() {
        let cells = texts(&["b", "", "a", "b", "NA", "c"]);
        let profile = profile_column("letters", &refs(&cells), &Limits::default());

        assert_eq!(profile.inferred_type, ColumnType::Text);
        assert_eq!(profile.missing_count, 2);
        assert_eq!(profile.missing_percentage, 33.33);
        assert_eq!(profile.unique_count, UniqueCount::Exact(3));
        assert_eq!(profile.sample_values, vec!["b", "a", "b", "c"]);
    }

    #[test]
    fn test_sample_values_bounded() {
        let cells = texts(&["1", "2", "3", "4", "5", "6", "7"]);
        let profile = profile_column("n", &refs(&cells), &Limits::default());
        assert_eq!(profile.sample_values, vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_high_cardinality_sentinel() {
        let limits = Limits { cardinality_limit: 3, ..Limits::default() };
        let cells = texts(&["a", "b", "c", "d"]);
        let profile = profile_column("k", &refs(&cells), &limits);
        assert_eq!(profile.unique_count, UniqueCount::HighCardinality);
        assert_eq!(
            serde_json::to_value(profile.unique_count).unwrap(),
            serde_json::json!("high-cardinality")
        );

        let cells = texts(&["a", "b", "a"]);
        let profile = profile_column("k", &refs(&cells), &limits);
        assert_eq!(profile.unique_count, UniqueCount::Exact(2));
    }

    #[test]
    fn test_numeric_summary() {
        let cells = texts(&["1", "", "3", "5"]);
        let summary = summarize_numeric(&refs(&cells)).unwrap();
        assert_eq!(summary.mean, 3.0);
        assert_eq!(summary.median, 3.0);
        assert_eq!(summary.std, Some(2.0));
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 5.0);
    }

    #[test]
    fn test_median_even_count() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0];
        assert_eq!(median(&mut values), Some(2.5));
        assert_eq!(median(&mut []), None);
    }
}

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Spatial scale of a region identifier. Datasets collected at province
/// scale and district scale use overlapping labels in the originals; keeping
/// the scale in the key prevents a silent cross-scale merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionScale {
    Province,
    District,
}

impl fmt::Display for RegionScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionScale::Province => write!(f, "province"),
            RegionScale::District => write!(f, "district"),
        }
    }
}

/// Canonical identifier for a spatial unit. Equality and ordering include
/// the scale, so a province named "Seoul" and a district named "Seoul"
/// are distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Region {
    pub scale: RegionScale,
    pub id: String,
}

impl Region {
    pub fn province(id: impl Into<String>) -> Self {
        Region {
            scale: RegionScale::Province,
            id: id.into(),
        }
    }

    pub fn district(id: impl Into<String>) -> Self {
        Region {
            scale: RegionScale::District,
            id: id.into(),
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scale, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Year,
    Month,
    Quarter,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Year => write!(f, "year"),
            Granularity::Month => write!(f, "month"),
            Granularity::Quarter => write!(f, "quarter"),
        }
    }
}

/// A point on the calendar axis. Periods are comparable within one
/// granularity only; use [`TimePeriod::try_cmp`] at boundaries where the
/// granularities are not already known to match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimePeriod {
    Year(i32),
    Month { year: i32, month: u32 },
    Quarter { year: i32, quarter: u32 },
}

impl TimePeriod {
    pub fn granularity(&self) -> Granularity {
        match self {
            TimePeriod::Year(_) => Granularity::Year,
            TimePeriod::Month { .. } => Granularity::Month,
            TimePeriod::Quarter { .. } => Granularity::Quarter,
        }
    }

    pub fn year(&self) -> i32 {
        match self {
            TimePeriod::Year(y) => *y,
            TimePeriod::Month { year, .. } | TimePeriod::Quarter { year, .. } => *year,
        }
    }

    /// Position on the axis of this period's own granularity.
    pub(crate) fn ordinal(&self) -> i64 {
        match self {
            TimePeriod::Year(y) => *y as i64,
            TimePeriod::Month { year, month } => *year as i64 * 12 + *month as i64,
            TimePeriod::Quarter { year, quarter } => *year as i64 * 4 + *quarter as i64,
        }
    }

    /// Compares two periods, refusing a cross-granularity comparison
    /// instead of coercing.
    pub fn try_cmp(&self, other: &TimePeriod) -> Option<Ordering> {
        if self.granularity() != other.granularity() {
            return None;
        }
        Some(self.ordinal().cmp(&other.ordinal()))
    }
}

impl Ord for TimePeriod {
    fn cmp(&self, other: &Self) -> Ordering {
        self.try_cmp(other)
            .unwrap_or_else(|| panic!("Cannot compare {self} with {other} across granularities"))
    }
}

impl PartialOrd for TimePeriod {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimePeriod::Year(y) => write!(f, "{y}"),
            TimePeriod::Month { year, month } => write!(f, "{year}-{month:02}"),
            TimePeriod::Quarter { year, quarter } => write!(f, "{year}-Q{quarter}"),
        }
    }
}

/// Declared layout of a table's time-key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFormat {
    /// `YYYYMM` (6 digits) or `YYYY-MM`.
    Yyyymm,
    /// `YYYY`.
    Yyyy,
    /// `YYYY-Q1` .. `YYYY-Q4` (separator optional, case-insensitive).
    YyyyQn,
}

impl TimeFormat {
    pub fn granularity(&self) -> Granularity {
        match self {
            TimeFormat::Yyyymm => Granularity::Month,
            TimeFormat::Yyyy => Granularity::Year,
            TimeFormat::YyyyQn => Granularity::Quarter,
        }
    }
}

/// Per-source convention marking a cell as "no observation". The `Zero`
/// marker exists for indicators where a literal zero is domain-impossible
/// (an interest rate); it must be declared per indicator, never assumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingMarker {
    #[default]
    None,
    Zero,
    Dash,
    Empty,
}

pub fn is_missing(raw: &str, marker: MissingMarker) -> bool {
    let trimmed = raw.trim();
    match marker {
        MissingMarker::None => false,
        MissingMarker::Empty => trimmed.is_empty(),
        MissingMarker::Dash => trimmed.is_empty() || trimmed == "-",
        MissingMarker::Zero => {
            trimmed.is_empty() || parse_number(trimmed).map(|v| v == 0.0).unwrap_or(false)
        }
    }
}

/// Parses a numeric cell, tolerating ASCII thousands separators
/// (`"1,234,567"`) and surrounding whitespace.
pub fn parse_number(raw: &str) -> Result<f64> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return Err(PipelineError::parse(raw, "number"));
    }
    let value: f64 = cleaned
        .parse()
        .map_err(|_| PipelineError::parse(raw, "number"))?;
    if !value.is_finite() {
        return Err(PipelineError::parse(raw, "finite number"));
    }
    Ok(value)
}

fn quarter_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d{4})\s*[-/ ]?\s*[Qq]([1-4])$").expect("valid regex"))
}

/// Parses a raw time key into the canonical [`TimePeriod`] for the declared
/// format. A 6-digit `YYYYMM` token is sliced into its first four characters
/// (year) and next two (month), the same shape the hyphenated form arrives
/// in, so both spellings compare equal downstream.
pub fn parse_period(raw: &str, format: TimeFormat) -> Result<TimePeriod> {
    let trimmed = raw.trim();
    match format {
        TimeFormat::Yyyy => {
            let year = parse_year(trimmed)?;
            Ok(TimePeriod::Year(year))
        }
        TimeFormat::Yyyymm => {
            let (year_part, month_part) =
                if trimmed.len() == 6 && trimmed.chars().all(|c| c.is_ascii_digit()) {
                    (&trimmed[..4], &trimmed[4..6])
                } else if let Some((y, m)) = trimmed.split_once('-') {
                    (y, m)
                } else {
                    return Err(PipelineError::parse(raw, "year-month (YYYYMM or YYYY-MM)"));
                };
            let year = parse_year(year_part)?;
            let month: u32 = month_part
                .parse()
                .map_err(|_| PipelineError::parse(raw, "year-month (YYYYMM or YYYY-MM)"))?;
            if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
                return Err(PipelineError::parse(raw, "calendar month"));
            }
            Ok(TimePeriod::Month { year, month })
        }
        TimeFormat::YyyyQn => {
            let captures = quarter_pattern()
                .captures(trimmed)
                .ok_or_else(|| PipelineError::parse(raw, "year-quarter (YYYY-Qn)"))?;
            let year = parse_year(&captures[1])?;
            let quarter: u32 = captures[2]
                .parse()
                .map_err(|_| PipelineError::parse(raw, "year-quarter (YYYY-Qn)"))?;
            Ok(TimePeriod::Quarter { year, quarter })
        }
    }
}

fn parse_year(part: &str) -> Result<i32> {
    let trimmed = part.trim();
    if trimmed.len() != 4 || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(PipelineError::parse(trimmed, "year (YYYY)"));
    }
    trimmed
        .parse()
        .map_err(|_| PipelineError::parse(trimmed, "year (YYYY)"))
}

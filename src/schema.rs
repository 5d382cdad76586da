//! Schema normalizer: raw tables plus a declared column-role mapping become
//! canonical `(Region, TimePeriod, indicator, raw value)` tuples.
//!
//! The [`TableSpec`] names which column carries the region key, which the
//! time key, and which columns are indicator values; it also declares the
//! source's time format and missing-value convention. Specs round-trip
//! through YAML so a dataset's cleaning rules live next to the dataset
//! instead of inside screen code.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::data::{MissingMarker, Region, RegionScale, TimeFormat, TimePeriod, parse_period};
use crate::error::{PipelineError, Result};

/// One fully-buffered source table. Created by the one-shot bulk read,
/// discarded after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Reads an entire delimited-text table into memory. There is no
    /// incremental parsing contract; the pipeline is a batch transformation.
    pub fn from_reader<R: Read>(name: &str, reader: R, delimiter: u8) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);
        let headers = csv_reader
            .headers()
            .map_err(|e| table_error(name, format!("reading headers: {e}")))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        for (row_idx, record) in csv_reader.records().enumerate() {
            let record =
                record.map_err(|e| table_error(name, format!("reading row {}: {e}", row_idx + 2)))?;
            rows.push(record.iter().map(|cell| cell.to_string()).collect());
        }
        debug!(
            "Read table '{}': {} column(s), {} row(s)",
            name,
            headers.len(),
            rows.len()
        );
        Ok(RawTable {
            name: name.to_string(),
            headers,
            rows,
        })
    }

    pub fn from_csv_str(name: &str, text: &str) -> Result<Self> {
        Self::from_reader(name, text.as_bytes(), b',')
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// One value column of a source table. The optional fields override the
/// table-level defaults per indicator: `missing_marker` is the explicit
/// "zero means missing here" flag, `factor` the unit rescale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueColumn {
    pub column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indicator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_marker: Option<MissingMarker>,
}

impl ValueColumn {
    pub fn new(column: impl Into<String>) -> Self {
        ValueColumn {
            column: column.into(),
            indicator: None,
            unit: None,
            factor: None,
            missing_marker: None,
        }
    }

    pub fn indicator(mut self, name: impl Into<String>) -> Self {
        self.indicator = Some(name.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn factor(mut self, factor: f64) -> Self {
        self.factor = Some(factor);
        self
    }

    pub fn missing_marker(mut self, marker: MissingMarker) -> Self {
        self.missing_marker = Some(marker);
        self
    }

    /// Indicator name the column publishes under; defaults to the header.
    pub fn indicator_name(&self) -> &str {
        self.indicator.as_deref().unwrap_or(&self.column)
    }
}

/// Column-role configuration for one source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub region_column: String,
    pub region_scale: RegionScale,
    pub time_column: String,
    pub time_format: TimeFormat,
    #[serde(default)]
    pub missing_marker: MissingMarker,
    pub value_columns: Vec<ValueColumn>,
}

impl TableSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| spec_error(path, format!("opening spec: {e}")))?;
        serde_yaml::from_reader(BufReader::new(file))
            .map_err(|e| spec_error(path, format!("parsing spec: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .map_err(|e| spec_error(path, format!("creating spec: {e}")))?;
        serde_yaml::to_writer(file, self).map_err(|e| spec_error(path, format!("writing spec: {e}")))
    }

    /// Effective missing-value convention for one value column.
    pub fn marker_for(&self, column: &ValueColumn) -> MissingMarker {
        column.missing_marker.unwrap_or(self.missing_marker)
    }
}

/// One canonical tuple emitted by the normalizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub region: Region,
    pub period: TimePeriod,
    pub indicator: String,
    pub raw: String,
}

/// Normalizes a raw table into canonical observation tuples: one per
/// (row, value column). Pure; the input table is untouched.
///
/// Fails with a schema error when a declared column is absent, a region key
/// is blank, or the same (region, period, indicator) appears twice; fails
/// with a parse error when a time key does not fit the declared format.
pub fn normalize(table: &RawTable, spec: &TableSpec) -> Result<Vec<Observation>> {
    let region_idx = require_column(table, &spec.region_column)?;
    let time_idx = require_column(table, &spec.time_column)?;
    let value_indices = spec
        .value_columns
        .iter()
        .map(|vc| require_column(table, &vc.column).map(|idx| (idx, vc)))
        .collect::<Result<Vec<_>>>()?;

    let mut seen: HashSet<(Region, TimePeriod, String)> = HashSet::new();
    let mut observations = Vec::with_capacity(table.rows.len() * value_indices.len());
    for (row_idx, row) in table.rows.iter().enumerate() {
        let region_raw = cell(row, region_idx).trim();
        if region_raw.is_empty() {
            return Err(table_error(
                &table.name,
                format!("row {}: blank region key", row_idx + 2),
            ));
        }
        let region = Region {
            scale: spec.region_scale,
            id: region_raw.to_string(),
        };
        let period = parse_period(cell(row, time_idx), spec.time_format)?;
        for (idx, value_column) in &value_indices {
            let indicator = value_column.indicator_name().to_string();
            if !seen.insert((region.clone(), period, indicator.clone())) {
                return Err(table_error(
                    &table.name,
                    format!(
                        "row {}: duplicate key ({region}, {period}, {indicator})",
                        row_idx + 2
                    ),
                ));
            }
            observations.push(Observation {
                region: region.clone(),
                period,
                indicator,
                raw: cell(row, *idx).to_string(),
            });
        }
    }
    info!(
        "Normalized {} observation(s) from table '{}'",
        observations.len(),
        table.name
    );
    Ok(observations)
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

pub(crate) fn require_column(table: &RawTable, name: &str) -> Result<usize> {
    table.column_index(name).ok_or_else(|| {
        table_error(
            &table.name,
            format!("declared column '{name}' not found in headers"),
        )
    })
}

fn table_error(table: &str, detail: String) -> PipelineError {
    PipelineError::schema(format!("table '{table}'"), detail)
}

fn spec_error(path: &Path, detail: String) -> PipelineError {
    PipelineError::schema(format!("spec {path:?}"), detail)
}

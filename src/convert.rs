//! Unit and scale conversion for raw value cells.
//!
//! Each indicator carries an [`IndicatorRule`] derived from its table spec:
//! the missing-value convention and the multiplicative rescale factor (a
//! "divide by 1,000,000" rule is declared as factor `1e-6`). Conversion is
//! pure: missing markers become `None`, everything else must parse.

use std::collections::BTreeMap;

use crate::data::{MissingMarker, is_missing, parse_number};
use crate::error::Result;
use crate::schema::TableSpec;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRule {
    pub marker: MissingMarker,
    pub factor: f64,
    pub unit: Option<String>,
}

impl Default for IndicatorRule {
    fn default() -> Self {
        IndicatorRule {
            marker: MissingMarker::None,
            factor: 1.0,
            unit: None,
        }
    }
}

/// Collects the effective conversion rule for every indicator a spec
/// declares, applying per-column overrides over the table-level defaults.
pub fn indicator_rules(spec: &TableSpec) -> BTreeMap<String, IndicatorRule> {
    spec.value_columns
        .iter()
        .map(|vc| {
            let rule = IndicatorRule {
                marker: spec.marker_for(vc),
                factor: vc.factor.unwrap_or(1.0),
                unit: vc.unit.clone(),
            };
            (vc.indicator_name().to_string(), rule)
        })
        .collect()
}

/// Converts one raw cell: the declared missing marker maps to `None`,
/// anything else is parsed (thousands separators stripped) and rescaled.
pub fn convert_value(raw: &str, rule: &IndicatorRule) -> Result<Option<f64>> {
    if is_missing(raw, rule.marker) {
        return Ok(None);
    }
    let value = parse_number(raw)?;
    Ok(Some(value * rule.factor))
}

//! Missing-value interpolation along the period axis.
//!
//! Interior gaps are filled linearly between their nearest anchors; leading
//! and trailing gaps have no second anchor and stay open, flagging the
//! series [`Completeness::Incomplete`]. Filling is idempotent: a gap-free
//! series passes through untouched (and keeps its allocation at the table
//! level).

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use crate::error::{PipelineError, Result};
use crate::table::{IndicatorSeries, NormalizedTable, SeriesKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    /// Leading or trailing gaps remain; interior gaps are filled.
    Incomplete,
}

/// Fills interior gaps of one series by linear interpolation, weighting by
/// slot distance along the period axis.
///
/// Fails with [`PipelineError::InsufficientData`] when fewer than two
/// anchor points exist to interpolate between.
pub fn fill_series(
    key: &SeriesKey,
    series: &IndicatorSeries,
) -> Result<(IndicatorSeries, Completeness)> {
    if series.is_complete() {
        return Ok((series.clone(), Completeness::Complete));
    }
    let anchors: Vec<usize> = series
        .points()
        .iter()
        .enumerate()
        .filter_map(|(idx, (_, value))| value.map(|_| idx))
        .collect();
    if anchors.len() < 2 {
        return Err(PipelineError::InsufficientData {
            region: key.region.to_string(),
            indicator: key.indicator.clone(),
            anchors: anchors.len(),
        });
    }

    let mut points = series.points().to_vec();
    for pair in anchors.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        if right == left + 1 {
            continue;
        }
        let left_value = points[left].1.unwrap_or_default();
        let right_value = points[right].1.unwrap_or_default();
        let span = (right - left) as f64;
        for idx in left + 1..right {
            let weight = (idx - left) as f64 / span;
            points[idx].1 = Some(left_value + (right_value - left_value) * weight);
        }
    }

    let completeness = if points.iter().all(|(_, value)| value.is_some()) {
        Completeness::Complete
    } else {
        debug!("Series {key} keeps unfillable leading/trailing gap(s)");
        Completeness::Incomplete
    };
    Ok((
        IndicatorSeries::from_sorted(series.granularity(), points),
        completeness,
    ))
}

/// Per-table interpolation summary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InterpolationReport {
    /// Gap slots that received an interpolated value.
    pub filled: usize,
    /// Series left with leading/trailing gaps.
    pub incomplete: Vec<SeriesKey>,
}

/// Runs [`fill_series`] over every series of a table. Already-complete
/// series are shared with the input table, not copied.
pub fn fill_missing(table: &NormalizedTable) -> Result<(NormalizedTable, InterpolationReport)> {
    let mut series = BTreeMap::new();
    let mut report = InterpolationReport::default();
    for (key, existing) in table.series_iter() {
        if existing.is_complete() {
            series.insert(key.clone(), Arc::clone(existing));
            continue;
        }
        let gaps_before = existing.len() - existing.anchor_count();
        let (filled, completeness) = fill_series(key, existing)?;
        report.filled += gaps_before - (filled.len() - filled.anchor_count());
        if completeness == Completeness::Incomplete {
            report.incomplete.push(key.clone());
        }
        series.insert(key.clone(), Arc::new(filled));
    }
    info!(
        "Interpolated table '{}': {} slot(s) filled, {} series incomplete",
        table.name(),
        report.filled,
        report.incomplete.len()
    );
    Ok((
        NormalizedTable::with_series(
            table.name().to_string(),
            series,
            table.meta_map().clone(),
        ),
        report,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Granularity, Region, TimePeriod};

    fn quarter(year: i32, q: u32) -> TimePeriod {
        TimePeriod::Quarter { year, quarter: q }
    }

    fn key() -> SeriesKey {
        SeriesKey {
            region: Region::province("서울"),
            indicator: "loan_rate".to_string(),
        }
    }

    fn series(points: Vec<(TimePeriod, Option<f64>)>) -> IndicatorSeries {
        IndicatorSeries::new(Granularity::Quarter, points).unwrap()
    }

    #[test]
    fn fills_interior_gap_linearly() {
        let input = series(vec![
            (quarter(2022, 1), Some(10.0)),
            (quarter(2022, 2), None),
            (quarter(2022, 3), Some(20.0)),
        ]);
        let (filled, completeness) = fill_series(&key(), &input).unwrap();
        assert_eq!(completeness, Completeness::Complete);
        assert_eq!(filled.value_at(&quarter(2022, 2)), Some(15.0));
    }

    #[test]
    fn fills_multi_slot_gap_proportionally() {
        let input = series(vec![
            (quarter(2022, 1), Some(3.0)),
            (quarter(2022, 2), None),
            (quarter(2022, 3), None),
            (quarter(2022, 4), Some(6.0)),
        ]);
        let (filled, _) = fill_series(&key(), &input).unwrap();
        assert!((filled.value_at(&quarter(2022, 2)).unwrap() - 4.0).abs() < 1e-12);
        assert!((filled.value_at(&quarter(2022, 3)).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn leading_and_trailing_gaps_stay_open() {
        let input = series(vec![
            (quarter(2022, 1), None),
            (quarter(2022, 2), Some(2.0)),
            (quarter(2022, 3), Some(4.0)),
            (quarter(2022, 4), None),
        ]);
        let (filled, completeness) = fill_series(&key(), &input).unwrap();
        assert_eq!(completeness, Completeness::Incomplete);
        assert_eq!(filled.value_at(&quarter(2022, 1)), None);
        assert_eq!(filled.value_at(&quarter(2022, 4)), None);
    }

    #[test]
    fn interpolation_is_idempotent() {
        let input = series(vec![
            (quarter(2022, 1), Some(10.0)),
            (quarter(2022, 2), None),
            (quarter(2022, 3), Some(20.0)),
        ]);
        let (once, _) = fill_series(&key(), &input).unwrap();
        let (twice, _) = fill_series(&key(), &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_series_has_no_anchors() {
        let err = fill_series(&key(), &series(vec![])).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientData { anchors: 0, .. }
        ));
    }

    #[test]
    fn too_few_anchors_is_an_error() {
        let input = series(vec![
            (quarter(2022, 1), None),
            (quarter(2022, 2), Some(2.0)),
            (quarter(2022, 3), None),
        ]);
        let err = fill_series(&key(), &input).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientData { anchors: 1, .. }
        ));
    }
}

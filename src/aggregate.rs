//! Derived statistics, recomputed on demand from a [`NormalizedTable`].
//!
//! Nothing here caches: a [`DerivedStat`] is always a function of the table
//! it was asked about, so a later table revision can never serve a stale
//! derivative.

use std::collections::BTreeMap;

use log::debug;

use crate::data::{Region, TimePeriod};
use crate::error::{PipelineError, Result};
use crate::table::NormalizedTable;

/// Per-region extremes over a full time series. Ties report every tied
/// period, not an arbitrary first.
#[derive(Debug, Clone, PartialEq)]
pub struct Extremes {
    pub min: f64,
    pub min_periods: Vec<TimePeriod>,
    pub max: f64,
    pub max_periods: Vec<TimePeriod>,
    /// `max - min`; non-negative by construction.
    pub range: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DerivedStat {
    Extremes(Extremes),
    Score(f64),
    Share(f64),
    PerCapita(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOp {
    Extremes,
    StandardScore { period: TimePeriod },
    PercentShare { period: TimePeriod },
    PerCapita {
        population_indicator: String,
        period: TimePeriod,
    },
}

/// Dispatches one aggregation over a table, keyed per region.
pub fn aggregate(
    table: &NormalizedTable,
    op: &AggregateOp,
    indicator: &str,
) -> Result<BTreeMap<Region, DerivedStat>> {
    match op {
        AggregateOp::Extremes => Ok(extremes(table, indicator)
            .into_iter()
            .map(|(region, stat)| (region, DerivedStat::Extremes(stat)))
            .collect()),
        AggregateOp::StandardScore { period } => Ok(standard_scores(table, indicator, period)?
            .into_iter()
            .map(|(region, score)| (region, DerivedStat::Score(score)))
            .collect()),
        AggregateOp::PercentShare { period } => Ok(percent_shares(table, indicator, period)?
            .into_iter()
            .map(|(region, share)| (region, DerivedStat::Share(share)))
            .collect()),
        AggregateOp::PerCapita {
            population_indicator,
            period,
        } => Ok(per_capita(table, indicator, population_indicator, period)?
            .into_iter()
            .map(|(region, ratio)| (region, DerivedStat::PerCapita(ratio)))
            .collect()),
    }
}

/// Min/max/range per region across its full series. Regions whose series
/// holds no concrete value are omitted.
pub fn extremes(table: &NormalizedTable, indicator: &str) -> BTreeMap<Region, Extremes> {
    let mut out = BTreeMap::new();
    for (key, series) in table.series_iter() {
        if key.indicator != indicator {
            continue;
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut min_periods = Vec::new();
        let mut max_periods = Vec::new();
        for (period, value) in series.points() {
            let Some(value) = *value else { continue };
            if value < min {
                min = value;
                min_periods = vec![*period];
            } else if value == min {
                min_periods.push(*period);
            }
            if value > max {
                max = value;
                max_periods = vec![*period];
            } else if value == max {
                max_periods.push(*period);
            }
        }
        if min_periods.is_empty() {
            debug!("Region {} has no concrete '{}' values; omitted from extremes", key.region, indicator);
            continue;
        }
        out.insert(
            key.region.clone(),
            Extremes {
                min,
                min_periods,
                max,
                max_periods,
                range: max - min,
            },
        );
    }
    out
}

/// Concrete values of one indicator across regions at a fixed period.
/// A series whose granularity differs from the period's is a schema error,
/// not an empty result.
fn values_at_period(
    table: &NormalizedTable,
    indicator: &str,
    period: &TimePeriod,
) -> Result<BTreeMap<Region, f64>> {
    let mut values = BTreeMap::new();
    for (key, series) in table.series_iter() {
        if key.indicator != indicator {
            continue;
        }
        if series.granularity() != period.granularity() {
            return Err(PipelineError::schema(
                format!("table '{}'", table.name()),
                format!(
                    "period {period} has {} granularity but series {key} is {}",
                    period.granularity(),
                    series.granularity()
                ),
            ));
        }
        if let Some(value) = series.value_at(period) {
            values.insert(key.region.clone(), value);
        }
    }
    Ok(values)
}

/// Standardized score `(value - mean) / sample std dev` across regions for
/// one period. Zero variance (or fewer than two regions) is reported as a
/// degenerate distribution rather than dividing by zero.
pub fn standard_scores(
    table: &NormalizedTable,
    indicator: &str,
    period: &TimePeriod,
) -> Result<BTreeMap<Region, f64>> {
    let values = values_at_period(table, indicator, period)?;
    let n = values.len();
    if n < 2 {
        return Err(degenerate(indicator, period, format!("{n} region(s) with a value")));
    }
    let mean = values.values().sum::<f64>() / n as f64;
    let variance = values
        .values()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / (n as f64 - 1.0);
    let std_dev = variance.sqrt();
    if std_dev <= 0.0 {
        return Err(degenerate(indicator, period, "zero variance across regions".to_string()));
    }
    Ok(values
        .into_iter()
        .map(|(region, value)| (region, (value - mean) / std_dev))
        .collect())
}

/// Percentage share `value / total * 100` across regions for one period.
pub fn percent_shares(
    table: &NormalizedTable,
    indicator: &str,
    period: &TimePeriod,
) -> Result<BTreeMap<Region, f64>> {
    let values = values_at_period(table, indicator, period)?;
    let total: f64 = values.values().sum();
    if total <= 0.0 {
        return Err(PipelineError::InvalidDenominator {
            context: format!("percentage share of '{indicator}' at {period}"),
            detail: format!("sum across regions is {total}"),
        });
    }
    Ok(values
        .into_iter()
        .map(|(region, value)| (region, value / total * 100.0))
        .collect())
}

/// Per-capita ratio `value / population` per region at one period. A
/// missing or non-positive population is an invalid denominator; it is
/// never skipped, since a silently shorter ranking would mislead.
pub fn per_capita(
    table: &NormalizedTable,
    indicator: &str,
    population_indicator: &str,
    period: &TimePeriod,
) -> Result<BTreeMap<Region, f64>> {
    let values = values_at_period(table, indicator, period)?;
    let populations = values_at_period(table, population_indicator, period)?;
    let mut out = BTreeMap::new();
    for (region, value) in values {
        let population = populations.get(&region).copied().ok_or_else(|| {
            PipelineError::InvalidDenominator {
                context: format!("per-capita '{indicator}' for {region} at {period}"),
                detail: format!("no '{population_indicator}' value"),
            }
        })?;
        if population <= 0.0 {
            return Err(PipelineError::InvalidDenominator {
                context: format!("per-capita '{indicator}' for {region} at {period}"),
                detail: format!("population is {population}"),
            });
        }
        out.insert(region, value / population);
    }
    Ok(out)
}

fn degenerate(indicator: &str, period: &TimePeriod, detail: String) -> PipelineError {
    PipelineError::DegenerateDistribution {
        indicator: indicator.to_string(),
        period: period.to_string(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap as Map;
    use std::sync::Arc;

    use super::*;
    use crate::data::Granularity;
    use crate::table::{IndicatorSeries, SeriesKey};

    fn quarter(year: i32, q: u32) -> TimePeriod {
        TimePeriod::Quarter { year, quarter: q }
    }

    fn table_of(entries: Vec<(&str, &str, Vec<(TimePeriod, Option<f64>)>)>) -> NormalizedTable {
        let mut series = Map::new();
        for (region, indicator, points) in entries {
            series.insert(
                SeriesKey {
                    region: Region::province(region),
                    indicator: indicator.to_string(),
                },
                Arc::new(IndicatorSeries::new(Granularity::Quarter, points).unwrap()),
            );
        }
        NormalizedTable::with_series("test".to_string(), series, Map::new())
    }

    #[test]
    fn extremes_report_all_tied_periods() {
        let table = table_of(vec![(
            "서울",
            "rent",
            vec![
                (quarter(2022, 1), Some(10.0)),
                (quarter(2022, 2), Some(25.0)),
                (quarter(2022, 3), Some(10.0)),
                (quarter(2022, 4), Some(25.0)),
            ],
        )]);
        let stats = extremes(&table, "rent");
        let seoul = &stats[&Region::province("서울")];
        assert_eq!(seoul.min, 10.0);
        assert_eq!(seoul.min_periods, vec![quarter(2022, 1), quarter(2022, 3)]);
        assert_eq!(seoul.max, 25.0);
        assert_eq!(seoul.max_periods, vec![quarter(2022, 2), quarter(2022, 4)]);
        assert_eq!(seoul.range, 15.0);
    }

    #[test]
    fn extremes_bound_every_series_value() {
        let table = table_of(vec![
            (
                "서울",
                "rent",
                vec![
                    (quarter(2022, 1), Some(21.3)),
                    (quarter(2022, 2), Some(19.8)),
                    (quarter(2022, 3), Some(22.4)),
                ],
            ),
            ("부산", "rent", vec![(quarter(2022, 1), Some(10.1))]),
        ]);
        let stats = extremes(&table, "rent");
        for (key, series) in table.series_iter() {
            let stat = &stats[&key.region];
            assert!(stat.range >= 0.0);
            for value in series.values() {
                assert!(stat.min <= value && value <= stat.max);
            }
        }
    }

    #[test]
    fn standard_scores_center_and_scale() {
        let table = table_of(vec![
            ("A", "rate", vec![(quarter(2022, 1), Some(3.0))]),
            ("B", "rate", vec![(quarter(2022, 1), Some(4.0))]),
            ("C", "rate", vec![(quarter(2022, 1), Some(8.0))]),
        ]);
        let scores = standard_scores(&table, "rate", &quarter(2022, 1)).unwrap();
        let sum: f64 = scores.values().sum();
        assert!(sum.abs() < 1e-9);
        let n = scores.len() as f64;
        let variance: f64 = scores.values().map(|s| s * s).sum::<f64>() / (n - 1.0);
        assert!((variance - 1.0).abs() < 1e-9);
    }

    #[test]
    fn uniform_distribution_is_degenerate() {
        let table = table_of(vec![
            ("A", "rate", vec![(quarter(2022, 1), Some(5.0))]),
            ("B", "rate", vec![(quarter(2022, 1), Some(5.0))]),
            ("C", "rate", vec![(quarter(2022, 1), Some(5.0))]),
        ]);
        let err = standard_scores(&table, "rate", &quarter(2022, 1)).unwrap_err();
        assert!(matches!(err, PipelineError::DegenerateDistribution { .. }));
    }

    #[test]
    fn percent_shares_sum_to_one_hundred() {
        let table = table_of(vec![
            ("A", "gdp", vec![(quarter(2022, 1), Some(10.0))]),
            ("B", "gdp", vec![(quarter(2022, 1), Some(20.0))]),
            ("C", "gdp", vec![(quarter(2022, 1), Some(30.0))]),
        ]);
        let shares = percent_shares(&table, "gdp", &quarter(2022, 1)).unwrap();
        assert!((shares[&Region::province("A")] - 100.0 / 6.0).abs() < 1e-9);
        assert!((shares[&Region::province("B")] - 100.0 / 3.0).abs() < 1e-9);
        assert!((shares[&Region::province("C")] - 50.0).abs() < 1e-9);
        let total: f64 = shares.values().sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn zero_total_share_is_invalid_denominator() {
        let table = table_of(vec![
            ("A", "gdp", vec![(quarter(2022, 1), Some(0.0))]),
            ("B", "gdp", vec![(quarter(2022, 1), Some(0.0))]),
        ]);
        let err = percent_shares(&table, "gdp", &quarter(2022, 1)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDenominator { .. }));
    }

    #[test]
    fn per_capita_divides_by_population() {
        let table = table_of(vec![
            ("서울", "gdp", vec![(quarter(2022, 1), Some(100.0))]),
            ("서울", "population", vec![(quarter(2022, 1), Some(25.0))]),
        ]);
        let ratios = per_capita(&table, "gdp", "population", &quarter(2022, 1)).unwrap();
        assert_eq!(ratios[&Region::province("서울")], 4.0);
    }

    #[test]
    fn per_capita_rejects_missing_or_nonpositive_population() {
        let missing = table_of(vec![(
            "서울",
            "gdp",
            vec![(quarter(2022, 1), Some(100.0))],
        )]);
        assert!(matches!(
            per_capita(&missing, "gdp", "population", &quarter(2022, 1)),
            Err(PipelineError::InvalidDenominator { .. })
        ));

        let zero = table_of(vec![
            ("서울", "gdp", vec![(quarter(2022, 1), Some(100.0))]),
            ("서울", "population", vec![(quarter(2022, 1), Some(0.0))]),
        ]);
        assert!(matches!(
            per_capita(&zero, "gdp", "population", &quarter(2022, 1)),
            Err(PipelineError::InvalidDenominator { .. })
        ));
    }

    #[test]
    fn aggregate_dispatch_wraps_derived_stats() {
        let table = table_of(vec![
            ("A", "gdp", vec![(quarter(2022, 1), Some(10.0))]),
            ("B", "gdp", vec![(quarter(2022, 1), Some(30.0))]),
        ]);
        let shares = table
            .aggregate(
                &AggregateOp::PercentShare {
                    period: quarter(2022, 1),
                },
                "gdp",
            )
            .unwrap();
        assert_eq!(shares[&Region::province("A")], DerivedStat::Share(25.0));
        let ext = table.aggregate(&AggregateOp::Extremes, "gdp").unwrap();
        assert!(matches!(ext[&Region::province("A")], DerivedStat::Extremes(_)));
    }

    #[test]
    fn fixed_period_stats_reject_mismatched_granularity() {
        let table = table_of(vec![("A", "gdp", vec![(quarter(2022, 1), Some(10.0))])]);
        let err = percent_shares(&table, "gdp", &TimePeriod::Year(2022)).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { .. }));
    }
}

//! The indicator table: the pipeline's immutable, queryable product.
//!
//! A [`NormalizedTable`] maps `(Region, indicator)` keys to interior-shared
//! [`IndicatorSeries`] values. Every transforming operation (interpolation,
//! join, truncation) returns a new table whose untouched series are the same
//! `Arc` allocations, so chaining stages never copies clean data.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use itertools::Itertools;
use log::info;

use crate::aggregate::{self, AggregateOp, DerivedStat};
use crate::convert::{self, IndicatorRule};
use crate::data::{Granularity, Region, TimePeriod};
use crate::error::{PipelineError, Result};
use crate::schema::{Observation, TableSpec};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    pub region: Region,
    pub indicator: String,
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.region, self.indicator)
    }
}

/// Ordered `(period, value)` points for one (region, indicator) pair.
/// Periods are strictly increasing and share one granularity; `None` marks
/// a missing slot awaiting interpolation.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    granularity: Granularity,
    points: Vec<(TimePeriod, Option<f64>)>,
}

impl IndicatorSeries {
    pub fn new(
        granularity: Granularity,
        mut points: Vec<(TimePeriod, Option<f64>)>,
    ) -> Result<Self> {
        for (period, _) in &points {
            if period.granularity() != granularity {
                return Err(PipelineError::schema(
                    "series",
                    format!("period {period} does not have {granularity} granularity"),
                ));
            }
        }
        points.sort_by_key(|(period, _)| period.ordinal());
        for pair in points.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(PipelineError::schema(
                    "series",
                    format!("duplicate period {}", pair[0].0),
                ));
            }
        }
        Ok(IndicatorSeries {
            granularity,
            points,
        })
    }

    pub(crate) fn from_sorted(
        granularity: Granularity,
        points: Vec<(TimePeriod, Option<f64>)>,
    ) -> Self {
        IndicatorSeries {
            granularity,
            points,
        }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn points(&self) -> &[(TimePeriod, Option<f64>)] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Value at a period, `None` when the period is absent, the slot is a
    /// gap, or the granularity differs.
    pub fn value_at(&self, period: &TimePeriod) -> Option<f64> {
        if period.granularity() != self.granularity {
            return None;
        }
        self.points
            .binary_search_by_key(&period.ordinal(), |(p, _)| p.ordinal())
            .ok()
            .and_then(|idx| self.points[idx].1)
    }

    pub fn periods(&self) -> impl Iterator<Item = &TimePeriod> {
        self.points.iter().map(|(period, _)| period)
    }

    /// Concrete (non-gap) values in period order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().filter_map(|(_, value)| *value)
    }

    pub fn anchor_count(&self) -> usize {
        self.points.iter().filter(|(_, value)| value.is_some()).count()
    }

    /// True when every slot holds a concrete value. An empty series is not
    /// complete; it has nothing to anchor interpolation or statistics on.
    pub fn is_complete(&self) -> bool {
        !self.points.is_empty() && self.points.iter().all(|(_, value)| value.is_some())
    }
}

/// Per-indicator metadata carried alongside the series.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorMeta {
    pub unit: Option<String>,
    pub source: String,
}

/// Immutable mapping from (region, indicator) to a time series, the sole
/// structure the visualization layer reads from.
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    name: String,
    series: Arc<BTreeMap<SeriesKey, Arc<IndicatorSeries>>>,
    meta: Arc<BTreeMap<String, IndicatorMeta>>,
}

impl NormalizedTable {
    /// Assembles a table from one spec's normalized observations: groups by
    /// (region, indicator), converts each raw cell per the indicator's rule,
    /// and orders each series along the period axis.
    pub fn from_observations(spec: &TableSpec, observations: Vec<Observation>) -> Result<Self> {
        let rules = convert::indicator_rules(spec);
        let granularity = spec.time_format.granularity();
        let grouped = observations
            .into_iter()
            .map(|obs| ((obs.region, obs.indicator), (obs.period, obs.raw)))
            .into_group_map();

        let mut series = BTreeMap::new();
        for ((region, indicator), raw_points) in grouped {
            let rule = rules.get(&indicator).cloned().unwrap_or_else(|| {
                // Observations come from `normalize`, which only emits
                // declared indicators; an unknown one gets the default rule.
                IndicatorRule::default()
            });
            let points = raw_points
                .into_iter()
                .map(|(period, raw)| convert::convert_value(&raw, &rule).map(|v| (period, v)))
                .collect::<Result<Vec<_>>>()?;
            let key = SeriesKey { region, indicator };
            let built = IndicatorSeries::new(granularity, points)?;
            series.insert(key, Arc::new(built));
        }

        let meta = spec
            .value_columns
            .iter()
            .map(|vc| {
                (
                    vc.indicator_name().to_string(),
                    IndicatorMeta {
                        unit: vc.unit.clone(),
                        source: spec.name.clone(),
                    },
                )
            })
            .collect();

        let table = NormalizedTable {
            name: spec.name.clone(),
            series: Arc::new(series),
            meta: Arc::new(meta),
        };
        info!(
            "Built table '{}': {} series across {} region(s)",
            table.name,
            table.len(),
            table.regions().len()
        );
        Ok(table)
    }

    pub(crate) fn with_series(
        name: String,
        series: BTreeMap<SeriesKey, Arc<IndicatorSeries>>,
        meta: BTreeMap<String, IndicatorMeta>,
    ) -> Self {
        NormalizedTable {
            name,
            series: Arc::new(series),
            meta: Arc::new(meta),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn get_series(&self, region: &Region, indicator: &str) -> Option<&IndicatorSeries> {
        let key = SeriesKey {
            region: region.clone(),
            indicator: indicator.to_string(),
        };
        self.series.get(&key).map(Arc::as_ref)
    }

    pub fn series_iter(&self) -> impl Iterator<Item = (&SeriesKey, &Arc<IndicatorSeries>)> {
        self.series.iter()
    }

    pub(crate) fn meta_map(&self) -> &BTreeMap<String, IndicatorMeta> {
        &self.meta
    }

    pub fn regions(&self) -> BTreeSet<Region> {
        self.series.keys().map(|key| key.region.clone()).collect()
    }

    pub fn indicators(&self) -> Vec<String> {
        self.series
            .keys()
            .map(|key| key.indicator.clone())
            .unique()
            .collect()
    }

    pub fn indicator_meta(&self, indicator: &str) -> Option<&IndicatorMeta> {
        self.meta.get(indicator)
    }

    /// Drops every point after `cutoff` from every series. The original
    /// dashboards clip the loan-rate feed at its last trustworthy month.
    pub fn truncate_after(&self, cutoff: TimePeriod) -> Result<Self> {
        let mut series = BTreeMap::new();
        for (key, existing) in self.series.iter() {
            if existing.granularity() != cutoff.granularity() {
                return Err(PipelineError::schema(
                    format!("table '{}'", self.name),
                    format!(
                        "cannot truncate {} series {key} at {} ({} cutoff)",
                        existing.granularity(),
                        cutoff,
                        cutoff.granularity()
                    ),
                ));
            }
            if existing
                .points()
                .last()
                .map(|(period, _)| period.ordinal() <= cutoff.ordinal())
                .unwrap_or(true)
            {
                series.insert(key.clone(), Arc::clone(existing));
                continue;
            }
            let trimmed = existing
                .points()
                .iter()
                .filter(|(period, _)| period.ordinal() <= cutoff.ordinal())
                .cloned()
                .collect();
            series.insert(
                key.clone(),
                Arc::new(IndicatorSeries::from_sorted(existing.granularity(), trimmed)),
            );
        }
        Ok(NormalizedTable::with_series(
            self.name.clone(),
            series,
            self.meta.as_ref().clone(),
        ))
    }

    /// Recomputes a derived statistic from the current table contents.
    pub fn aggregate(
        &self,
        op: &AggregateOp,
        indicator: &str,
    ) -> Result<BTreeMap<Region, DerivedStat>> {
        aggregate::aggregate(self, op, indicator)
    }
}

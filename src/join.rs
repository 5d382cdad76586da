//! Region/time join engine.
//!
//! Merging discipline:
//! - inner joins drop regions without a counterpart, and the drop is counted
//!   in the [`JoinOutcome`] rather than disappearing silently;
//! - cross-scale pairs (province vs. district keys) require an explicit
//!   [`ScaleMap`]; without one the join refuses instead of guessing;
//! - lookup joins against a [`GeoReference`] must resolve every region;
//! - cross-granularity time joins require an explicit [`align_granularity`]
//!   step (mean or sum, declared by the caller), never a broadcast.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use itertools::Itertools;
use log::info;

use crate::data::{Granularity, Region, RegionScale, TimePeriod, parse_number};
use crate::error::{PipelineError, Result};
use crate::schema::{RawTable, require_column as geo_column};
use crate::table::{IndicatorMeta, IndicatorSeries, NormalizedTable, SeriesKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKeys {
    /// Join on region identity only; series keep their full period axes.
    Region,
    /// Join on (region, period): surviving series are trimmed to the period
    /// set present on both sides for that region. Requires one shared
    /// granularity across both tables.
    RegionAndPeriod,
}

/// An inner join's product plus its observable drop counts.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub table: NormalizedTable,
    /// Regions of the left table with no counterpart on the right.
    pub dropped_left: usize,
    /// Regions of the right table with no counterpart on the left.
    pub dropped_right: usize,
}

/// Explicit reconciliation table between two region scales, e.g. mapping
/// each Seoul district onto its province. Never inferred.
#[derive(Debug, Clone)]
pub struct ScaleMap {
    pub from: RegionScale,
    pub to: RegionScale,
    entries: HashMap<String, String>,
}

impl ScaleMap {
    pub fn new(
        from: RegionScale,
        to: RegionScale,
        entries: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        ScaleMap {
            from,
            to,
            entries: entries.into_iter().collect(),
        }
    }

    pub fn resolve(&self, region: &Region) -> Result<Region> {
        if region.scale != self.from {
            return Ok(region.clone());
        }
        let mapped = self.entries.get(&region.id).ok_or_else(|| {
            PipelineError::UnmappedRegion {
                region: region.to_string(),
                reference: format!("scale map {}→{}", self.from, self.to),
            }
        })?;
        Ok(Region {
            scale: self.to,
            id: mapped.clone(),
        })
    }
}

/// Inner join of two indicator tables on region identity (optionally on
/// period as well). When the right table sits at a different region scale,
/// a [`ScaleMap`] must be supplied; an unmappable pair is refused.
pub fn inner_join(
    left: &NormalizedTable,
    right: &NormalizedTable,
    keys: JoinKeys,
    scale_map: Option<&ScaleMap>,
) -> Result<JoinOutcome> {
    let right = match scale_map {
        Some(map) => remap_scale(right, map)?,
        None => right.clone(),
    };

    let left_regions = left.regions();
    let right_regions = right.regions();
    require_shared_scale(left, &left_regions, &right_regions)?;

    let common: BTreeSet<Region> = left_regions.intersection(&right_regions).cloned().collect();
    let dropped_left = left_regions.len() - common.len();
    let dropped_right = right_regions.len() - common.len();

    if keys == JoinKeys::RegionAndPeriod {
        require_single_granularity(left, &right)?;
    }

    // Right-side indicators colliding with a left indicator name are
    // prefixed, the same disambiguation a joined CSV header gets.
    let left_indicators: HashSet<String> = left.indicators().into_iter().collect();
    let mut rename: HashMap<String, String> = HashMap::new();
    for indicator in right.indicators() {
        if !left_indicators.contains(&indicator) {
            continue;
        }
        let mut candidate = format!("right_{indicator}");
        let mut counter = 1usize;
        while left_indicators.contains(&candidate) || rename.values().any(|v| v == &candidate) {
            candidate = format!("right_{indicator}_{counter}");
            counter += 1;
        }
        rename.insert(indicator, candidate);
    }

    let mut series: BTreeMap<SeriesKey, Arc<IndicatorSeries>> = BTreeMap::new();
    for (key, existing) in left.series_iter() {
        if common.contains(&key.region) {
            series.insert(key.clone(), Arc::clone(existing));
        }
    }
    for (key, existing) in right.series_iter() {
        if !common.contains(&key.region) {
            continue;
        }
        let indicator = rename
            .get(&key.indicator)
            .cloned()
            .unwrap_or_else(|| key.indicator.clone());
        series.insert(
            SeriesKey {
                region: key.region.clone(),
                indicator,
            },
            Arc::clone(existing),
        );
    }

    if keys == JoinKeys::RegionAndPeriod {
        series = trim_to_common_periods(series, left, &right, &common);
    }

    let mut meta: BTreeMap<String, IndicatorMeta> = left.meta_map().clone();
    for (indicator, entry) in right.meta_map() {
        let name = rename.get(indicator).cloned().unwrap_or_else(|| indicator.clone());
        meta.insert(name, entry.clone());
    }

    let table = NormalizedTable::with_series(
        format!("{}+{}", left.name(), right.name()),
        series,
        meta,
    );
    info!(
        "Inner join '{}' ⋈ '{}': {} common region(s), dropped {} left / {} right",
        left.name(),
        right.name(),
        common.len(),
        dropped_left,
        dropped_right
    );
    Ok(JoinOutcome {
        table,
        dropped_left,
        dropped_right,
    })
}

fn require_shared_scale(
    left: &NormalizedTable,
    left_regions: &BTreeSet<Region>,
    right_regions: &BTreeSet<Region>,
) -> Result<()> {
    let left_scales: HashSet<RegionScale> = left_regions.iter().map(|r| r.scale).collect();
    let right_scales: HashSet<RegionScale> = right_regions.iter().map(|r| r.scale).collect();
    if left_scales.is_empty() || right_scales.is_empty() {
        return Ok(());
    }
    if left_scales.is_disjoint(&right_scales) {
        let offender = right_regions
            .iter()
            .next()
            .map(|r| r.to_string())
            .unwrap_or_default();
        return Err(PipelineError::UnmappedRegion {
            region: offender,
            reference: format!("table '{}' (no shared region scale; supply a scale map)", left.name()),
        });
    }
    Ok(())
}

fn remap_scale(table: &NormalizedTable, map: &ScaleMap) -> Result<NormalizedTable> {
    let mut series: BTreeMap<SeriesKey, Arc<IndicatorSeries>> = BTreeMap::new();
    for (key, existing) in table.series_iter() {
        let region = map.resolve(&key.region)?;
        let new_key = SeriesKey {
            region,
            indicator: key.indicator.clone(),
        };
        if series.insert(new_key.clone(), Arc::clone(existing)).is_some() {
            return Err(PipelineError::schema(
                format!("table '{}'", table.name()),
                format!("scale map collapses multiple regions onto {new_key}"),
            ));
        }
    }
    Ok(NormalizedTable::with_series(
        table.name().to_string(),
        series,
        table.meta_map().clone(),
    ))
}

fn require_single_granularity(left: &NormalizedTable, right: &NormalizedTable) -> Result<()> {
    let granularities: HashSet<Granularity> = left
        .series_iter()
        .chain(right.series_iter())
        .map(|(_, series)| series.granularity())
        .collect();
    if granularities.len() > 1 {
        return Err(PipelineError::schema(
            format!("join '{}' ⋈ '{}'", left.name(), right.name()),
            format!(
                "mixed period granularities {}; align_granularity before a period join",
                granularities.iter().map(|g| g.to_string()).sorted().join(", ")
            ),
        ));
    }
    Ok(())
}

fn trim_to_common_periods(
    series: BTreeMap<SeriesKey, Arc<IndicatorSeries>>,
    left: &NormalizedTable,
    right: &NormalizedTable,
    common: &BTreeSet<Region>,
) -> BTreeMap<SeriesKey, Arc<IndicatorSeries>> {
    let mut trimmed = BTreeMap::new();
    for region in common {
        let left_periods = region_periods(left, region);
        let right_periods = region_periods(right, region);
        let shared: HashSet<TimePeriod> =
            left_periods.intersection(&right_periods).copied().collect();
        for (key, existing) in series.range(
            SeriesKey {
                region: region.clone(),
                indicator: String::new(),
            }..,
        ) {
            if &key.region != region {
                break;
            }
            if existing.periods().all(|p| shared.contains(p)) {
                trimmed.insert(key.clone(), Arc::clone(existing));
                continue;
            }
            let points = existing
                .points()
                .iter()
                .filter(|(period, _)| shared.contains(period))
                .cloned()
                .collect();
            trimmed.insert(
                key.clone(),
                Arc::new(IndicatorSeries::from_sorted(existing.granularity(), points)),
            );
        }
    }
    trimmed
}

fn region_periods(table: &NormalizedTable, region: &Region) -> HashSet<TimePeriod> {
    table
        .series_iter()
        .filter(|(key, _)| &key.region == region)
        .flat_map(|(_, series)| series.periods().copied().collect::<Vec<_>>())
        .collect()
}

/// One reference row of the centroid/boundary lookup table. The geometry
/// key is passed through to the rendering layer uninterpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionSite {
    pub region: Region,
    pub lat: f64,
    pub lon: f64,
    pub geometry_key: Option<String>,
}

/// Column roles for building a [`GeoReference`] from a raw table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoSpec {
    pub name: String,
    pub region_column: String,
    pub region_scale: RegionScale,
    pub lat_column: String,
    pub lon_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_key_column: Option<String>,
}

/// Reference table mapping each region to exactly one site row.
#[derive(Debug, Clone)]
pub struct GeoReference {
    name: String,
    entries: HashMap<Region, RegionSite>,
}

impl GeoReference {
    pub fn new(name: impl Into<String>, sites: Vec<RegionSite>) -> Result<Self> {
        let name = name.into();
        let mut entries = HashMap::with_capacity(sites.len());
        for site in sites {
            let region = site.region.clone();
            if entries.insert(region.clone(), site).is_some() {
                return Err(PipelineError::schema(
                    format!("reference '{name}'"),
                    format!("duplicate reference row for region '{region}'"),
                ));
            }
        }
        Ok(GeoReference { name, entries })
    }

    pub fn from_raw_table(table: &RawTable, spec: &GeoSpec) -> Result<Self> {
        let region_idx = geo_column(table, &spec.region_column)?;
        let lat_idx = geo_column(table, &spec.lat_column)?;
        let lon_idx = geo_column(table, &spec.lon_column)?;
        let geometry_idx = spec
            .geometry_key_column
            .as_deref()
            .map(|column| geo_column(table, column))
            .transpose()?;
        let mut sites = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let id = row.get(region_idx).map(String::as_str).unwrap_or("").trim();
            if id.is_empty() {
                return Err(PipelineError::schema(
                    format!("reference '{}'", table.name),
                    "blank region key in reference row".to_string(),
                ));
            }
            sites.push(RegionSite {
                region: Region {
                    scale: spec.region_scale,
                    id: id.to_string(),
                },
                lat: parse_number(row.get(lat_idx).map(String::as_str).unwrap_or(""))?,
                lon: parse_number(row.get(lon_idx).map(String::as_str).unwrap_or(""))?,
                geometry_key: geometry_idx
                    .and_then(|idx| row.get(idx))
                    .map(|key| key.trim().to_string()),
            });
        }
        Self::new(spec.name.clone(), sites)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolves one region; a miss is an [`PipelineError::UnmappedRegion`],
    /// never a silent exclusion.
    pub fn resolve(&self, region: &Region) -> Result<&RegionSite> {
        self.entries
            .get(region)
            .ok_or_else(|| PipelineError::UnmappedRegion {
                region: region.to_string(),
                reference: self.name.clone(),
            })
    }
}

/// Lookup join: resolves every region of an indicator table against the
/// reference, in region order. One unresolved region fails the whole join.
pub fn lookup_join(table: &NormalizedTable, geo: &GeoReference) -> Result<Vec<RegionSite>> {
    let sites = table
        .regions()
        .iter()
        .map(|region| geo.resolve(region).cloned())
        .collect::<Result<Vec<_>>>()?;
    info!(
        "Lookup join '{}' → '{}': {} region(s) resolved",
        table.name(),
        geo.name,
        sites.len()
    );
    Ok(sites)
}

/// Aggregation declared for a granularity alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOp {
    Mean,
    Sum,
}

/// Re-buckets every series onto a coarser granularity with the declared
/// aggregation. Upsampling (or a non-refining pair such as quarter→month)
/// is refused; a bucket containing a gap aggregates to a gap rather than a
/// guessed value.
pub fn align_granularity(
    table: &NormalizedTable,
    target: Granularity,
    op: AlignOp,
) -> Result<NormalizedTable> {
    let mut series = BTreeMap::new();
    for (key, existing) in table.series_iter() {
        if existing.granularity() == target {
            series.insert(key.clone(), Arc::clone(existing));
            continue;
        }
        if !refines(existing.granularity(), target) {
            return Err(PipelineError::schema(
                format!("table '{}'", table.name()),
                format!(
                    "cannot aggregate {} series {key} onto {target} periods",
                    existing.granularity()
                ),
            ));
        }
        let mut buckets: BTreeMap<TimePeriod, Vec<Option<f64>>> = BTreeMap::new();
        for (period, value) in existing.points() {
            buckets.entry(coarsen(period, target)).or_default().push(*value);
        }
        let points = buckets
            .into_iter()
            .map(|(period, values)| (period, aggregate_bucket(&values, op)))
            .collect();
        series.insert(
            key.clone(),
            Arc::new(IndicatorSeries::from_sorted(target, points)),
        );
    }
    Ok(NormalizedTable::with_series(
        table.name().to_string(),
        series,
        table.meta_map().clone(),
    ))
}

fn refines(fine: Granularity, coarse: Granularity) -> bool {
    matches!(
        (fine, coarse),
        (Granularity::Month, Granularity::Quarter)
            | (Granularity::Month, Granularity::Year)
            | (Granularity::Quarter, Granularity::Year)
    )
}

fn coarsen(period: &TimePeriod, target: Granularity) -> TimePeriod {
    match (period, target) {
        (TimePeriod::Month { year, month }, Granularity::Quarter) => TimePeriod::Quarter {
            year: *year,
            quarter: (month - 1) / 3 + 1,
        },
        (_, Granularity::Year) => TimePeriod::Year(period.year()),
        // Guarded by `refines`.
        _ => *period,
    }
}

fn aggregate_bucket(values: &[Option<f64>], op: AlignOp) -> Option<f64> {
    if values.iter().any(Option::is_none) {
        return None;
    }
    let concrete: Vec<f64> = values.iter().flatten().copied().collect();
    match op {
        AlignOp::Sum => Some(concrete.iter().sum()),
        AlignOp::Mean => Some(concrete.iter().sum::<f64>() / concrete.len() as f64),
    }
}

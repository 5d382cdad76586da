//! Regional indicator aggregation and normalization pipeline.
//!
//! Ingests heterogeneous regional/time-series tables (rent, CPI, loan
//! rates, GDP, employee counts, closure rates, population density), cleans
//! and aligns them onto common `(Region, TimePeriod)` keys, and publishes
//! an immutable, queryable [`table::NormalizedTable`] that derived
//! statistics (extremes, standardized scores, percentage shares, per-capita
//! ratios) are recomputed from on demand.
//!
//! The pipeline is a synchronous batch transformation:
//!
//! ```text
//! RawTable → normalize → convert → fill_missing → join → aggregate
//! ```
//!
//! Every published structure is immutable, so independent consumers may
//! read the same table or statistic concurrently without synchronization.
//! Rendering, HTTP/UI wiring, and file-path configuration live outside this
//! crate; consumers only see plain records.

pub mod aggregate;
pub mod convert;
pub mod data;
pub mod error;
pub mod interpolate;
pub mod join;
pub mod schema;
pub mod table;

pub use aggregate::{AggregateOp, DerivedStat, Extremes};
pub use data::{Granularity, MissingMarker, Region, RegionScale, TimeFormat, TimePeriod};
pub use error::{PipelineError, Result};
pub use interpolate::{Completeness, InterpolationReport};
pub use join::{AlignOp, GeoReference, GeoSpec, JoinKeys, JoinOutcome, RegionSite, ScaleMap};
pub use schema::{Observation, RawTable, TableSpec, ValueColumn};
pub use table::{IndicatorMeta, IndicatorSeries, NormalizedTable, SeriesKey};

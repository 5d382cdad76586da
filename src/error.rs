//! Error taxonomy for the pipeline.
//!
//! Every variant names the offending region, indicator, period, or column,
//! so a failure points back at the source cell instead of at the pipeline
//! stage that tripped over it. Callers match on the variant to distinguish
//! a malformed input from an unmappable region or a degenerate statistic.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// A declared column is absent, a key is blank or duplicated, or a
    /// structural invariant (granularity, scale) is violated.
    #[error("Schema error in {context}: {detail}")]
    Schema { context: String, detail: String },

    #[error("Failed to parse '{value}' as {expected}")]
    Parse { value: String, expected: String },

    /// Too few concrete values to interpolate between.
    #[error(
        "Series {region}/{indicator} has {anchors} anchor value(s), need at least 2 to interpolate"
    )]
    InsufficientData {
        region: String,
        indicator: String,
        anchors: usize,
    },

    #[error("Region {region} has no entry in {reference}")]
    UnmappedRegion { region: String, reference: String },

    /// Standardization asked of a distribution with no spread.
    #[error("Degenerate distribution of '{indicator}' at {period}: {detail}")]
    DegenerateDistribution {
        indicator: String,
        period: String,
        detail: String,
    },

    #[error("Invalid denominator in {context}: {detail}")]
    InvalidDenominator { context: String, detail: String },
}

impl PipelineError {
    pub(crate) fn schema(context: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::Schema {
            context: context.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn parse(value: impl Into<String>, expected: impl Into<String>) -> Self {
        PipelineError::Parse {
            value: value.into(),
            expected: expected.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_input() {
        let err = PipelineError::parse("n/a", "number");
        assert_eq!(err.to_string(), "Failed to parse 'n/a' as number");

        let err = PipelineError::schema("table 'rent'", "declared column '임대료' not found");
        assert!(err.to_string().contains("table 'rent'"));
        assert!(err.to_string().contains("임대료"));

        let err = PipelineError::InsufficientData {
            region: "province:서울".to_string(),
            indicator: "loan_rate".to_string(),
            anchors: 1,
        };
        assert!(err.to_string().contains("loan_rate"));
        assert!(err.to_string().contains("1 anchor"));
    }

    #[test]
    fn variants_stay_matchable_after_cloning() {
        let err = PipelineError::UnmappedRegion {
            region: "district:강남구".to_string(),
            reference: "centroids".to_string(),
        };
        let cloned = err.clone();
        assert_eq!(err, cloned);
        assert!(matches!(cloned, PipelineError::UnmappedRegion { .. }));
    }
}

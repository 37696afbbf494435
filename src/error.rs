//! Error taxonomy shared by every pipeline stage.

use std::path::PathBuf;

/// Errors raised while loading, joining, or computing metrics.
///
/// Structural problems (unreadable files, missing columns, malformed values)
/// abort a run. Per-segment domain problems ([`MetricError::DivisionByZero`],
/// [`MetricError::NegativeModeShare`]) are usually collected by the pipeline and
/// reported, unless the run is configured as strict.
#[derive(thiserror::Error, Debug)]
pub enum MetricError {
    #[error("[{stage}] input file `{}` does not exist", path.display())]
    MissingFile { stage: &'static str, path: PathBuf },

    #[error("[{stage}] failed reading `{}`: {source}", path.display())]
    Csv {
        stage: &'static str,
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("[{stage}] `{}` is missing required column `{column}`", path.display())]
    MissingColumn {
        stage: &'static str,
        path: PathBuf,
        column: String,
    },

    #[error("[{stage}] `{}` column `{column}` has malformed value `{value}`", path.display())]
    MalformedValue {
        stage: &'static str,
        path: PathBuf,
        column: String,
        value: String,
    },

    #[error("division by zero computing {quantity} for segment {segment_id}")]
    DivisionByZero {
        quantity: &'static str,
        segment_id: String,
    },

    #[error("negative {share} share ({value:.4}) for segment {segment_id}")]
    NegativeModeShare {
        share: &'static str,
        value: f64,
        segment_id: String,
    },

    #[error("{reducer}: weighted denominator is empty or zero")]
    EmptyDenominator { reducer: &'static str },

    #[error("[{stage}] duplicate key `{key}` in `{}` violates many-to-one join", path.display())]
    DuplicateKey {
        stage: &'static str,
        path: PathBuf,
        key: String,
    },

    #[error("invalid time window `{window}`: {problem}")]
    InvalidWindow { window: String, problem: String },

    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),

    #[error("invalid configuration `{}`: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("[{stage}] i/o error on `{}`: {source}", path.display())]
    Io {
        stage: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MetricError {
    /// True for errors scoped to a single segment's data rather than to the run.
    pub fn is_segment_scoped(&self) -> bool {
        matches!(
            self,
            MetricError::DivisionByZero { .. } | MetricError::NegativeModeShare { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MetricError>;

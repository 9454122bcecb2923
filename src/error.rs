//! Error types for extraction and strategy inference.
//!
//! Two families exist because they are handled differently:
//!
//! - [`DataError`] is raised while loading one race. The dataset builder logs it
//!   and moves on to the next race.
//! - [`StrategyError`] is raised by the inference pipeline and by model loading.
//!   It always reaches the caller; no partial plan is produced.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias for inference operations.
pub type Result<T, E = StrategyError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StrategyError {
    #[error("unknown {vocabulary} label {label:?}")]
    UnknownLabel { vocabulary: String, label: String },

    #[error("{vocabulary} encoder has no class for code {code}")]
    UnknownCode { vocabulary: String, code: f64 },

    #[error("no degradation data for compound {0:?}")]
    UnsupportedCompound(String),

    #[error("predicted {requested} stints but only {capacity} per-stint models are configured")]
    CapacityExceeded { requested: usize, capacity: usize },

    #[error("model {model} requires feature {feature:?} which was not supplied")]
    MissingFeature { model: String, feature: String },

    #[error("{stage} model produced an unusable value {value}")]
    InvalidPrediction { stage: String, value: f64 },

    #[error("model {model} declares {features} features but {coefficients} coefficients")]
    ShapeMismatch {
        model: String,
        features: usize,
        coefficients: usize,
    },

    #[error("failed to read model artifact {path}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed model artifact {path}")]
    ArtifactFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("bundle has {lengths} stint-length models but {compounds} stint-compound models")]
    BundleMismatch { lengths: usize, compounds: usize },
}

impl StrategyError {
    pub(crate) fn invalid_prediction(stage: &str, value: f64) -> Self {
        Self::InvalidPrediction {
            stage: stage.to_string(),
            value,
        }
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DataError {
    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed table {path}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("malformed event metadata {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no session for {year} round {round}")]
    MissingEvent { year: i32, round: u32 },

    #[error("no race results for {event}")]
    MissingResults { event: String },
}

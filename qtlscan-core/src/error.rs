//! Error type shared by fitting, scanning and result assembly.

use qtlscan_linalg::LinalgError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    #[error("Invalid likelihood: {0}")]
    InvalidLikelihood(String),

    #[error("Non-finite values found in {0}")]
    NonFiniteInput(&'static str),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Model fitting failed: {0}")]
    FittingFailure(String),

    #[error("Unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("The single-trait scanner takes no design columns (got {0})")]
    DesignUnsupported(usize),

    #[error("Test {0} selects no candidates")]
    EmptyCandidateGroup(usize),

    #[error("Candidate index {index} out of range for {ncandidates} candidates")]
    CandidateIndexOutOfRange { index: usize, ncandidates: usize },

    #[error("No samples shared by all inputs")]
    NoSharedSamples,

    #[error("Invalid outcome for {likelihood} likelihood: {reason}")]
    InvalidOutcome {
        likelihood: &'static str,
        reason: String,
    },
}

impl From<LinalgError> for ScanError {
    fn from(err: LinalgError) -> Self {
        ScanError::FittingFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

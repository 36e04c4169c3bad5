//! qtlscan-core: mixed-model association scans.
//!
//! Fits a null model (single-trait LMM, multi-trait Kronecker LMM, or an
//! EP-approximated GLMM), scans candidate groups against it with a fast
//! scanner, and assembles likelihood-ratio statistics and effect sizes.

pub mod dataset;
pub mod display;
pub mod error;
pub mod glmm;
pub mod likelihood;
pub mod lmm;
pub mod model;
pub mod optim;
pub mod qc;
pub mod result;
pub mod scan;
pub mod scanner;
pub mod util;

pub use dataset::LabeledMatrix;
pub use error::{Result, ScanError};
pub use likelihood::{Likelihood, LikelihoodSpec};
pub use model::{FitConfig, NullVariances};
pub use result::ScanResult;
pub use scan::{scan, ScanRequest, TestSpec};

//! qtlscan-linalg: dense linear algebra for mixed-model scans.
//!
//! Provides the dense matrix wrapper, Cholesky and symmetric eigen
//! decompositions, and the economic eigendecomposition of kinship
//! covariances used by the fast scanners.

pub mod decomposition;
pub mod dense;
pub mod economic;

pub use decomposition::{CholeskyDecomp, LinalgError, SymmetricEigen};
pub use dense::DenseMatrix;
pub use economic::EconomicQs;

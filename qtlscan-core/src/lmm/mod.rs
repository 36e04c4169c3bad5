//! Linear mixed models: null-model fits and their fast scanners.

pub mod fast_scanner;
pub(crate) mod gls;
pub mod kron;
pub mod kron_scanner;
pub mod single;

pub use fast_scanner::FastScanner;
pub use kron::{Kron2Sum, KronConfig, KronFit};
pub use kron_scanner::KronFastScanner;
pub use single::{Lmm, LmmConfig, LmmFit};

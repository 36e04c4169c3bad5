//! Generalised linear mixed models for non-Gaussian outcomes.
//!
//! The null model is fitted by expectation propagation; scanning then runs
//! on the Gaussian pseudo-observations the EP sites define.

pub mod ep;
pub mod expfam;
pub mod family;
pub mod irls;
pub mod link;
pub mod normal;
pub mod quadrature;

pub use ep::{EpConfig, EpSites};
pub use expfam::{GlmmExpFam, GlmmFit};
pub use family::Family;

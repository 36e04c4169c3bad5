//! Small numerical helpers.

pub mod math;

//! qtlscan-data: file I/O for association scans.
//!
//! Reads delimited trait, covariate, candidate and kinship matrices into
//! sample-labelled matrices, and writes scan result tables.

pub mod kinship;
pub mod matrix_file;
pub mod results;

pub use kinship::{read_kinship, write_kinship};
pub use matrix_file::{read_matrix_file, write_matrix_file, MatrixFile};
pub use results::{write_effsizes_tsv, write_stats_tsv};

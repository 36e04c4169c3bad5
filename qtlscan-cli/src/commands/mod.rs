pub mod kinship;
pub mod scan;

//! Kinship matrix files.
//!
//! Same layout as a matrix file, with the header naming the column
//! samples. Columns are reordered to follow the row order, so the
//! returned matrix is indexed by a single list of sample IDs.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use qtlscan_core::LabeledMatrix;
use qtlscan_linalg::DenseMatrix;
use tracing::warn;

use crate::matrix_file::{read_matrix_file, write_matrix_file};

/// Read a square kinship matrix.
pub fn read_kinship(path: &Path) -> Result<LabeledMatrix> {
    let file = read_matrix_file(path)?;
    let n = file.nsamples();
    if file.column_names.len() != n {
        bail!(
            "{}: kinship has {} rows and {} columns",
            path.display(),
            n,
            file.column_names.len()
        );
    }

    let col_pos: HashMap<&str, usize> = file
        .column_names
        .iter()
        .enumerate()
        .map(|(j, id)| (id.as_str(), j))
        .collect();
    let order = file
        .sample_ids
        .iter()
        .map(|id| {
            col_pos
                .get(id.as_str())
                .copied()
                .with_context(|| format!("{}: sample '{}' has no kinship column", path.display(), id))
        })
        .collect::<Result<Vec<_>>>()?;

    let values = file.values.select_columns(&order);
    if values.max_abs_diff(&values.transpose()) > 1e-8 {
        warn!("{}: kinship is not symmetric, using (K + K')/2", path.display());
    }
    let ids = file.sample_ids;
    Ok(LabeledMatrix::new(values.symmetrize())
        .with_sample_ids(ids.clone())?
        .with_column_ids(ids)?)
}

/// Write a kinship matrix with its sample IDs on both axes.
pub fn write_kinship(path: &Path, sample_ids: &[String], k: &DenseMatrix) -> Result<()> {
    write_matrix_file(path, "IID", sample_ids, sample_ids, k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_follow_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kinship.tsv");
        std::fs::write(&path, "IID\tB\tA\nA\t0.1\t1.0\nB\t2.0\t0.1\n").unwrap();

        let k = read_kinship(&path).unwrap();
        assert_eq!(k.sample_ids().unwrap(), ["A".to_string(), "B".to_string()]);
        assert_eq!(k.values().get(0, 0), 1.0);
        assert_eq!(k.values().get(1, 1), 2.0);
        assert_eq!(k.values().get(0, 1), 0.1);
    }

    #[test]
    fn test_missing_column_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kinship.tsv");
        std::fs::write(&path, "IID\tA\tC\nA\t1\t0\nB\t0\t1\n").unwrap();
        let err = read_kinship(&path).unwrap_err();
        assert!(err.to_string().contains("'B'"), "{}", err);
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.tsv");
        let ids = vec!["s1".to_string(), "s2".to_string()];
        let k = DenseMatrix::from_row_major(2, 2, &[1.0, 0.25, 0.25, 1.0]);
        write_kinship(&path, &ids, &k).unwrap();
        let back = read_kinship(&path).unwrap();
        assert!(back.values().max_abs_diff(&k) < 1e-15);
    }
}

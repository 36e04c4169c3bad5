//! Tab-separated scan result tables.

use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use qtlscan_core::ScanResult;

use crate::matrix_file::format_value;

fn create(path: &Path) -> Result<BufWriter<std::fs::File>> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create output file: {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// One row per test with the three-way likelihood-ratio statistics.
pub fn write_stats_tsv(path: &Path, result: &ScanResult) -> Result<()> {
    let mut w = create(path)?;
    writeln!(
        w,
        "test\tcandidates\tlml0\tlml1\tlml2\tdof10\tdof20\tdof21\tpv10\tpv20\tpv21"
    )?;
    for (row, t) in result.hypothesis_stats().iter().zip(&result.tests) {
        let candidates: Vec<&str> = t
            .candidates
            .iter()
            .map(|&c| result.candidate_ids.get(c).map_or("?", String::as_str))
            .collect();
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{:e}\t{:e}\t{:e}",
            row.test,
            candidates.join(","),
            row.lml0,
            row.lml1,
            row.lml2,
            row.dof10,
            row.dof20,
            row.dof21,
            row.pv10,
            row.pv20,
            row.pv21
        )?;
    }
    w.flush()?;
    Ok(())
}

/// Candidate effect sizes under the broad alternative.
pub fn write_effsizes_tsv(path: &Path, result: &ScanResult) -> Result<()> {
    let mut w = create(path)?;
    writeln!(w, "test\tcandidate\ttrait\tenv\teffsize\teffsize_se")?;
    for row in result.alt_effsizes() {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.test,
            row.candidate,
            row.trait_id.as_deref().unwrap_or("NA"),
            row.env,
            format_value(row.effsize),
            format_value(row.effsize_se)
        )?;
    }
    w.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtlscan_core::{scan, ScanRequest};
    use qtlscan_linalg::DenseMatrix;

    fn small_result() -> ScanResult {
        let y = DenseMatrix::from_vec(&[1.0, 0.5, 2.1, -0.3, 1.4, 0.2, 0.9, 1.8]);
        let g = DenseMatrix::from_fn(8, 2, |i, j| ((i * (j + 2)) % 3) as f64);
        scan(ScanRequest::new(g, y)).unwrap()
    }

    #[test]
    fn test_stats_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.stats.tsv");
        write_stats_tsv(&path, &small_result()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("test\tcandidates\tlml0"));
        assert!(lines[1].starts_with("0\t0\t"), "{}", lines[1]);
        assert_eq!(lines[2].split('\t').count(), 11);
    }

    #[test]
    fn test_effsizes_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.effsizes.tsv");
        write_effsizes_tsv(&path, &small_result()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        let fields: Vec<&str> = lines[2].split('\t').collect();
        assert_eq!(fields[1], "1");
        assert!(fields[4].parse::<f64>().unwrap().is_finite());
    }
}

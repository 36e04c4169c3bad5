//! Compute a kinship matrix from a genotype file.
//!
//! qtlscan kinship --genotypes ... --output ... [--normalise]

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use tracing::info;

use qtlscan_core::qc::{kinship_from_genotypes, normalise_covariance};
use qtlscan_data::{read_matrix_file, write_kinship};
use qtlscan_linalg::DenseMatrix;

#[derive(Args)]
pub struct KinshipArgs {
    /// Genotype file (samples x markers)
    #[arg(long)]
    genotypes: PathBuf,

    /// Output kinship file
    #[arg(long)]
    output: PathBuf,

    /// Apply Gower scaling to the result
    #[arg(long, default_value = "false")]
    normalise: bool,
}

pub fn run(args: KinshipArgs) -> Result<()> {
    let genotypes = read_matrix_file(&args.genotypes)?;
    if genotypes.nsamples() < 2 {
        bail!("{}: need at least two samples", args.genotypes.display());
    }
    info!(
        "Loaded {} markers x {} samples",
        genotypes.column_names.len(),
        genotypes.nsamples()
    );

    let mut k: DenseMatrix = kinship_from_genotypes(&genotypes.values);
    if args.normalise {
        k = normalise_covariance(&k)?;
    }
    write_kinship(&args.output, &genotypes.sample_ids, &k)?;
    info!("Wrote kinship to {}", args.output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtlscan_data::read_kinship;

    #[test]
    fn test_kinship_command() {
        let dir = tempfile::tempdir().unwrap();
        let genotypes = dir.path().join("geno.tsv");
        std::fs::write(
            &genotypes,
            "IID\tm1\tm2\tm3\nA\t0\t1\t2\nB\t1\t1\t0\nC\t2\tNA\t1\nD\t0\t2\t1\n",
        )
        .unwrap();
        let output = dir.path().join("kinship.tsv");

        run(KinshipArgs {
            genotypes,
            output: output.clone(),
            normalise: true,
        })
        .unwrap();

        let k = read_kinship(&output).unwrap();
        assert_eq!(k.nrows(), 4);
        let v = k.values();
        let c = v.trace() - v.sum() / 4.0;
        assert!((c - 3.0).abs() < 1e-8, "Gower constant {}", c);
    }
}

//! Fit the null model and scan candidates.
//!
//! qtlscan scan --traits ... --candidates ... [--kinship ...] --output-prefix ...
//!
//! Multi-trait designs (`--design`, `--narrow-design`, `--broad-design`) are
//! matrix files with one row per trait, keyed by trait column name.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use qtlscan_core::qc::{mean_impute, normalise_covariance, remove_dependent_cols};
use qtlscan_core::{scan, FitConfig, LabeledMatrix, LikelihoodSpec, ScanRequest, TestSpec};
use qtlscan_data::{read_kinship, read_matrix_file, write_effsizes_tsv, write_stats_tsv, MatrixFile};
use qtlscan_linalg::DenseMatrix;

#[derive(Args)]
pub struct ScanArgs {
    /// Trait file (samples x traits)
    #[arg(long)]
    traits: PathBuf,

    /// Candidate file (samples x candidates)
    #[arg(long)]
    candidates: PathBuf,

    /// Kinship file (samples x samples)
    #[arg(long)]
    kinship: Option<PathBuf>,

    /// Covariate file; an intercept is used when absent
    #[arg(long)]
    covariates: Option<PathBuf>,

    /// Likelihood: normal, bernoulli, probit, binomial, or poisson
    #[arg(long, default_value = "normal")]
    likelihood: String,

    /// Trait-file column holding binomial trials
    #[arg(long)]
    trials_col: Option<String>,

    /// Trait columns to analyse (comma-separated, default: all)
    #[arg(long, default_value = "")]
    trait_cols: String,

    /// Candidate tests: groups separated by ';', candidates within a group by ','
    #[arg(long)]
    tests: Option<String>,

    /// Apply Gower scaling to the kinship
    #[arg(long, default_value = "false")]
    normalise_kinship: bool,

    /// Mean-impute missing candidate values
    #[arg(long, default_value = "false")]
    impute_candidates: bool,

    /// Drop linearly dependent covariate columns
    #[arg(long, default_value = "false")]
    drop_dependent_covariates: bool,

    /// Tolerance for dependent covariate detection
    #[arg(long, default_value = "1e-8")]
    dependence_tol: f64,

    /// Trait design of the covariate effects (traits x environments)
    #[arg(long)]
    design: Option<PathBuf>,

    /// Trait design of the narrow candidate alternative
    #[arg(long)]
    narrow_design: Option<PathBuf>,

    /// Trait design added by the broad candidate alternative
    #[arg(long)]
    broad_design: Option<PathBuf>,

    /// Rank of the trait-by-trait genetic covariance (multi-trait)
    #[arg(long, default_value = "1")]
    c0_rank: usize,

    /// Maximum optimiser iterations
    #[arg(long, default_value = "300")]
    max_iter: usize,

    /// Output file prefix
    #[arg(long)]
    output_prefix: String,

    /// Also write the full result as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

/// Parse `"0,1;2;3"` into tests. One index gives a single-candidate test.
pub fn parse_tests(spec: &str) -> Result<Vec<TestSpec>> {
    spec.split(';')
        .enumerate()
        .map(|(t, group)| {
            let idx = group
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<usize>()
                        .with_context(|| format!("Test {}: '{}' is not a candidate index", t, s))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(match idx.as_slice() {
                [i] => TestSpec::Single(*i),
                _ => TestSpec::Group(idx),
            })
        })
        .collect()
}

fn split_names(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn load_traits(args: &ScanArgs) -> Result<(MatrixFile, Option<Vec<f64>>)> {
    let mut traits = read_matrix_file(&args.traits)?;
    let trials = match &args.trials_col {
        Some(col) => {
            let trials = traits.column(col)?;
            traits = traits.without(std::slice::from_ref(col));
            Some(trials)
        }
        None => None,
    };
    let names = split_names(&args.trait_cols);
    if !names.is_empty() {
        traits = traits.select(&names)?;
    }
    if traits.column_names.is_empty() {
        bail!("{}: no trait columns to analyse", args.traits.display());
    }
    info!(
        "Loaded {} traits for {} samples",
        traits.column_names.len(),
        traits.nsamples()
    );
    Ok((traits, trials))
}

fn load_covariates(path: &Path, drop_dependent: bool, tol: f64) -> Result<LabeledMatrix> {
    let mut m = read_matrix_file(path)?;
    if drop_dependent {
        let (values, keep) = remove_dependent_cols(&m.values, tol);
        m.column_names = keep.iter().map(|&j| m.column_names[j].clone()).collect();
        m.values = values;
    }
    info!("Loaded {} covariates", m.column_names.len());
    m.into_labeled()
}

fn load_candidates(path: &Path, impute: bool) -> Result<LabeledMatrix> {
    let mut g = read_matrix_file(path)?;
    if impute {
        g.values = mean_impute(&g.values);
    }
    info!("Loaded {} candidates", g.column_names.len());
    g.into_labeled()
}

/// Read a trait design and order its rows like the trait columns.
fn load_design(path: &Path, trait_names: &[String]) -> Result<DenseMatrix> {
    let design = read_matrix_file(path)?;
    if design.nsamples() != trait_names.len() {
        bail!(
            "{}: design has {} rows for {} traits",
            path.display(),
            design.nsamples(),
            trait_names.len()
        );
    }
    let rows = trait_names
        .iter()
        .map(|t| {
            design
                .sample_ids
                .iter()
                .position(|r| r == t)
                .with_context(|| format!("{}: no design row for trait '{}'", path.display(), t))
        })
        .collect::<Result<Vec<_>>>()?;
    info!(
        "Loaded design {} ({} x {})",
        path.display(),
        trait_names.len(),
        design.column_names.len()
    );
    Ok(design.values.select_rows(&rows))
}

fn load_kinship(path: &Path, normalise: bool) -> Result<LabeledMatrix> {
    let k = read_kinship(path)?;
    if !normalise {
        return Ok(k);
    }
    let ids = k.sample_ids().map(<[String]>::to_vec).unwrap_or_default();
    let scaled = normalise_covariance(k.values())
        .with_context(|| format!("Failed to normalise kinship {}", path.display()))?;
    Ok(LabeledMatrix::new(scaled)
        .with_sample_ids(ids.clone())?
        .with_column_ids(ids)?)
}

pub fn run(args: ScanArgs, verbose: bool) -> Result<()> {
    info!("Trait file: {}", args.traits.display());
    info!("Candidate file: {}", args.candidates.display());
    info!("Likelihood: {}", args.likelihood);

    let (traits, trials) = load_traits(&args)?;
    let likelihood = match trials {
        Some(trials) => LikelihoodSpec {
            name: args.likelihood.clone(),
            trials: Some(trials),
        },
        None => LikelihoodSpec::new(args.likelihood.clone()),
    };

    let mut config = FitConfig::default();
    config.kron.c0_rank = args.c0_rank;
    config.kron.max_iter = args.max_iter;
    config.lmm.max_iter = args.max_iter;

    let trait_names = traits.column_names.clone();
    let mut request = ScanRequest::new(
        load_candidates(&args.candidates, args.impute_candidates)?,
        traits.into_labeled()?,
    )
    .likelihood(likelihood)
    .verbose(verbose)
    .fit_config(config);
    if let Some(path) = &args.design {
        request = request.design(load_design(path, &trait_names)?);
    }
    if let Some(path) = &args.narrow_design {
        request = request.narrow_design(load_design(path, &trait_names)?);
    }
    if let Some(path) = &args.broad_design {
        request = request.broad_design(load_design(path, &trait_names)?);
    }
    if let Some(path) = &args.covariates {
        request = request.covariates(load_covariates(
            path,
            args.drop_dependent_covariates,
            args.dependence_tol,
        )?);
    }
    if let Some(path) = &args.kinship {
        request = request.kinship(load_kinship(path, args.normalise_kinship)?);
    }
    if let Some(tests) = &args.tests {
        request = request.tests(parse_tests(tests)?);
    }

    let result = scan(request).context("Association scan failed")?;
    info!("Scanned {} tests", result.tests.len());

    let stats_path = format!("{}.stats.tsv", args.output_prefix);
    write_stats_tsv(Path::new(&stats_path), &result)?;
    info!("Wrote statistics to {}", stats_path);

    let effsizes_path = format!("{}.effsizes.tsv", args.output_prefix);
    write_effsizes_tsv(Path::new(&effsizes_path), &result)?;
    info!("Wrote effect sizes to {}", effsizes_path);

    if args.json {
        let json_path = format!("{}.json", args.output_prefix);
        let file = std::fs::File::create(&json_path)
            .with_context(|| format!("Failed to create {}", json_path))?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &result)?;
        info!("Wrote JSON result to {}", json_path);
    }

    println!("{}", result);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tests() {
        let tests = parse_tests("0,1;2; 3 ").unwrap();
        assert_eq!(
            tests,
            vec![
                TestSpec::Group(vec![0, 1]),
                TestSpec::Single(2),
                TestSpec::Single(3)
            ]
        );
    }

    #[test]
    fn test_parse_tests_keeps_empty_groups() {
        let tests = parse_tests("1;;2").unwrap();
        assert_eq!(tests[1], TestSpec::Group(vec![]));
    }

    #[test]
    fn test_parse_tests_rejects_names() {
        assert!(parse_tests("rs12").is_err());
    }

    #[test]
    fn test_scan_command_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let traits = dir.path().join("traits.tsv");
        let candidates = dir.path().join("candidates.tsv");
        let mut t = String::from("IID\theight\n");
        let mut g = String::from("IID\trs1\trs2\n");
        let y = [1.0, 0.5, 2.1, -0.3, 1.4, 0.2, 0.9, 1.8, 0.4, 1.1];
        for (i, yi) in y.iter().enumerate() {
            t.push_str(&format!("S{}\t{}\n", i, yi));
            g.push_str(&format!("S{}\t{}\t{}\n", i, i % 3, (i * 2 + 1) % 3));
        }
        std::fs::write(&traits, t).unwrap();
        std::fs::write(&candidates, g).unwrap();
        let prefix = dir.path().join("out").display().to_string();

        let args = ScanArgs {
            traits,
            candidates,
            kinship: None,
            covariates: None,
            likelihood: "normal".into(),
            trials_col: None,
            trait_cols: String::new(),
            tests: Some("0;1;0,1".into()),
            normalise_kinship: false,
            impute_candidates: false,
            drop_dependent_covariates: false,
            dependence_tol: 1e-8,
            design: None,
            narrow_design: None,
            broad_design: None,
            c0_rank: 1,
            max_iter: 300,
            output_prefix: prefix.clone(),
            json: true,
        };
        run(args, false).unwrap();

        let stats = std::fs::read_to_string(format!("{}.stats.tsv", prefix)).unwrap();
        assert_eq!(stats.lines().count(), 4);
        assert!(stats.lines().nth(3).unwrap().contains("rs1,rs2"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(format!("{}.json", prefix)).unwrap())
                .unwrap();
        assert_eq!(json["candidate_ids"][1], "rs2");
    }

    #[test]
    fn test_design_rows_follow_trait_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("design.tsv");
        std::fs::write(&path, "trait\tshared\tspecific\nweight\t1\t0\nheight\t1\t1\n").unwrap();
        let names = vec!["height".to_string(), "weight".to_string()];
        let a = load_design(&path, &names).unwrap();
        assert_eq!(a.row(0), vec![1.0, 1.0]);
        assert_eq!(a.row(1), vec![1.0, 0.0]);

        let missing = vec!["height".to_string(), "bmi".to_string()];
        assert!(load_design(&path, &missing).is_err());
        assert!(load_design(&path, &names[..1]).is_err());
    }

    #[test]
    fn test_scan_command_with_trait_designs() {
        let dir = tempfile::tempdir().unwrap();
        let traits = dir.path().join("traits.tsv");
        let candidates = dir.path().join("candidates.tsv");
        let narrow = dir.path().join("narrow.tsv");
        let mut t = String::from("IID\theight\tweight\n");
        let mut g = String::from("IID\trs1\trs2\n");
        for i in 0..16 {
            let x = ((i * 7 + 2) % 5) as f64;
            t.push_str(&format!(
                "S{}\t{}\t{}\n",
                i,
                0.3 * x + ((i * 3) % 4) as f64 * 0.25,
                -0.2 * x + ((i * 5) % 7) as f64 * 0.2
            ));
            g.push_str(&format!("S{}\t{}\t{}\n", i, x, (i * i + 1) % 3));
        }
        std::fs::write(&traits, t).unwrap();
        std::fs::write(&candidates, g).unwrap();
        std::fs::write(&narrow, "trait\tshared\nheight\t1\nweight\t1\n").unwrap();
        let kinship = dir.path().join("kinship.tsv");
        let markers = DenseMatrix::from_fn(16, 30, |i, j| ((i * j + i + 2 * j) % 3) as f64);
        let ids: Vec<String> = (0..16).map(|i| format!("S{}", i)).collect();
        qtlscan_data::write_kinship(
            &kinship,
            &ids,
            &qtlscan_core::qc::kinship_from_genotypes(&markers),
        )
        .unwrap();
        let prefix = dir.path().join("mt").display().to_string();

        let args = ScanArgs {
            traits,
            candidates,
            kinship: Some(kinship),
            covariates: None,
            likelihood: "normal".into(),
            trials_col: None,
            trait_cols: String::new(),
            tests: None,
            normalise_kinship: false,
            impute_candidates: false,
            drop_dependent_covariates: false,
            dependence_tol: 1e-8,
            design: None,
            narrow_design: Some(narrow),
            broad_design: None,
            c0_rank: 1,
            max_iter: 300,
            output_prefix: prefix.clone(),
            json: false,
        };
        run(args, false).unwrap();

        let stats = std::fs::read_to_string(format!("{}.stats.tsv", prefix)).unwrap();
        let row: Vec<&str> = stats.lines().nth(1).unwrap().split('\t').collect();
        // dof10, dof20, dof21 for a shared narrow effect and a per-trait broad one.
        assert_eq!(&row[5..8], &["1", "3", "2"]);
    }
}

//! Scan results: per-test likelihood-ratio statistics and effect sizes.
//!
//! A [`ScanResultFactory`] collects the raw hypothesis fits in test order;
//! [`ScanResultFactory::create`] computes the p-values and freezes them
//! into a [`ScanResult`].

use std::fmt;

use qtlscan_linalg::DenseMatrix;
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::likelihood::Likelihood;
use crate::model::NullVariances;
use crate::scanner::ScanOutput;
use crate::util::math::percentile;

/// One fitted hypothesis with its estimates in row-major tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HypothesisRecord {
    pub lml: f64,
    /// Covariate x design-column effects.
    pub covariate_effsizes: Vec<Vec<f64>>,
    pub covariate_effsizes_se: Vec<Vec<f64>>,
    /// Candidate x environment effects.
    pub candidate_effsizes: Vec<Vec<f64>>,
    pub candidate_effsizes_se: Vec<Vec<f64>>,
    pub scale: f64,
}

impl HypothesisRecord {
    /// Number of candidate effects this hypothesis adds to the null.
    pub fn dof(&self) -> usize {
        self.candidate_effsizes.iter().map(|r| r.len()).sum()
    }
}

pub fn normalise_scan_names(out: ScanOutput) -> HypothesisRecord {
    HypothesisRecord {
        lml: out.lml,
        covariate_effsizes: out.effsizes0.to_rows(),
        covariate_effsizes_se: out.effsizes0_se.to_rows(),
        candidate_effsizes: out.effsizes1.to_rows(),
        candidate_effsizes_se: out.effsizes1_se.to_rows(),
        scale: out.scale,
    }
}

/// Likelihood-ratio p-value for `dof` added parameters.
pub fn lrt_pvalue(lml_null: f64, lml_alt: f64, dof: usize) -> f64 {
    if dof == 0 {
        return 1.0;
    }
    let stat = (2.0 * (lml_alt - lml_null)).max(0.0);
    match ChiSquared::new(dof as f64) {
        Ok(chi2) => chi2.sf(stat),
        Err(_) => f64::NAN,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub test: usize,
    /// Candidate column indices tested together.
    pub candidates: Vec<usize>,
    pub lml0: f64,
    pub lml1: f64,
    pub lml2: f64,
    pub dof10: usize,
    pub dof20: usize,
    pub dof21: usize,
    pub pv10: f64,
    pub pv20: f64,
    pub pv21: f64,
    pub narrow: HypothesisRecord,
    pub broad: HypothesisRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VarianceSummary {
    Scalar { v0: Option<f64>, v1: f64 },
    Matrix { c0: Vec<Vec<f64>>, c1: Vec<Vec<f64>> },
}

impl From<&NullVariances> for VarianceSummary {
    fn from(v: &NullVariances) -> Self {
        match v {
            NullVariances::Scalar { v0, v1 } => Self::Scalar { v0: *v0, v1: *v1 },
            NullVariances::Matrix { c0, c1 } => Self::Matrix {
                c0: c0.to_rows(),
                c1: c1.to_rows(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NullModelSummary {
    pub lml: f64,
    pub effsizes: Vec<Vec<f64>>,
    pub effsizes_se: Vec<Vec<f64>>,
    pub variances: VarianceSummary,
}

/// `stats()` row: null against the broad alternative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsRow {
    pub test: usize,
    pub null_lml: f64,
    pub alt_lml: f64,
    pub pvalue: f64,
    pub dof: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HypothesisStatsRow {
    pub test: usize,
    pub lml0: f64,
    pub lml1: f64,
    pub lml2: f64,
    pub dof10: usize,
    pub dof20: usize,
    pub dof21: usize,
    pub pv10: f64,
    pub pv20: f64,
    pub pv21: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffsizeRow {
    pub test: usize,
    pub candidate: String,
    /// Trait of a single-trait scan; multi-trait effects are indexed by `env`.
    pub trait_id: Option<String>,
    pub env: String,
    pub effsize: f64,
    pub effsize_se: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CovariateEffsizeRow {
    pub covariate: String,
    pub trait_id: String,
    pub effsize: f64,
    pub effsize_se: f64,
}

pub struct ScanResultFactory {
    likelihood: Likelihood,
    trait_ids: Vec<String>,
    covariate_ids: Vec<String>,
    candidate_ids: Vec<String>,
    env0_ids: Vec<String>,
    env1_ids: Vec<String>,
    null: NullModelSummary,
    tests: Vec<(Vec<usize>, HypothesisRecord, HypothesisRecord)>,
}

impl ScanResultFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        likelihood: Likelihood,
        trait_ids: Vec<String>,
        covariate_ids: Vec<String>,
        candidate_ids: Vec<String>,
        env0_ids: Vec<String>,
        env1_ids: Vec<String>,
        null_lml: f64,
        null_beta: &DenseMatrix,
        null_beta_se: &DenseMatrix,
        variances: &NullVariances,
    ) -> Self {
        Self {
            likelihood,
            trait_ids,
            covariate_ids,
            candidate_ids,
            env0_ids,
            env1_ids,
            null: NullModelSummary {
                lml: null_lml,
                effsizes: null_beta.to_rows(),
                effsizes_se: null_beta_se.to_rows(),
                variances: variances.into(),
            },
            tests: Vec::new(),
        }
    }

    pub fn add_test(&mut self, candidates: Vec<usize>, narrow: HypothesisRecord, broad: HypothesisRecord) {
        self.tests.push((candidates, narrow, broad));
    }

    pub fn create(self) -> ScanResult {
        let lml0 = self.null.lml;
        let tests = self
            .tests
            .into_iter()
            .enumerate()
            .map(|(test, (candidates, narrow, broad))| {
                let dof10 = narrow.dof();
                let dof20 = broad.dof();
                let dof21 = dof20.saturating_sub(dof10);
                TestResult {
                    test,
                    candidates,
                    lml0,
                    lml1: narrow.lml,
                    lml2: broad.lml,
                    dof10,
                    dof20,
                    dof21,
                    pv10: lrt_pvalue(lml0, narrow.lml, dof10),
                    pv20: lrt_pvalue(lml0, broad.lml, dof20),
                    pv21: lrt_pvalue(narrow.lml, broad.lml, dof21),
                    narrow,
                    broad,
                }
            })
            .collect();
        ScanResult {
            likelihood: self.likelihood,
            trait_ids: self.trait_ids,
            covariate_ids: self.covariate_ids,
            candidate_ids: self.candidate_ids,
            env0_ids: self.env0_ids,
            env1_ids: self.env1_ids,
            null: self.null,
            tests,
        }
    }
}

/// Immutable outcome of a scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanResult {
    pub likelihood: Likelihood,
    pub trait_ids: Vec<String>,
    pub covariate_ids: Vec<String>,
    pub candidate_ids: Vec<String>,
    pub env0_ids: Vec<String>,
    pub env1_ids: Vec<String>,
    pub null: NullModelSummary,
    pub tests: Vec<TestResult>,
}

impl ScanResult {
    pub fn ntraits(&self) -> usize {
        self.trait_ids.len()
    }

    pub fn stats(&self) -> Vec<StatsRow> {
        self.tests
            .iter()
            .map(|t| StatsRow {
                test: t.test,
                null_lml: t.lml0,
                alt_lml: t.lml2,
                pvalue: t.pv20,
                dof: t.dof20,
            })
            .collect()
    }

    pub fn hypothesis_stats(&self) -> Vec<HypothesisStatsRow> {
        self.tests
            .iter()
            .map(|t| HypothesisStatsRow {
                test: t.test,
                lml0: t.lml0,
                lml1: t.lml1,
                lml2: t.lml2,
                dof10: t.dof10,
                dof20: t.dof20,
                dof21: t.dof21,
                pv10: t.pv10,
                pv20: t.pv20,
                pv21: t.pv21,
            })
            .collect()
    }

    /// Environment labels for the candidate effect columns.
    fn env_labels(&self, broad: bool) -> Vec<String> {
        if self.ntraits() == 1 {
            return self.trait_ids.clone();
        }
        let mut labels = self.env0_ids.clone();
        if broad {
            labels.extend(self.env1_ids.iter().cloned());
        }
        labels
    }

    fn effsize_rows(&self, broad: bool) -> Vec<EffsizeRow> {
        let envs = self.env_labels(broad);
        let single = (self.ntraits() == 1).then(|| self.trait_ids[0].clone());
        let mut rows = Vec::new();
        for t in &self.tests {
            let h = if broad { &t.broad } else { &t.narrow };
            for (r, (effs, ses)) in h
                .candidate_effsizes
                .iter()
                .zip(&h.candidate_effsizes_se)
                .enumerate()
            {
                let candidate = t
                    .candidates
                    .get(r)
                    .and_then(|&c| self.candidate_ids.get(c))
                    .cloned()
                    .unwrap_or_default();
                for (e, (&effsize, &effsize_se)) in effs.iter().zip(ses).enumerate() {
                    rows.push(EffsizeRow {
                        test: t.test,
                        candidate: candidate.clone(),
                        trait_id: single.clone(),
                        env: envs.get(e).cloned().unwrap_or_else(|| e.to_string()),
                        effsize,
                        effsize_se,
                    });
                }
            }
        }
        rows
    }

    /// Candidate effects under the broad alternative.
    pub fn alt_effsizes(&self) -> Vec<EffsizeRow> {
        self.effsize_rows(true)
    }

    pub fn narrow_effsizes(&self) -> Vec<EffsizeRow> {
        self.effsize_rows(false)
    }

    /// Covariate effects of the null model.
    pub fn covariate_effsizes(&self) -> Vec<CovariateEffsizeRow> {
        let mut rows = Vec::new();
        for (c, (effs, ses)) in self.null.effsizes.iter().zip(&self.null.effsizes_se).enumerate() {
            for (j, (&effsize, &effsize_se)) in effs.iter().zip(ses).enumerate() {
                rows.push(CovariateEffsizeRow {
                    covariate: self.covariate_ids.get(c).cloned().unwrap_or_else(|| c.to_string()),
                    trait_id: self.trait_ids.get(j).cloned().unwrap_or_else(|| j.to_string()),
                    effsize,
                    effsize_se,
                });
            }
        }
        rows
    }

    fn covariance_formula(&self) -> String {
        match &self.null.variances {
            VarianceSummary::Scalar { v0: Some(v0), v1 } => format!("{:.2}*K + {:.2}*I", v0, v1),
            VarianceSummary::Scalar { v0: None, v1 } => format!("{:.2}*I", v1),
            VarianceSummary::Matrix { .. } => "C₀ ⊗ K + C₁ ⊗ I".to_string(),
        }
    }

    fn write_model_lines(&self, f: &mut fmt::Formatter<'_>, alt: bool) -> fmt::Result {
        let cov = self.covariance_formula();
        match (&self.null.variances, self.likelihood.observation_formula()) {
            (VarianceSummary::Matrix { .. }, _) => {
                if alt {
                    writeln!(
                        f,
                        "  vec(𝐘) ~ 𝓝((A ⊗ M) vec(𝐀) + (A₀ ⊗ Gᵢ) vec(𝚩₀) + (A₁ ⊗ Gᵢ) vec(𝚩₁), s⋅({}))",
                        cov
                    )
                } else {
                    writeln!(f, "  vec(𝐘) ~ 𝓝((A ⊗ M) vec(𝐀), {})", cov)
                }
            }
            (_, Some(obs)) => {
                let mean = if alt { "M𝜶 + Gᵢ" } else { "M𝜶" };
                writeln!(f, "  𝐳 ~ 𝓝({}, {})", mean, cov)?;
                writeln!(f, "  {}", obs)
            }
            (_, None) => {
                let mean = if alt { "M𝜶 + Gᵢ𝛃" } else { "M𝜶" };
                if alt {
                    writeln!(f, "  𝐲 ~ 𝓝({}, s({}))", mean, cov)
                } else {
                    writeln!(f, "  𝐲 ~ 𝓝({}, {})", mean, cov)
                }
            }
        }
    }
}

fn format_vector(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{:.8}", x)).collect();
    format!("[{}]", parts.join(" "))
}

fn format_matrix(rows: &[Vec<f64>]) -> String {
    let parts: Vec<String> = rows.iter().map(|r| format_vector(r)).collect();
    format!("[{}]", parts.join(" "))
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Null model")?;
        writeln!(f, "----------")?;
        writeln!(f)?;
        self.write_model_lines(f, false)?;
        let names: Vec<String> = self.covariate_ids.iter().map(|c| format!("'{}'", c)).collect();
        writeln!(f, "  M = [{}]", names.join(" "))?;
        if self.ntraits() == 1 {
            let alpha: Vec<f64> = self.null.effsizes.iter().filter_map(|r| r.first().copied()).collect();
            writeln!(f, "  𝜶 = {}", format_vector(&alpha))?;
        } else {
            writeln!(f, "  𝐀 = {}", format_matrix(&self.null.effsizes))?;
            if let VarianceSummary::Matrix { c0, c1 } = &self.null.variances {
                writeln!(f, "  C₀ = {}", format_matrix(c0))?;
                writeln!(f, "  C₁ = {}", format_matrix(c1))?;
            }
        }
        writeln!(f, "  Log marg. lik.: {}", self.null.lml)?;
        writeln!(f, "  Number of models: 1")?;
        writeln!(f)?;

        writeln!(f, "Alt model")?;
        writeln!(f, "---------")?;
        writeln!(f)?;
        self.write_model_lines(f, true)?;
        let pvalues: Vec<f64> = self.tests.iter().map(|t| t.pv20).collect();
        let lmls: Vec<f64> = self.tests.iter().map(|t| t.lml2).collect();
        let min_pv = pvalues.iter().cloned().fold(f64::NAN, f64::min);
        let max_lml = lmls.iter().cloned().fold(f64::NAN, f64::max);
        writeln!(f, "  Min. p-value: {}", min_pv)?;
        writeln!(f, "  First perc. p-value: {}", percentile(&pvalues, 1.0))?;
        writeln!(f, "  Max. log marg. lik.: {}", max_lml)?;
        writeln!(f, "  99th perc. log marg. lik.: {}", percentile(&lmls, 99.0))?;
        write!(f, "  Number of models: {}", self.tests.len())
    }
}

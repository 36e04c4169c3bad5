//! Association scan entry point.
//!
//! Under H0 `vec(Y) ~ N((A ⊗ M) vec(B), C0 ⊗ K + C1 ⊗ I)`. Each test adds
//! candidates `Gᵢ` through the narrow design `A0` (H1) and through
//! `[A0 | A1]` (H2), with the covariance scale profiled per alternative.
//! Single-trait scans without explicit tests take the batched path, where
//! both hypotheses are the single per-candidate fit.

use qtlscan_linalg::{DenseMatrix, EconomicQs};
use rayon::prelude::*;
use tracing::info;

use crate::dataset::{assert_finite, conform_dataset, LabeledMatrix};
use crate::display::{session_block, session_line};
use crate::error::{Result, ScanError};
use crate::likelihood::{Likelihood, LikelihoodSpec};
use crate::model::{fit_null, FitConfig, ModelFamily};
use crate::result::{normalise_scan_names, HypothesisRecord, ScanResult, ScanResultFactory};

/// One test: a single candidate or a group tested jointly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestSpec {
    Single(usize),
    Group(Vec<usize>),
}

impl TestSpec {
    pub fn to_selection(&self) -> Vec<usize> {
        match self {
            TestSpec::Single(i) => vec![*i],
            TestSpec::Group(g) => g.clone(),
        }
    }
}

impl From<usize> for TestSpec {
    fn from(i: usize) -> Self {
        TestSpec::Single(i)
    }
}

impl From<Vec<usize>> for TestSpec {
    fn from(g: Vec<usize>) -> Self {
        TestSpec::Group(g)
    }
}

impl From<&[usize]> for TestSpec {
    fn from(g: &[usize]) -> Self {
        TestSpec::Group(g.to_vec())
    }
}

/// Inputs of a scan. Unset designs take their defaults when the request
/// is resolved: `A = I`, `A0` with no columns, `A1 = I`.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    candidates: LabeledMatrix,
    traits: LabeledMatrix,
    likelihood: LikelihoodSpec,
    kinship: Option<LabeledMatrix>,
    covariates: Option<LabeledMatrix>,
    tests: Option<Vec<TestSpec>>,
    design: Option<DenseMatrix>,
    narrow_design: Option<DenseMatrix>,
    broad_design: Option<DenseMatrix>,
    verbose: bool,
    fit_config: FitConfig,
}

impl ScanRequest {
    pub fn new(candidates: impl Into<LabeledMatrix>, traits: impl Into<LabeledMatrix>) -> Self {
        Self {
            candidates: candidates.into(),
            traits: traits.into(),
            likelihood: LikelihoodSpec::default(),
            kinship: None,
            covariates: None,
            tests: None,
            design: None,
            narrow_design: None,
            broad_design: None,
            verbose: false,
            fit_config: FitConfig::default(),
        }
    }

    pub fn likelihood(mut self, spec: impl Into<LikelihoodSpec>) -> Self {
        self.likelihood = spec.into();
        self
    }

    pub fn kinship(mut self, k: impl Into<LabeledMatrix>) -> Self {
        self.kinship = Some(k.into());
        self
    }

    pub fn covariates(mut self, m: impl Into<LabeledMatrix>) -> Self {
        self.covariates = Some(m.into());
        self
    }

    pub fn tests<T: Into<TestSpec>>(mut self, tests: impl IntoIterator<Item = T>) -> Self {
        self.tests = Some(tests.into_iter().map(Into::into).collect());
        self
    }

    pub fn design(mut self, a: DenseMatrix) -> Self {
        self.design = Some(a);
        self
    }

    pub fn narrow_design(mut self, a0: DenseMatrix) -> Self {
        self.narrow_design = Some(a0);
        self
    }

    pub fn broad_design(mut self, a1: DenseMatrix) -> Self {
        self.broad_design = Some(a1);
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn fit_config(mut self, config: FitConfig) -> Self {
        self.fit_config = config;
        self
    }
}

struct Designs {
    a: DenseMatrix,
    a0: DenseMatrix,
    a01: DenseMatrix,
    env0_ids: Vec<String>,
    env1_ids: Vec<String>,
}

fn resolve_designs(request: &ScanRequest, ntraits: usize) -> Result<Designs> {
    let a = request
        .design
        .clone()
        .unwrap_or_else(|| DenseMatrix::identity(ntraits));
    let a0 = request
        .narrow_design
        .clone()
        .unwrap_or_else(|| DenseMatrix::zeros(ntraits, 0));
    let a1 = request
        .broad_design
        .clone()
        .unwrap_or_else(|| DenseMatrix::identity(ntraits));
    for (name, d) in [("A", &a), ("A0", &a0), ("A1", &a1)] {
        if d.nrows() != ntraits {
            return Err(ScanError::ShapeMismatch(format!(
                "design {} has {} rows for {} traits",
                name,
                d.nrows(),
                ntraits
            )));
        }
        if !d.is_finite() {
            return Err(ScanError::NonFiniteInput("design"));
        }
    }
    Ok(Designs {
        env0_ids: (0..a0.ncols()).map(|j| format!("env0_{}", j)).collect(),
        env1_ids: (0..a1.ncols()).map(|j| format!("env1_{}", j)).collect(),
        a01: a0.hcat(&a1),
        a,
        a0,
    })
}

fn resolve_tests(tests: &[TestSpec], ncandidates: usize) -> Result<Vec<Vec<usize>>> {
    tests
        .iter()
        .enumerate()
        .map(|(t, spec)| {
            let sel = spec.to_selection();
            if sel.is_empty() {
                return Err(ScanError::EmptyCandidateGroup(t));
            }
            if let Some(&index) = sel.iter().find(|&&i| i >= ncandidates) {
                return Err(ScanError::CandidateIndexOutOfRange { index, ncandidates });
            }
            Ok(sel)
        })
        .collect()
}

/// Run an association scan.
pub fn scan(request: ScanRequest) -> Result<ScanResult> {
    let likelihood = Likelihood::from_spec(&request.likelihood)?;
    let verbose = request.verbose;

    session_block("QTL analysis", verbose, || {
        let data = session_line("Normalising input... ", verbose, || {
            conform_dataset(
                &request.traits,
                request.covariates.as_ref(),
                &request.candidates,
                request.kinship.as_ref(),
            )
        })?;
        let likelihood = likelihood.select_samples(request.traits.nrows(), &data.y_rows)?;
        assert_finite(&data)?;

        let ntraits = data.ntraits();
        let family = ModelFamily::select(&likelihood, ntraits)?;
        if family == ModelFamily::GlmmApprox {
            likelihood.validate_outcome(&data.y.col(0))?;
        }
        let designs = resolve_designs(&request, ntraits)?;
        let tests = request
            .tests
            .as_deref()
            .map(|t| resolve_tests(t, data.g.ncols()))
            .transpose()?;

        let qs = data
            .k
            .as_ref()
            .map(EconomicQs::from_covariance)
            .transpose()?;
        let fitted = session_line("Fitting null model... ", verbose, || {
            fit_null(
                &data.y,
                &designs.a,
                &data.m,
                qs.as_ref(),
                &likelihood,
                &request.fit_config,
            )
        })?;
        let scanner = fitted.scanner.as_ref();

        let mut factory = ScanResultFactory::new(
            likelihood.clone(),
            data.trait_ids.clone(),
            data.covariate_ids.clone(),
            data.candidate_ids.clone(),
            designs.env0_ids.clone(),
            designs.env1_ids.clone(),
            scanner.null_lml(),
            scanner.null_beta(),
            &scanner.null_beta_se(),
            &fitted.variances,
        );

        let single_trait = ntraits == 1;
        session_line("Scanning candidates... ", verbose, || {
            match (&tests, single_trait) {
                (None, true) => {
                    for (i, out) in scanner.scan_all(&data.g)?.into_iter().enumerate() {
                        let h = normalise_scan_names(out);
                        factory.add_test(vec![i], h.clone(), h);
                    }
                }
                _ => {
                    let selections: Vec<Vec<usize>> = match &tests {
                        Some(t) => t.clone(),
                        None => (0..data.g.ncols()).map(|i| vec![i]).collect(),
                    };
                    let records: Vec<_> = selections
                        .into_par_iter()
                        .map(|sel| -> Result<(Vec<usize>, HypothesisRecord, HypothesisRecord)> {
                            let g = data.g.select_columns(&sel);
                            let narrow = normalise_scan_names(scanner.scan_with_design(&designs.a0, &g)?);
                            let broad = if single_trait {
                                narrow.clone()
                            } else {
                                normalise_scan_names(scanner.scan_with_design(&designs.a01, &g)?)
                            };
                            Ok((sel, narrow, broad))
                        })
                        .collect::<Result<_>>()?;
                    for (sel, narrow, broad) in records {
                        factory.add_test(sel, narrow, broad);
                    }
                }
            }
            Ok(())
        })?;

        let result = factory.create();
        if verbose {
            info!("\n{}", result);
        }
        Ok(result)
    })
}

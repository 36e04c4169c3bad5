//! Property-based tests using proptest.
//!
//! These check invariants over randomly simulated cohorts rather than
//! specific numerical values:
//!   - p-value bounds and likelihood-ratio monotonicity
//!   - nesting of the null, narrow and broad hypotheses
//!   - validation order of the scan entry point
//!   - kinship symmetry and positive semi-definiteness

use proptest::prelude::*;
use rand::{Rng, SeedableRng};

use qtlscan_core::qc::{kinship_from_genotypes, normalise_covariance};
use qtlscan_core::result::{lrt_pvalue, VarianceSummary};
use qtlscan_core::{scan, ScanError, ScanRequest, TestSpec};
use qtlscan_linalg::decomposition::symmetric_eigenvalues;
use qtlscan_linalg::DenseMatrix;

fn random_dosages(n: usize, m: usize, rng: &mut impl Rng) -> DenseMatrix {
    DenseMatrix::from_fn(n, m, |_, _| rng.gen_range(0..3) as f64)
}

fn random_traits(n: usize, p: usize, rng: &mut impl Rng) -> DenseMatrix {
    DenseMatrix::from_fn(n, p, |_, _| rng.gen::<f64>() * 2.0 - 1.0)
}

// ---------------------------------------------------------------------------
// 1. LRT p-values lie in [0, 1] and shrink as the alternative improves
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_lrt_pvalue_in_unit_interval(
        lml0 in -1000.0f64..0.0,
        delta in -10.0f64..50.0,
        dof in 0usize..6,
    ) {
        let pv = lrt_pvalue(lml0, lml0 + delta, dof);
        prop_assert!((0.0..=1.0).contains(&pv), "p-value out of range: {}", pv);
        if delta <= 0.0 || dof == 0 {
            prop_assert!((pv - 1.0).abs() < 1e-12, "expected 1, got {}", pv);
        }
    }

    #[test]
    fn prop_lrt_pvalue_monotone(
        lml0 in -100.0f64..0.0,
        d1 in 0.0f64..20.0,
        extra in 0.0f64..20.0,
        dof in 1usize..4,
    ) {
        let p1 = lrt_pvalue(lml0, lml0 + d1, dof);
        let p2 = lrt_pvalue(lml0, lml0 + d1 + extra, dof);
        prop_assert!(p2 <= p1 + 1e-15, "p({}) = {} > p({}) = {}", d1 + extra, p2, d1, p1);
    }
}

// ---------------------------------------------------------------------------
// 2. Single-trait fast path: hypotheses coincide, v1 > 0, alternatives nest
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]

    #[test]
    fn prop_fast_path_hypotheses_coincide(
        n in 15usize..40,
        seed in 0u64..1000,
    ) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let g = random_dosages(n, 3, &mut rng);
        let k = kinship_from_genotypes(&random_dosages(n, 20, &mut rng));
        let y = random_traits(n, 1, &mut rng);

        let result = scan(ScanRequest::new(g, y).kinship(k)).unwrap();
        match result.null.variances {
            VarianceSummary::Scalar { v1, .. } => prop_assert!(v1 > 0.0, "v1 = {}", v1),
            ref other => prop_assert!(false, "unexpected variances {:?}", other),
        }
        for t in &result.tests {
            prop_assert_eq!(&t.narrow, &t.broad);
            prop_assert!((0.0..=1.0).contains(&t.pv20));
            prop_assert!(t.lml2 >= t.lml0 - 1e-6, "alt {} below null {}", t.lml2, t.lml0);
        }
    }
}

// ---------------------------------------------------------------------------
// 3. Test order only permutes the per-test records
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]

    #[test]
    fn prop_test_order_is_preserved(
        n in 12usize..30,
        seed in 0u64..1000,
    ) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let g = random_dosages(n, 4, &mut rng);
        let y = random_traits(n, 1, &mut rng);
        let base = ScanRequest::new(g, y);

        let forward = scan(base.clone().tests(vec![
            TestSpec::Group(vec![0, 1]),
            TestSpec::Single(2),
            TestSpec::Single(3),
        ])).unwrap();
        let backward = scan(base.tests(vec![
            TestSpec::Single(3),
            TestSpec::Single(2),
            TestSpec::Group(vec![0, 1]),
        ])).unwrap();

        for (f, b) in forward.tests.iter().zip(backward.tests.iter().rev()) {
            prop_assert_eq!(&f.candidates, &b.candidates);
            prop_assert!((f.lml2 - b.lml2).abs() < 1e-10);
            prop_assert!((f.pv20 - b.pv20).abs() < 1e-10);
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Multi-trait: broad lml >= narrow lml >= null lml, C1 positive definite
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(5))]

    #[test]
    fn prop_multi_trait_hypotheses_nest(
        n in 20usize..35,
        seed in 0u64..1000,
    ) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let g = random_dosages(n, 2, &mut rng);
        let k = kinship_from_genotypes(&random_dosages(n, 15, &mut rng));
        let y = random_traits(n, 2, &mut rng);

        let result = scan(
            ScanRequest::new(g, y)
                .kinship(k)
                .narrow_design(DenseMatrix::full(2, 1, 1.0)),
        ).unwrap();

        if let VarianceSummary::Matrix { c1, .. } = &result.null.variances {
            let flat: Vec<f64> = c1.iter().flatten().copied().collect();
            let eig = symmetric_eigenvalues(&DenseMatrix::from_row_major(2, 2, &flat)).unwrap();
            prop_assert!(eig.iter().all(|&e| e > 0.0), "C1 eigenvalues {:?}", eig);
        } else {
            prop_assert!(false, "expected matrix variances");
        }
        for t in &result.tests {
            prop_assert!(t.lml1 >= t.lml0 - 1e-6, "narrow {} below null {}", t.lml1, t.lml0);
            prop_assert!(t.lml2 >= t.lml1 - 1e-6, "broad {} below narrow {}", t.lml2, t.lml1);
        }
    }
}

// ---------------------------------------------------------------------------
// 5. Unknown likelihoods fail first, whatever the data looks like
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_invalid_likelihood_fails_before_fitting(
        name in "[a-z]{3,10}",
        n in 2usize..10,
    ) {
        prop_assume!(!["normal", "bernoulli", "probit", "binomial", "poisson"].contains(&name.as_str()));
        // Mismatched rows and NaN traits would fail later checks.
        let y = DenseMatrix::full(n, 1, f64::NAN);
        let g = DenseMatrix::zeros(n + 1, 1);
        let err = scan(ScanRequest::new(g, y).likelihood(name.as_str())).unwrap_err();
        prop_assert!(matches!(err, ScanError::InvalidLikelihood(_)), "{:?}", err);
    }
}

// ---------------------------------------------------------------------------
// 6. Kinship is symmetric PSD and Gower scaling fixes its sample variance
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_kinship_symmetric_psd(
        n in 5usize..20,
        m in 5usize..40,
        seed in 0u64..1000,
    ) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(seed);
        let k = kinship_from_genotypes(&random_dosages(n, m, &mut rng));
        prop_assert!(k.max_abs_diff(&k.transpose()) < 1e-12);
        let eig = symmetric_eigenvalues(&k).unwrap();
        prop_assert!(eig.iter().all(|&e| e > -1e-8), "negative eigenvalue in {:?}", eig);

        let c = k.trace() - k.sum() / n as f64;
        prop_assume!(c > 1e-8);
        let kn = normalise_covariance(&k).unwrap();
        let cn = kn.trace() - kn.sum() / n as f64;
        prop_assert!((cn - (n as f64 - 1.0)).abs() < 1e-8 * n as f64, "Gower constant {}", cn);
    }
}

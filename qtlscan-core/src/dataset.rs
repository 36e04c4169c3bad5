//! Labeled input matrices and their reconciliation into one sample order.
//!
//! When every input carries sample IDs they are intersected in the order
//! of the trait matrix and each matrix is reordered (the covariance on both
//! axes). Unlabeled inputs must already share the row count; mixed inputs
//! are aligned to the labeled order.

use std::collections::HashMap;

use qtlscan_linalg::DenseMatrix;
use tracing::debug;

use crate::error::{Result, ScanError};

/// Name of the implicit intercept covariate.
pub const OFFSET_COVARIATE: &str = "offset";

/// A dense matrix with optional row (sample) and column identifiers.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledMatrix {
    values: DenseMatrix,
    sample_ids: Option<Vec<String>>,
    column_ids: Option<Vec<String>>,
}

impl LabeledMatrix {
    pub fn new(values: DenseMatrix) -> Self {
        Self {
            values,
            sample_ids: None,
            column_ids: None,
        }
    }

    /// One column from a vector.
    pub fn from_column(values: &[f64]) -> Self {
        Self::new(DenseMatrix::from_vec(values))
    }

    pub fn with_sample_ids(mut self, ids: Vec<String>) -> Result<Self> {
        if ids.len() != self.values.nrows() {
            return Err(ScanError::ShapeMismatch(format!(
                "{} sample IDs for a matrix with {} rows",
                ids.len(),
                self.values.nrows()
            )));
        }
        self.sample_ids = Some(ids);
        Ok(self)
    }

    pub fn with_column_ids(mut self, ids: Vec<String>) -> Result<Self> {
        if ids.len() != self.values.ncols() {
            return Err(ScanError::ShapeMismatch(format!(
                "{} column IDs for a matrix with {} columns",
                ids.len(),
                self.values.ncols()
            )));
        }
        self.column_ids = Some(ids);
        Ok(self)
    }

    pub fn values(&self) -> &DenseMatrix {
        &self.values
    }

    pub fn sample_ids(&self) -> Option<&[String]> {
        self.sample_ids.as_deref()
    }

    pub fn column_ids(&self) -> Option<&[String]> {
        self.column_ids.as_deref()
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    /// Column IDs, defaulting to "0", "1", ...
    pub fn column_ids_or_default(&self) -> Vec<String> {
        match &self.column_ids {
            Some(ids) => ids.clone(),
            None => (0..self.ncols()).map(|j| j.to_string()).collect(),
        }
    }
}

impl From<DenseMatrix> for LabeledMatrix {
    fn from(values: DenseMatrix) -> Self {
        LabeledMatrix::new(values)
    }
}

/// Inputs after conforming: one sample order, explicit identifiers.
#[derive(Debug, Clone)]
pub struct ConformedData {
    pub sample_ids: Option<Vec<String>>,
    pub y: DenseMatrix,
    pub trait_ids: Vec<String>,
    pub m: DenseMatrix,
    pub covariate_ids: Vec<String>,
    pub g: DenseMatrix,
    pub candidate_ids: Vec<String>,
    pub k: Option<DenseMatrix>,
    /// Rows of the input trait matrix kept, in order.
    pub y_rows: Vec<usize>,
}

impl ConformedData {
    pub fn nsamples(&self) -> usize {
        self.y.nrows()
    }

    pub fn ntraits(&self) -> usize {
        self.y.ncols()
    }
}

/// Sample IDs shared by all sources, in the order of the first.
#[derive(Debug, Clone)]
pub struct SampleIntersection {
    pub ids: Vec<String>,
    /// Indices into each source for the shared samples.
    pub indices: Vec<Vec<usize>>,
}

pub fn intersect_samples(sources: &[&[String]]) -> SampleIntersection {
    if sources.is_empty() {
        return SampleIntersection {
            ids: Vec::new(),
            indices: Vec::new(),
        };
    }

    let maps: Vec<HashMap<&str, usize>> = sources
        .iter()
        .map(|ids| {
            ids.iter()
                .enumerate()
                .map(|(i, id)| (id.as_str(), i))
                .collect()
        })
        .collect();

    let mut ids = Vec::new();
    let mut indices: Vec<Vec<usize>> = vec![Vec::new(); sources.len()];
    for (primary, id) in sources[0].iter().enumerate() {
        if maps[1..].iter().all(|m| m.contains_key(id.as_str())) {
            ids.push(id.clone());
            indices[0].push(primary);
            for (src, map) in maps[1..].iter().enumerate() {
                indices[src + 1].push(map[id.as_str()]);
            }
        }
    }
    SampleIntersection { ids, indices }
}

/// Reconcile traits, covariates, candidates and covariance.
///
/// Without covariates, an intercept column named `offset` is used.
pub fn conform_dataset(
    y: &LabeledMatrix,
    m: Option<&LabeledMatrix>,
    g: &LabeledMatrix,
    k: Option<&LabeledMatrix>,
) -> Result<ConformedData> {
    if let Some(k) = k {
        if k.nrows() != k.ncols() {
            return Err(ScanError::ShapeMismatch(format!(
                "covariance is {} x {}, not square",
                k.nrows(),
                k.ncols()
            )));
        }
    }

    let inputs: Vec<(&'static str, &LabeledMatrix)> = [
        ("traits", Some(y)),
        ("covariates", m),
        ("candidates", Some(g)),
        ("covariance", k),
    ]
    .into_iter()
    .filter_map(|(name, x)| x.map(|x| (name, x)))
    .collect();
    let labeled: Vec<usize> = (0..inputs.len())
        .filter(|&i| inputs[i].1.sample_ids().is_some())
        .collect();

    let mut rows: Vec<Vec<usize>> = inputs.iter().map(|(_, x)| (0..x.nrows()).collect()).collect();
    let mut sample_ids = None;

    if labeled.len() < inputs.len() {
        if let Some((name, x)) = inputs.iter().find(|(_, x)| x.nrows() != y.nrows()) {
            return Err(ScanError::ShapeMismatch(format!(
                "{} have {} rows but traits have {}",
                name,
                x.nrows(),
                y.nrows()
            )));
        }
    }

    if !labeled.is_empty() {
        let sources: Vec<&[String]> = labeled
            .iter()
            .filter_map(|&i| inputs[i].1.sample_ids())
            .collect();
        let shared = intersect_samples(&sources);
        if shared.ids.is_empty() {
            return Err(ScanError::NoSharedSamples);
        }
        if labeled.len() < inputs.len() && shared.ids.len() != y.nrows() {
            return Err(ScanError::ShapeMismatch(format!(
                "labeled inputs share {} of {} samples; unlabeled inputs cannot be aligned",
                shared.ids.len(),
                y.nrows()
            )));
        }
        for (pos, &i) in labeled.iter().enumerate() {
            rows[i] = shared.indices[pos].clone();
        }
        debug!("Conformed {} samples across {} labeled inputs", shared.ids.len(), labeled.len());
        sample_ids = Some(shared.ids);
    }

    let mut rows = rows.into_iter();
    let y_rows = rows.next().unwrap_or_default();
    let m_rows = if m.is_some() { rows.next() } else { None };
    let g_rows = rows.next().unwrap_or_default();
    let k_rows = if k.is_some() { rows.next() } else { None };

    let n = y_rows.len();
    let (m_values, covariate_ids) = match (m, m_rows) {
        (Some(m), Some(r)) => (m.values().select_rows(&r), m.column_ids_or_default()),
        _ => (DenseMatrix::full(n, 1, 1.0), vec![OFFSET_COVARIATE.to_string()]),
    };
    let k_values = match (k, k_rows) {
        (Some(k), Some(r)) => Some(k.values().select_rows(&r).select_columns(&r)),
        _ => None,
    };

    Ok(ConformedData {
        sample_ids,
        y: y.values().select_rows(&y_rows),
        trait_ids: y.column_ids_or_default(),
        m: m_values,
        covariate_ids,
        g: g.values().select_rows(&g_rows),
        candidate_ids: g.column_ids_or_default(),
        k: k_values,
        y_rows,
    })
}

/// Fail with `NonFiniteInput` when Y, M or K hold NaN or infinities.
pub fn assert_finite(data: &ConformedData) -> Result<()> {
    if !data.y.is_finite() {
        return Err(ScanError::NonFiniteInput("traits"));
    }
    if !data.m.is_finite() {
        return Err(ScanError::NonFiniteInput("covariates"));
    }
    if data.k.as_ref().map_or(false, |k| !k.is_finite()) {
        return Err(ScanError::NonFiniteInput("covariance"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_intersect_two_sources() {
        let src1 = ids(&["A", "B", "C", "D"]);
        let src2 = ids(&["C", "A", "E"]);
        let result = intersect_samples(&[&src1, &src2]);
        assert_eq!(result.ids, vec!["A", "C"]);
        assert_eq!(result.indices[0], vec![0, 2]);
        assert_eq!(result.indices[1], vec![1, 0]);
    }

    #[test]
    fn test_labeled_inputs_are_reordered() {
        let y = LabeledMatrix::from_column(&[1.0, 2.0, 3.0])
            .with_sample_ids(ids(&["a", "b", "c"]))
            .unwrap();
        let g = LabeledMatrix::from_column(&[30.0, 10.0, 20.0, 99.0])
            .with_sample_ids(ids(&["c", "a", "b", "z"]))
            .unwrap()
            .with_column_ids(ids(&["rs1"]))
            .unwrap();
        let k = LabeledMatrix::new(DenseMatrix::from_fn(2, 2, |i, j| (10 * i + j) as f64))
            .with_sample_ids(ids(&["c", "a"]))
            .unwrap();

        let data = conform_dataset(&y, None, &g, Some(&k)).unwrap();
        assert_eq!(data.sample_ids.as_deref(), Some(&ids(&["a", "c"])[..]));
        assert_eq!(data.y.col(0), vec![1.0, 3.0]);
        assert_eq!(data.g.col(0), vec![10.0, 30.0]);
        let kc = data.k.unwrap();
        // K rows/columns were (c, a); now (a, c).
        assert_eq!(kc.get(0, 0), 11.0);
        assert_eq!(kc.get(0, 1), 10.0);
        assert_eq!(kc.get(1, 0), 1.0);
        assert_eq!(data.covariate_ids, vec!["offset"]);
        assert_eq!(data.candidate_ids, vec!["rs1"]);
        assert_eq!(data.trait_ids, vec!["0"]);
        assert_eq!(data.y_rows, vec![0, 2]);
    }

    #[test]
    fn test_unlabeled_row_mismatch() {
        let y = LabeledMatrix::from_column(&[1.0, 2.0, 3.0]);
        let g = LabeledMatrix::from_column(&[1.0, 2.0]);
        let err = conform_dataset(&y, None, &g, None).unwrap_err();
        assert!(matches!(err, ScanError::ShapeMismatch(_)));
    }

    #[test]
    fn test_disjoint_labels() {
        let y = LabeledMatrix::from_column(&[1.0])
            .with_sample_ids(ids(&["a"]))
            .unwrap();
        let g = LabeledMatrix::from_column(&[1.0])
            .with_sample_ids(ids(&["b"]))
            .unwrap();
        let err = conform_dataset(&y, None, &g, None).unwrap_err();
        assert_eq!(err, ScanError::NoSharedSamples);
    }

    #[test]
    fn test_mixed_labels_align_to_labeled_order() {
        let y = LabeledMatrix::from_column(&[1.0, 2.0])
            .with_sample_ids(ids(&["a", "b"]))
            .unwrap();
        let m = LabeledMatrix::from_column(&[5.0, 6.0]);
        let g = LabeledMatrix::from_column(&[20.0, 10.0])
            .with_sample_ids(ids(&["b", "a"]))
            .unwrap();
        let data = conform_dataset(&y, Some(&m), &g, None).unwrap();
        assert_eq!(data.g.col(0), vec![10.0, 20.0]);
        assert_eq!(data.m.col(0), vec![5.0, 6.0]);
        assert_eq!(data.covariate_ids, vec!["0"]);
    }

    #[test]
    fn test_assert_finite_names_the_input() {
        let y = LabeledMatrix::from_column(&[1.0, f64::NAN]);
        let g = LabeledMatrix::from_column(&[1.0, 2.0]);
        let data = conform_dataset(&y, None, &g, None).unwrap();
        assert_eq!(assert_finite(&data), Err(ScanError::NonFiniteInput("traits")));
    }

    #[test]
    fn test_builder_rejects_wrong_id_count() {
        let x = LabeledMatrix::from_column(&[1.0, 2.0]);
        assert!(x.clone().with_sample_ids(ids(&["a"])).is_err());
        assert!(x.with_column_ids(ids(&["a", "b"])).is_err());
    }
}

//! Delimited matrix files: traits, covariates, candidates.
//!
//! Tab- or space-delimited text with a header row. The first column holds
//! sample IDs; every other column is numeric, with `NA`, `.` and empty
//! fields read as missing (NaN).

use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use qtlscan_core::LabeledMatrix;
use qtlscan_linalg::DenseMatrix;
use tracing::debug;

/// A parsed matrix file.
#[derive(Debug, Clone)]
pub struct MatrixFile {
    /// Sample IDs in file order.
    pub sample_ids: Vec<String>,
    /// Names of the numeric columns.
    pub column_names: Vec<String>,
    /// Samples x columns (NaN for missing).
    pub values: DenseMatrix,
}

impl MatrixFile {
    pub fn nsamples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Position of a named column.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.column_names
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| anyhow!("Column '{}' not found in header", name))
    }

    /// Values of one named column.
    pub fn column(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self.values.col(self.column_index(name)?))
    }

    /// Keep the named columns, in the given order.
    pub fn select(&self, names: &[String]) -> Result<MatrixFile> {
        let idx = names
            .iter()
            .map(|n| self.column_index(n))
            .collect::<Result<Vec<_>>>()?;
        Ok(MatrixFile {
            sample_ids: self.sample_ids.clone(),
            column_names: names.to_vec(),
            values: self.values.select_columns(&idx),
        })
    }

    /// Drop the named columns.
    pub fn without(&self, names: &[String]) -> MatrixFile {
        let idx: Vec<usize> = (0..self.column_names.len())
            .filter(|&j| !names.contains(&self.column_names[j]))
            .collect();
        MatrixFile {
            sample_ids: self.sample_ids.clone(),
            column_names: idx.iter().map(|&j| self.column_names[j].clone()).collect(),
            values: self.values.select_columns(&idx),
        }
    }

    /// Sample- and column-labelled matrix for the scan entry point.
    pub fn into_labeled(self) -> Result<LabeledMatrix> {
        Ok(LabeledMatrix::new(self.values)
            .with_sample_ids(self.sample_ids)?
            .with_column_ids(self.column_names)?)
    }
}

pub(crate) fn detect_delimiter(header: &str) -> Option<char> {
    if header.contains('\t') {
        Some('\t')
    } else {
        None
    }
}

pub(crate) fn split_fields(line: &str, delim: Option<char>) -> Vec<&str> {
    match delim {
        Some(d) => line.split(d).map(|s| s.trim()).collect(),
        None => line.split_whitespace().collect(),
    }
}

/// Parse a string value to f64, treating NA/missing as NaN.
pub(crate) fn parse_value(s: &str) -> Result<f64> {
    match s {
        "NA" | "na" | "Na" | "." | "" | "NaN" | "nan" => Ok(f64::NAN),
        _ => s
            .parse()
            .map_err(|_| anyhow!("'{}' is not a number", s)),
    }
}

/// Read a matrix file.
pub fn read_matrix_file(path: &Path) -> Result<MatrixFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read matrix file: {}", path.display()))?;

    let mut lines = contents.lines().filter(|l| !l.trim().is_empty());
    let header_line = lines
        .next()
        .ok_or_else(|| anyhow!("Empty matrix file: {}", path.display()))?;
    let delim = detect_delimiter(header_line);
    let headers = split_fields(header_line.trim_end_matches('\r'), delim);
    if headers.len() < 2 {
        bail!(
            "{}: header needs a sample ID column and at least one value column",
            path.display()
        );
    }
    let column_names: Vec<String> = headers[1..].iter().map(|s| s.to_string()).collect();
    let ncols = column_names.len();

    let mut sample_ids = Vec::new();
    let mut columns: Vec<Vec<f64>> = vec![Vec::new(); ncols];
    for (line_num, line) in lines.enumerate() {
        let fields = split_fields(line.trim_end_matches('\r'), delim);
        if fields.len() != ncols + 1 {
            bail!(
                "{}: line {} has {} fields (expected {})",
                path.display(),
                line_num + 2,
                fields.len(),
                ncols + 1
            );
        }
        sample_ids.push(fields[0].to_string());
        for (col, field) in columns.iter_mut().zip(&fields[1..]) {
            col.push(
                parse_value(field)
                    .with_context(|| format!("{}: line {}", path.display(), line_num + 2))?,
            );
        }
    }

    debug!(
        "Read {} samples x {} columns from {}",
        sample_ids.len(),
        ncols,
        path.display()
    );
    Ok(MatrixFile {
        values: DenseMatrix::from_columns(sample_ids.len(), &columns),
        sample_ids,
        column_names,
    })
}

/// Write a matrix file with `id_header` naming the sample ID column.
pub fn write_matrix_file(
    path: &Path,
    id_header: &str,
    sample_ids: &[String],
    column_names: &[String],
    values: &DenseMatrix,
) -> Result<()> {
    if sample_ids.len() != values.nrows() || column_names.len() != values.ncols() {
        bail!(
            "{} ids and {} names for a {} x {} matrix",
            sample_ids.len(),
            column_names.len(),
            values.nrows(),
            values.ncols()
        );
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut w = std::io::BufWriter::new(file);
    writeln!(w, "{}\t{}", id_header, column_names.join("\t"))?;
    for (i, id) in sample_ids.iter().enumerate() {
        let row: Vec<String> = values.row(i).iter().map(|v| format_value(*v)).collect();
        writeln!(w, "{}\t{}", id, row.join("\t"))?;
    }
    w.flush()?;
    Ok(())
}

pub(crate) fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        format!("{}", v)
    }
}

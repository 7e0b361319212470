//! Module for the in-memory variant-by-sample dataset.
//!
//! Rows are keyed by [`Variant`], columns by sample ID, and the entry matrix holds one
//! [`GenotypeRecord`] per (variant, sample). Datasets are immutable values: every
//! transformation consumes or borrows a dataset and returns a new one.
use crate::genotype::{Call, GenotypeRecord};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Dimension mismatch: {0}")]
    Dimensions(String),
    #[error("Row field '{0}' not found")]
    RowFieldNotFound(String),
    #[error("Column field '{0}' not found")]
    ColFieldNotFound(String),
    #[error("Duplicate sample ID '{0}'")]
    DuplicateSample(String),
}

/// A genomic locus plus its alleles; `alleles[0]` is the reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Variant {
    pub contig: String,
    /// 1-based position
    pub position: u64,
    pub alleles: Vec<String>,
}

impl Variant {
    pub fn new<S: Into<String>>(contig: &str, position: u64, alleles: Vec<S>) -> Self {
        Variant {
            contig: contig.to_string(),
            position,
            alleles: alleles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn reference(&self) -> &str {
        self.alleles.first().map(String::as_str).unwrap_or("")
    }

    pub fn alt_alleles(&self) -> &[String] {
        self.alleles.get(1..).unwrap_or(&[])
    }

    pub fn n_alt_alleles(&self) -> usize {
        self.alleles.len().saturating_sub(1)
    }

    pub fn is_biallelic(&self) -> bool {
        self.n_alt_alleles() == 1
    }

    /// Minimal representation: trims the suffix shared by every allele, then the
    /// shared prefix (shifting the position), never shortening an allele below one base.
    pub fn min_rep(&self) -> Variant {
        let chars: Vec<Vec<char>> = self.alleles.iter().map(|a| a.chars().collect()).collect();
        let mut alleles: Vec<&[char]> = chars.iter().map(Vec::as_slice).collect();
        let mut position = self.position;

        while alleles.iter().all(|a| a.len() > 1) {
            let last = alleles[0][alleles[0].len() - 1];
            if !alleles.iter().all(|a| a[a.len() - 1] == last) {
                break;
            }
            for a in alleles.iter_mut() {
                *a = &a[..a.len() - 1];
            }
        }
        while alleles.iter().all(|a| a.len() > 1) {
            let first = alleles[0][0];
            if !alleles.iter().all(|a| a[0] == first) {
                break;
            }
            for a in alleles.iter_mut() {
                *a = &a[1..];
            }
            position += 1;
        }

        let alleles: Vec<String> = alleles.iter().map(|a| a.iter().collect()).collect();
        Variant::new(&self.contig, position, alleles)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.contig,
            self.position,
            self.reference(),
            self.alt_alleles().join(",")
        )
    }
}

/// Value of a row annotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    FloatArray(Vec<f64>),
    Str(String),
    Struct(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Follows a dotted path (`linreg.beta`) through nested structs.
    pub fn get_path(&self, path: &str) -> Option<&FieldValue> {
        path.split('.').try_fold(self, |value, name| match value {
            FieldValue::Struct(fields) => fields.get(name),
            _ => None,
        })
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Missing => write!(f, "NA"),
            FieldValue::Bool(v) => write!(f, "{}", v),
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::FloatArray(v) => {
                let parts: Vec<String> = v.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(","))
            }
            FieldValue::Str(v) => write!(f, "{}", v),
            FieldValue::Struct(fields) => {
                let parts: Vec<String> = fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                write!(f, "{{{}}}", parts.join(","))
            }
        }
    }
}

/// Row key plus its annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub variant: Variant,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Row {
    pub fn new(variant: Variant) -> Self {
        Row {
            variant,
            fields: BTreeMap::new(),
        }
    }

    /// Looks up a possibly dotted field path.
    pub fn field(&self, path: &str) -> Option<&FieldValue> {
        let (head, rest) = match path.split_once('.') {
            Some((h, r)) => (h, Some(r)),
            None => (path, None),
        };
        let value = self.fields.get(head)?;
        match rest {
            Some(rest) => value.get_path(rest),
            None => Some(value),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    rows: Vec<Row>,
    samples: Vec<String>,
    col_fields: BTreeMap<String, Vec<Option<f64>>>,
    entries: Array2<GenotypeRecord>,
}

impl Dataset {
    /// Builds a dataset from row keys, sample IDs and an `n_variants x n_samples`
    /// entry matrix.
    pub fn new(
        variants: Vec<Variant>,
        samples: Vec<String>,
        entries: Array2<GenotypeRecord>,
    ) -> Result<Self, DatasetError> {
        let rows = variants.into_iter().map(Row::new).collect();
        Self::from_parts(rows, samples, BTreeMap::new(), entries)
    }

    /// Builds a dataset of GT-only records from alternate allele counts
    /// (`n_variants x n_samples`); negative counts are missing calls.
    pub fn from_alt_counts(
        variants: Vec<Variant>,
        samples: Vec<String>,
        counts: &Array2<i8>,
    ) -> Result<Self, DatasetError> {
        let entries = counts.mapv(|c| match c {
            0 => GenotypeRecord::with_call(Call::new(0, 0)),
            1 => GenotypeRecord::with_call(Call::new(0, 1)),
            2 => GenotypeRecord::with_call(Call::new(1, 1)),
            _ => GenotypeRecord::default(),
        });
        Self::new(variants, samples, entries)
    }

    pub(crate) fn from_parts(
        rows: Vec<Row>,
        samples: Vec<String>,
        col_fields: BTreeMap<String, Vec<Option<f64>>>,
        entries: Array2<GenotypeRecord>,
    ) -> Result<Self, DatasetError> {
        if entries.dim() != (rows.len(), samples.len()) {
            return Err(DatasetError::Dimensions(format!(
                "entry matrix is {:?} but dataset has {} rows and {} samples",
                entries.dim(),
                rows.len(),
                samples.len()
            )));
        }
        let mut seen = HashSet::with_capacity(samples.len());
        for s in &samples {
            if !seen.insert(s.as_str()) {
                return Err(DatasetError::DuplicateSample(s.clone()));
            }
        }
        for (name, values) in &col_fields {
            if values.len() != samples.len() {
                return Err(DatasetError::Dimensions(format!(
                    "column field '{}' has {} values for {} samples",
                    name,
                    values.len(),
                    samples.len()
                )));
            }
        }
        Ok(Dataset {
            rows,
            samples,
            col_fields,
            entries,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.samples.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn entries(&self) -> &Array2<GenotypeRecord> {
        &self.entries
    }

    pub fn entry(&self, row: usize, col: usize) -> &GenotypeRecord {
        &self.entries[[row, col]]
    }

    pub fn col_fields(&self) -> &BTreeMap<String, Vec<Option<f64>>> {
        &self.col_fields
    }

    pub fn col_field(&self, name: &str) -> Result<&[Option<f64>], DatasetError> {
        self.col_fields
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| DatasetError::ColFieldNotFound(name.to_string()))
    }

    /// Adds (or replaces) a numeric column field.
    pub fn annotate_cols(mut self, name: &str, values: Vec<Option<f64>>) -> Result<Self, DatasetError> {
        if values.len() != self.n_cols() {
            return Err(DatasetError::Dimensions(format!(
                "column field '{}' has {} values for {} samples",
                name,
                values.len(),
                self.n_cols()
            )));
        }
        self.col_fields.insert(name.to_string(), values);
        Ok(self)
    }

    /// Adds (or replaces) a row field, one value per row.
    pub fn annotate_rows(mut self, name: &str, values: Vec<FieldValue>) -> Result<Self, DatasetError> {
        if values.len() != self.n_rows() {
            return Err(DatasetError::Dimensions(format!(
                "row field '{}' has {} values for {} rows",
                name,
                values.len(),
                self.n_rows()
            )));
        }
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.fields.insert(name.to_string(), value);
        }
        Ok(self)
    }

    /// Returns a dataset holding the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
            samples: self.samples.clone(),
            col_fields: self.col_fields.clone(),
            entries: self.entries.select(Axis(0), indices),
        }
    }

    pub fn filter_rows<F>(&self, keep: F) -> Dataset
    where
        F: Fn(usize, &Row) -> bool,
    {
        let indices: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(i, row)| keep(*i, row))
            .map(|(i, _)| i)
            .collect();
        self.select_rows(&indices)
    }

    /// Pins the dataset for repeated use; released when the handle is dropped.
    pub fn persist(self, label: &str) -> Persisted {
        log::debug!(
            "Persisting dataset '{}' ({} rows x {} samples)",
            label,
            self.n_rows(),
            self.n_cols()
        );
        Persisted {
            label: label.to_string(),
            dataset: self,
        }
    }
}

/// Scoped cache handle for an intermediate dataset.
///
/// Release happens in `Drop`, so it runs on every exit path of the owning call.
#[derive(Debug)]
pub struct Persisted {
    label: String,
    dataset: Dataset,
}

impl Deref for Persisted {
    type Target = Dataset;

    fn deref(&self) -> &Dataset {
        &self.dataset
    }
}

impl Drop for Persisted {
    fn drop(&mut self) {
        log::debug!(
            "Unpersisting dataset '{}' ({} rows)",
            self.label,
            self.dataset.n_rows()
        );
    }
}

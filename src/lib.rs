//! # STATGEN-RUST Crate
//!
//! This library contains the statistical genetics methods of the `statgen-rust` package:
//! genetic relatedness (GRM), principal component analysis, linear regression association
//! tests, LD matrices, multiallelic splitting and row sampling over a variant-by-sample
//! genotype dataset.
//! The binaries `compute-grm`, `run-pca`, `run-linreg`, `ld-matrix` and `split-multi`
//! call functions from this library.

// Re-export key modules
pub mod genotype;
pub mod dataset;
pub mod expr;
pub mod matrix;
pub mod normalize;
pub mod grm;
pub mod pca;
pub mod association;
pub mod ld;
pub mod split_multi;
pub mod sampling;
pub mod io;

use dataset::{Dataset, DatasetError};
use expr::Indices;
use thiserror::Error;

pub use association::{linreg, LinregOptions};
pub use grm::{grm, KinshipMatrix};
pub use ld::{ld_matrix, LdMatrix, LdOptions};
pub use pca::{hwe_normalized_pca, pca, PcaOptions, PcaResult};
pub use sampling::sample_rows;
pub use split_multi::{split_multi_hts, SplitMultiOptions};

/// Errors raised by the analysis methods.
///
/// Preconditions and indexing errors are raised before any matrix is built.
/// Nothing is retried; every variant is terminal for the call that produced it.
#[derive(Error, Debug)]
pub enum MethodError {
    #[error("{method}: {message}")]
    Precondition { method: String, message: String },
    #[error("{context}: expected {expected}-indexed expression, found {found}-indexed expression")]
    Indexing {
        context: String,
        expected: Indices,
        found: Indices,
    },
    #[error("{0}")]
    EmptyAfterFilter(String),
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
    #[error("Linear algebra error: {0}")]
    LinAlg(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

impl MethodError {
    pub(crate) fn precondition(method: &str, message: impl Into<String>) -> Self {
        MethodError::Precondition {
            method: method.to_string(),
            message: message.into(),
        }
    }
}

/// Fails unless every row of `dataset` has exactly one alternate allele.
pub fn require_biallelic(dataset: &Dataset, method: &str) -> Result<(), MethodError> {
    if let Some(row) = dataset.rows().iter().find(|r| !r.variant.is_biallelic()) {
        return Err(MethodError::precondition(
            method,
            format!(
                "requires biallelic variants, found variant {} with {} alternate alleles; run split_multi_hts first",
                row.variant,
                row.variant.n_alt_alleles()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variant;
    use crate::genotype::GenotypeRecord;
    use ndarray::Array2;

    #[test]
    fn require_biallelic_names_the_method_and_variant() {
        let variants = vec![
            Variant::new("1", 10, vec!["A", "C"]),
            Variant::new("1", 20, vec!["A", "C", "T"]),
        ];
        let entries = Array2::from_elem((2, 1), GenotypeRecord::default());
        let ds = Dataset::new(variants, vec!["s1".into()], entries).unwrap();

        let err = require_biallelic(&ds, "grm").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("grm:"), "{msg}");
        assert!(msg.contains("1:20:A:C,T"), "{msg}");
    }
}

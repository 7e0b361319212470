//! Linkage disequilibrium (correlation) matrix between variants.
use crate::dataset::{Dataset, Variant};
use crate::matrix::{BlockMatrix, DEFAULT_BLOCK_SIZE};
use crate::{require_biallelic, MethodError};
use ndarray::{Array2, Axis};
use rayon::prelude::*;

/// Genotype matrices with more entries than this are multiplied block-wise
/// unless `force_local` is set.
const LOCAL_ENTRY_LIMIT: usize = 5000 * 5000;

#[derive(Debug, Clone, Default)]
pub struct LdOptions {
    /// Always multiply the standardized genotype matrix locally.
    pub force_local: bool,
}

/// Matrix of Pearson `r` between pairs of variants.
#[derive(Debug, Clone)]
pub struct LdMatrix {
    pub matrix: Array2<f64>,
    /// Variants of the matrix rows/columns; zero-variance variants are absent.
    pub variants: Vec<Variant>,
    pub n_samples: usize,
}

/// Mean-imputed genotype vector scaled to zero mean and unit norm, or `None` when
/// the variant has no called samples or zero variance.
fn standardized_row(calls: impl Iterator<Item = Option<u32>> + Clone) -> Option<Vec<f64>> {
    let (sum, n_called) = calls
        .clone()
        .flatten()
        .fold((0.0, 0usize), |(s, c), x| (s + x as f64, c + 1));
    if n_called == 0 {
        return None;
    }
    let mean = sum / n_called as f64;
    let centered: Vec<f64> = calls.map(|c| c.map_or(0.0, |x| x as f64 - mean)).collect();
    let norm = centered.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm == 0.0 {
        return None;
    }
    Some(centered.into_iter().map(|x| x / norm).collect())
}

/// Computes the LD matrix for the variants of a biallelic dataset.
///
/// Entry `(i, j)` is Pearson's correlation between the (mean-imputed) genotype
/// vectors of variants `i` and `j`. Variants with zero variance are dropped.
pub fn ld_matrix(dataset: &Dataset, options: &LdOptions) -> Result<LdMatrix, MethodError> {
    compute_ld(dataset, options, LOCAL_ENTRY_LIMIT, DEFAULT_BLOCK_SIZE)
}

fn compute_ld(
    dataset: &Dataset,
    options: &LdOptions,
    local_entry_limit: usize,
    block_size: usize,
) -> Result<LdMatrix, MethodError> {
    require_biallelic(dataset, "ld_matrix")?;
    let n_samples = dataset.n_cols();

    let standardized: Vec<Option<Vec<f64>>> = dataset
        .entries()
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| standardized_row(row.iter().map(|g| g.n_alt())))
        .collect();

    let mut variants = Vec::new();
    let mut values = Vec::new();
    for (row, vector) in dataset.rows().iter().zip(standardized) {
        if let Some(v) = vector {
            variants.push(row.variant.clone());
            values.extend(v);
        }
    }
    let n_variants = variants.len();
    let dropped = dataset.n_rows() - n_variants;
    if dropped > 0 {
        log::info!("Dropped {} zero-variance variants from the LD matrix", dropped);
    }
    if n_variants == 0 {
        log::warn!("No variants with non-zero variance; LD matrix is empty");
    }

    let normalized = Array2::from_shape_vec((n_variants, n_samples), values)
        .map_err(|e| MethodError::LinAlg(e.to_string()))?;

    let matrix = if options.force_local || n_variants * n_samples <= local_entry_limit {
        log::debug!("Computing {} x {} LD matrix locally", n_variants, n_variants);
        normalized.dot(&normalized.t())
    } else {
        log::debug!("Computing {} x {} LD matrix block-wise", n_variants, n_variants);
        let bm = BlockMatrix::from_array(&normalized, block_size);
        bm.dot(&bm.t())?.to_local()
    };

    Ok(LdMatrix {
        matrix,
        variants,
        n_samples,
    })
}

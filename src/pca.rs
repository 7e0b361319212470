//! Principal component analysis over a numeric entry expression.
//!
//! For the samples x variants matrix `M = U S V^T`, the scores of the first `k`
//! components are `U_k S_k` (the projection of each sample) and the loadings are
//! `V_k`. Eigenvalues are the squared singular values, i.e. the eigenvalues of
//! `M M^T`.
use crate::dataset::Dataset;
use crate::expr::EntryExpr;
use crate::matrix::{BlockMatrix, DEFAULT_BLOCK_SIZE};
use crate::normalize::hwe_normalize;
use crate::{require_biallelic, MethodError};
use ndarray::{s, Array1, Array2, ArrayView1, Axis};
use ndarray_linalg::{JobSvd, SVDDC};

#[derive(Debug, Clone)]
pub struct PcaOptions {
    /// Number of principal components
    pub k: usize,
    pub compute_loadings: bool,
    /// Store components as one array field instead of `PC1..PCk`
    pub as_array: bool,
    pub block_size: usize,
}

impl Default for PcaOptions {
    fn default() -> Self {
        PcaOptions {
            k: 10,
            compute_loadings: false,
            as_array: false,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

/// Keyed table of component values: one row per key, `k` components per row.
#[derive(Debug, Clone)]
pub struct PcTable {
    /// Name of the key field (`s` for samples, `v` for variants)
    pub key_field: String,
    pub keys: Vec<String>,
    pub values: Array2<f64>,
    pub as_array: bool,
    /// Field name used when `as_array` is set (`pcaScores` / `pcaLoadings`)
    pub array_field: String,
}

impl PcTable {
    pub fn k(&self) -> usize {
        self.values.ncols()
    }

    /// Value field names in output order.
    pub fn field_names(&self) -> Vec<String> {
        if self.as_array {
            vec![self.array_field.clone()]
        } else {
            (1..=self.k()).map(|i| format!("PC{}", i)).collect()
        }
    }

    pub fn row(&self, key: &str) -> Option<ArrayView1<'_, f64>> {
        let idx = self.keys.iter().position(|k| k == key)?;
        Some(self.values.row(idx))
    }
}

#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Non-increasing
    pub eigenvalues: Vec<f64>,
    pub scores: PcTable,
    pub loadings: Option<PcTable>,
}

/// Runs PCA on the Hardy-Weinberg normalized call matrix. Variants that are all
/// homozygous reference or all homozygous alternate are removed first.
pub fn hwe_normalized_pca(dataset: &Dataset, options: &PcaOptions) -> Result<PcaResult, MethodError> {
    require_biallelic(dataset, "PCA")?;

    let normalized = hwe_normalize(dataset, "PCA")?;
    log::info!("Running PCA using {} variants.", normalized.n_variants);

    pca(&normalized.dataset, &normalized.entry_expr, options)
}

/// Runs PCA using `entry_expr` as the numeric matrix entry. The expression must be
/// defined at every entry.
pub fn pca(dataset: &Dataset, entry_expr: &EntryExpr, options: &PcaOptions) -> Result<PcaResult, MethodError> {
    let (n_samples, n_variants) = (dataset.n_cols(), dataset.n_rows());
    let k = options.k;
    if k > n_samples.min(n_variants) {
        return Err(MethodError::precondition(
            "PCA",
            format!(
                "k = {} exceeds the rank bound min(n_samples = {}, n_variants = {})",
                k, n_samples, n_variants
            ),
        ));
    }

    let sample_keys = dataset.samples().to_vec();
    let variant_keys: Vec<String> = dataset.rows().iter().map(|r| r.variant.to_string()).collect();

    let table = |key_field: &str, keys: Vec<String>, values: Array2<f64>, array_field: &str| PcTable {
        key_field: key_field.to_string(),
        keys,
        values,
        as_array: options.as_array,
        array_field: array_field.to_string(),
    };

    if k == 0 {
        return Ok(PcaResult {
            eigenvalues: Vec::new(),
            scores: table("s", sample_keys, Array2::zeros((n_samples, 0)), "pcaScores"),
            loadings: options
                .compute_loadings
                .then(|| table("v", variant_keys, Array2::zeros((n_variants, 0)), "pcaLoadings")),
        });
    }

    // samples x variants
    let m = BlockMatrix::from_entry_expr(dataset, entry_expr, options.block_size)?
        .t()
        .to_local();
    log::debug!("Computing SVD of {} x {} matrix for k = {}", n_samples, n_variants, k);

    // thin factors: U is n_samples x r and V^T is r x n_variants, r = min(n_samples, n_variants)
    let (u, sigma, vt) = m
        .svddc(JobSvd::Some)
        .map_err(|e| MethodError::LinAlg(e.to_string()))?;
    let u = u.ok_or_else(|| MethodError::LinAlg("SVD returned no left singular vectors".into()))?;

    let sigma_k: Array1<f64> = sigma.slice(s![..k]).to_owned();
    let scores = &u.slice(s![.., ..k]) * &sigma_k.view().insert_axis(Axis(0));
    let eigenvalues: Vec<f64> = sigma_k.iter().map(|s| s * s).collect();

    let loadings = if options.compute_loadings {
        let vt = vt.ok_or_else(|| MethodError::LinAlg("SVD returned no right singular vectors".into()))?;
        Some(table(
            "v",
            variant_keys,
            vt.slice(s![..k, ..]).t().to_owned(),
            "pcaLoadings",
        ))
    } else {
        None
    };

    log::info!("PCA eigenvalues: {:?}", eigenvalues);
    Ok(PcaResult {
        eigenvalues,
        scores: table("s", sample_keys, scores, "pcaScores"),
        loadings,
    })
}

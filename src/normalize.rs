//! Hardy-Weinberg genotype normalization shared by the GRM and PCA pipelines.
use crate::dataset::{Dataset, FieldValue, Persisted};
use crate::expr::{EntryExpr, HweNormalization};
use crate::MethodError;
use ndarray::Axis;
use rayon::prelude::*;
use std::sync::Arc;

/// Result of normalizing a dataset: the retained (polymorphic) variants and the
/// entry expression standardizing their genotypes.
#[derive(Debug)]
pub struct HweNormalized {
    /// Retained rows, annotated with `AC` and `n_called`; released when dropped.
    pub dataset: Persisted,
    pub entry_expr: EntryExpr,
    pub n_variants: usize,
}

/// Per-variant alternate allele count and number of called samples.
pub fn allele_counts(dataset: &Dataset) -> Vec<(u64, u64)> {
    dataset
        .entries()
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            row.iter()
                .filter_map(|g| g.n_alt())
                .fold((0u64, 0u64), |(ac, n), alt| (ac + alt as u64, n + 1))
        })
        .collect()
}

/// Drops monomorphic variants and builds the normalized entry expression
///
/// ```text
/// (n_alt - mean_gt) / sqrt(mean_gt * (2 - mean_gt) * n_variants / 2)
/// ```
///
/// with `mean_gt = AC / n_called`, and 0 for missing calls (mean imputation).
/// `method` names the calling operation in the error raised when no variant
/// survives the filter.
pub fn hwe_normalize(dataset: &Dataset, method: &str) -> Result<HweNormalized, MethodError> {
    let counts = allele_counts(dataset);

    let keep: Vec<usize> = counts
        .iter()
        .enumerate()
        .filter(|(_, &(ac, n_called))| ac > 0 && ac < 2 * n_called)
        .map(|(i, _)| i)
        .collect();

    log::debug!(
        "{}: {} of {} variants are polymorphic",
        method,
        keep.len(),
        dataset.n_rows()
    );

    if keep.is_empty() {
        return Err(MethodError::EmptyAfterFilter(format!(
            "Cannot run {}: found 0 variants after filtering out monomorphic sites.",
            method
        )));
    }

    let n_variants = keep.len();
    let kept_counts: Vec<(u64, u64)> = keep.iter().map(|&i| counts[i]).collect();

    let filtered = dataset
        .select_rows(&keep)
        .annotate_rows(
            "AC",
            kept_counts.iter().map(|&(ac, _)| FieldValue::Int(ac as i64)).collect(),
        )?
        .annotate_rows(
            "n_called",
            kept_counts.iter().map(|&(_, n)| FieldValue::Int(n as i64)).collect(),
        )?;

    let mean_gt: Vec<f64> = kept_counts
        .iter()
        .map(|&(ac, n_called)| ac as f64 / n_called as f64)
        .collect();
    let scale: Vec<f64> = mean_gt
        .iter()
        .map(|&m| (m * (2.0 - m) * n_variants as f64 / 2.0).sqrt())
        .collect();

    Ok(HweNormalized {
        dataset: filtered.persist(method),
        entry_expr: EntryExpr::HweNormalized(Arc::new(HweNormalization { mean_gt, scale })),
        n_variants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variant;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn dataset(counts: ndarray::Array2<i8>) -> Dataset {
        let variants = (0..counts.nrows())
            .map(|i| Variant::new("1", i as u64 + 1, vec!["A", "C"]))
            .collect();
        let samples = (0..counts.ncols()).map(|j| format!("s{}", j)).collect();
        Dataset::from_alt_counts(variants, samples, &counts).unwrap()
    }

    #[test]
    fn monomorphic_and_uncalled_variants_are_dropped() {
        let ds = dataset(array![
            [0, 0, 0, 0],   // all hom-ref
            [2, 2, -1, 2],  // all hom-alt among called
            [-1, -1, -1, -1],
            [0, 1, 2, -1],
        ]);
        let norm = hwe_normalize(&ds, "GRM").unwrap();
        assert_eq!(norm.n_variants, 1);
        assert_eq!(norm.dataset.rows()[0].variant.position, 4);
        assert_eq!(norm.dataset.rows()[0].fields["AC"], FieldValue::Int(3));
        assert_eq!(norm.dataset.rows()[0].fields["n_called"], FieldValue::Int(3));
    }

    #[test]
    fn empty_after_filter_names_the_operation() {
        let ds = dataset(array![[0, 0], [2, 2]]);
        let err = hwe_normalize(&ds, "PCA").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot run PCA: found 0 variants after filtering out monomorphic sites."
        );
    }

    #[test]
    fn normalized_entries_are_centered_and_finite() {
        let ds = dataset(array![[0, 1, 2, -1], [1, 1, 0, 0]]);
        let norm = hwe_normalize(&ds, "GRM").unwrap();
        let n = norm.n_variants as f64;

        // variant 0: AC = 3, n_called = 3, mean 1.0
        let scale0 = (1.0f64 * 1.0 * n / 2.0).sqrt();
        let entries = norm.dataset.entries();
        assert_relative_eq!(norm.entry_expr.eval(0, &entries[[0, 0]]).unwrap(), -1.0 / scale0);
        assert_relative_eq!(norm.entry_expr.eval(0, &entries[[0, 2]]).unwrap(), 1.0 / scale0);
        assert_eq!(norm.entry_expr.eval(0, &entries[[0, 3]]), Some(0.0));

        for i in 0..norm.dataset.n_rows() {
            let sum: f64 = (0..norm.dataset.n_cols())
                .map(|j| norm.entry_expr.eval(i, &entries[[i, j]]).unwrap())
                .inspect(|v| assert!(v.is_finite()))
                .sum();
            assert_relative_eq!(sum, 0.0, epsilon = 1e-12);
        }
    }
}

//! Module for calculating the Genetic Relatedness Matrix (GRM)
use crate::dataset::Dataset;
use crate::io::IoError;
use crate::matrix::{BlockMatrix, DEFAULT_BLOCK_SIZE};
use crate::normalize::hwe_normalize;
use crate::{require_biallelic, MethodError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// GRM along with the sample IDs of its rows/columns and the number of variants used.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct KinshipMatrix {
    /// The genetic relatedness matrix
    pub matrix: Array2<f64>,
    /// Sample IDs in the order corresponding to GRM rows/columns
    pub sample_ids: Vec<String>,
    /// Number of variants remaining after the monomorphic filter
    pub n_variants: usize,
}

impl KinshipMatrix {
    /// Loads a pre-computed GRM from a binary file
    pub fn load(grm_file: &Path) -> Result<Self, IoError> {
        log::info!("Loading pre-computed GRM from {:?}", grm_file);

        let file = File::open(grm_file)?;
        let reader = BufReader::new(file);
        let km: KinshipMatrix = bincode::deserialize_from(reader)?;

        log::info!(
            "GRM loaded: {} x {} matrix with {} sample IDs from {} variants",
            km.matrix.nrows(),
            km.matrix.ncols(),
            km.sample_ids.len(),
            km.n_variants
        );

        Ok(km)
    }

    /// Saves GRM, sample IDs and variant count to a binary file
    pub fn save(&self, grm_file: &Path) -> Result<(), IoError> {
        log::info!("Saving GRM to {:?}", grm_file);

        let file = File::create(grm_file)?;
        let writer = std::io::BufWriter::new(file);
        bincode::serialize_into(writer, self)?;

        log::info!("GRM saved successfully");

        Ok(())
    }

    /// Subsets and reorders the GRM to match a specific list of sample IDs
    pub fn subset(&self, target_sample_ids: &[String]) -> Result<KinshipMatrix, MethodError> {
        log::info!(
            "Subsetting GRM from {} to {} samples",
            self.sample_ids.len(),
            target_sample_ids.len()
        );

        // Create a mapping from sample ID to index in the original GRM
        let sample_to_idx: std::collections::HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();

        let mut indices = Vec::with_capacity(target_sample_ids.len());
        for target_id in target_sample_ids {
            match sample_to_idx.get(target_id.as_str()) {
                Some(&idx) => indices.push(idx),
                None => {
                    return Err(MethodError::precondition(
                        "GRM subset",
                        format!(
                            "Sample '{}' not found in GRM. GRM contains {} samples.",
                            target_id,
                            self.sample_ids.len()
                        ),
                    ));
                }
            }
        }

        let n = indices.len();
        let matrix = Array2::from_shape_fn((n, n), |(i, j)| self.matrix[[indices[i], indices[j]]]);

        Ok(KinshipMatrix {
            matrix,
            sample_ids: target_sample_ids.to_vec(),
            n_variants: self.n_variants,
        })
    }
}

/// Computes the GRM with the default block size.
pub fn grm(dataset: &Dataset) -> Result<KinshipMatrix, MethodError> {
    grm_with_block_size(dataset, DEFAULT_BLOCK_SIZE)
}

/// Calculates the GRM `G = M M^T` where `M` (samples x variants) holds the
/// Hardy-Weinberg normalized genotypes, so that
///
/// ```text
/// G[i,k] = 1/m * sum_j (C[i,j] - 2p_j)(C[k,j] - 2p_j) / (2 p_j (1 - p_j))
/// ```
///
/// Monomorphic variants are removed first; missing genotypes contribute 0.
pub fn grm_with_block_size(dataset: &Dataset, block_size: usize) -> Result<KinshipMatrix, MethodError> {
    require_biallelic(dataset, "GRM")?;

    let normalized = hwe_normalize(dataset, "GRM")?;
    let n_variants = normalized.n_variants;
    log::info!("Computing GRM using {} variants.", n_variants);

    // rows = variants, columns = samples
    let bm = BlockMatrix::from_entry_expr(&normalized.dataset, &normalized.entry_expr, block_size)?;
    let sample_ids = normalized.dataset.samples().to_vec();
    drop(normalized);

    log::info!("Computing GRM ({} x {})...", sample_ids.len(), sample_ids.len());
    let matrix = bm.t().dot(&bm)?.to_local();

    log::info!("GRM computed with shape {:?}", matrix.dim());
    Ok(KinshipMatrix {
        matrix,
        sample_ids,
        n_variants,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variant;
    use approx::assert_relative_eq;
    use ndarray::array;
    use rand::{Rng, SeedableRng};

    fn dataset(counts: &Array2<i8>) -> Dataset {
        let variants = (0..counts.nrows())
            .map(|i| Variant::new("1", i as u64 + 1, vec!["A", "G"]))
            .collect();
        let samples = (0..counts.ncols()).map(|j| format!("s{}", j)).collect();
        Dataset::from_alt_counts(variants, samples, counts).unwrap()
    }

    /// Direct evaluation of the GRM formula over non-missing entries.
    fn reference_grm(counts: &Array2<i8>) -> Array2<f64> {
        let n = counts.ncols();
        let mut kept = Vec::new();
        for row in counts.rows() {
            let called: Vec<f64> = row.iter().filter(|&&c| c >= 0).map(|&c| c as f64).collect();
            let ac: f64 = called.iter().sum();
            if ac > 0.0 && ac < 2.0 * called.len() as f64 {
                kept.push((row.to_owned(), ac / (2.0 * called.len() as f64)));
            }
        }
        let m = kept.len() as f64;
        Array2::from_shape_fn((n, n), |(i, k)| {
            kept.iter()
                .filter(|(row, _)| row[i] >= 0 && row[k] >= 0)
                .map(|(row, p)| {
                    (row[i] as f64 - 2.0 * p) * (row[k] as f64 - 2.0 * p) / (2.0 * p * (1.0 - p))
                })
                .sum::<f64>()
                / m
        })
    }

    #[test]
    fn matches_direct_formula_and_is_symmetric() {
        let counts = array![
            [0, 1, 2, 1, 0],
            [1, 1, 0, -1, 2],
            [0, 0, 0, 0, 0],
            [2, 1, 1, 0, 0],
            [0, 0, 1, 0, -1],
        ];
        let ds = dataset(&counts);
        let expected = reference_grm(&counts);

        for bs in [2, DEFAULT_BLOCK_SIZE] {
            let km = grm_with_block_size(&ds, bs).unwrap();
            assert_eq!(km.n_variants, 4);
            assert_eq!(km.sample_ids, vec!["s0", "s1", "s2", "s3", "s4"]);
            for i in 0..5 {
                for k in 0..5 {
                    assert_relative_eq!(km.matrix[[i, k]], expected[[i, k]], epsilon = 1e-10);
                    assert_relative_eq!(km.matrix[[i, k]], km.matrix[[k, i]], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn diagonal_is_near_one_under_hwe() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let (n_variants, n_samples) = (2000, 30);
        let mut counts = Array2::<i8>::zeros((n_variants, n_samples));
        for mut row in counts.rows_mut() {
            let p: f64 = rng.gen_range(0.1..0.9);
            for c in row.iter_mut() {
                *c = (rng.gen::<f64>() < p) as i8 + (rng.gen::<f64>() < p) as i8;
            }
        }
        let km = grm(&dataset(&counts)).unwrap();
        let mean_diag = km.matrix.diag().mean().unwrap();
        assert_relative_eq!(mean_diag, 1.0, epsilon = 0.05);
    }

    #[test]
    fn fails_when_all_variants_are_monomorphic() {
        let ds = dataset(&array![[0, 0, 0], [2, 2, 2]]);
        let err = grm(&ds).unwrap_err();
        assert!(matches!(err, MethodError::EmptyAfterFilter(_)));
        assert!(err.to_string().contains("Cannot run GRM"));
    }

    #[test]
    fn rejects_multiallelic_input() {
        let entries = Array2::from_elem((1, 2), crate::genotype::GenotypeRecord::default());
        let ds = Dataset::new(
            vec![Variant::new("1", 5, vec!["A", "C", "G"])],
            vec!["a".into(), "b".into()],
            entries,
        )
        .unwrap();
        assert!(matches!(grm(&ds).unwrap_err(), MethodError::Precondition { .. }));
    }

    #[test]
    fn subset_reorders_rows_and_columns() {
        let km = KinshipMatrix {
            matrix: array![[1.0, 0.1, 0.2], [0.1, 1.1, 0.3], [0.2, 0.3, 0.9]],
            sample_ids: vec!["a".into(), "b".into(), "c".into()],
            n_variants: 10,
        };
        let sub = km.subset(&["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(sub.matrix, array![[0.9, 0.2], [0.2, 1.0]]);
        assert_eq!(sub.n_variants, 10);
        assert!(km.subset(&["z".to_string()]).is_err());
    }
}

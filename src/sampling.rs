//! Random down-sampling of dataset rows.
use crate::dataset::Dataset;
use crate::MethodError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DEFAULT_SEED: u64 = 1;

/// Keeps each row independently with probability `fraction`.
///
/// The draw is reproducible for a given `seed`; the number of kept rows is
/// `fraction * n_rows` only in expectation.
pub fn sample_rows(dataset: &Dataset, fraction: f64, seed: u64) -> Result<Dataset, MethodError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(MethodError::precondition(
            "sample_rows",
            format!("fraction must be in [0, 1], got {}", fraction),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let keep: Vec<bool> = (0..dataset.n_rows()).map(|_| rng.gen_bool(fraction)).collect();
    let sampled = dataset.filter_rows(|i, _| keep[i]);

    log::info!(
        "Sampled {} of {} rows (fraction = {}, seed = {})",
        sampled.n_rows(),
        dataset.n_rows(),
        fraction,
        seed
    );
    Ok(sampled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Variant;
    use ndarray::Array2;

    fn dataset(n_rows: usize) -> Dataset {
        let variants = (0..n_rows)
            .map(|i| Variant::new("1", i as u64 + 1, vec!["A", "C"]))
            .collect();
        Dataset::from_alt_counts(variants, vec!["a".into(), "b".into()], &Array2::zeros((n_rows, 2))).unwrap()
    }

    #[test]
    fn full_and_empty_fractions() {
        let ds = dataset(50);
        assert_eq!(sample_rows(&ds, 1.0, DEFAULT_SEED).unwrap().n_rows(), 50);
        assert_eq!(sample_rows(&ds, 0.0, DEFAULT_SEED).unwrap().n_rows(), 0);
    }

    #[test]
    fn same_seed_same_rows() {
        let ds = dataset(1000);
        let a = sample_rows(&ds, 0.5, 42).unwrap();
        let b = sample_rows(&ds, 0.5, 42).unwrap();
        assert_eq!(a.rows(), b.rows());
        // expected 500, sd ~16
        assert!(a.n_rows() > 400 && a.n_rows() < 600);
    }

    #[test]
    fn rejects_fraction_out_of_range() {
        let ds = dataset(3);
        assert!(sample_rows(&ds, 1.5, 1).is_err());
        assert!(sample_rows(&ds, -0.1, 1).is_err());
        assert!(sample_rows(&ds, f64::NAN, 1).is_err());
    }
}

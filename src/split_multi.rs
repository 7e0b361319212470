//! Splitting multiallelic variants into biallelic rows with downcoded entries.
use crate::dataset::{Dataset, FieldValue, Row, Variant};
use crate::genotype::GenotypeRecord;
use crate::MethodError;
use ndarray::Array2;
use rayon::prelude::*;
use std::collections::HashMap;

const STAR_ALLELE: &str = "*";

#[derive(Debug, Clone, Default)]
pub struct SplitMultiOptions {
    /// Keep rows whose alternate allele is the spanning deletion `*`
    pub keep_star: bool,
    /// Input is already left-aligned: skip re-sorting and verify instead
    pub left_aligned: bool,
}

/// One output row: where it comes from and how its entries are produced.
struct Emitted {
    row: Row,
    source: usize,
    a_index: u32,
    /// Biallelic source rows keep their entries verbatim.
    passthrough: bool,
}

/// Splits every multiallelic row into one biallelic row per alternate allele.
///
/// Each output row carries `wasSplit` and `aIndex`, and its variant is the
/// minimal representation of `(ref, alt)`. Entries are downcoded with
/// [`GenotypeRecord::downcode`]. Biallelic rows pass through unchanged, which
/// makes the operation idempotent.
pub fn split_multi_hts(dataset: &Dataset, options: &SplitMultiOptions) -> Result<Dataset, MethodError> {
    let mut emitted = Vec::with_capacity(dataset.n_rows());
    let mut n_star = 0usize;

    for (source, row) in dataset.rows().iter().enumerate() {
        let variant = &row.variant;

        if options.left_aligned && source > 0 {
            let prev = &dataset.rows()[source - 1].variant;
            if prev.contig == variant.contig && prev.position == variant.position {
                return Err(MethodError::DataIntegrity(format!(
                    "split_multi_hts: found multiple rows at locus {}:{}; \
                     merge them or rerun with left_aligned = false",
                    variant.contig, variant.position
                )));
            }
        }

        let n_alt = variant.n_alt_alleles();
        let was_split = n_alt > 1;

        for (offset, alt) in variant.alt_alleles().iter().enumerate() {
            if alt == STAR_ALLELE && !options.keep_star {
                n_star += 1;
                continue;
            }
            let a_index = offset as u32 + 1;
            let split_variant = if was_split {
                Variant::new(&variant.contig, variant.position, vec![variant.reference(), alt.as_str()])
                    .min_rep()
            } else {
                variant.clone()
            };

            if options.left_aligned && split_variant.position != variant.position {
                return Err(MethodError::DataIntegrity(format!(
                    "split_multi_hts: variant {} is not left-aligned (split allele {} moves to position {})",
                    variant, alt, split_variant.position
                )));
            }

            let mut out = row.clone();
            out.variant = split_variant;
            out.fields.insert("wasSplit".to_string(), FieldValue::Bool(was_split));
            out.fields.insert("aIndex".to_string(), FieldValue::Int(a_index as i64));
            emitted.push(Emitted {
                row: out,
                source,
                a_index,
                passthrough: !was_split,
            });
        }
    }

    if n_star > 0 {
        log::debug!("split_multi_hts: dropped {} star alleles", n_star);
    }

    if !options.left_aligned {
        let mut contig_rank: HashMap<&str, usize> = HashMap::new();
        for row in dataset.rows() {
            let next = contig_rank.len();
            contig_rank.entry(row.variant.contig.as_str()).or_insert(next);
        }
        // stable: alleles tie-break, then source order
        emitted.sort_by(|a, b| {
            let key = |e: &Emitted| (contig_rank[e.row.variant.contig.as_str()], e.row.variant.position);
            key(a)
                .cmp(&key(b))
                .then_with(|| a.row.variant.alleles.cmp(&b.row.variant.alleles))
        });
    }

    let n_samples = dataset.n_cols();
    let entries: Vec<GenotypeRecord> = emitted
        .par_iter()
        .flat_map_iter(|e| {
            dataset.entries().row(e.source).to_vec().into_iter().map(move |g| {
                if e.passthrough {
                    g
                } else {
                    g.downcode(e.a_index)
                }
            })
        })
        .collect();
    let entries = Array2::from_shape_vec((emitted.len(), n_samples), entries)
        .map_err(|e| MethodError::DataIntegrity(e.to_string()))?;

    log::info!(
        "split_multi_hts: {} rows in, {} biallelic rows out",
        dataset.n_rows(),
        emitted.len()
    );

    let rows = emitted.into_iter().map(|e| e.row).collect();
    Ok(Dataset::from_parts(
        rows,
        dataset.samples().to_vec(),
        dataset.col_fields().clone(),
        entries,
    )?)
}

//! Module for handling I/O: genotype import (VCF/BCF, PLINK), column annotations,
//! and gzipped tab-separated result files.
use crate::dataset::{Dataset, DatasetError, FieldValue, Variant};
use crate::genotype::{Call, GenotypeRecord};
use crate::pca::{PcTable, PcaResult};
use bed_reader::Bed;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::Array2;
use polars::prelude::*;
use rust_htslib::bcf::{self, Read};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

/// htslib sentinel for a missing integer value
const MISSING_INTEGER: i32 = i32::MIN;
/// htslib sentinel padding short integer vectors
const VECTOR_END_INTEGER: i32 = i32::MIN + 1;

#[derive(Error, Debug)]
pub enum IoError {
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Data alignment error: {0}")]
    Alignment(String),
    #[error("VCF/BCF error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),
    #[error("PLINK error: {0}")]
    Plink(String),
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Malformed input: {0}")]
    Format(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

fn require_file(path: &Path) -> Result<(), IoError> {
    if !path.exists() {
        return Err(IoError::NotFound(path.to_string_lossy().into()));
    }
    Ok(())
}

/// Loads a dataset from exactly one of a VCF/BCF file or a PLINK prefix.
pub fn load_dataset(vcf: Option<&Path>, plink: Option<&Path>) -> Result<Dataset, IoError> {
    match (vcf, plink) {
        (Some(path), None) => import_vcf(path),
        (None, Some(prefix)) => import_plink(prefix),
        _ => Err(IoError::Format(
            "exactly one of a VCF/BCF file or a PLINK prefix must be given".into(),
        )),
    }
}

/// Drops the vector-end padding; a vector holding any missing value is undefined.
fn defined_ints(values: &[i32]) -> Option<Vec<i32>> {
    let values: Vec<i32> = values
        .iter()
        .copied()
        .take_while(|&v| v != VECTOR_END_INTEGER)
        .collect();
    if values.is_empty() || values.contains(&MISSING_INTEGER) {
        None
    } else {
        Some(values)
    }
}

/// Per-sample integer vectors of a FORMAT field, or `None` when the record lacks it.
fn format_ints(record: &bcf::Record, tag: &[u8]) -> Option<Vec<Option<Vec<i32>>>> {
    let values = record.format(tag).integer().ok()?;
    Some(values.iter().map(|v| defined_ints(v)).collect())
}

/// Reads a VCF or BCF file (optionally compressed) into a dataset with GT, AD, DP,
/// GQ and PL entry fields. Calls that are not diploid or contain a missing allele
/// are treated as missing.
pub fn import_vcf(path: &Path) -> Result<Dataset, IoError> {
    require_file(path)?;
    log::info!("Importing VCF/BCF file: {:?}", path);

    let mut reader = bcf::Reader::from_path(path)?;
    let samples: Vec<String> = reader
        .header()
        .samples()
        .iter()
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect();
    let n_samples = samples.len();

    let mut variants = Vec::new();
    let mut entries = Vec::new();

    for result in reader.records() {
        let record = result?;
        let rid = record
            .rid()
            .ok_or_else(|| IoError::Format("record without a contig".into()))?;
        let contig = String::from_utf8_lossy(record.header().rid2name(rid)?).into_owned();
        let alleles: Vec<String> = record
            .alleles()
            .iter()
            .map(|a| String::from_utf8_lossy(a).into_owned())
            .collect();
        let variant = Variant::new(&contig, record.pos() as u64 + 1, alleles);

        let genotypes = record.genotypes()?;
        let ad = format_ints(&record, b"AD");
        let dp = format_ints(&record, b"DP");
        let gq = format_ints(&record, b"GQ");
        let pl = format_ints(&record, b"PL");
        let scalar = |field: &Option<Vec<Option<Vec<i32>>>>, s: usize| {
            field
                .as_ref()
                .and_then(|f| f[s].as_ref())
                .and_then(|v| v.first().copied())
        };
        let vector = |field: &Option<Vec<Option<Vec<i32>>>>, s: usize| field.as_ref().and_then(|f| f[s].clone());

        for s in 0..n_samples {
            let indices: Vec<Option<u32>> = genotypes.get(s).iter().map(|a| a.index()).collect();
            let gt = match indices.as_slice() {
                [Some(a), Some(b)] => Some(Call::new(*a, *b)),
                _ => None,
            };
            entries.push(GenotypeRecord {
                gt,
                ad: vector(&ad, s),
                dp: scalar(&dp, s),
                gq: scalar(&gq, s),
                pl: vector(&pl, s),
            });
        }
        variants.push(variant);
    }

    log::info!("Imported {} variants x {} samples", variants.len(), n_samples);
    let entries = Array2::from_shape_vec((variants.len(), n_samples), entries)
        .map_err(|e| IoError::Format(e.to_string()))?;
    Ok(Dataset::new(variants, samples, entries)?)
}

/// Reads a PLINK .bed/.bim/.fam fileset. The counted allele (A1) becomes the
/// alternate allele and A2 the reference.
pub fn import_plink(plink_file_no_ext: &Path) -> Result<Dataset, IoError> {
    let bed_path = plink_file_no_ext.with_extension("bed");
    require_file(&bed_path)?;
    log::info!("Importing PLINK fileset: {:?}", plink_file_no_ext);

    let plink_err = |e: Box<bed_reader::BedErrorPlus>| IoError::Plink(e.to_string());
    let mut bed = Bed::new(&bed_path).map_err(plink_err)?;

    let samples: Vec<String> = bed.iid().map_err(plink_err)?.iter().cloned().collect();
    let chromosomes: Vec<String> = bed.chromosome().map_err(plink_err)?.iter().cloned().collect();
    let positions: Vec<i32> = bed.bp_position().map_err(plink_err)?.iter().copied().collect();
    let allele_1: Vec<String> = bed.allele_1().map_err(plink_err)?.iter().cloned().collect();
    let allele_2: Vec<String> = bed.allele_2().map_err(plink_err)?.iter().cloned().collect();

    let variants: Vec<Variant> = (0..chromosomes.len())
        .map(|i| {
            let position = u64::try_from(positions[i])
                .map_err(|_| IoError::Format(format!("negative position {} in .bim", positions[i])))?;
            Ok(Variant::new(
                &chromosomes[i],
                position,
                vec![allele_2[i].as_str(), allele_1[i].as_str()],
            ))
        })
        .collect::<Result<_, IoError>>()?;

    // samples x variants; missing calls are negative
    let raw = bed.read::<i8>().map_err(plink_err)?;
    let (n_variants, n_samples) = (variants.len(), samples.len());
    if raw.dim() != (n_samples, n_variants) {
        return Err(IoError::Alignment(format!(
            ".bed matrix is {:?} but .fam/.bim list {} samples and {} variants",
            raw.dim(),
            n_samples,
            n_variants
        )));
    }
    let counts = Array2::from_shape_fn((n_variants, n_samples), |(v, s)| raw[[s, v]]);

    log::info!("Imported {} variants x {} samples", n_variants, n_samples);
    Ok(Dataset::from_alt_counts(variants, samples, &counts)?)
}

/// Loads numeric column fields from a tab-separated file with a header, aligned to
/// `sample_ids`. Samples absent from the file, and empty cells, are missing.
pub fn load_col_fields(
    pheno_file: &Path,
    sample_id_col: &str,
    fields: &[String],
    sample_ids: &[String],
) -> Result<BTreeMap<String, Vec<Option<f64>>>, IoError> {
    require_file(pheno_file)?;
    log::info!("Loading column fields {:?} from {:?}", fields, pheno_file);

    let data_df = CsvReadOptions::default()
        .with_has_header(true)
        .with_parse_options(CsvParseOptions::default().with_separator(b'\t'))
        .try_into_reader_with_file_path(Some(pheno_file.into()))?
        .finish()?;
    log::info!("Loaded data file with {} rows and {} columns", data_df.height(), data_df.width());

    // Cast sample ID column to string to handle both numeric and string IDs
    let ids = data_df.column(sample_id_col)?.cast(&DataType::String)?;
    let mut file_row: HashMap<String, usize> = HashMap::new();
    for (row, id) in ids.str()?.into_iter().enumerate() {
        if let Some(id) = id {
            if file_row.insert(id.to_string(), row).is_some() {
                return Err(IoError::Alignment(format!(
                    "Sample '{}' appears more than once in {:?}",
                    id, pheno_file
                )));
            }
        }
    }

    let n_found = sample_ids.iter().filter(|s| file_row.contains_key(*s)).count();
    if n_found < sample_ids.len() {
        log::warn!(
            "{} of {} samples have no row in {:?}; their fields are missing",
            sample_ids.len() - n_found,
            sample_ids.len(),
            pheno_file
        );
    }

    let mut out = BTreeMap::new();
    for field in fields {
        let values: Vec<Option<f64>> = data_df
            .column(field)?
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .collect();
        let aligned = sample_ids
            .iter()
            .map(|s| file_row.get(s).and_then(|&row| values[row]))
            .collect();
        out.insert(field.clone(), aligned);
    }
    Ok(out)
}

/// Annotates `dataset` with the given column fields read from `pheno_file`.
pub fn annotate_cols_from_file(
    dataset: Dataset,
    pheno_file: &Path,
    sample_id_col: &str,
    fields: &[String],
) -> Result<Dataset, IoError> {
    let values = load_col_fields(pheno_file, sample_id_col, fields, dataset.samples())?;
    values
        .into_iter()
        .try_fold(dataset, |ds, (name, v)| ds.annotate_cols(&name, v))
        .map_err(IoError::from)
}

fn gz_file(path: &Path) -> Result<GzEncoder<File>, IoError> {
    Ok(GzEncoder::new(File::create(path)?, Compression::default()))
}

fn tsv_writer(path: &Path) -> Result<::csv::Writer<GzEncoder<File>>, IoError> {
    Ok(::csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(gz_file(path)?))
}

fn finish(writer: ::csv::Writer<GzEncoder<File>>) -> Result<(), IoError> {
    let encoder = writer
        .into_inner()
        .map_err(|e| IoError::Io(e.into_error()))?;
    encoder.finish()?;
    Ok(())
}

#[derive(Serialize)]
struct LinregRecord<'a> {
    variant: String,
    response: &'a str,
    n_complete_samples: String,
    ac: String,
    ytx: String,
    beta: String,
    se: String,
    tstat: String,
    pval: String,
}

/// Writes the regression results stored under `root`, one line per variant and
/// response. Undefined statistics are written as `NA`.
pub fn write_linreg_results(
    path: &Path,
    dataset: &Dataset,
    root: &str,
    responses: &[String],
) -> Result<(), IoError> {
    log::info!("Writing association results to {:?}", path);
    let mut writer = tsv_writer(path)?;

    for row in dataset.rows() {
        let scalar = |name: &str| {
            row.field(&format!("{}.{}", root, name))
                .map_or_else(|| "NA".to_string(), |v| v.to_string())
        };
        let element = |name: &str, i: usize| match row.field(&format!("{}.{}", root, name)) {
            Some(FieldValue::FloatArray(values)) => values
                .get(i)
                .filter(|v| v.is_finite())
                .map_or_else(|| "NA".to_string(), |v| v.to_string()),
            _ => "NA".to_string(),
        };
        for (i, response) in responses.iter().enumerate() {
            writer.serialize(LinregRecord {
                variant: row.variant.to_string(),
                response,
                n_complete_samples: scalar("nCompleteSamples"),
                ac: scalar("AC"),
                ytx: element("ytx", i),
                beta: element("beta", i),
                se: element("se", i),
                tstat: element("tstat", i),
                pval: element("pval", i),
            })?;
        }
    }
    finish(writer)
}

/// Writes a score or loading table: the key column followed by `PC1..PCk`, or by a
/// single comma-joined array column.
pub fn write_pc_table(path: &Path, table: &PcTable) -> Result<(), IoError> {
    log::info!("Writing {} x {} component table to {:?}", table.keys.len(), table.k(), path);
    let mut writer = tsv_writer(path)?;

    let mut header = vec![table.key_field.clone()];
    header.extend(table.field_names());
    writer.write_record(&header)?;

    for (key, values) in table.keys.iter().zip(table.values.rows()) {
        let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let mut record = vec![key.clone()];
        if table.as_array {
            record.push(values.join(","));
        } else {
            record.extend(values);
        }
        writer.write_record(&record)?;
    }
    finish(writer)
}

/// Writes the eigenvalues, scores and (if computed) loadings of a PCA run as
/// `<prefix>.eigenvalues.tsv.gz`, `<prefix>.scores.tsv.gz` and `<prefix>.loadings.tsv.gz`.
pub fn write_pca_result(prefix: &Path, result: &PcaResult) -> Result<(), IoError> {
    let with_suffix = |suffix: &str| {
        let mut name = prefix.as_os_str().to_owned();
        name.push(suffix);
        std::path::PathBuf::from(name)
    };

    let mut writer = tsv_writer(&with_suffix(".eigenvalues.tsv.gz"))?;
    writer.write_record(["PC", "eigenvalue"])?;
    for (i, ev) in result.eigenvalues.iter().enumerate() {
        writer.write_record([format!("PC{}", i + 1), ev.to_string()])?;
    }
    finish(writer)?;

    write_pc_table(&with_suffix(".scores.tsv.gz"), &result.scores)?;
    if let Some(loadings) = &result.loadings {
        write_pc_table(&with_suffix(".loadings.tsv.gz"), loadings)?;
    }
    Ok(())
}

/// Writes a labelled square matrix (GRM or LD) with an `id` header column.
pub fn write_square_matrix(path: &Path, ids: &[String], matrix: &Array2<f64>) -> Result<(), IoError> {
    if matrix.dim() != (ids.len(), ids.len()) {
        return Err(IoError::Alignment(format!(
            "matrix is {:?} but {} labels were given",
            matrix.dim(),
            ids.len()
        )));
    }
    log::info!("Writing {} x {} matrix to {:?}", ids.len(), ids.len(), path);
    let mut writer = tsv_writer(path)?;

    let mut header = vec!["id".to_string()];
    header.extend(ids.iter().cloned());
    writer.write_record(&header)?;
    for (id, row) in ids.iter().zip(matrix.rows()) {
        let mut record = vec![id.clone()];
        record.extend(row.iter().map(|v| v.to_string()));
        writer.write_record(&record)?;
    }
    finish(writer)
}

/// Writes the dataset as gzipped VCF text. `aIndex` and `wasSplit` row fields are
/// written to INFO when present.
pub fn export_vcf(path: &Path, dataset: &Dataset) -> Result<(), IoError> {
    log::info!("Exporting {} variants to {:?}", dataset.n_rows(), path);
    let mut out = std::io::BufWriter::new(gz_file(path)?);

    writeln!(out, "##fileformat=VCFv4.2")?;
    let mut contigs: Vec<&str> = Vec::new();
    for row in dataset.rows() {
        if !contigs.contains(&row.variant.contig.as_str()) {
            contigs.push(&row.variant.contig);
        }
    }
    for contig in &contigs {
        writeln!(out, "##contig=<ID={}>", contig)?;
    }
    writeln!(
        out,
        "##INFO=<ID=aIndex,Number=1,Type=Integer,Description=\"Index of this alternate allele in the original multiallelic site\">"
    )?;
    writeln!(
        out,
        "##INFO=<ID=wasSplit,Number=0,Type=Flag,Description=\"Variant was split from a multiallelic site\">"
    )?;
    writeln!(out, "##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">")?;
    writeln!(out, "##FORMAT=<ID=AD,Number=R,Type=Integer,Description=\"Allelic depths\">")?;
    writeln!(out, "##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Read depth\">")?;
    writeln!(out, "##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Genotype quality\">")?;
    writeln!(out, "##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Phred-scaled genotype likelihoods\">")?;
    write!(out, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT")?;
    for sample in dataset.samples() {
        write!(out, "\t{}", sample)?;
    }
    writeln!(out)?;

    for (i, row) in dataset.rows().iter().enumerate() {
        let mut info = Vec::new();
        if let Some(FieldValue::Int(a)) = row.fields.get("aIndex") {
            info.push(format!("aIndex={}", a));
        }
        if let Some(FieldValue::Bool(true)) = row.fields.get("wasSplit") {
            info.push("wasSplit".to_string());
        }
        let info = if info.is_empty() { ".".to_string() } else { info.join(";") };
        let alt = if row.variant.alt_alleles().is_empty() {
            ".".to_string()
        } else {
            row.variant.alt_alleles().join(",")
        };
        write!(
            out,
            "{}\t{}\t.\t{}\t{}\t.\t.\t{}\tGT:AD:DP:GQ:PL",
            row.variant.contig,
            row.variant.position,
            row.variant.reference(),
            alt,
            info
        )?;
        for j in 0..dataset.n_cols() {
            write!(out, "\t{}", dataset.entry(i, j))?;
        }
        writeln!(out)?;
    }

    let encoder = out.into_inner().map_err(|e| IoError::Io(e.into_error()))?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read as _;

    fn read_gz(path: &Path) -> String {
        let mut text = String::new();
        GzDecoder::new(File::open(path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        text
    }

    #[test]
    fn integer_vectors_drop_padding_and_missing() {
        assert_eq!(defined_ints(&[3, 4, VECTOR_END_INTEGER]), Some(vec![3, 4]));
        assert_eq!(defined_ints(&[MISSING_INTEGER]), None);
        assert_eq!(defined_ints(&[VECTOR_END_INTEGER]), None);
    }

    #[test]
    fn col_fields_are_aligned_to_dataset_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pheno.tsv");
        std::fs::write(&path, "IID\theight\tage\n3\t1.5\t40\n1\t2.5\t\n").unwrap();

        let samples = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        let fields = load_col_fields(&path, "IID", &["height".into(), "age".into()], &samples).unwrap();
        assert_eq!(fields["height"], vec![Some(2.5), None, Some(1.5)]);
        assert_eq!(fields["age"], vec![None, None, Some(40.0)]);

        let missing = dir.path().join("nope.tsv");
        assert!(matches!(
            load_col_fields(&missing, "IID", &[], &samples),
            Err(IoError::NotFound(_))
        ));
    }

    #[test]
    fn square_matrix_has_labelled_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grm.tsv.gz");
        let ids = vec!["a".to_string(), "b".to_string()];
        write_square_matrix(&path, &ids, &ndarray::array![[1.0, 0.5], [0.5, 2.0]]).unwrap();
        assert_eq!(read_gz(&path), "id\ta\tb\na\t1\t0.5\nb\t0.5\t2\n");

        assert!(write_square_matrix(&path, &ids[..1], &Array2::zeros((2, 2))).is_err());
    }

    #[test]
    fn exported_vcf_carries_split_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.vcf.gz");
        let rec: GenotypeRecord = "0/1:9,6:15:50:50,0,99".parse().unwrap();
        let ds = Dataset::new(
            vec![Variant::new("1", 10, vec!["A", "T"])],
            vec!["s0".into()],
            Array2::from_elem((1, 1), rec),
        )
        .unwrap()
        .annotate_rows("aIndex", vec![FieldValue::Int(2)])
        .unwrap()
        .annotate_rows("wasSplit", vec![FieldValue::Bool(true)])
        .unwrap();

        export_vcf(&path, &ds).unwrap();
        let text = read_gz(&path);
        assert!(text.contains("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts0\n"));
        assert!(text.ends_with("1\t10\t.\tA\tT\t.\t.\taIndex=2;wasSplit\tGT:AD:DP:GQ:PL\t0/1:9,6:15:50:50,0,99\n"));
    }
}

use approx::assert_relative_eq;
use flate2::read::GzDecoder;
use ndarray::{array, Array2};
use statgen_rust::dataset::{Dataset, FieldValue, Variant};
use statgen_rust::expr::{ColExpr, Expr};
use statgen_rust::io::{
    annotate_cols_from_file, export_vcf, import_vcf, write_linreg_results, write_pca_result,
};
use statgen_rust::{
    grm, hwe_normalized_pca, ld_matrix, linreg, split_multi_hts, KinshipMatrix, LdOptions,
    LinregOptions, MethodError, PcaOptions, SplitMultiOptions,
};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const VCF: &str = "##fileformat=VCFv4.2
##contig=<ID=1,length=1000>
##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">
##FORMAT=<ID=AD,Number=R,Type=Integer,Description=\"Allelic depths\">
##FORMAT=<ID=DP,Number=1,Type=Integer,Description=\"Read depth\">
##FORMAT=<ID=GQ,Number=1,Type=Integer,Description=\"Genotype quality\">
##FORMAT=<ID=PL,Number=G,Type=Integer,Description=\"Genotype likelihoods\">
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\ts0\ts1
1\t10\t.\tA\tC,T\t.\t.\t.\tGT:AD:DP:GQ:PL\t0/2:7,2,6:15:45:99,50,99,0,45,99\t1/2:2,8,6:16:45:99,50,99,45,0,99
1\t20\t.\tG\tA\t.\t.\t.\tGT:AD:DP:GQ:PL\t0/1:3,4:7:20:20,0,40\t./.:.:.:.:.
";

fn read_gz(path: &Path) -> String {
    let mut text = String::new();
    GzDecoder::new(File::open(path).unwrap())
        .read_to_string(&mut text)
        .unwrap();
    text
}

fn counts_dataset(counts: &Array2<i8>) -> Dataset {
    let variants = (0..counts.nrows())
        .map(|i| Variant::new("1", 100 * (i as u64 + 1), vec!["C", "T"]))
        .collect();
    let samples = (0..counts.ncols()).map(|j| format!("s{}", j)).collect();
    Dataset::from_alt_counts(variants, samples, counts).unwrap()
}

#[test]
fn vcf_import_split_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.vcf");
    std::fs::write(&input, VCF).unwrap();

    let ds = import_vcf(&input).unwrap();
    assert_eq!(ds.samples(), ["s0", "s1"]);
    assert_eq!(ds.n_rows(), 2);
    assert_eq!(ds.rows()[0].variant, Variant::new("1", 10, vec!["A", "C", "T"]));
    assert_eq!(ds.entry(1, 1).gt, None);
    assert_eq!(ds.entry(1, 1).dp, None);

    // multiallelic input must be split before computing a GRM
    assert!(matches!(grm(&ds), Err(MethodError::Precondition { .. })));

    let split = split_multi_hts(&ds, &SplitMultiOptions::default()).unwrap();
    assert_eq!(split.n_rows(), 3);
    assert_eq!(split.entry(0, 0).to_string(), "0/0:13,2:15:45:0,45,99");
    assert_eq!(split.entry(1, 1).to_string(), "0/1:10,6:16:50:50,0,99");
    assert_eq!(split.rows()[2].fields["wasSplit"], FieldValue::Bool(false));

    let output = dir.path().join("split.vcf.gz");
    export_vcf(&output, &split).unwrap();
    let text = read_gz(&output);
    let records: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
    assert_eq!(records.len(), 3);
    assert!(records[0].starts_with("1\t10\t.\tA\tC\t.\t.\taIndex=1;wasSplit\t"));
    assert!(records[2].ends_with("\t0/1:3,4:7:20:20,0,40\t./.:.:.:.:."));
}

#[test]
fn grm_survives_save_and_load() {
    let counts = array![[0, 1, 2, 1], [1, 0, 1, 2], [2, 2, 0, 1], [0, 0, 1, 0]];
    let km = grm(&counts_dataset(&counts)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grm.bin");
    km.save(&path).unwrap();
    let loaded = KinshipMatrix::load(&path).unwrap();

    assert_eq!(loaded.sample_ids, km.sample_ids);
    assert_eq!(loaded.n_variants, 4);
    assert_eq!(loaded.matrix, km.matrix);
}

#[test]
fn pca_outputs_are_written_per_table() {
    let counts = array![
        [0, 1, 2, 0, 1],
        [1, 1, 0, 2, 0],
        [2, 0, 1, 1, 0],
        [0, 2, 1, 2, 2],
    ];
    let options = PcaOptions {
        k: 2,
        compute_loadings: true,
        ..Default::default()
    };
    let result = hwe_normalized_pca(&counts_dataset(&counts), &options).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("pca");
    write_pca_result(&prefix, &result).unwrap();

    let scores = read_gz(&dir.path().join("pca.scores.tsv.gz"));
    assert!(scores.starts_with("s\tPC1\tPC2\n"));
    assert_eq!(scores.lines().count(), 6);
    let loadings = read_gz(&dir.path().join("pca.loadings.tsv.gz"));
    assert!(loadings.starts_with("v\tPC1\tPC2\n1:100:C:T\t"));
    let eigenvalues = read_gz(&dir.path().join("pca.eigenvalues.tsv.gz"));
    assert_eq!(eigenvalues.lines().count(), 3);
}

#[test]
fn linreg_from_phenotype_file() {
    let dir = tempfile::tempdir().unwrap();
    let pheno = dir.path().join("pheno.tsv");
    // s6 has no height, so it is not a complete sample
    std::fs::write(
        &pheno,
        "IID\theight\ns0\t1.1\ns1\t2.9\ns2\t5.2\ns3\t0.8\ns4\t3.1\ns5\t4.9\ns6\t\n",
    )
    .unwrap();

    let counts = array![[0, 1, 2, 0, 1, 2, 1]];
    let ds = annotate_cols_from_file(counts_dataset(&counts), &pheno, "IID", &["height".to_string()]).unwrap();

    let y = Expr::parse("sa.height").unwrap().into_col("linreg/y").unwrap();
    assert_eq!(y, ColExpr::field("height"));
    let x = Expr::parse("GT.n_alt").unwrap().into_entry("linreg/x").unwrap();
    let result = linreg(ds, &[y], &x, &[], &LinregOptions::default()).unwrap();

    let row = &result.rows()[0];
    assert_eq!(row.field("linreg.nCompleteSamples"), Some(&FieldValue::Int(6)));
    match row.field("linreg.beta") {
        Some(FieldValue::FloatArray(beta)) => assert_relative_eq!(beta[0], 2.05, epsilon = 1e-8),
        other => panic!("unexpected beta field {:?}", other),
    }

    let out = dir.path().join("linreg.tsv.gz");
    write_linreg_results(&out, &result, "linreg", &["height".to_string()]).unwrap();
    let text = read_gz(&out);
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("variant\tresponse\tn_complete_samples\tac\tytx\tbeta\tse\ttstat\tpval")
    );
    assert!(lines.next().unwrap().starts_with("1:100:C:T\theight\t6\t6\t"));
}

#[test]
fn ld_of_duplicated_variant_is_one() {
    let counts = array![[0, 1, 2, 1, 0], [0, 1, 2, 1, 0], [2, 1, 0, 1, 2]];
    let ld = ld_matrix(&counts_dataset(&counts), &LdOptions::default()).unwrap();
    assert_relative_eq!(ld.matrix[[0, 1]], 1.0, epsilon = 1e-12);
    assert_relative_eq!(ld.matrix[[0, 2]], -1.0, epsilon = 1e-12);
    assert_eq!(ld.variants.len(), 3);
}

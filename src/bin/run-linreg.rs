//! Run Linreg: linear regression association tests
//!
//! Loads genotypes and a tab-separated phenotype/covariate file, then tests
//! every variant for association with each response.

use clap::Parser;
use statgen_rust::{
    expr::{ColExpr, Expr},
    io::{annotate_cols_from_file, load_dataset, write_linreg_results},
    linreg,
    sampling::{sample_rows, DEFAULT_SEED},
    LinregOptions,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "run-linreg", version, about = "Runs linear regression association tests")]
struct Cli {
    /// Path to the VCF/BCF file with genotypes
    #[arg(long, conflicts_with = "plink_file", required_unless_present = "plink_file")]
    vcf_file: Option<PathBuf>,

    /// Path to the PLINK file prefix (.bed/.bim/.fam)
    #[arg(long)]
    plink_file: Option<PathBuf>,

    /// Tab-separated phenotype/covariate file with a header
    #[arg(long, required = true)]
    pheno_file: PathBuf,

    /// Column name in the phenotype file for sample IDs
    #[arg(long, required = true)]
    sample_id_col: String,

    /// Response column(s)
    #[arg(long = "y", required = true, num_args = 1..)]
    responses: Vec<String>,

    /// Covariate column(s); an intercept is always included
    #[arg(long, num_args = 0..)]
    covariates: Vec<String>,

    /// Entry expression for the tested input
    #[arg(long, default_value = "GT.n_alt")]
    x: String,

    /// Row field receiving the results
    #[arg(long, default_value = "linreg")]
    root: String,

    /// Number of variants regressed together per task
    #[arg(long, default_value_t = 16)]
    block_size: usize,

    /// Path for the output results file (gzipped)
    #[arg(long, default_value = "linreg.results.tsv.gz")]
    output_file: PathBuf,

    /// Test a random fraction of the variants
    #[arg(long)]
    sample_fraction: Option<f64>,

    /// Seed for variant sampling
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Number of threads to use
    #[arg(long, default_value_t = 1)]
    n_threads: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    log::info!("Responses: {:?}", cli.responses);
    log::info!("Covariates: {:?}", cli.covariates);
    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.n_threads)
        .build_global()?;

    let mut dataset = load_dataset(cli.vcf_file.as_deref(), cli.plink_file.as_deref())?;
    if let Some(fraction) = cli.sample_fraction {
        dataset = sample_rows(&dataset, fraction, cli.seed)?;
    }

    let columns: Vec<String> = cli.responses.iter().chain(&cli.covariates).cloned().collect();
    let dataset = annotate_cols_from_file(dataset, &cli.pheno_file, &cli.sample_id_col, &columns)?;

    let ys: Vec<ColExpr> = cli.responses.iter().map(|name| ColExpr::field(name)).collect();
    let covariates: Vec<ColExpr> = cli.covariates.iter().map(|name| ColExpr::field(name)).collect();
    let x = Expr::parse(&cli.x)?.into_entry("linreg/x")?;

    let options = LinregOptions {
        root: cli.root.clone(),
        block_size: cli.block_size,
    };
    let results = linreg(dataset, &ys, &x, &covariates, &options)?;

    write_linreg_results(&cli.output_file, &results, &cli.root, &cli.responses)?;
    log::info!("Association results written to {:?}", cli.output_file);

    Ok(())
}

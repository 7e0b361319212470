//! Run PCA: principal component analysis of genotypes
//!
//! By default runs on Hardy-Weinberg normalized calls of a biallelic dataset.
//! With `--entry-expr` the given entry expression is used instead.

use clap::Parser;
use statgen_rust::{
    expr::Expr,
    hwe_normalized_pca,
    io::{load_dataset, write_pca_result},
    pca,
    sampling::{sample_rows, DEFAULT_SEED},
    PcaOptions,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "run-pca", version, about = "Runs principal component analysis on genotypes")]
struct Cli {
    /// Path to the VCF/BCF file with genotypes
    #[arg(long, conflicts_with = "plink_file", required_unless_present = "plink_file")]
    vcf_file: Option<PathBuf>,

    /// Path to the PLINK file prefix (.bed/.bim/.fam)
    #[arg(long)]
    plink_file: Option<PathBuf>,

    /// Output prefix; writes <prefix>.eigenvalues/.scores/.loadings.tsv.gz
    #[arg(long, required = true)]
    output_prefix: PathBuf,

    /// Number of principal components
    #[arg(long, default_value_t = 10)]
    k: usize,

    /// Also compute variant loadings
    #[arg(long)]
    compute_loadings: bool,

    /// Store components in a single array column
    #[arg(long)]
    as_array: bool,

    /// Entry expression to decompose (e.g. 'GT.n_alt') instead of normalized calls
    #[arg(long)]
    entry_expr: Option<String>,

    /// Use a random fraction of the variants
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

    log::info!("Starting PCA with k = {}", cli.k);
    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.n_threads)
        .build_global()?;

    let mut dataset = load_dataset(cli.vcf_file.as_deref(), cli.plink_file.as_deref())?;
    if let Some(fraction) = cli.sample_fraction {
        dataset = sample_rows(&dataset, fraction, cli.seed)?;
    }

    let options = PcaOptions {
        k: cli.k,
        compute_loadings: cli.compute_loadings,
        as_array: cli.as_array,
        ..Default::default()
    };

    let result = match &cli.entry_expr {
        Some(text) => {
            let entry_expr = Expr::parse(text)?.into_entry("pca")?;
            pca(&dataset, &entry_expr, &options)?
        }
        None => hwe_normalized_pca(&dataset, &options)?,
    };

    write_pca_result(&cli.output_prefix, &result)?;
    log::info!("PCA finished");

    Ok(())
}

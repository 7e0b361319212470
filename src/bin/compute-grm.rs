//! Compute GRM: Compute and save the Genetic Relatedness Matrix
//!
//! This binary computes the GRM from a VCF/BCF file or PLINK fileset and saves
//! it to disk in binary format for reuse, optionally also as a gzipped TSV.

use clap::Parser;
use statgen_rust::{
    grm::grm_with_block_size,
    io::{load_dataset, write_square_matrix},
    matrix::DEFAULT_BLOCK_SIZE,
    sampling::{sample_rows, DEFAULT_SEED},
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "compute-grm",
    version,
    about = "Computes and saves the Genetic Relatedness Matrix (GRM)"
)]
struct Cli {
    /// Path to the VCF/BCF file with genotypes
    #[arg(long, conflicts_with = "plink_file", required_unless_present = "plink_file")]
    vcf_file: Option<PathBuf>,

    /// Path to the PLINK file prefix (.bed/.bim/.fam)
    #[arg(long)]
    plink_file: Option<PathBuf>,

    /// Output file path for the GRM (binary format)
    #[arg(long, required = true)]
    output_file: PathBuf,

    /// Also write the GRM as a gzipped TSV
    #[arg(long)]
    tsv_output: Option<PathBuf>,

    /// Use a random fraction of the variants
    #[arg(long)]
    sample_fraction: Option<f64>,

    /// Seed for variant sampling
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Block size for the distributed matrix product
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,

    /// Number of threads to use
    #[arg(long, default_value_t = 1)]
    n_threads: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    log::info!("Starting GRM computation");
    log::info!("Output file: {:?}", cli.output_file);
    log::info!("Using {} threads", cli.n_threads);

    // Set the global thread pool for rayon
    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.n_threads)
        .build_global()?;

    let mut dataset = load_dataset(cli.vcf_file.as_deref(), cli.plink_file.as_deref())?;
    if let Some(fraction) = cli.sample_fraction {
        dataset = sample_rows(&dataset, fraction, cli.seed)?;
    }

    let km = grm_with_block_size(&dataset, cli.block_size)?;
    km.save(&cli.output_file)?;
    log::info!(
        "File size: {} MB",
        std::fs::metadata(&cli.output_file)?.len() as f64 / 1_048_576.0
    );

    if let Some(tsv) = &cli.tsv_output {
        write_square_matrix(tsv, &km.sample_ids, &km.matrix)?;
    }

    Ok(())
}

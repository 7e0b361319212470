//! LD Matrix: pairwise variant correlation

use clap::Parser;
use statgen_rust::{
    io::{load_dataset, write_square_matrix},
    ld_matrix,
    sampling::{sample_rows, DEFAULT_SEED},
    LdOptions,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ld-matrix", version, about = "Computes the LD (correlation) matrix between variants")]
struct Cli {
    /// Path to the VCF/BCF file with genotypes
    #[arg(long, conflicts_with = "plink_file", required_unless_present = "plink_file")]
    vcf_file: Option<PathBuf>,

    /// Path to the PLINK file prefix (.bed/.bim/.fam)
    #[arg(long)]
    plink_file: Option<PathBuf>,

    /// Output file (gzipped TSV)
    #[arg(long, required = true)]
    output_file: PathBuf,

    /// Always multiply locally, regardless of matrix size
    #[arg(long)]
    force_local: bool,

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

    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.n_threads)
        .build_global()?;

    let mut dataset = load_dataset(cli.vcf_file.as_deref(), cli.plink_file.as_deref())?;
    if let Some(fraction) = cli.sample_fraction {
        dataset = sample_rows(&dataset, fraction, cli.seed)?;
    }

    let ld = ld_matrix(
        &dataset,
        &LdOptions {
            force_local: cli.force_local,
        },
    )?;
    let ids: Vec<String> = ld.variants.iter().map(|v| v.to_string()).collect();
    write_square_matrix(&cli.output_file, &ids, &ld.matrix)?;

    Ok(())
}

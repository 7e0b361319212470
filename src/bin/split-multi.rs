//! Split Multi: split multiallelic variants into biallelic records
//!
//! Reads a VCF/BCF file, downcodes GT/AD/DP/GQ/PL for every alternate allele
//! and writes a gzipped VCF annotated with `aIndex` and `wasSplit`.

use clap::Parser;
use statgen_rust::{
    io::{export_vcf, import_vcf},
    split_multi_hts, SplitMultiOptions,
};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "split-multi",
    version,
    about = "Splits multiallelic variants into biallelic variants"
)]
struct Cli {
    /// Path to the VCF/BCF file with genotypes
    #[arg(long, required = true)]
    vcf_file: PathBuf,

    /// Output VCF path (gzipped)
    #[arg(long, required = true)]
    output_file: PathBuf,

    /// Keep alternate alleles that are a spanning deletion ('*')
    #[arg(long)]
    keep_star: bool,

    /// Input is left-aligned; verify instead of re-sorting
    #[arg(long)]
    left_aligned: bool,

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

    let dataset = import_vcf(&cli.vcf_file)?;
    let options = SplitMultiOptions {
        keep_star: cli.keep_star,
        left_aligned: cli.left_aligned,
    };
    let split = split_multi_hts(&dataset, &options)?;
    export_vcf(&cli.output_file, &split)?;

    Ok(())
}

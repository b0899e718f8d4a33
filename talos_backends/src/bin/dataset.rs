// talos_backends/src/bin/dataset.rs

//! Dataset assembly: walk an episode store, split train/test by keyword,
//! and write the dataset index with per-modality normalization bounds.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use talos_backends::cli::init_tracing;
use talos_backends::dataset;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Episode store to read.
    #[arg(long, default_value = "./data")]
    in_dir: PathBuf,

    /// Where the dataset index lands.
    #[arg(long, default_value = "./data")]
    out_dir: PathBuf,

    /// Substrings selecting training episodes. Defaults to every episode
    /// except the middle one.
    #[arg(long)]
    train_keywords: Vec<String>,

    /// Substrings selecting test episodes. Defaults to the complement of
    /// the training set.
    #[arg(long)]
    test_keywords: Vec<String>,

    /// Keep every n-th frame when computing bounds.
    #[arg(long, default_value_t = 1)]
    skip: usize,
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let index = dataset::build_index(
        &args.in_dir,
        &args.train_keywords,
        &args.test_keywords,
        args.skip,
    );
    if index.train.is_empty() && index.test.is_empty() {
        bail!("no episodes found under {}", args.in_dir.display());
    }

    println!("train episodes:");
    for entry in &index.train {
        println!("    {} ({} frames, {:?})", entry.stem, entry.frames, entry.outcome);
    }
    println!("test episodes:");
    for entry in &index.test {
        println!("    {} ({} frames, {:?})", entry.stem, entry.frames, entry.outcome);
    }

    let path = dataset::write_index(&index, &args.out_dir)
        .with_context(|| format!("writing index under {}", args.out_dir.display()))?;
    println!("index -> {}", path.display());
    Ok(())
}

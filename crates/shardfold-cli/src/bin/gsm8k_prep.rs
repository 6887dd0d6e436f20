//! gsm8k-prep - turn raw GSM8K JSON lines into training records

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use shardfold_cli::{load_config, logging};
use shardfold_config::ConfigLoader;
use shardfold_reward::prepare_split;
use tracing::info;

/// Build train/test record files from raw GSM8K splits
#[derive(Parser, Debug)]
#[command(name = "gsm8k-prep")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Raw training split, one {"question", "answer"} object per line
    #[arg(long)]
    train: PathBuf,
    /// Raw test split
    #[arg(long)]
    test: PathBuf,
    /// Directory receiving train.jsonl and test.jsonl
    #[arg(long, default_value = "~/data/gsm8k")]
    local_dir: PathBuf,
}

fn convert(input: &Path, output: &Path, split: &str) -> Result<usize> {
    let reader = BufReader::new(
        File::open(input).with_context(|| format!("cannot open {}", input.display()))?,
    );
    let writer = BufWriter::new(
        File::create(output).with_context(|| format!("cannot create {}", output.display()))?,
    );
    let count = prepare_split(reader, writer, split)
        .with_context(|| format!("failed to prepare {}", input.display()))?;
    info!(split, records = count, output = %output.display(), "wrote split");
    Ok(count)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let loaded = load_config()?;
    logging::init_logging(&loaded.config.log)?;
    loaded.report_warnings();

    let local_dir = ConfigLoader::expand_path(&args.local_dir);
    std::fs::create_dir_all(&local_dir)
        .with_context(|| format!("cannot create {}", local_dir.display()))?;

    convert(&args.train, &local_dir.join("train.jsonl"), "train")?;
    convert(&args.test, &local_dir.join("test.jsonl"), "test")?;
    Ok(())
}

//! gsm8k-eval - accuracy of generated responses

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use shardfold_cli::{load_config, logging};
use shardfold_reward::evaluate_responses;

/// Grade generated responses against their reference answers
#[derive(Parser, Debug)]
#[command(name = "gsm8k-eval")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON lines of {"responses", "reward_model": {"ground_truth"}}
    #[arg(long)]
    data_path: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let loaded = load_config()?;
    logging::init_logging(&loaded.config.log)?;
    loaded.report_warnings();

    let file = File::open(&args.data_path)
        .with_context(|| format!("cannot open {}", args.data_path.display()))?;
    let accuracy = evaluate_responses(BufReader::new(file))
        .with_context(|| format!("failed to grade {}", args.data_path.display()))?;

    println!("{accuracy}");
    Ok(())
}

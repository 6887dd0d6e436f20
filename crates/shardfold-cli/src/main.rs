//! shardfold - consolidate a sharded FSDP checkpoint into a Hugging Face model

use anyhow::Result;
use clap::Parser;
use shardfold_cli::{Cli, load_config, logging, run};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = load_config()?;
    logging::init_logging(&loaded.config.log)?;
    loaded.report_warnings();

    run(&cli, &loaded.config)?;
    Ok(())
}

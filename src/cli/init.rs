use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use burn::config::Config;
use clap::Args;

use elastic_nas::config::NasConfig;
use elastic_nas::search::SearchSpace;

#[derive(Args)]
pub struct InitArgs {
    /// Configuration file to create
    #[arg(default_value = "nas.json")]
    pub path: PathBuf,
    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

pub fn cmd_init(args: InitArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        bail!(
            "'{}' already exists (use --force to overwrite)",
            args.path.display()
        );
    }
    let config = NasConfig::example();
    config
        .save(&args.path)
        .with_context(|| format!("cannot write '{}'", args.path.display()))?;

    let space = SearchSpace::from_config(&config.supernet);
    eprintln!("Created {}", args.path.display());
    eprintln!(
        "  {} layers, {} blocks, {} sub-networks",
        config.supernet.layer_count(),
        config.supernet.block_count(),
        space.size()
    );
    Ok(())
}

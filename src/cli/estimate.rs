use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use elastic_nas::cost::{AnalyticalCost, CostBackend};
use elastic_nas::search::{bound_distances, within_bounds, Parametrization, SearchSpace};

use super::{format_metrics, load_config};

#[derive(Args)]
pub struct EstimateArgs {
    /// Run configuration
    #[arg(short, long, default_value = "nas.json")]
    pub config: PathBuf,
    /// JSON parametrization to estimate besides the full and smallest ones
    #[arg(short, long, value_name = "PATH")]
    pub parametrization: Option<PathBuf>,
}

pub fn cmd_estimate(args: EstimateArgs) -> Result<()> {
    let config = load_config(&args.config)?;
    let space = SearchSpace::from_config(&config.supernet);
    let cost = AnalyticalCost::new(config.dataset.sequence_length);

    let mut candidates = vec![
        ("full".to_string(), space.full()),
        ("smallest".to_string(), space.smallest()),
    ];
    if let Some(path) = &args.parametrization {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read '{}'", path.display()))?;
        let p: Parametrization = serde_json::from_str(&text)?;
        space.validate(&p)?;
        candidates.push((path.display().to_string(), p));
    }

    eprintln!("{} cost, {} sub-networks", cost.name(), space.size());
    for (label, p) in &candidates {
        let metrics = cost.estimate(&config.supernet.describe(p)?);
        let fits = within_bounds(&metrics, &config.search.bounds, 1.0);
        eprintln!(
            "  {} [{}]{}: {}",
            label,
            p.fingerprint(),
            if fits { "" } else { " over bounds" },
            format_metrics(&metrics)
        );
        let distances = bound_distances(&metrics, &config.search.bounds);
        if !distances.is_empty() {
            eprintln!("    bound distances: {}", format_metrics(&distances));
        }
    }
    Ok(())
}

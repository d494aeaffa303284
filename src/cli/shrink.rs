use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::Args;

use elastic_nas::shrink::{ProgressiveShrinking, ShrinkSchedule};
use elastic_nas::train::SupervisedFactory;

use super::{datasets, device, format_metrics, load_config, write_json, TrainBackend};

#[derive(Args)]
pub struct ShrinkArgs {
    /// Run configuration
    #[arg(short, long, default_value = "nas.json")]
    pub config: PathBuf,
    /// Checkpoint and report directory (overrides shrink.checkpoint_dir)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn cmd_shrink(args: ShrinkArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    let output = args
        .output
        .or_else(|| config.shrink.checkpoint_dir.clone().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("runs/shrink"));
    config.shrink.checkpoint_dir = Some(output.display().to_string());

    let (train, valid) = datasets(&config)?;
    let device = device();
    let model = config.supernet.init::<TrainBackend>(&device)?;
    let schedule = ShrinkSchedule::for_network(&config.shrink, &model);
    eprintln!(
        "Progressive shrinking: {} steps, {} epochs, checkpoints in {}",
        schedule.steps().len(),
        schedule.total_epochs(),
        output.display()
    );

    let factory =
        SupervisedFactory::<TrainBackend>::new(config.training.clone(), train, valid, device);
    let start = Instant::now();
    let (_, reports) = ProgressiveShrinking::new(&config.shrink, &factory).run(model)?;

    eprintln!();
    for report in &reports {
        eprintln!(
            "  width step {}: {}",
            report.width_step,
            format_metrics(&report.metrics)
        );
    }
    write_json(&output.join("reports.json"), &reports)?;
    eprintln!("Done in {:.1}s", start.elapsed().as_secs_f64());
    Ok(())
}

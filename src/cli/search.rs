use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Result};
use burn::backend::wgpu::Wgpu;
use burn::backend::Autodiff;
use burn::tensor::backend::AutodiffBackend;
use clap::Args;

use elastic_nas::checkpoint::CheckpointTag;
use elastic_nas::cost::AnalyticalCost;
use elastic_nas::config::NasConfig;
use elastic_nas::search::{
    resume_search, AgingEvolution, AgingEvolutionSearch, EvaluationPool, HistoryFile,
    SearchSpace, TrainingEvaluator,
};

use super::{datasets, device, format_metrics, gpu_devices, load_config, TrainBackend};

#[derive(Args)]
pub struct SearchArgs {
    /// Run configuration
    #[arg(short, long, default_value = "nas.json")]
    pub config: PathBuf,
    /// History and per-candidate output directory
    #[arg(short, long, default_value = "runs/search")]
    pub output: PathBuf,
    /// Continue the history already in the output directory
    #[arg(long)]
    pub resume: bool,
    /// Shrinking checkpoint directory to start candidates from
    #[arg(long, value_name = "DIR")]
    pub weights: Option<PathBuf>,
    /// Override search.budget
    #[arg(long)]
    pub budget: Option<usize>,
    /// Override search.n_jobs
    #[arg(short = 'j', long)]
    pub n_jobs: Option<usize>,
    /// Evaluate on this many discrete GPUs, round-robin (0 = CPU)
    #[arg(long, default_value_t = 0)]
    pub gpus: usize,
}

pub fn cmd_search(args: SearchArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(budget) = args.budget {
        config.search.budget = budget;
    }
    if let Some(n_jobs) = args.n_jobs {
        config.search.n_jobs = n_jobs;
    }

    let history_file = HistoryFile::new(args.output.join("history.jsonl"));
    if history_file.path().exists() && !args.resume {
        bail!(
            "'{}' exists (use --resume to continue it)",
            history_file.path().display()
        );
    }

    if args.gpus > 0 {
        run_search::<Autodiff<Wgpu>>(&args, &config, history_file, gpu_devices(args.gpus))
    } else {
        run_search::<TrainBackend>(&args, &config, history_file, vec![device()])
    }
}

fn run_search<B: AutodiffBackend>(
    args: &SearchArgs,
    config: &NasConfig,
    history_file: HistoryFile,
    devices: Vec<B::Device>,
) -> Result<()> {
    let (train, valid) = datasets(config)?;
    let mut evaluator = TrainingEvaluator::<B>::new(
        config.supernet.clone(),
        config.training.clone(),
        config.search.epochs,
        train,
        valid,
    );
    if let Some(dir) = args.weights.clone() {
        let last = config.supernet.width_multipliers.len().saturating_sub(1);
        evaluator = evaluator.with_weights(dir, CheckpointTag::WidthStep(last));
    }

    // a failed candidate must lose on everything selection looks at
    let failure_keys: BTreeSet<String> = config
        .search
        .objectives
        .iter()
        .chain(config.search.bounds.keys())
        .cloned()
        .collect();
    let pool = EvaluationPool::new(
        config.search.n_jobs,
        devices,
        config.search.seed,
        args.output.join("tasks"),
    )?
    .with_failure_keys(failure_keys.into_iter().collect());

    let cost = AnalyticalCost::new(config.dataset.sequence_length);
    let space = SearchSpace::from_config(&config.supernet);
    eprintln!(
        "Aging evolution over {} sub-networks: budget {}, {} jobs on {}",
        space.size(),
        config.search.budget,
        config.search.n_jobs,
        if args.gpus > 0 {
            format!("{} GPU(s)", args.gpus)
        } else {
            "CPU".to_string()
        }
    );
    let optimizer = AgingEvolution::new(space, &config.search);
    let search =
        AgingEvolutionSearch::new(&config.search, &config.supernet, &cost, &evaluator, pool)?;

    let start = Instant::now();
    let history = resume_search(search, optimizer, history_file)?;

    eprintln!();
    eprintln!("Pareto front ({}):", config.search.objectives.join(", "));
    for entry in history.pareto_front(&config.search.objectives) {
        eprintln!(
            "  #{} {} {}",
            entry.index,
            entry.fingerprint,
            format_metrics(&entry.metrics)
        );
    }
    eprintln!(
        "Done: {} candidates in {:.1}s",
        history.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

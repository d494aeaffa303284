//! Generation-synchronous parallel evaluation.
//!
//! Each candidate runs as one task on a dedicated rayon pool with its own
//! output directory, seed and device. A task that errors or panics yields
//! `+inf` for every tracked metric; the generation always completes.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use rayon::prelude::*;
use serde::Serialize;

use super::space::Parametrization;
use crate::cost::NetworkDescription;
use crate::error::{NasError, Result};
use crate::Metrics;

/// One candidate of the current generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    /// History index this candidate will occupy.
    pub index: usize,
    pub parametrization: Parametrization,
    /// Layers the parametrization selects from the super-network.
    pub description: NetworkDescription,
    /// Cost-backend estimate computed while sampling.
    #[serde(with = "super::history::metric_values")]
    pub estimate: Metrics,
}

/// Isolated environment of one evaluation task.
#[derive(Debug, Clone)]
pub struct TaskContext<D> {
    /// Position within the generation.
    pub slot: usize,
    pub device: D,
    pub seed: u64,
    pub output_dir: PathBuf,
}

/// Full train-and-validate run of one candidate.
pub trait Evaluator<D>: Sync {
    fn evaluate(&self, candidate: &Candidate, ctx: &TaskContext<D>) -> Result<Metrics>;
}

/// Seed of the task evaluating history entry `index`.
pub fn task_seed(base_seed: u64, index: usize) -> u64 {
    // splitmix64 finaliser
    let mut z = base_seed.wrapping_add((index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Serialize)]
struct TaskConfig<'a> {
    index: usize,
    seed: u64,
    parametrization: &'a Parametrization,
    flat: BTreeMap<String, usize>,
    network: &'a NetworkDescription,
    #[serde(with = "super::history::metric_values")]
    estimate: Metrics,
}

#[derive(Serialize)]
struct TaskMetrics {
    index: usize,
    failed: bool,
    #[serde(with = "super::history::metric_values")]
    metrics: Metrics,
}

pub struct EvaluationPool<D> {
    pool: rayon::ThreadPool,
    n_jobs: usize,
    devices: Vec<D>,
    base_seed: u64,
    output_root: PathBuf,
    failure_keys: Vec<String>,
}

impl<D: Clone + Send + Sync> EvaluationPool<D> {
    pub fn new(n_jobs: usize, devices: Vec<D>, base_seed: u64, output_root: PathBuf) -> Result<Self> {
        if n_jobs == 0 {
            return Err(NasError::Pool("n_jobs must be at least 1".into()));
        }
        if devices.is_empty() {
            return Err(NasError::Pool("no devices to assign".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_jobs)
            .thread_name(|i| format!("nas-eval-{}", i))
            .build()
            .map_err(|e| NasError::Pool(e.to_string()))?;
        Ok(Self {
            pool,
            n_jobs,
            devices,
            base_seed,
            output_root,
            failure_keys: vec!["val_error".to_string()],
        })
    }

    /// Metric names set to `+inf` when a task fails.
    pub fn with_failure_keys(mut self, keys: Vec<String>) -> Self {
        self.failure_keys = keys;
        self
    }

    pub fn n_jobs(&self) -> usize {
        self.n_jobs
    }

    /// Run every candidate; blocks until all finish. Results are in
    /// candidate order.
    pub fn evaluate_all<E: Evaluator<D>>(&self, evaluator: &E, candidates: &[Candidate]) -> Vec<Metrics> {
        self.pool.install(|| {
            candidates
                .par_iter()
                .enumerate()
                .map(|(slot, candidate)| self.run_task(evaluator, slot, candidate))
                .collect()
        })
    }

    fn context(&self, slot: usize, candidate: &Candidate) -> TaskContext<D> {
        TaskContext {
            slot,
            device: self.devices[slot % self.devices.len()].clone(),
            seed: task_seed(self.base_seed, candidate.index),
            output_dir: self.output_root.join(format!("{:06}", candidate.index)),
        }
    }

    fn run_task<E: Evaluator<D>>(&self, evaluator: &E, slot: usize, candidate: &Candidate) -> Metrics {
        let ctx = self.context(slot, candidate);
        if let Err(e) = write_task_config(&ctx, candidate) {
            warn!("candidate {}: cannot write task config: {}", candidate.index, e);
        }

        let outcome = match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(candidate, &ctx))) {
            Ok(Ok(metrics)) => Ok(metrics),
            Ok(Err(e)) => Err(e.to_string()),
            Err(panic) => Err(panic_message(panic.as_ref())),
        };
        let (metrics, failed) = match outcome {
            Ok(metrics) => {
                info!("candidate {} finished on slot {}", candidate.index, slot);
                (metrics, false)
            }
            Err(message) => {
                error!("candidate {} failed: {}", candidate.index, message);
                (self.failure_metrics(), true)
            }
        };

        let report = TaskMetrics {
            index: candidate.index,
            failed,
            metrics: metrics.clone(),
        };
        if let Err(e) = write_json(&ctx.output_dir.join("metrics.json"), &report) {
            warn!("candidate {}: cannot write metrics: {}", candidate.index, e);
        }
        metrics
    }

    fn failure_metrics(&self) -> Metrics {
        self.failure_keys
            .iter()
            .map(|k| (k.clone(), f64::INFINITY))
            .collect()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic".to_string()
    }
}

fn write_task_config<D>(ctx: &TaskContext<D>, candidate: &Candidate) -> Result<()> {
    let config = TaskConfig {
        index: candidate.index,
        seed: ctx.seed,
        parametrization: &candidate.parametrization,
        flat: candidate.parametrization.flatten(),
        network: &candidate.description,
        estimate: candidate.estimate.clone(),
    };
    write_json(&ctx.output_dir.join("config.json"), &config)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::LayerShape;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn candidate(index: usize) -> Candidate {
        Candidate {
            index,
            parametrization: Parametrization {
                kernel_index: vec![index % 3],
                width_index: vec![],
                depth: vec![1],
            },
            description: NetworkDescription {
                layers: vec![LayerShape::Pool { channels: 4 }],
            },
            estimate: Metrics::new(),
        }
    }

    struct Echo {
        calls: AtomicUsize,
        seen: Mutex<Vec<(usize, &'static str, u64)>>,
    }

    impl Evaluator<&'static str> for Echo {
        fn evaluate(&self, candidate: &Candidate, ctx: &TaskContext<&'static str>) -> Result<Metrics> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push((ctx.slot, ctx.device, ctx.seed));
            match candidate.index {
                1 => Err(NasError::Training("diverged".into())),
                2 => panic!("out of memory"),
                i => Ok([("val_error".to_string(), i as f64 / 10.0)].into_iter().collect()),
            }
        }
    }

    #[test_log::test]
    fn failures_become_infinite_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let pool = EvaluationPool::new(2, vec!["gpu0", "gpu1"], 7, dir.path().to_path_buf())
            .unwrap()
            .with_failure_keys(vec!["val_error".into(), "macs".into()]);
        let evaluator = Echo {
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        };
        let candidates: Vec<Candidate> = (0..4).map(candidate).collect();
        let results = pool.evaluate_all(&evaluator, &candidates);

        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 4);
        assert_eq!(results.len(), 4);
        assert_eq!(results[0]["val_error"], 0.0);
        assert_eq!(results[3]["val_error"], 0.3);
        for failed in &results[1..3] {
            assert!(failed["val_error"].is_infinite());
            assert!(failed["macs"].is_infinite());
        }

        let seen = evaluator.seen.lock().unwrap();
        for &(slot, device, seed) in seen.iter() {
            assert_eq!(device, ["gpu0", "gpu1"][slot % 2]);
            assert_eq!(seed, task_seed(7, slot));
        }
        let config = std::fs::read_to_string(dir.path().join("000002").join("config.json")).unwrap();
        let config: serde_json::Value = serde_json::from_str(&config).unwrap();
        assert_eq!(config["index"], 2);
        assert_eq!(config["network"]["layers"].as_array().unwrap().len(), 1);
        assert_eq!(config["flat"]["layers.0.kernel_index"], 2);
        let written = std::fs::read_to_string(dir.path().join("000001").join("metrics.json")).unwrap();
        assert!(written.contains("\"inf\""));
    }

    #[test]
    fn seeds_differ_per_task() {
        assert_ne!(task_seed(1, 0), task_seed(1, 1));
        assert_ne!(task_seed(1, 0), task_seed(2, 0));
        assert_eq!(task_seed(3, 4), task_seed(3, 4));
    }

    #[test]
    fn rejects_empty_pool() {
        assert!(EvaluationPool::<u8>::new(0, vec![0], 0, PathBuf::new()).is_err());
        assert!(EvaluationPool::<u8>::new(1, vec![], 0, PathBuf::new()).is_err());
    }
}

//! Generation loop tying the optimizer, cost estimate and worker pool
//! together.
//!
//! Each generation presamples up to `n_jobs` candidates that fit the
//! bounds, evaluates them in parallel and records the results in order.
//! The last generation is shortened so the history ends at exactly
//! `budget` entries.

use std::collections::BTreeMap;

use log::{debug, info};

use super::aging::AgingEvolution;
use super::history::{History, HistoryFile};
use super::pool::{Candidate, EvaluationPool, Evaluator};
use super::space::Parametrization;
use crate::config::{SearchConfig, SuperNetConfig};
use crate::cost::{CostBackend, NetworkDescription};
use crate::error::{NasError, Result};
use crate::supernet::NetworkLayout;
use crate::Metrics;

/// Ratio of each bounded metric in `estimate` to its bound. Metrics the
/// estimate does not report are skipped.
pub fn bound_distances(estimate: &Metrics, bounds: &BTreeMap<String, f64>) -> BTreeMap<String, f64> {
    bounds
        .iter()
        .filter_map(|(name, &bound)| estimate.get(name).map(|&v| (name.clone(), v / bound)))
        .collect()
}

/// Every bounded metric is at most `slack` times its bound.
pub fn within_bounds(estimate: &Metrics, bounds: &BTreeMap<String, f64>, slack: f64) -> bool {
    bound_distances(estimate, bounds)
        .values()
        .all(|&d| d <= slack)
}

pub struct AgingEvolutionSearch<'a, C, E, D> {
    config: &'a SearchConfig,
    layout: NetworkLayout,
    cost: &'a C,
    evaluator: &'a E,
    pool: EvaluationPool<D>,
    history_file: Option<HistoryFile>,
}

impl<'a, C, E, D> AgingEvolutionSearch<'a, C, E, D>
where
    C: CostBackend,
    E: Evaluator<D>,
    D: Clone + Send + Sync,
{
    pub fn new(
        config: &'a SearchConfig,
        supernet: &SuperNetConfig,
        cost: &'a C,
        evaluator: &'a E,
        pool: EvaluationPool<D>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = NetworkLayout::from_config(supernet)?;
        Ok(Self {
            config,
            layout,
            cost,
            evaluator,
            pool,
            history_file: None,
        })
    }

    /// Append every finished generation to `file`.
    pub fn with_history_file(mut self, file: HistoryFile) -> Self {
        self.history_file = Some(file);
        self
    }

    /// Evaluate candidates until the history holds `budget` entries.
    pub fn run(&self, optimizer: &mut AgingEvolution) -> Result<()> {
        let budget = self.config.budget;
        if optimizer.history().len() >= budget {
            info!(
                "history already holds {} of {} candidates",
                optimizer.history().len(),
                budget
            );
            return Ok(());
        }

        let mut generation = 0;
        while optimizer.history().len() < budget {
            let start = optimizer.history().len();
            let size = self.pool.n_jobs().min(budget - start);
            let worklist = self.sample_generation(optimizer, start, size)?;

            let results = self.pool.evaluate_all(self.evaluator, &worklist);
            for (candidate, full) in worklist.into_iter().zip(results) {
                let mut metrics = candidate.estimate;
                metrics.extend(full);
                optimizer.tell_result(candidate.parametrization, metrics);
            }

            let recorded = &optimizer.history().entries()[start..];
            if let Some(file) = &self.history_file {
                file.append(recorded)?;
            }
            generation += 1;
            info!(
                "generation {}: {} candidates, {}/{} evaluated",
                generation,
                recorded.len(),
                optimizer.history().len(),
                budget
            );
        }
        Ok(())
    }

    fn sample_generation(
        &self,
        optimizer: &mut AgingEvolution,
        start: usize,
        size: usize,
    ) -> Result<Vec<Candidate>> {
        let mut worklist = Vec::with_capacity(size);
        while worklist.len() < size {
            let (parametrization, description, estimate) = self.sample_candidate(optimizer)?;
            worklist.push(Candidate {
                index: start + worklist.len(),
                parametrization,
                description,
                estimate,
            });
        }
        Ok(worklist)
    }

    fn sample_candidate(
        &self,
        optimizer: &mut AgingEvolution,
    ) -> Result<(Parametrization, NetworkDescription, Metrics)> {
        let attempts = self.config.max_presample_attempts.max(1);
        for attempt in 1..=attempts {
            let parametrization = optimizer.next_parameters();
            let description = NetworkDescription::from_layout(&self.layout, &parametrization);
            let estimate = self.cost.estimate(&description);
            let distances = bound_distances(&estimate, &self.config.bounds);

            if !self.config.presample
                || within_bounds(&estimate, &self.config.bounds, self.config.presample_slack)
            {
                info!(
                    "sampled {} after {} attempt(s), bound distances {:?}",
                    parametrization.fingerprint(),
                    attempt,
                    distances
                );
                return Ok((parametrization, description, estimate));
            }
            debug!("rejected {}: {:?}", parametrization.fingerprint(), distances);
        }
        Err(NasError::PresampleExhausted { attempts })
    }
}

/// Load a previous history from `file` (if any) and continue the search
/// until `budget` candidates have been evaluated.
pub fn resume_search<C, E, D>(
    search: AgingEvolutionSearch<'_, C, E, D>,
    optimizer: AgingEvolution,
    file: HistoryFile,
) -> Result<History>
where
    C: CostBackend,
    E: Evaluator<D>,
    D: Clone + Send + Sync,
{
    let previous = file.load()?;
    if !previous.is_empty() {
        info!("resuming from {} entries in {}", previous.len(), file.path().display());
    }
    let mut optimizer = optimizer.with_history(previous);
    search.with_history_file(file).run(&mut optimizer)?;
    Ok(optimizer.history().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;
    use crate::search::pool::TaskContext;
    use crate::search::SearchSpace;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reports a constant `macs` estimate.
    struct FixedCost(f64);

    impl CostBackend for FixedCost {
        fn estimate(&self, _description: &NetworkDescription) -> Metrics {
            [("macs".to_string(), self.0)].into_iter().collect()
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct CountingEvaluator {
        calls: AtomicUsize,
        fail: bool,
    }

    impl Evaluator<()> for CountingEvaluator {
        fn evaluate(&self, candidate: &Candidate, _ctx: &TaskContext<()>) -> Result<Metrics> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(NasError::Evaluation("boom".into()));
            }
            Ok([("val_error".to_string(), candidate.index as f64 * 0.25)]
                .into_iter()
                .collect())
        }
    }

    fn supernet() -> SuperNetConfig {
        SuperNetConfig::new(1, 2, vec![StageConfig::new(4, 2), StageConfig::new(4, 2)])
            .with_stem_channels(4)
            .with_kernel_sizes(vec![5, 3])
    }

    fn bounded(budget: usize, n_jobs: usize) -> SearchConfig {
        SearchConfig::new()
            .with_budget(budget)
            .with_n_jobs(n_jobs)
            .with_population_size(4)
            .with_sample_size(2)
            .with_max_presample_attempts(20)
            .with_bounds([("macs".to_string(), 1000.0)].into_iter().collect())
    }

    fn evaluator(fail: bool) -> CountingEvaluator {
        CountingEvaluator {
            calls: AtomicUsize::new(0),
            fail,
        }
    }

    fn optimizer(config: &SearchConfig) -> AgingEvolution {
        AgingEvolution::new(SearchSpace::from_config(&supernet()), config)
    }

    #[test]
    fn distances_are_ratios_to_bounds() {
        let bounds: BTreeMap<String, f64> = [("macs".to_string(), 1000.0)].into_iter().collect();
        let estimate: Metrics = [("macs".to_string(), 1150.0), ("weights".to_string(), 5.0)]
            .into_iter()
            .collect();
        let distances = bound_distances(&estimate, &bounds);
        assert_eq!(distances.len(), 1);
        assert!((distances["macs"] - 1.15).abs() < 1e-12);
        assert!(within_bounds(&estimate, &bounds, 1.2));
        assert!(!within_bounds(&estimate, &bounds, 1.1));
    }

    #[test_log::test]
    fn budget_is_met_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let config = bounded(7, 3);
        let cost = FixedCost(1150.0);
        let eval = evaluator(false);
        let pool = EvaluationPool::new(3, vec![()], 1, dir.path().to_path_buf()).unwrap();
        let search = AgingEvolutionSearch::new(&config, &supernet(), &cost, &eval, pool).unwrap();

        let mut evo = optimizer(&config);
        search.run(&mut evo).unwrap();
        assert_eq!(evo.history().len(), 7);
        assert_eq!(eval.calls.load(Ordering::SeqCst), 7);
        for entry in evo.history().entries() {
            evo.space().validate(&entry.parametrization).unwrap();
        }

        let entry = &evo.history().entries()[4];
        assert_eq!(entry.index, 4);
        assert_eq!(entry.metrics["macs"], 1150.0);
        assert_eq!(entry.metrics["val_error"], 1.0);
    }

    #[test]
    fn over_budget_candidates_exhaust_presampling() {
        let dir = tempfile::tempdir().unwrap();
        let config = bounded(2, 1);
        let cost = FixedCost(1300.0);
        let eval = evaluator(false);
        let pool = EvaluationPool::new(1, vec![()], 1, dir.path().to_path_buf()).unwrap();
        let search = AgingEvolutionSearch::new(&config, &supernet(), &cost, &eval, pool).unwrap();

        let result = search.run(&mut optimizer(&config));
        assert!(matches!(result, Err(NasError::PresampleExhausted { attempts: 20 })));
        assert_eq!(eval.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn presampling_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = bounded(2, 2).with_presample(false);
        let cost = FixedCost(1300.0);
        let eval = evaluator(false);
        let pool = EvaluationPool::new(2, vec![()], 1, dir.path().to_path_buf()).unwrap();
        let search = AgingEvolutionSearch::new(&config, &supernet(), &cost, &eval, pool).unwrap();

        let mut evo = optimizer(&config);
        search.run(&mut evo).unwrap();
        assert_eq!(evo.history().len(), 2);
    }

    #[test]
    fn failed_evaluations_score_infinity() {
        let dir = tempfile::tempdir().unwrap();
        let config = bounded(2, 2);
        let cost = FixedCost(900.0);
        let eval = evaluator(true);
        let pool = EvaluationPool::new(2, vec![()], 1, dir.path().to_path_buf())
            .unwrap()
            .with_failure_keys(vec!["val_error".into(), "macs".into()]);
        let search = AgingEvolutionSearch::new(&config, &supernet(), &cost, &eval, pool).unwrap();

        let mut evo = optimizer(&config);
        search.run(&mut evo).unwrap();
        for entry in evo.history().entries() {
            assert!(entry.metric("val_error").is_infinite());
            assert!(entry.metric("macs").is_infinite());
        }
    }

    #[test]
    fn resume_continues_from_the_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = HistoryFile::new(dir.path().join("history.jsonl"));
        let cost = FixedCost(900.0);

        let first = bounded(3, 2);
        let eval = evaluator(false);
        let pool = EvaluationPool::new(2, vec![()], 1, dir.path().join("tasks")).unwrap();
        let search = AgingEvolutionSearch::new(&first, &supernet(), &cost, &eval, pool).unwrap();
        let history = resume_search(search, optimizer(&first), file.clone()).unwrap();
        assert_eq!(history.len(), 3);

        let second = bounded(5, 2);
        let eval = evaluator(false);
        let pool = EvaluationPool::new(2, vec![()], 1, dir.path().join("tasks")).unwrap();
        let search = AgingEvolutionSearch::new(&second, &supernet(), &cost, &eval, pool).unwrap();
        let history = resume_search(search, optimizer(&second), file.clone()).unwrap();

        assert_eq!(history.len(), 5);
        assert_eq!(eval.calls.load(Ordering::SeqCst), 2);
        assert_eq!(file.load().unwrap(), history);
    }

    #[test]
    fn resumed_search_does_not_reevaluate_earlier_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let file = HistoryFile::new(dir.path().join("history.jsonl"));
        let cost = FixedCost(900.0);

        let first = bounded(4, 2).with_population_size(10);
        let eval = evaluator(false);
        let pool = EvaluationPool::new(2, vec![()], 1, dir.path().join("tasks")).unwrap();
        let search = AgingEvolutionSearch::new(&first, &supernet(), &cost, &eval, pool).unwrap();
        resume_search(search, optimizer(&first), file.clone()).unwrap();

        let second = bounded(8, 2).with_population_size(10);
        let eval = evaluator(false);
        let pool = EvaluationPool::new(2, vec![()], 1, dir.path().join("tasks")).unwrap();
        let search = AgingEvolutionSearch::new(&second, &supernet(), &cost, &eval, pool).unwrap();
        let history = resume_search(search, optimizer(&second), file).unwrap();

        assert_eq!(history.len(), 8);
        let fingerprints: BTreeSet<String> = history
            .entries()
            .iter()
            .map(|e| e.parametrization.fingerprint())
            .collect();
        assert_eq!(fingerprints.len(), 8);
    }
}

//! Aging evolution over super-network parametrizations.
//!
//! Until the history holds `population_size` entries, candidates are
//! drawn uniformly. Afterwards a tournament of `sample_size` entries from
//! the most recent `population_size` picks a parent, and its child differs
//! in exactly one choice. Old entries age out of the window no matter how
//! good they were.

use std::collections::BTreeMap;

use log::debug;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::history::{History, HistoryEntry};
use super::pool::task_seed;
use super::space::{Parametrization, SearchSpace};
use crate::config::SearchConfig;
use crate::Metrics;

/// Added per unit of relative bound violation during selection.
pub const BOUND_PENALTY: f64 = 10.0;

pub struct AgingEvolution {
    space: SearchSpace,
    population_size: usize,
    sample_size: usize,
    objectives: Vec<String>,
    bounds: BTreeMap<String, f64>,
    history: History,
    seed: u64,
    rng: Xoshiro256PlusPlus,
}

impl AgingEvolution {
    pub fn new(space: SearchSpace, config: &SearchConfig) -> Self {
        Self::with_rng(space, config, Xoshiro256PlusPlus::seed_from_u64(config.seed))
    }

    /// Use an explicit random source.
    pub fn with_rng(space: SearchSpace, config: &SearchConfig, rng: Xoshiro256PlusPlus) -> Self {
        Self {
            space,
            population_size: config.population_size.max(1),
            sample_size: config.sample_size.max(1),
            objectives: config.objectives.clone(),
            bounds: config.bounds.clone(),
            history: History::new(),
            seed: config.seed,
            rng,
        }
    }

    /// Continue from a previously recorded history.
    ///
    /// The random source restarts from a stream keyed by the history
    /// length, so a resumed run does not replay the proposals that
    /// produced the loaded entries.
    pub fn with_history(mut self, history: History) -> Self {
        if !history.is_empty() {
            self.rng = Xoshiro256PlusPlus::seed_from_u64(task_seed(self.seed, history.len()));
        }
        self.history = history;
        self
    }

    pub fn space(&self) -> &SearchSpace {
        &self.space
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn bounds(&self) -> &BTreeMap<String, f64> {
        &self.bounds
    }

    pub fn objectives(&self) -> &[String] {
        &self.objectives
    }

    /// Propose the next candidate.
    pub fn next_parameters(&mut self) -> Parametrization {
        if self.history.len() < self.population_size {
            return self.space.sample(&mut self.rng);
        }
        let parent = self.select_parent();
        self.space.mutate(&parent, &mut self.rng)
    }

    /// Record an evaluated candidate.
    pub fn tell_result(&mut self, parametrization: Parametrization, metrics: Metrics) -> &HistoryEntry {
        self.history.push(parametrization, metrics)
    }

    fn select_parent(&mut self) -> Parametrization {
        let population = self.history.population(self.population_size);
        let tournament: Vec<&HistoryEntry> = population
            .choose_multiple(&mut self.rng, self.sample_size.min(population.len()))
            .collect();
        let weights = random_weights(&mut self.rng, self.objectives.len());

        let mut best: Option<(f64, &HistoryEntry)> = None;
        for entry in tournament {
            let score = scalarize(&entry.metrics, &self.objectives, &weights, &self.bounds);
            let better = match best {
                None => true,
                Some((s, b)) => score < s || (score == s && entry.index < b.index),
            };
            if better {
                best = Some((score, entry));
            }
        }
        match best {
            Some((score, entry)) => {
                debug!("parent {} (score {:.4})", entry.index, score);
                entry.parametrization.clone()
            }
            None => self.space.full(),
        }
    }
}

/// Positive weights summing to one.
fn random_weights<R: Rng>(rng: &mut R, n: usize) -> Vec<f64> {
    let raw: Vec<f64> = (0..n).map(|_| rng.gen_range(1e-3..1.0)).collect();
    let sum: f64 = raw.iter().sum();
    raw.into_iter().map(|w| w / sum).collect()
}

/// Weighted sum of objectives plus [`BOUND_PENALTY`] times the relative
/// violation of each bound. Missing or non-finite values score `+inf`.
pub fn scalarize(
    metrics: &Metrics,
    objectives: &[String],
    weights: &[f64],
    bounds: &BTreeMap<String, f64>,
) -> f64 {
    let mut score = 0.0;
    for (objective, weight) in objectives.iter().zip(weights) {
        match metrics.get(objective) {
            Some(&v) if v.is_finite() => score += weight * v,
            _ => return f64::INFINITY,
        }
    }
    for (name, &bound) in bounds {
        match metrics.get(name) {
            Some(&v) if v.is_finite() => score += BOUND_PENALTY * (v / bound - 1.0).max(0.0),
            Some(_) => return f64::INFINITY,
            None => {}
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StageConfig, SuperNetConfig};

    fn space() -> SearchSpace {
        SearchSpace::from_config(&SuperNetConfig::new(
            1,
            2,
            vec![StageConfig::new(4, 2), StageConfig::new(8, 2)],
        ))
    }

    fn error(v: f64) -> Metrics {
        [("val_error".to_string(), v)].into_iter().collect()
    }

    #[test]
    fn samples_randomly_until_population_is_full() {
        let config = SearchConfig::new().with_population_size(3).with_seed(11);
        let mut a = AgingEvolution::new(space(), &config);
        let mut b = AgingEvolution::new(space(), &config);
        for _ in 0..3 {
            let p = a.next_parameters();
            assert_eq!(p, b.next_parameters());
            a.space().validate(&p).unwrap();
            a.tell_result(p, error(0.5));
        }
        assert_eq!(a.history().len(), 3);
    }

    #[test]
    fn children_mutate_a_member_of_the_window() {
        let config = SearchConfig::new()
            .with_population_size(4)
            .with_sample_size(4)
            .with_seed(5);
        let mut evo = AgingEvolution::new(space(), &config);
        for i in 0..6 {
            let p = evo.next_parameters();
            evo.tell_result(p, error(i as f64));
        }
        // window = entries 2..6; the tournament covers all of it
        let parent = evo.history().entries()[2].parametrization.clone();
        let child = evo.next_parameters();
        let diff = parent
            .flatten()
            .into_iter()
            .zip(child.flatten())
            .filter(|(a, b)| a.1 != b.1)
            .count();
        assert_eq!(diff, 1);
    }

    #[test]
    fn resumed_history_does_not_replay_earlier_proposals() {
        let config = SearchConfig::new().with_population_size(10).with_seed(7);
        let mut first = AgingEvolution::new(space(), &config);
        for _ in 0..4 {
            let p = first.next_parameters();
            first.tell_result(p, error(0.5));
        }
        let earlier: Vec<Parametrization> = first
            .history()
            .entries()
            .iter()
            .map(|e| e.parametrization.clone())
            .collect();

        let mut resumed = AgingEvolution::new(space(), &config).with_history(first.history().clone());
        let mut fresh = AgingEvolution::new(space(), &config);
        let replayed: Vec<Parametrization> = (0..4).map(|_| fresh.next_parameters()).collect();
        let proposed: Vec<Parametrization> = (0..4).map(|_| resumed.next_parameters()).collect();
        assert_eq!(replayed, earlier);
        assert_ne!(proposed, earlier);
        assert_eq!(resumed.history().len(), 4);
    }

    #[test]
    fn scalarization_penalises_bound_violations() {
        let objectives = vec!["val_error".to_string()];
        let bounds: BTreeMap<String, f64> = [("macs".to_string(), 1000.0)].into_iter().collect();
        let mut within = error(0.3);
        within.insert("macs".into(), 900.0);
        let mut over = error(0.1);
        over.insert("macs".into(), 1500.0);
        let s_within = scalarize(&within, &objectives, &[1.0], &bounds);
        let s_over = scalarize(&over, &objectives, &[1.0], &bounds);
        assert!((s_within - 0.3).abs() < 1e-12);
        assert!((s_over - (0.1 + BOUND_PENALTY * 0.5)).abs() < 1e-12);
        assert!(scalarize(&error(f64::INFINITY), &objectives, &[1.0], &bounds).is_infinite());
    }

    #[test]
    fn weights_are_a_distribution() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let w = random_weights(&mut rng, 3);
        assert!((w.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(w.iter().all(|&x| x > 0.0));
    }
}

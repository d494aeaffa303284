//! Candidate evaluation by training the selected sub-network.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Arc;

use burn::tensor::backend::AutodiffBackend;
use log::debug;

use super::pool::{Candidate, Evaluator, TaskContext};
use crate::checkpoint::{load_checkpoint, CheckpointTag};
use crate::config::SuperNetConfig;
use crate::error::Result;
use crate::train::{Dataset, StageTrainer, SupervisedTrainer, TrainingConfig};
use crate::Metrics;

/// Builds the super-network on the task's device, selects the candidate,
/// trains it for a fixed number of epochs and validates it.
pub struct TrainingEvaluator<B: AutodiffBackend> {
    supernet: SuperNetConfig,
    training: TrainingConfig,
    epochs: usize,
    train: Arc<Dataset>,
    valid: Arc<Dataset>,
    /// Start from shrunk super-network weights instead of a fresh init.
    weights: Option<(PathBuf, CheckpointTag)>,
    _backend: PhantomData<fn() -> B>,
}

impl<B: AutodiffBackend> TrainingEvaluator<B> {
    pub fn new(
        supernet: SuperNetConfig,
        training: TrainingConfig,
        epochs: usize,
        train: Arc<Dataset>,
        valid: Arc<Dataset>,
    ) -> Self {
        Self {
            supernet,
            training,
            epochs,
            train,
            valid,
            weights: None,
            _backend: PhantomData,
        }
    }

    pub fn with_weights(mut self, dir: PathBuf, tag: CheckpointTag) -> Self {
        self.weights = Some((dir, tag));
        self
    }
}

impl<B: AutodiffBackend> Evaluator<B::Device> for TrainingEvaluator<B> {
    fn evaluate(&self, candidate: &Candidate, ctx: &TaskContext<B::Device>) -> Result<Metrics> {
        let mut model = self.supernet.clone().with_seed(ctx.seed).init::<B>(&ctx.device)?;
        if let Some((dir, tag)) = &self.weights {
            model = match load_checkpoint(model.clone(), dir, *tag, &ctx.device)? {
                Some(loaded) => loaded,
                None => {
                    debug!("no checkpoint {:?} in {}, training from scratch", tag, dir.display());
                    model
                }
            };
        }
        model.apply_parametrization(&candidate.parametrization)?;

        let mut trainer = SupervisedTrainer::<B>::new(
            self.training.clone().with_seed(ctx.seed),
            self.epochs,
            self.train.clone(),
            self.valid.clone(),
            ctx.device.clone(),
        );
        let model = trainer.fit(model)?;
        let mut metrics = trainer.validate(&model)?;
        metrics.insert("epochs".into(), self.epochs as f64);
        Ok(metrics)
    }
}

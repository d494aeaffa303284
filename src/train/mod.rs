//! Training seams used by progressive shrinking and candidate evaluation.
//!
//! A [`TrainerFactory`] hands out one [`StageTrainer`] per stage with the
//! stage's epoch budget. Trainers own no model; weights move in and out
//! of `fit`.

pub mod data;
pub mod supervised;

use burn::prelude::Backend;

use crate::error::Result;
use crate::supernet::ElasticSuperNet;
use crate::Metrics;

pub use data::{Batch, Dataset, DatasetConfig, SyntheticDataset};
pub use supervised::{cosine_lr, SupervisedFactory, SupervisedTrainer, TrainingConfig};

pub trait StageTrainer<B: Backend> {
    /// Train the network in its current elastic configuration.
    fn fit(&mut self, model: ElasticSuperNet<B>) -> Result<ElasticSuperNet<B>>;

    /// Validation metrics of the current configuration. Lower is better.
    fn validate(&self, model: &ElasticSuperNet<B>) -> Result<Metrics>;
}

pub trait TrainerFactory<B: Backend> {
    type Trainer: StageTrainer<B>;

    /// A trainer limited to `max_epochs`.
    fn build(&self, max_epochs: usize) -> Result<Self::Trainer>;
}

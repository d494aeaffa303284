//! Supervised classification training for the elastic super-network.
//!
//! AdamW with gradient-norm clipping and cosine learning-rate decay.
//! Every `fit` starts a fresh optimizer; only the weights carry over.

use std::sync::Arc;

use burn::config::Config;
use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::activation;
use burn::tensor::backend::AutodiffBackend;
use log::{debug, info};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use super::data::{Batch, Dataset};
use super::{StageTrainer, TrainerFactory};
use crate::error::NasError;
use crate::supernet::ElasticSuperNet;
use crate::Metrics;

/// Optimiser settings shared by every training stage.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Initial learning rate.
    #[config(default = 1e-3)]
    pub lr: f64,
    /// Cosine decay target.
    #[config(default = 1e-5)]
    pub lr_min: f64,
    #[config(default = 0.01)]
    pub weight_decay: f64,
    /// Gradient clipping norm.
    #[config(default = 1.0)]
    pub grad_clip: f32,
    #[config(default = 32)]
    pub batch_size: usize,
    /// Seed for batch shuffling.
    #[config(default = 0)]
    pub seed: u64,
}

/// Cosine annealing learning rate: lr_min + 0.5*(lr - lr_min)*(1 + cos(pi*t/T))
pub fn cosine_lr(config: &TrainingConfig, epoch: usize, total_epochs: usize) -> f64 {
    if total_epochs <= 1 {
        return config.lr;
    }
    let t = epoch as f64 / total_epochs as f64;
    config.lr_min + 0.5 * (config.lr - config.lr_min) * (1.0 + (std::f64::consts::PI * t).cos())
}

/// Result of one training epoch.
pub struct EpochResult {
    pub avg_loss: f32,
    pub num_batches: usize,
}

/// Mean cross-entropy between `[batch, classes]` logits and class targets.
pub fn cross_entropy_loss<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
) -> Tensor<B, 1> {
    let log_probs = activation::log_softmax(logits, 1);
    let selected = log_probs.gather(1, targets.unsqueeze_dim::<2>(1));
    selected.mean().neg().unsqueeze()
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> crate::Result<f32> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| NasError::Training(format!("{:?}", e)))?
        .first()
        .copied()
        .ok_or_else(|| NasError::Training("empty loss tensor".into()))
}

/// Train one epoch over `batches`.
pub fn train_epoch<B: AutodiffBackend>(
    model: ElasticSuperNet<B>,
    batches: Vec<Batch<B>>,
    optimizer: &mut impl Optimizer<ElasticSuperNet<B>, B>,
    lr: f64,
) -> crate::Result<(ElasticSuperNet<B>, EpochResult)> {
    let mut model = model;
    let mut total_loss = 0.0f32;
    let num_batches = batches.len();

    for batch in batches {
        let logits = model.forward(batch.inputs);
        let loss = cross_entropy_loss(logits, batch.targets);
        total_loss += scalar(loss.clone())?;

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        model = optimizer.step(lr, model, grads);
    }

    let avg_loss = if num_batches == 0 {
        0.0
    } else {
        total_loss / num_batches as f32
    };
    if !avg_loss.is_finite() {
        return Err(NasError::Training(format!("loss diverged: {}", avg_loss)));
    }
    Ok((
        model,
        EpochResult {
            avg_loss,
            num_batches,
        },
    ))
}

/// Loss and error rate of `model` on `dataset`, without gradients.
pub fn evaluate<B: Backend>(
    model: &ElasticSuperNet<B>,
    dataset: &Dataset,
    batch_size: usize,
    device: &B::Device,
) -> crate::Result<Metrics> {
    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;
    let mut seen = 0usize;

    for batch in dataset.batches::<B>(batch_size, device) {
        let [n] = batch.targets.dims();
        let logits = model.forward(batch.inputs);
        let predicted = logits.clone().argmax(1).reshape([n]);
        let hits = predicted
            .equal(batch.targets.clone())
            .int()
            .sum()
            .into_data()
            .iter::<i64>()
            .next()
            .unwrap_or(0);
        loss_sum += scalar(cross_entropy_loss(logits, batch.targets))? as f64 * n as f64;
        correct += hits as usize;
        seen += n;
    }

    if seen == 0 {
        return Err(NasError::Training("validation set is empty".into()));
    }
    let accuracy = correct as f64 / seen as f64;
    let mut metrics = Metrics::new();
    metrics.insert("val_loss".into(), loss_sum / seen as f64);
    metrics.insert("val_accuracy".into(), accuracy);
    metrics.insert("val_error".into(), 1.0 - accuracy);
    Ok(metrics)
}

// ─── Stage trainer ────────────────────────────────────────────────

pub struct SupervisedTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    max_epochs: usize,
    train: Arc<Dataset>,
    valid: Arc<Dataset>,
    device: B::Device,
}

impl<B: AutodiffBackend> SupervisedTrainer<B> {
    pub fn new(
        config: TrainingConfig,
        max_epochs: usize,
        train: Arc<Dataset>,
        valid: Arc<Dataset>,
        device: B::Device,
    ) -> Self {
        Self {
            config,
            max_epochs,
            train,
            valid,
            device,
        }
    }

    pub fn max_epochs(&self) -> usize {
        self.max_epochs
    }
}

impl<B: AutodiffBackend> StageTrainer<B> for SupervisedTrainer<B> {
    fn fit(&mut self, model: ElasticSuperNet<B>) -> crate::Result<ElasticSuperNet<B>> {
        let mut optimizer = AdamWConfig::new()
            .with_weight_decay(self.config.weight_decay as f32)
            .with_grad_clipping(Some(GradientClippingConfig::Norm(self.config.grad_clip)))
            .init();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);
        let mut model = model;

        for epoch in 0..self.max_epochs {
            let lr = cosine_lr(&self.config, epoch, self.max_epochs);
            let batches =
                self.train
                    .shuffled_batches::<B, _>(self.config.batch_size, &mut rng, &self.device);
            let (next, result) = train_epoch(model, batches, &mut optimizer, lr)?;
            model = next;
            debug!(
                "epoch {}/{}: loss {:.4} over {} batches (lr {:.2e})",
                epoch + 1,
                self.max_epochs,
                result.avg_loss,
                result.num_batches,
                lr
            );
        }
        Ok(model)
    }

    fn validate(&self, model: &ElasticSuperNet<B>) -> crate::Result<Metrics> {
        let inner = model.valid();
        let metrics = evaluate(&inner, &self.valid, self.config.batch_size, &self.device)?;
        info!(
            "validation: loss {:.4} error {:.4}",
            metrics.get("val_loss").copied().unwrap_or(f64::NAN),
            metrics.get("val_error").copied().unwrap_or(f64::NAN)
        );
        Ok(metrics)
    }
}

/// Builds a [`SupervisedTrainer`] per stage over shared datasets.
pub struct SupervisedFactory<B: AutodiffBackend> {
    config: TrainingConfig,
    train: Arc<Dataset>,
    valid: Arc<Dataset>,
    device: B::Device,
}

impl<B: AutodiffBackend> SupervisedFactory<B> {
    pub fn new(
        config: TrainingConfig,
        train: Arc<Dataset>,
        valid: Arc<Dataset>,
        device: B::Device,
    ) -> Self {
        Self {
            config,
            train,
            valid,
            device,
        }
    }
}

impl<B: AutodiffBackend> TrainerFactory<B> for SupervisedFactory<B> {
    type Trainer = SupervisedTrainer<B>;

    fn build(&self, max_epochs: usize) -> crate::Result<Self::Trainer> {
        Ok(SupervisedTrainer::new(
            self.config.clone(),
            max_epochs,
            self.train.clone(),
            self.valid.clone(),
            self.device.clone(),
        ))
    }
}

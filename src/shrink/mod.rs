//! Progressive shrinking: the staged curriculum that trains a
//! super-network so that its sub-networks work without retraining.
//!
//! Stage order for `K` kernel sizes, `D` depth levels and `W` widths:
//!
//! ```text
//! warmup
//! kernel step 1 .. K-1
//! depth step 1 .. D-1
//! evaluate width 0
//! for w in 1 .. W-1:
//!     width step, reset kernel/depth
//!     warmup (reduced)
//!     kernel step 1 .. K-1 (reduced)
//!     depth step 1 .. D-1 (reduced)
//!     evaluate width w
//! ```
//!
//! Index 0 of every dimension is the full configuration and is never a
//! shrink step of its own. The schedule is planned up front as a list of
//! [`ShrinkStep`]s and then executed one step at a time.

use std::path::{Path, PathBuf};

use burn::prelude::Backend;
use log::{info, warn};
use serde::Serialize;

use crate::checkpoint::{save_checkpoint, CheckpointTag};
use crate::config::ShrinkConfig;
use crate::error::Result;
use crate::supernet::ElasticSuperNet;
use crate::train::{StageTrainer, TrainerFactory};
use crate::Metrics;

// ─── Schedule ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ShrinkStep {
    /// Train the current width at full kernel size and depth.
    Warmup { width_step: usize, epochs: usize },
    Kernel {
        width_step: usize,
        kernel_step: usize,
        epochs: usize,
    },
    Depth {
        width_step: usize,
        depth_step: usize,
        epochs: usize,
    },
    /// Validate, report and checkpoint one width level.
    Evaluate { width_step: usize },
}

impl ShrinkStep {
    pub fn width_step(&self) -> usize {
        match *self {
            ShrinkStep::Warmup { width_step, .. }
            | ShrinkStep::Kernel { width_step, .. }
            | ShrinkStep::Depth { width_step, .. }
            | ShrinkStep::Evaluate { width_step } => width_step,
        }
    }

    /// Training epochs; zero for evaluation.
    pub fn epochs(&self) -> usize {
        match *self {
            ShrinkStep::Warmup { epochs, .. }
            | ShrinkStep::Kernel { epochs, .. }
            | ShrinkStep::Depth { epochs, .. } => epochs,
            ShrinkStep::Evaluate { .. } => 0,
        }
    }
}

/// Ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShrinkSchedule {
    steps: Vec<ShrinkStep>,
}

impl ShrinkSchedule {
    pub fn plan(
        config: &ShrinkConfig,
        kernel_step_count: usize,
        depth_step_count: usize,
        width_step_count: usize,
    ) -> Self {
        let mut steps = Vec::new();
        for width_step in 0..width_step_count.max(1) {
            let (warmup, kernel, depth) = if width_step == 0 {
                (
                    config.epochs_warmup,
                    config.epochs_kernel_step,
                    config.epochs_depth_step,
                )
            } else {
                (
                    config.epochs_warmup_after_width,
                    config.epochs_kernel_after_width,
                    config.epochs_depth_after_width,
                )
            };
            steps.push(ShrinkStep::Warmup {
                width_step,
                epochs: warmup,
            });
            // step 0 is the full model, trained by the warmup above
            for kernel_step in 1..kernel_step_count {
                steps.push(ShrinkStep::Kernel {
                    width_step,
                    kernel_step,
                    epochs: kernel,
                });
            }
            for depth_step in 1..depth_step_count {
                steps.push(ShrinkStep::Depth {
                    width_step,
                    depth_step,
                    epochs: depth,
                });
            }
            steps.push(ShrinkStep::Evaluate { width_step });
        }
        Self { steps }
    }

    pub fn for_network<B: Backend>(config: &ShrinkConfig, net: &ElasticSuperNet<B>) -> Self {
        Self::plan(
            config,
            net.kernel_step_count(),
            net.depth_step_count(),
            net.width_step_count(),
        )
    }

    pub fn steps(&self) -> &[ShrinkStep] {
        &self.steps
    }

    pub fn total_epochs(&self) -> usize {
        self.steps.iter().map(ShrinkStep::epochs).sum()
    }
}

// ─── Runner ───────────────────────────────────────────────────────

/// Validation result for one width level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidthReport {
    pub width_step: usize,
    pub metrics: Metrics,
    pub checkpoint: Option<PathBuf>,
}

/// Executes a [`ShrinkSchedule`] against one super-network.
///
/// A fresh trainer is built for every training step with that step's
/// epoch budget; weights carry over, optimizer state does not.
pub struct ProgressiveShrinking<'a, F> {
    config: &'a ShrinkConfig,
    factory: &'a F,
}

impl<'a, F> ProgressiveShrinking<'a, F> {
    pub fn new(config: &'a ShrinkConfig, factory: &'a F) -> Self {
        Self { config, factory }
    }

    pub fn run<B>(&self, model: ElasticSuperNet<B>) -> Result<(ElasticSuperNet<B>, Vec<WidthReport>)>
    where
        B: Backend,
        F: TrainerFactory<B>,
    {
        let mut model = model;
        model.reset_full()?;
        let schedule = ShrinkSchedule::for_network(self.config, &model);
        info!(
            "progressive shrinking: {} steps, {} epochs",
            schedule.steps().len(),
            schedule.total_epochs()
        );

        let mut reports = Vec::new();
        for &step in schedule.steps() {
            match step {
                ShrinkStep::Warmup { width_step, epochs } => {
                    if width_step > 0 {
                        if width_step == 1 {
                            model.begin_width_stage();
                        }
                        if !model.width_step()? {
                            warn!("width step {} found nothing to shrink", width_step);
                        }
                        model.restart_non_width();
                    }
                    info!("width {}: warmup for {} epochs", width_step, epochs);
                    let mut trainer = self.factory.build(epochs)?;
                    model = trainer.fit(model)?;
                    if width_step == 0 {
                        trainer.validate(&model)?;
                        self.checkpoint(&model, CheckpointTag::Warmup)?;
                        model.begin_kernel_stage();
                    }
                }
                ShrinkStep::Kernel {
                    width_step,
                    kernel_step,
                    epochs,
                } => {
                    if kernel_step == 1 && width_step > 0 {
                        model.begin_kernel_stage();
                    }
                    if !model.kernel_step() {
                        warn!("kernel step {} found nothing to shrink", kernel_step);
                    }
                    model = self.factory.build(epochs)?.fit(model)?;
                }
                ShrinkStep::Depth {
                    depth_step, epochs, ..
                } => {
                    if depth_step == 1 {
                        model.begin_depth_stage();
                    }
                    if !model.depth_step() {
                        warn!("depth step {} found nothing to shrink", depth_step);
                    }
                    model = self.factory.build(epochs)?.fit(model)?;
                }
                ShrinkStep::Evaluate { width_step } => {
                    let metrics = self.factory.build(0)?.validate(&model)?;
                    let checkpoint = self.checkpoint(&model, CheckpointTag::WidthStep(width_step))?;
                    info!("completed width step {}", width_step);
                    reports.push(WidthReport {
                        width_step,
                        metrics,
                        checkpoint,
                    });
                }
            }
        }
        Ok((model, reports))
    }

    fn checkpoint<B: Backend>(
        &self,
        model: &ElasticSuperNet<B>,
        tag: CheckpointTag,
    ) -> Result<Option<PathBuf>> {
        match &self.config.checkpoint_dir {
            Some(dir) => Ok(Some(save_checkpoint(model, Path::new(dir), tag)?)),
            None => Ok(None),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────

//! Run configuration.
//!
//! Every struct derives burn's `Config`, so a whole run is described by one
//! JSON file (`NasConfig::from_file`) and defaults can be overridden with the
//! generated `with_*` builders.

use std::collections::BTreeMap;
use std::path::Path;

use burn::config::Config;

use crate::elastic::Activation;
use crate::error::NasError;
use crate::train::{DatasetConfig, TrainingConfig};

// ─── Super-network ────────────────────────────────────────────────

/// One stage of the super-network: a run of residual blocks at one width.
#[derive(Config, Debug, PartialEq)]
pub struct StageConfig {
    /// Output channels of every block in the stage.
    pub out_channels: usize,
    /// Number of blocks at full depth.
    pub blocks: usize,
    /// Smallest number of active blocks reachable by depth elasticity.
    #[config(default = 1)]
    pub min_blocks: usize,
    /// Stride of the first block.
    #[config(default = 1)]
    pub stride: usize,
    /// Hidden channels per block = `out_channels * expansion`.
    #[config(default = 2)]
    pub expansion: usize,
}

/// Shape and elasticity of the super-network.
#[derive(Config, Debug)]
pub struct SuperNetConfig {
    /// Channels of the input sequence.
    pub input_channels: usize,
    /// Classifier outputs.
    pub num_classes: usize,
    /// Stages, in forward order.
    pub stages: Vec<StageConfig>,
    /// Channels produced by the stem convolution.
    #[config(default = 16)]
    pub stem_channels: usize,
    /// Elastic kernel sizes, shared by every convolution.
    #[config(default = "vec![9, 7, 5, 3]")]
    pub kernel_sizes: Vec<usize>,
    /// Width multipliers for block hidden channels, largest first.
    #[config(default = "vec![1.0, 0.75, 0.5]")]
    pub width_multipliers: Vec<f64>,
    /// Batch normalisation after every convolution.
    #[config(default = true)]
    pub batch_norm: bool,
    /// Activation after expanding convolutions.
    #[config(default = "String::from(\"relu\")")]
    pub activation: String,
    /// Seed for weight initialisation.
    #[config(default = 1234)]
    pub seed: u64,
}

impl SuperNetConfig {
    /// Structural validation. Malformed configurations are fatal.
    pub fn validate(&self) -> crate::Result<()> {
        if self.input_channels == 0 || self.num_classes == 0 || self.stem_channels == 0 {
            return Err(NasError::InvalidConfig(
                "input_channels, num_classes and stem_channels must be non-zero".into(),
            ));
        }
        if self.stages.is_empty() {
            return Err(NasError::InvalidConfig("at least one stage required".into()));
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.out_channels == 0 || stage.expansion == 0 || stage.stride == 0 {
                return Err(NasError::InvalidConfig(format!(
                    "stage {}: out_channels, expansion and stride must be non-zero",
                    i
                )));
            }
            if stage.blocks == 0 || stage.min_blocks == 0 || stage.min_blocks > stage.blocks {
                return Err(NasError::InvalidConfig(format!(
                    "stage {}: min_blocks {} outside 1..={}",
                    i, stage.min_blocks, stage.blocks
                )));
            }
        }
        if self.width_multipliers.is_empty()
            || self
                .width_multipliers
                .iter()
                .any(|&m| !(m > 0.0 && m <= 1.0))
        {
            return Err(NasError::InvalidConfig(format!(
                "width multipliers {:?} must lie in (0, 1]",
                self.width_multipliers
            )));
        }
        if self
            .width_multipliers
            .windows(2)
            .any(|pair| pair[1] >= pair[0])
        {
            return Err(NasError::InvalidConfig(format!(
                "width multipliers {:?} must be strictly descending",
                self.width_multipliers
            )));
        }
        crate::elastic::KernelSizes::new(self.kernel_sizes.clone())?;
        self.activation()?;
        Ok(())
    }

    pub fn activation(&self) -> crate::Result<Activation> {
        self.activation.parse()
    }

    /// Hidden channels of a block in `stage` at width step `width_index`.
    ///
    /// Never rounds down to zero.
    pub fn hidden_channels(&self, stage: usize, width_index: usize) -> usize {
        let full = self.stages[stage].out_channels * self.stages[stage].expansion;
        let multiplier = self
            .width_multipliers
            .get(width_index)
            .copied()
            .unwrap_or(1.0);
        ((full as f64 * multiplier).round() as usize).clamp(1, full)
    }

    /// Total number of residual blocks across stages.
    pub fn block_count(&self) -> usize {
        self.stages.iter().map(|s| s.blocks).sum()
    }

    /// Stem + two convolutions per block.
    pub fn layer_count(&self) -> usize {
        1 + 2 * self.block_count()
    }
}

// ─── Progressive shrinking ────────────────────────────────────────

/// Epoch budget for each progressive-shrinking stage.
#[derive(Config, Debug)]
pub struct ShrinkConfig {
    #[config(default = 10)]
    pub epochs_warmup: usize,
    #[config(default = 10)]
    pub epochs_kernel_step: usize,
    #[config(default = 10)]
    pub epochs_depth_step: usize,
    #[config(default = 5)]
    pub epochs_warmup_after_width: usize,
    #[config(default = 5)]
    pub epochs_kernel_after_width: usize,
    #[config(default = 5)]
    pub epochs_depth_after_width: usize,
    /// Where to snapshot the super-network after each width step.
    #[config(default = "None")]
    pub checkpoint_dir: Option<String>,
}

// ─── Search ───────────────────────────────────────────────────────

/// Aging-evolution search settings.
#[derive(Config, Debug)]
pub struct SearchConfig {
    /// Size of the sliding parent window.
    #[config(default = 100)]
    pub population_size: usize,
    /// Tournament size drawn from the population.
    #[config(default = 10)]
    pub sample_size: usize,
    /// Total number of evaluated candidates.
    #[config(default = 2000)]
    pub budget: usize,
    /// Candidates evaluated concurrently per generation.
    #[config(default = 10)]
    pub n_jobs: usize,
    /// Reject candidates whose estimated cost exceeds the bounds.
    #[config(default = true)]
    pub presample: bool,
    /// Accepted ratio of estimate to bound while presampling.
    #[config(default = 1.2)]
    pub presample_slack: f64,
    #[config(default = 10000)]
    pub max_presample_attempts: usize,
    /// Upper bound per metric name.
    #[config(default = "BTreeMap::new()")]
    pub bounds: BTreeMap<String, f64>,
    /// Metrics minimised by parent selection.
    #[config(default = "vec![String::from(\"val_error\")]")]
    pub objectives: Vec<String>,
    #[config(default = 1234)]
    pub seed: u64,
    /// Training epochs per evaluated candidate.
    #[config(default = 10)]
    pub epochs: usize,
}

impl SearchConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.n_jobs == 0 {
            return Err(NasError::InvalidConfig("n_jobs must be at least 1".into()));
        }
        if self.population_size == 0 || self.sample_size == 0 {
            return Err(NasError::InvalidConfig(
                "population_size and sample_size must be non-zero".into(),
            ));
        }
        if let Some((name, bound)) = self.bounds.iter().find(|(_, &b)| !(b > 0.0)) {
            return Err(NasError::InvalidConfig(format!(
                "bound for '{}' must be positive, got {}",
                name, bound
            )));
        }
        Ok(())
    }
}

// ─── Top level ────────────────────────────────────────────────────

/// Everything one CLI invocation needs.
#[derive(Config, Debug)]
pub struct NasConfig {
    pub supernet: SuperNetConfig,
    #[config(default = "ShrinkConfig::new()")]
    pub shrink: ShrinkConfig,
    #[config(default = "SearchConfig::new()")]
    pub search: SearchConfig,
    #[config(default = "TrainingConfig::new()")]
    pub training: TrainingConfig,
    #[config(default = "DatasetConfig::new()")]
    pub dataset: DatasetConfig,
}

impl NasConfig {
    /// Load and validate a JSON configuration file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let config = <Self as Config>::load(path)
            .map_err(|e| NasError::Config(format!("{}: {}", path.display(), e)))?;
        config.supernet.validate()?;
        config.search.validate()?;
        if config.dataset.input_channels != config.supernet.input_channels
            || config.dataset.num_classes != config.supernet.num_classes
        {
            return Err(NasError::InvalidConfig(format!(
                "dataset has {} channels / {} classes, super-network expects {} / {}",
                config.dataset.input_channels,
                config.dataset.num_classes,
                config.supernet.input_channels,
                config.supernet.num_classes
            )));
        }
        Ok(config)
    }

    /// A small keyword-spotting-sized default used by `init`.
    pub fn example() -> Self {
        let supernet = SuperNetConfig::new(
            1,
            4,
            vec![
                StageConfig::new(16, 2),
                StageConfig::new(24, 2).with_stride(2),
            ],
        );
        NasConfig::new(supernet)
    }
}

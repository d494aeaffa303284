//! Discrete search space over the super-network's elastic choices.
//!
//! A parametrization fixes one kernel index per convolution, one width
//! index per block and one active depth per stage.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SuperNetConfig;
use crate::error::{NasError, Result};

/// A point in the search space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parametrization {
    /// Index into the kernel sizes (largest first) per convolution.
    pub kernel_index: Vec<usize>,
    /// Index into the width multipliers per block.
    pub width_index: Vec<usize>,
    /// Active blocks per stage.
    pub depth: Vec<usize>,
}

impl Parametrization {
    /// Flat `name -> value` view, as written next to evaluation results.
    pub fn flatten(&self) -> BTreeMap<String, usize> {
        let mut flat = BTreeMap::new();
        for (i, &k) in self.kernel_index.iter().enumerate() {
            flat.insert(format!("layers.{}.kernel_index", i), k);
        }
        for (i, &w) in self.width_index.iter().enumerate() {
            flat.insert(format!("blocks.{}.width_index", i), w);
        }
        for (i, &d) in self.depth.iter().enumerate() {
            flat.insert(format!("stages.{}.depth", i), d);
        }
        flat
    }

    /// Content hash identifying duplicate candidates in the history.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for genes in [&self.kernel_index, &self.width_index, &self.depth] {
            hasher.update(&(genes.len() as u64).to_le_bytes());
            for &g in genes.iter() {
                hasher.update(&(g as u64).to_le_bytes());
            }
        }
        hasher.finalize().to_hex()[..16].to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gene {
    Kernel(usize),
    Width(usize),
    Depth(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpace {
    layers: usize,
    kernel_choices: usize,
    blocks: usize,
    width_choices: usize,
    /// Inclusive `(min, max)` active blocks per stage.
    depth_ranges: Vec<(usize, usize)>,
}

impl SearchSpace {
    pub fn from_config(config: &SuperNetConfig) -> Self {
        Self {
            layers: config.layer_count(),
            kernel_choices: config.kernel_sizes.len(),
            blocks: config.block_count(),
            width_choices: config.width_multipliers.len(),
            depth_ranges: config
                .stages
                .iter()
                .map(|s| (s.min_blocks, s.blocks))
                .collect(),
        }
    }

    /// Largest network: every choice at index 0, every stage at full depth.
    pub fn full(&self) -> Parametrization {
        Parametrization {
            kernel_index: vec![0; self.layers],
            width_index: vec![0; self.blocks],
            depth: self.depth_ranges.iter().map(|&(_, max)| max).collect(),
        }
    }

    pub fn smallest(&self) -> Parametrization {
        Parametrization {
            kernel_index: vec![self.kernel_choices.saturating_sub(1); self.layers],
            width_index: vec![self.width_choices.saturating_sub(1); self.blocks],
            depth: self.depth_ranges.iter().map(|&(min, _)| min).collect(),
        }
    }

    /// Uniform sample.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Parametrization {
        Parametrization {
            kernel_index: (0..self.layers)
                .map(|_| rng.gen_range(0..self.kernel_choices))
                .collect(),
            width_index: (0..self.blocks)
                .map(|_| rng.gen_range(0..self.width_choices))
                .collect(),
            depth: self
                .depth_ranges
                .iter()
                .map(|&(min, max)| rng.gen_range(min..=max))
                .collect(),
        }
    }

    /// Copy of `parent` with exactly one gene changed to a different value.
    ///
    /// A space without any free choice returns the parent unchanged.
    pub fn mutate<R: Rng>(&self, parent: &Parametrization, rng: &mut R) -> Parametrization {
        let mut child = parent.clone();
        let Some(&gene) = self.mutable_genes().choose(rng) else {
            return child;
        };
        match gene {
            Gene::Kernel(i) => {
                child.kernel_index[i] = resample(rng, 0, self.kernel_choices - 1, parent.kernel_index[i])
            }
            Gene::Width(i) => {
                child.width_index[i] = resample(rng, 0, self.width_choices - 1, parent.width_index[i])
            }
            Gene::Depth(i) => {
                let (min, max) = self.depth_ranges[i];
                child.depth[i] = resample(rng, min, max, parent.depth[i]);
            }
        }
        child
    }

    fn mutable_genes(&self) -> Vec<Gene> {
        let mut genes = Vec::new();
        if self.kernel_choices > 1 {
            genes.extend((0..self.layers).map(Gene::Kernel));
        }
        if self.width_choices > 1 {
            genes.extend((0..self.blocks).map(Gene::Width));
        }
        genes.extend(
            self.depth_ranges
                .iter()
                .enumerate()
                .filter(|&(_, &(min, max))| max > min)
                .map(|(i, _)| Gene::Depth(i)),
        );
        genes
    }

    /// Schema check of a parametrization against this space.
    pub fn validate(&self, p: &Parametrization) -> Result<()> {
        if p.kernel_index.len() != self.layers
            || p.width_index.len() != self.blocks
            || p.depth.len() != self.depth_ranges.len()
        {
            return Err(NasError::InvalidParametrization(format!(
                "expected {} kernel, {} width and {} depth choices, got {}, {} and {}",
                self.layers,
                self.blocks,
                self.depth_ranges.len(),
                p.kernel_index.len(),
                p.width_index.len(),
                p.depth.len()
            )));
        }
        if let Some(k) = p.kernel_index.iter().find(|&&k| k >= self.kernel_choices) {
            return Err(NasError::InvalidParametrization(format!(
                "kernel index {} out of range 0..{}",
                k, self.kernel_choices
            )));
        }
        if let Some(w) = p.width_index.iter().find(|&&w| w >= self.width_choices) {
            return Err(NasError::InvalidParametrization(format!(
                "width index {} out of range 0..{}",
                w, self.width_choices
            )));
        }
        for (stage, (&d, &(min, max))) in p.depth.iter().zip(&self.depth_ranges).enumerate() {
            if d < min || d > max {
                return Err(NasError::InvalidParametrization(format!(
                    "stage {} depth {} outside {}..={}",
                    stage, d, min, max
                )));
            }
        }
        Ok(())
    }

    /// Number of distinct parametrizations, saturating.
    pub fn size(&self) -> u128 {
        let kernels = (self.kernel_choices as u128).saturating_pow(self.layers as u32);
        let widths = (self.width_choices as u128).saturating_pow(self.blocks as u32);
        let depths = self
            .depth_ranges
            .iter()
            .fold(1u128, |acc, &(min, max)| acc.saturating_mul((max - min + 1) as u128));
        kernels.saturating_mul(widths).saturating_mul(depths)
    }
}

/// Uniform value in `min..=max` other than `current`. Requires `max > min`.
fn resample<R: Rng>(rng: &mut R, min: usize, max: usize, current: usize) -> usize {
    let value = rng.gen_range(min..max);
    if value >= current {
        value + 1
    } else {
        value
    }
}

//! Elastic super-network: a stem, residual expand/project blocks grouped
//! in stages, global average pooling and a linear classifier.
//!
//! Every convolution is an [`ElasticConv1d`]. Kernel size is chosen per
//! layer, hidden width per block and active depth per stage. The shrink
//! hooks below move all three dimensions the way progressive shrinking
//! expects; [`ElasticSuperNet::apply_parametrization`] sets them directly
//! for a searched candidate.

pub mod fixed;
pub mod layout;

use burn::module::{Ignored, Module, Param};
use burn::prelude::*;
use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::config::SuperNetConfig;
use crate::elastic::{ChannelFilter, ElasticConv1d, ElasticConvConfig};
use crate::error::{NasError, Result};
use crate::search::space::Parametrization;

pub use fixed::{FixedBlock, FixedNetwork};
pub use layout::{BlockLayout, NetworkLayout};

/// Mutable elastic selection outside the layers themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ElasticState {
    /// Active blocks per stage.
    depth: Vec<usize>,
    /// Width index per block.
    width: Vec<usize>,
    /// Width level reached by progressive shrinking.
    width_step: usize,
}

#[derive(Module, Debug)]
pub struct ElasticSuperNet<B: Backend> {
    layers: Vec<ElasticConv1d<B>>,
    head_weight: Param<Tensor<B, 2>>,
    head_bias: Param<Tensor<B, 1>>,
    layout: Ignored<NetworkLayout>,
    state: Ignored<ElasticState>,
}

impl SuperNetConfig {
    /// Build the super-network at full size with seeded weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<ElasticSuperNet<B>> {
        let layout = NetworkLayout::from_config(self)?;
        let activation = self.activation()?;
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed);
        let conv = |in_channels, out_channels| {
            ElasticConvConfig::new(in_channels, out_channels, self.kernel_sizes.clone())
                .with_activation(activation)
        };

        let mut layers = Vec::with_capacity(layout.layer_count());
        layers.push(
            conv(layout.input_channels, layout.stem_channels)
                .with_kind(layout.stem_kind)
                .init(&mut rng, device)?,
        );
        for block in &layout.blocks {
            let hidden = block.hidden(0);
            layers.push(
                conv(block.in_channels, hidden)
                    .with_stride(block.stride)
                    .with_kind(layout.expand_kind)
                    .init(&mut rng, device)?,
            );
            layers.push(
                conv(hidden, block.out_channels)
                    .with_kind(layout.project_kind)
                    .init(&mut rng, device)?,
            );
        }

        let features = layout.output_channels();
        let bound = 1.0 / (features as f32).sqrt();
        let weights: Vec<f32> = (0..features * layout.num_classes)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let head_weight = Tensor::from_data(
            TensorData::new(weights, [features, layout.num_classes]),
            device,
        );

        let state = ElasticState {
            depth: layout.full_depth(),
            width: vec![0; layout.blocks.len()],
            width_step: 0,
        };
        debug!(
            "super-network: {} layers, {} blocks in {} stages",
            layers.len(),
            layout.blocks.len(),
            layout.stages.len()
        );
        Ok(ElasticSuperNet {
            layers,
            head_weight: Param::from_tensor(head_weight),
            head_bias: Param::from_tensor(Tensor::zeros([layout.num_classes], device)),
            layout: Ignored(layout),
            state: Ignored(state),
        })
    }
}

impl<B: Backend> ElasticSuperNet<B> {
    pub fn layout(&self) -> &NetworkLayout {
        &self.layout.0
    }

    pub fn layers(&self) -> &[ElasticConv1d<B>] {
        &self.layers
    }

    pub fn head_weight(&self) -> Tensor<B, 2> {
        self.head_weight.val()
    }

    pub fn depth(&self) -> &[usize] {
        &self.state.0.depth
    }

    pub fn width_indices(&self) -> &[usize] {
        &self.state.0.width
    }

    /// Width level reached by [`Self::width_step`].
    pub fn width_level(&self) -> usize {
        self.state.0.width_step
    }

    // ─── Stage counters ───────────────────────────────────────────

    pub fn kernel_step_count(&self) -> usize {
        self.layout.0.kernel_sizes.len()
    }

    pub fn depth_step_count(&self) -> usize {
        self.layout.0.depth_step_count()
    }

    pub fn width_step_count(&self) -> usize {
        self.layout
            .0
            .blocks
            .first()
            .map(|b| b.hidden_channels.len())
            .unwrap_or(1)
    }

    // ─── Forward ──────────────────────────────────────────────────

    /// `[batch, channels, length]` -> `[batch, classes]`
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let layout = &self.layout.0;
        let mut x = self.layers[0].forward(input);
        for b in layout.active_blocks(&self.state.0.depth) {
            let hidden = self.layers[NetworkLayout::expand_layer(b)].forward(x.clone());
            let out = self.layers[NetworkLayout::project_layer(b)].forward(hidden);
            x = if layout.blocks[b].residual { out + x } else { out };
        }
        let [batch, channels, _] = x.dims();
        let pooled = x.mean_dim(2).reshape([batch, channels]);
        pooled.matmul(self.head_weight.val()) + self.head_bias.val().unsqueeze::<2>()
    }

    // ─── Elastic selection ────────────────────────────────────────

    fn reset_kernels(&mut self) {
        for layer in &mut self.layers {
            layer.reset_kernel();
        }
    }

    fn reset_depth(&mut self) {
        self.state.0.depth = self.layout.0.full_depth();
    }

    /// Select the width of one block: the expand layer keeps its most
    /// important output channels, the project layer the matching inputs.
    pub fn set_block_width(&mut self, block: usize, width_index: usize) -> Result<()> {
        let Some(layout) = self.layout.0.blocks.get(block) else {
            return Err(NasError::InvalidParametrization(format!(
                "block {} does not exist",
                block
            )));
        };
        if width_index >= layout.hidden_channels.len() {
            return Err(NasError::InvalidParametrization(format!(
                "width index {} out of range 0..{}",
                width_index,
                layout.hidden_channels.len()
            )));
        }
        let hidden = layout.hidden(width_index);
        let expand = NetworkLayout::expand_layer(block);
        let filter = if hidden == layout.hidden(0) {
            ChannelFilter::full(hidden)
        } else {
            ChannelFilter::top_k(&self.layers[expand].out_channel_importance(), hidden)
        };
        self.layers[expand].set_out_channel_filter(filter.clone())?;
        self.layers[expand + 1].set_in_channel_filter(filter)?;
        self.state.0.width[block] = width_index;
        Ok(())
    }

    fn apply_width(&mut self, width_index: usize) -> Result<()> {
        for block in 0..self.layout.0.blocks.len() {
            self.set_block_width(block, width_index)?;
        }
        Ok(())
    }

    /// Full kernels, full depth, full width.
    pub fn reset_full(&mut self) -> Result<()> {
        self.reset_kernels();
        self.reset_depth();
        self.state.0.width_step = 0;
        self.apply_width(0)
    }

    /// Kernel and depth back to full; the width level is kept.
    pub fn restart_non_width(&mut self) {
        self.reset_kernels();
        self.reset_depth();
    }

    pub fn begin_kernel_stage(&mut self) {
        self.restart_non_width();
        info!("kernel stage: {} sizes {:?}", self.kernel_step_count(), self.layout.0.kernel_sizes);
    }

    /// Shrink every convolution to its next smaller kernel.
    pub fn kernel_step(&mut self) -> bool {
        let mut moved = false;
        for layer in &mut self.layers {
            moved |= layer.step_down_kernel();
        }
        if moved {
            info!("kernel step: active size {}", self.layers[0].active_kernel_size());
        }
        moved
    }

    pub fn begin_depth_stage(&mut self) {
        self.restart_non_width();
        info!("depth stage: {} levels", self.depth_step_count());
    }

    /// Drop the last active block of every stage above its minimum.
    pub fn depth_step(&mut self) -> bool {
        let state = &mut self.state.0;
        let mut moved = false;
        for (depth, &min) in state.depth.iter_mut().zip(&self.layout.0.min_blocks) {
            if *depth > min {
                *depth -= 1;
                moved = true;
            }
        }
        if moved {
            info!("depth step: active blocks {:?}", state.depth);
        }
        moved
    }

    pub fn begin_width_stage(&mut self) {
        self.restart_non_width();
        info!("width stage: {} levels", self.width_step_count());
    }

    /// Narrow every block to the next width multiplier.
    pub fn width_step(&mut self) -> Result<bool> {
        let next = self.state.0.width_step + 1;
        if next >= self.width_step_count() {
            debug!("width already at its narrowest level");
            return Ok(false);
        }
        self.apply_width(next)?;
        self.state.0.width_step = next;
        info!("width step {}: hidden channels {:?}", next, self.active_hidden_channels());
        Ok(true)
    }

    fn active_hidden_channels(&self) -> Vec<usize> {
        (0..self.layout.0.blocks.len())
            .map(|b| self.layers[NetworkLayout::expand_layer(b)].active_out_channels())
            .collect()
    }

    /// Select one candidate sub-network.
    pub fn apply_parametrization(&mut self, p: &Parametrization) -> Result<()> {
        let layout = &self.layout.0;
        if p.kernel_index.len() != layout.layer_count()
            || p.width_index.len() != layout.blocks.len()
            || p.depth.len() != layout.stages.len()
        {
            return Err(NasError::InvalidParametrization(format!(
                "parametrization does not match a network of {} layers, {} blocks, {} stages",
                layout.layer_count(),
                layout.blocks.len(),
                layout.stages.len()
            )));
        }
        for (stage, (&d, range)) in p.depth.iter().zip(&layout.stages).enumerate() {
            if d < layout.min_blocks[stage] || d > range.len() {
                return Err(NasError::InvalidParametrization(format!(
                    "stage {} depth {} outside {}..={}",
                    stage,
                    d,
                    layout.min_blocks[stage],
                    range.len()
                )));
            }
        }

        for (layer, &k) in self.layers.iter_mut().zip(&p.kernel_index) {
            layer.pick_kernel_index(k);
        }
        for (block, &w) in p.width_index.iter().enumerate() {
            self.set_block_width(block, w)?;
        }
        self.state.0.depth = p.depth.clone();
        Ok(())
    }

    /// The current selection as a parametrization.
    pub fn current_parametrization(&self) -> Parametrization {
        Parametrization {
            kernel_index: self.layers.iter().map(|l| l.kernel_index()).collect(),
            width_index: self.state.0.width.clone(),
            depth: self.state.0.depth.clone(),
        }
    }

    /// Plain network equal to the current selection; shares no storage.
    pub fn assemble_fixed_network(&self) -> FixedNetwork<B> {
        let layout = &self.layout.0;
        let blocks = layout
            .active_blocks(&self.state.0.depth)
            .into_iter()
            .map(|b| FixedBlock {
                expand: self.layers[NetworkLayout::expand_layer(b)].assemble_fixed_layer(),
                project: self.layers[NetworkLayout::project_layer(b)].assemble_fixed_layer(),
                residual: layout.blocks[b].residual,
            })
            .collect();
        FixedNetwork::new(
            self.layers[0].assemble_fixed_layer(),
            blocks,
            self.head_weight.val(),
            self.head_bias.val(),
        )
    }
}

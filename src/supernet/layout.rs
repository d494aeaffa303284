//! Static geometry of the super-network, derived from its configuration.
//!
//! Layer 0 is the stem. Block `b` owns layers `1 + 2b` (expand) and
//! `2 + 2b` (project).

use std::ops::Range;

use crate::config::SuperNetConfig;
use crate::elastic::{KernelSizes, LayerKind};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLayout {
    pub stage: usize,
    pub in_channels: usize,
    pub out_channels: usize,
    /// Hidden channels per width index, widest first.
    pub hidden_channels: Vec<usize>,
    pub stride: usize,
    /// Output is added to the block input.
    pub residual: bool,
}

impl BlockLayout {
    pub fn hidden(&self, width_index: usize) -> usize {
        self.hidden_channels
            .get(width_index)
            .or(self.hidden_channels.last())
            .copied()
            .unwrap_or(self.out_channels)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkLayout {
    pub input_channels: usize,
    pub stem_channels: usize,
    pub num_classes: usize,
    /// Largest first.
    pub kernel_sizes: Vec<usize>,
    pub blocks: Vec<BlockLayout>,
    /// Block indices per stage.
    pub stages: Vec<Range<usize>>,
    pub min_blocks: Vec<usize>,
    pub stem_kind: LayerKind,
    pub expand_kind: LayerKind,
    pub project_kind: LayerKind,
}

impl NetworkLayout {
    pub fn from_config(config: &SuperNetConfig) -> Result<Self> {
        config.validate()?;
        let (act_kind, plain_kind) = if config.batch_norm {
            (LayerKind::ConvBnAct, LayerKind::ConvBn)
        } else {
            (LayerKind::ConvAct, LayerKind::Conv)
        };

        let mut blocks = Vec::with_capacity(config.block_count());
        let mut stages = Vec::with_capacity(config.stages.len());
        let mut channels = config.stem_channels;
        for (s, stage) in config.stages.iter().enumerate() {
            let start = blocks.len();
            let hidden_channels: Vec<usize> = (0..config.width_multipliers.len())
                .map(|w| config.hidden_channels(s, w))
                .collect();
            for b in 0..stage.blocks {
                let stride = if b == 0 { stage.stride } else { 1 };
                blocks.push(BlockLayout {
                    stage: s,
                    in_channels: channels,
                    out_channels: stage.out_channels,
                    hidden_channels: hidden_channels.clone(),
                    stride,
                    residual: channels == stage.out_channels && stride == 1,
                });
                channels = stage.out_channels;
            }
            stages.push(start..blocks.len());
        }

        Ok(Self {
            input_channels: config.input_channels,
            stem_channels: config.stem_channels,
            num_classes: config.num_classes,
            kernel_sizes: KernelSizes::new(config.kernel_sizes.clone())?.as_slice().to_vec(),
            blocks,
            stages,
            min_blocks: config.stages.iter().map(|s| s.min_blocks).collect(),
            stem_kind: act_kind,
            expand_kind: act_kind,
            project_kind: plain_kind,
        })
    }

    pub fn layer_count(&self) -> usize {
        1 + 2 * self.blocks.len()
    }

    pub fn expand_layer(block: usize) -> usize {
        1 + 2 * block
    }

    pub fn project_layer(block: usize) -> usize {
        2 + 2 * block
    }

    /// Blocks per stage at full depth.
    pub fn full_depth(&self) -> Vec<usize> {
        self.stages.iter().map(|r| r.len()).collect()
    }

    /// Indices of the blocks executed for the given per-stage depth.
    pub fn active_blocks(&self, depth: &[usize]) -> Vec<usize> {
        self.stages
            .iter()
            .zip(depth)
            .flat_map(|(range, &d)| range.clone().take(d))
            .collect()
    }

    /// Channels leaving the last block (or the stem without blocks).
    pub fn output_channels(&self) -> usize {
        self.blocks
            .last()
            .map(|b| b.out_channels)
            .unwrap_or(self.stem_channels)
    }

    /// Number of depth levels: the deepest stage's reachable range.
    pub fn depth_step_count(&self) -> usize {
        self.stages
            .iter()
            .zip(&self.min_blocks)
            .map(|(range, &min)| range.len() - min + 1)
            .max()
            .unwrap_or(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;

    #[test]
    fn first_block_of_a_stage_carries_the_stride() {
        let config = SuperNetConfig::new(
            1,
            2,
            vec![
                StageConfig::new(16, 2),
                StageConfig::new(24, 2).with_stride(2).with_min_blocks(1),
            ],
        );
        let layout = NetworkLayout::from_config(&config).unwrap();
        assert_eq!(layout.blocks.len(), 4);
        assert!(layout.blocks[0].residual);
        assert_eq!(layout.blocks[2].stride, 2);
        assert!(!layout.blocks[2].residual);
        assert!(layout.blocks[3].residual);
        assert_eq!(layout.blocks[2].hidden_channels, vec![48, 36, 24]);
        assert_eq!(layout.stages, vec![0..2, 2..4]);
        assert_eq!(layout.active_blocks(&[1, 2]), vec![0, 2, 3]);
        assert_eq!(layout.layer_count(), config.layer_count());
    }

    #[test]
    fn kinds_follow_batch_norm_flag() {
        let config =
            SuperNetConfig::new(1, 2, vec![StageConfig::new(4, 1)]).with_batch_norm(false);
        let layout = NetworkLayout::from_config(&config).unwrap();
        assert_eq!(layout.expand_kind, LayerKind::ConvAct);
        assert_eq!(layout.project_kind, LayerKind::Conv);
    }

    #[test]
    fn depth_steps_follow_the_widest_stage_range() {
        let config = SuperNetConfig::new(
            2,
            3,
            vec![StageConfig::new(8, 3).with_min_blocks(2), StageConfig::new(8, 1)],
        );
        let layout = NetworkLayout::from_config(&config).unwrap();
        assert_eq!(layout.depth_step_count(), 2);

        let deep = SuperNetConfig::new(1, 2, vec![StageConfig::new(4, 1), StageConfig::new(4, 4)]);
        assert_eq!(NetworkLayout::from_config(&deep).unwrap().depth_step_count(), 4);
    }
}

//! Resource cost of sub-networks, without training them.
//!
//! A [`NetworkDescription`] lists the shape of every executed layer. A
//! [`CostBackend`] turns it into named metrics that search bounds refer
//! to (`macs`, `weights`, `activations`).

pub mod analytical;

pub use analytical::AnalyticalCost;

use serde::{Deserialize, Serialize};

use crate::config::SuperNetConfig;
use crate::elastic::LayerKind;
use crate::error::Result;
use crate::search::space::Parametrization;
use crate::supernet::{ElasticSuperNet, NetworkLayout};
use crate::Metrics;

// ---------------------------------------------------------------------------
// Layer shapes
// ---------------------------------------------------------------------------

/// Shape of one executed layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerShape {
    Conv {
        kind: LayerKind,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        bias: bool,
    },
    /// Global average pooling over the sequence.
    Pool { channels: usize },
    Linear {
        in_features: usize,
        out_features: usize,
    },
}

/// Executed layers of one sub-network, in forward order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NetworkDescription {
    pub layers: Vec<LayerShape>,
}

impl NetworkDescription {
    /// Describe the sub-network `p` selects from `layout`.
    pub fn from_layout(layout: &NetworkLayout, p: &Parametrization) -> Self {
        // out-of-range indices clamp to the smallest size, as on the layers
        let kernel = |layer: usize| {
            let index = p.kernel_index.get(layer).copied().unwrap_or(0);
            layout
                .kernel_sizes
                .get(index)
                .or(layout.kernel_sizes.last())
                .copied()
                .unwrap_or(1)
        };

        let mut layers = vec![LayerShape::Conv {
            kind: layout.stem_kind,
            in_channels: layout.input_channels,
            out_channels: layout.stem_channels,
            kernel_size: kernel(0),
            stride: 1,
            bias: false,
        }];
        let mut channels = layout.stem_channels;
        for b in layout.active_blocks(&p.depth) {
            let block = &layout.blocks[b];
            let hidden = block.hidden(p.width_index.get(b).copied().unwrap_or(0));
            layers.push(LayerShape::Conv {
                kind: layout.expand_kind,
                in_channels: block.in_channels,
                out_channels: hidden,
                kernel_size: kernel(NetworkLayout::expand_layer(b)),
                stride: block.stride,
                bias: false,
            });
            layers.push(LayerShape::Conv {
                kind: layout.project_kind,
                in_channels: hidden,
                out_channels: block.out_channels,
                kernel_size: kernel(NetworkLayout::project_layer(b)),
                stride: 1,
                bias: false,
            });
            channels = block.out_channels;
        }
        layers.push(LayerShape::Pool { channels });
        layers.push(LayerShape::Linear {
            in_features: channels,
            out_features: layout.num_classes,
        });
        Self { layers }
    }
}

impl SuperNetConfig {
    /// Shapes of the sub-network `p`, computed from the configuration alone.
    pub fn describe(&self, p: &Parametrization) -> Result<NetworkDescription> {
        let layout = NetworkLayout::from_config(self)?;
        Ok(NetworkDescription::from_layout(&layout, p))
    }
}

impl<B: burn::prelude::Backend> ElasticSuperNet<B> {
    /// Shapes of the currently selected sub-network.
    pub fn describe(&self) -> NetworkDescription {
        NetworkDescription::from_layout(self.layout(), &self.current_parametrization())
    }
}

// ---------------------------------------------------------------------------
// CostBackend trait
// ---------------------------------------------------------------------------

/// Pluggable cost estimator used while presampling candidates.
pub trait CostBackend: Send + Sync {
    fn estimate(&self, description: &NetworkDescription) -> Metrics;

    fn name(&self) -> &str;
}

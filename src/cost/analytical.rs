//! Closed-form cost model: multiply-accumulates, parameter count and
//! peak activation size for a given input length.

use super::{CostBackend, LayerShape, NetworkDescription};
use crate::Metrics;

/// Per-layer cost contribution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerCost {
    pub macs: u64,
    pub weights: u64,
    /// Input plus output elements alive while the layer runs.
    pub activations: u64,
    /// Sequence length after the layer.
    pub out_length: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyticalCost {
    /// Sequence length fed to the network.
    pub input_length: usize,
}

impl AnalyticalCost {
    pub fn new(input_length: usize) -> Self {
        Self { input_length }
    }

    /// Cost of one layer applied to a sequence of `length`.
    pub fn layer_cost(shape: &LayerShape, length: usize) -> LayerCost {
        match *shape {
            LayerShape::Conv {
                kind,
                in_channels,
                out_channels,
                kernel_size,
                stride,
                bias,
            } => {
                // same padding: ceil(length / stride)
                let out_length = length.div_ceil(stride.max(1));
                let kernel = (out_channels * in_channels * kernel_size) as u64;
                let mut weights = kernel;
                if bias {
                    weights += out_channels as u64;
                }
                if kind.has_norm() {
                    weights += 2 * out_channels as u64;
                }
                LayerCost {
                    macs: kernel * out_length as u64,
                    weights,
                    activations: (in_channels * length + out_channels * out_length) as u64,
                    out_length,
                }
            }
            LayerShape::Pool { channels } => LayerCost {
                macs: (channels * length) as u64,
                weights: 0,
                activations: (channels * length + channels) as u64,
                out_length: 1,
            },
            LayerShape::Linear {
                in_features,
                out_features,
            } => LayerCost {
                macs: (in_features * out_features) as u64,
                weights: (in_features * out_features + out_features) as u64,
                activations: (in_features + out_features) as u64,
                out_length: 1,
            },
        }
    }

    pub fn total(&self, description: &NetworkDescription) -> LayerCost {
        let mut total = LayerCost {
            out_length: self.input_length,
            ..LayerCost::default()
        };
        for shape in &description.layers {
            let cost = Self::layer_cost(shape, total.out_length);
            total.macs += cost.macs;
            total.weights += cost.weights;
            total.activations = total.activations.max(cost.activations);
            total.out_length = cost.out_length;
        }
        total
    }
}

impl CostBackend for AnalyticalCost {
    fn estimate(&self, description: &NetworkDescription) -> Metrics {
        let total = self.total(description);
        let mut metrics = Metrics::new();
        metrics.insert("macs".into(), total.macs as f64);
        metrics.insert("weights".into(), total.weights as f64);
        metrics.insert("activations".into(), total.activations as f64);
        metrics
    }

    fn name(&self) -> &str {
        "analytical"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StageConfig, SuperNetConfig};
    use crate::elastic::LayerKind;
    use crate::search::space::SearchSpace;
    use crate::supernet::ElasticSuperNet;
    use burn::backend::NdArray;
    use burn::module::Module;

    fn conv(in_channels: usize, out_channels: usize, kernel_size: usize, stride: usize) -> LayerShape {
        LayerShape::Conv {
            kind: LayerKind::ConvBn,
            in_channels,
            out_channels,
            kernel_size,
            stride,
            bias: false,
        }
    }

    #[test]
    fn conv_cost_by_hand() {
        let cost = AnalyticalCost::layer_cost(&conv(2, 4, 3, 2), 9);
        assert_eq!(cost.out_length, 5);
        assert_eq!(cost.macs, 4 * 2 * 3 * 5);
        assert_eq!(cost.weights, 4 * 2 * 3 + 8);
        assert_eq!(cost.activations, 2 * 9 + 4 * 5);
    }

    #[test]
    fn totals_sum_macs_and_take_peak_activations() {
        let description = NetworkDescription {
            layers: vec![
                conv(1, 8, 3, 1),
                LayerShape::Pool { channels: 8 },
                LayerShape::Linear {
                    in_features: 8,
                    out_features: 2,
                },
            ],
        };
        let metrics = AnalyticalCost::new(10).estimate(&description);
        assert_eq!(metrics["macs"], (8 * 3 * 10 + 80 + 16) as f64);
        assert_eq!(metrics["weights"], (24 + 16 + 18) as f64);
        assert_eq!(metrics["activations"], (10 + 80) as f64);
    }

    #[test]
    fn smaller_parametrization_costs_less() {
        let config = SuperNetConfig::new(
            1,
            4,
            vec![StageConfig::new(8, 2), StageConfig::new(12, 2).with_stride(2)],
        );
        let space = SearchSpace::from_config(&config);
        let backend = AnalyticalCost::new(32);
        let full = backend.estimate(&config.describe(&space.full()).unwrap());
        let small = backend.estimate(&config.describe(&space.smallest()).unwrap());
        for key in ["macs", "weights", "activations"] {
            assert!(small[key] < full[key], "{}", key);
        }
    }

    #[test]
    fn weight_count_matches_assembled_network() {
        let config = SuperNetConfig::new(2, 3, vec![StageConfig::new(4, 2)])
            .with_stem_channels(4)
            .with_kernel_sizes(vec![5, 3]);
        let mut net: ElasticSuperNet<NdArray> = config.init(&Default::default()).unwrap();
        let space = SearchSpace::from_config(&config);
        net.apply_parametrization(&space.smallest()).unwrap();

        let estimate = AnalyticalCost::new(16).estimate(&net.describe());
        let fixed = net.assemble_fixed_network();
        assert_eq!(estimate["weights"], fixed.num_params() as f64);
        assert_eq!(net.describe(), config.describe(&space.smallest()).unwrap());
    }
}

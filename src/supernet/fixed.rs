//! Fixed network assembled from one sub-network of the super-network.

use burn::module::{Module, Param};
use burn::prelude::*;

use crate::elastic::fixed::detached;
use crate::elastic::FixedConv1d;

#[derive(Module, Debug)]
pub struct FixedBlock<B: Backend> {
    pub expand: FixedConv1d<B>,
    pub project: FixedConv1d<B>,
    pub residual: bool,
}

impl<B: Backend> FixedBlock<B> {
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let out = self.project.forward(self.expand.forward(input.clone()));
        if self.residual {
            out + input
        } else {
            out
        }
    }
}

#[derive(Module, Debug)]
pub struct FixedNetwork<B: Backend> {
    pub stem: FixedConv1d<B>,
    pub blocks: Vec<FixedBlock<B>>,
    pub head_weight: Param<Tensor<B, 2>>,
    pub head_bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> FixedNetwork<B> {
    pub fn new(
        stem: FixedConv1d<B>,
        blocks: Vec<FixedBlock<B>>,
        head_weight: Tensor<B, 2>,
        head_bias: Tensor<B, 1>,
    ) -> Self {
        Self {
            stem,
            blocks,
            head_weight: Param::from_tensor(detached(head_weight)),
            head_bias: Param::from_tensor(detached(head_bias)),
        }
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let mut x = self.stem.forward(input);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let [batch, channels, _] = x.dims();
        let pooled = x.mean_dim(2).reshape([batch, channels]);
        pooled.matmul(self.head_weight.val()) + self.head_bias.val().unsqueeze::<2>()
    }

    /// Trainable scalars, batch-norm affine parameters included.
    pub fn parameter_count(&self) -> usize {
        self.num_params()
    }
}

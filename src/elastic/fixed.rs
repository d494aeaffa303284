//! Plain fixed-size layers assembled from an elastic layer's selection.
//!
//! Assembled layers own fresh copies of every tensor. Nothing is shared
//! with the elastic layer they came from, so they can be exported or
//! costed while the super-network keeps training.

use burn::module::{Ignored, Module, Param};
use burn::prelude::*;
use burn::tensor::module::conv1d;
use burn::tensor::ops::ConvOptions;

use super::conv::{Activation, LayerKind};
use super::norm::batch_norm;

/// Copy a tensor into new storage, detached from any autodiff graph.
pub fn detached<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
    let device = tensor.device();
    Tensor::from_data(tensor.into_data(), &device)
}

/// Static geometry of an assembled convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedConvSpec {
    pub kind: LayerKind,
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub activation: Activation,
}

#[derive(Module, Debug)]
pub struct FixedBatchNorm<B: Backend> {
    pub gamma: Param<Tensor<B, 1>>,
    pub beta: Param<Tensor<B, 1>>,
    pub eps: f64,
}

impl<B: Backend> FixedBatchNorm<B> {
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        batch_norm(input, self.gamma.val(), self.beta.val(), self.eps)
    }
}

/// A non-elastic 1-D convolution with optional batch norm and activation.
#[derive(Module, Debug)]
pub struct FixedConv1d<B: Backend> {
    pub weight: Param<Tensor<B, 3>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
    pub norm: Option<FixedBatchNorm<B>>,
    spec: Ignored<FixedConvSpec>,
}

impl<B: Backend> FixedConv1d<B> {
    /// Build from tensors; every tensor is copied.
    pub fn assemble(
        spec: FixedConvSpec,
        weight: Tensor<B, 3>,
        bias: Option<Tensor<B, 1>>,
        norm: Option<(Tensor<B, 1>, Tensor<B, 1>, f64)>,
    ) -> Self {
        Self {
            weight: Param::from_tensor(detached(weight)),
            bias: bias.map(|b| Param::from_tensor(detached(b))),
            norm: norm.map(|(gamma, beta, eps)| FixedBatchNorm {
                gamma: Param::from_tensor(detached(gamma)),
                beta: Param::from_tensor(detached(beta)),
                eps,
            }),
            spec: Ignored(spec),
        }
    }

    pub fn spec(&self) -> &FixedConvSpec {
        &self.spec.0
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let spec = &self.spec.0;
        let options = ConvOptions::new([spec.stride], [spec.padding], [1], 1);
        let out = conv1d(
            input,
            self.weight.val(),
            self.bias.as_ref().map(|b| b.val()),
            options,
        );
        let out = match &self.norm {
            Some(norm) => norm.forward(out),
            None => out,
        };
        spec.activation.apply(out)
    }
}

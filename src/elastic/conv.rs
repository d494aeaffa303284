//! Elastic 1-D convolution: elastic kernel + channel filters + optional
//! batch norm and activation, resizable in place.

use std::str::FromStr;

use burn::module::{Ignored, Module, Param};
use burn::prelude::*;
use burn::tensor::activation::{leaky_relu, relu};
use burn::tensor::module::conv1d;
use burn::tensor::ops::ConvOptions;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::channel::{select_kept, ChannelFilter};
use super::fixed::{FixedConv1d, FixedConvSpec};
use super::kernel::{KernelSizes, KernelTransformChain};
use super::norm::ElasticBatchNorm;
use crate::error::{ChannelAxis, NasError, Result};

// ─── Layer kinds ──────────────────────────────────────────────────

/// Supported layer compositions. Cost estimation and assembly dispatch on
/// this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    Conv,
    ConvAct,
    ConvBn,
    ConvBnAct,
}

impl LayerKind {
    pub fn has_norm(self) -> bool {
        matches!(self, LayerKind::ConvBn | LayerKind::ConvBnAct)
    }

    pub fn has_activation(self) -> bool {
        matches!(self, LayerKind::ConvAct | LayerKind::ConvBnAct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activation {
    Identity,
    Relu,
    LeakyRelu,
}

impl Activation {
    pub fn apply<B: Backend, const D: usize>(self, input: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Identity => input,
            Activation::Relu => relu(input),
            Activation::LeakyRelu => leaky_relu(input, 0.01),
        }
    }
}

impl FromStr for Activation {
    type Err = NasError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "identity" | "none" => Ok(Activation::Identity),
            "relu" => Ok(Activation::Relu),
            "leaky_relu" | "leakyrelu" => Ok(Activation::LeakyRelu),
            _ => Err(NasError::UnknownActivation(name.to_string())),
        }
    }
}

// ─── Configuration ────────────────────────────────────────────────

/// Construction parameters for one elastic convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ElasticConvConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_sizes: Vec<usize>,
    pub stride: usize,
    pub bias: bool,
    pub kind: LayerKind,
    pub activation: Activation,
}

impl ElasticConvConfig {
    pub fn new(in_channels: usize, out_channels: usize, kernel_sizes: Vec<usize>) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel_sizes,
            stride: 1,
            bias: false,
            kind: LayerKind::Conv,
            activation: Activation::Identity,
        }
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_kind(mut self, kind: LayerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Initialise with a uniform `±1/sqrt(fan_in)` master kernel drawn
    /// from `rng`.
    pub fn init<B: Backend, R: Rng>(
        &self,
        rng: &mut R,
        device: &B::Device,
    ) -> Result<ElasticConv1d<B>> {
        let sizes = KernelSizes::new(self.kernel_sizes.clone())?;
        if self.in_channels == 0 || self.out_channels == 0 || self.stride == 0 {
            return Err(NasError::InvalidConfig(format!(
                "convolution {} -> {} with stride {} is degenerate",
                self.in_channels, self.out_channels, self.stride
            )));
        }
        let k = sizes.max();
        let fan_in = (self.in_channels * k) as f32;
        let bound = 1.0 / fan_in.sqrt();
        let count = self.out_channels * self.in_channels * k;
        let data: Vec<f32> = (0..count).map(|_| rng.gen_range(-bound..bound)).collect();
        let master = Tensor::from_data(
            TensorData::new(data, [self.out_channels, self.in_channels, k]),
            device,
        );
        let bias = self.bias.then(|| {
            let data: Vec<f32> = (0..self.out_channels)
                .map(|_| rng.gen_range(-bound..bound))
                .collect();
            Param::from_tensor(Tensor::from_data(
                TensorData::new(data, [self.out_channels]),
                device,
            ))
        });
        let activation = if self.kind.has_activation() {
            self.activation
        } else {
            Activation::Identity
        };

        Ok(ElasticConv1d {
            kernel: KernelTransformChain::new(master, sizes)?,
            bias,
            norm: self
                .kind
                .has_norm()
                .then(|| ElasticBatchNorm::new(self.out_channels, device)),
            spec: Ignored(LayerSpec {
                in_channels: self.in_channels,
                out_channels: self.out_channels,
                stride: self.stride,
                kind: self.kind,
                activation,
            }),
            filters: Ignored(LayerFilters {
                input: ChannelFilter::full(self.in_channels),
                output: ChannelFilter::full(self.out_channels),
            }),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSpec {
    pub in_channels: usize,
    pub out_channels: usize,
    pub stride: usize,
    pub kind: LayerKind,
    pub activation: Activation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LayerFilters {
    input: ChannelFilter,
    output: ChannelFilter,
}

// ─── Elastic layer ────────────────────────────────────────────────

#[derive(Module, Debug)]
pub struct ElasticConv1d<B: Backend> {
    kernel: KernelTransformChain<B>,
    bias: Option<Param<Tensor<B, 1>>>,
    norm: Option<ElasticBatchNorm<B>>,
    spec: Ignored<LayerSpec>,
    filters: Ignored<LayerFilters>,
}

impl<B: Backend> ElasticConv1d<B> {
    pub fn spec(&self) -> &LayerSpec {
        &self.spec.0
    }

    pub fn kind(&self) -> LayerKind {
        self.spec.0.kind
    }

    pub fn kernel_chain(&self) -> &KernelTransformChain<B> {
        &self.kernel
    }

    pub fn kernel_chain_mut(&mut self) -> &mut KernelTransformChain<B> {
        &mut self.kernel
    }

    // ── kernel elasticity ──

    pub fn set_active_kernel(&mut self, size: usize) {
        self.kernel.selection_mut().set_active_kernel(size);
    }

    pub fn pick_kernel_index(&mut self, index: usize) {
        self.kernel.selection_mut().pick_kernel_index(index);
    }

    /// Step to the next smaller kernel; `false` once at the smallest.
    pub fn step_down_kernel(&mut self) -> bool {
        self.kernel.selection_mut().step_down()
    }

    pub fn reset_kernel(&mut self) {
        self.kernel.selection_mut().reset();
    }

    pub fn active_kernel_size(&self) -> usize {
        self.kernel.selection().active_size()
    }

    pub fn kernel_index(&self) -> usize {
        self.kernel.selection().target_index()
    }

    pub fn kernel_step_count(&self) -> usize {
        self.kernel.selection().step_count()
    }

    pub fn derive_active_kernel(&self) -> Tensor<B, 3> {
        self.kernel.derive_active_kernel()
    }

    // ── width elasticity ──

    pub fn set_in_channel_filter(&mut self, filter: ChannelFilter) -> Result<()> {
        filter.check(self.spec.0.in_channels, ChannelAxis::Input)?;
        self.filters.0.input = filter;
        Ok(())
    }

    /// Filter output channels; the batch norm follows.
    pub fn set_out_channel_filter(&mut self, filter: ChannelFilter) -> Result<()> {
        filter.check(self.spec.0.out_channels, ChannelAxis::Output)?;
        if let Some(norm) = self.norm.as_mut() {
            norm.set_channel_filter(filter.clone())?;
        }
        self.filters.0.output = filter;
        Ok(())
    }

    pub fn reset_channel_filters(&mut self) {
        let (inputs, outputs) = (self.spec.0.in_channels, self.spec.0.out_channels);
        self.filters.0.input = ChannelFilter::full(inputs);
        self.filters.0.output = ChannelFilter::full(outputs);
        if let Some(norm) = self.norm.as_mut() {
            // full filters always match
            let _ = norm.set_channel_filter(ChannelFilter::full(outputs));
        }
    }

    pub fn in_channel_filter(&self) -> &ChannelFilter {
        &self.filters.0.input
    }

    pub fn out_channel_filter(&self) -> &ChannelFilter {
        &self.filters.0.output
    }

    pub fn active_in_channels(&self) -> usize {
        self.filters.0.input.kept()
    }

    pub fn active_out_channels(&self) -> usize {
        self.filters.0.output.kept()
    }

    /// L1 norm of each output channel of the master kernel.
    pub fn out_channel_importance(&self) -> Vec<f32> {
        let [out_channels, _, _] = self.kernel.master().dims();
        self.kernel
            .master()
            .abs()
            .sum_dim(2)
            .sum_dim(1)
            .reshape([out_channels])
            .into_data()
            .iter::<f32>()
            .collect()
    }

    // ── forward / assembly ──

    /// Kernel and bias for the current (kernel size x channel) selection.
    pub fn active_weights(&self) -> (Tensor<B, 3>, Option<Tensor<B, 1>>) {
        let filters = &self.filters.0;
        let kernel = self.kernel.derive_active_kernel();
        let kernel = select_kept(select_kept(kernel, 0, &filters.output), 1, &filters.input);
        let bias = self
            .bias
            .as_ref()
            .map(|b| select_kept(b.val(), 0, &filters.output));
        (kernel, bias)
    }

    fn padding(&self) -> usize {
        self.active_kernel_size() / 2
    }

    /// `[batch, active_in, length]` -> `[batch, active_out, length / stride]`
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let (kernel, bias) = self.active_weights();
        let options = ConvOptions::new([self.spec.0.stride], [self.padding()], [1], 1);
        let out = conv1d(input, kernel, bias, options);
        let out = match &self.norm {
            Some(norm) => norm.forward(out),
            None => out,
        };
        self.spec.0.activation.apply(out)
    }

    /// Independent plain layer equivalent to the current selection.
    pub fn assemble_fixed_layer(&self) -> FixedConv1d<B> {
        let (kernel, bias) = self.active_weights();
        let spec = FixedConvSpec {
            kind: self.spec.0.kind,
            in_channels: self.active_in_channels(),
            out_channels: self.active_out_channels(),
            kernel_size: self.active_kernel_size(),
            stride: self.spec.0.stride,
            padding: self.padding(),
            activation: self.spec.0.activation,
        };
        let norm = self.norm.as_ref().map(|norm| {
            let (gamma, beta) = norm.active_affine();
            (gamma, beta, norm.eps())
        });
        FixedConv1d::assemble(spec, kernel, bias, norm)
    }
}

// ─── Tests ────────────────────────────────────────────────────────

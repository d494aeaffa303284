//! Batch normalisation over a filtered channel subset.
//!
//! Statistics always come from the current batch (no running averages),
//! so the elastic and assembled variants normalise identically.

use burn::module::{Ignored, Module, Param};
use burn::prelude::*;

use super::channel::{select_kept, ChannelFilter};
use crate::error::{ChannelAxis, Result};

pub const BATCH_NORM_EPS: f64 = 1e-5;

/// Normalise `[batch, channels, length]` per channel, then scale and shift.
pub fn batch_norm<B: Backend>(
    input: Tensor<B, 3>,
    gamma: Tensor<B, 1>,
    beta: Tensor<B, 1>,
    eps: f64,
) -> Tensor<B, 3> {
    let [_, channels, _] = input.dims();
    let mean = input.clone().mean_dim(0).mean_dim(2);
    let centered = input - mean;
    let var = centered.clone().powf_scalar(2.0).mean_dim(0).mean_dim(2);
    let normalized = centered / (var + eps).sqrt();
    normalized * gamma.reshape([1, channels, 1]) + beta.reshape([1, channels, 1])
}

/// Batch norm whose affine parameters follow the owning layer's output
/// channel filter.
#[derive(Module, Debug)]
pub struct ElasticBatchNorm<B: Backend> {
    gamma: Param<Tensor<B, 1>>,
    beta: Param<Tensor<B, 1>>,
    eps: f64,
    filter: Ignored<ChannelFilter>,
}

impl<B: Backend> ElasticBatchNorm<B> {
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            eps: BATCH_NORM_EPS,
            filter: Ignored(ChannelFilter::full(channels)),
        }
    }

    pub fn channels(&self) -> usize {
        self.filter.0.len()
    }

    pub fn set_channel_filter(&mut self, filter: ChannelFilter) -> Result<()> {
        filter.check(self.channels(), ChannelAxis::Output)?;
        self.filter = Ignored(filter);
        Ok(())
    }

    pub fn channel_filter(&self) -> &ChannelFilter {
        &self.filter.0
    }

    /// Scale and shift restricted to the kept channels.
    pub fn active_affine(&self) -> (Tensor<B, 1>, Tensor<B, 1>) {
        (
            select_kept(self.gamma.val(), 0, &self.filter.0),
            select_kept(self.beta.val(), 0, &self.filter.0),
        )
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 3> {
        let (gamma, beta) = self.active_affine();
        batch_norm(input, gamma, beta, self.eps)
    }
}

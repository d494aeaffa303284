//! Channel filters: boolean masks selecting active input/output channels.
//!
//! Filtering never reorders: kept channels appear in their original order.
//! Length mismatches and empty selections are reported as errors; the
//! resulting tensor would be degenerate otherwise.

use burn::prelude::*;
use log::error;

use crate::error::{ChannelAxis, NasError, Result};

/// `true` = keep the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    keep: Vec<bool>,
}

impl ChannelFilter {
    /// Keep every channel.
    pub fn full(channels: usize) -> Self {
        Self {
            keep: vec![true; channels],
        }
    }

    pub fn from_mask(keep: Vec<bool>) -> Self {
        Self { keep }
    }

    /// Keep the first `kept` channels.
    pub fn leading(channels: usize, kept: usize) -> Self {
        Self {
            keep: (0..channels).map(|c| c < kept).collect(),
        }
    }

    /// Keep the `kept` highest-scoring channels, in original order.
    ///
    /// Ties resolve towards the lower channel index. NaN scores rank below
    /// every number.
    pub fn top_k(scores: &[f32], kept: usize) -> Self {
        let score = |c: usize| {
            if scores[c].is_nan() {
                f32::NEG_INFINITY
            } else {
                scores[c]
            }
        };
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| score(b).total_cmp(&score(a)).then(a.cmp(&b)));
        let mut keep = vec![false; scores.len()];
        for &channel in order.iter().take(kept) {
            keep[channel] = true;
        }
        Self { keep }
    }

    pub fn len(&self) -> usize {
        self.keep.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keep.is_empty()
    }

    /// Number of kept channels.
    pub fn kept(&self) -> usize {
        self.keep.iter().filter(|&&k| k).count()
    }

    /// No channel is filtered out.
    pub fn is_full(&self) -> bool {
        self.keep.iter().all(|&k| k)
    }

    pub fn mask(&self) -> &[bool] {
        &self.keep
    }

    /// Indices of kept channels, ascending.
    pub fn indices(&self) -> Vec<usize> {
        self.keep
            .iter()
            .enumerate()
            .filter_map(|(i, &k)| k.then_some(i))
            .collect()
    }

    /// Check this filter against a tensor dimension.
    pub fn check(&self, channels: usize, axis: ChannelAxis) -> Result<()> {
        if self.keep.len() != channels {
            error!(
                "unable to filter weights: {} channel count {} does not match filter length {}",
                axis,
                channels,
                self.keep.len()
            );
            return Err(NasError::ChannelFilterMismatch {
                axis,
                filter_len: self.keep.len(),
                channels,
            });
        }
        if self.kept() == 0 {
            error!("zero {} channels kept during channel filter application", axis);
            return Err(NasError::EmptyChannelFilter { axis });
        }
        Ok(())
    }

    fn index_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1, Int> {
        let indices: Vec<i32> = self.indices().into_iter().map(|i| i as i32).collect();
        let len = indices.len();
        Tensor::from_data(TensorData::new(indices, [len]), device)
    }
}

/// Filter a primary weight tensor `[out, in, k]` to `[out', in', k]`.
///
/// Returns the input unchanged when both filters keep every channel.
pub fn filter_primary_weights<B: Backend>(
    weights: Tensor<B, 3>,
    in_filter: &ChannelFilter,
    out_filter: &ChannelFilter,
) -> Result<Tensor<B, 3>> {
    let [out_channels, in_channels, _] = weights.dims();
    in_filter.check(in_channels, ChannelAxis::Input)?;
    out_filter.check(out_channels, ChannelAxis::Output)?;

    let filtered = select_kept(weights, 0, out_filter);
    Ok(select_kept(filtered, 1, in_filter))
}

/// Filter a per-channel vector (bias, norm scale/shift).
pub fn filter_vector<B: Backend>(
    values: Tensor<B, 1>,
    filter: &ChannelFilter,
) -> Result<Tensor<B, 1>> {
    let [channels] = values.dims();
    filter.check(channels, ChannelAxis::Output)?;
    Ok(select_kept(values, 0, filter))
}

/// Select kept channels along `dim` of a tensor already checked against
/// `filter`. A full filter returns the tensor as is.
pub(crate) fn select_kept<B: Backend, const D: usize>(
    tensor: Tensor<B, D>,
    dim: usize,
    filter: &ChannelFilter,
) -> Tensor<B, D> {
    if filter.is_full() {
        return tensor;
    }
    let device = tensor.device();
    tensor.select(dim, filter.index_tensor::<B>(&device))
}

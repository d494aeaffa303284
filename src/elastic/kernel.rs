//! Elastic kernel: one master convolution kernel, many kernel sizes.
//!
//! Smaller kernels are never stored. The kernel for size `k[i+1]` is the
//! centred `k[i+1]`-wide window of the kernel for size `k[i]`, passed
//! through a learned `k[i+1] x k[i+1]` linear transform. Transforms start
//! as the identity, so an untrained chain simply crops the master kernel.

use std::ops::Range;

use burn::module::{Ignored, Module, Param, ParamId};
use burn::prelude::*;
use log::{debug, warn};

use crate::error::{NasError, Result};

// ─── Kernel size list ─────────────────────────────────────────────

/// Configured kernel sizes, strictly descending. Index 0 is the full size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSizes(Vec<usize>);

impl KernelSizes {
    /// Sort descending and validate.
    ///
    /// Sizes must be odd (same padding keeps the sequence length fixed) and
    /// distinct.
    pub fn new(mut sizes: Vec<usize>) -> Result<Self> {
        if sizes.is_empty() {
            return Err(NasError::InvalidKernelSizes {
                sizes,
                reason: "no kernel sizes configured".into(),
            });
        }
        sizes.sort_unstable_by(|a, b| b.cmp(a));
        if sizes.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(NasError::InvalidKernelSizes {
                sizes,
                reason: "duplicate kernel size".into(),
            });
        }
        if let Some(&even) = sizes.iter().find(|&&k| k % 2 == 0) {
            return Err(NasError::InvalidKernelSizes {
                reason: format!("kernel size {} is not odd", even),
                sizes,
            });
        }
        Ok(Self(sizes))
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn max(&self) -> usize {
        self.0[0]
    }

    pub fn min(&self) -> usize {
        self.0[self.0.len() - 1]
    }

    pub fn get(&self, index: usize) -> Option<usize> {
        self.0.get(index).copied()
    }

    pub fn index_of(&self, size: usize) -> Option<usize> {
        self.0.iter().position(|&k| k == size)
    }
}

/// Centred sub-window of a `full`-wide kernel that is `size` wide.
///
/// `start = full/2 - size/2`, `end = start + size`. A window that does not
/// fit inside the full kernel is a programming error.
pub fn centered_window(full: usize, size: usize) -> Range<usize> {
    assert!(
        size <= full,
        "sub-kernel of size {} cannot be cut from kernel of size {}",
        size,
        full
    );
    let start = full / 2 - size / 2;
    let end = start + size;
    assert!(
        end <= full && end - start == size,
        "centred window {}..{} of kernel {} does not hold {} elements",
        start,
        end,
        full,
        size
    );
    start..end
}

// ─── Active size selection ────────────────────────────────────────

/// Which of the configured kernel sizes is active.
///
/// All setters fail soft: invalid requests are logged and corrected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSelection {
    sizes: KernelSizes,
    target: usize,
}

impl KernelSelection {
    pub fn new(sizes: KernelSizes) -> Self {
        Self { sizes, target: 0 }
    }

    pub fn sizes(&self) -> &KernelSizes {
        &self.sizes
    }

    /// Index of the active size (0 = largest).
    pub fn target_index(&self) -> usize {
        self.target
    }

    pub fn active_size(&self) -> usize {
        self.sizes.0[self.target]
    }

    /// Number of elasticity levels.
    pub fn step_count(&self) -> usize {
        self.sizes.len()
    }

    /// Select a kernel size.
    ///
    /// Out-of-range sizes clamp to the nearest bound. Sizes inside the
    /// range that are not configured fall back to the full size.
    pub fn set_active_kernel(&mut self, size: usize) {
        let (max, min) = (self.sizes.max(), self.sizes.min());
        let mut size = size;
        if size < min || size > max {
            warn!(
                "requested elastic kernel size ({}) outside of range ({}, {}), clamping",
                size, max, min
            );
            size = if size < min { min } else { max };
        }
        match self.sizes.index_of(size) {
            Some(index) => self.target = index,
            None => {
                warn!(
                    "requested elastic kernel size {} is not an available kernel size, defaulting to full size ({})",
                    size, max
                );
                self.target = 0;
            }
        }
    }

    /// Select by index. Out-of-range indices select the smallest size.
    pub fn pick_kernel_index(&mut self, index: usize) {
        let index = if index >= self.sizes.len() {
            warn!(
                "selected kernel index {} is out of range 0..{}, using last index",
                index,
                self.sizes.len()
            );
            self.sizes.len() - 1
        } else {
            index
        };
        self.set_active_kernel(self.sizes.0[index]);
    }

    /// Advance to the next smaller size.
    ///
    /// Returns `false` (and changes nothing) when already at the smallest.
    pub fn step_down(&mut self) -> bool {
        let next = self.target + 1;
        if next < self.sizes.len() {
            self.set_active_kernel(self.sizes.0[next]);
            true
        } else {
            debug!(
                "unable to step down kernel size, already at index {} (size {})",
                self.target,
                self.active_size()
            );
            false
        }
    }

    pub fn reset(&mut self) {
        self.set_active_kernel(self.sizes.max());
    }
}

// ─── Transform chain ──────────────────────────────────────────────

/// Master kernel `[out, in, k_max]` plus one transform per adjacent pair
/// of kernel sizes.
#[derive(Module, Debug)]
pub struct KernelTransformChain<B: Backend> {
    master: Param<Tensor<B, 3>>,
    transforms: Vec<Param<Tensor<B, 2>>>,
    selection: Ignored<KernelSelection>,
}

impl<B: Backend> KernelTransformChain<B> {
    /// Build from an initial master kernel. Transforms start as identity.
    pub fn new(master: Tensor<B, 3>, sizes: KernelSizes) -> Result<Self> {
        let [_, _, width] = master.dims();
        if width != sizes.max() {
            return Err(NasError::InvalidKernelSizes {
                sizes: sizes.as_slice().to_vec(),
                reason: format!("master kernel width {} differs from largest size", width),
            });
        }
        let device = master.device();
        let transforms = sizes.as_slice()[1..]
            .iter()
            .map(|&k| Param::from_tensor(identity::<B>(k, &device)))
            .collect();
        Ok(Self {
            master: Param::from_tensor(master),
            transforms,
            selection: Ignored(KernelSelection::new(sizes)),
        })
    }

    pub fn selection(&self) -> &KernelSelection {
        &self.selection.0
    }

    pub fn selection_mut(&mut self) -> &mut KernelSelection {
        &mut self.selection.0
    }

    /// The untransformed full-size kernel.
    pub fn master(&self) -> Tensor<B, 3> {
        self.master.val()
    }

    pub fn master_id(&self) -> ParamId {
        self.master.id
    }

    /// Transform from step `index` to `index + 1`.
    pub fn transform(&self, index: usize) -> Option<Tensor<B, 2>> {
        self.transforms.get(index).map(|t| t.val())
    }

    /// Replace the transform from step `index` to `index + 1`.
    ///
    /// The transform must be square over the smaller kernel size of the step.
    pub fn set_transform(&mut self, index: usize, transform: Tensor<B, 2>) -> Result<()> {
        let sizes = self.selection.0.sizes().as_slice();
        let Some(&width) = sizes.get(index + 1) else {
            return Err(NasError::InvalidKernelSizes {
                sizes: sizes.to_vec(),
                reason: format!("no transform at step {}", index),
            });
        };
        if transform.dims() != [width, width] {
            return Err(NasError::InvalidKernelSizes {
                sizes: sizes.to_vec(),
                reason: format!(
                    "transform {} has shape {:?}, expected [{}, {}]",
                    index,
                    transform.dims(),
                    width,
                    width
                ),
            });
        }
        self.transforms[index] = Param::from_tensor(transform);
        Ok(())
    }

    /// Kernel for the active size, derived from the master kernel.
    ///
    /// Pure: walks crop-then-transform from index 0 to the target index
    /// without touching stored parameters. Index 0 returns the master.
    pub fn derive_active_kernel(&self) -> Tensor<B, 3> {
        let sizes = self.selection.0.sizes().as_slice();
        let target = self.selection.0.target_index();
        let mut kernel = self.master.val();

        for step in 0..target {
            let (full, next) = (sizes[step], sizes[step + 1]);
            let window = centered_window(full, next);
            let [out_channels, in_channels, _] = kernel.dims();
            let center = kernel.narrow(2, window.start, next);
            // y = x · Tᵀ over the kernel axis, shared by all channel pairs
            kernel = center
                .reshape([out_channels * in_channels, next])
                .matmul(self.transforms[step].val().transpose())
                .reshape([out_channels, in_channels, next]);
        }

        kernel
    }
}

fn identity<B: Backend>(size: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut data = vec![0.0f32; size * size];
    for i in 0..size {
        data[i * size + i] = 1.0;
    }
    Tensor::from_data(TensorData::new(data, [size, size]), device)
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    fn sizes(list: &[usize]) -> KernelSizes {
        KernelSizes::new(list.to_vec()).unwrap()
    }

    fn ramp_kernel(out: usize, inp: usize, k: usize) -> Tensor<B, 3> {
        let data: Vec<f32> = (0..out * inp * k).map(|v| v as f32).collect();
        Tensor::from_data(TensorData::new(data, [out, inp, k]), &Default::default())
    }

    #[test]
    fn sizes_are_sorted_descending() {
        assert_eq!(sizes(&[3, 7, 5]).as_slice(), &[7, 5, 3]);
    }

    #[test]
    fn rejects_duplicate_even_and_empty_sizes() {
        assert!(KernelSizes::new(vec![5, 5, 3]).is_err());
        assert!(KernelSizes::new(vec![6, 3]).is_err());
        assert!(KernelSizes::new(vec![]).is_err());
    }

    #[test]
    fn centered_window_is_centred() {
        assert_eq!(centered_window(7, 5), 1..6);
        assert_eq!(centered_window(7, 3), 2..5);
        assert_eq!(centered_window(5, 5), 0..5);
        assert_eq!(centered_window(9, 1), 4..5);
    }

    #[test]
    #[should_panic]
    fn centered_window_larger_than_kernel_panics() {
        centered_window(3, 5);
    }

    #[test]
    fn step_down_visits_every_size_once() {
        for list in [&[7usize, 5, 3][..], &[9, 7, 5, 3, 1], &[3]] {
            let mut selection = KernelSelection::new(sizes(list));
            let mut visited = vec![selection.active_size()];
            while selection.step_down() {
                visited.push(selection.active_size());
            }
            assert_eq!(visited, list.to_vec());
            assert!(!selection.step_down(), "final call must keep returning false");
            assert_eq!(selection.active_size(), *list.last().unwrap());
        }
    }

    #[test_log::test]
    fn out_of_range_sizes_clamp_to_nearest_bound() {
        let mut selection = KernelSelection::new(sizes(&[7, 5, 3]));
        selection.set_active_kernel(3);
        assert_eq!(selection.active_size(), 3);
        selection.set_active_kernel(9);
        assert_eq!(selection.active_size(), 7);
        selection.set_active_kernel(1);
        assert_eq!(selection.active_size(), 3);
    }

    #[test]
    fn unknown_size_in_range_defaults_to_full() {
        let mut selection = KernelSelection::new(sizes(&[7, 3]));
        selection.set_active_kernel(3);
        selection.set_active_kernel(5);
        assert_eq!(selection.target_index(), 0);
        assert_eq!(selection.active_size(), 7);
    }

    #[test]
    fn out_of_range_index_selects_smallest() {
        let mut selection = KernelSelection::new(sizes(&[7, 5, 3]));
        selection.pick_kernel_index(1);
        assert_eq!(selection.active_size(), 5);
        selection.pick_kernel_index(10);
        assert_eq!(selection.active_size(), 3);
        selection.reset();
        assert_eq!(selection.target_index(), 0);
    }

    #[test]
    fn index_zero_returns_master_unchanged() {
        let master = ramp_kernel(2, 3, 7);
        let chain = KernelTransformChain::new(master.clone(), sizes(&[7, 5, 3])).unwrap();
        let derived = chain.derive_active_kernel();
        derived.into_data().assert_eq(&master.into_data(), true);
    }

    #[test]
    fn identity_transforms_crop_the_centre() {
        let master = ramp_kernel(1, 1, 7);
        let mut chain = KernelTransformChain::new(master, sizes(&[7, 5, 3])).unwrap();
        chain.selection_mut().set_active_kernel(3);
        let derived = chain.derive_active_kernel();
        assert_eq!(derived.dims(), [1, 1, 3]);
        assert_eq!(
            derived.into_data().to_vec::<f32>().unwrap(),
            vec![2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn transforms_are_applied_in_order() {
        let device = Default::default();
        let master = ramp_kernel(1, 1, 5);
        let mut chain = KernelTransformChain::new(master.clone(), sizes(&[5, 3])).unwrap();
        // reverse the 3-wide window
        let reverse = Tensor::<B, 2>::from_floats(
            [[0.0, 0.0, 1.0], [0.0, 1.0, 0.0], [1.0, 0.0, 0.0]],
            &device,
        );
        chain.set_transform(0, reverse).unwrap();
        chain.selection_mut().step_down();
        let derived = chain.derive_active_kernel();
        assert_eq!(
            derived.into_data().to_vec::<f32>().unwrap(),
            vec![3.0, 2.0, 1.0]
        );
        // master untouched
        chain
            .master()
            .into_data()
            .assert_eq(&master.into_data(), true);
    }

    #[test]
    fn set_transform_rejects_bad_step_or_shape() {
        let device = Default::default();
        let mut chain = KernelTransformChain::new(ramp_kernel(1, 1, 5), sizes(&[5, 3])).unwrap();
        let missing = chain.set_transform(1, Tensor::<B, 2>::zeros([3, 3], &device));
        assert!(matches!(missing, Err(NasError::InvalidKernelSizes { .. })));
        let wrong_shape = chain.set_transform(0, Tensor::<B, 2>::zeros([5, 5], &device));
        assert!(matches!(wrong_shape, Err(NasError::InvalidKernelSizes { .. })));
        // unchanged after the rejected replacements
        chain
            .transform(0)
            .unwrap()
            .into_data()
            .assert_eq(&identity::<B>(3, &device).into_data(), true);
    }

    #[test]
    fn rejects_master_width_mismatch() {
        let master = ramp_kernel(1, 1, 5);
        assert!(KernelTransformChain::new(master, sizes(&[7, 5])).is_err());
    }
}

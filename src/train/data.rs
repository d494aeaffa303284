//! In-memory classification datasets.
//!
//! Samples live on the host as flat `f32` buffers and are uploaded per
//! batch, so one dataset can be shared by every worker thread.

use burn::config::Config;
use burn::prelude::*;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::error::NasError;

/// Shape and size of the synthetic sequence-classification task.
#[derive(Config, Debug)]
pub struct DatasetConfig {
    #[config(default = 1)]
    pub input_channels: usize,
    #[config(default = 4)]
    pub num_classes: usize,
    #[config(default = 64)]
    pub sequence_length: usize,
    #[config(default = 256)]
    pub train_samples: usize,
    #[config(default = 64)]
    pub valid_samples: usize,
    /// Amplitude of uniform noise added to every sample.
    #[config(default = 0.1)]
    pub noise: f64,
    #[config(default = 42)]
    pub seed: u64,
}

/// One device-resident mini-batch.
pub struct Batch<B: Backend> {
    /// `[batch, channels, length]`
    pub inputs: Tensor<B, 3>,
    /// `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Labelled sequences stored row-major as `[samples, channels, length]`.
#[derive(Debug, Clone)]
pub struct Dataset {
    inputs: Vec<f32>,
    labels: Vec<i32>,
    channels: usize,
    length: usize,
}

impl Dataset {
    pub fn new(inputs: Vec<f32>, labels: Vec<i32>, channels: usize, length: usize) -> crate::Result<Self> {
        if inputs.len() != labels.len() * channels * length {
            return Err(NasError::InvalidConfig(format!(
                "dataset buffer holds {} values, expected {} samples x {} x {}",
                inputs.len(),
                labels.len(),
                channels,
                length
            )));
        }
        Ok(Self {
            inputs,
            labels,
            channels,
            length,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sequence_length(&self) -> usize {
        self.length
    }

    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    /// Batches in storage order.
    pub fn batches<B: Backend>(&self, batch_size: usize, device: &B::Device) -> Vec<Batch<B>> {
        let order: Vec<usize> = (0..self.len()).collect();
        self.gather_batches(&order, batch_size, device)
    }

    /// Batches in an order shuffled by `rng`.
    pub fn shuffled_batches<B: Backend, R: Rng>(
        &self,
        batch_size: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Vec<Batch<B>> {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.shuffle(rng);
        self.gather_batches(&order, batch_size, device)
    }

    fn gather_batches<B: Backend>(
        &self,
        order: &[usize],
        batch_size: usize,
        device: &B::Device,
    ) -> Vec<Batch<B>> {
        let sample = self.channels * self.length;
        order
            .chunks(batch_size.max(1))
            .map(|chunk| {
                let mut inputs = Vec::with_capacity(chunk.len() * sample);
                let mut targets = Vec::with_capacity(chunk.len());
                for &i in chunk {
                    inputs.extend_from_slice(&self.inputs[i * sample..(i + 1) * sample]);
                    targets.push(self.labels[i]);
                }
                Batch {
                    inputs: Tensor::from_data(
                        TensorData::new(inputs, [chunk.len(), self.channels, self.length]),
                        device,
                    ),
                    targets: Tensor::from_data(TensorData::new(targets, [chunk.len()]), device),
                }
            })
            .collect()
    }
}

/// Seeded sinusoid classification task: class `c` oscillates with
/// frequency `c + 1`, each channel with its own phase.
pub struct SyntheticDataset;

impl SyntheticDataset {
    /// `(train, valid)` splits drawn from one seeded generator.
    pub fn generate(config: &DatasetConfig) -> crate::Result<(Dataset, Dataset)> {
        if config.input_channels == 0 || config.num_classes == 0 || config.sequence_length == 0 {
            return Err(NasError::InvalidConfig(
                "dataset channels, classes and sequence length must be non-zero".into(),
            ));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
        let train = Self::split(config, config.train_samples, &mut rng)?;
        let valid = Self::split(config, config.valid_samples, &mut rng)?;
        Ok((train, valid))
    }

    fn split(config: &DatasetConfig, samples: usize, rng: &mut Xoshiro256PlusPlus) -> crate::Result<Dataset> {
        let (channels, length) = (config.input_channels, config.sequence_length);
        let noise = config.noise as f32;
        let mut inputs = Vec::with_capacity(samples * channels * length);
        let mut labels = Vec::with_capacity(samples);

        for _ in 0..samples {
            let class = rng.gen_range(0..config.num_classes);
            let frequency = (class + 1) as f32;
            let phase: f32 = rng.gen_range(0.0..std::f32::consts::TAU);
            for channel in 0..channels {
                let offset = channel as f32 * 0.5;
                for t in 0..length {
                    let x = std::f32::consts::TAU * frequency * t as f32 / length as f32;
                    let jitter = if noise > 0.0 {
                        rng.gen_range(-noise..noise)
                    } else {
                        0.0
                    };
                    inputs.push((x + phase + offset).sin() + jitter);
                }
            }
            labels.push(class as i32);
        }
        Dataset::new(inputs, labels, channels, length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray;

    #[test]
    fn generates_requested_shapes() {
        let config = DatasetConfig::new()
            .with_input_channels(2)
            .with_train_samples(10)
            .with_valid_samples(3)
            .with_sequence_length(16);
        let (train, valid) = SyntheticDataset::generate(&config).unwrap();
        assert_eq!(train.len(), 10);
        assert_eq!(valid.len(), 3);
        assert!(train.labels().iter().all(|&l| (0..4).contains(&l)));

        let batches = train.batches::<B>(4, &Default::default());
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].inputs.dims(), [4, 2, 16]);
        assert_eq!(batches[2].targets.dims(), [2]);
    }

    #[test]
    fn same_seed_same_data() {
        let config = DatasetConfig::new().with_train_samples(8).with_valid_samples(2);
        let (a, _) = SyntheticDataset::generate(&config).unwrap();
        let (b, _) = SyntheticDataset::generate(&config).unwrap();
        assert_eq!(a.labels(), b.labels());
        assert_eq!(a.inputs, b.inputs);
    }

    #[test]
    fn rejects_inconsistent_buffers() {
        assert!(Dataset::new(vec![0.0; 5], vec![0, 1], 1, 3).is_err());
    }

    #[test]
    fn dataset_config_loads_partial_json_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, r#"{"num_classes": 3, "seed": 9}"#).unwrap();
        let config = DatasetConfig::load(&path).unwrap();
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.seed, 9);
        assert_eq!(config.sequence_length, 64);
        assert_eq!(config.train_samples, 256);
    }
}

pub mod estimate;
pub mod init;
pub mod search;
pub mod shrink;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, NdArray};

use elastic_nas::config::NasConfig;
use elastic_nas::train::{Dataset, SyntheticDataset};
use elastic_nas::Metrics;

/// Backend every command trains on.
pub type TrainBackend = Autodiff<NdArray>;

pub fn device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

/// The first `count` discrete GPUs, for round-robin task placement.
pub fn gpu_devices(count: usize) -> Vec<WgpuDevice> {
    (0..count).map(WgpuDevice::DiscreteGpu).collect()
}

pub fn load_config(path: &Path) -> Result<NasConfig> {
    NasConfig::from_file(path).with_context(|| format!("cannot load '{}'", path.display()))
}

/// Train and validation splits described by the configuration.
pub fn datasets(config: &NasConfig) -> Result<(Arc<Dataset>, Arc<Dataset>)> {
    let (train, valid) = SyntheticDataset::generate(&config.dataset)?;
    Ok((Arc::new(train), Arc::new(valid)))
}

/// One line of `name=value` pairs.
pub fn format_metrics(metrics: &Metrics) -> String {
    metrics
        .iter()
        .map(|(name, value)| {
            if value.is_finite() && value.abs() >= 1000.0 {
                format!("{}={:.0}", name, value)
            } else {
                format!("{}={:.4}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("cannot create '{}'", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), value)?;
    Ok(())
}

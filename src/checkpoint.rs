//! Super-network checkpoints.
//!
//! Uses burn's native record format (NamedMpk) for the weights. Elastic
//! selection state is not recorded; a loaded network starts at full size.

use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};

use crate::error::{NasError, Result};

/// Checkpoint tag for naming saved files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTag {
    Warmup,
    WidthStep(usize),
}

impl CheckpointTag {
    fn stem(&self) -> String {
        match self {
            Self::Warmup => "warmup".to_string(),
            Self::WidthStep(step) => format!("width_step_{}", step),
        }
    }
}

/// Path a checkpoint with `tag` occupies inside `dir`.
pub fn checkpoint_path(dir: &Path, tag: CheckpointTag) -> PathBuf {
    dir.join(tag.stem()).with_extension("mpk")
}

/// Save a model checkpoint into `dir`, creating it if needed.
pub fn save_checkpoint<B: Backend, M: Module<B> + Clone>(
    model: &M,
    dir: &Path,
    tag: CheckpointTag,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| NasError::Checkpoint {
        path: dir.display().to_string(),
        message: e.to_string(),
    })?;

    let path = dir.join(tag.stem());
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path.clone(), &recorder)
        .map_err(|e| NasError::Checkpoint {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    // burn appends .mpk extension
    Ok(checkpoint_path(dir, tag))
}

/// Load weights into `model`. `None` if the checkpoint doesn't exist.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    dir: &Path,
    tag: CheckpointTag,
    device: &B::Device,
) -> Result<Option<M>> {
    let full_path = checkpoint_path(dir, tag);
    if !full_path.exists() {
        return Ok(None);
    }

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let loaded = model
        .load_file(dir.join(tag.stem()), &recorder, device)
        .map_err(|e| NasError::Checkpoint {
            path: full_path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(Some(loaded))
}

//! Error taxonomy for super-network construction, training and search.
//!
//! Soft conditions (kernel size clamping, unknown sizes) never reach this
//! type: they are logged and corrected in place. Everything here either
//! aborts construction or is caught at an evaluation-task boundary.

use thiserror::Error;

/// Which side of a weight tensor a channel filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAxis {
    Input,
    Output,
}

impl std::fmt::Display for ChannelAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelAxis::Input => write!(f, "input"),
            ChannelAxis::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NasError {
    #[error("invalid kernel sizes {sizes:?}: {reason}")]
    InvalidKernelSizes { sizes: Vec<usize>, reason: String },

    #[error("{axis} channel filter has length {filter_len}, tensor has {channels} channels")]
    ChannelFilterMismatch {
        axis: ChannelAxis,
        filter_len: usize,
        channels: usize,
    },

    #[error("zero {axis} channels kept by channel filter")]
    EmptyChannelFilter { axis: ChannelAxis },

    #[error("unknown activation '{0}'")]
    UnknownActivation(String),

    #[error("invalid super-network configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid parametrization: {0}")]
    InvalidParametrization(String),

    #[error("no candidate within bounds after {attempts} presample attempts")]
    PresampleExhausted { attempts: usize },

    #[error("training failed: {0}")]
    Training(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("checkpoint {path}: {message}")]
    Checkpoint { path: String, message: String },

    #[error("configuration: {0}")]
    Config(String),

    #[error("worker pool: {0}")]
    Pool(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, NasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_errors_name_the_axis() {
        let err = NasError::EmptyChannelFilter {
            axis: ChannelAxis::Output,
        };
        assert_eq!(err.to_string(), "zero output channels kept by channel filter");

        let err = NasError::ChannelFilterMismatch {
            axis: ChannelAxis::Input,
            filter_len: 3,
            channels: 4,
        };
        assert!(err.to_string().contains("input channel filter has length 3"));
    }
}

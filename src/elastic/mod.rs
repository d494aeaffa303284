//! Elastic building blocks: kernels that shrink, channels that filter.

pub mod channel;
pub mod conv;
pub mod fixed;
pub mod kernel;
pub mod norm;

pub use channel::{filter_primary_weights, filter_vector, ChannelFilter};
pub use conv::{Activation, ElasticConv1d, ElasticConvConfig, LayerKind, LayerSpec};
pub use fixed::{FixedConv1d, FixedConvSpec};
pub use kernel::{centered_window, KernelSelection, KernelSizes, KernelTransformChain};
pub use norm::ElasticBatchNorm;

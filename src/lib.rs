//! Once-for-all neural architecture search for 1-D convolutional networks.
//!
//! An [`supernet::ElasticSuperNet`] holds every kernel size, width and
//! depth at once. [`shrink::ProgressiveShrinking`] trains it so that its
//! sub-networks stay accurate, and [`search::AgingEvolutionSearch`] looks
//! for the sub-networks that best trade accuracy against cost.

pub mod checkpoint;
pub mod config;
pub mod cost;
pub mod elastic;
pub mod error;
pub mod search;
pub mod shrink;
pub mod supernet;
pub mod train;

pub use error::{NasError, Result};

/// Named scalar results of an estimate or evaluation.
pub type Metrics = std::collections::BTreeMap<String, f64>;

//! Layer abstractions for neural networks
//!
//! This module provides the Layer trait, the Param storage for trainable
//! values, and the five layer types a small convolutional network is built
//! from.

mod r#trait;
mod state;
pub mod conv2d;
pub mod dense;
pub mod flatten;
pub mod maxpool;
pub mod param;
pub mod relu;

// Re-export the Layer trait for convenience
pub use r#trait::Layer;
pub use conv2d::ConvolutionalLayer;
pub use dense::FullyConnectedLayer;
pub use flatten::Flattener;
pub use maxpool::MaxPoolingLayer;
pub use param::Param;
pub use relu::ReluLayer;

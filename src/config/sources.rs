//! Configuration sources, one module per layer.

pub mod build_file;
pub mod environment;
pub mod global_file;

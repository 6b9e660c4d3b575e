//! # cuvec-kernels
//!
//! Elementwise vector kernel dispatch over the CUDA driver API.
//!
//! Provides:
//! - Context attach-or-create on the calling thread
//! - Loading of precompiled PTX images matched to host and device
//! - Launching named kernels with heterogeneous arguments over `n` elements
//!
//! The driver library is loaded at runtime, so building needs no CUDA toolkit.

pub mod config;
pub mod cuda;

pub use config::DispatcherConfig;
pub use cuda::{CudaError, Dispatcher, LaunchArg};

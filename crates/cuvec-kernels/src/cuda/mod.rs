//! CUDA driver-API backend.
//!
//! Provides:
//! - Runtime-loaded driver bindings behind the [`Driver`] trait
//! - Context attach-or-create
//! - PTX image selection by element type, pointer width and compute tier
//! - Lazily cached entry points, argument marshalling and 1D launch geometry
//! - The [`Dispatcher`] tying these together

pub mod ffi;
pub mod handle;
pub mod driver;
pub mod context;
pub mod module;
pub mod function;
pub mod args;
pub mod launch;
pub mod memory;
pub mod dispatcher;

pub use args::{ArgKind, DynArg, LaunchArg, ParamBlock};
pub use context::{CudaError, ExecutionContext};
pub use dispatcher::Dispatcher;
pub use driver::{is_cuda_available, CudaDriver, DeviceAttribute, Driver};
pub use ffi::CuStatus;
pub use function::FunctionCache;
pub use handle::{ContextHandle, DeviceHandle, DevicePtr, FunctionHandle, ModuleHandle, StreamHandle};
pub use launch::{grid_1d, LaunchGeometry};
pub use memory::DeviceBuffer;
pub use module::{CapabilityTier, DeviceProperties, DirectorySource, ElementType, MemorySource, ResourceKey, ResourceSource};

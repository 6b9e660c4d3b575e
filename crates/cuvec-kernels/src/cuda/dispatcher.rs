//! Named-kernel dispatch over one loaded module.
//!
//! A [`Dispatcher`] owns a module for one element type and launches its
//! entry points by operation name:
//!
//! ```no_run
//! use std::sync::Arc;
//! use cuvec_kernels::cuda::{CudaDriver, DeviceBuffer, Dispatcher, DirectorySource, Driver, LaunchArg};
//!
//! # fn main() -> Result<(), cuvec_kernels::cuda::CudaError> {
//! let driver: Arc<dyn Driver> = CudaDriver::load()?;
//! let mut vec = Dispatcher::double(Arc::clone(&driver), &DirectorySource::new("ptx"))?;
//! let x = DeviceBuffer::from_host(&driver, &[1.0f64, 2.0, 3.0])?;
//! let y = DeviceBuffer::from_host(&driver, &[2.0f64, 2.0, 2.0])?;
//! let out = DeviceBuffer::zeros(&driver, 3 * 8)?;
//! vec.call("lt", 3, &[LaunchArg::I64(3), (&out).into(), (&x).into(), (&y).into()])?;
//! vec.synchronize()?;
//! assert_eq!(out.to_host::<f64>()?, vec![1.0, 0.0, 0.0]);
//! vec.shutdown()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use super::args::{DynArg, LaunchArg, ParamBlock};
use super::context::{CudaError, ExecutionContext};
use super::driver::{CudaDriver, Driver};
use super::function::FunctionCache;
use super::handle::{FunctionHandle, ModuleHandle, StreamHandle};
use super::launch::{effective_block_dim, grid_1d, LaunchGeometry};
use super::module::{load_module, DeviceProperties, ElementType, ResourceSource};
use crate::config::DispatcherConfig;

/// Launches kernels from one device-code module by operation name.
///
/// Not thread-safe: the function cache is mutated through `&mut self`.
/// Wrap in a mutex to share between threads.
pub struct Dispatcher {
    driver: Arc<dyn Driver>,
    context: ExecutionContext,
    properties: DeviceProperties,
    element_type: ElementType,
    resource: String,
    /// `None` once shut down.
    module: Option<ModuleHandle>,
    functions: FunctionCache,
    block_dim_x: u32,
    stream: StreamHandle,
}

impl Dispatcher {
    /// Attach to (or create) a context, query the device and load the
    /// matching image from `source`.
    ///
    /// Fails without side effects beyond context creation: if the image
    /// cannot be found or loaded no module is left behind.
    pub fn new(
        driver: Arc<dyn Driver>,
        source: &dyn ResourceSource,
        config: &DispatcherConfig,
    ) -> Result<Self, CudaError> {
        let context = ExecutionContext::attach_or_create(driver.as_ref(), config.device_ordinal)?;
        let properties = DeviceProperties::query(driver.as_ref(), config.device_ordinal)?;
        let block_dim_x = effective_block_dim(config.block_dim_x, properties.max_block_dim_x);

        let key = config.resource_key(properties.tier());
        let resource = key.resource_name();
        let module = load_module(driver.as_ref(), source, &key)?;

        Ok(Self {
            driver,
            context,
            properties,
            element_type: config.element_type,
            resource,
            module: Some(module),
            functions: FunctionCache::new(config.kernel_prefix(), config.kernel_suffix()),
            block_dim_x,
            stream: StreamHandle::NULL,
        })
    }

    /// Dispatcher for the single-precision kernels (`vec_<op>f`).
    pub fn float(driver: Arc<dyn Driver>, source: &dyn ResourceSource) -> Result<Self, CudaError> {
        Self::new(driver, source, &DispatcherConfig::for_float())
    }

    /// Dispatcher for the double-precision kernels (`vec_<op>`).
    pub fn double(driver: Arc<dyn Driver>, source: &dyn ResourceSource) -> Result<Self, CudaError> {
        Self::new(driver, source, &DispatcherConfig::for_double())
    }

    /// Dispatcher on the system CUDA driver.
    pub fn cuda(source: &dyn ResourceSource, config: &DispatcherConfig) -> Result<Self, CudaError> {
        let driver: Arc<dyn Driver> = CudaDriver::load()?;
        Self::new(driver, source, config)
    }

    /// Launch operation `name` over `n` elements.
    ///
    /// `args` are passed to the kernel positionally. Returns once the launch
    /// is enqueued, not when it completes. With `n == 0` the name and
    /// arguments are still checked but nothing is launched.
    pub fn call(&mut self, name: &str, n: u64, args: &[LaunchArg]) -> Result<(), CudaError> {
        let func = self.resolve(name)?;
        let mut params = ParamBlock::pack(args)?;
        let geometry = grid_1d(n, self.block_dim_x)?;
        self.launch(name, func, &geometry, &mut params)
    }

    /// [`call`](Self::call) with dynamically typed arguments.
    pub fn call_dynamic(&mut self, name: &str, n: u64, args: &[Option<&dyn DynArg>]) -> Result<(), CudaError> {
        let func = self.resolve(name)?;
        let mut params = ParamBlock::pack_dynamic(args)?;
        let geometry = grid_1d(n, self.block_dim_x)?;
        self.launch(name, func, &geometry, &mut params)
    }

    /// Entry point for `name`, resolved on first use.
    pub fn resolve(&mut self, name: &str) -> Result<FunctionHandle, CudaError> {
        let module = self.module.ok_or(CudaError::UseAfterShutdown)?;
        self.functions.resolve(self.driver.as_ref(), module, name)
    }

    fn launch(
        &self,
        name: &str,
        func: FunctionHandle,
        geometry: &LaunchGeometry,
        params: &mut ParamBlock,
    ) -> Result<(), CudaError> {
        if geometry.is_empty() {
            tracing::trace!("skipping empty launch of {}", self.functions.symbol(name));
            return Ok(());
        }
        tracing::trace!(
            "launch {} grid={:?} block={:?} args={}",
            self.functions.symbol(name),
            geometry.grid_dim,
            geometry.block_dim,
            params.len()
        );
        // Safety: `params` owns every pointee and outlives the call; slot
        // order is the caller's argument order.
        unsafe { self.driver.launch(func, geometry, self.stream, params.as_mut_ptr()) }.map_err(|s| {
            CudaError::LaunchError { func: self.functions.symbol(name), msg: self.driver.describe(s) }
        })
    }

    /// Wait for every launch enqueued in the context to finish.
    pub fn synchronize(&self) -> Result<(), CudaError> {
        if self.module.is_none() {
            return Err(CudaError::UseAfterShutdown);
        }
        self.driver
            .synchronize()
            .map_err(|s| CudaError::LaunchError { func: "cuCtxSynchronize".into(), msg: self.driver.describe(s) })
    }

    /// Unload the module. Every cached entry point becomes invalid; later
    /// calls fail with [`CudaError::UseAfterShutdown`], even when the unload
    /// itself failed.
    pub fn shutdown(&mut self) -> Result<(), CudaError> {
        let module = self.module.take().ok_or(CudaError::UseAfterShutdown)?;
        self.functions.clear();
        self.driver.unload_module(module).map_err(|s| CudaError::ModuleUnload {
            module: self.resource.clone(),
            msg: self.driver.describe(s),
        })?;
        tracing::info!("unloaded module {}", self.resource);
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.module.is_none()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Name of the loaded device-code resource.
    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    /// Threads per block used for every launch.
    pub fn block_dim_x(&self) -> u32 {
        self.block_dim_x
    }

    /// Number of entry points resolved so far.
    pub fn cached_functions(&self) -> usize {
        self.functions.len()
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            if let Err(s) = self.driver.unload_module(module) {
                tracing::warn!("cuModuleUnload({}) on drop failed: {}", self.resource, self.driver.describe(s));
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("resource", &self.resource)
            .field("module", &self.module)
            .field("block_dim_x", &self.block_dim_x)
            .field("functions", &self.functions.len())
            .finish()
    }
}

//! CUDA execution context management.
//!
//! Attaches to the calling thread's current context, or creates one on the
//! configured device when none is current. The context is an explicit value
//! held by whoever needs it; nothing here is process-global.

use super::driver::Driver;
use super::ffi::CuStatus;
use super::handle::ContextHandle;

/// Default device ordinal used when a context has to be created.
pub const DEFAULT_DEVICE_ORDINAL: i32 = 0;

/// An attached or created CUDA context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionContext {
    handle: ContextHandle,
    device_ordinal: i32,
    owned: bool,
}

impl ExecutionContext {
    /// Initialize the driver and make sure a context is current.
    ///
    /// Reuses the thread's current context if there is one. Otherwise a new
    /// context is created on `device_ordinal`. Idempotent: once a context is
    /// current, later calls attach to it.
    pub fn attach_or_create(driver: &dyn Driver, device_ordinal: i32) -> Result<Self, CudaError> {
        driver.init().map_err(|s| context_err(driver, "cuInit", s))?;

        let current = driver
            .current_context()
            .map_err(|s| context_err(driver, "cuCtxGetCurrent", s))?;
        if !current.is_null() {
            tracing::debug!("attached to current CUDA context {:#x}", current.id());
            return Ok(Self { handle: current, device_ordinal, owned: false });
        }

        let device = driver
            .device(device_ordinal)
            .map_err(|s| context_err(driver, &format!("cuDeviceGet({})", device_ordinal), s))?;
        let handle = driver
            .create_context(device)
            .map_err(|s| context_err(driver, "cuCtxCreate", s))?;
        tracing::info!("created CUDA context {:#x} on device {}", handle.id(), device_ordinal);
        Ok(Self { handle, device_ordinal, owned: true })
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle
    }

    pub fn device_ordinal(&self) -> i32 {
        self.device_ordinal
    }

    /// Whether this context was created here rather than attached to.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Destroy a context that was created by [`attach_or_create`](Self::attach_or_create).
    ///
    /// Dispatchers never call this: sibling dispatchers share the context, so
    /// tearing it down belongs to the embedding application. Attached
    /// contexts belong to someone else and are refused.
    pub fn destroy(self, driver: &dyn Driver) -> Result<(), CudaError> {
        if !self.owned {
            return Err(CudaError::Context(format!(
                "context {:#x} was attached, not created; refusing to destroy it",
                self.handle.id()
            )));
        }
        driver
            .destroy_context(self.handle)
            .map_err(|s| context_err(driver, "cuCtxDestroy", s))?;
        tracing::info!("destroyed CUDA context {:#x}", self.handle.id());
        Ok(())
    }
}

fn context_err(driver: &dyn Driver, call: &str, status: CuStatus) -> CudaError {
    CudaError::Context(format!("{}: {}", call, driver.describe(status)))
}

/// CUDA dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum CudaError {
    #[error("CUDA driver not available (libcuda not found)")]
    NotAvailable,

    #[error("CUDA context unavailable: {0}")]
    Context(String),

    #[error("Device-code resource '{name}' not found")]
    ResourceNotFound { name: String },

    #[error("Failed to read device-code resource '{name}': {source}")]
    ResourceRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load module '{module}': {msg}")]
    ModuleLoad { module: String, msg: String },

    #[error("Failed to unload module '{module}': {msg}")]
    ModuleUnload { module: String, msg: String },

    #[error("Function '{func}' not found in module: {msg}")]
    FuncNotFound { func: String, msg: String },

    #[error("Argument {index} is null")]
    InvalidArgument { index: usize },

    #[error("Argument {index} has type {type_name}, which may not be passed to a kernel")]
    UnsupportedArgumentType { index: usize, type_name: String },

    #[error("Invalid launch geometry: {0}")]
    InvalidGeometry(String),

    #[error("CUDA kernel launch of '{func}' failed: {msg}")]
    LaunchError { func: String, msg: String },

    #[error("CUDA memory error: {0}")]
    MemoryError(String),

    #[error("Dispatcher used after shutdown")]
    UseAfterShutdown,
}

//! The native driver seam.
//!
//! Every CUDA call the dispatch core makes goes through [`Driver`]. The
//! production implementation is [`CudaDriver`], backed by the dlopen'd
//! function table in `ffi.rs`; tests substitute an in-process driver.

use std::ffi::{c_void, CStr};
use std::sync::Arc;

use super::context::CudaError;
use super::ffi::{self, check_cu, CuStatus, CudaApi};
use super::handle::{ContextHandle, DeviceHandle, DevicePtr, FunctionHandle, ModuleHandle, StreamHandle};
use super::launch::LaunchGeometry;

/// Device attributes the dispatch core reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAttribute {
    MaxBlockDimX,
    ComputeCapabilityMajor,
}

impl DeviceAttribute {
    pub fn raw(self) -> i32 {
        match self {
            DeviceAttribute::MaxBlockDimX => ffi::CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X,
            DeviceAttribute::ComputeCapabilityMajor => {
                ffi::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR
            }
        }
    }
}

/// The subset of the CUDA driver API used by the dispatcher.
///
/// Methods return the raw [`CuStatus`] on failure; callers translate it into
/// the matching [`CudaError`] at the call site.
pub trait Driver: Send + Sync {
    fn init(&self) -> Result<(), CuStatus>;

    /// The calling thread's current context, `ContextHandle::NULL` if none.
    fn current_context(&self) -> Result<ContextHandle, CuStatus>;

    fn create_context(&self, device: DeviceHandle) -> Result<ContextHandle, CuStatus>;

    fn destroy_context(&self, ctx: ContextHandle) -> Result<(), CuStatus>;

    fn synchronize(&self) -> Result<(), CuStatus>;

    fn device(&self, ordinal: i32) -> Result<DeviceHandle, CuStatus>;

    fn device_attribute(&self, attr: DeviceAttribute, device: DeviceHandle) -> Result<i32, CuStatus>;

    /// Load a device-code image. PTX images must be NUL-terminated.
    fn load_module(&self, image: &[u8]) -> Result<ModuleHandle, CuStatus>;

    fn module_function(&self, module: ModuleHandle, name: &CStr) -> Result<FunctionHandle, CuStatus>;

    fn unload_module(&self, module: ModuleHandle) -> Result<(), CuStatus>;

    /// Enqueue a kernel launch.
    ///
    /// The native API rejects grids with a zero dimension; callers skip
    /// empty launches before reaching the driver.
    ///
    /// # Safety
    /// `params` must hold one valid pointer per kernel parameter, in the
    /// kernel's positional order, each pointing at a value of the width the
    /// kernel expects. The pointees must stay alive until this call returns.
    unsafe fn launch(
        &self,
        func: FunctionHandle,
        geometry: &LaunchGeometry,
        stream: StreamHandle,
        params: *mut *mut c_void,
    ) -> Result<(), CuStatus>;

    fn alloc(&self, nbytes: usize) -> Result<DevicePtr, CuStatus>;

    fn free(&self, ptr: DevicePtr) -> Result<(), CuStatus>;

    /// Set `nbytes` bytes starting at `ptr` to `value`.
    fn memset(&self, ptr: DevicePtr, value: u8, nbytes: usize) -> Result<(), CuStatus>;

    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), CuStatus>;

    fn copy_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), CuStatus>;

    /// Human-readable description of a status code.
    fn describe(&self, status: CuStatus) -> String {
        status.to_string()
    }
}

/// [`Driver`] backed by the system CUDA driver library.
pub struct CudaDriver {
    api: &'static CudaApi,
}

impl CudaDriver {
    /// Load the driver library. Fails with `NotAvailable` if it cannot be found.
    pub fn load() -> Result<Arc<Self>, CudaError> {
        let api = ffi::cuda_api().ok_or(CudaError::NotAvailable)?;
        Ok(Arc::new(Self { api }))
    }
}

/// Check if the CUDA driver library can be loaded and initialized.
pub fn is_cuda_available() -> bool {
    match ffi::cuda_api() {
        Some(api) => (unsafe { (api.cu_init)(0) }) == ffi::CUDA_SUCCESS,
        None => false,
    }
}

impl Driver for CudaDriver {
    fn init(&self) -> Result<(), CuStatus> {
        check_cu(unsafe { (self.api.cu_init)(0) })
    }

    fn current_context(&self) -> Result<ContextHandle, CuStatus> {
        let mut ctx: ffi::CuContext = std::ptr::null_mut();
        check_cu(unsafe { (self.api.cu_ctx_get_current)(&mut ctx) })?;
        Ok(ContextHandle::from_raw(ctx))
    }

    fn create_context(&self, device: DeviceHandle) -> Result<ContextHandle, CuStatus> {
        let mut ctx: ffi::CuContext = std::ptr::null_mut();
        check_cu(unsafe { (self.api.cu_ctx_create)(&mut ctx, 0, device.0) })?;
        Ok(ContextHandle::from_raw(ctx))
    }

    fn destroy_context(&self, ctx: ContextHandle) -> Result<(), CuStatus> {
        check_cu(unsafe { (self.api.cu_ctx_destroy)(ctx.as_raw()) })
    }

    fn synchronize(&self) -> Result<(), CuStatus> {
        check_cu(unsafe { (self.api.cu_ctx_synchronize)() })
    }

    fn device(&self, ordinal: i32) -> Result<DeviceHandle, CuStatus> {
        let mut dev: ffi::CuDevice = 0;
        check_cu(unsafe { (self.api.cu_device_get)(&mut dev, ordinal) })?;
        Ok(DeviceHandle(dev))
    }

    fn device_attribute(&self, attr: DeviceAttribute, device: DeviceHandle) -> Result<i32, CuStatus> {
        let mut value = 0;
        check_cu(unsafe { (self.api.cu_device_get_attribute)(&mut value, attr.raw(), device.0) })?;
        Ok(value)
    }

    fn load_module(&self, image: &[u8]) -> Result<ModuleHandle, CuStatus> {
        let mut module: ffi::CuModule = std::ptr::null_mut();
        check_cu(unsafe {
            (self.api.cu_module_load_data_ex)(
                &mut module,
                image.as_ptr() as *const c_void,
                0,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        })?;
        Ok(ModuleHandle::from_raw(module))
    }

    fn module_function(&self, module: ModuleHandle, name: &CStr) -> Result<FunctionHandle, CuStatus> {
        let mut func: ffi::CuFunction = std::ptr::null_mut();
        check_cu(unsafe { (self.api.cu_module_get_function)(&mut func, module.as_raw(), name.as_ptr()) })?;
        Ok(FunctionHandle::from_raw(func))
    }

    fn unload_module(&self, module: ModuleHandle) -> Result<(), CuStatus> {
        check_cu(unsafe { (self.api.cu_module_unload)(module.as_raw()) })
    }

    unsafe fn launch(
        &self,
        func: FunctionHandle,
        geometry: &LaunchGeometry,
        stream: StreamHandle,
        params: *mut *mut c_void,
    ) -> Result<(), CuStatus> {
        if geometry.is_empty() {
            return Ok(());
        }
        check_cu((self.api.cu_launch_kernel)(
            func.as_raw(),
            geometry.grid_dim.0,
            geometry.grid_dim.1,
            geometry.grid_dim.2,
            geometry.block_dim.0,
            geometry.block_dim.1,
            geometry.block_dim.2,
            geometry.shared_mem_bytes,
            stream.as_raw(),
            params,
            std::ptr::null_mut(), // extra
        ))
    }

    fn alloc(&self, nbytes: usize) -> Result<DevicePtr, CuStatus> {
        let mut ptr: ffi::CuDevicePtr = 0;
        check_cu(unsafe { (self.api.cu_mem_alloc)(&mut ptr, nbytes) })?;
        Ok(DevicePtr(ptr))
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), CuStatus> {
        check_cu(unsafe { (self.api.cu_mem_free)(ptr.0) })
    }

    fn memset(&self, ptr: DevicePtr, value: u8, nbytes: usize) -> Result<(), CuStatus> {
        check_cu(unsafe { (self.api.cu_memset_d8)(ptr.0, value, nbytes) })
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), CuStatus> {
        check_cu(unsafe { (self.api.cu_memcpy_htod)(dst.0, src.as_ptr() as *const c_void, src.len()) })
    }

    fn copy_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), CuStatus> {
        check_cu(unsafe { (self.api.cu_memcpy_dtoh)(dst.as_mut_ptr() as *mut c_void, src.0, dst.len()) })
    }

    fn describe(&self, status: CuStatus) -> String {
        format!("{} ({})", self.api.error_name(status), status.code())
    }
}

//! Runtime-loaded CUDA driver function pointers via dlopen.
//!
//! No build-time CUDA toolkit dependency: any driver install that provides
//! `libcuda.so.1` (or `nvcuda.dll`) works.

use std::ffi::{c_char, c_int, c_uchar, c_uint, c_void, CStr};
use std::fmt;
use std::sync::OnceLock;

use libloading::Library;

// ---------------------------------------------------------------------------
// Status codes
// ---------------------------------------------------------------------------

pub type CuResult = c_int;
pub const CUDA_SUCCESS: CuResult = 0;
pub const CUDA_ERROR_INVALID_VALUE: CuResult = 1;
pub const CUDA_ERROR_OUT_OF_MEMORY: CuResult = 2;
pub const CUDA_ERROR_NOT_INITIALIZED: CuResult = 3;
pub const CUDA_ERROR_NO_DEVICE: CuResult = 100;
pub const CUDA_ERROR_INVALID_DEVICE: CuResult = 101;
pub const CUDA_ERROR_INVALID_IMAGE: CuResult = 200;
pub const CUDA_ERROR_INVALID_CONTEXT: CuResult = 201;
pub const CUDA_ERROR_INVALID_PTX: CuResult = 218;
pub const CUDA_ERROR_INVALID_HANDLE: CuResult = 400;
pub const CUDA_ERROR_NOT_FOUND: CuResult = 500;
pub const CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES: CuResult = 701;
pub const CUDA_ERROR_LAUNCH_FAILED: CuResult = 719;

// CUdevice_attribute values
pub const CU_DEVICE_ATTRIBUTE_MAX_BLOCK_DIM_X: c_int = 2;
pub const CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR: c_int = 75;

// Opaque handles
pub type CuDevice = c_int;
pub type CuContext = *mut c_void;
pub type CuModule = *mut c_void;
pub type CuFunction = *mut c_void;
pub type CuStream = *mut c_void;
pub type CuDevicePtr = u64;

/// A non-success status returned by a driver call.
///
/// Keeps the raw `CUresult` so callers can match on specific codes; the
/// `Display` impl gives the symbolic name (`CUDA_ERROR_INVALID_PTX`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CuStatus(pub CuResult);

impl CuStatus {
    pub fn code(self) -> CuResult {
        self.0
    }

    /// Symbolic name of the status, as `cuGetErrorName` would report it.
    pub fn name(self) -> &'static str {
        match self.0 {
            CUDA_SUCCESS => "CUDA_SUCCESS",
            CUDA_ERROR_INVALID_VALUE => "CUDA_ERROR_INVALID_VALUE",
            CUDA_ERROR_OUT_OF_MEMORY => "CUDA_ERROR_OUT_OF_MEMORY",
            CUDA_ERROR_NOT_INITIALIZED => "CUDA_ERROR_NOT_INITIALIZED",
            CUDA_ERROR_NO_DEVICE => "CUDA_ERROR_NO_DEVICE",
            CUDA_ERROR_INVALID_DEVICE => "CUDA_ERROR_INVALID_DEVICE",
            CUDA_ERROR_INVALID_IMAGE => "CUDA_ERROR_INVALID_IMAGE",
            CUDA_ERROR_INVALID_CONTEXT => "CUDA_ERROR_INVALID_CONTEXT",
            CUDA_ERROR_INVALID_PTX => "CUDA_ERROR_INVALID_PTX",
            CUDA_ERROR_INVALID_HANDLE => "CUDA_ERROR_INVALID_HANDLE",
            CUDA_ERROR_NOT_FOUND => "CUDA_ERROR_NOT_FOUND",
            CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES => "CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES",
            CUDA_ERROR_LAUNCH_FAILED => "CUDA_ERROR_LAUNCH_FAILED",
            _ => "CUDA_ERROR_UNKNOWN",
        }
    }
}

impl fmt::Display for CuStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Turn a raw return code into a `Result`.
pub fn check_cu(code: CuResult) -> Result<(), CuStatus> {
    if code == CUDA_SUCCESS {
        Ok(())
    } else {
        Err(CuStatus(code))
    }
}

// ---------------------------------------------------------------------------
// Driver API function signatures
// ---------------------------------------------------------------------------

type FnCuInit = unsafe extern "C" fn(c_uint) -> CuResult;
type FnCuCtxGetCurrent = unsafe extern "C" fn(*mut CuContext) -> CuResult;
type FnCuCtxCreate = unsafe extern "C" fn(*mut CuContext, c_uint, CuDevice) -> CuResult;
type FnCuCtxDestroy = unsafe extern "C" fn(CuContext) -> CuResult;
type FnCuCtxSynchronize = unsafe extern "C" fn() -> CuResult;
type FnCuDeviceGet = unsafe extern "C" fn(*mut CuDevice, c_int) -> CuResult;
type FnCuDeviceGetAttribute = unsafe extern "C" fn(*mut c_int, c_int, CuDevice) -> CuResult;
type FnCuModuleLoadDataEx = unsafe extern "C" fn(
    *mut CuModule,
    *const c_void,
    c_uint,            // numOptions
    *mut c_int,        // options
    *mut *mut c_void,  // optionValues
) -> CuResult;
type FnCuModuleGetFunction = unsafe extern "C" fn(
    *mut CuFunction, CuModule, *const c_char,
) -> CuResult;
type FnCuModuleUnload = unsafe extern "C" fn(CuModule) -> CuResult;
type FnCuLaunchKernel = unsafe extern "C" fn(
    CuFunction,
    c_uint, c_uint, c_uint,   // grid x, y, z
    c_uint, c_uint, c_uint,   // block x, y, z
    c_uint,                   // shared mem bytes
    CuStream,                 // stream (null = default)
    *mut *mut c_void,         // kernel params
    *mut *mut c_void,         // extra (null)
) -> CuResult;
type FnCuMemAlloc = unsafe extern "C" fn(*mut CuDevicePtr, usize) -> CuResult;
type FnCuMemFree = unsafe extern "C" fn(CuDevicePtr) -> CuResult;
type FnCuMemsetD8 = unsafe extern "C" fn(CuDevicePtr, c_uchar, usize) -> CuResult;
type FnCuMemcpyHtoD = unsafe extern "C" fn(CuDevicePtr, *const c_void, usize) -> CuResult;
type FnCuMemcpyDtoH = unsafe extern "C" fn(*mut c_void, CuDevicePtr, usize) -> CuResult;
type FnCuGetErrorName = unsafe extern "C" fn(CuResult, *mut *const c_char) -> CuResult;

// ---------------------------------------------------------------------------
// Loaded API struct
// ---------------------------------------------------------------------------

pub struct CudaApi {
    _lib: Library,
    pub cu_init: FnCuInit,
    pub cu_ctx_get_current: FnCuCtxGetCurrent,
    pub cu_ctx_create: FnCuCtxCreate,
    pub cu_ctx_destroy: FnCuCtxDestroy,
    pub cu_ctx_synchronize: FnCuCtxSynchronize,
    pub cu_device_get: FnCuDeviceGet,
    pub cu_device_get_attribute: FnCuDeviceGetAttribute,
    pub cu_module_load_data_ex: FnCuModuleLoadDataEx,
    pub cu_module_get_function: FnCuModuleGetFunction,
    pub cu_module_unload: FnCuModuleUnload,
    pub cu_launch_kernel: FnCuLaunchKernel,
    pub cu_mem_alloc: FnCuMemAlloc,
    pub cu_mem_free: FnCuMemFree,
    pub cu_memset_d8: FnCuMemsetD8,
    pub cu_memcpy_htod: FnCuMemcpyHtoD,
    pub cu_memcpy_dtoh: FnCuMemcpyDtoH,
    pub cu_get_error_name: Option<FnCuGetErrorName>,
}

// Safety: the function pointers are process-global and the driver API is
// internally synchronized.
unsafe impl Send for CudaApi {}
unsafe impl Sync for CudaApi {}

#[cfg(target_os = "windows")]
const LIB_NAMES: &[&str] = &["nvcuda.dll"];
#[cfg(not(target_os = "windows"))]
const LIB_NAMES: &[&str] = &["libcuda.so.1", "libcuda.so"];

static CUDA_API: OnceLock<Option<CudaApi>> = OnceLock::new();

impl CudaApi {
    fn try_load() -> Option<Self> {
        let lib = LIB_NAMES.iter().find_map(|name| match unsafe { Library::new(name) } {
            Ok(lib) => {
                tracing::debug!("loaded CUDA driver from {}", name);
                Some(lib)
            }
            Err(e) => {
                tracing::debug!("failed to load {}: {}", name, e);
                None
            }
        })?;
        unsafe {
            let api = CudaApi {
                cu_init: *lib.get::<FnCuInit>(b"cuInit\0").ok()?,
                cu_ctx_get_current: *lib.get::<FnCuCtxGetCurrent>(b"cuCtxGetCurrent\0").ok()?,
                cu_ctx_create: *lib.get::<FnCuCtxCreate>(b"cuCtxCreate_v2\0").ok()?,
                cu_ctx_destroy: *lib.get::<FnCuCtxDestroy>(b"cuCtxDestroy_v2\0").ok()?,
                cu_ctx_synchronize: *lib.get::<FnCuCtxSynchronize>(b"cuCtxSynchronize\0").ok()?,
                cu_device_get: *lib.get::<FnCuDeviceGet>(b"cuDeviceGet\0").ok()?,
                cu_device_get_attribute: *lib.get::<FnCuDeviceGetAttribute>(b"cuDeviceGetAttribute\0").ok()?,
                cu_module_load_data_ex: *lib.get::<FnCuModuleLoadDataEx>(b"cuModuleLoadDataEx\0").ok()?,
                cu_module_get_function: *lib.get::<FnCuModuleGetFunction>(b"cuModuleGetFunction\0").ok()?,
                cu_module_unload: *lib.get::<FnCuModuleUnload>(b"cuModuleUnload\0").ok()?,
                cu_launch_kernel: *lib.get::<FnCuLaunchKernel>(b"cuLaunchKernel\0").ok()?,
                cu_mem_alloc: *lib.get::<FnCuMemAlloc>(b"cuMemAlloc_v2\0").ok()?,
                cu_mem_free: *lib.get::<FnCuMemFree>(b"cuMemFree_v2\0").ok()?,
                cu_memset_d8: *lib.get::<FnCuMemsetD8>(b"cuMemsetD8_v2\0").ok()?,
                cu_memcpy_htod: *lib.get::<FnCuMemcpyHtoD>(b"cuMemcpyHtoD_v2\0").ok()?,
                cu_memcpy_dtoh: *lib.get::<FnCuMemcpyDtoH>(b"cuMemcpyDtoH_v2\0").ok()?,
                // Older drivers lack cuGetErrorName; fall back to the local table.
                cu_get_error_name: lib.get::<FnCuGetErrorName>(b"cuGetErrorName\0").ok().map(|s| *s),
                _lib: lib,
            };
            Some(api)
        }
    }

    /// Name for a status code, asking the driver first.
    pub fn error_name(&self, status: CuStatus) -> String {
        if let Some(get_name) = self.cu_get_error_name {
            let mut ptr: *const c_char = std::ptr::null();
            let rc = unsafe { get_name(status.0, &mut ptr) };
            if rc == CUDA_SUCCESS && !ptr.is_null() {
                return unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
            }
        }
        status.name().to_string()
    }
}

/// Get the runtime-loaded CUDA driver API. Returns None if the library is missing.
pub fn cuda_api() -> Option<&'static CudaApi> {
    CUDA_API.get_or_init(CudaApi::try_load).as_ref()
}

//! Device memory allocation and host↔device transfer utilities.
//!
//! Kernels operate on caller-owned buffers; this is what callers (and the
//! comparison tests) use to get data on and off the device.

use std::sync::Arc;

use bytemuck::Pod;

use super::args::LaunchArg;
use super::context::CudaError;
use super::driver::Driver;
use super::handle::DevicePtr;

/// A device allocation holding raw bytes.
///
/// Freed via the driver on drop.
pub struct DeviceBuffer {
    driver: Arc<dyn Driver>,
    ptr: DevicePtr,
    nbytes: usize,
}

impl DeviceBuffer {
    /// Allocate `nbytes` of zeroed device memory.
    pub fn zeros(driver: &Arc<dyn Driver>, nbytes: usize) -> Result<Self, CudaError> {
        let buf = Self::alloc(driver, nbytes)?;
        buf.driver
            .memset(buf.ptr, 0, nbytes)
            .map_err(|s| CudaError::MemoryError(format!("cuMemsetD8: {}", buf.driver.describe(s))))?;
        Ok(buf)
    }

    /// Copy host values to a new device buffer (H2D).
    pub fn from_host<T: Pod>(driver: &Arc<dyn Driver>, data: &[T]) -> Result<Self, CudaError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buf = Self::alloc(driver, bytes.len())?;
        buf.write_bytes(bytes)?;
        Ok(buf)
    }

    fn alloc(driver: &Arc<dyn Driver>, nbytes: usize) -> Result<Self, CudaError> {
        if nbytes == 0 {
            return Err(CudaError::MemoryError("zero-sized allocation".to_string()));
        }
        let ptr = driver
            .alloc(nbytes)
            .map_err(|s| CudaError::MemoryError(format!("cuMemAlloc({} bytes): {}", nbytes, driver.describe(s))))?;
        Ok(Self { driver: Arc::clone(driver), ptr, nbytes })
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), CudaError> {
        self.driver
            .copy_to_device(self.ptr, bytes)
            .map_err(|s| CudaError::MemoryError(format!("cuMemcpyHtoD: {}", self.driver.describe(s))))
    }

    /// Copy the buffer back to host (D2H) as values of `T`.
    ///
    /// Does not wait for pending launches; synchronize first.
    pub fn to_host<T: Pod>(&self) -> Result<Vec<T>, CudaError> {
        let elem = std::mem::size_of::<T>();
        if elem == 0 || self.nbytes % elem != 0 {
            return Err(CudaError::MemoryError(format!(
                "{} bytes is not a whole number of {}-byte elements",
                self.nbytes, elem
            )));
        }
        let mut host = vec![T::zeroed(); self.nbytes / elem];
        self.driver
            .copy_to_host(bytemuck::cast_slice_mut(host.as_mut_slice()), self.ptr)
            .map_err(|s| CudaError::MemoryError(format!("cuMemcpyDtoH: {}", self.driver.describe(s))))?;
        Ok(host)
    }

    /// Number of bytes in this buffer.
    pub fn len(&self) -> usize {
        self.nbytes
    }

    pub fn is_empty(&self) -> bool {
        self.nbytes == 0
    }

    /// Raw device pointer for kernel launches.
    pub fn device_ptr(&self) -> DevicePtr {
        self.ptr
    }
}

impl From<&DeviceBuffer> for LaunchArg {
    fn from(buf: &DeviceBuffer) -> Self {
        LaunchArg::Buffer(buf.ptr)
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer").field("ptr", &self.ptr).field("nbytes", &self.nbytes).finish()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if let Err(s) = self.driver.free(self.ptr) {
            tracing::warn!("cuMemFree({:#x}) failed: {}", self.ptr.0, self.driver.describe(s));
        }
    }
}

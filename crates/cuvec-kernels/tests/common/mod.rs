//! In-process stand-in for the CUDA driver.
//!
//! Device memory is host memory keyed by fake addresses, and a handful of
//! comparison kernels are executed on the host by decoding the parameter
//! block exactly as the device would.

#![allow(dead_code)]

use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::sync::Arc;

use parking_lot::Mutex;

use cuvec_kernels::cuda::ffi::{
    CUDA_ERROR_INVALID_HANDLE, CUDA_ERROR_INVALID_IMAGE, CUDA_ERROR_INVALID_PTX, CUDA_ERROR_INVALID_VALUE,
    CUDA_ERROR_NOT_FOUND, CUDA_ERROR_NO_DEVICE,
};
use cuvec_kernels::cuda::{
    CapabilityTier, ContextHandle, CuStatus, DeviceAttribute, DeviceHandle, DevicePtr, Driver, ElementType,
    FunctionHandle, LaunchGeometry, MemorySource, ModuleHandle, ResourceKey, StreamHandle,
};

/// Entry points every mock module exports.
pub const EXPORTED: &[&str] = &["vec_lt", "vec_ltf", "vec_gt", "vec_gtf", "vec_add", "vec_addf"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub init: usize,
    pub create_context: usize,
    pub destroy_context: usize,
    pub load_module: usize,
    pub unload_module: usize,
    pub module_function: usize,
    pub launch: usize,
    pub free: usize,
    pub memset: usize,
}

#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub symbol: String,
    pub geometry: LaunchGeometry,
    pub stream: StreamHandle,
}

#[derive(Default)]
struct State {
    next_id: usize,
    current_context: ContextHandle,
    counts: CallCounts,
    modules: HashMap<ModuleHandle, Vec<u8>>,
    functions: HashMap<FunctionHandle, (ModuleHandle, String)>,
    memory: HashMap<u64, Vec<u8>>,
    next_addr: u64,
    launches: Vec<LaunchRecord>,
    fail_init: Option<i32>,
    fail_next_launch: Option<i32>,
    fail_next_unload: Option<i32>,
}

pub struct MockDriver {
    max_block_dim_x: i32,
    cc_major: i32,
    state: Mutex<State>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::with_device(1024, 7)
    }

    pub fn with_device(max_block_dim_x: i32, cc_major: i32) -> Self {
        let state = State { next_id: 0x10, current_context: ContextHandle::NULL, next_addr: 0x1000_0000, ..Default::default() };
        Self { max_block_dim_x, cc_major, state: Mutex::new(state) }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Pretend the embedding application already made a context current.
    pub fn with_current_context(self, ctx: usize) -> Self {
        self.state.lock().current_context = ContextHandle::from_id(ctx);
        self
    }

    pub fn fail_init(&self, code: i32) {
        self.state.lock().fail_init = Some(code);
    }

    pub fn fail_next_launch(&self, code: i32) {
        self.state.lock().fail_next_launch = Some(code);
    }

    pub fn fail_next_unload(&self, code: i32) {
        self.state.lock().fail_next_unload = Some(code);
    }

    pub fn counts(&self) -> CallCounts {
        self.state.lock().counts.clone()
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.clone()
    }

    pub fn loaded_images(&self) -> Vec<Vec<u8>> {
        self.state.lock().modules.values().cloned().collect()
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.len()
    }

    fn next_id(state: &mut State) -> usize {
        state.next_id += 0x10;
        state.next_id
    }
}

/// A `MemorySource` holding a valid image for each element type at `tier`.
pub fn images_for_tier(tier: &str) -> MemorySource {
    let mut src = MemorySource::new();
    for ty in [ElementType::Float, ElementType::Double] {
        let key = ResourceKey::new(ty, CapabilityTier::new(tier));
        src.insert(key.resource_name(), format!(".version 3.0\n// {} kernels\n", ty).into_bytes());
    }
    src
}

/// Images for both tiers the stock build ships.
pub fn stock_images() -> MemorySource {
    let mut src = images_for_tier("30");
    for ty in [ElementType::Float, ElementType::Double] {
        let key = ResourceKey::new(ty, CapabilityTier::new("20"));
        src.insert(key.resource_name(), b".version 2.0\n".to_vec());
    }
    src
}

fn read_mem<T: bytemuck::Pod>(memory: &HashMap<u64, Vec<u8>>, ptr: u64, index: usize) -> T {
    let size = std::mem::size_of::<T>();
    let bytes = &memory[&ptr][index * size..(index + 1) * size];
    bytemuck::pod_read_unaligned(bytes)
}

fn write_mem<T: bytemuck::Pod>(memory: &mut HashMap<u64, Vec<u8>>, ptr: u64, index: usize, value: T) {
    let size = std::mem::size_of::<T>();
    let buf = memory.get_mut(&ptr).expect("write to unallocated device memory");
    buf[index * size..(index + 1) * size].copy_from_slice(bytemuck::bytes_of(&value));
}

/// Run a `(n, result, x, y)` comparison kernel thread by thread.
///
/// # Safety
/// `params` must hold four pointers: `*const i64` then three `*const u64`.
unsafe fn run_comparison<T: bytemuck::Pod + PartialOrd + From<u8>>(
    memory: &mut HashMap<u64, Vec<u8>>,
    geometry: &LaunchGeometry,
    params: *mut *mut c_void,
    op: fn(T, T) -> bool,
) {
    let n = *(*params.add(0) as *const i64);
    let result = *(*params.add(1) as *const u64);
    let x = *(*params.add(2) as *const u64);
    let y = *(*params.add(3) as *const u64);

    let threads = geometry.total_threads();
    for i in 0..threads {
        if (i as i64) < n {
            let xi: T = read_mem(memory, x, i as usize);
            let yi: T = read_mem(memory, y, i as usize);
            let r = if op(xi, yi) { T::from(1) } else { T::from(0) };
            write_mem(memory, result, i as usize, r);
        }
    }
}

impl Driver for MockDriver {
    fn init(&self) -> Result<(), CuStatus> {
        let mut st = self.state.lock();
        st.counts.init += 1;
        match st.fail_init {
            Some(code) => Err(CuStatus(code)),
            None => Ok(()),
        }
    }

    fn current_context(&self) -> Result<ContextHandle, CuStatus> {
        Ok(self.state.lock().current_context)
    }

    fn create_context(&self, device: DeviceHandle) -> Result<ContextHandle, CuStatus> {
        if device.0 != 0 {
            return Err(CuStatus(CUDA_ERROR_NO_DEVICE));
        }
        let mut st = self.state.lock();
        st.counts.create_context += 1;
        let ctx = ContextHandle::from_id(Self::next_id(&mut st));
        st.current_context = ctx;
        Ok(ctx)
    }

    fn destroy_context(&self, ctx: ContextHandle) -> Result<(), CuStatus> {
        let mut st = self.state.lock();
        st.counts.destroy_context += 1;
        if st.current_context == ctx {
            st.current_context = ContextHandle::NULL;
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<(), CuStatus> {
        Ok(())
    }

    fn device(&self, ordinal: i32) -> Result<DeviceHandle, CuStatus> {
        if ordinal == 0 {
            Ok(DeviceHandle(0))
        } else {
            Err(CuStatus(CUDA_ERROR_NO_DEVICE))
        }
    }

    fn device_attribute(&self, attr: DeviceAttribute, _device: DeviceHandle) -> Result<i32, CuStatus> {
        Ok(match attr {
            DeviceAttribute::MaxBlockDimX => self.max_block_dim_x,
            DeviceAttribute::ComputeCapabilityMajor => self.cc_major,
        })
    }

    fn load_module(&self, image: &[u8]) -> Result<ModuleHandle, CuStatus> {
        let mut st = self.state.lock();
        st.counts.load_module += 1;
        if st.current_context.is_null() {
            return Err(CuStatus(CUDA_ERROR_INVALID_HANDLE));
        }
        if image.last() != Some(&0) {
            return Err(CuStatus(CUDA_ERROR_INVALID_IMAGE));
        }
        if image.starts_with(b"garbage") {
            return Err(CuStatus(CUDA_ERROR_INVALID_PTX));
        }
        let module = ModuleHandle::from_id(Self::next_id(&mut st));
        st.modules.insert(module, image.to_vec());
        Ok(module)
    }

    fn module_function(&self, module: ModuleHandle, name: &CStr) -> Result<FunctionHandle, CuStatus> {
        let mut st = self.state.lock();
        st.counts.module_function += 1;
        if !st.modules.contains_key(&module) {
            return Err(CuStatus(CUDA_ERROR_INVALID_HANDLE));
        }
        let name = name.to_str().map_err(|_| CuStatus(CUDA_ERROR_INVALID_VALUE))?;
        if !EXPORTED.contains(&name) {
            return Err(CuStatus(CUDA_ERROR_NOT_FOUND));
        }
        let func = FunctionHandle::from_id(Self::next_id(&mut st));
        st.functions.insert(func, (module, name.to_string()));
        Ok(func)
    }

    fn unload_module(&self, module: ModuleHandle) -> Result<(), CuStatus> {
        let mut st = self.state.lock();
        st.counts.unload_module += 1;
        if let Some(code) = st.fail_next_unload.take() {
            return Err(CuStatus(code));
        }
        match st.modules.remove(&module) {
            Some(_) => {
                st.functions.retain(|_, (m, _)| *m != module);
                Ok(())
            }
            None => Err(CuStatus(CUDA_ERROR_INVALID_HANDLE)),
        }
    }

    unsafe fn launch(
        &self,
        func: FunctionHandle,
        geometry: &LaunchGeometry,
        stream: StreamHandle,
        params: *mut *mut c_void,
    ) -> Result<(), CuStatus> {
        let mut st = self.state.lock();
        st.counts.launch += 1;
        if let Some(code) = st.fail_next_launch.take() {
            return Err(CuStatus(code));
        }
        // Same check the real driver makes.
        let (gx, gy, gz) = geometry.grid_dim;
        if gx == 0 || gy == 0 || gz == 0 {
            return Err(CuStatus(CUDA_ERROR_INVALID_VALUE));
        }
        let symbol = match st.functions.get(&func) {
            Some((_, symbol)) => symbol.clone(),
            None => return Err(CuStatus(CUDA_ERROR_INVALID_HANDLE)),
        };
        st.launches.push(LaunchRecord { symbol: symbol.clone(), geometry: *geometry, stream });

        let memory = &mut st.memory;
        match symbol.as_str() {
            "vec_lt" => run_comparison::<f64>(memory, geometry, params, |a, b| a < b),
            "vec_ltf" => run_comparison::<f32>(memory, geometry, params, |a, b| a < b),
            "vec_gt" => run_comparison::<f64>(memory, geometry, params, |a, b| a > b),
            "vec_gtf" => run_comparison::<f32>(memory, geometry, params, |a, b| a > b),
            _ => {}
        }
        Ok(())
    }

    fn alloc(&self, nbytes: usize) -> Result<DevicePtr, CuStatus> {
        let mut st = self.state.lock();
        let addr = st.next_addr;
        st.next_addr += (nbytes as u64 + 255) & !255;
        st.memory.insert(addr, vec![0xcd; nbytes]);
        Ok(DevicePtr(addr))
    }

    fn free(&self, ptr: DevicePtr) -> Result<(), CuStatus> {
        let mut st = self.state.lock();
        st.counts.free += 1;
        st.memory.remove(&ptr.0).map(|_| ()).ok_or(CuStatus(CUDA_ERROR_INVALID_VALUE))
    }

    fn memset(&self, ptr: DevicePtr, value: u8, nbytes: usize) -> Result<(), CuStatus> {
        let mut st = self.state.lock();
        st.counts.memset += 1;
        let buf = st.memory.get_mut(&ptr.0).ok_or(CuStatus(CUDA_ERROR_INVALID_VALUE))?;
        if nbytes > buf.len() {
            return Err(CuStatus(CUDA_ERROR_INVALID_VALUE));
        }
        buf[..nbytes].fill(value);
        Ok(())
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[u8]) -> Result<(), CuStatus> {
        let mut st = self.state.lock();
        let buf = st.memory.get_mut(&dst.0).ok_or(CuStatus(CUDA_ERROR_INVALID_VALUE))?;
        if src.len() > buf.len() {
            return Err(CuStatus(CUDA_ERROR_INVALID_VALUE));
        }
        buf[..src.len()].copy_from_slice(src);
        Ok(())
    }

    fn copy_to_host(&self, dst: &mut [u8], src: DevicePtr) -> Result<(), CuStatus> {
        let st = self.state.lock();
        let buf = st.memory.get(&src.0).ok_or(CuStatus(CUDA_ERROR_INVALID_VALUE))?;
        if dst.len() > buf.len() {
            return Err(CuStatus(CUDA_ERROR_INVALID_VALUE));
        }
        dst.copy_from_slice(&buf[..dst.len()]);
        Ok(())
    }
}

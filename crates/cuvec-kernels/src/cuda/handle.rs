//! Opaque driver handles as plain value types.
//!
//! Raw driver handles are pointers; they are stored here as integers so the
//! owning types stay `Send` and comparable. Lifecycle is explicit: whoever
//! opens a handle closes it through the [`Driver`](super::driver::Driver).

use std::ffi::c_void;

use super::ffi::{CuContext, CuDevice, CuDevicePtr, CuFunction, CuModule, CuStream};

macro_rules! pointer_handle {
    ($(#[$doc:meta])* $name:ident, $raw:ty) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name(usize);

        impl $name {
            pub const NULL: Self = Self(0);

            pub fn from_raw(raw: $raw) -> Self {
                Self(raw as usize)
            }

            pub fn as_raw(self) -> $raw {
                self.0 as *mut c_void
            }

            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            /// Integer identity, useful for mock drivers and logging.
            pub fn id(self) -> usize {
                self.0
            }

            pub fn from_id(id: usize) -> Self {
                Self(id)
            }
        }
    };
}

pointer_handle!(
    /// A CUDA context (`CUcontext`).
    ContextHandle, CuContext
);
pointer_handle!(
    /// A loaded device-code image (`CUmodule`).
    ModuleHandle, CuModule
);
pointer_handle!(
    /// An entry point inside a module (`CUfunction`). Invalid once the
    /// module is unloaded.
    FunctionHandle, CuFunction
);
pointer_handle!(
    /// An execution queue (`CUstream`). `NULL` is the default stream.
    StreamHandle, CuStream
);

/// A device ordinal resolved by `cuDeviceGet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub CuDevice);

/// A device memory address (`CUdeviceptr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DevicePtr(pub CuDevicePtr);

impl DevicePtr {
    pub const NULL: Self = Self(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one.
    pub fn offset(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

//! Kernel argument marshalling.
//!
//! `cuLaunchKernel` takes an array of pointers, one per kernel parameter,
//! each pointing at the parameter's value. Device buffers are passed by
//! pointing at a copy of their address; scalars are boxed at their exact
//! width. Slot order is the kernel's positional parameter order.

use std::any::Any;
use std::ffi::c_void;

use super::context::CudaError;
use super::handle::DevicePtr;

/// One kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaunchArg {
    Buffer(DevicePtr),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

/// Argument tag, without the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Buffer,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl ArgKind {
    /// Bytes the kernel reads for this parameter.
    pub fn width(self) -> usize {
        match self {
            ArgKind::Buffer => std::mem::size_of::<u64>(),
            ArgKind::I8 => 1,
            ArgKind::I16 => 2,
            ArgKind::I32 | ArgKind::F32 => 4,
            ArgKind::I64 | ArgKind::F64 => 8,
        }
    }
}

impl LaunchArg {
    pub fn kind(&self) -> ArgKind {
        match self {
            LaunchArg::Buffer(_) => ArgKind::Buffer,
            LaunchArg::I8(_) => ArgKind::I8,
            LaunchArg::I16(_) => ArgKind::I16,
            LaunchArg::I32(_) => ArgKind::I32,
            LaunchArg::I64(_) => ArgKind::I64,
            LaunchArg::F32(_) => ArgKind::F32,
            LaunchArg::F64(_) => ArgKind::F64,
        }
    }

    /// Convert a dynamically typed value.
    ///
    /// `None` is an absent argument. Values other than [`DevicePtr`] and the
    /// six signed/float scalar types cannot be passed to a kernel.
    pub fn from_dyn(value: Option<&dyn DynArg>, index: usize) -> Result<Self, CudaError> {
        let value = value.ok_or(CudaError::InvalidArgument { index })?;
        let any = (*value).as_any();
        macro_rules! try_kind {
            ($($ty:ty => $variant:ident),* $(,)?) => {
                $(
                    if let Some(&v) = any.downcast_ref::<$ty>() {
                        return Ok(LaunchArg::$variant(v));
                    }
                )*
            };
        }
        try_kind!(
            DevicePtr => Buffer,
            i8 => I8,
            i16 => I16,
            i32 => I32,
            i64 => I64,
            f32 => F32,
            f64 => F64,
        );
        Err(CudaError::UnsupportedArgumentType {
            index,
            type_name: (*value).type_name().to_string(),
        })
    }
}

/// Any `'static` value offered as a dynamically typed argument.
///
/// Implemented for every such type so `&x as &dyn DynArg` works like
/// `&dyn Any`, while keeping the type's name for error reports.
pub trait DynArg: Any {
    fn as_any(&self) -> &dyn Any;

    fn type_name(&self) -> &'static str;
}

impl<T: Any> DynArg for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),*) => {
        $(
            impl From<$ty> for LaunchArg {
                fn from(v: $ty) -> Self {
                    LaunchArg::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar!(DevicePtr => Buffer, i8 => I8, i16 => I16, i32 => I32, i64 => I64, f32 => F32, f64 => F64);

/// Boxed storage for one parameter. Boxes keep their address when the
/// owning `Vec` grows, so the recorded pointers stay valid.
#[derive(Debug)]
enum Slot {
    Buffer(Box<u64>),
    I8(Box<i8>),
    I16(Box<i16>),
    I32(Box<i32>),
    I64(Box<i64>),
    F32(Box<f32>),
    F64(Box<f64>),
}

impl Slot {
    fn new(arg: &LaunchArg) -> Self {
        match *arg {
            LaunchArg::Buffer(ptr) => Slot::Buffer(Box::new(ptr.0)),
            LaunchArg::I8(v) => Slot::I8(Box::new(v)),
            LaunchArg::I16(v) => Slot::I16(Box::new(v)),
            LaunchArg::I32(v) => Slot::I32(Box::new(v)),
            LaunchArg::I64(v) => Slot::I64(Box::new(v)),
            LaunchArg::F32(v) => Slot::F32(Box::new(v)),
            LaunchArg::F64(v) => Slot::F64(Box::new(v)),
        }
    }

    fn as_param(&mut self) -> *mut c_void {
        match self {
            Slot::Buffer(b) => &mut **b as *mut u64 as *mut c_void,
            Slot::I8(b) => &mut **b as *mut i8 as *mut c_void,
            Slot::I16(b) => &mut **b as *mut i16 as *mut c_void,
            Slot::I32(b) => &mut **b as *mut i32 as *mut c_void,
            Slot::I64(b) => &mut **b as *mut i64 as *mut c_void,
            Slot::F32(b) => &mut **b as *mut f32 as *mut c_void,
            Slot::F64(b) => &mut **b as *mut f64 as *mut c_void,
        }
    }

    fn value(&self) -> LaunchArg {
        match self {
            Slot::Buffer(b) => LaunchArg::Buffer(DevicePtr(**b)),
            Slot::I8(b) => LaunchArg::I8(**b),
            Slot::I16(b) => LaunchArg::I16(**b),
            Slot::I32(b) => LaunchArg::I32(**b),
            Slot::I64(b) => LaunchArg::I64(**b),
            Slot::F32(b) => LaunchArg::F32(**b),
            Slot::F64(b) => LaunchArg::F64(**b),
        }
    }
}

/// The `void**` parameter array for one launch, plus the storage it points into.
#[derive(Debug)]
pub struct ParamBlock {
    slots: Vec<Slot>,
    params: Vec<*mut c_void>,
}

impl ParamBlock {
    /// Marshal `args` in order. A null device pointer is an absent argument.
    pub fn pack(args: &[LaunchArg]) -> Result<Self, CudaError> {
        let mut slots = Vec::with_capacity(args.len());
        for (index, arg) in args.iter().enumerate() {
            if let LaunchArg::Buffer(ptr) = arg {
                if ptr.is_null() {
                    return Err(CudaError::InvalidArgument { index });
                }
            }
            slots.push(Slot::new(arg));
        }
        let params = slots.iter_mut().map(Slot::as_param).collect();
        Ok(Self { slots, params })
    }

    /// Marshal a heterogeneous list of dynamically typed values.
    pub fn pack_dynamic(args: &[Option<&dyn DynArg>]) -> Result<Self, CudaError> {
        let args = args
            .iter()
            .enumerate()
            .map(|(i, a)| LaunchArg::from_dyn(*a, i))
            .collect::<Result<Vec<_>, _>>()?;
        Self::pack(&args)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn kinds(&self) -> Vec<ArgKind> {
        self.slots.iter().map(|s| s.value().kind()).collect()
    }

    /// Value stored in slot `i`.
    pub fn get(&self, i: usize) -> Option<LaunchArg> {
        self.slots.get(i).map(Slot::value)
    }

    /// Pointer array to hand to the launch. Valid while `self` is alive.
    pub fn as_mut_ptr(&mut self) -> *mut *mut c_void {
        self.params.as_mut_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_preserves_order() {
        let args = [
            LaunchArg::I64(3),
            LaunchArg::Buffer(DevicePtr(0x1000)),
            LaunchArg::F64(2.5),
            LaunchArg::I8(-1),
            LaunchArg::F32(0.5),
            LaunchArg::I16(7),
            LaunchArg::I32(9),
        ];
        let block = ParamBlock::pack(&args).unwrap();
        assert_eq!(block.len(), args.len());
        for (i, a) in args.iter().enumerate() {
            assert_eq!(block.get(i), Some(*a));
        }
    }

    #[test]
    fn test_pack_does_not_deduplicate() {
        let p = LaunchArg::Buffer(DevicePtr(0x2000));
        let block = ParamBlock::pack(&[p, p, p]).unwrap();
        assert_eq!(block.kinds(), vec![ArgKind::Buffer; 3]);
    }

    #[test]
    fn test_params_point_at_values() {
        let mut block = ParamBlock::pack(&[LaunchArg::Buffer(DevicePtr(0xabc0)), LaunchArg::I32(42)]).unwrap();
        let params = block.as_mut_ptr();
        unsafe {
            assert_eq!(*(*params.add(0) as *const u64), 0xabc0);
            assert_eq!(*(*params.add(1) as *const i32), 42);
        }
    }

    #[test]
    fn test_null_buffer_rejected() {
        let err = ParamBlock::pack(&[LaunchArg::I32(1), LaunchArg::Buffer(DevicePtr::NULL)]).unwrap_err();
        assert!(matches!(err, CudaError::InvalidArgument { index: 1 }));
    }

    #[test]
    fn test_pack_dynamic() {
        let n = 4i64;
        let x = DevicePtr(0x100);
        let s = 1.5f32;
        let block = ParamBlock::pack_dynamic(&[Some(&n as &dyn DynArg), Some(&x as &dyn DynArg), Some(&s as &dyn DynArg)]).unwrap();
        assert_eq!(block.kinds(), vec![ArgKind::I64, ArgKind::Buffer, ArgKind::F32]);
    }

    #[test]
    fn test_pack_dynamic_absent() {
        let n = 4i64;
        let err = ParamBlock::pack_dynamic(&[Some(&n as &dyn DynArg), None]).unwrap_err();
        assert!(matches!(err, CudaError::InvalidArgument { index: 1 }));
    }

    #[test]
    fn test_pack_dynamic_unsupported() {
        let n = 4u32;
        let name = "x";
        let err = ParamBlock::pack_dynamic(&[Some(&1i32 as &dyn DynArg), Some(&n as &dyn DynArg)]).unwrap_err();
        assert!(matches!(err, CudaError::UnsupportedArgumentType { index: 1, ref type_name } if type_name == "u32"));
        assert_eq!(err.to_string(), "Argument 1 has type u32, which may not be passed to a kernel");
        let err = ParamBlock::pack_dynamic(&[Some(&name as &dyn DynArg)]).unwrap_err();
        assert!(matches!(err, CudaError::UnsupportedArgumentType { index: 0, ref type_name } if type_name == "&str"));
    }

    #[test]
    fn test_widths() {
        assert_eq!(ArgKind::I8.width(), 1);
        assert_eq!(ArgKind::I16.width(), 2);
        assert_eq!(ArgKind::F32.width(), 4);
        assert_eq!(ArgKind::Buffer.width(), 8);
        assert_eq!(ArgKind::F64.width(), 8);
    }
}

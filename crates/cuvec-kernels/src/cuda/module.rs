//! Device-code module selection and loading.
//!
//! Kernels ship as precompiled PTX images, one per
//! (element type, host pointer width, compute-capability tier). The loader
//! picks the image matching the running process and device, reads it,
//! NUL-terminates it and hands it to the driver.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::context::CudaError;
use super::driver::{DeviceAttribute, Driver};
use super::ffi::CuStatus;
use super::handle::ModuleHandle;

pub const DEFAULT_NAMESPACE: &str = "kernels";
pub const DEFAULT_FAMILY: &str = "JCudaVec";

/// Element type a kernel family operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Float,
    Double,
}

impl ElementType {
    /// Tag used in resource names.
    pub fn tag(self) -> &'static str {
        match self {
            ElementType::Float => "float",
            ElementType::Double => "double",
        }
    }

    pub fn size_bytes(self) -> usize {
        match self {
            ElementType::Float => 4,
            ElementType::Double => 8,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Coarse compute-capability class an image was compiled for.
///
/// Only `20` and `30` are produced by [`from_major`](Self::from_major);
/// other values can be constructed to address images explicitly and simply
/// fail to resolve when no such image exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityTier(String);

impl CapabilityTier {
    pub fn new(tier: impl Into<String>) -> Self {
        Self(tier.into())
    }

    pub fn from_major(major: i32) -> Self {
        if major > 2 {
            Self::new("30")
        } else {
            Self::new("20")
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pointer width of the host process, as used in resource names.
pub fn host_pointer_width() -> u32 {
    usize::BITS
}

/// Identifies one precompiled image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub family: String,
    pub element_type: ElementType,
    pub pointer_width: u32,
    pub tier: CapabilityTier,
}

impl ResourceKey {
    /// Key for the default `kernels/JCudaVec` family on this host.
    pub fn new(element_type: ElementType, tier: CapabilityTier) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            family: DEFAULT_FAMILY.to_string(),
            element_type,
            pointer_width: host_pointer_width(),
            tier,
        }
    }

    /// `/<namespace>/<family>_kernels_<type>_<width>_cc<tier>.ptx`
    pub fn resource_name(&self) -> String {
        format!(
            "/{}/{}_kernels_{}_{}_cc{}.ptx",
            self.namespace, self.family, self.element_type.tag(), self.pointer_width, self.tier
        )
    }
}

/// Where device-code images come from.
pub trait ResourceSource: Send + Sync {
    /// Open the named resource, `Ok(None)` if it does not exist.
    fn open(&self, name: &str) -> io::Result<Option<Box<dyn Read + '_>>>;
}

/// Images laid out on disk under a root directory, mirroring resource names.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name.trim_start_matches('/'))
    }
}

impl ResourceSource for DirectorySource {
    fn open(&self, name: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        match File::open(self.path_for(name)) {
            Ok(file) => Ok(Some(Box::new(BufReader::new(file)))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Images held in memory, e.g. embedded with `include_bytes!`.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    images: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, image: impl Into<Vec<u8>>) {
        self.images.insert(name.into(), image.into());
    }

    pub fn with(mut self, name: impl Into<String>, image: impl Into<Vec<u8>>) -> Self {
        self.insert(name, image);
        self
    }
}

impl ResourceSource for MemorySource {
    fn open(&self, name: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        Ok(self.images.get(name).map(|img| Box::new(img.as_slice()) as Box<dyn Read + '_>))
    }
}

/// Read a whole resource and append the terminating NUL the driver expects.
///
/// The reader is dropped on every path out of this function.
pub fn read_image(source: &dyn ResourceSource, name: &str) -> Result<Vec<u8>, CudaError> {
    let read_err = |source: io::Error| CudaError::ResourceRead { name: name.to_string(), source };
    let mut reader = source
        .open(name)
        .map_err(read_err)?
        .ok_or_else(|| CudaError::ResourceNotFound { name: name.to_string() })?;
    let mut image = Vec::new();
    reader.read_to_end(&mut image).map_err(read_err)?;
    image.push(0);
    Ok(image)
}

/// Device limits read once when a dispatcher is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProperties {
    pub max_block_dim_x: u32,
    pub compute_capability_major: i32,
}

impl DeviceProperties {
    pub fn query(driver: &dyn Driver, ordinal: i32) -> Result<Self, CudaError> {
        let ctx_err = |call: &str, s: CuStatus| CudaError::Context(format!("{}: {}", call, driver.describe(s)));
        let device = driver.device(ordinal).map_err(|s| ctx_err("cuDeviceGet", s))?;
        let max_block = driver
            .device_attribute(DeviceAttribute::MaxBlockDimX, device)
            .map_err(|s| ctx_err("cuDeviceGetAttribute(MAX_BLOCK_DIM_X)", s))?;
        let cc_major = driver
            .device_attribute(DeviceAttribute::ComputeCapabilityMajor, device)
            .map_err(|s| ctx_err("cuDeviceGetAttribute(COMPUTE_CAPABILITY_MAJOR)", s))?;
        let max_block_dim_x = u32::try_from(max_block)
            .ok()
            .filter(|&b| b > 0)
            .ok_or_else(|| CudaError::InvalidGeometry(format!("device reports max block dim {}", max_block)))?;
        let props = Self { max_block_dim_x, compute_capability_major: cc_major };
        tracing::debug!("device {}: {:?}", ordinal, props);
        Ok(props)
    }

    pub fn tier(&self) -> CapabilityTier {
        CapabilityTier::from_major(self.compute_capability_major)
    }
}

/// Resolve `key` in `source` and load it as a module.
pub fn load_module(
    driver: &dyn Driver,
    source: &dyn ResourceSource,
    key: &ResourceKey,
) -> Result<ModuleHandle, CudaError> {
    let name = key.resource_name();
    tracing::debug!("loading device code {}", name);
    let image = read_image(source, &name)?;
    let module = driver.load_module(&image).map_err(|s| CudaError::ModuleLoad {
        module: name.clone(),
        msg: driver.describe(s),
    })?;
    tracing::info!("loaded module {} ({} bytes)", name, image.len() - 1);
    Ok(module)
}

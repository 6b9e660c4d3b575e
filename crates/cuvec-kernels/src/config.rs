//! Dispatcher configuration.

use serde::{Deserialize, Serialize};

use crate::cuda::context::DEFAULT_DEVICE_ORDINAL;
use crate::cuda::module::{
    host_pointer_width, CapabilityTier, ElementType, ResourceKey, DEFAULT_FAMILY, DEFAULT_NAMESPACE,
};

/// Prefix shared by every vector kernel entry point.
pub const DEFAULT_KERNEL_PREFIX: &str = "vec_";

/// Configuration for one [`Dispatcher`](crate::cuda::dispatcher::Dispatcher).
///
/// Only `element_type` is required; everything else defaults to the layout
/// of the stock JCudaVec PTX images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Element type of the kernel family to load.
    pub element_type: ElementType,

    /// Prepended to operation names. Defaults to `vec_`.
    #[serde(default)]
    pub kernel_prefix: Option<String>,

    /// Appended to operation names. Defaults to `f` for float, empty for double.
    #[serde(default)]
    pub kernel_suffix: Option<String>,

    /// Device to create a context on when none is current.
    #[serde(default = "default_device_ordinal")]
    pub device_ordinal: i32,

    /// Threads per block. Capped at the device maximum; defaults to it.
    #[serde(default)]
    pub block_dim_x: Option<u32>,

    /// Force a compute-capability tier instead of deriving it from the device.
    #[serde(default)]
    pub tier_override: Option<CapabilityTier>,

    /// First path component of resource names.
    #[serde(default = "default_namespace")]
    pub resource_namespace: String,

    /// Image family, the part before `_kernels_` in resource names.
    #[serde(default = "default_family")]
    pub resource_family: String,
}

fn default_device_ordinal() -> i32 {
    DEFAULT_DEVICE_ORDINAL
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_family() -> String {
    DEFAULT_FAMILY.to_string()
}

impl DispatcherConfig {
    pub fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            kernel_prefix: None,
            kernel_suffix: None,
            device_ordinal: DEFAULT_DEVICE_ORDINAL,
            block_dim_x: None,
            tier_override: None,
            resource_namespace: default_namespace(),
            resource_family: default_family(),
        }
    }

    /// Single-precision kernels: `vec_<op>f`.
    pub fn for_float() -> Self {
        Self::new(ElementType::Float)
    }

    /// Double-precision kernels: `vec_<op>`.
    pub fn for_double() -> Self {
        Self::new(ElementType::Double)
    }

    pub fn kernel_prefix(&self) -> &str {
        self.kernel_prefix.as_deref().unwrap_or(DEFAULT_KERNEL_PREFIX)
    }

    pub fn kernel_suffix(&self) -> &str {
        match (&self.kernel_suffix, self.element_type) {
            (Some(s), _) => s,
            (None, ElementType::Float) => "f",
            (None, ElementType::Double) => "",
        }
    }

    /// Resource key for a device of the given tier on this host.
    pub fn resource_key(&self, tier: CapabilityTier) -> ResourceKey {
        ResourceKey {
            namespace: self.resource_namespace.clone(),
            family: self.resource_family.clone(),
            element_type: self.element_type,
            pointer_width: host_pointer_width(),
            tier: self.tier_override.clone().unwrap_or(tier),
        }
    }
}

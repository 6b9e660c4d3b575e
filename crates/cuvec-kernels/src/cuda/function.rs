//! Lazily resolved kernel entry points.

use std::collections::HashMap;
use std::ffi::CString;

use super::context::CudaError;
use super::driver::Driver;
use super::handle::{FunctionHandle, ModuleHandle};

/// Maps operation names to entry points of one module.
///
/// The full symbol is `prefix + name + suffix` (`vec_add` + `f` gives
/// `vec_addf`). Handles are only valid while the module is loaded, so the
/// cache must be cleared when the module goes away.
#[derive(Debug)]
pub struct FunctionCache {
    prefix: String,
    suffix: String,
    functions: HashMap<String, FunctionHandle>,
}

impl FunctionCache {
    pub fn new(prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), suffix: suffix.into(), functions: HashMap::new() }
    }

    /// Symbol name for an operation.
    pub fn symbol(&self, name: &str) -> String {
        format!("{}{}{}", self.prefix, name, self.suffix)
    }

    /// Look up `name`, asking the module on first use.
    pub fn resolve(
        &mut self,
        driver: &dyn Driver,
        module: ModuleHandle,
        name: &str,
    ) -> Result<FunctionHandle, CudaError> {
        if let Some(&func) = self.functions.get(name) {
            return Ok(func);
        }

        let symbol = self.symbol(name);
        let c_symbol = CString::new(symbol.as_str()).map_err(|_| CudaError::FuncNotFound {
            func: symbol.clone(),
            msg: "name contains a NUL byte".to_string(),
        })?;
        let func = driver
            .module_function(module, &c_symbol)
            .map_err(|s| CudaError::FuncNotFound { func: symbol.clone(), msg: driver.describe(s) })?;
        tracing::debug!("resolved {} -> {:#x}", symbol, func.id());

        self.functions.insert(name.to_string(), func);
        Ok(func)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Drop every handle. Called when the owning module is unloaded.
    pub fn clear(&mut self) {
        self.functions.clear();
    }
}

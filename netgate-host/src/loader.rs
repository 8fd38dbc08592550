//! Plugin loader using wasmtime
//!
//! Compiles guests, links the network imports and hands out fuel-limited
//! instances. Every instance gets its own [`HostState`], so grants and
//! audit records are tracked per plugin id.

use crate::audit::{self, AuditSink, NullAuditSink};
use crate::capability::{CapabilityStore, MemoryCapabilityStore};
use crate::config::HostConfig;
use crate::handler::{HttpHandler, UnavailableHandler};
use crate::imports::{self, HostState};
use netgate_api::{unpack_ptr_len, ALLOC_EXPORT, DEALLOC_EXPORT, MEMORY_EXPORT};
use std::sync::Arc;
use thiserror::Error;
use wasmtime::*;

/// Errors that can occur during plugin loading and execution
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Engine creation failed: {0}")]
    EngineCreation(#[source] anyhow::Error),

    #[error("Invalid host config: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Linking host functions failed: {0}")]
    Linker(#[source] anyhow::Error),

    #[error("Module compilation failed: {0}")]
    ModuleCompilation(#[source] anyhow::Error),

    #[error("Instantiation failed: {0}")]
    Instantiation(#[source] anyhow::Error),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Function call failed: {function} - {source}")]
    FunctionCall {
        function: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Memory access error: {0}")]
    MemoryAccess(String),

    #[error("Fuel exhausted (CPU limit exceeded)")]
    FuelExhausted,
}

/// Plugin loader with wasmtime engine and the shared host services
pub struct PluginLoader {
    engine: Engine,
    linker: Linker<HostState>,
    config: HostConfig,
    capabilities: Arc<dyn CapabilityStore>,
    handler: Arc<dyn HttpHandler>,
    audit: Arc<dyn AuditSink>,
}

/// Builder for [`PluginLoader`]
///
/// Defaults deny every capability, answer every request as unavailable and
/// discard audit events.
pub struct PluginLoaderBuilder {
    config: HostConfig,
    capabilities: Arc<dyn CapabilityStore>,
    handler: Arc<dyn HttpHandler>,
    audit: Arc<dyn AuditSink>,
}

impl Default for PluginLoaderBuilder {
    fn default() -> Self {
        Self {
            config: HostConfig::default(),
            capabilities: Arc::new(MemoryCapabilityStore::new()),
            handler: Arc::new(UnavailableHandler),
            audit: Arc::new(NullAuditSink),
        }
    }
}

impl PluginLoaderBuilder {
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn capabilities(mut self, capabilities: Arc<dyn CapabilityStore>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn handler(mut self, handler: Arc<dyn HttpHandler>) -> Self {
        self.handler = handler;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn build(self) -> Result<PluginLoader, LoaderError> {
        self.config.validate()?;

        let mut config = Config::new();
        config.consume_fuel(true);
        config.wasm_memory64(false);
        let engine = Engine::new(&config).map_err(LoaderError::EngineCreation)?;

        let mut linker = Linker::new(&engine);
        imports::add_to_linker(&mut linker).map_err(LoaderError::Linker)?;

        Ok(PluginLoader {
            engine,
            linker,
            config: self.config,
            capabilities: self.capabilities,
            handler: self.handler,
            audit: self.audit,
        })
    }
}

impl PluginLoader {
    /// Create a loader with default services
    pub fn new() -> Result<Self, LoaderError> {
        Self::builder().build()
    }

    pub fn builder() -> PluginLoaderBuilder {
        PluginLoaderBuilder::default()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Load a plugin from Wasm bytes (or WAT text)
    pub fn load(&self, plugin_id: &str, wasm_bytes: &[u8]) -> Result<PluginInstance, LoaderError> {
        // 1. Compile module
        let module =
            Module::new(&self.engine, wasm_bytes).map_err(LoaderError::ModuleCompilation)?;

        // 2. Create store with per-plugin state and fuel limit
        let state = HostState::new(
            plugin_id,
            self.capabilities.clone(),
            self.handler.clone(),
            self.audit.clone(),
            self.config.clone(),
        );
        let mut store = Store::new(&self.engine, state);
        store
            .set_fuel(self.config.fuel_limit)
            .map_err(LoaderError::EngineCreation)?;

        // 3. Instantiate against the network imports
        let instance = self
            .linker
            .instantiate(&mut store, &module)
            .map_err(LoaderError::Instantiation)?;

        // 4. Get memory
        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| LoaderError::FunctionNotFound(MEMORY_EXPORT.to_string()))?;

        tracing::info!(plugin = plugin_id, bytes = wasm_bytes.len(), "plugin loaded");
        if let Err(e) = self
            .audit
            .record(audit::plugin_loaded(plugin_id, wasm_bytes.len()))
        {
            tracing::warn!(plugin = plugin_id, error = %e, "failed to record audit event");
        }

        Ok(PluginInstance {
            store,
            instance,
            memory,
        })
    }
}

/// A plugin instance bound to its host state
pub struct PluginInstance {
    store: Store<HostState>,
    instance: Instance,
    memory: Memory,
}

impl PluginInstance {
    pub fn plugin_id(&self) -> &str {
        self.store.data().plugin_id()
    }

    /// Call an exported function with a fresh fuel allowance
    pub fn call<P, R>(&mut self, name: &str, params: P) -> Result<R, LoaderError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let func = self
            .instance
            .get_typed_func::<P, R>(&mut self.store, name)
            .map_err(|_| LoaderError::FunctionNotFound(name.to_string()))?;

        let fuel = self.store.data().config().fuel_limit;
        self.store
            .set_fuel(fuel)
            .map_err(LoaderError::EngineCreation)?;

        func.call(&mut self.store, params).map_err(|e| {
            if matches!(e.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
                tracing::warn!(plugin = %self.store.data().plugin_id(), function = name, "fuel exhausted");
                LoaderError::FuelExhausted
            } else {
                LoaderError::FunctionCall {
                    function: name.to_string(),
                    source: e,
                }
            }
        })
    }

    /// Copy bytes into a guest allocation, then call `name(ptr, len) -> i64`
    /// and read back the packed result
    pub fn call_with_bytes(&mut self, name: &str, input: &[u8]) -> Result<Vec<u8>, LoaderError> {
        let input_len = i32::try_from(input.len())
            .map_err(|_| LoaderError::MemoryAccess(format!("input of {} bytes", input.len())))?;

        let input_ptr: i32 = self.call(ALLOC_EXPORT, input_len)?;
        if input_ptr == 0 {
            return Err(LoaderError::MemoryAccess(format!(
                "{} returned null for {} bytes",
                ALLOC_EXPORT, input_len
            )));
        }
        self.write_memory(input_ptr as u32 as usize, input)?;

        let packed: i64 = self.call(name, (input_ptr, input_len))?;
        let (out_ptr, out_len) = unpack_ptr_len(packed);
        let output = self.read_memory(out_ptr as u32 as usize, out_len as u32 as usize)?;

        // Deallocation is best effort; guests may not free at all
        let _ = self.call::<(i32, i32), ()>(DEALLOC_EXPORT, (input_ptr, input_len));
        if out_len > 0 {
            let _ = self.call::<(i32, i32), ()>(DEALLOC_EXPORT, (out_ptr, out_len));
        }

        Ok(output)
    }

    pub fn read_memory(&self, ptr: usize, len: usize) -> Result<Vec<u8>, LoaderError> {
        let data = self.memory.data(&self.store);
        ptr.checked_add(len)
            .and_then(|end| data.get(ptr..end))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                LoaderError::MemoryAccess(format!(
                    "Out of bounds: ptr={}, len={}, memory_size={}",
                    ptr,
                    len,
                    data.len()
                ))
            })
    }

    pub fn write_memory(&mut self, ptr: usize, bytes: &[u8]) -> Result<(), LoaderError> {
        self.memory
            .write(&mut self.store, ptr, bytes)
            .map_err(|e| LoaderError::MemoryAccess(format!("Failed to write: {}", e)))
    }
}

impl std::fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginInstance")
            .field("plugin_id", &self.plugin_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_GUEST: &str = r#"(module (memory (export "memory") 1))"#;

    #[test]
    fn test_loader_creation() {
        assert!(PluginLoader::new().is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = PluginLoader::builder()
            .config(HostConfig::default().with_fuel_limit(0))
            .build();
        assert!(matches!(result, Err(LoaderError::Config(_))));
    }

    #[test]
    fn test_load_requires_memory() {
        let loader = PluginLoader::new().unwrap();
        let result = loader.load("bare", br#"(module)"#);
        assert!(matches!(result, Err(LoaderError::FunctionNotFound(name)) if name == "memory"));
    }

    #[test]
    fn test_invalid_module() {
        let loader = PluginLoader::new().unwrap();
        let result = loader.load("junk", b"\0asm not really");
        assert!(matches!(result, Err(LoaderError::ModuleCompilation(_))));
    }

    #[test]
    fn test_missing_function() {
        let loader = PluginLoader::new().unwrap();
        let mut plugin = loader.load("empty", EMPTY_GUEST.as_bytes()).unwrap();
        assert_eq!(plugin.plugin_id(), "empty");

        let result = plugin.call::<(), i32>("nope", ());
        assert!(matches!(result, Err(LoaderError::FunctionNotFound(_))));
    }

    #[test]
    fn test_memory_bounds() {
        let loader = PluginLoader::new().unwrap();
        let mut plugin = loader.load("empty", EMPTY_GUEST.as_bytes()).unwrap();

        plugin.write_memory(100, b"abc").unwrap();
        assert_eq!(plugin.read_memory(100, 3).unwrap(), b"abc");
        assert!(plugin.read_memory(65_535, 2).is_err());
        assert!(plugin.read_memory(usize::MAX, 2).is_err());
    }
}

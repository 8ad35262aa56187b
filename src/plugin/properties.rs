//! Plugin properties: the immutable template one plugin type is built from.
//!
//! Loading walks `SourceRead -> Compiled -> Declared -> Finalized`.  Any
//! failure aborts the load and no properties are produced.  Once finalized
//! nothing in here changes, so `Arc<PluginProperties>` is shared freely
//! between the registry and instances running on different threads.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use mlua::Value;
use parking_lot::Mutex;

use super::declare::{Declaration, MAX_UNIQUE_ID};
use super::types::{Hook, HookSet, PortDescriptor};
use crate::config::Config;
use crate::error::{PluginError, Result};
use crate::lua::context::SandboxedContext;

const FINALIZE_SOURCE: &str = include_str!("../lua/finalize.luau");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    SourceRead,
    Compiled,
    Declared,
    Finalized,
}

/// Bytecode of the finalization unit, compiled once per process.
fn finalize_unit() -> Result<&'static [u8]> {
    static UNIT: OnceLock<std::result::Result<Vec<u8>, String>> = OnceLock::new();
    UNIT.get_or_init(|| {
        SandboxedContext::compile(FINALIZE_SOURCE.as_bytes()).map_err(|e| e.to_string())
    })
    .as_deref()
    .map_err(|e| PluginError::Compile(e.clone()))
}

/// Stable default unique id: FNV-1a of the label folded into LADSPA's range.
pub fn default_unique_id(label: &str) -> u64 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in label.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    u64::from(hash) % MAX_UNIQUE_ID + 1
}

pub struct PluginProperties {
    bytecode: Vec<u8>,
    /// Kept alive for as long as any instance or descriptor refers to us.
    master: Mutex<SandboxedContext>,
    path: Option<PathBuf>,
    name: String,
    label: String,
    maker: String,
    copyright: String,
    realtime: bool,
    unique_id: u64,
    ports: Vec<PortDescriptor>,
    hooks: HookSet,
    memory_limit: usize,
}

impl PluginProperties {
    /// Read, compile, declare and finalize the plugin at `path`.
    pub fn load(path: &Path, config: &Config) -> Result<Arc<Self>> {
        let source = std::fs::read(path).map_err(|source| PluginError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plugin".into());
        log::debug!("{}: {:?} ({} bytes)", stem, LoadStage::SourceRead, source.len());

        let mut props = Self::build(&stem, &source, config)?;
        props.path = Some(path.to_path_buf());
        Ok(Arc::new(props))
    }

    /// Build properties from in-memory source.  `stem` provides the
    /// default label.
    pub fn from_source(stem: &str, source: &[u8], config: &Config) -> Result<Arc<Self>> {
        Self::build(stem, source, config).map(Arc::new)
    }

    fn build(stem: &str, source: &[u8], config: &Config) -> Result<Self> {
        let bytecode = SandboxedContext::compile(source)?;
        log::debug!("{}: {:?} ({} bytes of bytecode)", stem, LoadStage::Compiled, bytecode.len());

        let limit = config.memory_limit();
        let declaration = Arc::new(Mutex::new(Declaration::default()));
        let master = SandboxedContext::master(stem, limit, Arc::clone(&declaration))?;

        let chunk = master.load(&bytecode, stem)?;
        master.call::<Value>(&chunk, ())?;
        master.seal();
        log::debug!("{}: {:?}", stem, LoadStage::Declared);

        master.unseal();
        let internals = master
            .internals()
            .ok_or_else(|| PluginError::Runtime("master context has no internals".into()))?;
        let finalize = master.load(finalize_unit()?, "=finalize")?;
        master.call::<()>(&finalize, internals)?;
        master.seal();

        let declared = declaration.lock().clone();
        let props = Self::from_declaration(stem, declared, bytecode, master, limit);
        log::debug!("{}: {:?}", props.label, LoadStage::Finalized);
        Ok(props)
    }

    fn from_declaration(
        stem: &str,
        declared: Declaration,
        bytecode: Vec<u8>,
        master: SandboxedContext,
        memory_limit: usize,
    ) -> Self {
        let label = declared.label.unwrap_or_else(|| stem.to_owned());
        let name = declared.name.unwrap_or_else(|| label.clone());

        for (i, port) in declared.ports.iter().enumerate() {
            if !port.declared {
                log::warn!("{}: port {} was never declared, using defaults", label, i + 1);
            }
        }
        if !declared.hooks.contains(Hook::Run) {
            log::warn!("{}: no run() defined, instances will do nothing", label);
        }

        Self {
            bytecode,
            master: Mutex::new(master),
            path: None,
            unique_id: declared.unique_id.unwrap_or_else(|| default_unique_id(&label)),
            maker: declared.maker.unwrap_or_else(|| "Unknown".into()),
            copyright: declared.copyright.unwrap_or_else(|| "None".into()),
            realtime: declared.realtime.unwrap_or(true),
            ports: declared.ports,
            hooks: declared.hooks,
            name,
            label,
            memory_limit,
        }
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn maker(&self) -> &str {
        &self.maker
    }

    pub fn copyright(&self) -> &str {
        &self.copyright
    }

    pub fn realtime(&self) -> bool {
        self.realtime
    }

    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn hooks(&self) -> HookSet {
        self.hooks
    }

    /// Quota every context of this plugin runs under, in bytes.
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Memory use of the master context, as a fraction of the quota.
    pub fn master_memory_usage(&self) -> f64 {
        self.master.lock().memory_usage()
    }
}

impl std::fmt::Debug for PluginProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginProperties")
            .field("label", &self.label)
            .field("name", &self.name)
            .field("unique_id", &self.unique_id)
            .field("ports", &self.ports.len())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

//! One sandboxed Luau VM plus the memory quota it runs under.
//!
//! A plugin owns one *master* context (declaration phase, then read-only
//! template) and every instance owns its own *instance* context.  Both get the
//! same restricted standard library and the `ladspa` script library; only the
//! master gets the declaration command channel.
//!
//! Sandboxing follows Luau's model: after [`SandboxedContext::open`] every
//! library table is read-only and scripts write into a proxy globals table.
//! [`SandboxedContext::seal`] freezes that proxy too, after which the global
//! namespace can no longer gain or lose bindings.

use std::sync::Arc;

use mlua::{
    AppDataRef, ChunkMode, Compiler, FromLuaMulti, Function, IntoLuaMulti, Lua, LuaOptions,
    StdLib, Table,
};
use parking_lot::Mutex;

use super::alloc::BoundedAllocator;
use super::api;
use crate::error::{PluginError, Result};
use crate::plugin::declare::Declaration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRole {
    /// Declaration phase and read-only template of a plugin type.
    Master,
    /// A running plugin instance.
    Instance { sample_rate: u32 },
}

impl ContextRole {
    pub fn sample_rate(&self) -> Option<u32> {
        match self {
            Self::Master => None,
            Self::Instance { sample_rate } => Some(*sample_rate),
        }
    }
}

/// Per-VM state reachable from Rust callbacks through Lua app data.
pub(crate) struct ContextInfo {
    pub plugin: String,
    pub role: ContextRole,
    pub allocator: Arc<BoundedAllocator>,
}

impl ContextInfo {
    /// Quota use of the whole context: engine heap plus script buffers.
    pub fn usage_factor(&self, lua: &Lua) -> f64 {
        let limit = self.allocator.limit();
        let used = lua.used_memory() + self.allocator.allocated();
        if limit == 0 {
            return if used == 0 { 0.0 } else { f64::INFINITY };
        }
        used as f64 / limit as f64
    }

    /// Split the quota between the engine heap and script buffers: buffers
    /// may only claim what the heap leaves free, the heap is capped at what
    /// the buffers leave free.
    pub fn balance(&self, lua: &Lua) -> mlua::Result<()> {
        self.allocator.set_engine_usage(lua.used_memory());
        // The engine reads a zero limit as "unlimited".
        lua.set_memory_limit(self.allocator.engine_headroom().max(1))?;
        Ok(())
    }
}

/// [`ContextInfo::balance`] for the context owning `lua`.
pub(crate) fn balance_quota(lua: &Lua) -> mlua::Result<()> {
    match lua.app_data_ref::<ContextInfo>() {
        Some(info) => info.balance(lua),
        None => Ok(()),
    }
}

/// Standard libraries scripts may use.  No I/O, no OS, no debug.
fn script_libs() -> StdLib {
    StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE
}

pub struct SandboxedContext {
    lua: Lua,
    allocator: Arc<BoundedAllocator>,
    role: ContextRole,
    plugin: String,
}

impl SandboxedContext {
    /// A master context wired to `declaration` through the command channel.
    pub fn master(plugin: &str, limit: usize, declaration: Arc<Mutex<Declaration>>) -> Result<Self> {
        Self::open(plugin, limit, ContextRole::Master, Some(declaration))
    }

    pub fn instance(plugin: &str, limit: usize, sample_rate: u32) -> Result<Self> {
        Self::open(plugin, limit, ContextRole::Instance { sample_rate }, None)
    }

    fn open(
        plugin: &str,
        limit: usize,
        role: ContextRole,
        declaration: Option<Arc<Mutex<Declaration>>>,
    ) -> Result<Self> {
        let lua = Lua::new_with(script_libs(), LuaOptions::default()).map_err(lua_error)?;
        let allocator = Arc::new(BoundedAllocator::new(limit));
        lua.set_app_data(ContextInfo {
            plugin: plugin.to_owned(),
            role,
            allocator: Arc::clone(&allocator),
        });

        api::install(&lua, declaration).map_err(lua_error)?;
        lua.sandbox(true).map_err(lua_error)?;
        api::bind_environment(&lua).map_err(lua_error)?;
        balance_quota(&lua).map_err(lua_error)?;

        log::debug!("{}: opened {:?} context ({} KiB quota)", plugin, role, limit >> 10);
        Ok(Self {
            lua,
            allocator,
            role,
            plugin: plugin.to_owned(),
        })
    }

    /// Compile source text to Luau bytecode.
    pub fn compile(source: &[u8]) -> Result<Vec<u8>> {
        Compiler::new()
            .compile(source)
            .map_err(|e| PluginError::Compile(e.to_string()))
    }

    /// Load bytecode as a callable chunk.  Nothing runs yet.
    pub fn load(&self, bytecode: &[u8], name: &str) -> Result<Function> {
        self.lua
            .load(bytecode)
            .set_name(name)
            .set_mode(ChunkMode::Binary)
            .into_function()
            .map_err(|e| PluginError::Compile(e.to_string()))
    }

    /// Call `function` in protected mode.  The quota split is refreshed
    /// first, since buffers may have been collected since the last call.
    pub fn call<R: FromLuaMulti>(&self, function: &Function, args: impl IntoLuaMulti) -> Result<R> {
        balance_quota(&self.lua).map_err(lua_error)?;
        function.call(args).map_err(lua_error)
    }

    /// Freeze the global namespace.
    pub fn seal(&self) {
        self.lua.globals().set_readonly(true);
    }

    /// Reopen the global namespace for writes.
    pub fn unseal(&self) {
        self.lua.globals().set_readonly(false);
    }

    pub fn is_sealed(&self) -> bool {
        self.lua.globals().is_readonly()
    }

    pub fn globals(&self) -> Table {
        self.lua.globals()
    }

    /// The master's internal declaration namespace, if this is a master.
    pub fn internals(&self) -> Option<Table> {
        self.lua.named_registry_value::<Table>(api::INTERNAL_NAMESPACE).ok()
    }

    /// Engine heap plus script buffers, as a fraction of the quota.
    pub fn memory_usage(&self) -> f64 {
        match self.info() {
            Some(info) => info.usage_factor(&self.lua),
            None => self.allocator.usage_factor(),
        }
    }

    pub fn allocator(&self) -> &Arc<BoundedAllocator> {
        &self.allocator
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    fn info(&self) -> Option<AppDataRef<'_, ContextInfo>> {
        self.lua.app_data_ref::<ContextInfo>()
    }
}

impl std::fmt::Debug for SandboxedContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxedContext")
            .field("plugin", &self.plugin)
            .field("role", &self.role)
            .field("allocated", &self.allocator.allocated())
            .finish()
    }
}

fn lua_error(err: mlua::Error) -> PluginError {
    PluginError::from_lua(&err)
}

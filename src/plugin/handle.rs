//! A live plugin instance.
//!
//! instantiate -> connect_port* -> activate -> run* -> deactivate -> drop.
//! The host serialises calls into one handle; distinct handles of the same
//! plugin type may run on different threads at the same time.

use std::sync::Arc;

use mlua::{AnyUserData, Function, MultiValue, Value};

use super::properties::PluginProperties;
use super::types::{Hook, Sample};
use crate::error::{PluginError, Result};
use crate::lua::buffer::PortBuffer;
use crate::lua::context::SandboxedContext;

/// How a hook call went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HookCall {
    /// The script does not define the hook.
    Missing,
    Completed,
    /// The hook returned values nobody asked for.
    Imbalanced(usize),
    Failed,
}

/// Hook functions, resolved once after the instance globals are frozen.
struct Hooks {
    activate: Option<Function>,
    deactivate: Option<Function>,
    run: Option<Function>,
}

impl Hooks {
    fn resolve(context: &SandboxedContext) -> Self {
        let globals = context.globals();
        let lookup = |hook: Hook| match globals.get::<Value>(hook.as_str()) {
            Ok(Value::Function(f)) => Some(f),
            Ok(Value::Nil) => None,
            Ok(other) => {
                log::warn!(
                    "{}: {}() is a {}, ignoring it",
                    context.plugin(),
                    hook,
                    other.type_name()
                );
                None
            }
            Err(e) => {
                log::warn!("{}: cannot look up {}(): {}", context.plugin(), hook, e);
                None
            }
        };
        Self {
            activate: lookup(Hook::Activate),
            deactivate: lookup(Hook::Deactivate),
            run: lookup(Hook::Run),
        }
    }

    fn get(&self, hook: Hook) -> Option<&Function> {
        match hook {
            Hook::Activate => self.activate.as_ref(),
            Hook::Deactivate => self.deactivate.as_ref(),
            Hook::Run => self.run.as_ref(),
        }
    }
}

// Field order is drop order: Lua references go before the context.
pub struct PluginHandle {
    hooks: Hooks,
    buffers: Vec<AnyUserData>,
    context: SandboxedContext,
    properties: Arc<PluginProperties>,
    sample_rate: u32,
    activated: bool,
    warned_inactive: bool,
}

impl PluginHandle {
    /// Derive a new instance from `properties`.
    pub fn instantiate(properties: Arc<PluginProperties>, sample_rate: u32) -> Result<Self> {
        let label = properties.label();
        let context = SandboxedContext::instance(label, properties.memory_limit(), sample_rate)?;

        let buffers = Self::install_buffers(&context, properties.port_count())?;

        let chunk = context.load(properties.bytecode(), label)?;
        context.call::<()>(&chunk, ())?;
        context.seal();

        let hooks = Hooks::resolve(&context);
        if hooks.run.is_none() {
            log::warn!("{}: instance has no run(), blocks pass through untouched", label);
        }

        log::debug!("{}: instantiated at {} Hz", label, sample_rate);
        Ok(Self {
            hooks,
            buffers,
            context,
            properties,
            sample_rate,
            activated: false,
            warned_inactive: false,
        })
    }

    /// One external buffer per port, published read-only as `buffers`.
    fn install_buffers(context: &SandboxedContext, count: usize) -> Result<Vec<AnyUserData>> {
        let install = || -> mlua::Result<Vec<AnyUserData>> {
            let lua = context.lua();
            let table = lua.create_table_with_capacity(count, 0)?;
            let mut buffers = Vec::with_capacity(count);
            for _ in 0..count {
                let buffer = lua.create_userdata(PortBuffer::external())?;
                table.raw_push(buffer.clone())?;
                buffers.push(buffer);
            }
            table.set_readonly(true);
            context.globals().set("buffers", table)?;
            Ok(buffers)
        };
        install().map_err(|e| PluginError::from_lua(&e))
    }

    /// Bind host memory to port `index` (0-based).  An index past the
    /// declared count is logged and ignored.  Control ports are readable
    /// right away; audio ports get their length from the next block.
    ///
    /// # Safety
    /// `data` must stay valid for the block sizes passed to [`run`](Self::run)
    /// until it is reconnected or the handle is dropped.
    pub unsafe fn connect_port(&mut self, index: usize, data: *mut Sample) {
        let Some(buffer) = self.buffers.get(index) else {
            log::error!(
                "{}: connect_port({}) past port count {}",
                self.properties.label(),
                index,
                self.buffers.len()
            );
            return;
        };
        let is_control = self.properties.ports().get(index).is_some_and(|p| p.is_control());
        match buffer.borrow_mut::<PortBuffer>() {
            Ok(mut buffer) => {
                buffer.connect(data);
                if is_control {
                    buffer.set_len(1);
                }
            }
            Err(e) => log::error!("{}: port {} is unavailable: {}", self.properties.label(), index, e),
        }
    }

    pub fn activate(&mut self) {
        self.call_hook(Hook::Activate, ());
        self.activated = true;
        self.warned_inactive = false;
    }

    pub fn deactivate(&mut self) {
        self.call_hook(Hook::Deactivate, ());
        self.activated = false;
    }

    /// Process one block of `sample_count` samples.
    pub fn run(&mut self, sample_count: usize) {
        if !self.activated && !self.warned_inactive {
            log::warn!("{}: run() before activate()", self.properties.label());
            self.warned_inactive = true;
        }

        for (buffer, port) in self.buffers.iter().zip(self.properties.ports()) {
            if let Ok(mut buffer) = buffer.borrow_mut::<PortBuffer>() {
                buffer.set_len(port.kind.block_len(sample_count));
            }
        }

        if self.call_hook(Hook::Run, sample_count) == HookCall::Missing {
            log::trace!("{}: no run(), skipping block", self.properties.label());
        }
    }

    /// Call a hook if the script defines it.  Errors are logged; whatever
    /// the script wrote before failing stays in place.
    fn call_hook(&self, hook: Hook, args: impl mlua::IntoLuaMulti) -> HookCall {
        let Some(function) = self.hooks.get(hook) else {
            return HookCall::Missing;
        };
        match self.context.call::<MultiValue>(function, args) {
            Ok(values) if !values.is_empty() => {
                log::warn!(
                    "{}: {}() left {} value(s) behind (stack imbalance)",
                    self.properties.label(),
                    hook,
                    values.len()
                );
                HookCall::Imbalanced(values.len())
            }
            Ok(_) => HookCall::Completed,
            Err(e) => {
                log::error!("{}: error while calling {}(): {}", self.properties.label(), hook, e);
                HookCall::Failed
            }
        }
    }

    pub fn is_activated(&self) -> bool {
        self.activated
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn properties(&self) -> &Arc<PluginProperties> {
        &self.properties
    }

    pub fn port_count(&self) -> usize {
        self.buffers.len()
    }

    /// Instance memory use as a fraction of the quota.
    pub fn memory_usage(&self) -> f64 {
        self.context.memory_usage()
    }
}

impl Drop for PluginHandle {
    fn drop(&mut self) {
        log::debug!("{}: instance released", self.properties.label());
    }
}

//! The `ladspa` script library and the master's internal namespace.
//!
//! Every context gets the same read-only `ladspa` table.  In a master context
//! `ladspa.set` / `ladspa.port` feed the declaration command channel; in an
//! instance context they are no-ops, so the same script runs unchanged in
//! both roles.

use std::ffi::c_int;
use std::sync::Arc;

use mlua::{AnyUserData, AppDataRef, Lua, MultiValue, Table, UserData, UserDataRef, Value};
use parking_lot::Mutex;

use super::buffer::PortBuffer;
use super::context::{ContextInfo, balance_quota};
use crate::error::PluginError;
use crate::ladspa::ffi::*;
use crate::plugin::declare::{DeclCommand, Declaration};
use crate::plugin::types::{Hook, VERSION_MAJOR, VERSION_MINOR};

/// Named registry slot holding the internal namespace of a master context.
pub const INTERNAL_NAMESPACE: &str = "lualadspa.internal";

const PORT_CONSTANTS: &[(&str, c_int)] = &[
    ("INPUT", LADSPA_PORT_INPUT),
    ("OUTPUT", LADSPA_PORT_OUTPUT),
    ("CONTROL", LADSPA_PORT_CONTROL),
    ("AUDIO", LADSPA_PORT_AUDIO),
];

const HINT_CONSTANTS: &[(&str, c_int)] = &[
    ("BOUNDED_BELOW", LADSPA_HINT_BOUNDED_BELOW),
    ("BOUNDED_ABOVE", LADSPA_HINT_BOUNDED_ABOVE),
    ("TOGGLED", LADSPA_HINT_TOGGLED),
    ("SAMPLE_RATE", LADSPA_HINT_SAMPLE_RATE),
    ("LOGARITHMIC", LADSPA_HINT_LOGARITHMIC),
    ("INTEGER", LADSPA_HINT_INTEGER),
    ("DEFAULT_NONE", LADSPA_HINT_DEFAULT_NONE),
    ("DEFAULT_MINIMUM", LADSPA_HINT_DEFAULT_MINIMUM),
    ("DEFAULT_LOW", LADSPA_HINT_DEFAULT_LOW),
    ("DEFAULT_MIDDLE", LADSPA_HINT_DEFAULT_MIDDLE),
    ("DEFAULT_HIGH", LADSPA_HINT_DEFAULT_HIGH),
    ("DEFAULT_MAXIMUM", LADSPA_HINT_DEFAULT_MAXIMUM),
    ("DEFAULT_0", LADSPA_HINT_DEFAULT_0),
    ("DEFAULT_1", LADSPA_HINT_DEFAULT_1),
    ("DEFAULT_100", LADSPA_HINT_DEFAULT_100),
    ("DEFAULT_440", LADSPA_HINT_DEFAULT_440),
];

type PortArgs = (i64, String, c_int, Option<c_int>, Option<f32>, Option<f32>);

/// Opaque handle to the in-construction declaration, passed to scripts.
#[derive(Clone)]
pub struct DeclarationHandle(Arc<Mutex<Declaration>>);

impl DeclarationHandle {
    fn submit(&self, command: crate::error::Result<DeclCommand>) -> mlua::Result<()> {
        command
            .and_then(|command| self.0.lock().apply(command))
            .map_err(PluginError::into_lua)
    }

    fn set_value(&self, key: &str, value: &Value) -> mlua::Result<()> {
        self.submit(DeclCommand::scalar(key, value))
    }

    fn set_port(&self, (index, name, descriptor, hint, lower, upper): PortArgs) -> mlua::Result<()> {
        self.submit(DeclCommand::port(index, name, descriptor, hint, lower, upper))
    }

    fn set_hook(&self, name: &str) -> mlua::Result<()> {
        match Hook::from_name(name) {
            Some(hook) => self.submit(Ok(DeclCommand::SetHook(hook))),
            None => Err(PluginError::declaration(format!("unknown hook '{name}'")).into_lua()),
        }
    }
}

impl UserData for DeclarationHandle {}

/// Install `print` and the `ladspa` library into a fresh VM.  Must run
/// before the VM is sandboxed.
pub(crate) fn install(lua: &Lua, declaration: Option<Arc<Mutex<Declaration>>>) -> mlua::Result<()> {
    install_print(lua)?;

    let ladspa = lua.create_table()?;
    for &(name, value) in PORT_CONSTANTS.iter().chain(HINT_CONSTANTS) {
        ladspa.set(name, value)?;
    }
    ladspa.set(
        "getVersion",
        lua.create_function(|_, ()| Ok((VERSION_MAJOR, VERSION_MINOR)))?,
    )?;
    ladspa.set("newBuffer", lua.create_function(new_buffer)?)?;
    ladspa.set("resizeBuffer", lua.create_function(resize_buffer)?)?;
    ladspa.set(
        "getSampleRate",
        lua.create_function(|lua, ()| Ok(context_info(lua)?.role.sample_rate()))?,
    )?;
    ladspa.set(
        "getMemoryUsage",
        lua.create_function(|lua, ()| Ok(context_info(lua)?.usage_factor(lua)))?,
    )?;

    match declaration {
        Some(declaration) => {
            let handle = DeclarationHandle(declaration);
            let set = handle.clone();
            ladspa.set(
                "set",
                lua.create_function(move |_, (key, value): (String, Value)| {
                    set.set_value(&key, &value)
                })?,
            )?;
            let port = handle.clone();
            ladspa.set(
                "port",
                lua.create_function(move |_, args: PortArgs| port.set_port(args))?,
            )?;
            install_internals(lua, handle)?;
        }
        None => {
            let ignore = lua.create_function(|_, _: MultiValue| Ok(()))?;
            ladspa.set("set", ignore.clone())?;
            ladspa.set("port", ignore)?;
        }
    }

    lua.globals().set("ladspa", ladspa)
}

/// Point the internal namespace's `env` at the sandboxed globals proxy.
/// No-op for instance contexts.
pub(crate) fn bind_environment(lua: &Lua) -> mlua::Result<()> {
    if let Ok(internal) = lua.named_registry_value::<Table>(INTERNAL_NAMESPACE) {
        internal.set("env", lua.globals())?;
    }
    Ok(())
}

fn install_internals(lua: &Lua, handle: DeclarationHandle) -> mlua::Result<()> {
    let internal = lua.create_table()?;
    internal.set("props", lua.create_userdata(handle)?)?;
    internal.set(
        "setvalue",
        lua.create_function(
            |_, (props, key, value): (UserDataRef<DeclarationHandle>, String, Value)| {
                props.set_value(&key, &value)
            },
        )?,
    )?;
    internal.set(
        "setport",
        lua.create_function(
            |_,
             (props, index, name, descriptor, hint, lower, upper): (
                UserDataRef<DeclarationHandle>,
                i64,
                String,
                c_int,
                Option<c_int>,
                Option<f32>,
                Option<f32>,
            )| { props.set_port((index, name, descriptor, hint, lower, upper)) },
        )?,
    )?;
    internal.set(
        "sethook",
        lua.create_function(|_, (props, name): (UserDataRef<DeclarationHandle>, String)| {
            props.set_hook(&name)
        })?,
    )?;
    internal.set("collect", lua.create_function(|lua, ()| lua.gc_collect())?)?;
    lua.set_named_registry_value(INTERNAL_NAMESPACE, internal)
}

fn install_print(lua: &Lua) -> mlua::Result<()> {
    let print = lua.create_function(|lua, args: MultiValue| {
        let mut line = String::new();
        for (i, value) in args.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            line.push_str(&value.to_string()?);
        }
        match lua.app_data_ref::<ContextInfo>() {
            Some(info) => log::info!("[{}] {}", info.plugin, line),
            None => log::info!("{}", line),
        }
        Ok(())
    })?;
    lua.globals().set("print", print)
}

fn context_info(lua: &Lua) -> mlua::Result<AppDataRef<'_, ContextInfo>> {
    lua.app_data_ref::<ContextInfo>()
        .ok_or_else(|| mlua::Error::runtime("context state missing"))
}

/// Buffer sizes below zero read as zero.
fn sample_count(count: Option<i64>) -> usize {
    usize::try_from(count.unwrap_or(0)).unwrap_or(0)
}

fn new_buffer(lua: &Lua, count: Option<i64>) -> mlua::Result<AnyUserData> {
    let allocator = Arc::clone(&context_info(lua)?.allocator);
    balance_quota(lua)?;
    let buffer = PortBuffer::internal(allocator, sample_count(count));
    balance_quota(lua)?;
    lua.create_userdata(buffer.map_err(PluginError::into_lua)?)
}

fn resize_buffer(lua: &Lua, (buffer, count): (AnyUserData, Option<i64>)) -> mlua::Result<usize> {
    let mut buffer = buffer.borrow_mut::<PortBuffer>()?;
    if buffer.is_external() {
        return Err(mlua::Error::runtime("cannot resize a port buffer"));
    }
    balance_quota(lua)?;
    let len = buffer.resize(sample_count(count));
    balance_quota(lua)?;
    Ok(len)
}

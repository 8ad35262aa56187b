//! The declaration command channel.
//!
//! During the declaration phase a script may only shape the plugin through
//! two commands: "set scalar property by name" and "set port N".  Both are
//! parsed and validated here before they touch the in-construction
//! [`Declaration`]; nothing else about the plugin is writable from Lua.

use std::ffi::c_int;

use mlua::Value;

use super::types::{Hook, HookSet, MAX_PORTS, PortDescriptor};
use crate::error::{PluginError, Result};

/// Largest unique id LADSPA allows.
pub const MAX_UNIQUE_ID: u64 = 0xFF_FFFF;

/// A validated scalar property write.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Name(String),
    Label(String),
    Maker(String),
    Copyright(String),
    Realtime(bool),
    PortCount(usize),
    UniqueId(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclCommand {
    SetScalar(Scalar),
    SetPort {
        /// 0-based; the script surface is 1-based.
        index: usize,
        port: PortDescriptor,
    },
    SetHook(Hook),
}

impl DeclCommand {
    /// Parse `ladspa.set(key, value)`.
    pub fn scalar(key: &str, value: &Value) -> Result<Self> {
        let scalar = match key {
            "name" => Scalar::Name(text(key, value)?),
            "label" => Scalar::Label(text(key, value)?),
            "maker" => Scalar::Maker(text(key, value)?),
            "copyright" => Scalar::Copyright(text(key, value)?),
            "realtime" => Scalar::Realtime(!matches!(value, Value::Nil | Value::Boolean(false))),
            "portCount" => {
                let count = integer(key, value)?;
                if count < 0 || count as usize > MAX_PORTS {
                    return Err(PluginError::declaration(format!(
                        "portCount {count} outside 0..={MAX_PORTS}"
                    )));
                }
                Scalar::PortCount(count as usize)
            }
            "uniqueId" => {
                let id = integer(key, value)?;
                if id < 1 || id as u64 > MAX_UNIQUE_ID {
                    return Err(PluginError::declaration(format!(
                        "uniqueId {id} outside 1..={MAX_UNIQUE_ID}"
                    )));
                }
                Scalar::UniqueId(id as u64)
            }
            "" => return Err(PluginError::declaration("property name expected")),
            other => {
                return Err(PluginError::declaration(format!(
                    "unknown property '{other}'"
                )));
            }
        };
        Ok(DeclCommand::SetScalar(scalar))
    }

    /// Parse `ladspa.port(index, name, descriptor, hint, min, max)`.
    /// `index` is 1-based; range checks against `portCount` happen in
    /// [`Declaration::apply`].
    pub fn port(
        index: i64,
        name: String,
        descriptor: c_int,
        hint: Option<c_int>,
        lower: Option<f32>,
        upper: Option<f32>,
    ) -> Result<Self> {
        let Some(zero_based) = index.checked_sub(1).and_then(|i| usize::try_from(i).ok()) else {
            return Err(PluginError::declaration(format!("bad port index {index}")));
        };
        let Some((direction, kind)) = PortDescriptor::decode_flags(descriptor) else {
            return Err(PluginError::declaration(format!(
                "port {index} ('{name}'): descriptor {descriptor:#x} needs exactly one of \
                 INPUT/OUTPUT and one of CONTROL/AUDIO"
            )));
        };
        Ok(DeclCommand::SetPort {
            index: zero_based,
            port: PortDescriptor {
                name,
                direction,
                kind,
                hint: hint.unwrap_or(0),
                lower_bound: lower.unwrap_or(-1.0),
                upper_bound: upper.unwrap_or(1.0),
                declared: true,
            },
        })
    }
}

fn text(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.to_string_lossy()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(PluginError::declaration(format!(
            "property '{key}' expects a string, got {}",
            other.type_name()
        ))),
    }
}

fn integer(key: &str, value: &Value) -> Result<i64> {
    match value {
        Value::Integer(i) => Ok(i64::from(*i)),
        Value::Number(n) if n.fract() == 0.0 && n.is_finite() => Ok(*n as i64),
        other => Err(PluginError::declaration(format!(
            "property '{key}' expects an integer, got {}",
            other.type_name()
        ))),
    }
}

/// Everything a declaration phase has produced so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Declaration {
    pub name: Option<String>,
    pub label: Option<String>,
    pub maker: Option<String>,
    pub copyright: Option<String>,
    pub realtime: Option<bool>,
    pub unique_id: Option<u64>,
    pub ports: Vec<PortDescriptor>,
    pub hooks: HookSet,
}

impl Declaration {
    pub fn apply(&mut self, command: DeclCommand) -> Result<()> {
        match command {
            DeclCommand::SetScalar(scalar) => match scalar {
                Scalar::Name(v) => self.name = Some(v),
                Scalar::Label(v) => self.label = Some(v),
                Scalar::Maker(v) => self.maker = Some(v),
                Scalar::Copyright(v) => self.copyright = Some(v),
                Scalar::Realtime(v) => self.realtime = Some(v),
                Scalar::UniqueId(v) => self.unique_id = Some(v),
                Scalar::PortCount(n) => {
                    // Re-declaring the count drops every earlier port.
                    self.ports = (0..n).map(PortDescriptor::placeholder).collect();
                }
            },
            DeclCommand::SetPort { index, port } => {
                let count = self.ports.len();
                let Some(slot) = self.ports.get_mut(index) else {
                    return Err(PluginError::declaration(format!(
                        "bad port index {} (portCount is {})",
                        index + 1,
                        count
                    )));
                };
                *slot = port;
            }
            DeclCommand::SetHook(hook) => self.hooks.insert(hook),
        }
        Ok(())
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }
}

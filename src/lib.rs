//! LuaLadspa: LADSPA plugins written in Luau.
//!
//! The shared object exports `ladspa_descriptor`.  On first call it loads
//! every plugin source found on the search paths (see [`config::Config`]),
//! runs each script's declaration phase in a sandboxed master context and
//! publishes one descriptor per plugin.  Every `instantiate` gets its own
//! sandboxed context running the same bytecode, with host buffers bound
//! without copying.

use std::ffi::c_ulong;

pub mod config;
pub mod error;
pub mod ladspa;
pub mod logging;
pub mod lua;
pub mod plugin;

pub use error::{PluginError, Result};

use ladspa::descriptor::guard;
use ladspa::ffi::{LADSPA_Descriptor, LADSPA_Descriptor_Function};

/// LADSPA entry point.  Null past the last plugin.
#[unsafe(no_mangle)]
pub extern "C" fn ladspa_descriptor(index: c_ulong) -> *const LADSPA_Descriptor {
    guard("ladspa_descriptor", std::ptr::null(), || {
        let Ok(index) = usize::try_from(index) else {
            return std::ptr::null();
        };
        ladspa::registry::global().descriptor(index)
    })
}

const _: LADSPA_Descriptor_Function = ladspa_descriptor;

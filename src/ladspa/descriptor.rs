//! Building `LADSPA_Descriptor`s and the `extern "C"` lifecycle callbacks
//! behind them.
//!
//! Each [`DescriptorStorage`] owns the C strings and arrays its descriptor
//! points into, plus a [`PropertiesSlot`] holding one strong reference to the
//! plugin's properties.  `ImplementationData` points at the slot, which lives
//! as long as the storage, so a released descriptor still leads somewhere
//! valid: an empty slot.  Handles travel through the host as
//! `Box<PluginHandle>` raw pointers.

use std::ffi::{CString, c_char, c_ulong, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::ffi::*;
use crate::plugin::{PluginHandle, PluginProperties};

/// Run `f`, turning a panic into `fallback` so it never unwinds into the host.
pub(crate) fn guard<R>(what: &str, fallback: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            log::error!("{}: panic caught at the LADSPA boundary", what);
            fallback
        }
    }
}

/// Interior NULs cannot cross into C; drop them.
fn c_string(text: &str) -> CString {
    CString::new(text.replace('\0', "")).unwrap_or_default()
}

/// What `ImplementationData` points at.  Empty once released.
struct PropertiesSlot(Mutex<Option<Arc<PluginProperties>>>);

impl PropertiesSlot {
    /// Another strong reference, unless the slot was released.
    fn upgrade(&self) -> Option<Arc<PluginProperties>> {
        self.0.lock().clone()
    }

    fn take(&self) -> Option<Arc<PluginProperties>> {
        self.0.lock().take()
    }

    fn is_empty(&self) -> bool {
        self.0.lock().is_none()
    }
}

pub struct DescriptorStorage {
    descriptor: Box<LADSPA_Descriptor>,
    slot: Box<PropertiesSlot>,
    label: String,
    _strings: [CString; 4],
    _port_names: Vec<CString>,
    _port_name_ptrs: Vec<*const c_char>,
    _port_descriptors: Vec<LADSPA_PortDescriptor>,
    _port_hints: Vec<LADSPA_PortRangeHint>,
}

// SAFETY: everything behind the raw pointers is owned by this struct and is
// never mutated after construction.  The slot is only touched under its lock.
unsafe impl Send for DescriptorStorage {}
unsafe impl Sync for DescriptorStorage {}

impl DescriptorStorage {
    pub fn new(properties: &Arc<PluginProperties>) -> Self {
        let label = c_string(properties.label());
        let name = c_string(properties.name());
        let maker = c_string(properties.maker());
        let copyright = c_string(properties.copyright());

        let ports = properties.ports();
        let port_names: Vec<CString> = ports.iter().map(|p| c_string(&p.name)).collect();
        let port_name_ptrs: Vec<*const c_char> = port_names.iter().map(|n| n.as_ptr()).collect();
        let port_descriptors: Vec<LADSPA_PortDescriptor> = ports.iter().map(|p| p.flags()).collect();
        let port_hints: Vec<LADSPA_PortRangeHint> = ports
            .iter()
            .map(|p| LADSPA_PortRangeHint {
                HintDescriptor: p.hint,
                LowerBound: p.lower_bound,
                UpperBound: p.upper_bound,
            })
            .collect();

        let slot = Box::new(PropertiesSlot(Mutex::new(Some(Arc::clone(properties)))));
        let descriptor = Box::new(LADSPA_Descriptor {
            UniqueID: properties.unique_id() as c_ulong,
            Label: label.as_ptr(),
            Properties: if properties.realtime() { LADSPA_PROPERTY_REALTIME } else { 0 },
            Name: name.as_ptr(),
            Maker: maker.as_ptr(),
            Copyright: copyright.as_ptr(),
            PortCount: ports.len() as c_ulong,
            PortDescriptors: port_descriptors.as_ptr(),
            PortNames: port_name_ptrs.as_ptr(),
            PortRangeHints: port_hints.as_ptr(),
            ImplementationData: &*slot as *const PropertiesSlot as *mut c_void,
            instantiate: Some(instantiate),
            connect_port: Some(connect_port),
            activate: Some(activate),
            run: Some(run),
            run_adding: None,
            set_run_adding_gain: None,
            deactivate: Some(deactivate),
            cleanup: Some(cleanup),
        });

        Self {
            descriptor,
            slot,
            label: properties.label().to_owned(),
            _strings: [label, name, maker, copyright],
            _port_names: port_names,
            _port_name_ptrs: port_name_ptrs,
            _port_descriptors: port_descriptors,
            _port_hints: port_hints,
        }
    }

    pub fn as_ptr(&self) -> *const LADSPA_Descriptor {
        &*self.descriptor
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn unique_id(&self) -> u64 {
        self.descriptor.UniqueID as u64
    }

    pub fn is_released(&self) -> bool {
        self.slot.is_empty()
    }

    /// Give back the reference held for `ImplementationData`.  Later
    /// `instantiate` calls on this descriptor return null.  Idempotent.
    pub fn release(&self) {
        drop(self.slot.take());
    }
}

impl Drop for DescriptorStorage {
    fn drop(&mut self) {
        self.release();
    }
}

/// Borrow the handle behind a host pointer.
///
/// # Safety
/// `instance` must be null or come from [`instantiate`] and not yet have
/// been passed to [`cleanup`].
unsafe fn handle_mut<'a>(instance: LADSPA_Handle) -> Option<&'a mut PluginHandle> {
    unsafe { (instance as *mut PluginHandle).as_mut() }
}

unsafe extern "C" fn instantiate(
    descriptor: *const LADSPA_Descriptor,
    sample_rate: c_ulong,
) -> LADSPA_Handle {
    guard("instantiate", ptr::null_mut(), || {
        // SAFETY: hosts pass back a descriptor we handed out.
        let Some(descriptor) = (unsafe { descriptor.as_ref() }) else {
            return ptr::null_mut();
        };
        // SAFETY: `ImplementationData` points at the slot owned by the
        // storage that also owns the descriptor, so it is live here.
        let Some(slot) = (unsafe { (descriptor.ImplementationData as *const PropertiesSlot).as_ref() })
        else {
            return ptr::null_mut();
        };
        let Some(properties) = slot.upgrade() else {
            log::error!("instantiate: descriptor has been released");
            return ptr::null_mut();
        };
        let label = properties.label().to_owned();
        let rate = u32::try_from(sample_rate).unwrap_or(u32::MAX);

        match PluginHandle::instantiate(properties, rate) {
            Ok(handle) => Box::into_raw(Box::new(handle)) as LADSPA_Handle,
            Err(e) => {
                log::error!("{}: cannot instantiate: {}", label, e);
                ptr::null_mut()
            }
        }
    })
}

unsafe extern "C" fn connect_port(instance: LADSPA_Handle, port: c_ulong, data: *mut LADSPA_Data) {
    guard("connect_port", (), || {
        // SAFETY: see `handle_mut`.
        if let Some(handle) = unsafe { handle_mut(instance) } {
            // SAFETY: the host keeps `data` valid while connected.
            unsafe { handle.connect_port(port as usize, data) };
        }
    })
}

unsafe extern "C" fn activate(instance: LADSPA_Handle) {
    guard("activate", (), || {
        if let Some(handle) = unsafe { handle_mut(instance) } {
            handle.activate();
        }
    })
}

unsafe extern "C" fn run(instance: LADSPA_Handle, sample_count: c_ulong) {
    guard("run", (), || {
        if let Some(handle) = unsafe { handle_mut(instance) } {
            handle.run(sample_count as usize);
        }
    })
}

unsafe extern "C" fn deactivate(instance: LADSPA_Handle) {
    guard("deactivate", (), || {
        if let Some(handle) = unsafe { handle_mut(instance) } {
            handle.deactivate();
        }
    })
}

unsafe extern "C" fn cleanup(instance: LADSPA_Handle) {
    guard("cleanup", (), || {
        if !instance.is_null() {
            // SAFETY: created by `Box::into_raw` in `instantiate`.
            drop(unsafe { Box::from_raw(instance as *mut PluginHandle) });
        }
    })
}

//! C-compatible definitions matching `ladspa.h` (LADSPA 1.1).
//!
//! Field order and widths must stay exactly as in the header: hosts read
//! these structs directly.

use std::ffi::{c_char, c_int, c_ulong, c_void};

#[allow(non_camel_case_types)]
pub type LADSPA_Data = f32;
#[allow(non_camel_case_types)]
pub type LADSPA_Handle = *mut c_void;
#[allow(non_camel_case_types)]
pub type LADSPA_Properties = c_int;
#[allow(non_camel_case_types)]
pub type LADSPA_PortDescriptor = c_int;
#[allow(non_camel_case_types)]
pub type LADSPA_PortRangeHintDescriptor = c_int;

// ── Plugin properties ──

pub const LADSPA_PROPERTY_REALTIME: LADSPA_Properties = 0x1;
pub const LADSPA_PROPERTY_INPLACE_BROKEN: LADSPA_Properties = 0x2;
pub const LADSPA_PROPERTY_HARD_RT_CAPABLE: LADSPA_Properties = 0x4;

// ── Port descriptors ──

pub const LADSPA_PORT_INPUT: LADSPA_PortDescriptor = 0x1;
pub const LADSPA_PORT_OUTPUT: LADSPA_PortDescriptor = 0x2;
pub const LADSPA_PORT_CONTROL: LADSPA_PortDescriptor = 0x4;
pub const LADSPA_PORT_AUDIO: LADSPA_PortDescriptor = 0x8;

// ── Port range hints ──

pub const LADSPA_HINT_BOUNDED_BELOW: LADSPA_PortRangeHintDescriptor = 0x1;
pub const LADSPA_HINT_BOUNDED_ABOVE: LADSPA_PortRangeHintDescriptor = 0x2;
pub const LADSPA_HINT_TOGGLED: LADSPA_PortRangeHintDescriptor = 0x4;
pub const LADSPA_HINT_SAMPLE_RATE: LADSPA_PortRangeHintDescriptor = 0x8;
pub const LADSPA_HINT_LOGARITHMIC: LADSPA_PortRangeHintDescriptor = 0x10;
pub const LADSPA_HINT_INTEGER: LADSPA_PortRangeHintDescriptor = 0x20;

pub const LADSPA_HINT_DEFAULT_MASK: LADSPA_PortRangeHintDescriptor = 0x3C0;
pub const LADSPA_HINT_DEFAULT_NONE: LADSPA_PortRangeHintDescriptor = 0x0;
pub const LADSPA_HINT_DEFAULT_MINIMUM: LADSPA_PortRangeHintDescriptor = 0x40;
pub const LADSPA_HINT_DEFAULT_LOW: LADSPA_PortRangeHintDescriptor = 0x80;
pub const LADSPA_HINT_DEFAULT_MIDDLE: LADSPA_PortRangeHintDescriptor = 0xC0;
pub const LADSPA_HINT_DEFAULT_HIGH: LADSPA_PortRangeHintDescriptor = 0x100;
pub const LADSPA_HINT_DEFAULT_MAXIMUM: LADSPA_PortRangeHintDescriptor = 0x140;
pub const LADSPA_HINT_DEFAULT_0: LADSPA_PortRangeHintDescriptor = 0x200;
pub const LADSPA_HINT_DEFAULT_1: LADSPA_PortRangeHintDescriptor = 0x240;
pub const LADSPA_HINT_DEFAULT_100: LADSPA_PortRangeHintDescriptor = 0x280;
pub const LADSPA_HINT_DEFAULT_440: LADSPA_PortRangeHintDescriptor = 0x2C0;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
#[allow(non_snake_case)]
pub struct LADSPA_PortRangeHint {
    pub HintDescriptor: LADSPA_PortRangeHintDescriptor,
    pub LowerBound: LADSPA_Data,
    pub UpperBound: LADSPA_Data,
}

#[allow(non_camel_case_types)]
pub type LADSPA_Instantiate =
    unsafe extern "C" fn(descriptor: *const LADSPA_Descriptor, sample_rate: c_ulong) -> LADSPA_Handle;
#[allow(non_camel_case_types)]
pub type LADSPA_ConnectPort =
    unsafe extern "C" fn(instance: LADSPA_Handle, port: c_ulong, data: *mut LADSPA_Data);
#[allow(non_camel_case_types)]
pub type LADSPA_Activate = unsafe extern "C" fn(instance: LADSPA_Handle);
#[allow(non_camel_case_types)]
pub type LADSPA_Run = unsafe extern "C" fn(instance: LADSPA_Handle, sample_count: c_ulong);
#[allow(non_camel_case_types)]
pub type LADSPA_SetRunAddingGain = unsafe extern "C" fn(instance: LADSPA_Handle, gain: LADSPA_Data);
#[allow(non_camel_case_types)]
pub type LADSPA_Deactivate = unsafe extern "C" fn(instance: LADSPA_Handle);
#[allow(non_camel_case_types)]
pub type LADSPA_Cleanup = unsafe extern "C" fn(instance: LADSPA_Handle);

/// The per-plugin record handed to hosts by `ladspa_descriptor`.
#[repr(C)]
#[allow(non_camel_case_types, non_snake_case)]
pub struct LADSPA_Descriptor {
    pub UniqueID: c_ulong,
    pub Label: *const c_char,
    pub Properties: LADSPA_Properties,
    pub Name: *const c_char,
    pub Maker: *const c_char,
    pub Copyright: *const c_char,
    pub PortCount: c_ulong,
    pub PortDescriptors: *const LADSPA_PortDescriptor,
    pub PortNames: *const *const c_char,
    pub PortRangeHints: *const LADSPA_PortRangeHint,
    pub ImplementationData: *mut c_void,
    pub instantiate: Option<LADSPA_Instantiate>,
    pub connect_port: Option<LADSPA_ConnectPort>,
    pub activate: Option<LADSPA_Activate>,
    pub run: Option<LADSPA_Run>,
    pub run_adding: Option<LADSPA_Run>,
    pub set_run_adding_gain: Option<LADSPA_SetRunAddingGain>,
    pub deactivate: Option<LADSPA_Deactivate>,
    pub cleanup: Option<LADSPA_Cleanup>,
}

#[allow(non_camel_case_types)]
pub type LADSPA_Descriptor_Function = unsafe extern "C" fn(index: c_ulong) -> *const LADSPA_Descriptor;

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, offset_of, size_of};

    #[test]
    fn range_hint_layout() {
        assert_eq!(size_of::<LADSPA_PortRangeHint>(), 12);
        assert_eq!(offset_of!(LADSPA_PortRangeHint, LowerBound), 4);
        assert_eq!(offset_of!(LADSPA_PortRangeHint, UpperBound), 8);
    }

    #[cfg(all(target_pointer_width = "64", not(windows)))]
    #[test]
    fn descriptor_layout_lp64() {
        assert_eq!(align_of::<LADSPA_Descriptor>(), 8);
        assert_eq!(offset_of!(LADSPA_Descriptor, Label), 8);
        assert_eq!(offset_of!(LADSPA_Descriptor, Properties), 16);
        assert_eq!(offset_of!(LADSPA_Descriptor, Name), 24);
        assert_eq!(offset_of!(LADSPA_Descriptor, PortCount), 48);
        assert_eq!(offset_of!(LADSPA_Descriptor, ImplementationData), 80);
        assert_eq!(offset_of!(LADSPA_Descriptor, instantiate), 88);
        assert_eq!(offset_of!(LADSPA_Descriptor, cleanup), 144);
        assert_eq!(size_of::<LADSPA_Descriptor>(), 152);
    }
}

//! The LADSPA side: ABI definitions, descriptor construction and the
//! process-wide registry behind `ladspa_descriptor`.

pub mod descriptor;
pub mod ffi;
pub mod registry;

pub use registry::Registry;

//! Script-backed plugin types and instances.
//!
//! A source file becomes a [`PluginProperties`] template once its declaration
//! phase has run; hosts then derive any number of [`PluginHandle`] instances
//! from it.

pub mod declare;
pub mod handle;
pub mod properties;
pub mod scanner;
pub mod types;

pub use handle::PluginHandle;
pub use properties::PluginProperties;
pub use types::*;

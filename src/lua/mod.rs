//! Scripting plumbing: sandboxed Luau contexts, the `ladspa` script library,
//! bounded sample memory and the buffer userdata scripts index into.

pub mod alloc;
pub mod api;
pub mod buffer;
pub mod context;

pub use alloc::BoundedAllocator;
pub use buffer::PortBuffer;
pub use context::{ContextRole, SandboxedContext};

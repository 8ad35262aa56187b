//! Error taxonomy shared by every stage of plugin loading and execution.
//!
//! Construction paths (properties, handles, internal buffers) return these
//! errors to the caller.  Per-block paths (`activate` / `run` / `deactivate`)
//! only log them and keep going.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin source could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Source did not compile, or bytecode did not load.
    #[error("compile error: {0}")]
    Compile(String),
    /// The declaration phase issued an invalid command.
    #[error("declaration error: {0}")]
    Declaration(String),
    /// A script raised while running.
    #[error("runtime error: {0}")]
    Runtime(String),
    /// The memory quota rejected an allocation.
    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

impl PluginError {
    pub fn declaration(message: impl Into<String>) -> Self {
        PluginError::Declaration(message.into())
    }

    /// Classify an engine error.
    ///
    /// A `PluginError` raised from inside a Rust callback travels through
    /// mlua as an external error wrapped in one or more `CallbackError`
    /// layers; it is recovered here unchanged.
    pub fn from_lua(err: &mlua::Error) -> Self {
        match err {
            mlua::Error::SyntaxError { message, .. } => PluginError::Compile(message.clone()),
            mlua::Error::MemoryError(message) => PluginError::OutOfMemory(message.clone()),
            mlua::Error::CallbackError { cause, .. } => Self::from_lua(cause),
            mlua::Error::ExternalError(inner) => match inner.downcast_ref::<PluginError>() {
                Some(PluginError::Declaration(m)) => PluginError::Declaration(m.clone()),
                Some(PluginError::Compile(m)) => PluginError::Compile(m.clone()),
                Some(PluginError::OutOfMemory(m)) => PluginError::OutOfMemory(m.clone()),
                _ => PluginError::Runtime(inner.to_string()),
            },
            other => PluginError::Runtime(other.to_string()),
        }
    }

    /// Wrap this error so it can be raised from a Lua callback and
    /// recovered by [`PluginError::from_lua`].
    pub fn into_lua(self) -> mlua::Error {
        mlua::Error::external(self)
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declaration_errors_survive_callback_wrapping() {
        let raised = PluginError::declaration("unknown property 'colour'").into_lua();
        let wrapped = mlua::Error::CallbackError {
            traceback: String::new(),
            cause: std::sync::Arc::new(raised),
        };
        match PluginError::from_lua(&wrapped) {
            PluginError::Declaration(m) => assert_eq!(m, "unknown property 'colour'"),
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn unknown_errors_are_runtime() {
        let err = mlua::Error::runtime("boom");
        assert!(matches!(PluginError::from_lua(&err), PluginError::Runtime(_)));
    }
}

//! Log sink setup.
//!
//! The backend runs inside someone else's process, so it only installs a
//! logger if the host has not already installed one.

use std::fs::OpenOptions;
use std::sync::Once;

use env_logger::{Builder, Env, Target};

use crate::config::Config;

/// Filter override, same syntax as `RUST_LOG`.
pub const LOG_ENV: &str = "LUALADSPA_LOG";

static INIT: Once = Once::new();

/// Install the `env_logger` sink described by `config`.  Only the first
/// call has any effect.
pub fn init(config: &Config) {
    INIT.call_once(|| {
        let mut builder =
            Builder::from_env(Env::default().filter_or(LOG_ENV, config.log_level.as_str()));

        if let Some(path) = &config.log_file {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    builder.target(Target::Pipe(Box::new(file)));
                }
                Err(e) => eprintln!("lualadspa: cannot open log file {}: {}", path.display(), e),
            }
        }

        if builder.try_init().is_ok() {
            log::info!("lualadspa {} logging initialised", env!("CARGO_PKG_VERSION"));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            log_file: Some(dir.path().join("lualadspa.log")),
            ..Config::default()
        };
        init(&config);
        init(&Config::default());
        log::info!("still alive");
    }
}

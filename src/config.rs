//! Backend configuration.
//!
//! Read once per process from `<config_dir>/lualadspa/config.json`.  Missing
//! fields fall back to defaults, and `LUALADSPA_PATH` (a `:`-separated list on
//! Unix) replaces the search paths the same way `LADSPA_PATH` does for hosts.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::lua::alloc::DEFAULT_LIMIT;

/// Environment variable overriding [`Config::search_paths`].
pub const PATH_ENV: &str = "LUALADSPA_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directories scanned for plugin sources, in order.
    pub search_paths: Vec<PathBuf>,
    /// File extensions treated as plugin sources (without the dot).
    pub extensions: Vec<String>,
    /// Memory quota of every context, in KiB.
    pub memory_limit_kb: usize,
    pub log_level: String,
    /// Append log output here instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search_paths: default_search_paths(),
            extensions: vec!["lua".into(), "luau".into()],
            memory_limit_kb: DEFAULT_LIMIT >> 10,
            log_level: "info".into(),
            log_file: None,
        }
    }
}

fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".lualadspa"));
    }
    if let Some(data) = dirs::data_dir() {
        paths.push(data.join("lualadspa").join("plugins"));
    }
    paths.push(PathBuf::from("/usr/local/share/lualadspa"));
    paths.push(PathBuf::from("/usr/share/lualadspa"));
    paths
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("lualadspa").join("config.json"))
    }

    /// The process configuration: config file (if any) plus environment.
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .filter(|path| path.is_file())
            .map(|path| Self::from_file(&path))
            .unwrap_or_default();
        config.apply_path_override(std::env::var_os(PATH_ENV).as_deref());
        config
    }

    /// Parse `path`; a malformed file is logged and yields defaults.
    pub fn from_file(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("config: cannot read {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("config: ignoring malformed {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Replace the search paths with a platform path list.  Empty values
    /// are ignored.
    pub fn apply_path_override(&mut self, value: Option<&OsStr>) {
        let Some(value) = value.filter(|v| !v.is_empty()) else {
            return;
        };
        self.search_paths = std::env::split_paths(value)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
    }

    /// Per-context quota in bytes.
    pub fn memory_limit(&self) -> usize {
        self.memory_limit_kb.saturating_mul(1024)
    }

    pub fn is_plugin_source(&self, path: &Path) -> bool {
        path.extension()
            .and_then(OsStr::to_str)
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    #[test]
    fn partial_files_keep_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "memory_limit_kb": 1024 }"#).unwrap();
        let config = Config::from_file(&path);
        assert_eq!(config.memory_limit(), 1 << 20);
        assert_eq!(config.extensions, Config::default().extensions);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(Config::from_file(&path), Config::default());
    }

    #[test]
    fn path_override_replaces_search_paths() {
        let mut config = Config::default();
        let joined: OsString = std::env::join_paths(["/a", "/b/c"]).unwrap();
        config.apply_path_override(Some(&joined));
        assert_eq!(config.search_paths, vec![PathBuf::from("/a"), PathBuf::from("/b/c")]);

        config.apply_path_override(Some(OsStr::new("")));
        assert_eq!(config.search_paths.len(), 2);
    }

    #[test]
    fn extension_filter() {
        let config = Config::default();
        assert!(config.is_plugin_source(Path::new("/x/gain.luau")));
        assert!(config.is_plugin_source(Path::new("copy.lua")));
        assert!(!config.is_plugin_source(Path::new("notes.txt")));
        assert!(!config.is_plugin_source(Path::new("README")));
    }
}

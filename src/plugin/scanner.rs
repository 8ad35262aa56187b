//! Plugin source discovery.
//!
//! Walks the configured search paths in order.  Each directory is read
//! non-recursively and its entries are visited sorted by file name, so the
//! resulting descriptor indices are stable between runs.

use std::path::{Path, PathBuf};

use crate::config::Config;

/// Every candidate plugin source reachable from `config.search_paths`.
pub fn scan_sources(config: &Config) -> Vec<PathBuf> {
    let mut sources = Vec::new();

    for dir in &config.search_paths {
        if !dir.is_dir() {
            log::debug!("scan: skipping {} (not a directory)", dir.display());
            continue;
        }
        log::info!("scan: {}", dir.display());
        scan_directory(dir, config, &mut sources);
    }

    log::info!("scan: {} candidate sources", sources.len());
    sources
}

fn scan_directory(dir: &Path, config: &Config, sources: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("scan: cannot read {}: {}", dir.display(), e);
            return;
        }
    };

    let mut found: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && config.is_plugin_source(path))
        .collect();
    found.sort();
    sources.extend(found);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_non_recursive_and_filtered() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        for name in ["b.luau", "a.lua", "notes.txt"] {
            std::fs::write(first.path().join(name), "").unwrap();
        }
        std::fs::create_dir(first.path().join("nested")).unwrap();
        std::fs::write(first.path().join("nested").join("c.luau"), "").unwrap();
        std::fs::write(second.path().join("0.luau"), "").unwrap();

        let config = Config {
            search_paths: vec![
                first.path().to_path_buf(),
                PathBuf::from("/nonexistent/lualadspa"),
                second.path().to_path_buf(),
            ],
            ..Config::default()
        };
        let names: Vec<_> = scan_sources(&config)
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.lua", "b.luau", "0.luau"]);
    }
}

//! Process-wide descriptor registry.
//!
//! Populated once, lazily, from the first `ladspa_descriptor` call.  After
//! that the entry list never changes, so lookups take no lock.  Teardown
//! releases entries in reverse load order.

use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use super::descriptor::DescriptorStorage;
use super::ffi::LADSPA_Descriptor;
use crate::config::Config;
use crate::logging;
use crate::plugin::PluginProperties;
use crate::plugin::scanner;

pub struct Registry {
    entries: Vec<DescriptorStorage>,
    released: AtomicBool,
}

impl Registry {
    /// Load every plugin source reachable from `config`.  Sources that fail
    /// to load are logged and skipped.
    pub fn discover(config: &Config) -> Self {
        let mut loaded = Vec::new();
        for path in scanner::scan_sources(config) {
            match PluginProperties::load(&path, config) {
                Ok(props) => {
                    log::info!(
                        "loaded '{}' ({}, id {}) from {}",
                        props.name(),
                        props.label(),
                        props.unique_id(),
                        path.display()
                    );
                    loaded.push(props);
                }
                Err(e) => log::error!("{}: {}", path.display(), e),
            }
        }
        let registry = Self::from_properties(loaded);
        log::info!("{} plugins registered", registry.len());
        registry
    }

    pub fn from_properties(properties: impl IntoIterator<Item = Arc<PluginProperties>>) -> Self {
        let entries: Vec<DescriptorStorage> =
            properties.into_iter().map(|p| DescriptorStorage::new(&p)).collect();

        for (i, entry) in entries.iter().enumerate() {
            if let Some(first) = entries[..i]
                .iter()
                .find(|e| e.unique_id() == entry.unique_id() || e.label() == entry.label())
            {
                log::warn!(
                    "'{}' clashes with '{}' (same label or unique id); hosts may confuse them",
                    entry.label(),
                    first.label()
                );
            }
        }

        Self {
            entries,
            released: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The descriptor at `index`, or null past the end or after release.
    pub fn descriptor(&self, index: usize) -> *const LADSPA_Descriptor {
        if self.released.load(Ordering::Acquire) {
            return ptr::null();
        }
        self.entries.get(index).map_or(ptr::null(), DescriptorStorage::as_ptr)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Drop every entry's properties reference, newest first.  Instances
    /// still alive keep their own reference.  Idempotent.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        for entry in self.entries.iter().rev() {
            entry.release();
        }
        log::info!("{} plugins unloaded", self.entries.len());
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.release();
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process registry, populated on first use.
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(|| {
        let config = Config::load();
        logging::init(&config);
        let registry = Registry::discover(&config);
        // SAFETY: registering a plain `extern "C"` function has no
        // preconditions.  A non-zero return only means no teardown hook.
        if unsafe { libc::atexit(release_global) } != 0 {
            log::warn!("cannot register exit hook; plugins stay loaded until exit");
        }
        registry
    })
}

extern "C" fn release_global() {
    if let Some(registry) = GLOBAL.get() {
        registry.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(label: &str) -> Arc<PluginProperties> {
        let config = Config {
            memory_limit_kb: 4096,
            ..Config::default()
        };
        let source = format!("ladspa.set('label', '{label}') ladspa.set('portCount', 1)");
        PluginProperties::from_source(label, source.as_bytes(), &config).unwrap()
    }

    #[test]
    fn lookup_past_the_end_is_null() {
        let registry = Registry::from_properties([props("a"), props("b")]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.descriptor(0).is_null());
        assert!(!registry.descriptor(1).is_null());
        assert!(registry.descriptor(2).is_null());
    }

    #[test]
    fn release_is_idempotent_and_hides_descriptors() {
        let a = props("a");
        let b = props("b");
        let registry = Registry::from_properties([Arc::clone(&a), Arc::clone(&b)]);
        assert_eq!(Arc::strong_count(&a), 2);

        registry.release();
        registry.release();
        assert!(registry.is_released());
        assert!(registry.descriptor(0).is_null());
        assert_eq!(Arc::strong_count(&a), 1);
        assert_eq!(Arc::strong_count(&b), 1);
    }

    #[test]
    fn dropping_releases_everything() {
        let a = props("a");
        drop(Registry::from_properties([Arc::clone(&a)]));
        assert_eq!(Arc::strong_count(&a), 1);
    }
}

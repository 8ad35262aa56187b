use std::ffi::CStr;
use std::fs;
use std::path::{Path, PathBuf};

use lualadspa::config::{Config, PATH_ENV};
use lualadspa::ladspa::Registry;

fn sample(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("plugins").join(name)
}

fn config_for(dirs: &[&Path]) -> Config {
    Config {
        search_paths: dirs.iter().map(|d| d.to_path_buf()).collect(),
        memory_limit_kb: 8192,
        ..Config::default()
    }
}

fn label(registry: &Registry, index: usize) -> String {
    let d = unsafe { &*registry.descriptor(index) };
    unsafe { CStr::from_ptr(d.Label) }.to_string_lossy().into_owned()
}

#[test]
fn broken_sources_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    fs::copy(sample("gain.luau"), dir.path().join("b_gain.luau")).unwrap();
    fs::copy(sample("copy.luau"), dir.path().join("a_copy.luau")).unwrap();
    fs::write(dir.path().join("c_syntax.luau"), "function run(").unwrap();
    fs::write(dir.path().join("d_badkey.luau"), "ladspa.set('colour', 1)").unwrap();
    fs::write(dir.path().join("e_badport.luau"), "ladspa.set('portCount', 1) ladspa.port(2, 'x', ladspa.INPUT + ladspa.AUDIO)").unwrap();
    fs::write(dir.path().join("readme.txt"), "not a plugin").unwrap();

    let registry = Registry::discover(&config_for(&[dir.path()]));
    assert_eq!(registry.len(), 2);
    assert_eq!(label(&registry, 0), "lua_copy");
    assert_eq!(label(&registry, 1), "lua_gain");
}

#[test]
fn search_paths_are_visited_in_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    fs::copy(sample("gain.luau"), first.path().join("z.luau")).unwrap();
    fs::copy(sample("copy.luau"), second.path().join("a.luau")).unwrap();

    let missing = first.path().join("missing");
    let registry = Registry::discover(&config_for(&[first.path(), &missing, second.path()]));
    assert_eq!(registry.len(), 2);
    assert_eq!(label(&registry, 0), "lua_gain");
    assert_eq!(label(&registry, 1), "lua_copy");
}

#[test]
fn default_labels_come_from_the_file_name() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bare.lua"), "ladspa.set('portCount', 0)").unwrap();
    let registry = Registry::discover(&config_for(&[dir.path()]));
    assert_eq!(registry.len(), 1);
    assert_eq!(label(&registry, 0), "bare");
}

#[test]
fn entry_point_uses_the_path_override() {
    let dir = tempfile::tempdir().unwrap();
    fs::copy(sample("copy.luau"), dir.path().join("copy.luau")).unwrap();
    // SAFETY: the only test in this binary that touches the environment,
    // and it runs before the global registry exists.
    unsafe { std::env::set_var(PATH_ENV, dir.path()) };

    let first = lualadspa::ladspa_descriptor(0);
    assert!(!first.is_null());
    let d = unsafe { &*first };
    assert_eq!(unsafe { CStr::from_ptr(d.Label) }.to_str().unwrap(), "lua_copy");
    assert!(lualadspa::ladspa_descriptor(1).is_null());
    assert_eq!(lualadspa::ladspa_descriptor(0), first);
}

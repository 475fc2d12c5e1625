use lumoprefs::{copy, EnvConfig, Environment, FileBackend, Persistence, TableBackend, Value};
use std::fs;
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, Environment) {
    let temp_dir = TempDir::new().unwrap();
    let env = Environment::new(EnvConfig::new(temp_dir.path()));
    (temp_dir, env)
}

#[test]
fn test_file_rotation_keeps_previous_generation() {
    let (dir, env) = setup_test_env();
    let prefs = env.open_file("rotate").unwrap();

    prefs.edit().put_int("gen", 1).commit();
    prefs.edit().put_int("gen", 2).commit();

    let current = FileBackend::new(dir.path(), "rotate").unwrap();
    let backup = FileBackend::new(dir.path(), "rotate.bak").unwrap();
    assert_eq!(current.load().unwrap().get("gen"), Some(&Value::Int(2)));
    assert_eq!(backup.load().unwrap().get("gen"), Some(&Value::Int(1)));

    // No temporary file is left behind
    let leftovers = fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".temp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_cleared_file_store_loads_empty() {
    let (dir, env) = setup_test_env();
    let prefs = env.open_file("wiped").unwrap();
    prefs.edit().put_string("k", "v").commit();
    prefs.edit().clear().commit();

    assert!(!dir.path().join("wiped").exists());
    assert!(dir.path().join("wiped.bak").exists());

    env.reset();
    assert!(env.open_file("wiped").unwrap().is_empty());
}

#[test]
fn test_table_store_reloads_after_reset() {
    let (dir, env) = setup_test_env();
    let prefs = env.open_table("settings").unwrap();
    prefs
        .edit()
        .put_bool("flag", true)
        .put_long("when", 1_700_000_000_000)
        .put_string("big", "y".repeat(100_000))
        .commit();
    assert!(dir.path().join("settings.s3db").exists());

    env.reset();
    let prefs = env.open_table("settings").unwrap();
    assert!(prefs.get_bool("flag", false));
    assert_eq!(prefs.get_long("when", 0), 1_700_000_000_000);
    assert_eq!(prefs.get_string("big", "").len(), 100_000);
}

#[test]
fn test_table_remove_and_clear_reach_database() {
    let (dir, env) = setup_test_env();
    let prefs = env.open_table("rows").unwrap();
    prefs.edit().put_int("a", 1).put_int("b", 2).commit();
    prefs.edit().remove("a").commit();

    let reader = TableBackend::new(dir.path(), "rows").unwrap();
    let rows = reader.load().unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows.contains_key("b"));

    prefs.edit().clear().commit();
    reader.set_high_water_mark(0);
    assert!(reader.load().unwrap().is_empty());
}

#[test]
fn test_table_reload_misses_deletions() {
    let (dir, env) = setup_test_env();
    let prefs = env.open_table("gap").unwrap();
    prefs.edit().put_int("a", 1).commit();

    // A second writer removes "a" and adds "b" behind our back
    let other = Environment::new(EnvConfig::new(dir.path()));
    let writer = other.open_table("gap").unwrap();
    writer.edit().remove("a").put_int("b", 2).commit();

    assert_eq!(prefs.reload().unwrap(), 1);
    assert_eq!(prefs.get_int("b", 0), 2);
    assert_eq!(prefs.get_int("a", 0), 1);
}

#[test]
fn test_copy_between_backends() {
    let (dir, env) = setup_test_env();
    let source = env.open_memory("source").unwrap();
    source
        .edit()
        .put_int("i", 5)
        .put_string("s", "text")
        .put_string_set("set", ["x"])
        .commit();

    let target = env.open_table("target").unwrap();
    assert!(copy(&source, &target));
    assert_eq!(target.get_all(), source.get_all());

    let reader = TableBackend::new(dir.path(), "target").unwrap();
    assert_eq!(reader.load().unwrap(), source.get_all());

    let empty = env.open_memory("empty").unwrap();
    assert!(!copy(&empty, &target));
}

#[test]
fn test_shutdown_leaves_nothing_unflushed() {
    let (dir, env) = setup_test_env();
    let prefs = env.open_file("exit").unwrap();
    prefs.edit().put_int("last", 9).apply();
    env.shutdown();

    assert!(!prefs.has_unflushed_writes());
    let backend = FileBackend::new(dir.path(), "exit").unwrap();
    assert_eq!(backend.load().unwrap().get("last"), Some(&Value::Int(9)));
}

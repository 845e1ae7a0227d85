use super::{load_settings_from, SyncSettings};

use std::{
    collections::HashMap,
    env, fs,
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

fn no_env(_: &str) -> Option<String> {
    None
}

#[test]
fn missing_file_yields_defaults() {
    let settings = load_settings_from(Path::new("definitely-not-here/sync.toml"), no_env);
    assert_eq!(settings, SyncSettings::default());
    assert_eq!(settings.typing_stop_after(), Duration::from_secs(2));
}

#[test]
fn file_values_then_env_overrides_apply_in_order() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("message_sync_config_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");
    let path = temp_root.join("sync.toml");
    fs::write(
        &path,
        "server_url = \"http://files.local\"\nskew_window_ms = 5000\nrefetch_on_reconnect = false\n",
    )
    .expect("write settings");

    let overrides: HashMap<&str, &str> = HashMap::from([
        ("APP__SKEW_WINDOW_MS", "7000"),
        ("APP__RECONNECT_ATTEMPTS", "not-a-number"),
        ("APP__REFETCH_ON_RECONNECT", "yes"),
    ]);
    let settings = load_settings_from(&path, |key| overrides.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_url, "http://files.local");
    assert_eq!(settings.skew_window_ms, 7000);
    assert_eq!(settings.reconnect_attempts, SyncSettings::default().reconnect_attempts);
    assert!(settings.refetch_on_reconnect);

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn malformed_file_is_ignored() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("message_sync_config_bad_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");
    let path = temp_root.join("sync.toml");
    fs::write(&path, "skew_window_ms = \"soon\"").expect("write settings");

    let settings = load_settings_from(&path, no_env);
    assert_eq!(settings, SyncSettings::default());

    fs::remove_dir_all(temp_root).expect("cleanup");
}

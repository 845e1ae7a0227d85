use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "sync.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub server_url: String,
    /// Window within which an optimistic message and its server echo are
    /// considered the same message despite clock skew.
    pub skew_window_ms: u64,
    pub send_confirm_timeout_ms: u64,
    pub typing_stop_after_ms: u64,
    pub remote_typing_timeout_ms: u64,
    pub read_receipt_debounce_ms: u64,
    pub refetch_on_reconnect: bool,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            skew_window_ms: 10_000,
            send_confirm_timeout_ms: 15_000,
            typing_stop_after_ms: 2_000,
            remote_typing_timeout_ms: 10_000,
            read_receipt_debounce_ms: 750,
            refetch_on_reconnect: true,
            reconnect_attempts: 5,
            reconnect_delay_ms: 2_000,
        }
    }
}

impl SyncSettings {
    pub fn skew_window(&self) -> Duration {
        Duration::from_millis(self.skew_window_ms)
    }

    pub fn send_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.send_confirm_timeout_ms)
    }

    pub fn typing_stop_after(&self) -> Duration {
        Duration::from_millis(self.typing_stop_after_ms)
    }

    pub fn remote_typing_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_typing_timeout_ms)
    }

    pub fn read_receipt_debounce(&self) -> Duration {
        Duration::from_millis(self.read_receipt_debounce_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    skew_window_ms: Option<u64>,
    send_confirm_timeout_ms: Option<u64>,
    typing_stop_after_ms: Option<u64>,
    remote_typing_timeout_ms: Option<u64>,
    read_receipt_debounce_ms: Option<u64>,
    refetch_on_reconnect: Option<bool>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
}

pub fn load_settings() -> SyncSettings {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> SyncSettings {
    let mut settings = SyncSettings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        match toml::from_str::<FileSettings>(&raw) {
            Ok(file_cfg) => apply_file_settings(&mut settings, file_cfg),
            Err(err) => warn!(path = %path.display(), "config: ignoring unreadable settings file: {err}"),
        }
    }

    apply_env_overrides(&mut settings, env);
    settings
}

fn apply_file_settings(settings: &mut SyncSettings, file_cfg: FileSettings) {
    if let Some(v) = file_cfg.server_url {
        settings.server_url = v;
    }
    if let Some(v) = file_cfg.skew_window_ms {
        settings.skew_window_ms = v;
    }
    if let Some(v) = file_cfg.send_confirm_timeout_ms {
        settings.send_confirm_timeout_ms = v;
    }
    if let Some(v) = file_cfg.typing_stop_after_ms {
        settings.typing_stop_after_ms = v;
    }
    if let Some(v) = file_cfg.remote_typing_timeout_ms {
        settings.remote_typing_timeout_ms = v;
    }
    if let Some(v) = file_cfg.read_receipt_debounce_ms {
        settings.read_receipt_debounce_ms = v;
    }
    if let Some(v) = file_cfg.refetch_on_reconnect {
        settings.refetch_on_reconnect = v;
    }
    if let Some(v) = file_cfg.reconnect_attempts {
        settings.reconnect_attempts = v;
    }
    if let Some(v) = file_cfg.reconnect_delay_ms {
        settings.reconnect_delay_ms = v;
    }
}

fn apply_env_overrides(settings: &mut SyncSettings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("SYNC_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    let millis = |key: &str| env(key).and_then(|v| v.trim().parse::<u64>().ok());
    if let Some(v) = millis("APP__SKEW_WINDOW_MS") {
        settings.skew_window_ms = v;
    }
    if let Some(v) = millis("APP__SEND_CONFIRM_TIMEOUT_MS") {
        settings.send_confirm_timeout_ms = v;
    }
    if let Some(v) = millis("APP__TYPING_STOP_AFTER_MS") {
        settings.typing_stop_after_ms = v;
    }
    if let Some(v) = millis("APP__REMOTE_TYPING_TIMEOUT_MS") {
        settings.remote_typing_timeout_ms = v;
    }
    if let Some(v) = millis("APP__READ_RECEIPT_DEBOUNCE_MS") {
        settings.read_receipt_debounce_ms = v;
    }
    if let Some(v) = millis("APP__RECONNECT_DELAY_MS") {
        settings.reconnect_delay_ms = v;
    }

    if let Some(v) = env("APP__RECONNECT_ATTEMPTS") {
        if let Ok(parsed) = v.trim().parse::<u32>() {
            settings.reconnect_attempts = parsed;
        }
    }
    if let Some(v) = env("APP__REFETCH_ON_RECONNECT") {
        match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => settings.refetch_on_reconnect = true,
            "0" | "false" | "no" | "off" => settings.refetch_on_reconnect = false,
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;

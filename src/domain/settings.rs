use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const APP_DIR_NAME: &str = "BluetoothDeviceManager";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    /// Primary log directory; the platform data dir when unset
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "size", "daily", "hourly", "minutely", "never"
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default = "default_max_archives")]
    pub max_archive_files: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: None,
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
            max_file_size_bytes: default_max_file_size(),
            max_archive_files: default_max_archives(),
        }
    }
}

impl LogSettings {
    /// Configured directory, else `<local data dir>/BluetoothDeviceManager/logs`.
    pub fn primary_log_dir(&self) -> Option<PathBuf> {
        match &self.log_dir {
            Some(dir) => Some(PathBuf::from(dir)),
            None => dirs::data_local_dir().map(|d| d.join(APP_DIR_NAME).join("logs")),
        }
    }

    pub fn temp_log_dir(&self) -> PathBuf {
        std::env::temp_dir().join(APP_DIR_NAME).join("logs")
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_prefix() -> String {
    "debug".to_string()
}
fn default_rotation() -> String {
    "size".to_string()
}
fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}
fn default_max_archives() -> usize {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Battery Settings
    #[serde(default = "default_poll_interval")]
    pub battery_poll_interval_secs: u64,
    #[serde(default = "default_low_battery_threshold")]
    pub low_battery_threshold: u8,
    #[serde(default = "default_true")]
    pub ble_battery_notifications: bool,

    // Audio Settings
    #[serde(default = "default_true")]
    pub audio_codec_registry_fallback: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            battery_poll_interval_secs: default_poll_interval(),
            low_battery_threshold: default_low_battery_threshold(),
            ble_battery_notifications: true,
            audio_codec_registry_fallback: true,
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}
fn default_low_battery_threshold() -> u8 {
    20
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::load(settings_path))
    }

    /// Load from an explicit path, falling back to defaults when the file
    /// is missing or unreadable.
    pub fn load(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push(APP_DIR_NAME);
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }
}

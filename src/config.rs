use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bot identity and access settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    #[serde(default = "default_bot_name")]
    pub name: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Sender id of the bot owner. Imprinted from the first user when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telegram_token: Option<String>,
    /// Group owner file path. Defaults to ~/.sheetcourier/group-owners.json
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owners_file: Option<String>,
}

fn default_bot_name() -> String {
    "Sheet Courier".to_string()
}

fn default_prefix() -> String {
    ".".to_string()
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            name: default_bot_name(),
            prefix: default_prefix(),
            owner_id: None,
            telegram_token: None,
            owners_file: None,
        }
    }
}

/// Folder monitoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoFetchSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Mapping file path. Defaults to ~/.sheetcourier/auto-fetch-mappings.json
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_file: Option<String>,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    /// Reserved for backoff between retries; the poll period stays fixed.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_first_check_delay_ms")]
    pub first_check_delay_ms: u64,
    /// Scratch directory for downloads. Defaults to ~/.sheetcourier/temp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_check_interval_ms() -> u64 {
    300_000
}

fn default_retry_interval_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_first_check_delay_ms() -> u64 {
    2_000
}

/// Lower bound for the poll period
const MIN_CHECK_INTERVAL_MS: u64 = 1_000;

impl Default for AutoFetchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_file: None,
            check_interval_ms: default_check_interval_ms(),
            retry_interval_ms: default_retry_interval_ms(),
            max_retries: default_max_retries(),
            first_check_delay_ms: default_first_check_delay_ms(),
            scratch_dir: None,
        }
    }
}

impl BotSettings {
    pub fn owners_path(&self) -> Option<PathBuf> {
        match &self.owners_file {
            Some(path) => Some(PathBuf::from(path)),
            None => Settings::config_dir().map(|d| d.join("group-owners.json")),
        }
    }
}

impl AutoFetchSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(MIN_CHECK_INTERVAL_MS))
    }

    pub fn first_check_delay(&self) -> Duration {
        Duration::from_millis(self.first_check_delay_ms)
    }

    /// Consecutive failures before a mapping is paused (at least 1)
    pub fn max_retries(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn storage_path(&self) -> Option<PathBuf> {
        match &self.storage_file {
            Some(path) => Some(PathBuf::from(path)),
            None => Settings::config_dir().map(|d| d.join("auto-fetch-mappings.json")),
        }
    }

    pub fn scratch_path(&self) -> PathBuf {
        match &self.scratch_dir {
            Some(path) => PathBuf::from(path),
            None => Settings::config_dir()
                .map(|d| d.join("temp"))
                .unwrap_or_else(std::env::temp_dir),
        }
    }
}

/// Drive storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveSettings {
    /// Directory whose sub-directories are the monitorable folders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default = "default_eligible_extensions")]
    pub eligible_extensions: Vec<String>,
}

fn default_eligible_extensions() -> Vec<String> {
    ["xlsx", "xls", "xlsm", "ods", "csv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for DriveSettings {
    fn default() -> Self {
        Self {
            root: None,
            eligible_extensions: default_eligible_extensions(),
        }
    }
}

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub bot: BotSettings,
    #[serde(default)]
    pub auto_fetch: AutoFetchSettings,
    #[serde(default)]
    pub drive: DriveSettings,
}

impl Settings {
    /// Returns the config directory path (~/.sheetcourier)
    pub fn config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".sheetcourier"))
    }

    /// Returns the config file path (~/.sheetcourier/settings.json)
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("settings.json"))
    }

    /// Ensures the config directory and a default settings file exist
    pub fn ensure_config_exists() {
        if let Some(config_dir) = Self::config_dir() {
            if !config_dir.exists() && fs::create_dir_all(&config_dir).is_ok() {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = fs::Permissions::from_mode(0o700);
                    let _ = fs::set_permissions(&config_dir, perms);
                }
            }
        }

        if let Some(config_path) = Self::config_path() {
            if !config_path.exists() {
                let _ = Self::default().save();
            }
        }
    }

    /// Loads settings from the config file with error information
    pub fn load_with_error() -> Result<Self, String> {
        Self::ensure_config_exists();

        let config_path = Self::config_path()
            .ok_or_else(|| "Could not determine config path".to_string())?;

        let content = fs::read_to_string(&config_path)
            .map_err(|e| format!("Failed to read settings file: {}", e))?;

        serde_json::from_str(&content)
            .map_err(|e| format!("Invalid JSON in settings.json: {}", e))
    }

    /// Saves settings to the config file using atomic write pattern
    pub fn save(&self) -> io::Result<()> {
        let Some(config_dir) = Self::config_dir() else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "Could not determine config directory",
            ));
        };

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode(0o700);
                let _ = fs::set_permissions(&config_dir, perms);
            }
        }

        let config_path = config_dir.join("settings.json");
        let temp_path = config_dir.join("settings.json.tmp");
        let content = serde_json::to_string_pretty(self)?;

        // Atomic write: write to temp file first, then rename
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, &config_path)?;

        Ok(())
    }

    /// Resolve the bot token: explicit value, then TELEGRAM_BOT_TOKEN, then settings
    pub fn resolve_token(&self, explicit: Option<&str>) -> Option<String> {
        explicit
            .map(String::from)
            .or_else(|| std::env::var("TELEGRAM_BOT_TOKEN").ok())
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.bot.telegram_token.clone())
    }
}

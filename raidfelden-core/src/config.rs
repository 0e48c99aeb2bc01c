//! Configuration for the raid engine.
//!
//! Maps directly to `raidfelden.toml`. Every section and field has a default,
//! so an empty file is a valid configuration.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{RaidError, Result};

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RaidfeldenConfig {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Interactive resolution settings.
    #[serde(default)]
    pub resolution: ResolutionConfig,
    /// How instants are rendered in messages.
    #[serde(default)]
    pub display: DisplayConfig,
    /// Database settings.
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl RaidfeldenConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `RaidError::Config` if the TOML is invalid or a value is out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| RaidError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check cross-field constraints serde cannot express.
    ///
    /// # Errors
    /// Returns `RaidError::Config` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        self.display.timezone()?;
        if StrftimeItems::new(&self.display.time_format).any(|item| matches!(item, Item::Error)) {
            return Err(RaidError::Config(format!(
                "display.time_format is not a valid format: {:?}",
                self.display.time_format
            )));
        }
        if self.resolution.selection_ttl_secs == 0 {
            return Err(RaidError::Config(
                "resolution.selection_ttl_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// General system settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level for the host's `tracing` subscriber: trace, debug, info, warn, error.
    ///
    /// The library installs no subscriber and never reads this itself.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Interactive gym / boss resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Default maximum number of choices offered to the user.
    #[serde(default = "default_interactive_limit")]
    pub interactive_limit: usize,
    /// Pending selections older than this are dropped on the next purge.
    #[serde(default = "default_selection_ttl")]
    pub selection_ttl_secs: u64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            interactive_limit: default_interactive_limit(),
            selection_ttl_secs: default_selection_ttl(),
        }
    }
}

/// Rendering of instants in user-facing messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// IANA zone of the community, e.g. `Europe/Zurich`. Daylight saving
    /// follows the zone's rules.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// `chrono` format string for quoted times.
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            time_format: default_time_format(),
        }
    }
}

impl DisplayConfig {
    /// The configured zone.
    ///
    /// # Errors
    /// Returns `RaidError::Config` if the name is not a known IANA zone.
    pub fn timezone(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|e| {
            RaidError::Config(format!("display.timezone {:?}: {e}", self.timezone))
        })
    }

    /// Render `instant` in local time.
    #[must_use]
    pub fn format(&self, instant: DateTime<Utc>) -> String {
        use std::fmt::Write as _;

        let tz = self.timezone().unwrap_or(Tz::UTC);
        let local = instant.with_timezone(&tz);
        let mut out = String::new();
        if write!(out, "{}", local.format(&self.time_format)).is_err() {
            return local.format("%H:%M:%S").to_string();
        }
        out
    }
}

/// SQLite persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Path of the database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Enable write-ahead logging.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
    /// How long a writer waits for a locked database.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_interactive_limit() -> usize { 5 }
fn default_selection_ttl() -> u64 { 900 }
fn default_timezone() -> String { "UTC".to_string() }
fn default_time_format() -> String { "%H:%M:%S".to_string() }
fn default_database_path() -> String { "raidfelden.db".to_string() }
fn default_busy_timeout() -> u64 { 5000 }

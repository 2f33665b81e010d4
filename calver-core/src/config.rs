//! Service configuration.

use std::path::{Path, PathBuf};

use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::{CalverError, CalverResult};

static DEFAULT_BIND: &str = "127.0.0.1:4096";
static DEFAULT_DATA_DIR: &str = "~/.local/share/calver";

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_page_size() -> usize {
    100
}

fn default_max_page_size() -> usize {
    500
}

fn default_max_occurrences() -> usize {
    366
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

/// Configuration at ~/.config/calver/config.toml, overridable through
/// `CALVER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalverConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default)]
    pub store: StoreBackend,

    /// Root of the file store. `~` is expanded.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_true")]
    pub cache_enabled: bool,

    /// IANA zone used when rendering changelog summaries.
    #[serde(default = "default_timezone")]
    pub display_timezone: String,

    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    #[serde(default = "default_max_occurrences")]
    pub max_occurrences_per_event: usize,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for CalverConfig {
    fn default() -> Self {
        CalverConfig {
            bind: default_bind(),
            store: StoreBackend::default(),
            data_dir: default_data_dir(),
            cache_enabled: true,
            display_timezone: default_timezone(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            max_occurrences_per_event: default_max_occurrences(),
            log_filter: default_log_filter(),
        }
    }
}

impl CalverConfig {
    pub fn config_path() -> CalverResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CalverError::Config("Could not determine config directory".into()))?
            .join("calver");

        Ok(config_dir.join("config.toml"))
    }

    /// Load from the default location, writing a commented default file
    /// there on first run.
    pub fn load() -> CalverResult<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> CalverResult<Self> {
        let config: CalverConfig = Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .add_source(Environment::with_prefix("CALVER"))
            .build()
            .map_err(|e| CalverError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| CalverError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CalverResult<()> {
        self.timezone()?;
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(CalverError::Config("page sizes must be at least 1".into()));
        }
        if self.max_occurrences_per_event == 0 {
            return Err(CalverError::Config(
                "max_occurrences_per_event must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn data_path(&self) -> PathBuf {
        let full_path_str = shellexpand::tilde(&self.data_dir.to_string_lossy()).into_owned();

        PathBuf::from(full_path_str)
    }

    pub fn timezone(&self) -> CalverResult<Tz> {
        self.display_timezone.parse::<Tz>().map_err(|_| {
            CalverError::Config(format!("Unknown timezone '{}'", self.display_timezone))
        })
    }

    pub fn save(&self, path: &Path) -> CalverResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| CalverError::Config(e.to_string()))?;

        std::fs::write(path, content)
            .map_err(|e| CalverError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> CalverResult<()> {
        let contents = format!(
            "\
# calver configuration

# Address the HTTP server listens on:
# bind = \"{DEFAULT_BIND}\"

# Where events are kept, \"memory\" or \"file\":
# store = \"memory\"

# Root directory of the file store:
# data_dir = \"{DEFAULT_DATA_DIR}\"

# Memoize version diffs:
# cache_enabled = true

# Timezone for changelog summaries:
# display_timezone = \"UTC\"

# Listing page sizes:
# default_page_size = 100
# max_page_size = 500

# Occurrences returned per event in listings:
# max_occurrences_per_event = 366

# Log filter, overridden by RUST_LOG:
# log_filter = \"info\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CalverError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| CalverError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_file_loads_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        CalverConfig::create_default_config(&path).unwrap();

        let config = CalverConfig::load_from(&path).unwrap();
        assert_eq!(config, CalverConfig::default());
        assert_eq!(config.timezone().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_values_from_file_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "store = \"file\"\ndisplay_timezone = \"Europe/Lisbon\"\nmax_page_size = 50\n",
        )
        .unwrap();

        let config = CalverConfig::load_from(&path).unwrap();
        assert_eq!(config.store, StoreBackend::File);
        assert_eq!(config.timezone().unwrap(), chrono_tz::Europe::Lisbon);
        assert_eq!(config.max_page_size, 50);
        assert_eq!(config.default_page_size, 100);
    }

    #[test]
    fn test_unknown_timezone_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "display_timezone = \"Mars/Olympus\"\n").unwrap();
        assert!(matches!(
            CalverConfig::load_from(&path),
            Err(CalverError::Config(_))
        ));
    }

    #[test]
    fn test_save_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = CalverConfig {
            cache_enabled: false,
            data_dir: dir.path().join("data"),
            ..CalverConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(CalverConfig::load_from(&path).unwrap(), config);
    }
}

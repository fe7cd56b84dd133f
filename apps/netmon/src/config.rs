use std::collections::BTreeMap;
use std::time::Duration;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::monitoring::types::Target;

/// Longest accepted interval, timeout or window
const MAX_DURATION_SECONDS: f64 = 365.0 * 24.0 * 60.0 * 60.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config file {}: {source}", .path.display())]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available (neither XDG_CONFIG_HOME nor HOME is set)")]
    ConfigPathUnavailable,
    #[error("no targets configured; add at least one [[targets]] entry")]
    NoTargets,
    #[error("{field} must be a positive number of seconds, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("{field} must not exceed one year, got {value}")]
    DurationTooLong { field: &'static str, value: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub interval_seconds: f64,
    pub ping_timeout: f64,
    pub db_path: path::PathBuf,
    pub log_path: path::PathBuf,
    pub enable_speedtest: bool,
    pub speedtest_interval_seconds: f64,
    pub speedtest_timeout_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speedtest_server_id: Option<String>,
    pub gui_refresh_seconds: f64,
    pub gui_window_minutes: f64,
    #[serde(rename = "targets")]
    raw_targets: Vec<TargetEntry>,
    pub export: ExportConfig,
}

/// A `[[targets]]` entry as written by the user; `host` is required, `name`
/// falls back to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TargetEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interface: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory scanned for `*.db` files, one dataset per file.
    pub data_dir: path::PathBuf,
    pub output: path::PathBuf,
    /// Substrings used to order latency series; matching targets come first.
    pub target_hints: Vec<String>,
    /// Human labels per dataset (database file stem).
    pub labels: BTreeMap<String, String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".into(),
            output: "web/data.json".into(),
            target_hints: vec!["google".into(), "cloudflare".into()],
            labels: BTreeMap::new(),
        }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/netmon/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("netmon/config.toml"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_seconds: 30.0,
            ping_timeout: 3.0,
            db_path: "data/monitor.db".into(),
            log_path: "logs/monitor.log".into(),
            enable_speedtest: true,
            speedtest_interval_seconds: 1800.0,
            speedtest_timeout_seconds: 90.0,
            speedtest_server_id: None,
            gui_refresh_seconds: 5.0,
            gui_window_minutes: 60.0,
            raw_targets: vec![
                TargetEntry {
                    name: Some("google".into()),
                    host: Some("8.8.8.8".into()),
                    interface: None,
                },
                TargetEntry {
                    name: Some("cloudflare".into()),
                    host: Some("1.1.1.1".into()),
                    interface: None,
                },
            ],
            export: ExportConfig::default(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Monitor Configuration:")?;
        write_title_1(f, "Reachability")?;
        write_1(f, "Interval (s)", &self.interval_seconds)?;
        write_1(f, "Ping timeout (s)", &self.ping_timeout)?;
        for target in self.targets() {
            let interface = target.interface.as_deref().unwrap_or("default route");
            write_2(f, &target.name, &format!("{} via {}", target.host, interface))?;
        }
        write_title_1(f, "Throughput")?;
        write_1(f, "Enabled", &self.enable_speedtest)?;
        write_1(f, "Interval (s)", &self.speedtest_interval_seconds)?;
        write_1(f, "Timeout (s)", &self.speedtest_timeout_seconds)?;
        write_1(f, "Server", &self.speedtest_server_id.as_deref().unwrap_or("auto"))?;
        write_title_1(f, "Storage")?;
        write_1(f, "Database", &self.db_path.display())?;
        write_1(f, "Log file", &self.log_path.display())?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/netmon/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Self::from_toml_str(&raw_string)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Configured reachability targets. Entries without a host are skipped.
    pub fn targets(&self) -> Vec<Target> {
        self.raw_targets
            .iter()
            .filter_map(|entry| {
                let Some(host) = entry.host.clone().filter(|host| !host.is_empty()) else {
                    warn!(name = ?entry.name, "Skipping target without host");
                    return None;
                };
                let name = entry.name.clone().filter(|name| !name.is_empty()).unwrap_or_else(|| host.clone());
                Some(Target { name, host, interface: entry.interface.clone() })
            })
            .collect()
    }

    pub fn set_targets(&mut self, targets: &[Target]) {
        self.raw_targets = targets
            .iter()
            .map(|target| TargetEntry {
                name: Some(target.name.clone()),
                host: Some(target.host.clone()),
                interface: target.interface.clone(),
            })
            .collect();
    }

    /// Reject configurations the monitor loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets().is_empty() {
            return Err(ConfigError::NoTargets);
        }

        let durations = [
            ("interval_seconds", self.interval_seconds, 1.0),
            ("ping_timeout", self.ping_timeout, 1.0),
            ("speedtest_interval_seconds", self.speedtest_interval_seconds, 1.0),
            ("speedtest_timeout_seconds", self.speedtest_timeout_seconds, 1.0),
            ("gui_refresh_seconds", self.gui_refresh_seconds, 1.0),
            ("gui_window_minutes", self.gui_window_minutes, 60.0),
        ];
        for (field, value, unit_seconds) in durations {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::InvalidDuration { field, value });
            }
            if value * unit_seconds > MAX_DURATION_SECONDS {
                return Err(ConfigError::DurationTooLong { field, value });
            }
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        seconds(self.interval_seconds)
    }

    pub fn ping_timeout(&self) -> Duration {
        seconds(self.ping_timeout)
    }

    pub fn speedtest_interval(&self) -> Duration {
        seconds(self.speedtest_interval_seconds)
    }

    pub fn speedtest_timeout(&self) -> Duration {
        seconds(self.speedtest_timeout_seconds)
    }

    pub fn gui_refresh(&self) -> Duration {
        seconds(self.gui_refresh_seconds)
    }

    pub fn gui_window(&self) -> Duration {
        seconds(self.gui_window_minutes * 60.0)
    }
}

/// Saturating conversion; `validate` rejects the values that would saturate.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 { Duration::MAX } else { Duration::ZERO })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = Config::from_toml_str(
            r#"
            interval_seconds = 10

            [[targets]]
            host = "1.1.1.1"
            "#,
        )
        .unwrap();

        assert_eq!(config.interval_seconds, 10.0);
        assert_eq!(config.ping_timeout, 3.0);
        assert!(config.enable_speedtest);
        assert_eq!(config.speedtest_interval_seconds, 1800.0);
        assert_eq!(config.db_path, path::PathBuf::from("data/monitor.db"));
        assert_eq!(config.export.target_hints, vec!["google", "cloudflare"]);
    }

    #[test]
    fn test_target_name_defaults_to_host() {
        let config = Config::from_toml_str(
            r#"
            [[targets]]
            host = "9.9.9.9"
            interface = "eth1"

            [[targets]]
            name = "no host"

            [[targets]]
            name = "cf"
            host = "1.1.1.1"
            "#,
        )
        .unwrap();

        let targets = config.targets();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "9.9.9.9");
        assert_eq!(targets[0].interface.as_deref(), Some("eth1"));
        assert_eq!(targets[1].name, "cf");
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let mut config = Config::default();
        config.set_targets(&[]);
        assert!(matches!(config.validate(), Err(ConfigError::NoTargets)));
    }

    #[test]
    fn test_validate_rejects_non_positive_interval() {
        let config = Config { interval_seconds: 0.0, ..Config::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDuration { field: "interval_seconds", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_huge_durations() {
        let config = Config { speedtest_timeout_seconds: 1e300, ..Config::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DurationTooLong { field: "speedtest_timeout_seconds", .. })
        ));
        assert_eq!(config.speedtest_timeout(), Duration::MAX);

        let config = Config { gui_window_minutes: 600_000.0, ..Config::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DurationTooLong { field: "gui_window_minutes", .. })
        ));

        let config = Config { gui_window_minutes: 24.0 * 60.0, ..Config::default() };
        assert!(config.validate().is_ok());
        assert_eq!(config.gui_window(), Duration::from_secs(24 * 60 * 60));
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/netmon");

        let config = Config::from_config(Some(&path)).unwrap();
        assert!(dir.path().join("nested/netmon.toml").exists());
        assert_eq!(config.targets().len(), 2);

        let reloaded = Config::from_config(Some(dir.path().join("nested/netmon.toml"))).unwrap();
        assert_eq!(reloaded.targets(), config.targets());
    }
}

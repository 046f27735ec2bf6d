//! Daemon configuration.
//!
//! Loaded once from TOML (with `TUG_*` environment overrides on top) and
//! passed around as an explicit snapshot — scans and sweeps receive the
//! settings they run under as arguments, never through process-wide state.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::policy::decision::EngineSettings;
use crate::types::WindowMode;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Path to the Unix socket for the CLI API.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    /// Directory for persisted state (entities, history).
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Cron expression for the periodic fleet scan.
    #[serde(default = "default_scan_schedule")]
    pub schedule: String,
    /// Global prerelease default; containers may override.
    #[serde(default)]
    pub include_prereleases: bool,
    /// Upper bound for registry and engine calls, in seconds.
    #[serde(default = "default_registry_timeout")]
    pub registry_timeout_secs: u64,
    /// Interval between pending-scan polls, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Maximum polls before a pending-scan job fails.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// Maximum downstream trigger attempts per pending-scan job.
    #[serde(default = "default_max_trigger_attempts")]
    pub max_trigger_attempts: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            schedule: default_scan_schedule(),
            include_prereleases: false,
            registry_timeout_secs: default_registry_timeout(),
            poll_interval_secs: default_poll_interval(),
            max_polls: default_max_polls(),
            max_trigger_attempts: default_max_trigger_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between orchestration sweeps, in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Maintenance window enforcement.
    #[serde(default)]
    pub window_mode: WindowMode,
    /// Retry defaults stamped onto new update rows.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,
    /// Directory for pre-apply compose snapshots.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            window_mode: WindowMode::default(),
            max_retries: default_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
            backup_dir: default_backup_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Whether to serve /metrics, /health, /ready.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_http_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Broadcast buffer size for the event bus.
    #[serde(default = "default_event_buffer")]
    pub buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Which container-engine/registry driver to use. `mock` is built in;
    /// engine integrations register their own driver name.
    #[serde(default = "default_backend_driver")]
    pub driver: String,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            driver: default_backend_driver(),
        }
    }
}

fn default_backend_driver() -> String {
    "mock".to_string()
}

fn default_socket_path() -> String {
    "/tmp/tugd.sock".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tugboat")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_scan_schedule() -> String {
    // Nightly at 03:00.
    "0 0 3 * * *".to_string()
}

fn default_registry_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    20
}

fn default_max_polls() -> u32 {
    15
}

fn default_max_trigger_attempts() -> u32 {
    5
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_multiplier() -> u32 {
    3
}

fn default_backup_dir() -> PathBuf {
    default_data_dir().join("backups")
}

fn default_http_port() -> u16 {
    9114
}

fn default_event_buffer() -> usize {
    256
}

fn default_true() -> bool {
    true
}

/// Severity of a configuration warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSeverity {
    /// Suspicious but workable; logged and ignored.
    Warning,
    /// The daemon falls back to a default for this key.
    Critical,
}

/// One validation finding for a loaded configuration.
#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub key: String,
    pub message: String,
    pub severity: WarningSeverity,
}

impl DaemonConfig {
    /// Default config file location under the user config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tugboat").join("config.toml"))
    }

    /// Load configuration from `path`, or the default location, falling back
    /// to built-in defaults when no file exists. Environment overrides are
    /// applied afterwards.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };
        let mut config = match resolved {
            Some(p) => {
                let raw = std::fs::read_to_string(&p).map_err(|source| ConfigError::Read {
                    path: p.display().to_string(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: p.display().to_string(),
                    source,
                })?
            }
            None => {
                debug!("no configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `TUG_*` environment overrides on top of file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("TUG_SOCKET_PATH") {
            self.general.socket_path = value;
        }
        if let Ok(value) = std::env::var("TUG_DATA_DIR") {
            self.general.data_dir = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("TUG_LOG_LEVEL") {
            self.general.log_level = value;
        }
        if let Ok(value) = std::env::var("TUG_HTTP_PORT")
            && let Ok(port) = value.parse()
        {
            self.http.port = port;
        }
        if let Ok(value) = std::env::var("TUG_SWEEP_INTERVAL_SECS")
            && let Ok(secs) = value.parse()
        {
            self.orchestrator.sweep_interval_secs = secs;
        }
    }

    /// The engine settings snapshot handed to scans and sweeps.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            include_prereleases: self.scan.include_prereleases,
            window_mode: self.orchestrator.window_mode,
            max_retries: self.orchestrator.max_retries,
            backoff_multiplier: self.orchestrator.backoff_multiplier,
        }
    }

    /// Validate the configuration, returning findings rather than failing.
    /// Critical findings mean the daemon substitutes a safe default.
    pub fn validate(&mut self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if cron::Schedule::from_str(&self.scan.schedule).is_err() {
            warnings.push(ConfigWarning {
                key: "scan.schedule".to_string(),
                message: format!(
                    "`{}` is not a valid cron expression, using default",
                    self.scan.schedule
                ),
                severity: WarningSeverity::Critical,
            });
            self.scan.schedule = default_scan_schedule();
        }
        if self.orchestrator.backoff_multiplier < 2 {
            warnings.push(ConfigWarning {
                key: "orchestrator.backoff_multiplier".to_string(),
                message: "backoff multiplier below 2 retries too aggressively, using 2".to_string(),
                severity: WarningSeverity::Critical,
            });
            self.orchestrator.backoff_multiplier = 2;
        }
        if self.orchestrator.max_retries == 0 {
            warnings.push(ConfigWarning {
                key: "orchestrator.max_retries".to_string(),
                message: "max_retries is 0; transient failures will fail immediately".to_string(),
                severity: WarningSeverity::Warning,
            });
        }
        if self.orchestrator.sweep_interval_secs < 10 {
            warnings.push(ConfigWarning {
                key: "orchestrator.sweep_interval_secs".to_string(),
                message: "sweep interval under 10s hammers the registry".to_string(),
                severity: WarningSeverity::Warning,
            });
        }
        if self.scan.max_polls == 0 {
            warnings.push(ConfigWarning {
                key: "scan.max_polls".to_string(),
                message: "max_polls is 0, pending scans can never complete; using default"
                    .to_string(),
                severity: WarningSeverity::Critical,
            });
            self.scan.max_polls = default_max_polls();
        }
        warnings
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK.get_or_init(|| Mutex::new(())).lock().unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut config = DaemonConfig::default();
        let warnings = config.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let raw = r#"
            [general]
            socket_path = "/run/tugd.sock"

            [orchestrator]
            window_mode = "strict"
            max_retries = 5
        "#;
        let config: DaemonConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.general.socket_path, "/run/tugd.sock");
        assert_eq!(config.orchestrator.window_mode, WindowMode::Strict);
        assert_eq!(config.orchestrator.max_retries, 5);
        // Untouched sections keep defaults.
        assert_eq!(config.scan.max_polls, default_max_polls());
        assert!(config.http.enabled);
    }

    #[test]
    fn loads_from_an_explicit_file() {
        // load() applies env overrides; serialize with the env-mutating test.
        let _guard = env_test_lock();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[scan]\ninclude_prereleases = true\nmax_polls = 7\n",
        )
        .unwrap();
        let config = DaemonConfig::load(Some(&path)).unwrap();
        assert!(config.scan.include_prereleases);
        assert_eq!(config.scan.max_polls, 7);
    }

    #[test]
    fn load_reports_parse_errors_with_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        let err = DaemonConfig::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn invalid_schedule_is_replaced_with_default() {
        let mut config = DaemonConfig::default();
        config.scan.schedule = "every tuesday".to_string();
        let warnings = config.validate();
        assert!(
            warnings
                .iter()
                .any(|w| w.key == "scan.schedule" && w.severity == WarningSeverity::Critical)
        );
        assert_eq!(config.scan.schedule, default_scan_schedule());
    }

    #[test]
    fn zero_max_polls_is_corrected() {
        let mut config = DaemonConfig::default();
        config.scan.max_polls = 0;
        config.validate();
        assert_eq!(config.scan.max_polls, default_max_polls());
    }

    #[test]
    #[allow(unsafe_code)]
    fn env_overrides_take_precedence() {
        let _guard = env_test_lock();
        // set_var is unsafe in edition 2024; scope it tightly.
        unsafe {
            std::env::set_var("TUG_SOCKET_PATH", "/tmp/override.sock");
            std::env::set_var("TUG_HTTP_PORT", "9999");
        }
        let mut config = DaemonConfig::default();
        config.apply_env_overrides();
        unsafe {
            std::env::remove_var("TUG_SOCKET_PATH");
            std::env::remove_var("TUG_HTTP_PORT");
        }
        assert_eq!(config.general.socket_path, "/tmp/override.sock");
        assert_eq!(config.http.port, 9999);
    }

    #[test]
    fn engine_settings_snapshot_mirrors_config() {
        let mut config = DaemonConfig::default();
        config.scan.include_prereleases = true;
        config.orchestrator.window_mode = WindowMode::Strict;
        config.orchestrator.backoff_multiplier = 4;
        let settings = config.engine_settings();
        assert!(settings.include_prereleases);
        assert_eq!(settings.window_mode, WindowMode::Strict);
        assert_eq!(settings.backoff_multiplier, 4);
    }
}

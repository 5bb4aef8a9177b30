//! Topology configuration – reads/writes `~/.ensemble/config.toml`.
//!
//! ```toml
//! [server]
//! poll_interval = 100
//! preempt_grace = 1000
//!
//! [client]
//! reconnect_backoff = 500
//!
//! [[services]]
//! name = "speaker"
//! kind = "hardware"
//! delay = 200
//!
//! [controllers.greeter]
//! timeout_for_result = 10000
//! children = { speaker = "speaker", gesture = "gesture" }
//! ```
//!
//! All durations are milliseconds.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ensemble_action::{ClientConfig, ServerConfig};
use ensemble_runtime::ControllerConfig;
use ensemble_types::duration_ms;
use serde::{Deserialize, Serialize};

/// Which simulated ServiceManager a service node hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Hardware,
    Web,
    Internal,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Hardware => write!(f, "hardware"),
            ServiceKind::Web => write!(f, "web"),
            ServiceKind::Internal => write!(f, "internal"),
        }
    }
}

/// One service node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub kind: ServiceKind,
    /// Simulated action duration (hardware) or response latency (web).
    #[serde(with = "duration_ms", default = "default_delay")]
    pub delay: Duration,
}

fn default_delay() -> Duration {
    Duration::from_millis(200)
}

impl ServiceSpec {
    fn new(name: &str, kind: ServiceKind, delay_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

/// Persisted topology stored in `~/.ensemble/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default = "default_services")]
    pub services: Vec<ServiceSpec>,

    /// Controller name → settings and children.
    #[serde(default = "default_controllers")]
    pub controllers: BTreeMap<String, ControllerConfig>,
}

fn default_services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec::new("speaker", ServiceKind::Hardware, 200),
        ServiceSpec::new("gesture", ServiceKind::Hardware, 300),
        ServiceSpec::new("chat", ServiceKind::Web, 100),
        ServiceSpec::new("mic", ServiceKind::Internal, 0),
    ]
}

fn default_controllers() -> BTreeMap<String, ControllerConfig> {
    BTreeMap::from([
        (
            "greeter".to_string(),
            ControllerConfig::default()
                .with_child("speaker")
                .with_child("gesture"),
        ),
        (
            "listener".to_string(),
            ControllerConfig::default().with_child("mic").with_child("chat"),
        ),
    ])
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            services: default_services(),
            controllers: default_controllers(),
        }
    }
}

/// Return the path to `~/.ensemble/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ensemble").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ENSEMBLE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ENSEMBLE_TIMEOUT_FOR_RESULT_MS` | every controller's `timeout_for_result` |
/// | `ENSEMBLE_CONDITION_TIMEOUT_MS` | every controller's `condition_timeout` |
/// | `ENSEMBLE_POLL_INTERVAL_MS` | `server.poll_interval` |
///
/// Values that are not unsigned integers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(timeout) = env_millis("ENSEMBLE_TIMEOUT_FOR_RESULT_MS") {
        for controller in cfg.controllers.values_mut() {
            controller.timeout_for_result = timeout;
        }
    }
    if let Some(timeout) = env_millis("ENSEMBLE_CONDITION_TIMEOUT_MS") {
        for controller in cfg.controllers.values_mut() {
            controller.condition_timeout = timeout;
        }
    }
    if let Some(interval) = env_millis("ENSEMBLE_POLL_INTERVAL_MS")
        && !interval.is_zero()
    {
        cfg.server.poll_interval = interval;
    }
}

fn env_millis(var: &str) -> Option<Duration> {
    std::env::var(var)
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_millis)
}

/// Check that the poll interval is non-zero and that every controller child
/// resolves to a configured node.
pub fn validate(cfg: &Config) -> Result<(), String> {
    if cfg.server.poll_interval.is_zero() {
        return Err("server.poll_interval must be greater than 0 ms".to_string());
    }
    for (name, controller) in &cfg.controllers {
        for (child, endpoint) in &controller.children {
            let known = cfg.services.iter().any(|s| &s.name == endpoint)
                || cfg.controllers.contains_key(endpoint);
            if !known {
                return Err(format!(
                    "Controller '{name}' child '{child}' points at unknown node '{endpoint}'"
                ));
            }
        }
    }
    Ok(())
}

/// Save the config to disk, creating `~/.ensemble/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

//! # MusicStream Configuration Module
//!
//! Layered, read-only configuration for the radio server:
//! - Embedded default configuration (`musicstream.yaml`)
//! - Optional `config.yaml` merged on top of it
//! - `MUSICSTREAM_CONFIG__A__B=value` environment overrides
//! - Legacy environment names (`PORT`, `RADIO_DISABLED`, `YOUTUBE_DEVELOPER_KEY`, ...)
//! - Typed getters falling back to defaults
//!
//! ## Usage
//!
//! ```no_run
//! use msconfig::get_config;
//!
//! let config = get_config();
//! let port = config.get_http_port();
//! let radio = config.get_radio_enabled()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("musicstream.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> = Arc::new(Config::load_config("").unwrap_or_else(|err| {
        warn!("Failed to load configuration ({}), using embedded defaults", err);
        Config::defaults()
    }));
}

const ENV_CONFIG_DIR: &str = "MUSICSTREAM_CONFIG";
const ENV_PREFIX: &str = "MUSICSTREAM_CONFIG__";
const CONFIG_DIR_NAME: &str = ".musicstream";

// Default values for configuration
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_STATIC_DIR: &str = "www";
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;
const DEFAULT_MAX_LISTENERS: usize = 250;
const DEFAULT_INACTIVITY_TIMEOUT_SECS: usize = 15 * 60;
const DEFAULT_SKIP_GUARD_SECS: usize = 5;
const DEFAULT_WATCHDOG_MAX_FAILURES: usize = 5;
const DEFAULT_RADIO_ENABLED: bool = true;
const DEFAULT_RADIO_STREAM_URL: &str = "https://listen.moe/stream";
const DEFAULT_RADIO_GATEWAY_URL: &str = "wss://listen.moe/gateway_v2";
const DEFAULT_MUSIC_SOURCE: &str = "youtube";
const DEFAULT_YOUTUBE_STREAM_API_URL: &str = "https://inv.nadeko.net";

/// Legacy environment variables and the configuration path they feed.
const LEGACY_ENV: &[(&str, &[&str])] = &[
    ("PORT", &["host", "http_port"]),
    ("WWW", &["host", "static_dir"]),
    ("HEROKU_APP_NAME", &["host", "self_ping", "app_name"]),
    ("DEFAULT_SOURCE", &["sources", "default"]),
    ("YOUTUBE_DEVELOPER_KEY", &["sources", "youtube", "developer_key"]),
    ("CSN_PROXY_URL", &["sources", "csn", "proxy_url"]),
    ("MUSIXMATCH_USER_TOKEN", &["lyrics", "musixmatch", "user_token"]),
    ("MUSIXMATCH_OB_USER_TOKEN", &["lyrics", "musixmatch", "ob_user_token"]),
];

/// Macro to generate a getter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path)? {
                Value::Number(n) => Ok(n.as_u64().map(|v| v as usize).unwrap_or($default)),
                Value::String(s) => Ok(s.trim().parse().unwrap_or($default)),
                _ => Ok($default),
            }
        }
    };
}

/// Macro to generate a getter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path)? {
                Value::Bool(b) => Ok(b),
                _ => Ok($default),
            }
        }
    };
}

/// Macro to generate a getter for optional credentials (empty means unset)
macro_rules! impl_secret_config {
    ($getter:ident, $path:expr) => {
        pub fn $getter(&self) -> Option<String> {
            self.get_non_empty_string($path)
        }
    };
}

/// Configuration manager for MusicStream
///
/// Holds the merged YAML tree. Values can be overridden in memory with
/// [`Config::set_value`] but are never written back to disk.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Self {
            config_dir: self.config_dir.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return env_path;
        }

        if Path::new(CONFIG_DIR_NAME).exists() {
            return CONFIG_DIR_NAME.to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        CONFIG_DIR_NAME.to_string()
    }

    /// Loads the configuration
    ///
    /// 1. Loads the embedded default configuration
    /// 2. Merges the `config.yaml` of the configuration directory if present
    /// 3. Applies `MUSICSTREAM_CONFIG__*` overrides
    /// 4. Applies the legacy environment names
    ///
    /// The directory is searched in order: `directory` if not empty,
    /// `$MUSICSTREAM_CONFIG`, `./.musicstream`, `~/.musicstream`.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        let config_file_path = Path::new(&config_dir).join("config.yaml");

        let external = match fs::read(&config_file_path) {
            Ok(data) => {
                info!(config_file = %config_file_path.display(), "Loaded config file");
                Some(serde_yaml::from_slice::<Value>(&data)?)
            }
            Err(_) => {
                info!(
                    config_file = %config_file_path.display(),
                    "Config file not found, using default embedded config"
                );
                None
            }
        };

        let config = Self::build(config_dir, external)?;
        Ok(config.with_env(env::vars()))
    }

    /// Builds a configuration from a YAML document merged on top of the defaults.
    ///
    /// The environment is not consulted.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let external: Value = serde_yaml::from_str(yaml)?;
        Self::build(String::new(), Some(external))
    }

    /// The embedded defaults alone.
    pub fn defaults() -> Self {
        Self::build(String::new(), None).unwrap_or_else(|_| Self {
            config_dir: String::new(),
            data: Mutex::new(Value::Mapping(Mapping::new())),
        })
    }

    fn build(config_dir: String, external: Option<Value>) -> Result<Self> {
        let mut value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        if let Some(external) = external {
            merge_yaml(&mut value, &Self::lower_keys_value(external));
        }
        Ok(Config {
            config_dir,
            data: Mutex::new(Self::lower_keys_value(value)),
        })
    }

    /// Applies environment overrides taken from `vars`.
    ///
    /// Prefixed variables are applied first, legacy names last so that
    /// `PORT` wins over `MUSICSTREAM_CONFIG__HOST__HTTP_PORT`.
    pub fn with_env<I>(self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: Vec<(String, String)> = vars.into_iter().collect();
        {
            let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
            Self::apply_env_overrides(&mut data, &vars);
            Self::apply_legacy_env(&mut data, &vars);
        }
        self
    }

    /// Directory the configuration was looked up in.
    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Sets a configuration value in memory
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Self::set_value_internal(&mut data, path, value)
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// `path` is an array of keys, e.g. `&["host", "http_port"]`.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value, vars: &[(String, String)]) {
        for (key, value) in vars {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn apply_legacy_env(config: &mut Value, vars: &[(String, String)]) {
        for (key, value) in vars {
            if key == "RADIO_DISABLED" {
                if !value.is_empty() {
                    let _ = Self::set_value_internal(
                        config,
                        &["radio", "enabled"],
                        Value::Bool(false),
                    );
                }
                continue;
            }
            if let Some((_, path)) = LEGACY_ENV.iter().find(|(name, _)| name == key) {
                // Les secrets restent des chaînes, seul le port est numérique
                let yaml_value = if key == "PORT" {
                    Self::convert_env_value(value)
                } else {
                    Value::String(value.clone())
                };
                let _ = Self::set_value_internal(config, path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    fn get_non_empty_string(&self, path: &[&str]) -> Option<String> {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }

    fn get_string_or(&self, path: &[&str], default: &str) -> String {
        match self.get_value(path) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            Ok(_) => {
                warn!("{} is not a string or empty, using default {}", path.join("."), default);
                default.to_string()
            }
            Err(err) => {
                warn!("Failed to get {}: {}, using default {}", path.join("."), err, default);
                default.to_string()
            }
        }
    }

    /// Gets the HTTP port from configuration
    ///
    /// Returns the configured HTTP port, or the default port (8080) if not configured or invalid.
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => match n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) => port,
                None => {
                    warn!("Invalid HTTP port {}, using default {}", n, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            Ok(Value::String(s)) => match s.trim().parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    warn!("Invalid HTTP port '{}', using default {}", s, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            Ok(_) => {
                warn!(
                    "HTTP port not a number or string, using default {}",
                    DEFAULT_HTTP_PORT
                );
                DEFAULT_HTTP_PORT
            }
            Err(err) => {
                warn!(
                    "Failed to get HTTP port: {}, using default {}",
                    err, DEFAULT_HTTP_PORT
                );
                DEFAULT_HTTP_PORT
            }
        }
    }

    /// Directory served under `/`
    pub fn get_static_dir(&self) -> String {
        self.get_string_or(&["host", "static_dir"], DEFAULT_STATIC_DIR)
    }

    /// Récupère le niveau de log minimum depuis la configuration
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"])? {
            Value::String(s) => Ok(s),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    impl_bool_config!(
        get_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_usize_config!(
        get_max_listeners,
        &["stream", "max_listeners"],
        DEFAULT_MAX_LISTENERS
    );

    impl_usize_config!(
        get_inactivity_timeout_secs,
        &["stream", "inactivity_timeout_secs"],
        DEFAULT_INACTIVITY_TIMEOUT_SECS
    );

    impl_usize_config!(
        get_skip_guard_secs,
        &["stream", "skip_guard_secs"],
        DEFAULT_SKIP_GUARD_SECS
    );

    impl_usize_config!(
        get_watchdog_max_failures,
        &["stream", "watchdog_max_failures"],
        DEFAULT_WATCHDOG_MAX_FAILURES
    );

    impl_bool_config!(get_radio_enabled, &["radio", "enabled"], DEFAULT_RADIO_ENABLED);

    /// URL of the fallback radio audio stream
    pub fn get_radio_stream_url(&self) -> String {
        self.get_string_or(&["radio", "stream_url"], DEFAULT_RADIO_STREAM_URL)
    }

    /// URL of the fallback radio metadata gateway
    pub fn get_radio_gateway_url(&self) -> String {
        self.get_string_or(&["radio", "gateway_url"], DEFAULT_RADIO_GATEWAY_URL)
    }

    impl_secret_config!(get_self_ping_app_name, &["host", "self_ping", "app_name"]);

    /// Identifier of the source used for selector 0 (`youtube`, `csn`, `url`)
    pub fn get_default_source(&self) -> String {
        self.get_string_or(&["sources", "default"], DEFAULT_MUSIC_SOURCE)
            .trim()
            .to_lowercase()
    }

    /// Video API resolving YouTube ids into audio stream URLs
    pub fn get_youtube_stream_api_url(&self) -> String {
        self.get_string_or(
            &["sources", "youtube", "stream_api_url"],
            DEFAULT_YOUTUBE_STREAM_API_URL,
        )
    }

    impl_secret_config!(get_youtube_developer_key, &["sources", "youtube", "developer_key"]);
    impl_secret_config!(get_csn_proxy_url, &["sources", "csn", "proxy_url"]);
    impl_secret_config!(get_musixmatch_user_token, &["lyrics", "musixmatch", "user_token"]);
    impl_secret_config!(
        get_musixmatch_ob_user_token,
        &["lyrics", "musixmatch", "ob_user_token"]
    );
}

/// Returns the global configuration instance
///
/// The configuration is loaded lazily on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences are replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::defaults();
        assert_eq!(config.get_http_port(), 8080);
        assert_eq!(config.get_max_listeners().unwrap(), 250);
        assert_eq!(config.get_inactivity_timeout_secs().unwrap(), 900);
        assert_eq!(config.get_skip_guard_secs().unwrap(), 5);
        assert!(config.get_radio_enabled().unwrap());
        assert_eq!(config.get_radio_stream_url(), "https://listen.moe/stream");
        assert_eq!(config.get_musixmatch_user_token(), None);
        assert_eq!(config.get_default_source(), "youtube");
        assert_eq!(config.get_youtube_developer_key(), None);
        assert_eq!(config.get_csn_proxy_url(), None);
    }

    #[test]
    fn test_yaml_merge_is_case_insensitive() {
        let config = Config::from_yaml("HOST:\n  HTTP_Port: 9000\nstream:\n  max_listeners: 3\n")
            .unwrap();
        assert_eq!(config.get_http_port(), 9000);
        assert_eq!(config.get_max_listeners().unwrap(), 3);
        // Untouched branches keep their defaults
        assert_eq!(config.get_static_dir(), "www");
    }

    #[test]
    fn test_prefixed_env_override() {
        let config = Config::defaults().with_env(vars(&[
            ("MUSICSTREAM_CONFIG__STREAM__MAX_LISTENERS", "12"),
            ("MUSICSTREAM_CONFIG__HOST__LOGGER__ENABLE_CONSOLE", "false"),
            ("UNRELATED", "x"),
        ]));
        assert_eq!(config.get_max_listeners().unwrap(), 12);
        assert!(!config.get_log_enable_console().unwrap());
    }

    #[test]
    fn test_legacy_env_names() {
        let config = Config::defaults().with_env(vars(&[
            ("PORT", "3000"),
            ("RADIO_DISABLED", "1"),
            ("DEFAULT_SOURCE", " CSN "),
            ("YOUTUBE_DEVELOPER_KEY", "yt-key"),
            ("CSN_PROXY_URL", "118.69.50.154:80"),
            ("MUSIXMATCH_USER_TOKEN", "12345"),
            ("WWW", "public"),
        ]));
        assert_eq!(config.get_http_port(), 3000);
        assert!(!config.get_radio_enabled().unwrap());
        assert_eq!(config.get_default_source(), "csn");
        assert_eq!(config.get_youtube_developer_key().as_deref(), Some("yt-key"));
        assert_eq!(config.get_csn_proxy_url().as_deref(), Some("118.69.50.154:80"));
        // Numeric looking tokens stay strings
        assert_eq!(config.get_musixmatch_user_token().as_deref(), Some("12345"));
        assert_eq!(config.get_static_dir(), "public");
    }

    #[test]
    fn test_empty_radio_disabled_keeps_radio() {
        let config = Config::defaults().with_env(vars(&[("RADIO_DISABLED", "")]));
        assert!(config.get_radio_enabled().unwrap());
    }

    #[test]
    fn test_invalid_port_falls_back() {
        let config = Config::from_yaml("host:\n  http_port: not-a-port\n").unwrap();
        assert_eq!(config.get_http_port(), 8080);
    }

    #[test]
    fn test_set_value_in_memory() {
        let config = Config::defaults();
        config
            .set_value(&["stream", "skip_guard_secs"], Value::Number(1u64.into()))
            .unwrap();
        assert_eq!(config.get_skip_guard_secs().unwrap(), 1);
        assert!(config.get_value(&["does", "not", "exist"]).is_err());
    }
}

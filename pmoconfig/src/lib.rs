//! # pmoconfig
//!
//! YAML configuration store for the Playdar client.
//!
//! A [`Config`] starts from the defaults embedded in the crate, overlays the
//! user's `config.yaml`, then applies `PMOPLAYDAR_CONFIG__SECTION__KEY=value`
//! environment overrides. The merged tree is written back so the file on disk
//! always shows the effective configuration.
//!
//! There is no global instance: load a [`Config`] once and share it (usually
//! in an `Arc`). Client crates add typed accessors through extension traits
//! built on [`Config::get_value`] and [`Config::set_value`].
//!
//! ## Usage
//!
//! ```no_run
//! use pmoconfig::Config;
//!
//! let config = Config::load_config("")?;
//! println!("logging at {}", config.get_log_min_level()?);
//!
//! config.set_log_min_level("DEBUG".to_string())?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod location;
mod tree;

pub use location::{DEFAULT_CONFIG_DIR, ENV_CONFIG_DIR};

use anyhow::Result;
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = include_str!("pmoplaydar.yaml");

/// Prefix of environment variables overriding single keys
pub const ENV_OVERRIDE_PREFIX: &str = "PMOPLAYDAR_CONFIG__";

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

/// Boolean getter/setter pair with a fallback value
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            Ok(self.get_value($path).ok().and_then(|v| v.as_bool()).unwrap_or($default))
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Configuration of the Playdar client, backed by `<dir>/config.yaml`
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(self.data().clone()),
        }
    }
}

impl Config {
    /// Locate, create if needed and validate the configuration directory
    ///
    /// Lookup order: `directory` when non-empty, `$PMOPLAYDAR_CONFIG`,
    /// `./.pmoplaydar`, `~/.pmoplaydar`.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir = location::locate(directory);
        location::prepare(&dir)?;
        Ok(dir.to_string_lossy().into_owned())
    }

    /// Load the configuration held in `directory` (empty for the default lookup)
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        let path = Path::new(&config_dir)
            .join(CONFIG_FILE)
            .to_string_lossy()
            .into_owned();
        info!(config_file = %path, "Loading configuration");

        let mut data = tree::lowercase_keys(serde_yaml::from_str(DEFAULT_CONFIG)?);

        match fs::read_to_string(&path) {
            Ok(text) => {
                let user: Value = serde_yaml::from_str(&text)?;
                // an empty file parses as null
                if !user.is_null() {
                    tree::merge(&mut data, tree::lowercase_keys(user));
                }
            }
            Err(_) => info!(config_file = %path, "No config file yet, using defaults"),
        }

        apply_env_overrides(&mut data, std::env::vars());

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(data),
        };
        config.save()?;
        Ok(config)
    }

    /// Directory holding `config.yaml`
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Path of the backing `config.yaml`
    pub fn file_path(&self) -> &str {
        &self.path
    }

    // Mutations are single inserts, so a poisoned tree is still consistent
    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write the current tree to `config.yaml`
    pub fn save(&self) -> Result<()> {
        let text = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.path, text)?;
        Ok(())
    }

    /// Set the value at `path` (e.g. `&["playdar", "server", "port"]`) and save
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        tree::assign(&mut self.data(), path, value)?;
        self.save()
    }

    /// Value at `path`; an error when the key is not set
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        tree::lookup(&self.data(), path).cloned()
    }

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    /// Minimum log level (`TRACE` .. `ERROR`, default `INFO`)
    pub fn get_log_min_level(&self) -> Result<String> {
        match self.get_value(&["host", "logger", "min_level"]) {
            Ok(Value::String(level)) => Ok(level),
            _ => Ok(DEFAULT_LOG_MIN_LEVEL.to_string()),
        }
    }

    pub fn set_log_min_level(&self, level: String) -> Result<()> {
        self.set_value(&["host", "logger", "min_level"], Value::String(level))
    }
}

/// Apply `PMOPLAYDAR_CONFIG__A__B=value` variables to the tree
fn apply_env_overrides(data: &mut Value, vars: impl Iterator<Item = (String, String)>) {
    for (name, raw) in vars {
        let Some(key) = name.strip_prefix(ENV_OVERRIDE_PREFIX) else {
            continue;
        };
        let path: Vec<&str> = key.split("__").collect();
        if let Err(e) = tree::assign(data, &path, tree::parse_scalar(&raw)) {
            warn!(env_var = %name, "Ignoring configuration override: {}", e);
        }
    }
}

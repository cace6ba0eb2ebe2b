//! Playdar settings stored in pmoconfig
//!
//! The [`PlaydarConfigExt`] trait adds typed accessors for the `playdar.*`
//! keys to `pmoconfig::Config`.
//!
//! # Auto-persist of defaults
//!
//! Getters write the default value back to the configuration when the key is
//! missing or invalid, so `config.yaml` documents every knob after a first run.
//!
//! # Example
//!
//! ```no_run
//! use pmoconfig::Config;
//! use pmoplaydar::{PlaydarClient, PlaydarConfigExt};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load_config("")?;
//! let client = PlaydarClient::builder()
//!     .settings(config.resolver_settings()?)
//!     .transport(Arc::new(config.http_transport()?))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::admission::DEFAULT_MAX_CONCURRENT;
use crate::client::{ResolverSettings, DEFAULT_CALL_TIMEOUT, DEFAULT_STAT_TIMEOUT};
use crate::polling::{DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL};
use crate::transport::{HttpTransport, DEFAULT_SERVER_PORT, DEFAULT_SERVER_ROOT};
use anyhow::{anyhow, Result};
use pmoconfig::Config;
use serde_yaml::{Number, Value};
use std::time::Duration;

const SERVER_ROOT: &[&str] = &["playdar", "server", "root"];
const SERVER_PORT: &[&str] = &["playdar", "server", "port"];
const AUTH_TOKEN: &[&str] = &["playdar", "auth_token"];
const MAX_CONCURRENT: &[&str] = &["playdar", "resolver", "max_concurrent"];
const MAX_POLLS: &[&str] = &["playdar", "resolver", "max_polls"];
const DEFAULT_POLL_INTERVAL_MS: &[&str] = &["playdar", "resolver", "default_poll_interval_ms"];
const CALL_TIMEOUT_MS: &[&str] = &["playdar", "resolver", "call_timeout_ms"];
const STAT_TIMEOUT_MS: &[&str] = &["playdar", "stat_timeout_ms"];

/// Extension trait for Playdar settings in `pmoconfig::Config`
pub trait PlaydarConfigExt {
    // ========================================================================
    // Daemon location
    // ========================================================================

    /// Daemon host (default: `localhost`)
    fn get_playdar_server_root(&self) -> Result<String>;
    fn set_playdar_server_root(&self, root: &str) -> Result<()>;

    /// Daemon port (default: 60210)
    fn get_playdar_server_port(&self) -> Result<u16>;
    fn set_playdar_server_port(&self, port: u16) -> Result<()>;

    /// Auth token sent with every call, `None` when not authorised yet
    fn get_playdar_auth_token(&self) -> Result<Option<String>>;
    fn set_playdar_auth_token(&self, token: Option<&str>) -> Result<()>;

    // ========================================================================
    // Resolver tuning
    // ========================================================================

    /// Concurrency ceiling (default: 5)
    fn get_playdar_max_concurrent(&self) -> Result<usize>;
    fn set_playdar_max_concurrent(&self, max: usize) -> Result<()>;

    /// Poll ceiling when the daemon sends no `poll_limit` (default: 4)
    fn get_playdar_max_polls(&self) -> Result<u32>;
    fn set_playdar_max_polls(&self, max: u32) -> Result<()>;

    fn get_playdar_default_poll_interval_ms(&self) -> Result<u64>;
    fn set_playdar_default_poll_interval_ms(&self, ms: u64) -> Result<()>;

    /// Per-call deadline in milliseconds, 0 disables it (default: 30000)
    fn get_playdar_call_timeout_ms(&self) -> Result<u64>;
    fn set_playdar_call_timeout_ms(&self, ms: u64) -> Result<()>;

    fn get_playdar_stat_timeout_ms(&self) -> Result<u64>;
    fn set_playdar_stat_timeout_ms(&self, ms: u64) -> Result<()>;

    // ========================================================================
    // Builders
    // ========================================================================

    /// All resolver settings at once
    fn resolver_settings(&self) -> Result<ResolverSettings>;

    /// HTTP transport pointing at the configured daemon
    fn http_transport(&self) -> Result<HttpTransport>;
}

/// Read a non-negative integer, persisting `default` when absent or invalid
fn get_u64_or_persist(config: &Config, path: &[&str], default: u64) -> Result<u64> {
    if let Ok(Value::Number(n)) = config.get_value(path) {
        if let Some(value) = n.as_u64() {
            return Ok(value);
        }
    }
    // Not set or invalid, use default and persist
    set_u64(config, path, default)?;
    Ok(default)
}

fn set_u64(config: &Config, path: &[&str], value: u64) -> Result<()> {
    config.set_value(path, Value::Number(Number::from(value)))
}

impl PlaydarConfigExt for Config {
    fn get_playdar_server_root(&self) -> Result<String> {
        match self.get_value(SERVER_ROOT) {
            Ok(Value::String(root)) if !root.is_empty() => Ok(root),
            _ => {
                self.set_playdar_server_root(DEFAULT_SERVER_ROOT)?;
                Ok(DEFAULT_SERVER_ROOT.to_string())
            }
        }
    }

    fn set_playdar_server_root(&self, root: &str) -> Result<()> {
        self.set_value(SERVER_ROOT, Value::String(root.to_string()))
    }

    fn get_playdar_server_port(&self) -> Result<u16> {
        let port = get_u64_or_persist(self, SERVER_PORT, u64::from(DEFAULT_SERVER_PORT))?;
        u16::try_from(port).map_err(|_| anyhow!("Invalid Playdar port: {}", port))
    }

    fn set_playdar_server_port(&self, port: u16) -> Result<()> {
        set_u64(self, SERVER_PORT, u64::from(port))
    }

    fn get_playdar_auth_token(&self) -> Result<Option<String>> {
        match self.get_value(AUTH_TOKEN) {
            Ok(Value::String(token)) if !token.is_empty() => Ok(Some(token)),
            _ => Ok(None),
        }
    }

    fn set_playdar_auth_token(&self, token: Option<&str>) -> Result<()> {
        let value = match token {
            Some(token) => Value::String(token.to_string()),
            None => Value::Null,
        };
        self.set_value(AUTH_TOKEN, value)
    }

    fn get_playdar_max_concurrent(&self) -> Result<usize> {
        let max = get_u64_or_persist(self, MAX_CONCURRENT, DEFAULT_MAX_CONCURRENT as u64)?;
        Ok(usize::try_from(max).unwrap_or(DEFAULT_MAX_CONCURRENT).max(1))
    }

    fn set_playdar_max_concurrent(&self, max: usize) -> Result<()> {
        set_u64(self, MAX_CONCURRENT, max as u64)
    }

    fn get_playdar_max_polls(&self) -> Result<u32> {
        let max = get_u64_or_persist(self, MAX_POLLS, u64::from(DEFAULT_MAX_POLLS))?;
        Ok(u32::try_from(max).unwrap_or(DEFAULT_MAX_POLLS).max(1))
    }

    fn set_playdar_max_polls(&self, max: u32) -> Result<()> {
        set_u64(self, MAX_POLLS, u64::from(max))
    }

    fn get_playdar_default_poll_interval_ms(&self) -> Result<u64> {
        get_u64_or_persist(
            self,
            DEFAULT_POLL_INTERVAL_MS,
            DEFAULT_POLL_INTERVAL.as_millis() as u64,
        )
    }

    fn set_playdar_default_poll_interval_ms(&self, ms: u64) -> Result<()> {
        set_u64(self, DEFAULT_POLL_INTERVAL_MS, ms)
    }

    fn get_playdar_call_timeout_ms(&self) -> Result<u64> {
        get_u64_or_persist(self, CALL_TIMEOUT_MS, DEFAULT_CALL_TIMEOUT.as_millis() as u64)
    }

    fn set_playdar_call_timeout_ms(&self, ms: u64) -> Result<()> {
        set_u64(self, CALL_TIMEOUT_MS, ms)
    }

    fn get_playdar_stat_timeout_ms(&self) -> Result<u64> {
        get_u64_or_persist(self, STAT_TIMEOUT_MS, DEFAULT_STAT_TIMEOUT.as_millis() as u64)
    }

    fn set_playdar_stat_timeout_ms(&self, ms: u64) -> Result<()> {
        set_u64(self, STAT_TIMEOUT_MS, ms)
    }

    fn resolver_settings(&self) -> Result<ResolverSettings> {
        let call_timeout = match self.get_playdar_call_timeout_ms()? {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };

        Ok(ResolverSettings {
            max_concurrent: self.get_playdar_max_concurrent()?,
            max_polls: self.get_playdar_max_polls()?,
            default_poll_interval: Duration::from_millis(
                self.get_playdar_default_poll_interval_ms()?,
            ),
            call_timeout,
            stat_timeout: Duration::from_millis(self.get_playdar_stat_timeout_ms()?),
        })
    }

    fn http_transport(&self) -> Result<HttpTransport> {
        let mut builder = HttpTransport::builder()
            .server_root(self.get_playdar_server_root()?)
            .server_port(self.get_playdar_server_port()?);
        if let Some(token) = self.get_playdar_auth_token()? {
            builder = builder.auth_token(token);
        }
        Ok(builder.build()?)
    }
}

//! Configuration management for the bridge
//!
//! Settings are loaded from a TOML file. Every section is optional and falls
//! back to its defaults, so an empty file is a valid configuration.
//!
//! ```toml
//! [connection]
//! lock_timeout_ms = 5000
//! reader_poll_ms = 100
//!
//! [buffers]
//! max_buffers = 3
//!
//! [windows]
//! popup_max_monitor_fraction = 0.9
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Smallest and largest accepted buffer queue depth
pub const MIN_BUFFERS: usize = 2;
pub const MAX_BUFFERS: usize = 8;

/// Main configuration struct containing all bridge settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    /// Display connection and shared lock settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Buffer queue settings
    #[serde(default)]
    pub buffers: BufferConfig,

    /// Window role and reconciliation settings
    #[serde(default)]
    pub windows: WindowConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// First bounded wait on the shared lock before warning (milliseconds)
    pub lock_timeout_ms: u64,

    /// Every later wait on the shared lock (milliseconds)
    pub lock_retry_timeout_ms: u64,

    /// How long the reader blocks on readability per iteration (milliseconds)
    pub reader_poll_ms: u64,

    /// Globals the server must advertise for the connection to be usable
    #[serde(default = "ConnectionConfig::default_required_globals")]
    pub required_globals: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferConfig {
    /// Maximum buffers per queue
    pub max_buffers: usize,

    /// Always allocate alpha-capable buffers
    #[serde(default)]
    pub prefer_alpha: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WindowConfig {
    /// Undecorated windows smaller than this fraction of their monitor (in
    /// both dimensions) are treated as transient popups.
    pub popup_max_monitor_fraction: f64,

    /// Delay of the low-priority reconcile timer (milliseconds)
    pub deferred_reconcile_ms: u64,

    /// Buffer scale assumed before any output reports one
    pub default_scale: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset ("error" .. "trace")
    pub level: String,

    /// Shorthand for `level = "debug"`
    #[serde(default)]
    pub debug: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5000,
            lock_retry_timeout_ms: 30000,
            reader_poll_ms: 100,
            required_globals: Self::default_required_globals(),
        }
    }
}

impl ConnectionConfig {
    fn default_required_globals() -> Vec<String> {
        ["wl_compositor", "wl_shm", "wl_subcompositor", "xdg_wm_base"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn lock_retry_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_retry_timeout_ms)
    }

    pub fn reader_poll(&self) -> Duration {
        Duration::from_millis(self.reader_poll_ms)
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_buffers: 3,
            prefer_alpha: false,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            popup_max_monitor_fraction: 0.9,
            deferred_reconcile_ms: 10,
            default_scale: 1,
        }
    }
}

impl WindowConfig {
    pub fn deferred_reconcile(&self) -> Duration {
        Duration::from_millis(self.deferred_reconcile_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            debug: false,
        }
    }
}

impl LoggingConfig {
    /// Filter string handed to env_logger
    pub fn filter(&self) -> &str {
        if self.debug {
            "debug"
        } else {
            &self.level
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            let relative = path.strip_prefix("~").unwrap_or(path);
            Path::new(&home).join(relative)
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: BridgeConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;
        if conn.lock_timeout_ms == 0 || conn.lock_retry_timeout_ms == 0 {
            anyhow::bail!("Invalid lock timeout: must be greater than 0");
        }
        if conn.reader_poll_ms == 0 {
            anyhow::bail!("Invalid reader_poll_ms: must be greater than 0");
        }
        if conn.required_globals.iter().any(|g| g.trim().is_empty()) {
            anyhow::bail!("Invalid required_globals: names must not be empty");
        }

        if !(MIN_BUFFERS..=MAX_BUFFERS).contains(&self.buffers.max_buffers) {
            anyhow::bail!(
                "Invalid max_buffers: must be between {} and {}",
                MIN_BUFFERS,
                MAX_BUFFERS
            );
        }

        let fraction = self.windows.popup_max_monitor_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            anyhow::bail!("Invalid popup_max_monitor_fraction: must be in (0.0, 1.0]");
        }
        if self.windows.default_scale == 0 {
            anyhow::bail!("Invalid default_scale: must be at least 1");
        }

        let valid_levels = ["off", "error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Merge a partial configuration into this one.
    /// Sections of `partial` that differ from the defaults replace ours.
    pub fn merge_partial(mut self, partial: BridgeConfig) -> Self {
        let defaults = BridgeConfig::default();

        if partial.connection != defaults.connection {
            self.connection = partial.connection;
        }
        if partial.buffers != defaults.buffers {
            self.buffers = partial.buffers;
        }
        if partial.windows != defaults.windows {
            self.windows = partial.windows;
        }
        if partial.logging != defaults.logging {
            self.logging = partial.logging;
        }

        self
    }
}

//! Configuration for the coordinator and worker processes
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (TASKPOOL_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::channel::MemoryTransport;
use crate::coordinator::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::worker::SessionConfig;

/// File name searched for in the working directory
pub const LOCAL_CONFIG_FILE: &str = "taskpool.toml";

/// Longest accepted simulated work time
pub const MAX_WORK_DELAY_MS: u64 = 60_000;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskpoolConfig {
    /// Coordinator behaviour
    pub coordinator: CoordinatorSettings,

    /// Worker behaviour
    pub worker: WorkerSettings,

    /// Channel backend settings
    pub channel: ChannelSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSettings {
    /// Number of worker slots
    pub slots: usize,

    /// Fixed seed for task generation (unset = random)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// First wait after a failed receive, in milliseconds
    pub receive_retry_delay_ms: u64,

    /// Longest wait between receive retries, in milliseconds
    pub receive_retry_max_delay_ms: u64,

    /// Consecutive receive failures before giving up (0 = never)
    pub max_receive_failures: u32,

    /// Bound on each shutdown notice, in milliseconds
    pub shutdown_send_timeout_ms: u64,
}

/// Worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Simulated work time per task, in milliseconds
    pub work_delay_ms: u64,

    /// Bound on the farewell Disconnect, in milliseconds
    pub disconnect_timeout_ms: u64,
}

/// Channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Directory holding the unix socket files
    pub runtime_dir: String,

    /// Queue depth of in-process channels
    pub memory_capacity: usize,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            slots: 3,
            seed: None,
            receive_retry_delay_ms: 1000,
            receive_retry_max_delay_ms: 30_000,
            max_receive_failures: 10,
            shutdown_send_timeout_ms: 1000,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            work_delay_ms: 2000,
            disconnect_timeout_ms: 1000,
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            runtime_dir: default_runtime_dir(),
            memory_capacity: crate::channel::DEFAULT_CAPACITY,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

fn default_runtime_dir() -> String {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("taskpool")
        .to_string_lossy()
        .into_owned()
}

impl TaskpoolConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let config = Self::load_unvalidated(config_path)?;
        config.validate()?;
        Ok(config)
    }

    /// Like `load`, but leaves validation to the caller
    ///
    /// Command-line flags are applied on top of this before `validate`.
    pub fn load_unvalidated(config_path: Option<&str>) -> Result<Self> {
        let mut config = match Self::find_config_file(config_path)? {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.expand_paths();

        Ok(config)
    }

    /// Parse one configuration file, without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Loading configuration file");

        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        let config = toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })?;

        info!(path = %path.display(), "Configuration loaded from file");
        Ok(config)
    }

    /// Find the configuration file to use
    pub fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // An explicit path must exist
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        let mut search_paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            search_paths.push(dir.join("taskpool").join("config.toml"));
        }

        for path in search_paths {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Coordinator settings
        if let Some(n) = env_parse("TASKPOOL_SLOTS") {
            self.coordinator.slots = n;
        }
        if let Some(n) = env_parse("TASKPOOL_SEED") {
            self.coordinator.seed = Some(n);
        }
        if let Some(n) = env_parse("TASKPOOL_RECEIVE_RETRY_DELAY_MS") {
            self.coordinator.receive_retry_delay_ms = n;
        }
        if let Some(n) = env_parse("TASKPOOL_MAX_RECEIVE_FAILURES") {
            self.coordinator.max_receive_failures = n;
        }
        if let Some(n) = env_parse("TASKPOOL_SHUTDOWN_SEND_TIMEOUT_MS") {
            self.coordinator.shutdown_send_timeout_ms = n;
        }

        // Worker settings
        if let Some(n) = env_parse("TASKPOOL_WORK_DELAY_MS") {
            self.worker.work_delay_ms = n;
        }
        if let Some(n) = env_parse("TASKPOOL_DISCONNECT_TIMEOUT_MS") {
            self.worker.disconnect_timeout_ms = n;
        }

        // Channel settings
        if let Ok(val) = std::env::var("TASKPOOL_RUNTIME_DIR") {
            self.channel.runtime_dir = val;
        }

        // Logging settings
        if let Ok(val) = std::env::var("TASKPOOL_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TASKPOOL_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("TASKPOOL_LOG_JSON") {
            self.logging.json_format = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Expand ~ and other path variables
    pub fn expand_paths(&mut self) {
        self.channel.runtime_dir = expand_path(&self.channel.runtime_dir);
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.slots == 0 {
            return Err(Error::Config("coordinator.slots must be at least 1".to_string()));
        }
        if i32::try_from(self.coordinator.slots).is_err() {
            return Err(Error::Config(format!(
                "coordinator.slots must be at most {}",
                i32::MAX
            )));
        }

        if self.coordinator.receive_retry_delay_ms == 0 {
            return Err(Error::Config(
                "coordinator.receive_retry_delay_ms must be positive".to_string(),
            ));
        }
        if self.coordinator.receive_retry_max_delay_ms < self.coordinator.receive_retry_delay_ms {
            return Err(Error::Config(
                "coordinator.receive_retry_max_delay_ms must not be below receive_retry_delay_ms"
                    .to_string(),
            ));
        }
        if self.coordinator.shutdown_send_timeout_ms == 0 {
            return Err(Error::Config(
                "coordinator.shutdown_send_timeout_ms must be positive".to_string(),
            ));
        }

        if self.worker.work_delay_ms > MAX_WORK_DELAY_MS {
            return Err(Error::Config(format!(
                "worker.work_delay_ms must be at most {}",
                MAX_WORK_DELAY_MS
            )));
        }
        if self.worker.disconnect_timeout_ms == 0 {
            return Err(Error::Config(
                "worker.disconnect_timeout_ms must be positive".to_string(),
            ));
        }

        if self.channel.runtime_dir.is_empty() {
            return Err(Error::Config("channel.runtime_dir cannot be empty".to_string()));
        }
        if self.channel.memory_capacity == 0 {
            return Err(Error::Config(
                "channel.memory_capacity must be at least 1".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }

    /// Socket directory as a PathBuf
    pub fn runtime_dir(&self) -> PathBuf {
        PathBuf::from(&self.channel.runtime_dir)
    }

    /// Settings handed to the dispatch loop
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        let c = &self.coordinator;
        CoordinatorConfig {
            slots: c.slots,
            seed: c.seed,
            receive_retry_delay: Duration::from_millis(c.receive_retry_delay_ms),
            receive_retry_max_delay: Duration::from_millis(c.receive_retry_max_delay_ms),
            max_receive_failures: c.max_receive_failures,
            shutdown_send_timeout: Duration::from_millis(c.shutdown_send_timeout_ms),
        }
    }

    /// Settings handed to a worker session
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            work_delay: Duration::from_millis(self.worker.work_delay_ms),
            disconnect_timeout: Duration::from_millis(self.worker.disconnect_timeout_ms),
        }
    }

    /// In-process transport sized by `channel.memory_capacity`
    pub fn memory_transport(&self) -> MemoryTransport {
        MemoryTransport::new(self.channel.memory_capacity)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|val| val.trim().parse().ok())
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location written by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskpool")
        .join("config.toml")
}

/// Initialize a new configuration file, returning where it was written
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }
    }

    fs::write(&config_path, generate_default_config())
        .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

    info!(path = %config_path.display(), "Configuration file created");
    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    format!(
        r#"# taskpool configuration

[coordinator]
# Number of worker slots
slots = 3

# Fixed seed for task values (comment out for a random seed per run)
# seed = 42

# First wait after a failed receive, doubled on each further failure
receive_retry_delay_ms = 1000

# Longest wait between receive retries
receive_retry_max_delay_ms = 30000

# Consecutive receive failures before the coordinator gives up (0 = never)
max_receive_failures = 10

# Bound on each shutdown notice sent to a worker
shutdown_send_timeout_ms = 1000

[worker]
# Simulated work time per task
work_delay_ms = 2000

# Bound on the Disconnect sent when a worker is stopped
disconnect_timeout_ms = 1000

[channel]
# Directory holding the unix socket files
runtime_dir = "{runtime_dir}"

# Queue depth of in-process channels
memory_capacity = 10

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.local/state/taskpool/taskpool.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#,
        runtime_dir = default_runtime_dir()
    )
}

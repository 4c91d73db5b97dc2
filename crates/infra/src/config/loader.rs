//! Configuration loader
//!
//! Loads application configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. `HOMEBOARD_CONFIG` names a file explicitly
//! 2. Otherwise the environment is tried; it only needs `HOMEBOARD_DB_PATH`
//! 3. If that is missing, config files are searched for
//! 4. JSON and TOML are both supported
//!
//! ## Environment Variables
//! - `HOMEBOARD_DB_PATH`: Database file path (required for env loading)
//! - `HOMEBOARD_DB_POOL_SIZE`: Connection pool size
//! - `HOMEBOARD_BIND_ADDR`: HTTP listen address
//! - `HOMEBOARD_ADMIN_TOKEN`: Administrative credential
//! - `HOMEBOARD_DISPLAY_TOKENS`: Comma separated display identities
//! - `HOMEBOARD_TIMEZONE`: Household IANA timezone
//! - `HOMEBOARD_SYNC_ENABLED`: Whether scheduled sync runs (true/false)
//! - `HOMEBOARD_LOG_LEVEL`: Default log filter
//! - `HOMEBOARD_LOG_FORMAT`: `pretty` or `json`
//!
//! Sources and credentials can only be declared in a file; with env loading
//! they are managed through the administrative API.
//!
//! ## File Locations
//! The loader looks for `homeboard.{toml,json}` and `config.{toml,json}` in the
//! current directory, its two parents and next to the executable.

use std::path::{Path, PathBuf};

use homeboard_domain::{Config, HomeboardError, LogFormat, Result};

const CONFIG_PATH_VAR: &str = "HOMEBOARD_CONFIG";
const CONFIG_FILE_NAMES: [&str; 4] =
    ["homeboard.toml", "homeboard.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `HomeboardError::Config` if no source yields a valid
/// configuration.
pub fn load() -> Result<Config> {
    if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
        return load_from_file(Some(PathBuf::from(path)));
    }

    match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(config)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// Only `HOMEBOARD_DB_PATH` is required; every other variable overlays the
/// defaults when present.
///
/// # Errors
/// Returns `HomeboardError::Config` if the database path is missing or a
/// variable has an invalid value.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config::default();
    config.database.path = env_var("HOMEBOARD_DB_PATH")?;

    if let Some(pool_size) = env_opt("HOMEBOARD_DB_POOL_SIZE") {
        config.database.pool_size = pool_size
            .parse::<u32>()
            .map_err(|e| HomeboardError::Config(format!("Invalid pool size: {e}")))?;
    }
    if let Some(bind_addr) = env_opt("HOMEBOARD_BIND_ADDR") {
        config.server.bind_addr = bind_addr;
    }
    config.server.admin_token = env_opt("HOMEBOARD_ADMIN_TOKEN");
    if let Some(tokens) = env_opt("HOMEBOARD_DISPLAY_TOKENS") {
        config.server.display_tokens = tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(timezone) = env_opt("HOMEBOARD_TIMEZONE") {
        config.merge.timezone = timezone;
    }
    config.sync.enabled = env_bool("HOMEBOARD_SYNC_ENABLED", config.sync.enabled);
    if let Some(level) = env_opt("HOMEBOARD_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env_opt("HOMEBOARD_LOG_FORMAT") {
        config.logging.format = parse_log_format(&format)?;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, searches the standard locations via
/// [`find_config_path`].
///
/// # Errors
/// Returns `HomeboardError::Config` if the file is missing or invalid.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(HomeboardError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => find_config_path().ok_or_else(|| {
            HomeboardError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| HomeboardError::Config(format!("Failed to read config file: {e}")))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration, detecting the format by file extension
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| HomeboardError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| HomeboardError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(HomeboardError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn find_config_path() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
        }
    }

    roots
        .iter()
        .flat_map(|root| CONFIG_FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn parse_log_format(value: &str) -> Result<LogFormat> {
    match value.trim().to_ascii_lowercase().as_str() {
        "pretty" | "text" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(HomeboardError::Config(format!("Invalid log format: {other}"))),
    }
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| {
        HomeboardError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Optional environment variable, ignoring empty values
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

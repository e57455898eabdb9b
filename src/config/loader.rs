//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (~/.config/fundgate/config.toml)
//! 3. Project config (./fundgate.toml)
//! 4. Environment variables (FUNDGATE_* prefix, `__` separates sections)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{GatewayError, Result};

const ENV_PREFIX: &str = "FUNDGATE_";
const PROJECT_CONFIG_FILE: &str = "fundgate.toml";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain using Figment:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        Self::load_layers(
            Self::global_config_path().as_deref(),
            &Self::project_config_path(),
        )
    }

    /// Defaults, then the given explicit file, then env vars
    pub fn load_with_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            return Err(GatewayError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Self::load_layers(None, path)
    }

    fn load_layers(global: Option<&Path>, project: &Path) -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = global
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(global_path));
        }

        if project.exists() {
            debug!("Loading project config from: {}", project.display());
            figment = figment.merge(Toml::file(project));
        }

        // FUNDGATE_BUDGET__DAILY_CAP -> budget.daily_cap
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true));

        let config: Config = figment
            .extract()
            .map_err(|e| GatewayError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file only (no env, no global)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| GatewayError::Config(format!("Configuration error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Get path to global config directory (~/.config/fundgate/)
    pub fn global_dir() -> Option<PathBuf> {
        env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                env::var("HOME")
                    .ok()
                    .map(|home| PathBuf::from(home).join(".config"))
            })
            .map(|p| p.join("fundgate"))
    }

    /// Get path to global config file
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    /// Get path to project config file
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(PROJECT_CONFIG_FILE)
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Show config file paths
    pub fn show_path() {
        println!("Configuration paths:");
        println!();

        if let Some(global) = Self::global_config_path() {
            let exists = if global.exists() { "✓" } else { "✗" };
            println!("  Global:  {} {}", exists, global.display());
        } else {
            println!("  Global:  (not available)");
        }

        let project = Self::project_config_path();
        let exists = if project.exists() { "✓" } else { "✗" };
        println!("  Project: {} {}", exists, project.display());
        println!("  Env:     {}*  (e.g. {}BUDGET__DAILY_CAP)", ENV_PREFIX, ENV_PREFIX);
    }

    /// Render a configuration as TOML or JSON. The API key is never included.
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| GatewayError::Config(e.to_string()))
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write a commented starter config. Existing files are kept unless `force`.
    pub fn init(path: &Path, force: bool) -> Result<bool> {
        if path.exists() && !force {
            info!("Config exists: {}", path.display());
            return Ok(false);
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, Self::default_config())?;
        info!("Created config: {}", path.display());
        Ok(true)
    }

    /// Generate default config content (TOML)
    fn default_config() -> String {
        r#"# fundgate configuration
# Layering: defaults < ~/.config/fundgate/config.toml < ./fundgate.toml < FUNDGATE_* env

version = "1.0"

[provider]
provider = "anthropic"
model = "claude-sonnet-4-5"
max_tokens = 4096
timeout_secs = 120
# api_key is read from ANTHROPIC_API_KEY when unset

[rate_limit]
max_requests = 50
window_ms = 60000
# [rate_limit.per_conversation]
# max_requests = 10
# window_ms = 60000

[budget]
daily_cap = 50000.0
warning_ratio = 0.8

[circuit_breaker]
failure_threshold = 5
failure_window_ms = 60000
open_timeout_ms = 30000
half_open_max_concurrent = 1
trip_on = ["server_error", "unavailable", "overloaded", "connection", "timeout"]

[retry]
max_retries = 3
base_delay_ms = 1000

[cost]
input_per_thousand = 4.5
output_per_thousand = 22.5

[store]
backend = "memory"
# backend = "redis"
# url = "redis://127.0.0.1:6379"
key_prefix = "fundgate"
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreBackend;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_without_files() {
        let temp_dir = TempDir::new().unwrap();
        let config =
            ConfigLoader::load_layers(None, &temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.rate_limit.max_requests, 50);
    }

    #[test]
    fn test_project_overrides_global() {
        let temp_dir = TempDir::new().unwrap();
        let global = temp_dir.path().join("global.toml");
        let project = temp_dir.path().join("fundgate.toml");
        fs::write(&global, "[budget]\ndaily_cap = 100.0\nwarning_ratio = 0.5\n").unwrap();
        fs::write(&project, "[budget]\ndaily_cap = 250.0\n").unwrap();

        let config = ConfigLoader::load_layers(Some(&global), &project).unwrap();
        assert_eq!(config.budget.daily_cap, 250.0);
        assert_eq!(config.budget.warning_ratio, 0.5);
    }

    #[test]
    fn test_invalid_file_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("fundgate.toml");
        fs::write(&path, "[rate_limit]\nmax_requests = 0\n").unwrap();
        assert!(matches!(
            ConfigLoader::load_from_file(&path),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_init_writes_loadable_config() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/fundgate.toml");

        assert!(ConfigLoader::init(&path, false).unwrap());
        assert!(!ConfigLoader::init(&path, false).unwrap());

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.circuit_breaker.trip_on.len(), 5);
        assert_eq!(config.provider.model, "claude-sonnet-4-5");
    }

    #[test]
    fn test_render_omits_api_key() {
        let mut config = Config::default();
        config.provider.api_key = Some("sk-hidden".into());
        assert!(!ConfigLoader::render(&config, false).unwrap().contains("sk-hidden"));
        assert!(!ConfigLoader::render(&config, true).unwrap().contains("sk-hidden"));
    }

    #[test]
    fn test_env_override() {
        // SAFETY: no other test reads this variable
        unsafe {
            std::env::set_var("FUNDGATE_RETRY__MAX_RETRIES", "7");
        }
        let temp_dir = TempDir::new().unwrap();
        let config =
            ConfigLoader::load_layers(None, &temp_dir.path().join("missing.toml")).unwrap();
        unsafe {
            std::env::remove_var("FUNDGATE_RETRY__MAX_RETRIES");
        }
        assert_eq!(config.retry.max_retries, 7);
    }
}

//! Config Command
//!
//! Manage fundgate configuration.
//!
//! Usage:
//!   fundgate config show [-f json]
//!   fundgate config path
//!   fundgate config init [-g] [--force]

use std::path::Path;

use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::types::{GatewayError, Result};

/// Show the effective configuration (merged from all sources)
pub fn show(config_path: Option<&Path>, format: &str) -> Result<()> {
    let config = match config_path {
        Some(path) => ConfigLoader::load_with_file(path)?,
        None => ConfigLoader::load()?,
    };
    println!("{}", ConfigLoader::render(&config, format == "json")?);
    Ok(())
}

/// Show configuration paths
pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

/// Write a starter config to the global or project location
pub fn init(global: bool, force: bool) -> Result<()> {
    let path = if global {
        ConfigLoader::global_config_path().ok_or_else(|| {
            GatewayError::Config("Cannot determine global config path".to_string())
        })?
    } else {
        ConfigLoader::project_config_path()
    };

    let out = Output::new();
    if ConfigLoader::init(&path, force)? {
        out.success(&format!("Initialized configuration: {}", path.display()));
    } else {
        out.warning(&format!(
            "Config already exists: {} (use --force to overwrite)",
            path.display()
        ));
    }
    Ok(())
}

//! Config command

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use tessera_core::{HierarchicalConfigLoader, ResilienceConfig};

use crate::cli::{ConfigCommands, ConfigShowArgs};
use crate::output;

pub async fn run(cmd: ConfigCommands, config_dir: Option<Utf8PathBuf>) -> Result<()> {
    match cmd {
        ConfigCommands::Show(args) => show(args, config_dir),
    }
}

fn loader(config_dir: Option<Utf8PathBuf>) -> Result<HierarchicalConfigLoader> {
    match config_dir {
        Some(dir) => Ok(HierarchicalConfigLoader::with_dir(dir)),
        None => HierarchicalConfigLoader::new().context("Failed to locate config directory"),
    }
}

/// Resolve the configuration the client would run with
pub fn resolve(defaults_only: bool, config_dir: Option<Utf8PathBuf>) -> Result<ResilienceConfig> {
    if defaults_only {
        return HierarchicalConfigLoader::load_defaults().context("Failed to load embedded defaults");
    }

    let loader = loader(config_dir)?;
    let config = loader
        .load()
        .with_context(|| format!("Failed to load configuration from {}", loader.config_dir()))?;
    tracing::debug!(path = %loader.user_config_path(), "resolved resilience configuration");
    Ok(config)
}

fn show(args: ConfigShowArgs, config_dir: Option<Utf8PathBuf>) -> Result<()> {
    let config = resolve(args.defaults, config_dir)?;

    if args.json {
        output::json(&config)?;
    } else {
        let yaml = serde_yaml_ng::to_string(&config)?;
        println!("{}", yaml);
    }

    Ok(())
}

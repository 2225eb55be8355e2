//! Config command handlers

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use url::Url;

use patron_core::Config;

use crate::output::{Output, OutputFormat};

fn display_path(path: Option<&PathBuf>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

/// Show current configuration
pub fn show(config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "profiles_mode": config.profiles_mode.to_string(),
                    "providers_file": config.providers_file,
                    "default_provider": config.default_provider,
                    "max_concurrent_downloads": config.max_concurrent_downloads,
                    "http_timeout_secs": config.http_timeout_secs,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:                 {}", config.data_dir.display());
            println!("  profiles_mode:            {}", config.profiles_mode);
            println!(
                "  providers_file:           {}",
                display_path(config.providers_file.as_ref())
            );
            println!(
                "  default_provider:         {}",
                config
                    .default_provider
                    .as_ref()
                    .map(Url::to_string)
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!(
                "  max_concurrent_downloads: {}",
                config.max_concurrent_downloads
            );
            println!("  http_timeout_secs:        {}", config.http_timeout_secs);
            println!(
                "  log_file:                 {}",
                display_path(config.log_file.as_ref())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(
    key: String,
    value: String,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    let unset = value.is_empty() || value == "none";
    match key.as_str() {
        "data_dir" => {
            config.data_dir = value.clone().into();
        }
        "profiles_mode" => {
            config.profiles_mode = value
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))
                .context("Invalid value for profiles_mode. Use 'anonymous' or 'multi'.")?;
        }
        "providers_file" => {
            config.providers_file = if unset {
                None
            } else {
                Some(value.clone().into())
            };
        }
        "default_provider" => {
            config.default_provider = if unset {
                None
            } else {
                Some(Url::parse(&value).context("Invalid value for default_provider")?)
            };
        }
        "max_concurrent_downloads" => {
            let n: usize = value
                .parse()
                .context("Invalid value for max_concurrent_downloads")?;
            if n == 0 {
                bail!("max_concurrent_downloads must be at least 1");
            }
            config.max_concurrent_downloads = n;
        }
        "http_timeout_secs" => {
            config.http_timeout_secs = value
                .parse()
                .context("Invalid value for http_timeout_secs")?;
        }
        "log_file" => {
            config.log_file = if unset {
                None
            } else {
                Some(value.clone().into())
            };
        }
        _ => {
            bail!(
                "Unknown configuration key: '{}'\n\
                 Valid keys: data_dir, profiles_mode, providers_file, default_provider, \
                 max_concurrent_downloads, http_timeout_secs, log_file",
                key
            );
        }
    }

    // Save to the CLI-specified path or default
    let save_path = config_path
        .cloned()
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));

    Ok(())
}

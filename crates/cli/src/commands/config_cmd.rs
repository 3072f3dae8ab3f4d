//! `parley config`: Show the effective configuration.

use anyhow::Context;
use parley_config::AppConfig;

const REDACTED: &str = "[redacted]";

pub fn run(default: bool) -> anyhow::Result<()> {
    if default {
        print!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let path = AppConfig::config_path();
    let config = AppConfig::load().context("Failed to load config")?;
    let toml_str = toml::to_string_pretty(&redacted(config))?;

    println!("# {}", path.display());
    if !path.exists() {
        println!("# (file not found, showing defaults plus environment overrides)");
    }
    println!("{toml_str}");
    Ok(())
}

/// Secrets replaced so the output can be pasted into a bug report.
fn redacted(mut config: AppConfig) -> AppConfig {
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    if config.search.youtube_api_key.is_some() {
        config.search.youtube_api_key = Some(REDACTED.into());
    }
    config
}

//! `parley doctor`: Diagnose configuration, storage, and upstream health.

use parley_config::{AppConfig, StoreBackend};

pub async fn run() -> anyhow::Result<()> {
    println!("parley doctor");
    println!("=============\n");

    let mut issues = 0;

    let config_path = AppConfig::config_path();
    if config_path.exists() {
        println!("  ok    Config file found at {}", config_path.display());
    } else {
        println!("  warn  No config file at {} (using defaults)", config_path.display());
        println!("        Create one with `parley config --default > {}`", config_path.display());
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ok    Configuration valid");
            config
        }
        Err(e) => {
            println!("  FAIL  Configuration invalid: {e}");
            println!("\n  1 issue found; fix the config before running other checks.");
            return Ok(());
        }
    };

    match config.store.backend {
        StoreBackend::Memory => println!("  warn  In-memory store; conversations are lost on restart"),
        StoreBackend::Sqlite => match parley_store::open_from_config(&config).await {
            Ok(store) => println!(
                "  ok    {} store at {}",
                store.name(),
                config.store.resolved_path().display()
            ),
            Err(e) => {
                println!("  FAIL  Store unavailable: {e}");
                issues += 1;
            }
        },
    }

    if !config.has_api_key() {
        println!("  FAIL  No API key configured (set PARLEY_API_KEY or OPENAI_API_KEY)");
        issues += 1;
    } else {
        println!("  ok    API key configured");
        let provider = parley_providers::build_from_config(&config);
        match provider.health_check().await {
            Ok(true) => println!("  ok    Upstream {} reachable at {}", provider.name(), config.api_url),
            Ok(false) => {
                println!("  FAIL  Upstream {} unhealthy at {}", provider.name(), config.api_url);
                issues += 1;
            }
            Err(e) => {
                println!("  FAIL  Upstream check failed: {e}");
                issues += 1;
            }
        }
        match provider.list_models().await {
            Ok(models) if models.iter().any(|m| m == &config.default_model) => {
                println!("  ok    Default model {} available", config.default_model);
            }
            Ok(models) => {
                println!(
                    "  warn  Default model {} not among {} listed model(s)",
                    config.default_model,
                    models.len()
                );
            }
            Err(e) => println!("  warn  Could not list models: {e}"),
        }
    }

    let search = parley_providers::build_search_from_config(&config);
    println!("  ok    Web search backend: {}", search.web.name());
    println!("  ok    Video search backend: {}", search.video.name());

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}

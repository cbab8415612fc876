//! `parley config`: Configuration commands.

use parley_config::AppConfig;

const MASK: &str = "********";

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Provider:  {}", config.default_provider);
            println!("   Model:     {}", config.default_model);
            println!("   Gateway:   {}:{}", config.gateway.host, config.gateway.port);
            println!("   Context:   {}", config.context.backend);
            println!("   Agents:    {}", config.agents.len());
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

/// Problems that do not stop the gateway but will bite later.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set PARLEY_API_KEY, OPENROUTER_API_KEY or OPENAI_API_KEY)");
    }
    if config.context.backend == "http" && config.context.api_key.is_none() {
        warnings.push("HTTP context backend without an API key (set PARLEY_CONTEXT_API_KEY)");
    }
    if config.agents.iter().any(|a| a.proactive.enabled && a.proactive.interval_secs < 5) {
        warnings.push("A proactive interval under 5s will call the model very often");
    }
    warnings
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&masked(config))?;
    println!("{toml_str}");
    Ok(())
}

fn masked(mut config: AppConfig) -> AppConfig {
    let mask = |key: &mut Option<String>| {
        if key.is_some() {
            *key = Some(MASK.to_string());
        }
    };
    mask(&mut config.api_key);
    mask(&mut config.context.api_key);
    for provider in config.providers.values_mut() {
        mask(&mut provider.api_key);
    }
    config
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_path().display());
    Ok(())
}

//! `openorca config`: configuration management commands.

use anyhow::Context;
use openorca_config::AppConfig;

pub fn validate() -> anyhow::Result<()> {
    println!("Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   Warning: {w}");
        }
    }

    println!();
    println!("   Endpoint:     {}", config.provider.api_url);
    println!("   Model:        {}", config.provider.model);
    println!("   Context:      {} tokens", config.provider.context_window);
    println!(
        "   Tool calls:   {}",
        if config.agent.native_tool_calling { "native" } else { "text" }
    );
    println!("   Iterations:   {}", config.agent.max_iterations);
    Ok(())
}

/// Settings that load fine but are probably mistakes.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    let url = &config.provider.api_url;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        warnings.push("provider.api_url should start with http:// or https://");
    }
    if url.starts_with("https://") && !config.has_api_key() {
        warnings.push("Remote endpoint without an API key (set OPENORCA_API_KEY)");
    }
    if config.provider.max_tokens as usize >= config.provider.context_window {
        warnings.push("provider.max_tokens leaves no room for the conversation");
    }
    if config.agent.plan_mode && config.agent.sandbox_mode {
        warnings.push("plan_mode already blocks everything sandbox_mode blocks");
    }
    warnings
}

pub fn show() -> anyhow::Result<()> {
    let config = redacted(AppConfig::load().context("Failed to load config")?);
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

fn redacted(mut config: AppConfig) -> AppConfig {
    if config.provider.api_key.is_some() {
        config.provider.api_key = Some("[REDACTED]".into());
    }
    config
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

pub fn init(force: bool) -> anyhow::Result<()> {
    let dir = AppConfig::config_dir();
    let path = dir.join("config.toml");
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    std::fs::write(&path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn default_config_has_no_warnings() {
        assert!(warnings(&AppConfig::default()).is_empty());
    }

    #[test]
    fn warns_about_remote_endpoint_without_key() {
        let mut config = AppConfig::default();
        config.provider.api_url = "https://api.example.com/v1".into();
        assert_eq!(warnings(&config).len(), 1);
    }

    #[test]
    fn show_redacts_api_key() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        let rendered = toml::to_string_pretty(&redacted(config)).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}

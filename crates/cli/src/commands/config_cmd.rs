//! `steward config`: print the effective configuration.

use anyhow::Context;
use steward_config::AppConfig;

pub fn show() -> anyhow::Result<()> {
    let config = AppConfig::load().context("failed to load config")?;
    println!("{}", render(&config)?);
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

/// TOML rendering with the API key masked.
fn render(config: &AppConfig) -> anyhow::Result<String> {
    let mut shown = config.clone();
    if shown.api_key.is_some() {
        shown.api_key = Some("[REDACTED]".into());
    }
    Ok(toml::to_string_pretty(&shown)?)
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
    fn api_key_is_masked() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-secret".into());
        let rendered = render(&config).unwrap();
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(rendered.contains("[engine]"));
    }
}

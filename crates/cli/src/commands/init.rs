//! `steward init`: write the default configuration.

use anyhow::Context;
use std::path::Path;
use steward_config::AppConfig;

pub fn run(force: bool) -> anyhow::Result<()> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    let written = write_default(&config_path, force)?;

    if written {
        println!("Created config at {}", config_path.display());
        println!("Set STEWARD_API_KEY or add api_key to the file before running the agent.");
    } else {
        println!("Config already exists at {}", config_path.display());
        println!("Edit it manually or re-run with --force to overwrite.");
    }
    Ok(())
}

/// Write the default config to `path` unless it exists. Returns whether it wrote.
fn write_default(path: &Path, force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating config directory {}", dir.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_once_unless_forced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        assert!(write_default(&path, false).unwrap());
        std::fs::write(&path, "# edited").unwrap();
        assert!(!write_default(&path, false).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# edited");

        assert!(write_default(&path, true).unwrap());
        let written = AppConfig::load_from(&path).unwrap();
        assert_eq!(written.engine.max_iterations, 10);
    }
}

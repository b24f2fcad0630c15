//! Configuration bootstrap: `docforge init`.

use std::path::Path;

use anyhow::{Context, Result};
use docforge::config::{Config, expand_home};

pub fn cmd_init(config_path: &Path, base_dir: &Path) -> Result<()> {
    let config_path = expand_home(config_path);
    if config_path.exists() {
        println!(
            "{} {} already exists, leaving it untouched.",
            console::style("Skipped:").yellow(),
            config_path.display()
        );
        return Ok(());
    }

    let base_dir = expand_home(base_dir);
    let base_dir = if base_dir.is_relative() {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(base_dir)
    } else {
        base_dir
    };

    let config = Config::new(&base_dir);
    config.validate()?;
    for dir in [
        base_dir.clone(),
        config.docs_dir(),
        config.nginx_dir(),
        config.log_dir(),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    config.save(&config_path)?;

    println!(
        "{} {}",
        console::style("Created").green().bold(),
        config_path.display()
    );
    println!("  base_dir = {}", base_dir.display());
    println!();
    println!(
        "Point nginx at {}/*.conf and set build.command to your builder script.",
        config.nginx_dir().display()
    );
    Ok(())
}

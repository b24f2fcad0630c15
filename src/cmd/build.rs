//! Foreground build: `docforge build`.

use std::sync::Arc;

use anyhow::Result;
use console::style;
use docforge::builder::{BuildExecutor, BuildOutcome};
use docforge::config::Config;
use docforge::hub::MessageHub;
use docforge::proxy::NginxConfigurator;
use docforge::registry::{Actor, Registry, RegistryHandle};

pub async fn cmd_build(config: &Config, name: &str, branch: &str) -> Result<()> {
    let registry = RegistryHandle::new(Registry::new(
        config,
        Arc::new(NginxConfigurator::new(config)),
    ));
    let executor = BuildExecutor::new(config, registry, Arc::new(MessageHub::new()));

    let outcome = executor
        .run(name, branch, Actor::Cli, |line| println!("{}", line))
        .await;

    match outcome {
        BuildOutcome::Succeeded { elapsed } => {
            println!(
                "{} {} in {}s",
                style("Build succeeded:").green().bold(),
                name,
                elapsed
            );
            Ok(())
        }
        BuildOutcome::Failed => {
            eprintln!("{} {}", style("Build failed:").red().bold(), name);
            anyhow::bail!("build of '{}' failed", name)
        }
        BuildOutcome::NotFound => anyhow::bail!("Project '{}' not found", name),
    }
}

//! Project management commands: `docforge project ...`.

use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use docforge::config::Config;
use docforge::errors::RegistryError;
use docforge::proxy::NginxConfigurator;
use docforge::registry::{BuildStatus, ProjectRecord, Registry, transfer};

use super::super::{ProjectCommands, TransferCommands};

fn open_registry(config: &Config) -> Registry {
    Registry::new(config, Arc::new(NginxConfigurator::new(config)))
}

pub fn cmd_project(config: &Config, command: ProjectCommands) -> Result<()> {
    let registry = open_registry(config);

    match command {
        ProjectCommands::Create { name, url, options } => {
            let record = registry.create(&name, &url, options.into_fields(None))?;
            println!(
                "{} project {} ({})",
                style("Created").green().bold(),
                style(&record.name).bold(),
                record.generated_domain
            );
        }
        ProjectCommands::Update { name, url, options } => {
            let fields = options.into_fields(url);
            if fields.is_empty() {
                println!("Nothing to update.");
                return Ok(());
            }
            match registry.update(&name, fields)? {
                Some(record) => println!(
                    "{} project {}",
                    style("Updated").green().bold(),
                    style(&record.name).bold()
                ),
                None => anyhow::bail!("Project '{}' not found", name),
            }
        }
        ProjectCommands::Get { name, json } => {
            let record = registry
                .get(&name)?
                .with_context(|| format!("Project '{}' not found", name))?;
            if json {
                let mut doc = serde_json::Map::new();
                doc.insert(record.name.clone(), serde_json::to_value(&record)?);
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                print_record(&record);
            }
        }
        ProjectCommands::List => {
            let records = registry.list()?;
            if records.is_empty() {
                println!("No projects registered.");
                return Ok(());
            }
            for record in &records {
                println!(
                    "{} {:<10} {} {}",
                    style(format!("{:<24}", record.name)).bold(),
                    record.latest,
                    status_label(record),
                    record.url
                );
            }
        }
        ProjectCommands::Remove { name, yes } => {
            if !registry.has(&name)? {
                anyhow::bail!("Project '{}' not found", name);
            }
            if !yes {
                let confirm = dialoguer::Confirm::new()
                    .with_prompt(format!(
                        "Remove project '{}' together with its built docs?",
                        name
                    ))
                    .default(false)
                    .interact()
                    .unwrap_or(false);

                if !confirm {
                    println!("Removal cancelled.");
                    return Ok(());
                }
            }
            registry.remove(&name)?;
            println!("{} project {}", style("Removed").green().bold(), name);
        }
        ProjectCommands::Transfer { command } => cmd_transfer(&registry, command)?,
    }

    Ok(())
}

fn cmd_transfer(registry: &Registry, command: TransferCommands) -> Result<()> {
    match command {
        TransferCommands::Export { name, with_builds } => {
            println!("{}", registry.export(&name, with_builds)?);
        }
        TransferCommands::Import { data, show: true, .. } => {
            let payload = transfer::decode_payload(&data)?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        TransferCommands::Import { data, name, show: false } => {
            let record = match registry.import(&data, name.as_deref()) {
                Ok(record) => record,
                Err(e @ RegistryError::AlreadyExists { .. }) => anyhow::bail!(
                    "{}; import it under another name: docforge project transfer import <DATA> <NAME>",
                    e
                ),
                Err(e) => return Err(e.into()),
            };
            println!(
                "{} project {} ({})",
                style("Imported").green().bold(),
                style(&record.name).bold(),
                record.generated_domain
            );
        }
    }
    Ok(())
}

fn status_label(record: &ProjectRecord) -> String {
    let status = record.status_of(&record.latest);
    let label = style(format!("{:<8}", status.as_str()));
    match status {
        BuildStatus::Passing => label.green().to_string(),
        BuildStatus::Failing => label.red().to_string(),
        BuildStatus::Unknown => label.dim().to_string(),
    }
}

fn print_record(record: &ProjectRecord) {
    println!();
    println!("{}", style(&record.name).bold().cyan());
    println!("  url:              {}", record.url);
    println!("  latest:           {}", record.latest);
    println!("  domain:           {}", record.generated_domain);
    if let Some(domain) = &record.custom_domain {
        let tls = if record.ssl.enabled { " (ssl)" } else { "" };
        println!("  custom domain:    {}{}", domain, tls);
    }
    println!("  languages:        {}", record.languages.join(", "));
    println!("  default language: {}", record.default_language);
    println!("  sourcedir:        {}", record.sourcedir);
    println!("  builder:          {}", record.builder.as_str());
    println!("  single:           {}", record.single);
    println!("  source:           {} / {}", record.source_type.as_str(), record.provider.as_str());
    if record.secret.is_some() {
        println!("  secret:           set");
    }
    if !record.excluded_branches.is_empty() {
        println!("  excluded:         {}", record.excluded_branches.join(", "));
    }
    if let Some(hook) = &record.before_hook {
        println!("  before hook:      {}", hook);
    }
    if let Some(hook) = &record.after_hook {
        println!("  after hook:       {}", hook);
    }
    if !record.builds.is_empty() {
        println!();
        println!("  Builds:");
        for (branch, result) in record.builds.iter() {
            println!(
                "    {:<16} {:<8} {}s  {} by {}",
                branch,
                result.status.as_str(),
                result.usedtime,
                result.btime,
                result.sender
            );
        }
    }
    println!();
}

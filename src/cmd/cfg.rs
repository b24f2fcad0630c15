//! Configuration lookup: `docforge cfg [SECTION] [KEY]`.

use anyhow::Result;
use console::style;
use docforge::config::Config;
use serde_json::Value;

pub fn cmd_cfg(config: &Config, section: Option<&str>, key: Option<&str>, json: bool) -> Result<()> {
    let Some(value) = config.query(section, key)? else {
        match key {
            Some(key) => anyhow::bail!(
                "No key '{}' in section [{}]",
                key,
                section.unwrap_or_default()
            ),
            None => anyhow::bail!("No section [{}]", section.unwrap_or_default()),
        }
    };

    if json {
        println!("{}", serde_json::to_string(&value)?);
        return Ok(());
    }

    match (section, &value) {
        (None, Value::Object(sections)) => {
            for (name, values) in sections {
                println!("{}", style(format!("[{}]", name)).bold());
                print_section(values);
                println!();
            }
        }
        (Some(_), Value::Object(_)) if key.is_none() => print_section(&value),
        _ => println!("{}", scalar(&value)),
    }
    Ok(())
}

fn print_section(values: &Value) {
    if let Value::Object(map) = values {
        for (key, value) in map {
            println!("{} = {}", key, scalar(value));
        }
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

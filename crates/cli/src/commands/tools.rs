//! `stockchat tools`: print the tool catalogue sent to the model.

use std::path::Path;

use super::{CliResult, build_registry, load_config, open_store};

pub async fn run(config_path: Option<&Path>) -> CliResult {
    let config = load_config(config_path)?;
    let registry = build_registry(open_store(&config).await?, &config);

    println!("{} tools declared:\n", registry.len());
    for def in registry.list_definitions() {
        println!("  {}", def.name);
        println!("    {}", def.description);
        for param in &def.parameters {
            let kind = serde_json::to_value(param.kind)?;
            let mut line = format!(
                "    - {} ({}{})",
                param.name,
                kind.as_str().unwrap_or("?"),
                if param.required { ", required" } else { "" }
            );
            if let Some(default) = &param.default {
                line.push_str(&format!(", default {default}"));
            }
            println!("{line}: {}", param.description);
        }
        println!();
    }
    Ok(())
}

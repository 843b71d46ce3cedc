//! Collections command - list the remote groupings of a source

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::args::CollectionsArgs;
use crate::commands::{build_source, selected_sources};
use crate::config::AppConfig;

pub async fn execute(args: CollectionsArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = AppConfig::load(config_path.as_deref())?;
    let names = selected_sources(args.source.as_deref(), &config)?;
    let name = names[0];

    let source = build_source(name, &config)?;
    let groups = source
        .list_groups()
        .await
        .with_context(|| format!("Failed to list {} collections", name))?;

    if args.json {
        let output = serde_json::json!({
            "source": name,
            "count": groups.len(),
            "collections": groups,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Collections in {} ({} found)", name, groups.len());
    println!("==============");
    println!();
    for group in &groups {
        println!("{}", group.label);
        println!("  ID: {}", group.id);
    }

    Ok(())
}

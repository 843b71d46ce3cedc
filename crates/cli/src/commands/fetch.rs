//! Fetch command - pull new articles from the configured sources

use anyhow::{Result, bail};
use articles2kindle_domain::usecases::{IngestOptions, IngestReport};
use std::path::PathBuf;

use crate::args::FetchArgs;
use crate::commands::{App, build_source, selected_sources};

pub async fn execute(args: FetchArgs, config_path: Option<PathBuf>) -> Result<()> {
    let app = App::open(config_path).await?;
    let names = selected_sources(args.source.as_deref(), &app.config)?;

    let options = IngestOptions {
        full: args.full,
        count: args.count,
    };
    let failed = fetch_sources(&app, &names, options).await;

    if !failed.is_empty() {
        bail!("Fetch failed for: {}", failed.join(", "));
    }
    Ok(())
}

/// Ingest every named source in turn, printing one line per source.
///
/// A failing source never stops the others; the names of failed sources
/// are returned.
pub(crate) async fn fetch_sources(
    app: &App,
    names: &[&'static str],
    options: IngestOptions,
) -> Vec<&'static str> {
    let ingestor = app.ingestor();
    let mut failed = Vec::new();

    for name in names {
        let source = match build_source(name, &app.config) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("✗ {}: {:#}", name, e);
                failed.push(*name);
                continue;
            }
        };

        match ingestor.run(source.as_ref(), options).await {
            Ok(report) => print_report(&report),
            Err(e) => {
                tracing::error!(source = %name, error = %e, "Fetch failed");
                eprintln!("✗ {}: {}", name, e);
                failed.push(*name);
            }
        }
    }

    failed
}

fn print_report(report: &IngestReport) {
    let since = match report.newer_than {
        Some(at) => format!(" since {}", at.date()),
        None => String::new(),
    };
    println!(
        "✓ {}: fetched {}, {} new{}",
        report.source_name, report.fetched, report.new_articles, since
    );
}

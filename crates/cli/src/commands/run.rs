//! Run command - fetch, bundle every publication in a folder, then send

use anyhow::{Context, Result, bail};
use articles2kindle_domain::{ArticleStore, Bundle, BundleStore, GroupKey};
use articles2kindle_domain::usecases::IngestOptions;
use std::path::PathBuf;

use crate::args::RunArgs;
use crate::commands::bundle::print_committed;
use crate::commands::fetch::fetch_sources;
use crate::commands::send::send_many;
use crate::commands::{App, selected_sources};

pub async fn execute(args: RunArgs, config_path: Option<PathBuf>) -> Result<()> {
    let folder = args.folder.trim();
    if folder.is_empty() {
        bail!("--folder must not be empty");
    }

    let app = App::open(config_path).await?;
    // Fail on mail configuration before doing any work
    let recipients = app.recipients()?;
    let sender = app.sender()?;

    tracing::info!(folder = %folder, full = args.full, "Starting run");

    let names = selected_sources(None, &app.config)?;
    let failed = fetch_sources(
        &app,
        &names,
        IngestOptions {
            full: args.full,
            count: None,
        },
    )
    .await;
    if failed.len() == names.len() {
        bail!("Fetch failed for every source: {}", failed.join(", "));
    }

    let publications = app
        .store
        .publications_tagged(folder)
        .await
        .context("Failed to look up folder publications")?;
    if publications.is_empty() {
        println!("No publications found in folder '{}'", folder);
        return finish(&failed, 0);
    }

    let groups: Vec<GroupKey> = publications.into_iter().map(GroupKey::publication).collect();
    let outcomes = app.bundler(args.with_images).bundle_groups(&groups).await;

    let mut new_ids = Vec::new();
    let mut bundle_failures = 0;
    for (group, outcome) in &outcomes {
        match outcome {
            Ok(committed) => {
                for bundle in committed {
                    print_committed(bundle);
                    new_ids.push(bundle.bundle_id);
                }
            }
            Err(failure) => {
                bundle_failures += 1;
                eprintln!("✗ {}: {}", group, failure);
                // Parts committed before the failure are still delivered
                for bundle in &failure.committed {
                    print_committed(bundle);
                    new_ids.push(bundle.bundle_id);
                }
            }
        }
    }

    sender.cleanup_stale().await?;

    let mut bundles: Vec<Bundle> = Vec::with_capacity(new_ids.len());
    for id in new_ids {
        if let Some(bundle) = app.store.get_bundle(id).await? {
            bundles.push(bundle);
        }
    }

    if bundles.is_empty() {
        println!("Nothing new to send");
    } else {
        send_many(&sender, &bundles, &recipients).await?;
    }

    finish(&failed, bundle_failures)
}

/// Every exit path of a run reports source and group failures
fn finish(failed_sources: &[&str], bundle_failures: usize) -> Result<()> {
    if !failed_sources.is_empty() || bundle_failures > 0 {
        bail!(
            "Run finished with errors ({} source(s) failed: {}; {} group(s) failed)",
            failed_sources.len(),
            failed_sources.join(", "),
            bundle_failures
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_reports_source_failures_without_groups() {
        let err = finish(&["substack"], 0).unwrap_err();
        assert!(err.to_string().contains("substack"));
        assert!(finish(&[], 0).is_ok());
        assert!(finish(&[], 2).is_err());
    }
}

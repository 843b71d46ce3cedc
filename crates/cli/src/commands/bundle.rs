//! Bundle command - assemble unbundled articles into EPUBs

use anyhow::{Context, Result, bail};
use articles2kindle_domain::usecases::{BundleFailure, CommittedBundle};
use articles2kindle_domain::{ArticleStore, GroupKey};
use std::path::PathBuf;

use crate::args::BundleArgs;
use crate::commands::{App, size_label};

pub async fn execute(args: BundleArgs, config_path: Option<PathBuf>) -> Result<()> {
    if args.all {
        let app = App::open(config_path).await?;
        return bundle_all(&app, args.with_images).await;
    }

    let group = match (args.publication.as_deref(), args.author.as_deref()) {
        (Some(publication), _) => GroupKey::publication(publication.trim()),
        (None, Some(author)) => GroupKey::author(author),
        (None, None) => bail!("Pass --publication, --author or --all"),
    };
    if group.label().is_empty() {
        bail!("Group name must not be empty");
    }

    let app = App::open(config_path).await?;
    let bundler = app.bundler(args.with_images);

    let group = bundler.resolve(&group).await?;
    let committed = match bundler.bundle_group(&group, args.title.as_deref()).await {
        Ok(committed) => committed,
        Err(BundleFailure { committed, error }) => {
            for bundle in &committed {
                print_committed(bundle);
            }
            return Err(error.into());
        }
    };

    if committed.is_empty() {
        println!("No unbundled articles for {}", group);
        return Ok(());
    }

    for bundle in &committed {
        print_committed(bundle);
    }
    if committed.len() > 1 {
        println!();
        println!("Split into {} parts", committed.len());
    }

    Ok(())
}

/// Bundle every publication with unbundled articles, largest backlog first
async fn bundle_all(app: &App, with_images: bool) -> Result<()> {
    let mut publications = app
        .store
        .list_publications()
        .await
        .context("Failed to list publications")?;
    publications.retain(|p| p.unbundled_count > 0);
    publications.sort_by(|a, b| b.unbundled_count.cmp(&a.unbundled_count));

    if publications.is_empty() {
        println!("No unbundled articles");
        return Ok(());
    }

    let groups: Vec<GroupKey> = publications
        .into_iter()
        .map(|p| GroupKey::publication(p.publication_name))
        .collect();
    let outcomes = app.bundler(with_images).bundle_groups(&groups).await;

    let mut failures = 0;
    for (group, outcome) in &outcomes {
        match outcome {
            Ok(committed) => {
                println!("✓ {}: {} bundle(s)", group, committed.len());
                for bundle in committed {
                    print_committed(bundle);
                }
            }
            Err(failure) => {
                failures += 1;
                eprintln!("✗ {}: {}", group, failure);
                for bundle in &failure.committed {
                    print_committed(bundle);
                }
            }
        }
    }

    println!();
    println!(
        "{} of {} publication(s) bundled",
        outcomes.len() - failures,
        outcomes.len()
    );
    if failures > 0 {
        bail!(
            "{} of {} publication(s) failed to bundle",
            failures,
            outcomes.len()
        );
    }
    Ok(())
}

pub(crate) fn print_committed(bundle: &CommittedBundle) {
    println!(
        "✓ [{}] {} ({} articles, {})",
        bundle.bundle_id,
        bundle.title,
        bundle.article_count,
        size_label(bundle.file_size)
    );
    println!("  {}", bundle.file_path.display());
    if bundle.oversize {
        println!("  ⚠ A single article exceeds the bundle size limit; kept as its own bundle");
    }
}

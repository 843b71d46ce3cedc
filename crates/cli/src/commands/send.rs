//! Send command - mail bundles to the configured Kindle addresses

use anyhow::{Result, bail};
use articles2kindle_domain::Bundle;
use std::path::PathBuf;

use crate::args::SendArgs;
use crate::commands::{App, Sender, size_label};

pub async fn execute(args: SendArgs, config_path: Option<PathBuf>) -> Result<()> {
    let app = App::open(config_path).await?;
    let recipients = app.recipients()?;
    let sender = app.sender()?;

    let removed = sender.cleanup_stale().await?;
    if removed > 0 {
        println!("Removed {} bundle(s) whose file no longer exists", removed);
    }

    if let Some(id) = args.bundle {
        let bundle = sender.send_by_id(id, &recipients).await?;
        print_sent(&bundle, &recipients);
        return Ok(());
    }

    if args.all {
        let bundles = sender.unsent().await?;
        if bundles.is_empty() {
            println!("No unsent bundles");
            return Ok(());
        }
        return send_many(&sender, &bundles, &recipients).await;
    }

    match sender.latest_unsent().await? {
        Some(bundle) => {
            sender.send(&bundle, &recipients).await?;
            print_sent(&bundle, &recipients);
        }
        None => println!("No unsent bundles"),
    }

    Ok(())
}

/// Send every bundle, reporting each; fails if any did
pub(crate) async fn send_many(
    sender: &Sender,
    bundles: &[Bundle],
    recipients: &[String],
) -> Result<()> {
    let outcomes = sender.send_all(bundles, recipients).await;

    let mut failures = 0;
    for (bundle, (_, outcome)) in bundles.iter().zip(&outcomes) {
        match outcome {
            Ok(to) => print_sent(bundle, to),
            Err(e) => {
                failures += 1;
                eprintln!("✗ [{}] {}: {}", bundle.id, bundle.title, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} bundle(s) failed to send", failures, outcomes.len());
    }
    Ok(())
}

fn print_sent(bundle: &Bundle, recipients: &[String]) {
    println!(
        "✓ Sent [{}] {} ({}) to {}",
        bundle.id,
        bundle.title,
        size_label(bundle.file_size),
        recipients.join(", ")
    );
}

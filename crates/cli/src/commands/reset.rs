//! Reset command - make every article eligible for bundling again

use anyhow::{Context, Result, bail};
use articles2kindle_domain::ArticleStore;
use std::path::PathBuf;

use crate::args::ResetArgs;
use crate::commands::App;

pub async fn execute(args: ResetArgs, config_path: Option<PathBuf>) -> Result<()> {
    if !args.yes {
        bail!("This marks every article as unbundled. Re-run with --yes to confirm.");
    }

    let app = App::open(config_path).await?;
    let changed = app
        .store
        .reset_bundled()
        .await
        .context("Failed to reset bundled flags")?;

    tracing::info!(changed, "Reset bundled articles");
    println!("Reset {} article(s) to unbundled", changed);
    Ok(())
}

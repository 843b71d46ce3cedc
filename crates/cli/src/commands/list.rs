//! List command - inspect stored articles, publications, authors and bundles

use anyhow::{Context, Result};
use articles2kindle_domain::{
    Article, ArticleFilter, ArticleStore, AuthorSummary, Bundle, BundleStore, PublicationSummary,
    naming::normalize_author,
};
use std::path::PathBuf;

use crate::args::{ListArgs, ListCommands};
use crate::commands::{App, size_label, truncate};

const TITLE_WIDTH: usize = 60;

pub async fn execute(args: ListArgs, config_path: Option<PathBuf>) -> Result<()> {
    let app = App::open(config_path).await?;

    match args.command {
        ListCommands::Articles {
            author,
            all,
            limit,
            json,
        } => {
            let filter = ArticleFilter {
                author: author.as_deref().and_then(normalize_author),
                unbundled_only: !all,
                limit: Some(limit),
            };
            let articles = app
                .store
                .list_articles(&filter)
                .await
                .context("Failed to list articles")?;
            list_articles(&articles, json)
        }
        ListCommands::Publications { json } => {
            let publications = app
                .store
                .list_publications()
                .await
                .context("Failed to list publications")?;
            list_publications(&publications, json)
        }
        ListCommands::Authors { json } => {
            let authors = app
                .store
                .list_authors()
                .await
                .context("Failed to list authors")?;
            list_authors(&authors, json)
        }
        ListCommands::Bundles { json } => {
            let bundles = app
                .store
                .list_bundles()
                .await
                .context("Failed to list bundles")?;
            list_bundles(&bundles, json)
        }
    }
}

fn list_articles(articles: &[Article], json: bool) -> Result<()> {
    if json {
        let output = serde_json::json!({
            "count": articles.len(),
            "articles": articles.iter().map(|a| serde_json::json!({
                "id": a.id,
                "source": a.source_name,
                "title": a.title,
                "author": a.author,
                "publication": a.publication_name,
                "url": a.url,
                "published_at": a.published_at.map(|t| t.to_string()),
                "word_count": a.word_count,
                "bundled": a.bundled,
            })).collect::<Vec<_>>()
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Articles ({} found)", articles.len());
    println!("==================");
    println!();

    for article in articles {
        let marker = if article.bundled { "*" } else { " " };
        println!(
            "{}{:>6}  {}",
            marker,
            article.id,
            truncate(&article.title, TITLE_WIDTH)
        );
        let mut details = Vec::new();
        if let Some(author) = &article.author {
            details.push(author.clone());
        }
        if let Some(publication) = &article.publication_name {
            details.push(publication.clone());
        }
        if let Some(published) = article.published_at {
            details.push(published.date().to_string());
        }
        if let Some(words) = article.word_count {
            details.push(format!("{} words", words));
        }
        println!("         {}", details.join(" · "));
    }

    Ok(())
}

fn list_publications(publications: &[PublicationSummary], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(publications)?);
        return Ok(());
    }

    println!("Publications ({} found)", publications.len());
    println!("======================");
    println!();
    println!("{:>8} {:>10}  Name", "Articles", "Unbundled");

    for p in publications {
        println!(
            "{:>8} {:>10}  {}",
            p.article_count, p.unbundled_count, p.publication_name
        );
    }

    Ok(())
}

fn list_authors(authors: &[AuthorSummary], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(authors)?);
        return Ok(());
    }

    println!("Authors ({} found)", authors.len());
    println!("=================");
    println!();
    println!("{:>8} {:>10}  Name", "Articles", "Unbundled");

    for a in authors {
        println!(
            "{:>8} {:>10}  {}",
            a.article_count, a.unbundled_count, a.author
        );
    }

    Ok(())
}

fn list_bundles(bundles: &[Bundle], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(bundles)?);
        return Ok(());
    }

    println!("Bundles ({} found)", bundles.len());
    println!("=================");
    println!();

    for bundle in bundles {
        let status = match bundle.sent_at {
            Some(at) => format!("sent {}", at.date()),
            None => "unsent".to_string(),
        };
        println!("{:>6}  {}", bundle.id, truncate(&bundle.title, TITLE_WIDTH));
        println!(
            "        {} articles · {} · created {} · {}",
            bundle.article_count,
            size_label(bundle.file_size),
            bundle.created_at.date(),
            status
        );
        if let Some(to) = &bundle.sent_to {
            println!("        to: {}", to.join(", "));
        }
    }

    Ok(())
}

//! Source registry: build adapters from config by name

use anyhow::{Result, bail};
use articles2kindle_adapters::sources::{FeedlySource, SubstackSource};
use articles2kindle_domain::SourceAdapter;

use crate::config::{AppConfig, load_secret, optional_secret};

pub const KNOWN_SOURCES: [&str; 2] = ["feedly", "substack"];

/// Build the adapter for `name` from its config section
pub(crate) fn build_source(name: &str, config: &AppConfig) -> Result<Box<dyn SourceAdapter>> {
    match name {
        "feedly" => {
            let stream_id = config.feedly.stream_id.trim();
            if stream_id.is_empty() {
                bail!("Feedly is not configured (set feedly.stream_id)");
            }
            let token = load_secret(&config.feedly.access_token_env, "Feedly access token")?;
            Ok(Box::new(FeedlySource::with_base_url(
                token,
                stream_id.to_string(),
                config.http_policy(),
                config.feedly.base_url.clone(),
            )))
        }
        "substack" => {
            if config.substack.publications.is_empty() {
                bail!("Substack is not configured (add [[substack.publications]])");
            }
            let sid = optional_secret(&config.substack.connect_sid_env);
            if sid.is_none() {
                tracing::info!(
                    env = %config.substack.connect_sid_env,
                    "No Substack session cookie; paid posts will be skipped"
                );
            }
            Ok(Box::new(
                SubstackSource::new(
                    config.substack.publications.clone(),
                    sid,
                    config.http_policy(),
                )
                .with_request_delay(config.request_delay()),
            ))
        }
        other => bail!(
            "Unknown source: {} (expected one of: {})",
            other,
            KNOWN_SOURCES.join(", ")
        ),
    }
}

/// The explicitly requested source, or every configured one
pub(crate) fn selected_sources(
    requested: Option<&str>,
    config: &AppConfig,
) -> Result<Vec<&'static str>> {
    if let Some(name) = requested {
        return match KNOWN_SOURCES.iter().find(|known| **known == name) {
            Some(known) => Ok(vec![*known]),
            None => bail!(
                "Unknown source: {} (expected one of: {})",
                name,
                KNOWN_SOURCES.join(", ")
            ),
        };
    }

    let configured = config.configured_sources();
    if configured.is_empty() {
        bail!("No sources configured. Set feedly.stream_id or add [[substack.publications]]");
    }
    Ok(configured)
}

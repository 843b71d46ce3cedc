//! Command implementations and the wiring they share

pub mod bundle;
pub mod collections;
pub mod config;
pub mod doctor;
pub mod fetch;
pub mod list;
pub mod reset;
pub mod run;
pub mod send;

mod sources;

use anyhow::{Context, Result, bail};
use articles2kindle_adapters::{
    epub::EpubEncoder,
    files::FsBundleFiles,
    mail::{SmtpMailer, SmtpSettings, StubMailer},
    store::SqliteStore,
};
use articles2kindle_domain::{
    MailTransport, SystemClock,
    naming::format_megabytes,
    usecases::{AssembleConfig, BundleService, DeliveryConfig, Dispatcher, Ingestor},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, load_secret};

pub(crate) use sources::{build_source, selected_sources};

pub(crate) type Bundler =
    BundleService<SqliteStore, SqliteStore, FsBundleFiles, EpubEncoder, SystemClock>;
pub(crate) type Sender = Dispatcher<SqliteStore, FsBundleFiles, dyn MailTransport, SystemClock>;

/// Opened store, bundle directory and config for one command invocation
pub(crate) struct App {
    pub config: AppConfig,
    pub store: Arc<SqliteStore>,
    pub files: Arc<FsBundleFiles>,
    clock: Arc<SystemClock>,
}

impl App {
    pub async fn open(config_path: Option<PathBuf>) -> Result<Self> {
        let config = AppConfig::load(config_path.as_deref())?;

        let store = SqliteStore::new(&config.general.db_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to open database: {}",
                    config.general.db_path.display()
                )
            })?;
        let files = FsBundleFiles::new(config.general.bundle_dir.clone())
            .await
            .with_context(|| {
                format!(
                    "Failed to open bundle directory: {}",
                    config.general.bundle_dir.display()
                )
            })?;

        Ok(Self {
            config,
            store: Arc::new(store),
            files: Arc::new(files),
            clock: Arc::new(SystemClock),
        })
    }

    pub fn ingestor(&self) -> Ingestor<SqliteStore, SqliteStore, SystemClock> {
        Ingestor::new(self.store.clone(), self.store.clone(), self.clock.clone())
    }

    pub fn bundler(&self, with_images: bool) -> Bundler {
        let assemble = AssembleConfig {
            max_bytes: self.config.max_bundle_bytes(),
            with_images: with_images || self.config.general.with_images,
        };
        BundleService::new(
            self.store.clone(),
            self.store.clone(),
            self.files.clone(),
            Arc::new(EpubEncoder::new()),
            self.clock.clone(),
            assemble,
        )
    }

    pub fn sender(&self) -> Result<Sender> {
        let transport = build_transport(&self.config)?;
        let mut delivery = DeliveryConfig::new(self.config.sender()?);
        delivery.max_attachment_bytes = self.config.max_attachment_bytes();

        Ok(Dispatcher::new(
            self.store.clone(),
            self.files.clone(),
            transport,
            self.clock.clone(),
            delivery,
        ))
    }

    /// Recipients from config; an empty list is a configuration error
    pub fn recipients(&self) -> Result<Vec<String>> {
        let recipients = self.config.recipients();
        if recipients.is_empty() {
            bail!("No Kindle address configured (set kindle.email)");
        }
        Ok(recipients)
    }
}

fn build_transport(config: &AppConfig) -> Result<Arc<dyn MailTransport>> {
    match config.kindle.transport.as_str() {
        "smtp" => {
            if config.smtp.host.trim().is_empty() {
                bail!("SMTP host is not configured (set smtp.host)");
            }
            let password = load_secret(&config.smtp.password_env, "SMTP password")?;
            let mailer = SmtpMailer::new(SmtpSettings {
                host: config.smtp.host.clone(),
                port: config.smtp.port,
                secure: config.smtp.secure,
                user: config.smtp.user.clone(),
                password,
                timeout: Duration::from_secs(config.http.timeout_secs),
            })
            .context("Failed to set up SMTP transport")?;
            Ok(Arc::new(mailer))
        }
        "stub" => {
            tracing::warn!("Using stub mail transport; nothing is actually sent");
            Ok(Arc::new(StubMailer::new()))
        }
        other => bail!("Unknown mail transport: {} (expected smtp or stub)", other),
    }
}

/// "12.3MB" style size for command output
pub(crate) fn size_label(bytes: u64) -> String {
    format!("{}MB", format_megabytes(bytes))
}

/// Cut to `max` characters, marking the cut with "..."
pub(crate) fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{}...", kept)
}

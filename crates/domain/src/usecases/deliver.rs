//! Delivery use case - mail bundles to reader devices

use std::sync::Arc;

use crate::{
    model::{Bundle, MailAttachment, MailMessage},
    naming::format_megabytes,
    ports::{BundleFiles, BundleStore, Clock, FileError, MailError, MailTransport, StoreError},
};

/// Reader devices accept larger attachments than SMTP relays
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 50 * 1024 * 1024;

/// Configuration for delivery
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Sender address
    pub from: String,
    /// Recipient-side attachment ceiling
    pub max_attachment_bytes: u64,
    pub content_type: String,
    /// Attachment extension without the dot
    pub extension: String,
}

impl DeliveryConfig {
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            content_type: "application/epub+zip".to_string(),
            extension: "epub".to_string(),
        }
    }
}

/// Errors from delivery
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Bundle not found: {0}")]
    NotFound(String),
    #[error("Bundle file missing: {0}")]
    MissingFile(String),
    #[error(
        "Bundle is {} MB, over the {} MB attachment limit",
        megabytes(.size),
        megabytes(.max)
    )]
    SizeLimitExceeded { size: u64, max: u64 },
    #[error("No recipients configured")]
    NoRecipients,
    #[error("File error: {0}")]
    File(#[from] FileError),
    #[error("Mail error: {0}")]
    Mail(#[from] MailError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

fn megabytes(bytes: &u64) -> String {
    format_megabytes(*bytes)
}

/// Primary address first, then extras, dropping blanks and repeats
pub fn collect_recipients<'a, I>(primary: Option<&'a str>, extra: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut recipients: Vec<String> = Vec::new();
    for address in primary.into_iter().chain(extra) {
        let address = address.trim();
        if !address.is_empty() && !recipients.iter().any(|r| r == address) {
            recipients.push(address.to_string());
        }
    }
    recipients
}

/// Sends bundles and records the outcome
pub struct Dispatcher<B, F, M, Cl>
where
    B: BundleStore + ?Sized,
    F: BundleFiles + ?Sized,
    M: MailTransport + ?Sized,
    Cl: Clock + ?Sized,
{
    bundles: Arc<B>,
    files: Arc<F>,
    transport: Arc<M>,
    clock: Arc<Cl>,
    config: DeliveryConfig,
}

impl<B, F, M, Cl> Dispatcher<B, F, M, Cl>
where
    B: BundleStore + ?Sized,
    F: BundleFiles + ?Sized,
    M: MailTransport + ?Sized,
    Cl: Clock + ?Sized,
{
    pub fn new(
        bundles: Arc<B>,
        files: Arc<F>,
        transport: Arc<M>,
        clock: Arc<Cl>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            bundles,
            files,
            transport,
            clock,
            config,
        }
    }

    /// Send one bundle as a single message to every recipient.
    ///
    /// The file size is checked before the transport is touched.
    pub async fn send(
        &self,
        bundle: &Bundle,
        recipients: &[String],
    ) -> Result<Vec<String>, DeliveryError> {
        if recipients.is_empty() {
            return Err(DeliveryError::NoRecipients);
        }

        let path = &bundle.file_path;
        let size = self
            .files
            .size(path)
            .await?
            .ok_or_else(|| DeliveryError::MissingFile(path.display().to_string()))?;

        if size > self.config.max_attachment_bytes {
            return Err(DeliveryError::SizeLimitExceeded {
                size,
                max: self.config.max_attachment_bytes,
            });
        }

        let content = self.files.read(path).await?;
        let message = MailMessage {
            from: self.config.from.clone(),
            to: recipients.to_vec(),
            subject: bundle.title.clone(),
            body: format!("Articles bundle: {}", bundle.title),
            attachment: MailAttachment {
                filename: format!("{}.{}", bundle.title, self.config.extension),
                content_type: self.config.content_type.clone(),
                content,
            },
        };

        tracing::info!(
            bundle_id = bundle.id,
            title = %bundle.title,
            size,
            recipients = recipients.len(),
            "Sending bundle"
        );
        self.transport.send(&message).await?;

        self.bundles
            .mark_sent(bundle.id, recipients, self.clock.now())
            .await?;
        tracing::info!(bundle_id = bundle.id, "Bundle sent");

        Ok(recipients.to_vec())
    }

    pub async fn send_by_id(
        &self,
        bundle_id: i64,
        recipients: &[String],
    ) -> Result<Bundle, DeliveryError> {
        let bundle = self
            .bundles
            .get_bundle(bundle_id)
            .await?
            .ok_or_else(|| DeliveryError::NotFound(bundle_id.to_string()))?;
        self.send(&bundle, recipients).await?;
        Ok(bundle)
    }

    /// Send each bundle in order; a failure never stops the rest
    pub async fn send_all(
        &self,
        bundles: &[Bundle],
        recipients: &[String],
    ) -> Vec<(i64, Result<Vec<String>, DeliveryError>)> {
        let mut outcomes = Vec::with_capacity(bundles.len());
        for bundle in bundles {
            let outcome = self.send(bundle, recipients).await;
            if let Err(e) = &outcome {
                tracing::warn!(bundle_id = bundle.id, error = %e, "Failed to send bundle");
            }
            outcomes.push((bundle.id, outcome));
        }
        outcomes
    }

    /// Every unsent bundle, oldest first
    pub async fn unsent(&self) -> Result<Vec<Bundle>, DeliveryError> {
        let mut bundles: Vec<Bundle> = self
            .bundles
            .list_bundles()
            .await?
            .into_iter()
            .filter(|b| !b.is_sent())
            .collect();
        bundles.reverse();
        Ok(bundles)
    }

    pub async fn latest_unsent(&self) -> Result<Option<Bundle>, DeliveryError> {
        Ok(self.bundles.latest_unsent().await?)
    }

    /// Drop bundles whose file vanished from disk.
    ///
    /// Member articles stay bundled; `reset_bundled` is the way back.
    pub async fn cleanup_stale(&self) -> Result<usize, DeliveryError> {
        let mut removed = 0;
        for bundle in self.bundles.list_bundles().await? {
            if !self.files.exists(&bundle.file_path).await {
                tracing::warn!(
                    bundle_id = bundle.id,
                    path = %bundle.file_path.display(),
                    "Bundle file missing, removing record"
                );
                self.bundles.delete_bundle(bundle.id).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Removed stale bundles");
        }
        Ok(removed)
    }
}

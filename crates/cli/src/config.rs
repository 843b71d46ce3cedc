//! Configuration loading and management

use anyhow::{Context, Result, bail};
use articles2kindle_adapters::sources::{HttpPolicy, SubstackPublication};
use articles2kindle_domain::usecases::collect_recipients;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MEGABYTE: u64 = 1024 * 1024;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub feedly: FeedlyConfig,

    #[serde(default)]
    pub substack: SubstackConfig,

    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub kindle: KindleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_bundle_dir")]
    pub bundle_dir: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Byte ceiling for one bundle, in megabytes
    #[serde(default = "default_max_bundle_mb")]
    pub max_bundle_mb: u64,

    #[serde(default)]
    pub with_images: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedlyConfig {
    #[serde(default = "default_feedly_token_env")]
    pub access_token_env: String,

    #[serde(default)]
    pub stream_id: String,

    #[serde(default = "default_feedly_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstackConfig {
    #[serde(default = "default_substack_sid_env")]
    pub connect_sid_env: String,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default)]
    pub publications: Vec<SubstackPublication>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Implicit TLS (usually port 465); STARTTLS otherwise
    #[serde(default)]
    pub secure: bool,

    #[serde(default)]
    pub user: String,

    #[serde(default = "default_smtp_password_env")]
    pub password_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindleConfig {
    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub emails: Vec<String>,

    #[serde(default)]
    pub sender_email: String,

    #[serde(default = "default_max_attachment_mb")]
    pub max_attachment_mb: u64,

    /// smtp or stub
    #[serde(default = "default_transport")]
    pub transport: String,
}

// Default value functions
fn default_db_path() -> PathBuf {
    PathBuf::from("./articles2kindle.sqlite")
}

fn default_bundle_dir() -> PathBuf {
    PathBuf::from("./bundles")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_bundle_mb() -> u64 {
    20
}

fn default_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    2
}

fn default_feedly_token_env() -> String {
    "FEEDLY_ACCESS_TOKEN".to_string()
}

fn default_feedly_base_url() -> String {
    articles2kindle_adapters::sources::DEFAULT_FEEDLY_URL.to_string()
}

fn default_substack_sid_env() -> String {
    "SUBSTACK_CONNECT_SID".to_string()
}

fn default_request_delay_ms() -> u64 {
    200
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_password_env() -> String {
    "SMTP_PASSWORD".to_string()
}

fn default_max_attachment_mb() -> u64 {
    50
}

fn default_transport() -> String {
    "smtp".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            bundle_dir: default_bundle_dir(),
            log_level: default_log_level(),
            max_bundle_mb: default_max_bundle_mb(),
            with_images: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            retries: default_retries(),
        }
    }
}

impl Default for FeedlyConfig {
    fn default() -> Self {
        Self {
            access_token_env: default_feedly_token_env(),
            stream_id: String::new(),
            base_url: default_feedly_base_url(),
        }
    }
}

impl Default for SubstackConfig {
    fn default() -> Self {
        Self {
            connect_sid_env: default_substack_sid_env(),
            request_delay_ms: default_request_delay_ms(),
            publications: vec![],
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            secure: false,
            user: String::new(),
            password_env: default_smtp_password_env(),
        }
    }
}

impl Default for KindleConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            emails: vec![],
            sender_email: String::new(),
            max_attachment_mb: default_max_attachment_mb(),
            transport: default_transport(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Try default config path if none specified
        let default_path = PathBuf::from("./config.toml");
        let path = config_path.unwrap_or(&default_path);

        if path.exists() {
            builder = builder.add_source(config::File::from(path));
        } else if config_path.is_some() {
            // User specified a path that doesn't exist
            bail!("Config file not found: {}", path.display());
        }

        // Add environment variable overrides
        builder = builder.add_source(
            config::Environment::with_prefix("ARTICLES2KINDLE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn http_policy(&self) -> HttpPolicy {
        HttpPolicy {
            timeout: Duration::from_secs(self.http.timeout_secs),
            retries: self.http.retries,
        }
    }

    pub fn max_bundle_bytes(&self) -> u64 {
        self.general.max_bundle_mb * MEGABYTE
    }

    pub fn max_attachment_bytes(&self) -> u64 {
        self.kindle.max_attachment_mb * MEGABYTE
    }

    /// Primary kindle address plus extras, without repeats
    pub fn recipients(&self) -> Vec<String> {
        collect_recipients(
            Some(self.kindle.email.as_str()),
            self.kindle.emails.iter().map(String::as_str),
        )
    }

    /// Sender address, falling back to the SMTP login
    pub fn sender(&self) -> Result<String> {
        [&self.kindle.sender_email, &self.smtp.user]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .context("No sender address configured (set kindle.sender_email)")
    }

    /// Names of the sources that have enough configuration to run
    pub fn configured_sources(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if !self.feedly.stream_id.trim().is_empty() {
            names.push("feedly");
        }
        if !self.substack.publications.is_empty() {
            names.push("substack");
        }
        names
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.substack.request_delay_ms)
    }

    /// Generate example configuration as TOML string
    pub fn example_toml() -> String {
        r#"# articles2kindle configuration
# Secrets are never stored here: each *_env key names the environment
# variable that holds the value.

[general]
db_path = "./articles2kindle.sqlite"
bundle_dir = "./bundles"
log_level = "info"
# Bundles above this size are split into parts
max_bundle_mb = 20
with_images = false

[http]
timeout_secs = 30
retries = 2

[feedly]
access_token_env = "FEEDLY_ACCESS_TOKEN"
# e.g. "user/<id>/tag/global.saved"
stream_id = ""
base_url = "https://cloud.feedly.com"

[substack]
connect_sid_env = "SUBSTACK_CONNECT_SID"
request_delay_ms = 200
# [[substack.publications]]
# url = "https://www.slowboring.com"
# label = "Slow Boring"

[smtp]
host = "smtp.gmail.com"
port = 587
secure = false
user = "you@example.com"
password_env = "SMTP_PASSWORD"

[kindle]
email = "you@kindle.com"
# emails = ["partner@kindle.com"]
sender_email = "you@example.com"
max_attachment_mb = 50
transport = "smtp"  # smtp, stub
"#
        .to_string()
    }
}

/// Read a required secret from the environment variable named in config
pub fn load_secret(env_var: &str, what: &str) -> Result<SecretString> {
    if env_var.trim().is_empty() {
        bail!("No env var configured for {}", what);
    }

    let value = std::env::var(env_var)
        .with_context(|| format!("Missing env var {} for {}", env_var, what))?;

    if value.trim().is_empty() {
        bail!("Env var {} is empty for {}", env_var, what);
    }

    Ok(SecretString::new(value.into()))
}

/// Read an optional secret; unset and empty both mean absent
pub fn optional_secret(env_var: &str) -> Option<SecretString> {
    if env_var.trim().is_empty() {
        return None;
    }
    std::env::var(env_var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(|v| SecretString::new(v.into()))
}

//! Doctor command - validate configuration and show status

use anyhow::Result;
use articles2kindle_adapters::store::SqliteStore;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::args::DoctorArgs;
use crate::commands::build_source;
use crate::config::AppConfig;

#[derive(Debug, Serialize)]
struct DoctorReport {
    config: CheckResult,
    database: CheckResult,
    bundle_dir: CheckResult,
    feedly: CheckResult,
    substack: CheckResult,
    mail: CheckResult,
    overall: String,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    status: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl CheckResult {
    fn ok(message: impl Into<String>) -> Self {
        Self::with_status("ok", message)
    }

    fn warn(message: impl Into<String>) -> Self {
        Self::with_status("warn", message)
    }

    fn error(message: impl Into<String>) -> Self {
        Self::with_status("error", message)
    }

    fn skipped(message: impl Into<String>) -> Self {
        Self::with_status("skipped", message)
    }

    fn with_status(status: &str, message: impl Into<String>) -> Self {
        Self {
            status: status.to_string(),
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    fn is_error(&self) -> bool {
        self.status == "error"
    }

    fn is_warn(&self) -> bool {
        self.status == "warn"
    }
}

pub async fn execute(args: DoctorArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut report = DoctorReport {
        config: CheckResult::error("Not checked"),
        database: CheckResult::error("Not checked"),
        bundle_dir: CheckResult::error("Not checked"),
        feedly: CheckResult::error("Not checked"),
        substack: CheckResult::error("Not checked"),
        mail: CheckResult::error("Not checked"),
        overall: "error".to_string(),
    };

    let config = match AppConfig::load(config_path.as_deref()) {
        Ok(c) => {
            report.config = CheckResult::ok("Configuration loaded successfully");
            Some(c)
        }
        Err(e) => {
            report.config = CheckResult::error(format!("Failed to load config: {:#}", e));
            None
        }
    };

    if let Some(ref config) = config {
        report.database = check_database(&config.general.db_path).await;
        report.bundle_dir = check_bundle_dir(&config.general.bundle_dir);
        report.feedly = check_source(config, "feedly", args.offline).await;
        report.substack = check_source(config, "substack", args.offline).await;
        report.mail = check_mail(config);
    }

    let checks = [
        &report.config,
        &report.database,
        &report.bundle_dir,
        &report.feedly,
        &report.substack,
        &report.mail,
    ];

    report.overall = if checks.iter().any(|c| c.is_error()) {
        "error".to_string()
    } else if checks.iter().any(|c| c.is_warn()) {
        "warn".to_string()
    } else {
        "ok".to_string()
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.overall == "error" {
        std::process::exit(1);
    }

    Ok(())
}

async fn check_database(path: &Path) -> CheckResult {
    match SqliteStore::new(path).await {
        Ok(store) => {
            store.close().await;
            CheckResult::ok(format!("Database ready: {}", path.display()))
        }
        Err(e) => CheckResult::error(format!(
            "Failed to open database {}: {}",
            path.display(),
            e
        )),
    }
}

fn check_bundle_dir(dir: &Path) -> CheckResult {
    if dir.is_dir() {
        CheckResult::ok(format!("Bundle directory: {}", dir.display()))
    } else if dir.exists() {
        CheckResult::error(format!("Bundle path is not a directory: {}", dir.display()))
    } else {
        CheckResult::ok(format!(
            "Bundle directory will be created: {}",
            dir.display()
        ))
    }
}

async fn check_source(config: &AppConfig, name: &str, offline: bool) -> CheckResult {
    if !config.configured_sources().iter().any(|s| *s == name) {
        return CheckResult::skipped(format!("{} not configured", name));
    }

    let source = match build_source(name, config) {
        Ok(source) => source,
        Err(e) => return CheckResult::error(format!("{:#}", e)),
    };

    if offline {
        return CheckResult::ok("Configured (connection not checked)");
    }

    match source.validate_connection().await {
        Ok(()) => match source.list_groups().await {
            Ok(groups) => CheckResult::ok(format!("Connected, {} collections", groups.len()))
                .with_details(serde_json::json!({
                    "collections": groups.iter().map(|g| &g.label).collect::<Vec<_>>()
                })),
            Err(e) => CheckResult::warn(format!("Connected, but listing failed: {}", e)),
        },
        Err(e) => CheckResult::error(format!("Connection failed: {}", e)),
    }
}

fn check_mail(config: &AppConfig) -> CheckResult {
    let recipients = config.recipients();
    if recipients.is_empty() {
        return CheckResult::warn("No Kindle address configured (kindle.email)");
    }

    match config.kindle.transport.as_str() {
        "stub" => CheckResult::warn(format!(
            "Stub transport, nothing is sent. Recipients: {}",
            recipients.join(", ")
        )),
        "smtp" => {
            if config.smtp.host.trim().is_empty() {
                return CheckResult::error("SMTP host is not configured");
            }
            if let Err(e) = config.sender() {
                return CheckResult::error(format!("{:#}", e));
            }

            let env_var = &config.smtp.password_env;
            let password = match std::env::var(env_var) {
                Ok(val) if !val.is_empty() => "set",
                _ => "not set",
            };
            let result = format!(
                "SMTP {}:{}, password: {} ({}), recipients: {}",
                config.smtp.host,
                config.smtp.port,
                env_var,
                password,
                recipients.join(", ")
            );
            if password == "set" {
                CheckResult::ok(result)
            } else {
                CheckResult::warn(result)
            }
        }
        other => CheckResult::error(format!("Unknown mail transport: {}", other)),
    }
}

fn print_report(report: &DoctorReport) {
    println!("articles2kindle Doctor Report");
    println!("=============================");
    println!();

    print_check("Config", &report.config);
    print_check("Database", &report.database);
    print_check("Bundle dir", &report.bundle_dir);
    print_check("Feedly", &report.feedly);
    print_check("Substack", &report.substack);
    print_check("Mail", &report.mail);

    println!();
    println!(
        "{} Overall: {}",
        symbol(&report.overall),
        report.overall.to_uppercase()
    );

    if report.overall == "ok" {
        println!();
        println!("Ready to go! Try: articles2kindle fetch");
    }
}

fn print_check(name: &str, result: &CheckResult) {
    println!("{} {}: {}", symbol(&result.status), name, result.message);
}

fn symbol(status: &str) -> &'static str {
    match status {
        "ok" => "✓",
        "warn" => "⚠",
        "skipped" => "-",
        _ => "✗",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mail_check() {
        let mut config = AppConfig::default();
        assert!(check_mail(&config).is_warn());

        config.kindle.email = "me@kindle.com".to_string();
        assert!(check_mail(&config).is_error());

        config.kindle.transport = "stub".to_string();
        assert!(check_mail(&config).is_warn());
    }

    #[tokio::test]
    async fn test_unconfigured_source_is_skipped() {
        let config = AppConfig::default();
        let result = check_source(&config, "feedly", false).await;
        assert_eq!(result.status, "skipped");
    }
}

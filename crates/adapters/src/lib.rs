//! articles2kindle adapters crate
//!
//! Infrastructure implementing the domain ports:
//! - `store`: SQLite article, bundle and sync-log store
//! - `files`: bundle files on the local filesystem
//! - `epub`: EPUB 3 archive encoder with HTML sanitizing and image embedding
//! - `mail`: SMTP transport and a recording stub
//! - `sources`: Feedly and Substack adapters plus a replaying stub

mod files_fs;
mod mail_smtp;
mod store_sqlite;

pub mod epub;
pub mod sources;

/// Re-exports for storage adapters
pub mod store {
    pub use crate::store_sqlite::SqliteStore;
}

/// Re-exports for bundle file adapters
pub mod files {
    pub use crate::files_fs::FsBundleFiles;
}

/// Re-exports for mail adapters
pub mod mail {
    pub use crate::mail_smtp::{SmtpMailer, SmtpSettings, StubMailer};
}

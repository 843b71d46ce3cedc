//! Application use cases / business logic

pub mod assemble;
pub mod bundle;
pub mod deliver;
pub mod ingest;

pub use assemble::{AssembleConfig, AssembledPart, Assembler, DEFAULT_MAX_BUNDLE_BYTES};
pub use bundle::{BundleError, BundleFailure, BundleService, CommittedBundle};
pub use deliver::{
    DEFAULT_MAX_ATTACHMENT_BYTES, DeliveryConfig, DeliveryError, Dispatcher, collect_recipients,
};
pub use ingest::{IngestError, IngestOptions, IngestReport, Ingestor};

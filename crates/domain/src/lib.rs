//! articles2kindle domain crate
//!
//! This crate contains the core domain logic following hexagonal architecture:
//! - `model`: Articles, bundles, sync runs and value objects
//! - `ports`: Trait definitions for external dependencies (adapters)
//! - `usecases`: Ingestion, assembly, bundling and delivery
//! - `naming`: Title, author and file name rules

pub mod model;
pub mod naming;
pub mod ports;
pub mod usecases;

pub use model::*;
pub use ports::*;

//! Election Harvester - Collect polling-unit result sheets and extract vote tallies.
//!
//! This crate walks an election results portal (State → LGA → Ward →
//! Polling Unit), downloads every polling unit's result sheet, recovers its
//! text (PDF text layer, falling back to rotation OCR) and parses the vote
//! tallies into a result table with a per-ward failure ledger.
//!
//! # Example
//!
//! ```
//! use election_harvester::{config, parse_polling_unit};
//!
//! assert_eq!(config::sanitize_name("Lagos State!"), "LagosState");
//!
//! let fields = parse_polling_unit("Total Valid Votes : 257\nAPC : 120");
//! assert_eq!(fields.valid_votes, Some(257));
//! assert_eq!(fields.party_results["APC"], 120);
//! ```
//!
//! # Architecture
//!
//! The harvester is organized into several modules:
//!
//! - [`config`]: Configuration constants, level signatures and crawl settings
//! - [`types`]: Core data types (HierarchyNode, ArtifactRecord, PollingUnitResult, etc.)
//! - [`error`]: Error types and Result alias
//! - [`http`]: Artifact downloader with retry and content-type classification
//! - [`render`]: Rendering sessions (Browserless)
//! - [`links`]: Link extraction from rendered HTML
//! - [`recovery`]: Text recovery (PDF extraction, rotation OCR)
//! - [`parser`]: Structured field parser
//! - [`ledger`]: Result aggregation and failure ledger
//! - [`navigator`]: Hierarchy traversal and per-polling-unit pipeline
//! - [`harvester`]: Crawl orchestration over a worker pool
//! - [`export`]: CSV, failure report and JSON summary output
//! - [`cli`]: Command-line interface

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod harvester;
pub mod http;
pub mod ledger;
pub mod links;
pub mod navigator;
pub mod parser;
pub mod recovery;
pub mod render;
pub mod types;

// Re-export main entry points
pub use harvester::{CrawlReport, Harvester};
pub use parser::parse_polling_unit;

// Re-export commonly used items
pub use config::{sanitize_name, CrawlConfig};
pub use error::{HarvesterError, Result};
pub use types::{ArtifactKind, ArtifactRecord, HierarchyNode, Level, ParsedFields, PollingUnitResult};

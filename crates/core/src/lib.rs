//! Core domain types and shared logic for the pasta blob service.
//!
//! This crate defines the data model used across all other crates:
//! - Records (pastas) and their expiry semantics
//! - Identifier and mutation token generation
//! - Configuration shared by the storage engine and the server
//! - The MIME lookup seam used during ingestion

pub mod config;
pub mod error;
pub mod id;
pub mod mime;
pub mod record;

pub use error::{Error, Result};
pub use id::{generate_id, generate_token, is_valid_id};
pub use mime::{MimeLookup, MimeTypes, mime_for_filename};
pub use record::Record;

/// Default number of characters in a record identifier.
pub const DEFAULT_ID_LENGTH: usize = 8;

/// Minimum (and default) number of characters in a mutation token.
pub const MIN_TOKEN_LENGTH: usize = 16;

/// Default maximum payload size: 25 MiB
pub const DEFAULT_MAX_SIZE: u64 = 25 * 1024 * 1024;

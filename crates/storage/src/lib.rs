//! Flat-file record storage for pasta.
//!
//! This crate provides:
//! - The record codec: a `key:value` header terminated by `---`, followed by
//!   the raw payload
//! - A directory-backed store with one file per record
//! - Streaming record writers and readers
//! - The expiration sweep

pub mod codec;
pub mod error;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use store::{ByteStream, RecordStore, RecordWriter, SweepReport};

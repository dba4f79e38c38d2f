//! HTTP request handlers.

pub mod ingest;
pub mod pages;
pub mod records;

pub use ingest::*;
pub use pages::*;
pub use records::*;

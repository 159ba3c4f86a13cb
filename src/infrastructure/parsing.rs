//! HTML extraction for storefront pages
//!
//! Probe tables are data ([`config::PageCatalog`]); [`extractor::PageExtractor`]
//! compiles them once and applies them to each loaded document.

pub mod config;
pub mod error;
pub mod extractor;
pub mod probe;

pub use config::{FieldKind, FieldSpec, PageCatalog, PageSpec};
pub use error::ExtractionError;
pub use extractor::PageExtractor;
pub use probe::{Probe, coerce_number};

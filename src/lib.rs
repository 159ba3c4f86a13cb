//! Shopee realtime bot
//!
//! Two ways of getting storefront numbers into the dashboard backend:
//!
//! - the **fleet**: a supervisor that periodically drives one persistent
//!   browser profile per tracked account, extracts snapshots and posts them
//!   to the ingestion API;
//! - the **companion**: scrapes the page an operator already has open and
//!   relays it to the sync API, once per account per day unless forced.

// Module declarations
pub mod application;
pub mod companion;
pub mod domain;
pub mod infrastructure;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

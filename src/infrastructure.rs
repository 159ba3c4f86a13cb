//! Infrastructure layer: configuration, logging, browser automation,
//! extraction, ingestion and roster access.

pub mod browser;
pub mod config;
pub mod diagnostics;
pub mod ingestion_client;
pub mod logging;
pub mod parsing;
pub mod roster;
pub mod session_manager;

pub use browser::{BrowserContext, BrowserError, BrowserLauncher, ChromiumLauncher, LaunchProfile, PageSurface, Viewport};
pub use config::{ConfigError, FleetConfig, LoggingConfig};
pub use diagnostics::Diagnostics;
pub use ingestion_client::{BatchReceipt, IngestReceipt, IngestionClient, IngestionConfig, IngestionError, SnapshotSink};
pub use logging::{init_logging, init_logging_with_config};
pub use parsing::{ExtractionError, PageCatalog, PageExtractor, Probe};
pub use roster::{JsonRoster, RosterError, RosterSource};
pub use session_manager::{Session, SessionError, SessionManager, SessionSettings, is_login_page};

//! Companion: scrapes whatever Shopee page the operator has open and relays
//! it to the sync backend, at most once per account per day unless forced.

pub mod clock;
pub mod host;
pub mod messages;
pub mod relay;
pub mod scraper;
pub mod settings;
pub mod state_store;
pub mod transport;

pub use clock::{Clock, FixedClock, SystemClock};
pub use host::{CompanionHost, HostCommand};
pub use messages::{RelayError, RelayHandle, RelayRequest, RelayResponse, SyncPayload, SyncReceipt};
pub use relay::Relay;
pub use scraper::{CompanionScraper, Notice, NoticeLevel, ScrapeOutcome};
pub use settings::{CompanionSettings, SettingsError};
pub use state_store::{CompanionState, StateStore, StateStoreError};
pub use transport::{HttpSyncTransport, SyncEndpoint, SyncTransport, TransportError, TransportFactory, http_transport_factory};

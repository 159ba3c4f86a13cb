//! Test utilities for the Shopee realtime bot
//!
//! Scripted stand-ins for every outer seam: the browser, the account runner,
//! the ingestion sink and the companion transport. They record what they were
//! asked to do so tests can assert on it, and never touch the network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};

use crate::application::agent::{Agent, AccountRunner, AgentReport, AgentSettings};
use crate::companion::settings::CompanionSettings;
use crate::companion::transport::{SyncEndpoint, SyncTransport, TransportError, TransportFactory};
use crate::domain::{Account, Snapshot, SnapshotKind};
use crate::infrastructure::browser::{BrowserContext, BrowserError, BrowserLauncher, LaunchProfile, PageSurface};
use crate::infrastructure::diagnostics::Diagnostics;
use crate::infrastructure::ingestion_client::{IngestReceipt, IngestionError, SnapshotSink};
use crate::infrastructure::parsing::PageExtractor;
use crate::infrastructure::roster::{RosterError, RosterSource};
use crate::infrastructure::session_manager::{SessionManager, SessionSettings};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

const BLANK_PAGE: &str = "<html><body></body></html>";

#[derive(Debug, Clone)]
enum Route {
    Loaded { final_url: String, html: String },
    Fails(BrowserError),
}

#[derive(Debug)]
struct PageState {
    routes: HashMap<String, Route>,
    current_url: String,
    current_html: String,
    navigations: Vec<String>,
    screenshots: Vec<PathBuf>,
    content_fails: bool,
    screenshots_fail: bool,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            routes: HashMap::new(),
            current_url: "about:blank".to_string(),
            current_html: BLANK_PAGE.to_string(),
            navigations: Vec::new(),
            screenshots: Vec::new(),
            content_fails: false,
            screenshots_fail: false,
        }
    }
}

/// In-memory page. Clones share state, so a test can keep a handle to the
/// page an agent is driving.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    state: Arc<Mutex<PageState>>,
}

impl ScriptedPage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` when `url` is opened
    pub fn route(self, url: &str, html: &str) -> Self {
        self.redirect(url, url, html)
    }

    /// Opening `url` ends up on `final_url` (login redirects)
    pub fn redirect(self, url: &str, final_url: &str, html: &str) -> Self {
        lock(&self.state)
            .routes
            .insert(url.to_string(), Route::Loaded { final_url: final_url.to_string(), html: html.to_string() });
        self
    }

    pub fn fail_navigation(self, url: &str, error: BrowserError) -> Self {
        lock(&self.state).routes.insert(url.to_string(), Route::Fails(error));
        self
    }

    pub fn fail_content(self) -> Self {
        lock(&self.state).content_fails = true;
        self
    }

    pub fn failing_screenshots(self) -> Self {
        lock(&self.state).screenshots_fail = true;
        self
    }

    /// Start out already showing `html` at `url`
    pub fn at(self, url: &str, html: &str) -> Self {
        self.show(url, html);
        self
    }

    /// Simulates the operator moving the tab somewhere else
    pub fn show(&self, url: &str, html: &str) {
        let mut state = lock(&self.state);
        state.current_url = url.to_string();
        state.current_html = html.to_string();
    }

    pub fn navigations(&self) -> Vec<String> {
        lock(&self.state).navigations.clone()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        lock(&self.state).screenshots.clone()
    }
}

#[async_trait]
impl PageSurface for ScriptedPage {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<(), BrowserError> {
        let mut state = lock(&self.state);
        state.navigations.push(url.to_string());
        match state.routes.get(url).cloned() {
            Some(Route::Loaded { final_url, html }) => {
                state.current_url = final_url;
                state.current_html = html;
                Ok(())
            }
            Some(Route::Fails(error)) => Err(error),
            None => {
                state.current_url = url.to_string();
                state.current_html = BLANK_PAGE.to_string();
                Ok(())
            }
        }
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(lock(&self.state).current_url.clone())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        let state = lock(&self.state);
        if state.content_fails {
            return Err(BrowserError::Page("target closed".to_string()));
        }
        Ok(state.current_html.clone())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        let refused = lock(&self.state).screenshots_fail;
        if refused {
            return Err(BrowserError::Screenshot("capture refused".to_string()));
        }
        tokio::fs::write(path, b"\x89PNG\r\n")
            .await
            .map_err(|e| BrowserError::Screenshot(e.to_string()))?;
        lock(&self.state).screenshots.push(path.to_path_buf());
        Ok(())
    }
}

type PageFactory = Box<dyn Fn(&LaunchProfile) -> ScriptedPage + Send + Sync>;

/// Launches [`ScriptedPage`]s instead of a browser
pub struct ScriptedLauncher {
    factory: PageFactory,
    failing: HashSet<String>,
    launches: Mutex<Vec<LaunchProfile>>,
    pages: Mutex<HashMap<String, ScriptedPage>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedLauncher {
    pub fn new(factory: impl Fn(&LaunchProfile) -> ScriptedPage + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            failing: HashSet::new(),
            launches: Mutex::new(Vec::new()),
            pages: Mutex::new(HashMap::new()),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Launching a browser for `account_id` fails
    pub fn failing_for(mut self, account_id: &str) -> Self {
        self.failing.insert(account_id.to_string());
        self
    }

    pub fn launches(&self) -> Vec<LaunchProfile> {
        lock(&self.launches).clone()
    }

    /// The page handed to `account_id`'s most recent browser
    pub fn page_for(&self, account_id: &str) -> Option<ScriptedPage> {
        lock(&self.pages).get(account_id).cloned()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserContext>, BrowserError> {
        lock(&self.launches).push(profile.clone());
        if self.failing.contains(&profile.account_id) {
            return Err(BrowserError::Launch(format!("profile {} is corrupt", profile.account_id)));
        }
        let page = (self.factory)(profile);
        lock(&self.pages).insert(profile.account_id.clone(), page.clone());
        Ok(Box::new(ScriptedContext { page, closed: Arc::clone(&self.closed) }))
    }
}

struct ScriptedContext {
    page: ScriptedPage,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserContext for ScriptedContext {
    async fn new_page(&mut self) -> Result<Box<dyn PageSurface>, BrowserError> {
        Ok(Box::new(self.page.clone()))
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started(String),
    Finished(String),
}

/// In-memory roster that can be edited or broken between cycles
#[derive(Debug, Default)]
pub struct StaticRoster {
    accounts: Mutex<Vec<Account>>,
    failing: AtomicBool,
}

impl StaticRoster {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self { accounts: Mutex::new(accounts), failing: AtomicBool::new(false) }
    }

    pub fn replace(&self, accounts: Vec<Account>) {
        *lock(&self.accounts) = accounts;
    }

    /// While set, every load fails as if the file were missing
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl RosterSource for StaticRoster {
    async fn enabled_accounts(&self) -> Result<Vec<Account>, RosterError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RosterError::Io {
                path: PathBuf::from("static-roster"),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "roster unavailable"),
            });
        }
        Ok(lock(&self.accounts).iter().filter(|a| a.enabled).cloned().collect())
    }
}

/// Account runner that only records start/finish order
#[derive(Debug, Default)]
pub struct RecordingRunner {
    delay: Duration,
    panic_for: HashSet<String>,
    fail_for: HashSet<String>,
    events: Mutex<Vec<RunEvent>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run takes this long (use with paused time)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn panicking_for(mut self, account_id: &str) -> Self {
        self.panic_for.insert(account_id.to_string());
        self
    }

    pub fn failing_for(mut self, account_id: &str) -> Self {
        self.fail_for.insert(account_id.to_string());
        self
    }

    pub fn events(&self) -> Vec<RunEvent> {
        lock(&self.events).clone()
    }

    /// Ids in the order they were started
    pub fn started(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RunEvent::Started(id) => Some(id),
                RunEvent::Finished(_) => None,
            })
            .collect()
    }

    /// Highest number of runs in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccountRunner for RecordingRunner {
    async fn run(&self, account: &Account) -> AgentReport {
        let id = account.id().to_string();
        lock(&self.events).push(RunEvent::Started(id.clone()));
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.panic_for.contains(&id) {
            panic!("scripted panic for {id}");
        }
        lock(&self.events).push(RunEvent::Finished(id.clone()));

        let success = !self.fail_for.contains(&id);
        AgentReport {
            account_id: id,
            success,
            snapshots: Vec::new(),
            pages: Vec::new(),
            submissions: Vec::new(),
            error: (!success).then(|| "scripted failure".to_string()),
            duration_ms: 0,
        }
    }
}

/// Snapshot sink that keeps everything it accepts
#[derive(Debug, Default)]
pub struct RecordingSink {
    rejected: HashSet<SnapshotKind>,
    submitted: Mutex<Vec<Snapshot>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The server answers 422 for this page type
    pub fn rejecting(mut self, kind: SnapshotKind) -> Self {
        self.rejected.insert(kind);
        self
    }

    pub fn submitted(&self) -> Vec<Snapshot> {
        lock(&self.submitted).clone()
    }
}

#[async_trait]
impl SnapshotSink for RecordingSink {
    async fn submit(&self, snapshot: &Snapshot) -> Result<IngestReceipt, IngestionError> {
        if self.rejected.contains(&snapshot.kind()) {
            return Err(IngestionError::Rejected { status: 422, detail: format!("{} payload invalid", snapshot.kind()) });
        }
        let mut submitted = lock(&self.submitted);
        submitted.push(snapshot.clone());
        Ok(IngestReceipt { snapshot_id: Some(json!(submitted.len())) })
    }
}

/// One scripted answer of [`FakeTransport`]
#[derive(Debug, Clone)]
pub enum FakeReply {
    Ok(Value),
    Err(TransportError),
    /// Answers `Ok` after `delay`
    Slow(Duration, Value),
    /// Never answers
    Hang,
}

/// Companion transport answering from a queue; `Ok({"success":true})` once empty
#[derive(Debug, Default)]
pub struct FakeTransport {
    replies: Mutex<VecDeque<FakeReply>>,
    calls: Mutex<Vec<(SyncEndpoint, Value)>>,
    builds: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_replies(replies: impl IntoIterator<Item = FakeReply>) -> Arc<Self> {
        let transport = Self::default();
        lock(&transport.replies).extend(replies);
        Arc::new(transport)
    }

    pub fn push_reply(&self, reply: FakeReply) {
        lock(&self.replies).push_back(reply);
    }

    pub fn calls(&self) -> Vec<(SyncEndpoint, Value)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    /// How many times the factory handed this transport out
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    /// Factory that always hands out this transport
    pub fn factory(self: &Arc<Self>) -> TransportFactory {
        let transport = Arc::clone(self);
        Arc::new(move |_settings: &CompanionSettings| {
            transport.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::clone(&transport) as Arc<dyn SyncTransport>)
        })
    }
}

#[async_trait]
impl SyncTransport for FakeTransport {
    async fn post(&self, endpoint: SyncEndpoint, body: &Value) -> Result<Value, TransportError> {
        lock(&self.calls).push((endpoint, body.clone()));
        let reply = lock(&self.replies).pop_front();
        match reply {
            None => Ok(json!({ "success": true })),
            Some(FakeReply::Ok(value)) => Ok(value),
            Some(FakeReply::Err(error)) => Err(error),
            Some(FakeReply::Slow(delay, value)) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Some(FakeReply::Hang) => std::future::pending().await,
        }
    }
}

/// A complete agent over scripted parts, rooted in a caller-owned directory
pub struct TestFleet {
    pub launcher: Arc<ScriptedLauncher>,
    pub sessions: Arc<SessionManager>,
    pub sink: Arc<RecordingSink>,
    pub agent: Agent,
    pub screenshots_dir: PathBuf,
}

impl TestFleet {
    pub fn new(root: &Path, launcher: ScriptedLauncher) -> Result<Self> {
        Self::with_sink(root, launcher, RecordingSink::new())
    }

    pub fn with_sink(root: &Path, launcher: ScriptedLauncher, sink: RecordingSink) -> Result<Self> {
        let launcher = Arc::new(launcher);
        let settings = SessionSettings { profiles_dir: root.join("profiles"), ..SessionSettings::default() };
        let sessions = Arc::new(SessionManager::new(settings, Arc::clone(&launcher) as Arc<dyn BrowserLauncher>));
        let extractor = Arc::new(PageExtractor::with_defaults()?);
        let sink = Arc::new(sink);
        let screenshots_dir = root.join("screenshots");

        let agent = Agent::new(
            Arc::clone(&sessions),
            extractor,
            Arc::clone(&sink) as Arc<dyn SnapshotSink>,
            Diagnostics::new(&screenshots_dir),
            AgentSettings { navigation_timeout: Duration::from_secs(5), settle_delay: Duration::ZERO },
        );
        Ok(Self { launcher, sessions, sink, agent, screenshots_dir })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_page_follows_redirects_and_counts_navigations() {
        let page = ScriptedPage::new().redirect("https://a/portal", "https://a/login", "<form></form>");

        page.goto("https://a/portal", Duration::from_secs(1)).await.unwrap();

        assert_eq!(page.current_url().await.unwrap(), "https://a/login");
        assert_eq!(page.content().await.unwrap(), "<form></form>");
        assert_eq!(page.navigations(), vec!["https://a/portal".to_string()]);
    }

    #[tokio::test]
    async fn fake_transport_drains_its_queue_then_succeeds() {
        let transport = FakeTransport::with_replies([FakeReply::Err(TransportError::Unauthorized)]);
        let body = json!({});

        assert_eq!(transport.post(SyncEndpoint::ShopeeData, &body).await, Err(TransportError::Unauthorized));
        assert!(transport.post(SyncEndpoint::ShopeeData, &body).await.is_ok());
        assert_eq!(transport.call_count(), 2);
    }
}

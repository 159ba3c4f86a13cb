//! Best-effort failure screenshots
//!
//! Files are named `{account}_{error_type}_{unix_millis}.png`. Capture
//! problems are logged and swallowed; diagnostics never change an outcome.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use super::browser::PageSurface;

static UNSAFE_FILENAME_CHARS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]+").ok());

/// Makes `part` safe as a single path component: no separators, nothing outside `[A-Za-z0-9_.-]`
pub(crate) fn sanitize(part: &str) -> String {
    match UNSAFE_FILENAME_CHARS.as_ref() {
        Some(re) => re.replace_all(part, "-").into_owned(),
        None => part
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') { c } else { '-' })
            .collect(),
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostics {
    screenshots_dir: PathBuf,
}

impl Diagnostics {
    pub fn new(screenshots_dir: impl Into<PathBuf>) -> Self {
        Self { screenshots_dir: screenshots_dir.into() }
    }

    pub fn screenshots_dir(&self) -> &Path {
        &self.screenshots_dir
    }

    pub fn screenshot_path(&self, account_id: &str, error_type: &str, at: DateTime<Utc>) -> PathBuf {
        self.screenshots_dir.join(format!(
            "{}_{}_{}.png",
            sanitize(account_id),
            sanitize(error_type),
            at.timestamp_millis()
        ))
    }

    /// Full-page screenshot of `page`; `None` when anything went wrong
    pub async fn capture(&self, page: &dyn PageSurface, account_id: &str, error_type: &str) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.screenshots_dir).await {
            warn!(account = %account_id, "Cannot create screenshot dir {:?}: {}", self.screenshots_dir, e);
            return None;
        }

        let path = self.screenshot_path(account_id, error_type, Utc::now());
        match page.screenshot(&path).await {
            Ok(()) => {
                info!(account = %account_id, error_type, "📸 Screenshot saved: {:?}", path);
                Some(path)
            }
            Err(e) => {
                warn!(account = %account_id, error_type, "Screenshot failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedPage;
    use chrono::TimeZone;

    #[test]
    fn screenshot_name_is_stable_and_safe() {
        let diagnostics = Diagnostics::new("/tmp/shots");
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();

        let path = diagnostics.screenshot_path("acc/01", "login_required", at);

        assert_eq!(path, PathBuf::from("/tmp/shots/acc-01_login_required_1700000000123.png"));
    }

    #[tokio::test]
    async fn capture_writes_into_created_directory() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path().join("screenshots"));
        let page = ScriptedPage::new();

        let path = diagnostics.capture(&page, "A1", "ads_error").await.unwrap();

        assert!(path.exists());
        assert_eq!(page.screenshots(), vec![path]);
    }

    #[tokio::test]
    async fn capture_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let diagnostics = Diagnostics::new(dir.path());
        let page = ScriptedPage::new().failing_screenshots();

        assert!(diagnostics.capture(&page, "A1", "ads_error").await.is_none());
    }
}

//! Browser automation surface consumed by the engine
//!
//! A session is stateful and non-reentrant: every call takes `&mut self`,
//! so one run drives one page at a time.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::CaptureResult;
use crate::target::{Locator, Target};

/// Default bound on page-readiness waits
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait BrowserSession: Send {
    /// Load a URL in the current window
    async fn navigate(&mut self, url: &Url) -> CaptureResult<()>;

    /// Wait until an element matching `locator` is present.
    /// Exceeding `timeout` is a `CaptureError::Timeout`.
    async fn wait_for_locator(&mut self, locator: &Locator, timeout: Duration) -> CaptureResult<()>;

    async fn click(&mut self, locator: &Locator) -> CaptureResult<()>;

    async fn current_url(&mut self) -> CaptureResult<Url>;

    /// PNG screenshot of the current viewport
    async fn screenshot_bytes(&mut self) -> CaptureResult<Vec<u8>>;

    /// PNG screenshot of the first element matching `locator`
    async fn element_screenshot_bytes(&mut self, locator: &Locator) -> CaptureResult<Vec<u8>>;

    /// Serialized DOM of the current page
    async fn page_source(&mut self) -> CaptureResult<String>;
}

/// Load `url` and wait for `handle` to be present
pub async fn navigate_to(
    session: &mut dyn BrowserSession,
    url: &Url,
    handle: &Locator,
    timeout: Duration,
) -> CaptureResult<()> {
    debug!("Navigating to {} (waiting for {})", url, handle);
    session.navigate(url).await?;
    session.wait_for_locator(handle, timeout).await
}

/// Load a target's URL and wait for its readiness locator
pub async fn open_target(
    session: &mut dyn BrowserSession,
    target: &Target,
    timeout: Duration,
) -> CaptureResult<()> {
    navigate_to(session, target.url(), target.handle(), timeout).await
}

/// Click `click_this` once present, then wait for `next_handle` on the
/// resulting page. Returns the URL the click landed on.
pub async fn navigate_by_click(
    session: &mut dyn BrowserSession,
    click_this: &Locator,
    next_handle: &Locator,
    timeout: Duration,
) -> CaptureResult<Url> {
    session.wait_for_locator(click_this, timeout).await?;
    session.click(click_this).await?;
    session.wait_for_locator(next_handle, timeout).await?;
    let landed = session.current_url().await?;
    debug!("Clicked {} and landed on {}", click_this, landed);
    Ok(landed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;

    /// Two-page site: clicking `#next` on `/` leads to `/next`
    struct TwoPages {
        current: Url,
        calls: Vec<String>,
    }

    impl TwoPages {
        fn new() -> Self {
            Self {
                current: Url::parse("http://example.com/").unwrap(),
                calls: Vec::new(),
            }
        }

        fn present(&self, locator: &Locator) -> bool {
            match self.current.path() {
                "/" => locator.value() == "#next",
                _ => locator.value() == "#done",
            }
        }
    }

    #[async_trait]
    impl BrowserSession for TwoPages {
        async fn navigate(&mut self, url: &Url) -> CaptureResult<()> {
            self.calls.push(format!("navigate {}", url.path()));
            self.current = url.clone();
            Ok(())
        }

        async fn wait_for_locator(&mut self, locator: &Locator, timeout: Duration) -> CaptureResult<()> {
            self.calls.push(format!("wait {}", locator));
            if self.present(locator) {
                Ok(())
            } else {
                Err(CaptureError::Timeout {
                    locator: locator.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
        }

        async fn click(&mut self, locator: &Locator) -> CaptureResult<()> {
            self.calls.push(format!("click {}", locator));
            if !self.present(locator) {
                return Err(CaptureError::ElementNotFound(locator.to_string()));
            }
            self.current = self.current.join("/next").unwrap();
            Ok(())
        }

        async fn current_url(&mut self) -> CaptureResult<Url> {
            Ok(self.current.clone())
        }

        async fn screenshot_bytes(&mut self) -> CaptureResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn element_screenshot_bytes(&mut self, _locator: &Locator) -> CaptureResult<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn page_source(&mut self) -> CaptureResult<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn test_navigate_by_click() {
        let mut session = TwoPages::new();
        let landed = navigate_by_click(
            &mut session,
            &Locator::css("#next"),
            &Locator::css("#done"),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(landed.path(), "/next");
        assert_eq!(session.calls, ["wait css=#next", "click css=#next", "wait css=#done"]);
    }

    #[tokio::test]
    async fn test_navigate_by_click_times_out_on_next_page() {
        let mut session = TwoPages::new();
        let err = navigate_by_click(
            &mut session,
            &Locator::css("#next"),
            &Locator::css("#missing"),
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CaptureError::Timeout { seconds: 2, .. }));
        assert_eq!(session.calls.len(), 3);
    }

    #[tokio::test]
    async fn test_navigate_to_waits_for_handle() {
        let mut session = TwoPages::new();
        let url = Url::parse("http://example.com/").unwrap();
        navigate_to(&mut session, &url, &Locator::css("#next"), DEFAULT_WAIT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(session.calls, ["navigate /", "wait css=#next"]);
    }
}

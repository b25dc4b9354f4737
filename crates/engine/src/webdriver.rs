//! W3C WebDriver client implementing `BrowserSession`
//!
//! Talks the WebDriver wire protocol over HTTP to chromedriver,
//! geckodriver, a Selenium grid or any compatible endpoint.

use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{sleep, timeout as within};
use tracing::{debug, info, warn};
use url::Url;

use crate::driver::BrowserSession;
use crate::error::{CaptureError, CaptureResult};
use crate::target::Locator;

/// Key under which the protocol returns element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f861d3d0e5a";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chrome,
    Firefox,
    Edge,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Firefox => "firefox",
            Browser::Edge => "MicrosoftEdge",
        }
    }
}

impl FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chrome" | "chromium" => Ok(Browser::Chrome),
            "firefox" => Ok(Browser::Firefox),
            "edge" | "microsoftedge" => Ok(Browser::Edge),
            other => Err(format!("unknown browser '{}'", other)),
        }
    }
}

/// Configuration for a WebDriver session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebDriverConfig {
    /// Base URL of the WebDriver server
    pub endpoint: String,

    pub browser: Browser,

    pub headless: bool,

    /// Window dimensions
    pub width: u32,
    pub height: u32,

    /// Interval between presence checks while waiting for a locator
    pub poll_interval_ms: u64,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:4444".to_string(),
            browser: Browser::Chrome,
            headless: true,
            width: 1024,
            height: 1000,
            poll_interval_ms: 100,
            request_timeout_secs: 30,
        }
    }
}

impl WebDriverConfig {
    fn capabilities(&self) -> Value {
        let mut args = Vec::new();
        let mut always_match = json!({ "browserName": self.browser.as_str() });
        match self.browser {
            Browser::Chrome | Browser::Edge => {
                if self.headless {
                    args.push("--headless=new".to_string());
                }
                args.push(format!("--window-size={},{}", self.width, self.height));
                args.push("--remote-allow-origins=*".to_string());
                let key = if self.browser == Browser::Chrome {
                    "goog:chromeOptions"
                } else {
                    "ms:edgeOptions"
                };
                always_match[key] = json!({ "args": args });
            }
            Browser::Firefox => {
                if self.headless {
                    args.push("-headless".to_string());
                }
                always_match["moz:firefoxOptions"] = json!({ "args": args });
            }
        }
        json!({ "capabilities": { "alwaysMatch": always_match } })
    }
}

#[derive(Debug, Deserialize)]
struct NewSession {
    #[serde(rename = "sessionId")]
    session_id: String,
}

/// An open WebDriver session
pub struct WebDriverSession {
    client: reqwest::Client,
    session_url: String,
    session_id: String,
    poll_interval: Duration,
    closed: bool,
}

impl WebDriverSession {
    /// Create a new browser session
    pub async fn start(config: &WebDriverConfig) -> CaptureResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let endpoint = config.endpoint.trim_end_matches('/');

        info!("Starting {} session at {}", config.browser.as_str(), endpoint);

        let response = client
            .post(format!("{}/session", endpoint))
            .json(&config.capabilities())
            .send()
            .await?;
        let value = Self::unwrap_value(response).await?;
        let created: NewSession = serde_json::from_value(value).map_err(|e| CaptureError::Protocol {
            error: "invalid session response".to_string(),
            message: e.to_string(),
        })?;

        let session = Self {
            client,
            session_url: format!("{}/session/{}", endpoint, created.session_id),
            session_id: created.session_id,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            closed: false,
        };

        // Firefox ignores window-size args; set the rect explicitly
        session
            .command(
                Method::POST,
                "/window/rect",
                Some(json!({ "width": config.width, "height": config.height })),
            )
            .await?;

        info!("Session {} ready", session.session_id);
        Ok(session)
    }

    /// End the session and close the browser
    pub async fn quit(mut self) -> CaptureResult<()> {
        self.closed = true;
        self.command(Method::DELETE, "", None).await?;
        info!("Session {} closed", self.session_id);
        Ok(())
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> CaptureResult<Value> {
        let url = format!("{}{}", self.session_url, path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        Self::unwrap_value(request.send().await?).await
    }

    /// Extract `value` from a protocol response, mapping protocol errors
    async fn unwrap_value(response: reqwest::Response) -> CaptureResult<Value> {
        let status = response.status();
        let body: Value = response.json().await?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);

        if let Some(error) = value.get("error").and_then(Value::as_str) {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if error == "no such element" {
                return Err(CaptureError::ElementNotFound(message));
            }
            return Err(CaptureError::Protocol {
                error: error.to_string(),
                message,
            });
        }
        if !status.is_success() {
            return Err(CaptureError::Protocol {
                error: status.to_string(),
                message: value.to_string(),
            });
        }
        Ok(value)
    }

    async fn find_element(&self, locator: &Locator) -> CaptureResult<String> {
        let value = self
            .command(
                Method::POST,
                "/element",
                Some(json!({ "using": locator.strategy(), "value": locator.value() })),
            )
            .await?;
        value
            .get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CaptureError::ElementNotFound(locator.to_string()))
    }

    fn source_text(value: Value) -> CaptureResult<String> {
        match value {
            Value::String(source) => Ok(source),
            other => Err(CaptureError::Protocol {
                error: "invalid page source".to_string(),
                message: format!("expected a string, got {}", other),
            }),
        }
    }

    fn decode_png(value: Value) -> CaptureResult<Vec<u8>> {
        let encoded = value
            .as_str()
            .ok_or_else(|| CaptureError::Payload("screenshot is not a string".to_string()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CaptureError::Payload(e.to_string()))
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &Url) -> CaptureResult<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url.as_str() })))
            .await
            .map(|_| ())
            .map_err(|e| CaptureError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn wait_for_locator(&mut self, locator: &Locator, timeout: Duration) -> CaptureResult<()> {
        let this = &*self;
        poll_for_presence(move || this.find_element(locator), locator, timeout, this.poll_interval).await
    }

    async fn click(&mut self, locator: &Locator) -> CaptureResult<()> {
        let element = self.find_element(locator).await?;
        self.command(
            Method::POST,
            &format!("/element/{}/click", element),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn current_url(&mut self) -> CaptureResult<Url> {
        let value = self.command(Method::GET, "/url", None).await?;
        let raw = value.as_str().unwrap_or_default();
        Url::parse(raw).map_err(|e| CaptureError::Protocol {
            error: "invalid current url".to_string(),
            message: format!("{}: {}", raw, e),
        })
    }

    async fn screenshot_bytes(&mut self) -> CaptureResult<Vec<u8>> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        Self::decode_png(value)
    }

    async fn element_screenshot_bytes(&mut self, locator: &Locator) -> CaptureResult<Vec<u8>> {
        let element = self.find_element(locator).await?;
        let value = self
            .command(Method::GET, &format!("/element/{}/screenshot", element), None)
            .await?;
        Self::decode_png(value)
    }

    async fn page_source(&mut self) -> CaptureResult<String> {
        let value = self.command(Method::GET, "/source", None).await?;
        Self::source_text(value)
    }
}

/// Poll `find` until it reports the element present. The whole wait,
/// including a request the driver never answers, is bounded by `timeout`.
async fn poll_for_presence<F, Fut>(
    mut find: F,
    locator: &Locator,
    timeout: Duration,
    poll_interval: Duration,
) -> CaptureResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CaptureResult<String>>,
{
    let deadline = Instant::now() + timeout;
    let expired = || CaptureError::Timeout {
        locator: locator.to_string(),
        seconds: timeout.as_secs(),
    };

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match within(remaining, find()).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(CaptureError::ElementNotFound(_))) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(expired()),
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(expired());
        }
        sleep(poll_interval.min(remaining)).await;
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Session {} dropped without quit(); the browser may still be running", self.session_id);
        }
    }
}

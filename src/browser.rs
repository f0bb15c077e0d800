// src/browser.rs
//! Minimal W3C WebDriver client plus the polling primitive the scripted
//! browser flows are built on.
//!
//! Only the commands the board adapter and the blog mirror need are
//! implemented. Every command is a plain HTTP round trip to the driver
//! (chromedriver, selenium, ...), so there is no extra runtime to manage.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};

/// W3C key for element references in responses.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecc";

const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Poll `probe` until it yields `Some`, sleeping `interval` between attempts.
/// Fails once `timeout` has elapsed. `what` names the condition in the error.
pub async fn wait_until<T, F, Fut>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(v) = probe().await {
            return Ok(v);
        }
        if Instant::now() >= deadline {
            bail!("timed out after {:?} waiting for {what}", timeout);
        }
        sleep(interval).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locator<'a> {
    Css(&'a str),
    XPath(&'a str),
}

impl Locator<'_> {
    fn body(&self) -> Value {
        match self {
            Locator::Css(s) => json!({ "using": "css selector", "value": s }),
            Locator::XPath(s) => json!({ "using": "xpath", "value": s }),
        }
    }
}

/// Opaque element reference returned by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(String);

impl ElementRef {
    fn as_json(&self) -> Value {
        json!({ ELEMENT_KEY: self.0 })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    value: Value,
}

/// Error payload of a failed command (`{"value": {"error": ..., "message": ...}}`).
fn command_error(value: &Value) -> Option<String> {
    let err = value.get("error")?.as_str()?;
    let msg = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default();
    Some(format!("{err}: {msg}"))
}

/// One browser session. Call [`Session::quit`] when done.
pub struct Session {
    http: Client,
    base: String,
    id: String,
}

impl Session {
    /// Start a headless Chrome session on the driver at `driver_url`.
    pub async fn start(driver_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(COMMAND_TIMEOUT)
            .build()
            .context("building webdriver http client")?;
        let base = driver_url.trim_end_matches('/').to_string();
        let caps = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--no-sandbox",
                            "--disable-dev-shm-usage",
                            "--disable-gpu",
                            "--window-size=1920,1080"
                        ]
                    }
                }
            }
        });
        let resp = http
            .post(format!("{base}/session"))
            .json(&caps)
            .send()
            .await
            .context("webdriver new session")?;
        let env: Envelope = resp.json().await.context("webdriver session body")?;
        if let Some(e) = command_error(&env.value) {
            bail!("webdriver refused session: {e}");
        }
        let id = env
            .value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("webdriver session without id"))?
            .to_string();
        tracing::debug!(session = %id, "webdriver session started");
        Ok(Self { http, base, id })
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/session/{}{}", self.base, self.id, suffix)
    }

    async fn command(&self, method: reqwest::Method, suffix: &str, body: Option<Value>) -> Result<Value> {
        let mut rb = self.http.request(method, self.url(suffix));
        if let Some(b) = body {
            rb = rb.json(&b);
        }
        let resp = rb
            .send()
            .await
            .with_context(|| format!("webdriver {suffix}"))?;
        let env: Envelope = resp
            .json()
            .await
            .with_context(|| format!("webdriver {suffix} body"))?;
        if let Some(e) = command_error(&env.value) {
            bail!("webdriver {suffix}: {e}");
        }
        Ok(env.value)
    }

    async fn post(&self, suffix: &str, body: Value) -> Result<Value> {
        self.command(reqwest::Method::POST, suffix, Some(body)).await
    }

    async fn get(&self, suffix: &str) -> Result<Value> {
        self.command(reqwest::Method::GET, suffix, None).await
    }

    pub async fn goto(&self, url: &str) -> Result<()> {
        self.post("/url", json!({ "url": url })).await.map(drop)
    }

    pub async fn current_url(&self) -> Result<String> {
        let v = self.get("/url").await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    pub async fn page_source(&self) -> Result<String> {
        let v = self.get("/source").await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    pub async fn back(&self) -> Result<()> {
        self.post("/back", json!({})).await.map(drop)
    }

    pub async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
            .await
    }

    pub async fn find(&self, locator: Locator<'_>) -> Result<ElementRef> {
        let v = self.post("/element", locator.body()).await?;
        v.get(ELEMENT_KEY)
            .and_then(Value::as_str)
            .map(|s| ElementRef(s.to_string()))
            .ok_or_else(|| anyhow!("webdriver element response without reference"))
    }

    /// Wait until `locator` resolves to an element.
    pub async fn wait_for(&self, locator: Locator<'_>, timeout: Duration) -> Result<ElementRef> {
        wait_until(
            &format!("{locator:?}"),
            timeout,
            DEFAULT_POLL_INTERVAL,
            || async move { self.find(locator).await.ok() },
        )
        .await
    }

    /// Wait until the current URL contains `fragment`.
    pub async fn wait_for_url(&self, fragment: &str, timeout: Duration) -> Result<String> {
        wait_until(
            &format!("url containing {fragment}"),
            timeout,
            DEFAULT_POLL_INTERVAL,
            || async move {
                self.current_url()
                    .await
                    .ok()
                    .filter(|u| u.contains(fragment))
            },
        )
        .await
    }

    pub async fn click(&self, el: &ElementRef) -> Result<()> {
        self.post(&format!("/element/{}/click", el.0), json!({}))
            .await
            .map(drop)
    }

    /// Click through JavaScript; survives overlays that swallow real clicks.
    pub async fn js_click(&self, el: &ElementRef) -> Result<()> {
        self.execute("arguments[0].click();", vec![el.as_json()])
            .await
            .map(drop)
    }

    pub async fn send_keys(&self, el: &ElementRef, text: &str) -> Result<()> {
        self.post(
            &format!("/element/{}/value", el.0),
            json!({ "text": text }),
        )
        .await
        .map(drop)
    }

    pub async fn set_inner_html(&self, el: &ElementRef, html: &str) -> Result<()> {
        self.execute(
            "arguments[0].innerHTML = arguments[1];",
            vec![el.as_json(), Value::String(html.to_string())],
        )
        .await
        .map(drop)
    }

    pub async fn switch_to_frame(&self, el: &ElementRef) -> Result<()> {
        self.post("/frame", json!({ "id": el.as_json() }))
            .await
            .map(drop)
    }

    pub async fn switch_to_top(&self) -> Result<()> {
        self.post("/frame", json!({ "id": Value::Null }))
            .await
            .map(drop)
    }

    /// Text of the open alert, or `None` when no alert is showing.
    pub async fn alert_text(&self) -> Option<String> {
        self.get("/alert/text")
            .await
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub async fn dismiss_alert(&self) -> Result<()> {
        self.post("/alert/dismiss", json!({})).await.map(drop)
    }

    pub async fn accept_alert(&self) -> Result<()> {
        self.post("/alert/accept", json!({})).await.map(drop)
    }

    /// End the session. Errors are logged, never returned.
    pub async fn quit(self) {
        let res = self
            .http
            .delete(format!("{}/session/{}", self.base, self.id))
            .send()
            .await;
        match res {
            Ok(_) => tracing::debug!(session = %self.id, "webdriver session closed"),
            Err(e) => tracing::warn!(session = %self.id, error = %e, "webdriver quit failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test(start_paused = true)]
    async fn wait_until_returns_first_some() {
        let polls = AtomicUsize::new(0);
        let out = wait_until(
            "third poll",
            Duration::from_secs(5),
            Duration::from_millis(100),
            || {
                let n = polls.fetch_add(1, Ordering::SeqCst);
                async move { (n >= 2).then_some(n) }
            },
        )
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_until_times_out() {
        let err = wait_until::<(), _, _>(
            "never",
            Duration::from_secs(1),
            Duration::from_millis(200),
            || async { None },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("never"));
    }

    #[tokio::test]
    async fn session_roundtrip_against_fake_driver() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { "sessionId": "s1", "capabilities": {} }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/s1/element"))
            .and(body_partial_json(json!({ "using": "css selector" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": { ELEMENT_KEY: "e-7" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/s1/url"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "value": "https://a/b" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/session/s1/alert/text"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "value": { "error": "no such alert", "message": "none" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/session/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": null })))
            .expect(1)
            .mount(&server)
            .await;

        let s = Session::start(&server.uri()).await.unwrap();
        let el = s.find(Locator::Css("#x")).await.unwrap();
        assert_eq!(el, ElementRef("e-7".into()));
        assert_eq!(s.current_url().await.unwrap(), "https://a/b");
        assert!(s.alert_text().await.is_none());
        s.quit().await;
    }
}

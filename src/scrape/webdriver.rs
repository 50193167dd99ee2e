use crate::scrape::{Browser, BrowserError, ElementHandle};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// W3C key under which element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

pub const CHROME_ARGS: &[&str] = &[
    "--start-maximized",
    "--lang=fr-FR",
    "--user-data-dir=.profile",
    "--disable-features=ExtensionManifestV2Unsupported,ExtensionManifestV2Disabled",
];

/// Minimal W3C WebDriver client (chromedriver, geckodriver, …) covering the
/// commands the scraper needs.
pub struct WebDriverBrowser {
    http: Client,
    base_url: String,
    session_id: String,
    poll_interval: Duration,
}

impl WebDriverBrowser {
    pub async fn start(
        http: Client,
        webdriver_url: &str,
        args: &[&str],
    ) -> Result<Self, BrowserError> {
        let base_url = webdriver_url.trim_end_matches('/').to_string();
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args },
                }
            }
        });
        let value = send(&http, Method::POST, &format!("{base_url}/session"), Some(&capabilities)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol {
                status: 200,
                message: "session response without sessionId".into(),
            })?
            .to_string();
        info!(target = "lbc.scrape", session_id = %session_id, "webdriver_session_started");
        Ok(Self {
            http,
            base_url,
            session_id,
            poll_interval: Duration::from_millis(250),
        })
    }

    pub async fn quit(self) -> Result<(), BrowserError> {
        send(&self.http, Method::DELETE, &self.session_url(""), None).await?;
        info!(target = "lbc.scrape", session_id = %self.session_id, "webdriver_session_closed");
        Ok(())
    }

    fn session_url(&self, suffix: &str) -> String {
        format!("{}/session/{}{}", self.base_url, self.session_id, suffix)
    }

    async fn command(
        &self,
        method: Method,
        suffix: &str,
        body: Option<&Value>,
    ) -> Result<Value, BrowserError> {
        send(&self.http, method, &self.session_url(suffix), body).await
    }

    async fn locate_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, BrowserError> {
        let suffix = match scope {
            Some(parent) => format!("/element/{}/elements", parent.0),
            None => "/elements".to_string(),
        };
        let body = json!({ "using": "css selector", "value": selector });
        let value = self.command(Method::POST, &suffix, Some(&body)).await?;
        let items = value.as_array().cloned().unwrap_or_default();
        Ok(items
            .iter()
            .filter_map(|item| item.get(ELEMENT_KEY).and_then(Value::as_str))
            .map(|id| ElementHandle(id.to_string()))
            .collect())
    }
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        debug!(target = "lbc.scrape", url, "navigate");
        self.command(Method::POST, "/url", Some(&json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn find(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<ElementHandle>, BrowserError> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        loop {
            if let Some(first) = self.locate_all(scope, selector).await?.into_iter().next() {
                return Ok(Some(first));
            }
            match deadline {
                Some(deadline) if Instant::now() < deadline => sleep(self.poll_interval).await,
                _ => return Ok(None),
            }
        }
    }

    async fn find_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, BrowserError> {
        self.locate_all(scope, selector).await
    }

    async fn text(&self, element: &ElementHandle) -> Result<String, BrowserError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.0), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/attribute/{name}", element.0),
                None,
            )
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element.0),
            Some(&json!({})),
        )
        .await?;
        Ok(())
    }
}

/// Sends one command and unwraps the `value` envelope.
async fn send(
    http: &Client,
    method: Method,
    url: &str,
    body: Option<&Value>,
) -> Result<Value, BrowserError> {
    let mut request = http.request(method, url);
    if let Some(body) = body {
        request = request.json(body);
    }
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    let payload: Value = response.json().await.map_err(transport_error)?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let message = value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("unknown webdriver error")
            .to_string();
        return Err(BrowserError::Protocol {
            status: status.as_u16(),
            message,
        });
    }
    Ok(value)
}

fn transport_error(err: reqwest::Error) -> BrowserError {
    if err.is_timeout() {
        BrowserError::Timeout(err.to_string())
    } else {
        BrowserError::Request(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    fn session_mock(server: &MockServer) -> httpmock::Mock<'_> {
        server.mock(|when, then| {
            when.method("POST").path("/session");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"value":{"sessionId":"s1","capabilities":{}}}"#);
        })
    }

    #[tokio::test]
    async fn session_find_read_and_click() -> Result<(), BrowserError> {
        let server = MockServer::start();
        let session = session_mock(&server);
        let elements = server.mock(|when, then| {
            when.method("POST")
                .path("/session/s1/elements")
                .json_body(json!({ "using": "css selector", "value": "article" }));
            then.status(200).body(format!(r#"{{"value":[{{"{ELEMENT_KEY}":"e1"}}]}}"#));
        });
        let text = server.mock(|when, then| {
            when.method("GET").path("/session/s1/element/e1/text");
            then.status(200).body(r#"{"value":"Locomotive BB"}"#);
        });
        let href = server.mock(|when, then| {
            when.method("GET").path("/session/s1/element/e1/attribute/href");
            then.status(200).body(r#"{"value":"/ad/jouets/1"}"#);
        });
        let click = server.mock(|when, then| {
            when.method("POST").path("/session/s1/element/e1/click");
            then.status(200).body(r#"{"value":null}"#);
        });

        let browser = WebDriverBrowser::start(Client::new(), &server.base_url(), CHROME_ARGS).await?;
        let found = browser.find_all(None, "article").await?;
        assert_eq!(found, vec![ElementHandle("e1".into())]);
        assert_eq!(browser.text(&found[0]).await?, "Locomotive BB");
        assert_eq!(
            browser.attribute(&found[0], "href").await?.as_deref(),
            Some("/ad/jouets/1")
        );
        browser.click(&found[0]).await?;

        session.assert();
        elements.assert();
        text.assert();
        href.assert();
        click.assert();
        Ok(())
    }

    #[tokio::test]
    async fn find_with_timeout_gives_up_when_nothing_matches() -> Result<(), BrowserError> {
        let server = MockServer::start();
        session_mock(&server);
        server.mock(|when, then| {
            when.method("POST").path("/session/s1/elements");
            then.status(200).body(r#"{"value":[]}"#);
        });

        let browser = WebDriverBrowser::start(Client::new(), &server.base_url(), &[]).await?;
        let found = browser
            .find(None, "button[title='Page 2']", Some(Duration::from_millis(300)))
            .await?;
        assert!(found.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn webdriver_errors_surface_the_message() -> Result<(), BrowserError> {
        let server = MockServer::start();
        session_mock(&server);
        server.mock(|when, then| {
            when.method("GET").path("/session/s1/element/stale/text");
            then.status(404)
                .body(r#"{"value":{"error":"no such element","message":"stale element"}}"#);
        });

        let browser = WebDriverBrowser::start(Client::new(), &server.base_url(), &[]).await?;
        let err = browser
            .text(&ElementHandle("stale".into()))
            .await
            .expect_err("404");
        assert!(matches!(err, BrowserError::Protocol { status: 404, ref message } if message == "stale element"));
        Ok(())
    }
}

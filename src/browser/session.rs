use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{CartwatchError, Result};

/// Page info from CDP /json/list endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(rename = "type")]
    pub page_type: String,
    pub web_socket_debugger_url: Option<String>,
}

/// Connection to the one browser tab showing the catalog.
///
/// Every call looks the tab up again through `/json/list` and opens a fresh
/// page WebSocket, so a reload or a reconnecting browser never leaves a
/// stale socket behind.
#[derive(Debug, Clone)]
pub struct CdpSession {
    http_base: String,
    host: String,
    client: reqwest::Client,
}

impl CdpSession {
    /// `endpoint` is a CDP port, an `http://host:port` URL or a browser `ws://` URL.
    /// `host` is the substring the catalog tab's URL must contain.
    pub fn new(endpoint: &str, host: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http_base: resolve_http_base(endpoint)?,
            host: host.to_string(),
            client,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get list of pages from the browser
    pub async fn get_pages(&self) -> Result<Vec<PageInfo>> {
        let url = format!("{}/json/list", self.http_base);

        let response = self.client.get(&url).send().await.map_err(|e| {
            CartwatchError::CdpConnectionFailed(format!(
                "Cannot reach CDP at {}. Is the browser running with --remote-debugging-port? ({})",
                self.http_base, e
            ))
        })?;

        let pages: Vec<PageInfo> = response.json().await.map_err(|e| {
            CartwatchError::CdpConnectionFailed(format!("Failed to parse pages: {}", e))
        })?;

        // Filter to only include actual pages (not extensions, service workers, etc.)
        Ok(pages
            .into_iter()
            .filter(|p| p.page_type == "page")
            .collect())
    }

    /// The first tab whose URL contains the configured host.
    pub async fn target_page(&self) -> Result<PageInfo> {
        let pages = self.get_pages().await?;
        select_target(pages, &self.host)
            .ok_or_else(|| CartwatchError::PageNotFound(self.host.clone()))
    }

    /// Evaluate JavaScript on the catalog tab and return the result by value
    pub async fn eval(&self, expression: &str) -> Result<serde_json::Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                serde_json::json!({
                    "expression": expression,
                    "returnByValue": true
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let msg = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .or_else(|| exception.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("JavaScript exception");
            return Err(CartwatchError::JavaScriptError(msg.to_string()));
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    /// Send a CDP command to the catalog tab and wait for its response
    pub async fn send_command(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let page = self.target_page().await?;
        let ws_url = page
            .web_socket_debugger_url
            .ok_or_else(|| CartwatchError::CdpConnectionFailed("No WebSocket URL".to_string()))?;

        let (mut ws, _) = connect_async(&ws_url).await.map_err(|e| {
            CartwatchError::CdpConnectionFailed(format!("WebSocket connection failed: {}", e))
        })?;

        let cmd = serde_json::json!({
            "id": 1,
            "method": method,
            "params": params
        });

        ws.send(Message::Text(cmd.to_string().into()))
            .await
            .map_err(|e| CartwatchError::Other(format!("Failed to send command: {}", e)))?;

        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let response: serde_json::Value = serde_json::from_str(text.as_str())?;
                    if response.get("id") == Some(&serde_json::json!(1)) {
                        if let Some(error) = response.get("error") {
                            return Err(CartwatchError::Other(format!("CDP error: {}", error)));
                        }
                        return Ok(response
                            .get("result")
                            .cloned()
                            .unwrap_or(serde_json::Value::Null));
                    }
                }
                Ok(_) => continue,
                Err(e) => return Err(CartwatchError::Other(format!("WebSocket error: {}", e))),
            }
        }

        Err(CartwatchError::Other("No response received".to_string()))
    }

    /// Left-click at viewport coordinates.
    pub async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        // Move first so the browser updates its hit-test target before the press.
        self.send_command(
            "Input.dispatchMouseEvent",
            serde_json::json!({ "type": "mouseMoved", "x": x, "y": y }),
        )
        .await?;

        for event_type in ["mousePressed", "mouseReleased"] {
            self.send_command(
                "Input.dispatchMouseEvent",
                serde_json::json!({
                    "type": event_type,
                    "x": x,
                    "y": y,
                    "button": "left",
                    "clickCount": 1
                }),
            )
            .await?;
        }

        Ok(())
    }

    /// Reload the catalog tab and wait until the new document has finished loading.
    pub async fn reload_and_wait(&self, timeout: Duration) -> Result<()> {
        // Tag the old document so it cannot be mistaken for the reloaded one.
        self.eval("window.__cartwatchStale = true").await?;
        self.send_command("Page.reload", serde_json::json!({}))
            .await?;

        let start = std::time::Instant::now();
        loop {
            // The tab may be between documents; treat that as "not ready yet".
            let ready = self
                .eval("!window.__cartwatchStale && document.readyState === 'complete'")
                .await
                .map(|v| v.as_bool().unwrap_or(false))
                .unwrap_or(false);

            if ready {
                return Ok(());
            }

            if start.elapsed() > timeout {
                return Err(CartwatchError::Timeout(format!(
                    "Page did not finish reloading within {}ms",
                    timeout.as_millis()
                )));
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Pick the first page whose URL contains `host`.
pub fn select_target(pages: Vec<PageInfo>, host: &str) -> Option<PageInfo> {
    pages.into_iter().find(|p| p.url.contains(host))
}

/// Turn a CDP endpoint (port, http URL or ws URL) into its HTTP base URL.
pub fn resolve_http_base(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim();

    if let Ok(port) = endpoint.parse::<u16>() {
        return Ok(format!("http://127.0.0.1:{}", port));
    }

    let (scheme, rest) = endpoint.split_once("://").ok_or_else(|| {
        CartwatchError::ConfigError(format!("Invalid CDP endpoint: {}", endpoint))
    })?;

    let authority = rest.split('/').next().unwrap_or("");
    if authority.is_empty() {
        return Err(CartwatchError::ConfigError(format!(
            "Invalid CDP endpoint: {}",
            endpoint
        )));
    }

    let http_scheme = match scheme {
        "http" | "ws" => "http",
        "https" | "wss" => "https",
        other => {
            return Err(CartwatchError::ConfigError(format!(
                "Unsupported CDP endpoint scheme: {}",
                other
            )))
        }
    };

    Ok(format!("{}://{}", http_scheme, authority))
}

//! Rendering collaborator: turns a URL into HTML after client-side scripts ran.
//!
//! The crawl holds exactly one [`RenderSession`] per worker. Sessions are
//! wrapped in a [`SessionGuard`] so they are closed on every exit path.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Serialize;

use crate::error::{HarvesterError, Result};
use crate::links::contains_selector;

/// Extra time the HTTP client waits beyond the ready-condition timeout.
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

/// Consecutive connection failures after which a session is considered lost.
const MAX_CONNECT_FAILURES: u32 = 3;

/// A single rendering session, owned by one worker at a time.
pub trait RenderSession: Send {
    /// Render `url` and return its HTML once `selector` is present.
    ///
    /// Fails with `HarvesterError::RenderTimeout` when the marker does not
    /// appear within `timeout`.
    fn render_when_present(
        &mut self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<String>;

    /// Release the session. Further renders fail with `SessionUnavailable`.
    fn close(&mut self) -> Result<()>;
}

/// Opens rendering sessions.
pub trait SessionProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn RenderSession>>;
}

/// Owns a session and closes it when dropped.
pub struct SessionGuard {
    session: Box<dyn RenderSession>,
    closed: bool,
}

impl SessionGuard {
    /// Open a session from `provider` and guard it.
    pub fn open(provider: &dyn SessionProvider) -> Result<Self> {
        Ok(Self::new(provider.open()?))
    }

    #[must_use]
    pub fn new(session: Box<dyn RenderSession>) -> Self {
        Self {
            session,
            closed: false,
        }
    }

    /// Close explicitly, surfacing any error.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.session.close()
    }
}

impl Deref for SessionGuard {
    type Target = dyn RenderSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.session.close() {
            tracing::warn!(error = %e, "failed to close rendering session");
        }
    }
}

/// Opens sessions against a Browserless-compatible `/content` endpoint.
///
/// NOTE: Do NOT derive `Debug` on this struct, `token` would be exposed.
pub struct BrowserlessSessionProvider {
    base_url: String,
    token: Option<String>,
    render_timeout: Duration,
}

impl BrowserlessSessionProvider {
    #[must_use]
    pub fn new(base_url: &str, token: Option<&str>, render_timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
            render_timeout,
        }
    }
}

impl SessionProvider for BrowserlessSessionProvider {
    fn open(&self) -> Result<Box<dyn RenderSession>> {
        let client = Client::builder()
            .timeout(self.render_timeout + REQUEST_TIMEOUT_SLACK)
            .build()
            .map_err(|e| HarvesterError::SessionUnavailable(e.to_string()))?;

        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        tracing::debug!(base_url = %self.base_url, "opened rendering session");
        Ok(Box::new(BrowserlessSession {
            client: Some(client),
            endpoint,
            connect_failures: 0,
        }))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentRequest<'a> {
    url: &'a str,
    wait_for_selector: WaitForSelector<'a>,
}

#[derive(Serialize)]
struct WaitForSelector<'a> {
    selector: &'a str,
    timeout: u64,
}

/// One worker's handle on the Browserless service.
struct BrowserlessSession {
    /// `None` once closed.
    client: Option<Client>,
    endpoint: String,
    connect_failures: u32,
}

impl RenderSession for BrowserlessSession {
    fn render_when_present(
        &mut self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<String> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| HarvesterError::SessionUnavailable("session closed".to_string()))?;

        let body = ContentRequest {
            url,
            wait_for_selector: WaitForSelector {
                selector,
                timeout: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            },
        };

        let timed_out = || HarvesterError::RenderTimeout {
            url: url.to_string(),
            selector: selector.to_string(),
            timeout_ms: timeout.as_millis(),
        };

        let response = match client.post(&self.endpoint).json(&body).send() {
            Ok(response) => {
                self.connect_failures = 0;
                response
            }
            Err(e) if e.is_connect() => {
                self.connect_failures += 1;
                if self.connect_failures >= MAX_CONNECT_FAILURES {
                    return Err(HarvesterError::SessionUnavailable(e.to_string()));
                }
                return Err(HarvesterError::Render {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
            Err(e) if e.is_timeout() => return Err(timed_out()),
            Err(e) => {
                return Err(HarvesterError::Render {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            if status == StatusCode::REQUEST_TIMEOUT || message.contains("TimeoutError") {
                return Err(timed_out());
            }
            return Err(HarvesterError::Render {
                url: url.to_string(),
                message: format!("status {status}: {message}"),
            });
        }

        let html = response.text()?;
        if !contains_selector(&html, selector)? {
            return Err(timed_out());
        }
        Ok(html)
    }

    fn close(&mut self) -> Result<()> {
        if self.client.take().is_some() {
            tracing::debug!("closed rendering session");
        }
        Ok(())
    }
}

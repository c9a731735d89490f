//! The wait primitives a browser page must provide, and a WebDriver-backed
//! implementation that polls the live document.
use async_trait::async_trait;
use fantoccini::error::CmdError;
use fantoccini::{Client, Locator};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Element condition accepted by [`PageWaits::wait_for_selector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    /// Present in the document and rendered.
    Visible,
    /// Present in the document, rendered or not.
    Attached,
}

/// Lightweight document lifecycle signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSignal {
    DomContentLoaded,
    Complete,
}

impl LoadSignal {
    /// Script returning `true` once the signal has fired.
    pub fn script(self) -> &'static str {
        match self {
            LoadSignal::DomContentLoaded => "return document.readyState !== 'loading';",
            LoadSignal::Complete => "return document.readyState === 'complete';",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum WaitError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("browser session error: {0}")]
    Session(String),
}

impl From<CmdError> for WaitError {
    fn from(err: CmdError) -> Self {
        WaitError::Session(err.to_string())
    }
}

/// Wait primitives consumed by the readiness protocol. Each call is a single
/// bounded attempt; none of them retry past their timeout.
#[async_trait]
pub trait PageWaits: Send + Sync {
    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        timeout: Duration,
    ) -> Result<(), WaitError>;

    /// Poll `script` (a function body returning a boolean) until it yields `true`.
    async fn wait_for_predicate(&self, script: &str, timeout: Duration) -> Result<(), WaitError>;

    async fn wait_for_load_signal(
        &self,
        signal: LoadSignal,
        timeout: Duration,
    ) -> Result<(), WaitError>;

    async fn wait_for_duration(&self, duration: Duration);
}

/// [`PageWaits`] over the current document of a `fantoccini` client.
#[derive(Clone)]
pub struct SessionPage {
    client: Client,
    poll_interval: Duration,
}

impl SessionPage {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(10));
        self
    }

    async fn poll_until<F, Fut>(&self, timeout: Duration, mut check: F) -> Result<(), WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, WaitError>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if check().await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WaitError::Timeout(timeout));
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn any_displayed(&self, selector: &str) -> Result<bool, WaitError> {
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        for element in elements {
            // Stale handles are treated as hidden; the next poll re-queries.
            if element.is_displayed().await.unwrap_or(false) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn script_is_true(&self, script: &str) -> Result<bool, WaitError> {
        let value = self.client.execute(script, vec![]).await?;
        Ok(matches!(value, Value::Bool(true)))
    }
}

#[async_trait]
impl PageWaits for SessionPage {
    async fn wait_for_selector(
        &self,
        selector: &str,
        state: ElementState,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        match state {
            ElementState::Visible => {
                self.poll_until(timeout, move || self.any_displayed(selector))
                    .await
            }
            ElementState::Attached => {
                match self
                    .client
                    .wait()
                    .at_most(timeout)
                    .every(self.poll_interval)
                    .for_element(Locator::Css(selector))
                    .await
                {
                    Ok(_) => Ok(()),
                    Err(CmdError::WaitTimeout) => Err(WaitError::Timeout(timeout)),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    async fn wait_for_predicate(&self, script: &str, timeout: Duration) -> Result<(), WaitError> {
        self.poll_until(timeout, move || self.script_is_true(script))
            .await
    }

    async fn wait_for_load_signal(
        &self,
        signal: LoadSignal,
        timeout: Duration,
    ) -> Result<(), WaitError> {
        self.wait_for_predicate(signal.script(), timeout).await
    }

    async fn wait_for_duration(&self, duration: Duration) {
        sleep(duration).await;
    }
}

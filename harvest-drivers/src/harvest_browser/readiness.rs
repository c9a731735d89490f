//! Readiness protocol run before interacting with a freshly rendered list.
//!
//! In order: wait for the selector to be visible (fatal on timeout), wait for
//! it to be attached, wait for a minimum element count (soft on timeout),
//! optionally wait for a load signal (timeout swallowed), then settle for a
//! randomized window drawn from the [`TimingEngine`].
use super::pacing::TimingEngine;
use super::page::{ElementState, LoadSignal, PageWaits, WaitError};
use harvest_common::PacingMode;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What to do when the minimum row count is not reached in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RowShortfallPolicy {
    /// Log once and continue with whatever is rendered.
    #[default]
    Proceed,
    /// Fail the wait with [`ReadinessError::RowCountTimeout`].
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadinessConfig {
    pub timeout: Duration,
    pub min_count: usize,
    /// Bound for the optional load-signal step, independent of `timeout`.
    pub secondary_timeout: Duration,
    pub load_signal: Option<LoadSignal>,
    pub settle_min_ms: f64,
    pub settle_max_ms: f64,
    pub shortfall: RowShortfallPolicy,
}

impl ReadinessConfig {
    pub fn for_mode(mode: PacingMode, min_rows_override: Option<usize>) -> Self {
        let base = match mode {
            PacingMode::Normal => Self {
                timeout: Duration::from_secs(15),
                min_count: 10,
                secondary_timeout: Duration::from_secs(3),
                load_signal: Some(LoadSignal::DomContentLoaded),
                settle_min_ms: 900.0,
                settle_max_ms: 1_800.0,
                shortfall: RowShortfallPolicy::Proceed,
            },
            PacingMode::Fast => Self {
                timeout: Duration::from_secs(15),
                min_count: 3,
                secondary_timeout: Duration::from_secs(1),
                load_signal: Some(LoadSignal::DomContentLoaded),
                settle_min_ms: 150.0,
                settle_max_ms: 400.0,
                shortfall: RowShortfallPolicy::Proceed,
            },
        };
        match min_rows_override {
            Some(min_count) => Self { min_count, ..base },
            None => base,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_shortfall(mut self, shortfall: RowShortfallPolicy) -> Self {
        self.shortfall = shortfall;
        self
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self::for_mode(PacingMode::Normal, None)
    }
}

/// The list rendered fewer rows than requested before the timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCountTimeout {
    pub selector: String,
    pub min_count: usize,
    pub waited: Duration,
}

impl fmt::Display for RowCountTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fewer than {} elements matched `{}` within {:?}",
            self.min_count, self.selector, self.waited
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessOutcome {
    Ready { settled: Duration },
    /// Timed out waiting for rows but proceeding with what is rendered.
    Degraded {
        shortfall: RowCountTimeout,
        settled: Duration,
    },
}

impl ReadinessOutcome {
    pub fn settled(&self) -> Duration {
        match self {
            ReadinessOutcome::Ready { settled } | ReadinessOutcome::Degraded { settled, .. } => {
                *settled
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ReadinessOutcome::Degraded { .. })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ReadinessError {
    #[error("element `{selector}` did not become {state:?} within {timeout:?}")]
    ElementWaitTimeout {
        selector: String,
        state: ElementState,
        timeout: Duration,
    },

    #[error("{0}")]
    RowCountTimeout(RowCountTimeout),

    #[error("browser session failed while waiting for `{selector}`: {source}")]
    Session {
        selector: String,
        #[source]
        source: WaitError,
    },
}

/// Runs the readiness protocol against any [`PageWaits`] implementation.
pub struct ListReadinessWaiter {
    timing: Arc<TimingEngine>,
    config: ReadinessConfig,
}

impl ListReadinessWaiter {
    pub fn new(timing: Arc<TimingEngine>, config: ReadinessConfig) -> Self {
        Self { timing, config }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    /// Wait until `selector` is visible, attached, and matches at least
    /// `min_count` elements, then settle.
    pub async fn wait_ready<P>(
        &self,
        page: &P,
        selector: &str,
    ) -> Result<ReadinessOutcome, ReadinessError>
    where
        P: PageWaits + ?Sized,
    {
        let cfg = &self.config;

        for state in [ElementState::Visible, ElementState::Attached] {
            page.wait_for_selector(selector, state, cfg.timeout)
                .await
                .map_err(|err| match err {
                    WaitError::Timeout(_) => ReadinessError::ElementWaitTimeout {
                        selector: selector.to_string(),
                        state,
                        timeout: cfg.timeout,
                    },
                    source => ReadinessError::Session {
                        selector: selector.to_string(),
                        source,
                    },
                })?;
        }

        let shortfall = match page
            .wait_for_predicate(&min_count_script(selector, cfg.min_count), cfg.timeout)
            .await
        {
            Ok(()) => None,
            Err(WaitError::Timeout(waited)) => {
                let shortfall = RowCountTimeout {
                    selector: selector.to_string(),
                    min_count: cfg.min_count,
                    waited,
                };
                warn!(
                    target: "readiness",
                    %selector,
                    min_count = cfg.min_count,
                    policy = ?cfg.shortfall,
                    "readiness.row_count_timeout"
                );
                if cfg.shortfall == RowShortfallPolicy::Abort {
                    return Err(ReadinessError::RowCountTimeout(shortfall));
                }
                Some(shortfall)
            }
            Err(source) => {
                return Err(ReadinessError::Session {
                    selector: selector.to_string(),
                    source,
                })
            }
        };

        if let Some(signal) = cfg.load_signal {
            if let Err(err) = page
                .wait_for_load_signal(signal, cfg.secondary_timeout)
                .await
            {
                debug!(target: "readiness", %selector, ?signal, error = %err, "readiness.load_signal_skipped");
            }
        }

        let settle_ms = self
            .timing
            .compute_delay(cfg.settle_min_ms, cfg.settle_max_ms);
        let settled = Duration::from_millis(settle_ms.max(0.0).round() as u64);
        page.wait_for_duration(settled).await;

        debug!(
            target: "readiness",
            %selector,
            settled_ms = settled.as_millis() as u64,
            degraded = shortfall.is_some(),
            "readiness.ready"
        );

        Ok(match shortfall {
            None => ReadinessOutcome::Ready { settled },
            Some(shortfall) => ReadinessOutcome::Degraded { shortfall, settled },
        })
    }
}

/// Script that is `true` once `selector` matches at least `min_count` elements.
pub fn min_count_script(selector: &str, min_count: usize) -> String {
    let quoted = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".into());
    format!("return document.querySelectorAll({quoted}).length >= {min_count};")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest_browser::pacing::TimingConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Selector(ElementState),
        Predicate(String),
        Load(LoadSignal, Duration),
        Sleep(Duration),
    }

    #[derive(Default)]
    struct FakePage {
        visible: Option<WaitError>,
        attached: Option<WaitError>,
        count: Option<WaitError>,
        load: Option<WaitError>,
        calls: Mutex<Vec<Call>>,
    }

    impl FakePage {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: Call) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn outcome(err: &Option<WaitError>) -> Result<(), WaitError> {
        match err {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    #[async_trait]
    impl PageWaits for FakePage {
        async fn wait_for_selector(
            &self,
            _selector: &str,
            state: ElementState,
            _timeout: Duration,
        ) -> Result<(), WaitError> {
            self.record(Call::Selector(state));
            match state {
                ElementState::Visible => outcome(&self.visible),
                ElementState::Attached => outcome(&self.attached),
            }
        }

        async fn wait_for_predicate(
            &self,
            script: &str,
            _timeout: Duration,
        ) -> Result<(), WaitError> {
            self.record(Call::Predicate(script.to_string()));
            outcome(&self.count)
        }

        async fn wait_for_load_signal(
            &self,
            signal: LoadSignal,
            timeout: Duration,
        ) -> Result<(), WaitError> {
            self.record(Call::Load(signal, timeout));
            outcome(&self.load)
        }

        async fn wait_for_duration(&self, duration: Duration) {
            self.record(Call::Sleep(duration));
        }
    }

    fn waiter(mode: PacingMode, config: ReadinessConfig) -> ListReadinessWaiter {
        let timing = TimingEngine::with_seed(TimingConfig { scale: 1.0, mode }, 11);
        ListReadinessWaiter::new(Arc::new(timing), config)
    }

    fn timeout() -> WaitError {
        WaitError::Timeout(Duration::from_secs(15))
    }

    #[tokio::test]
    async fn runs_every_step_in_order() {
        let page = FakePage::default();
        let w = waiter(PacingMode::Normal, ReadinessConfig::default());

        let outcome = w.wait_ready(&page, "li.result").await.unwrap();
        assert!(!outcome.is_degraded());

        let calls = page.calls();
        assert_eq!(calls.len(), 5);
        assert_eq!(calls[0], Call::Selector(ElementState::Visible));
        assert_eq!(calls[1], Call::Selector(ElementState::Attached));
        assert_eq!(
            calls[2],
            Call::Predicate(min_count_script("li.result", 10))
        );
        assert_eq!(
            calls[3],
            Call::Load(LoadSignal::DomContentLoaded, Duration::from_secs(3))
        );
        assert_eq!(calls[4], Call::Sleep(outcome.settled()));
        let settled = outcome.settled().as_millis();
        assert!((900..=1_800).contains(&settled), "settled {settled}ms");
    }

    #[tokio::test]
    async fn visibility_timeout_is_fatal() {
        let page = FakePage {
            visible: Some(timeout()),
            ..FakePage::default()
        };
        let w = waiter(PacingMode::Normal, ReadinessConfig::default());

        let err = w.wait_ready(&page, "ul.people").await.unwrap_err();
        assert!(matches!(
            err,
            ReadinessError::ElementWaitTimeout { ref selector, state: ElementState::Visible, .. }
                if selector == "ul.people"
        ));
        assert_eq!(page.calls().len(), 1);
    }

    #[tokio::test]
    async fn session_failure_is_not_reported_as_timeout() {
        let page = FakePage {
            attached: Some(WaitError::Session("target closed".into())),
            ..FakePage::default()
        };
        let w = waiter(PacingMode::Normal, ReadinessConfig::default());

        let err = w.wait_ready(&page, "ul").await.unwrap_err();
        assert!(matches!(err, ReadinessError::Session { .. }));
    }

    #[tokio::test]
    async fn row_shortfall_degrades_but_still_settles() {
        let page = FakePage {
            count: Some(timeout()),
            ..FakePage::default()
        };
        let w = waiter(PacingMode::Normal, ReadinessConfig::default());

        let outcome = w.wait_ready(&page, "li").await.unwrap();
        match &outcome {
            ReadinessOutcome::Degraded { shortfall, .. } => {
                assert_eq!(shortfall.selector, "li");
                assert_eq!(shortfall.min_count, 10);
            }
            other => panic!("expected degraded outcome, got {other:?}"),
        }
        assert!(matches!(page.calls().last(), Some(Call::Sleep(_))));
    }

    #[tokio::test]
    async fn row_shortfall_aborts_when_policy_says_so() {
        let page = FakePage {
            count: Some(timeout()),
            ..FakePage::default()
        };
        let cfg = ReadinessConfig::default().with_shortfall(RowShortfallPolicy::Abort);
        let w = waiter(PacingMode::Normal, cfg);

        let err = w.wait_ready(&page, "li").await.unwrap_err();
        assert!(matches!(err, ReadinessError::RowCountTimeout(_)));
        assert!(!page.calls().iter().any(|c| matches!(c, Call::Sleep(_))));
    }

    #[tokio::test]
    async fn load_signal_timeout_is_swallowed() {
        let page = FakePage {
            load: Some(WaitError::Timeout(Duration::from_secs(3))),
            ..FakePage::default()
        };
        let w = waiter(PacingMode::Normal, ReadinessConfig::default());

        let outcome = w.wait_ready(&page, "li").await.unwrap();
        assert!(matches!(outcome, ReadinessOutcome::Ready { .. }));
    }

    #[tokio::test]
    async fn fast_mode_lowers_threshold_and_settle_window() {
        let page = FakePage::default();
        let w = waiter(
            PacingMode::Fast,
            ReadinessConfig::for_mode(PacingMode::Fast, None),
        );

        let outcome = w.wait_ready(&page, "li").await.unwrap();
        assert!(page
            .calls()
            .contains(&Call::Predicate(min_count_script("li", 3))));
        let settled = outcome.settled().as_millis();
        assert!((150..=400).contains(&settled), "settled {settled}ms");
    }

    #[test]
    fn override_replaces_min_count() {
        let cfg = ReadinessConfig::for_mode(PacingMode::Fast, Some(25));
        assert_eq!(cfg.min_count, 25);
        assert_eq!(cfg.settle_max_ms, 400.0);
    }

    #[test]
    fn count_script_quotes_the_selector() {
        let script = min_count_script(r#"a[data-role="row"]"#, 4);
        assert_eq!(
            script,
            r#"return document.querySelectorAll("a[data-role=\"row\"]").length >= 4;"#
        );
    }
}

use harvest_common::PacingMode;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Symmetric jitter applied by [`BackoffSpec`] unless overridden.
pub const DEFAULT_JITTER: f64 = 0.15;

/// Pacing knobs injected at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingConfig {
    /// Global multiplier applied to every computed delay.
    pub scale: f64,
    pub mode: PacingMode,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            mode: PacingMode::Normal,
        }
    }
}

/// Named wait sequences. Callers select a name; the literal durations live in
/// one table per [`PacingMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceName {
    AfterNavigation,
    BeforeNextPage,
    AfterScroll,
    Warmup,
    RateLimitCooldown,
}

impl SequenceName {
    pub const ALL: [SequenceName; 5] = [
        SequenceName::AfterNavigation,
        SequenceName::BeforeNextPage,
        SequenceName::AfterScroll,
        SequenceName::Warmup,
        SequenceName::RateLimitCooldown,
    ];

    /// Literal durations in milliseconds, or `None` when the mode has no
    /// registered sequence and the backoff generator applies.
    pub fn literal(self, mode: PacingMode) -> Option<&'static [u64]> {
        match (mode, self) {
            (PacingMode::Normal, SequenceName::AfterNavigation) => Some(&[1800, 900, 650]),
            (PacingMode::Normal, SequenceName::BeforeNextPage) => Some(&[2400, 1300]),
            (PacingMode::Normal, SequenceName::AfterScroll) => Some(&[700, 450, 900]),
            (PacingMode::Normal, SequenceName::Warmup) => Some(&[3000, 1500, 1200, 800]),
            (PacingMode::Fast, SequenceName::AfterNavigation) => Some(&[500, 250]),
            (PacingMode::Fast, SequenceName::BeforeNextPage) => Some(&[600]),
            (PacingMode::Fast, SequenceName::AfterScroll) => Some(&[200]),
            (_, SequenceName::Warmup) | (_, SequenceName::RateLimitCooldown) => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SequenceName::AfterNavigation => "after-navigation",
            SequenceName::BeforeNextPage => "before-next-page",
            SequenceName::AfterScroll => "after-scroll",
            SequenceName::Warmup => "warmup",
            SequenceName::RateLimitCooldown => "rate-limit-cooldown",
        }
    }
}

impl fmt::Display for SequenceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        SequenceName::ALL
            .into_iter()
            .find(|name| name.as_str() == wanted)
            .ok_or_else(|| format!("unknown wait sequence: {s}"))
    }
}

/// Increasing-backoff generator used when no literal sequence is registered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffSpec {
    pub base_ms: u64,
    pub max_ms: u64,
    /// Growth applied to the un-jittered delay after every step.
    pub factor: f64,
    pub steps: u32,
    /// Fraction of the current delay added or removed at random.
    pub jitter: f64,
}

impl BackoffSpec {
    pub fn new(base_ms: u64, max_ms: u64, factor: f64, steps: u32) -> Self {
        Self {
            base_ms,
            max_ms,
            factor,
            steps,
            jitter: DEFAULT_JITTER,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }
}

impl Default for BackoffSpec {
    fn default() -> Self {
        Self::new(500, 8_000, 2.0, 4)
    }
}

#[derive(Debug)]
/// Produces human-like delays and structured wait sequences.
pub struct TimingEngine {
    config: TimingConfig,
    rng: Mutex<StdRng>,
}

impl TimingEngine {
    pub fn new(config: TimingConfig) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic engine for reproducible plans.
    pub fn with_seed(config: TimingConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn config(&self) -> TimingConfig {
        self.config
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut guard = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    /// Uniform random delay in `[min_ms, max_ms)` milliseconds, multiplied by
    /// the configured scale. A degenerate window yields `min_ms * scale`.
    pub fn compute_delay(&self, min_ms: f64, max_ms: f64) -> f64 {
        let raw = if max_ms > min_ms {
            self.with_rng(|rng| rng.gen_range(min_ms..max_ms))
        } else {
            min_ms
        };
        raw * self.config.scale
    }

    /// Sleep for a random, scaled duration between `min_ms` and `max_ms`.
    pub async fn random_delay(&self, min_ms: u64, max_ms: u64) -> Duration {
        let ms = self.compute_delay(min_ms as f64, max_ms as f64);
        let duration = millis(ms);
        sleep(duration).await;
        duration
    }

    /// Durations `wait_sequence` would sleep, in order.
    pub fn plan_sequence(&self, name: SequenceName, fallback: &BackoffSpec) -> Vec<Duration> {
        match name.literal(self.config.mode) {
            Some(steps) => steps
                .iter()
                .map(|ms| millis(*ms as f64 * self.config.scale))
                .collect(),
            None => self.backoff_plan(fallback),
        }
    }

    /// Wait each planned duration in turn.
    pub async fn wait_sequence(&self, name: SequenceName, fallback: &BackoffSpec) -> Duration {
        let plan = self.plan_sequence(name, fallback);
        let total: Duration = plan.iter().sum();
        debug!(
            target: "pacing",
            sequence = %name,
            mode = %self.config.mode,
            steps = plan.len(),
            total_ms = total.as_millis() as u64,
            "pacing.wait_sequence"
        );
        for step in plan {
            sleep(step).await;
        }
        total
    }

    fn backoff_plan(&self, spec: &BackoffSpec) -> Vec<Duration> {
        let base = spec.base_ms as f64;
        let max = spec.max_ms.max(spec.base_ms) as f64;
        let jitter = if spec.jitter.is_finite() {
            spec.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let mut delay = base;
        let mut plan = Vec::with_capacity(spec.steps as usize);
        for _ in 0..spec.steps {
            let spread = delay * jitter;
            let jittered = if spread > 0.0 {
                delay + self.with_rng(|rng| rng.gen_range(-spread..=spread))
            } else {
                delay
            };
            plan.push(millis(jittered.clamp(base, max) * self.config.scale));
            delay = (delay * spec.factor).min(max);
        }
        plan
    }
}

fn millis(ms: f64) -> Duration {
    Duration::from_millis(ms.max(0.0).round() as u64)
}

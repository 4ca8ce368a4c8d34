//! Exponential backoff with jitter for client reconnection.
//!
//! [`ReconnectState`] produces the delay sequence; [`dial`] uses it to keep
//! retrying a TCP connect until it succeeds, the attempts run out, or the
//! caller cancels.

use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay after the first failure. Default: 500 ms.
    pub initial_delay: Duration,
    /// Growth factor per failed attempt. Default: 2.0.
    pub multiplier: f64,
    /// Upper bound on any delay. Default: 30 s.
    pub max_delay: Duration,
    /// Give up after this many delays. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Relative jitter in `0.0..=1.0`, applied as ±jitter. Default: 0.2.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: None,
            jitter: 0.2,
        }
    }
}

/// Attempt counter plus the next un-jittered delay.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        let current_delay = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay,
        }
    }

    /// Next delay to wait, or `None` once `max_attempts` delays were handed out.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self
            .config
            .max_attempts
            .is_some_and(|max| self.attempts >= max)
        {
            return None;
        }
        self.attempts += 1;

        let cap = self.config.max_delay;
        let base = self.current_delay.min(cap);
        self.current_delay = scaled(base, self.config.multiplier, cap);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let delay = if jitter > 0.0 {
            scaled(base, rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter)), cap)
        } else {
            base
        };
        Some(delay)
    }

    /// Back to the initial delay. Called once a session is fully established.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Why [`dial`] gave up.
#[derive(Debug, thiserror::Error)]
pub enum ReconnectError {
    #[error("gave up after {0} attempts")]
    MaxAttemptsExhausted(u32),

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connect to `addr`, backing off between failures according to `state`.
///
/// The first attempt is made immediately. Cancelling `cancel` aborts both a
/// pending connect and a pending sleep.
pub async fn dial(
    addr: &str,
    state: &mut ReconnectState,
    cancel: &CancellationToken,
) -> Result<TcpStream, ReconnectError> {
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            result = TcpStream::connect(addr) => result,
        };

        let err = match result {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        let Some(delay) = state.next_delay() else {
            tracing::warn!("Giving up on {addr}: {err}");
            return Err(ReconnectError::MaxAttemptsExhausted(state.attempts()));
        };
        tracing::info!(
            "Connect to {addr} failed ({err}), retry {} in {delay:?}",
            state.attempts()
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ReconnectError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// `delay * factor`, capped. Out-of-range products saturate to `cap`.
fn scaled(delay: Duration, factor: f64, cap: Duration) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).map_or(cap, |d| d.min(cap))
}

//! Reconnection / backoff state machine.
//!
//! Pure state: no timers and no I/O. The connection manager drives it with
//! transport events and sleeps for the delays it hands back.
//!
//! ```text
//! Idle --open--> Connecting --ok--> Connected
//!                    |                  |
//!                    +--fail/close------+--> Backoff(n) --elapsed--> Connecting
//!                                              |
//!                                   n > max ---+--> Failed --retry--> Connecting
//! any --user close / logout close--> Idle
//! ```

use std::time::Duration;

use tracing::{debug, error, warn};

use sn_core::config::RealtimeConfig;
use sn_core::constants;
use sn_core::error::{SnError, SnResult};

/// States of the reconnection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// No session, or the user closed it.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// The transport is open.
    Connected,
    /// Waiting before reconnection attempt `attempt`.
    Backoff { attempt: u32 },
    /// Automatic retry gave up; only an explicit retry leaves this state.
    Failed,
}

impl std::fmt::Display for ReconnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Backoff { attempt } => write!(f, "backoff({attempt})"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Configuration for socket reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Base delay between reconnection attempts.
    pub base_delay: Duration,
    /// Maximum delay cap for exponential backoff.
    pub max_delay: Duration,
    /// Maximum number of automatic reconnection attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Jitter factor (0.0 to 1.0) added to each delay.
    pub jitter_factor: f64,
    /// Close code that means "user logged out": no reconnect.
    pub logout_close_code: u16,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(constants::DEFAULT_RECONNECT_BASE_DELAY_MS),
            max_delay: Duration::from_millis(constants::DEFAULT_RECONNECT_MAX_DELAY_MS),
            max_attempts: constants::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            jitter_factor: 0.0,
            logout_close_code: constants::LOGOUT_CLOSE_CODE,
        }
    }
}

impl From<&RealtimeConfig> for ReconnectConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            max_attempts: config.max_attempts,
            jitter_factor: config.jitter_factor,
            logout_close_code: config.logout_close_code,
        }
    }
}

/// What the manager should do after a failed or dropped connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Sleep for `delay`, then attempt reconnection number `attempt`.
    Retry { attempt: u32, delay: Duration },
    /// Stop retrying and surface a hard failure.
    GiveUp { attempts: u32 },
}

/// Reconnection policy: exponential, capped backoff with a retry limit.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: ReconnectConfig,
    state: ReconnectState,
    attempt: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

impl BackoffPolicy {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: ReconnectState::Idle,
            attempt: 0,
        }
    }

    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Consecutive failed attempts since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    fn invalid(&self, event: &str) -> SnError {
        SnError::InvalidState(format!("{event} not allowed in state {}", self.state))
    }

    /// `Idle -> Connecting` on an explicit open.
    pub fn on_open(&mut self) -> SnResult<()> {
        match self.state {
            ReconnectState::Idle => {
                self.attempt = 0;
                self.state = ReconnectState::Connecting;
                Ok(())
            }
            _ => Err(self.invalid("open")),
        }
    }

    /// `Connecting -> Connected`; resets the attempt counter.
    pub fn on_connected(&mut self) -> SnResult<()> {
        match self.state {
            ReconnectState::Connecting => {
                if self.attempt > 0 {
                    debug!("reconnected after {} failed attempt(s)", self.attempt);
                }
                self.attempt = 0;
                self.state = ReconnectState::Connected;
                Ok(())
            }
            _ => Err(self.invalid("connected")),
        }
    }

    /// Transport open failure or abnormal close.
    ///
    /// Moves to `Backoff(n)` or, once `n` exceeds the attempt limit, to `Failed`.
    pub fn on_failure(&mut self) -> SnResult<FailureAction> {
        match self.state {
            ReconnectState::Connecting | ReconnectState::Connected => {}
            _ => return Err(self.invalid("failure")),
        }

        let attempt = self.attempt.saturating_add(1);
        if self.config.max_attempts > 0 && attempt > self.config.max_attempts {
            error!(
                "max reconnection attempts ({}) reached",
                self.config.max_attempts
            );
            self.state = ReconnectState::Failed;
            return Ok(FailureAction::GiveUp {
                attempts: self.config.max_attempts,
            });
        }

        self.attempt = attempt;
        self.state = ReconnectState::Backoff { attempt };
        let delay = self.delay_for(attempt);
        warn!("reconnection attempt {attempt} in {:.1}s", delay.as_secs_f64());
        Ok(FailureAction::Retry { attempt, delay })
    }

    /// Close reported by the transport.
    ///
    /// The logout close code returns to `Idle` (`Ok(None)`); any other code
    /// is treated as a failure.
    pub fn on_close(&mut self, code: Option<u16>) -> SnResult<Option<FailureAction>> {
        if code == Some(self.config.logout_close_code) {
            match self.state {
                ReconnectState::Connecting | ReconnectState::Connected => {
                    debug!("deliberate close (code {}), not reconnecting", self.config.logout_close_code);
                    self.attempt = 0;
                    self.state = ReconnectState::Idle;
                    return Ok(None);
                }
                _ => return Err(self.invalid("close")),
            }
        }
        self.on_failure().map(Some)
    }

    /// `Backoff(n) -> Connecting` once the delay elapsed.
    pub fn on_backoff_elapsed(&mut self) -> SnResult<()> {
        match self.state {
            ReconnectState::Backoff { .. } => {
                self.state = ReconnectState::Connecting;
                Ok(())
            }
            _ => Err(self.invalid("backoff elapsed")),
        }
    }

    /// `Failed -> Connecting`, only through an explicit user retry.
    pub fn on_retry(&mut self) -> SnResult<()> {
        match self.state {
            ReconnectState::Failed => {
                self.attempt = 0;
                self.state = ReconnectState::Connecting;
                Ok(())
            }
            _ => Err(self.invalid("retry")),
        }
    }

    /// Any state `-> Idle` on an explicit close.
    pub fn on_user_close(&mut self) {
        self.attempt = 0;
        self.state = ReconnectState::Idle;
    }

    /// `min(base * 2^attempt, max)` without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }

    /// Delay before reconnection attempt `attempt`, including jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay_for(attempt);
        if self.config.jitter_factor <= 0.0 {
            return exponential;
        }

        let secs = exponential.as_secs_f64();
        let jitter_range = secs * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        Duration::from_secs_f64((secs + jitter).max(0.0))
    }
}

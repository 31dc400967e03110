//! Outer supervising loop: re-run setup after retryable failures
//!
//! The retry decision is a pure function of the policy and the number of
//! consecutive failed attempts, so it can be tested without a broker.

use super::runner::{interruptible_sleep, run_once, DeliveryEnd, DeliveryStats, RunSettings};
use super::sink::MessageSink;
use crate::config::ReconnectSection;
use crate::error::TailError;
use crate::transport::Transport;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Backoff and attempt limits
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Maximum consecutive reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Also reconnect when the broker ends the feed cleanly
    pub restart_on_end_of_feed: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectSection::default())
    }
}

impl ReconnectPolicy {
    /// A single run, no retries
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn from_config(section: &ReconnectSection) -> Self {
        Self {
            enabled: section.enabled,
            max_attempts: section.max_attempts,
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            multiplier: section.multiplier,
            restart_on_end_of_feed: section.restart_on_end_of_feed,
        }
    }

    /// Delay before the given (1-based) attempt: `initial * multiplier^(attempt-1)`, capped
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Decide what to do after `failed_attempts` consecutive failures
    pub fn decide(&self, failed_attempts: u32, shutdown_requested: bool) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }
        if !self.enabled {
            return ReconnectionDecision::Disabled;
        }
        if let Some(max_attempts) = self.max_attempts {
            if failed_attempts >= max_attempts {
                return ReconnectionDecision::AbortMaxAttemptsExceeded;
            }
        }

        let attempt = failed_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay: self.backoff_delay(attempt),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay: Duration },
    Disabled,
    AbortMaxAttemptsExceeded,
    AbortShutdownRequested,
}

/// How a supervised run finished without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    EndOfFeed { delivered: u64 },
    Shutdown { delivered: u64 },
}

impl RunOutcome {
    pub fn delivered(&self) -> u64 {
        match self {
            RunOutcome::EndOfFeed { delivered } | RunOutcome::Shutdown { delivered } => *delivered,
        }
    }
}

/// Why the last attempt stopped
enum AttemptEnd {
    Ended,
    Failed(TailError),
}

/// Runs sessions against a transport under a [`ReconnectPolicy`]
pub struct Supervisor<T> {
    transport: T,
    settings: RunSettings,
    policy: ReconnectPolicy,
}

impl<T: Transport> Supervisor<T> {
    pub fn new(transport: T, settings: RunSettings, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            settings,
            policy,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub async fn run(
        &self,
        sink: &mut dyn MessageSink,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunOutcome, TailError> {
        let mut failed_attempts = 0u32;
        let mut delivered = 0u64;

        loop {
            let mut stats = DeliveryStats::default();
            let result = run_once(
                &self.transport,
                &self.settings,
                sink,
                &mut shutdown,
                &mut stats,
            )
            .await;
            delivered += stats.delivered;
            if stats.delivered > 0 {
                failed_attempts = 0;
            }

            let last = match result {
                Ok(DeliveryEnd::Shutdown) => return Ok(RunOutcome::Shutdown { delivered }),
                Ok(DeliveryEnd::EndOfFeed) if !self.policy.restart_on_end_of_feed => {
                    return Ok(RunOutcome::EndOfFeed { delivered });
                }
                Ok(DeliveryEnd::EndOfFeed) => AttemptEnd::Ended,
                Err(e) if e.is_retryable() => AttemptEnd::Failed(e),
                Err(e) => return Err(e),
            };

            let reason = match &last {
                AttemptEnd::Ended => "feed ended".to_string(),
                AttemptEnd::Failed(e) => e.diagnostic(),
            };
            let shutdown_now = *shutdown.borrow();
            match self.policy.decide(failed_attempts, shutdown_now) {
                ReconnectionDecision::Proceed { attempt, delay } => {
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Reconnecting to broker"
                    );
                    failed_attempts = attempt;
                    if !interruptible_sleep(&mut shutdown, delay).await {
                        info!("Shutdown requested during reconnect backoff");
                        return Ok(RunOutcome::Shutdown { delivered });
                    }
                }
                ReconnectionDecision::AbortShutdownRequested => {
                    return Ok(RunOutcome::Shutdown { delivered });
                }
                decision @ (ReconnectionDecision::Disabled
                | ReconnectionDecision::AbortMaxAttemptsExceeded) => {
                    if decision == ReconnectionDecision::AbortMaxAttemptsExceeded {
                        error!(attempts = failed_attempts, reason = %reason, "Giving up reconnecting");
                    }
                    return match last {
                        AttemptEnd::Ended => Ok(RunOutcome::EndOfFeed { delivered }),
                        AttemptEnd::Failed(e) => Err(e),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: true,
            max_attempts: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            restart_on_end_of_feed: false,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_delay(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_delay(500), Duration::from_millis(1_000));
    }

    #[test]
    fn test_decide_respects_max_attempts() {
        let policy = policy();
        assert_eq!(
            policy.decide(0, false),
            ReconnectionDecision::Proceed {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert!(matches!(
            policy.decide(2, false),
            ReconnectionDecision::Proceed { attempt: 3, .. }
        ));
        assert_eq!(
            policy.decide(3, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
    }

    #[test]
    fn test_decide_unlimited() {
        let policy = ReconnectPolicy {
            max_attempts: None,
            ..policy()
        };
        assert!(matches!(
            policy.decide(10_000, false),
            ReconnectionDecision::Proceed { .. }
        ));
    }

    #[test]
    fn test_shutdown_and_disabled_win() {
        assert_eq!(
            policy().decide(0, true),
            ReconnectionDecision::AbortShutdownRequested
        );
        assert_eq!(
            ReconnectPolicy::disabled().decide(0, false),
            ReconnectionDecision::Disabled
        );
    }

    #[test]
    fn test_from_config() {
        let section = ReconnectSection {
            enabled: true,
            max_attempts: None,
            initial_delay_ms: 250,
            max_delay_ms: 5_000,
            multiplier: 1.5,
            restart_on_end_of_feed: true,
        };
        let policy = ReconnectPolicy::from_config(&section);
        assert!(policy.enabled);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert!(policy.restart_on_end_of_feed);
    }
}

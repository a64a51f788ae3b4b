//! # Eventual-readiness polling
//!
//! Cloud control planes answer "create" long before the thing you created is
//! usable. A DynamoDB table sits in `CREATING` for a while, an ECS task walks
//! through `PROVISIONING`, `PENDING` and `RUNNING` before it finally stops.
//! [`Poller`] asks the remote side for its status on a fixed interval until
//! one of three things happens:
//!
//! - the status is classified as [`Check::Success`], and the payload is
//!   returned in [`Ready`],
//! - the status is classified as [`Check::Failure`], and the reason is
//!   returned immediately as [`PollError::Failed`],
//! - the attempt budget runs out, producing [`PollError::TimedOut`] (or
//!   [`PollError::Check`] when the last status check itself errored).
//!
//! Errors returned by the status check are treated as transient: they use up
//! an attempt but do not stop the poll.
//!
//! Polling suspends only while sleeping between attempts. Dropping the
//! future returned by [`Poller::poll`] abandons the poll; nothing is done to
//! the remote resource.
use std::{future::Future, time::Duration};

use snafu::prelude::*;
use tokio::time::Instant;


/// Marker trait for errors and failure reasons that flow through a poll.
pub trait UserError: core::fmt::Display + core::fmt::Debug + 'static {}
impl<T: core::fmt::Display + core::fmt::Debug + 'static> UserError for T {}

/// How a single observed status should be treated.
#[derive(Clone, Debug, PartialEq)]
pub enum Check<T, F> {
    /// Not there yet, ask again later.
    Continue,
    /// Terminal success, carrying whatever the caller needs next.
    Success(T),
    /// Terminal failure reported by the resource itself.
    Failure(F),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PollStatus {
    #[default]
    Pending,
    Ready,
    Failed,
    TimedOut,
}

impl core::fmt::Display for PollStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PollStatus::Pending => "pending",
            PollStatus::Ready => "ready",
            PollStatus::Failed => "failed",
            PollStatus::TimedOut => "timed out",
        })
    }
}

/// Bookkeeping for one poll invocation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PollState {
    pub status: PollStatus,
    pub attempts: u32,
    /// Message of the most recent status-check error, if any.
    pub last_error: Option<String>,
}

/// Successful outcome of a poll.
#[derive(Clone, Debug, PartialEq)]
pub struct Ready<T> {
    pub value: T,
    pub state: PollState,
    /// Time from the first status check until success.
    pub elapsed: Duration,
}

impl<T> Ready<T> {
    pub fn attempts(&self) -> u32 {
        self.state.attempts
    }
}

/// Unsuccessful outcome of a poll.
///
/// `F` is the failure reason reported by the polled resource, `E` is the
/// error type of the status check.
#[derive(Debug, Snafu)]
pub enum PollError<F, E>
where
    F: UserError,
    E: UserError,
{
    #[snafu(display("{label} failed after {attempts} attempt(s): {reason}"))]
    Failed {
        label: String,
        attempts: u32,
        reason: F,
    },

    #[snafu(display(
        "{label} could not be checked, giving up after {attempts} attempt(s): {error}"
    ))]
    Check {
        label: String,
        attempts: u32,
        error: E,
    },

    #[snafu(display("{label} timed out after {attempts} attempt(s){}",
                    last_error.as_ref()
                        .map(|e| format!(", last error: {e}"))
                        .unwrap_or_default()))]
    TimedOut {
        label: String,
        attempts: u32,
        last_error: Option<String>,
    },
}

impl<F: UserError, E: UserError> PollError<F, E> {
    /// Number of status checks performed before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            PollError::Failed { attempts, .. }
            | PollError::Check { attempts, .. }
            | PollError::TimedOut { attempts, .. } => *attempts,
        }
    }

    /// `true` when we stopped waiting rather than the resource failing.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::TimedOut { .. } | PollError::Check { .. })
    }

    /// Terminal status of the poll.
    pub fn status(&self) -> PollStatus {
        match self {
            PollError::Failed { .. } => PollStatus::Failed,
            PollError::Check { .. } | PollError::TimedOut { .. } => PollStatus::TimedOut,
        }
    }

    /// The failure reason reported by the resource, if that is why we stopped.
    pub fn failure_reason(&self) -> Option<&F> {
        match self {
            PollError::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

pub type PollResult<T, F, E> = Result<Ready<T>, PollError<F, E>>;

/// Growth of the wait between attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Backoff {
    /// Always wait the base interval.
    #[default]
    Fixed,
    /// Multiply the wait by `factor` after every attempt, never exceeding
    /// `max_interval`. The wait is never shorter than the base interval.
    Exponential { factor: u32, max_interval: Duration },
}

/// Repeatedly checks a remote status until it settles.
#[derive(Clone, Debug)]
pub struct Poller {
    label: String,
    interval: Duration,
    max_attempts: u32,
    backoff: Backoff,
}

impl Poller {
    /// Creates a fixed-interval poller.
    ///
    /// A `max_attempts` of zero is treated as one; the status is always
    /// checked at least once.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Poller {
            label: "poll".to_string(),
            interval,
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed,
        }
    }

    /// Name used in log lines and error messages.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The wait between attempt `attempt` (1-based) and the next one.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.interval,
            Backoff::Exponential {
                factor,
                max_interval,
            } => {
                let growth = factor.max(1).saturating_pow(attempt.saturating_sub(1));
                self.interval
                    .saturating_mul(growth)
                    .min(max_interval.max(self.interval))
            }
        }
    }

    /// Upper bound on the time spent sleeping over a whole poll.
    pub fn max_total_wait(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.delay_after(attempt))
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Runs the poll.
    ///
    /// `check` fetches the current status of the watched resource and
    /// `classify` decides what that status means.
    pub async fn poll<S, T, F, E, Fut>(
        &self,
        mut check: impl FnMut() -> Fut,
        classify: impl Fn(S) -> Check<T, F>,
    ) -> PollResult<T, F, E>
    where
        Fut: Future<Output = Result<S, E>>,
        F: UserError,
        E: UserError,
    {
        let label = &self.label;
        let start = Instant::now();
        let mut state = PollState::default();
        let mut last_check_error: Option<E>;
        log::debug!(
            "{label}: polling every {:?}, at most {} attempt(s)",
            self.interval,
            self.max_attempts
        );

        loop {
            state.attempts += 1;
            match check().await {
                Ok(status) => {
                    last_check_error = None;
                    match classify(status) {
                        Check::Success(value) => {
                            state.status = PollStatus::Ready;
                            let elapsed = start.elapsed();
                            log::debug!(
                                "{label}: ready after {} attempt(s), {elapsed:?}",
                                state.attempts
                            );
                            return Ok(Ready {
                                value,
                                state,
                                elapsed,
                            });
                        }
                        Check::Failure(reason) => {
                            log::debug!("{label}: failed on attempt {}", state.attempts);
                            return Err(PollError::Failed {
                                label: label.clone(),
                                attempts: state.attempts,
                                reason,
                            });
                        }
                        Check::Continue => {
                            log::trace!("{label}: attempt {} still pending", state.attempts);
                        }
                    }
                }
                Err(error) => {
                    log::warn!(
                        "{label}: status check {} of {} errored: {error}",
                        state.attempts,
                        self.max_attempts
                    );
                    state.last_error = Some(error.to_string());
                    last_check_error = Some(error);
                }
            }

            if state.attempts >= self.max_attempts {
                return Err(match last_check_error {
                    Some(error) => PollError::Check {
                        label: label.clone(),
                        attempts: state.attempts,
                        error,
                    },
                    None => PollError::TimedOut {
                        label: label.clone(),
                        attempts: state.attempts,
                        last_error: state.last_error,
                    },
                });
            }

            tokio::time::sleep(self.delay_after(state.attempts)).await;
        }
    }
}

//! Job run polling state machine.
//!
//! The polling loop is kept as a pure transition function so the throttling
//! backoff and terminal state handling can be tested without a live service.
//! The loop in [`crate::job`] feeds observations in and acts on the steps
//! that come back.

use std::time::Duration;

/// Polling cadence and throttling tolerance.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    /// Normal wait between status checks.
    pub interval: Duration,
    /// Base wait after a throttled call; doubles on each consecutive retry.
    pub backoff_base: Duration,
    /// Consecutive throttled calls tolerated before giving up.
    pub max_retries: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            max_retries: 5,
        }
    }
}

/// One observed response from the execution service.
#[derive(Debug, Clone)]
pub enum Observation {
    Run {
        state: String,
        message: Option<String>,
    },
    Throttled,
}

/// Terminal result of a polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(String),
    TimedOut(String),
    Stopped(String),
    ThrottlingExhausted { attempts: u32 },
}

/// What the loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Sleep(Duration),
    Done(Outcome),
}

/// Tracks consecutive throttled calls.
#[derive(Debug, Default, Clone)]
pub struct PollState {
    throttle_attempts: u32,
}

impl PollState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Advance the poll loop by one observation.
///
/// A successful status check resets the throttle counter. Unknown run states
/// are treated as still running.
pub fn step(policy: &PollPolicy, state: &mut PollState, observation: Observation) -> Step {
    match observation {
        Observation::Throttled => {
            if state.throttle_attempts >= policy.max_retries {
                return Step::Done(Outcome::ThrottlingExhausted {
                    attempts: state.throttle_attempts,
                });
            }
            let wait = policy.backoff_base * 2u32.pow(state.throttle_attempts);
            state.throttle_attempts += 1;
            Step::Sleep(wait)
        }
        Observation::Run { state: run_state, message } => {
            state.throttle_attempts = 0;
            let detail = || message.clone().unwrap_or_else(|| run_state.clone());
            match run_state.as_str() {
                "SUCCEEDED" => Step::Done(Outcome::Succeeded),
                "FAILED" | "ERROR" => Step::Done(Outcome::Failed(detail())),
                "TIMEOUT" | "TIMED_OUT" => Step::Done(Outcome::TimedOut(detail())),
                "STOPPED" | "STOPPING" => {
                    if run_state == "STOPPING" {
                        Step::Sleep(policy.interval)
                    } else {
                        Step::Done(Outcome::Stopped(detail()))
                    }
                }
                _ => Step::Sleep(policy.interval),
            }
        }
    }
}

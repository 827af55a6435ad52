//! Acknowledgment timeout and retry pacing.
//!
//! Reliable unicast is stop-and-wait with a fixed schedule:
//! - wait up to [`RetryPolicy::ack_timeout`] for a reply after each transmission,
//! - sleep [`RetryPolicy::backoff`] before retransmitting after a failed attempt,
//! - sleep [`RetryPolicy::pacing`] after an acknowledged exchange,
//! - give up after [`RetryPolicy::max_retries`] retransmissions.
//!
//! Timings are fixed rather than adaptive; the deployed peers expect exactly
//! this schedule.

use std::time::Duration;

/// Timing parameters for one peer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How long one attempt waits for an acknowledgment.
    pub ack_timeout: Duration,
    /// Delay after a successful exchange before returning.
    pub pacing: Duration,
    /// Delay before retransmitting after a failed attempt.
    pub backoff: Duration,
    /// Retransmissions allowed after the initial send.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(3),
            pacing: Duration::from_secs(1),
            backoff: Duration::from_secs(1),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Upper bound on transmissions for one peer (initial send + retries).
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Fresh countdown for one exchange.
    pub fn budget(&self) -> RetryBudget {
        RetryBudget {
            remaining: self.max_retries,
            attempts: 0,
        }
    }
}

/// Countdown of transmissions left for the exchange in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    remaining: u32,
    attempts: u32,
}

impl RetryBudget {
    /// Record one transmission.
    pub fn on_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Consume one retry.  Returns `false` once the budget is exhausted.
    pub fn retry(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Transmissions made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_wire_schedule() {
        let p = RetryPolicy::default();
        assert_eq!(p.ack_timeout, Duration::from_secs(3));
        assert_eq!(p.pacing, Duration::from_secs(1));
        assert_eq!(p.backoff, Duration::from_secs(1));
        assert_eq!(p.max_attempts(), 4);
    }

    #[test]
    fn budget_allows_exactly_max_retries() {
        let mut b = RetryPolicy::default().budget();
        b.on_attempt();
        let mut retries = 0;
        while b.retry() {
            b.on_attempt();
            retries += 1;
        }
        assert_eq!(retries, 3);
        assert_eq!(b.attempts(), 4);
        assert_eq!(b.remaining(), 0);
    }
}

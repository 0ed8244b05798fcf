//! Bounded exponential reconnect schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Reconnect schedule parameters.
///
/// Defaults match the delays the chat service clients have always used:
/// start at one second, double up to five seconds, give up after ten attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
	pub initial_delay_ms: u64,
	pub max_delay_ms: u64,
	pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			initial_delay_ms: 1_000,
			max_delay_ms: 5_000,
			max_attempts: 10,
		}
	}
}

impl ReconnectPolicy {
	/// Policy with no delay between attempts.
	pub fn immediate(max_attempts: u32) -> Self {
		Self {
			initial_delay_ms: 0,
			max_delay_ms: 0,
			max_attempts,
		}
	}

	/// Delay before attempt number `attempt` (1-based).
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let exponent = attempt.saturating_sub(1).min(31);
		let millis = self.initial_delay_ms.saturating_mul(1u64 << exponent).min(self.max_delay_ms.max(self.initial_delay_ms));
		Duration::from_millis(millis)
	}
}

/// Attempt counter driven by the connection state machine.
///
/// No timers live here: the caller asks for the next delay and schedules it
/// however it likes, which keeps the schedule testable without time passing.
#[derive(Debug, Clone)]
pub struct Backoff {
	policy: ReconnectPolicy,
	attempts: u32,
}

impl Backoff {
	pub fn new(policy: ReconnectPolicy) -> Self {
		Self { policy, attempts: 0 }
	}

	/// Claims the next attempt, returning its number and delay, or `None` once
	/// the ceiling is reached.
	pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
		if self.attempts >= self.policy.max_attempts {
			return None;
		}
		self.attempts += 1;
		Some((self.attempts, self.policy.delay_for(self.attempts)))
	}

	pub fn reset(&mut self) {
		self.attempts = 0;
	}

	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	pub fn policy(&self) -> &ReconnectPolicy {
		&self.policy
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delays_double_up_to_the_cap() {
		let policy = ReconnectPolicy::default();
		let delays: Vec<u64> = (1..=5).map(|n| policy.delay_for(n).as_millis() as u64).collect();
		assert_eq!(delays, vec![1_000, 2_000, 4_000, 5_000, 5_000]);
	}

	#[test]
	fn attempts_stop_at_the_ceiling() {
		let mut backoff = Backoff::new(ReconnectPolicy {
			max_attempts: 3,
			..Default::default()
		});
		assert_eq!(backoff.next_attempt().map(|(n, _)| n), Some(1));
		assert_eq!(backoff.next_attempt().map(|(n, _)| n), Some(2));
		assert_eq!(backoff.next_attempt().map(|(n, _)| n), Some(3));
		assert_eq!(backoff.next_attempt(), None);
		assert_eq!(backoff.next_attempt(), None);
		assert_eq!(backoff.attempts(), 3);
	}

	#[test]
	fn reset_restores_the_full_budget() {
		let mut backoff = Backoff::new(ReconnectPolicy::immediate(1));
		assert!(backoff.next_attempt().is_some());
		assert!(backoff.next_attempt().is_none());
		backoff.reset();
		assert_eq!(backoff.next_attempt(), Some((1, Duration::ZERO)));
	}

	#[test]
	fn huge_attempt_numbers_do_not_overflow() {
		let policy = ReconnectPolicy::default();
		assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(5_000));
	}
}

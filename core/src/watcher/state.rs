use tokio::sync::watch;

/// Lifecycle of a watched domain directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchState {
	#[default]
	Idle,
	ScanningInitial,
	Ready,
}

/// Shared view of a domain's [`WatchState`].
///
/// Ready is terminal: once raised it is never lowered again, so waiters are
/// released exactly once.
#[derive(Debug, Clone)]
pub struct ReadySignal {
	tx: watch::Sender<WatchState>,
}

impl Default for ReadySignal {
	fn default() -> Self {
		Self::new()
	}
}

impl ReadySignal {
	pub fn new() -> Self {
		Self {
			tx: watch::Sender::new(WatchState::Idle),
		}
	}

	pub fn state(&self) -> WatchState {
		*self.tx.borrow()
	}

	pub fn is_ready(&self) -> bool {
		self.state() == WatchState::Ready
	}

	/// Moves to `state` unless already ready. Returns whether it changed.
	pub fn set(&self, state: WatchState) -> bool {
		self.tx.send_if_modified(|current| {
			if *current == WatchState::Ready || *current == state {
				return false;
			}
			*current = state;
			true
		})
	}

	pub async fn wait_ready(&self) {
		let mut rx = self.tx.subscribe();
		// The sender lives in `self`, so the channel cannot close while waiting
		let _ = rx.wait_for(|state| *state == WatchState::Ready).await;
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn ready_is_terminal() {
		let signal = ReadySignal::new();
		assert!(signal.set(WatchState::ScanningInitial));
		assert!(signal.set(WatchState::Ready));
		assert!(!signal.set(WatchState::Ready));
		assert!(!signal.set(WatchState::Idle));
		assert!(signal.is_ready());
	}

	#[tokio::test]
	async fn waiters_are_released() {
		let signal = ReadySignal::new();
		let waiter = tokio::spawn({
			let signal = signal.clone();
			async move { signal.wait_ready().await }
		});

		signal.set(WatchState::ScanningInitial);
		assert!(!waiter.is_finished());
		signal.set(WatchState::Ready);

		tokio::time::timeout(Duration::from_secs(1), waiter)
			.await
			.unwrap()
			.unwrap();

		// Late waiters return immediately
		signal.wait_ready().await;
	}
}

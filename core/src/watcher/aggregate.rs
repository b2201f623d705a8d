//! Debounced coalescing of watcher events.
//!
//! Events are folded per path into the net change since the last batch, so a
//! bulk copy-in of many files becomes one batch and a file that came and went
//! within the window disappears entirely.

use std::{
	collections::HashMap,
	path::PathBuf,
	time::Duration,
};

use quarry_fs_watcher::{FsEvent, FsEventKind};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NetChange {
	Added,
	Changed,
	Removed,
}

/// Net changes of one debounce window, each path in exactly one list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchBatch {
	pub added: Vec<PathBuf>,
	pub changed: Vec<PathBuf>,
	pub removed: Vec<PathBuf>,
}

impl WatchBatch {
	pub fn is_empty(&self) -> bool {
		self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
	}

	pub fn len(&self) -> usize {
		self.added.len() + self.changed.len() + self.removed.len()
	}
}

#[derive(Debug)]
pub struct Aggregator {
	window: Duration,
	max_batch_size: usize,
	changes: HashMap<PathBuf, NetChange>,
	// Arrival order, so batches are handled in the order files showed up
	order: Vec<PathBuf>,
	last_event_at: Option<Instant>,
	coalesced: u64,
}

impl Aggregator {
	pub fn new(window: Duration, max_batch_size: usize) -> Self {
		Self {
			window,
			max_batch_size: max_batch_size.max(1),
			changes: HashMap::new(),
			order: Vec::new(),
			last_event_at: None,
			coalesced: 0,
		}
	}

	pub fn push(&mut self, event: FsEvent) {
		self.last_event_at = Some(Instant::now());
		match event.kind {
			FsEventKind::Create => self.apply(event.path, NetChange::Added),
			FsEventKind::Modify => self.apply(event.path, NetChange::Changed),
			FsEventKind::Remove => self.apply(event.path, NetChange::Removed),
			// A rename is a removal of the old name plus a new file
			FsEventKind::Rename { from } => {
				self.apply(from, NetChange::Removed);
				self.apply(event.path, NetChange::Added);
			}
		}
	}

	fn apply(&mut self, path: PathBuf, incoming: NetChange) {
		use NetChange::*;

		let Some(&current) = self.changes.get(&path) else {
			self.order.push(path.clone());
			self.changes.insert(path, incoming);
			return;
		};

		self.coalesced += 1;
		let next = match (current, incoming) {
			(Added, Removed) => None,
			(Added, _) => Some(Added),
			(Changed, Removed) => Some(Removed),
			(Changed, _) => Some(Changed),
			// Replaced by a different file under the same name
			(Removed, Added | Changed) => Some(Changed),
			(Removed, Removed) => Some(Removed),
		};

		match next {
			Some(change) => {
				self.changes.insert(path, change);
			}
			None => {
				self.changes.remove(&path);
				self.order.retain(|p| p != &path);
			}
		}
	}

	pub fn pending(&self) -> usize {
		self.changes.len()
	}

	/// Events folded into an existing entry since creation.
	pub fn coalesced(&self) -> u64 {
		self.coalesced
	}

	/// A batch is due once the window has been quiet or it grew too large.
	pub fn is_due(&self, now: Instant) -> bool {
		if self.changes.is_empty() {
			return false;
		}
		self.changes.len() >= self.max_batch_size
			|| self
				.last_event_at
				.map_or(true, |last| now.saturating_duration_since(last) >= self.window)
	}

	pub fn drain(&mut self) -> WatchBatch {
		let mut batch = WatchBatch::default();
		for path in self.order.drain(..) {
			match self.changes.remove(&path) {
				Some(NetChange::Added) => batch.added.push(path),
				Some(NetChange::Changed) => batch.changed.push(path),
				Some(NetChange::Removed) => batch.removed.push(path),
				None => {}
			}
		}
		self.changes.clear();
		self.last_event_at = None;
		batch
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use super::*;

	fn aggregator() -> Aggregator {
		Aggregator::new(Duration::from_millis(50), 1024)
	}

	#[test]
	fn bursts_become_one_batch() {
		let mut aggregator = aggregator();
		for name in ["a.jar", "b.jar", "c.jar"] {
			aggregator.push(FsEvent::create(format!("/mods/{name}")));
		}
		aggregator.push(FsEvent::modify("/mods/a.jar"));

		let batch = aggregator.drain();
		assert_eq!(
			batch.added,
			vec![
				PathBuf::from("/mods/a.jar"),
				PathBuf::from("/mods/b.jar"),
				PathBuf::from("/mods/c.jar"),
			]
		);
		assert!(batch.changed.is_empty());
		assert_eq!(aggregator.coalesced(), 1);
		assert_eq!(aggregator.pending(), 0);
	}

	#[test]
	fn add_then_remove_cancels_out() {
		let mut aggregator = aggregator();
		aggregator.push(FsEvent::create("/mods/a.jar"));
		aggregator.push(FsEvent::remove("/mods/a.jar"));
		assert!(aggregator.drain().is_empty());
	}

	#[test]
	fn remove_then_add_is_a_change() {
		let mut aggregator = aggregator();
		aggregator.push(FsEvent::remove("/mods/a.jar"));
		aggregator.push(FsEvent::create("/mods/a.jar"));
		assert_eq!(aggregator.drain().changed, vec![PathBuf::from("/mods/a.jar")]);
	}

	#[test]
	fn renames_split_into_remove_and_add() {
		let mut aggregator = aggregator();
		aggregator.push(FsEvent::rename("/mods/old.jar", "/mods/new.jar"));
		let batch = aggregator.drain();
		assert_eq!(batch.removed, vec![PathBuf::from("/mods/old.jar")]);
		assert_eq!(batch.added, vec![PathBuf::from("/mods/new.jar")]);
	}

	#[tokio::test(start_paused = true)]
	async fn due_after_quiet_window() {
		let mut aggregator = aggregator();
		assert!(!aggregator.is_due(Instant::now()));

		aggregator.push(FsEvent::create("/mods/a.jar"));
		assert!(!aggregator.is_due(Instant::now()));

		tokio::time::advance(Duration::from_millis(60)).await;
		assert!(aggregator.is_due(Instant::now()));
	}

	#[test]
	fn due_when_full() {
		let mut aggregator = Aggregator::new(Duration::from_secs(60), 2);
		aggregator.push(FsEvent::create("/mods/a.jar"));
		aggregator.push(FsEvent::create("/mods/b.jar"));
		assert!(aggregator.is_due(Instant::now()));
	}
}

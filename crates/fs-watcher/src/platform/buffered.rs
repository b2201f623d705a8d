//! Stabilizing event handler.
//!
//! Creates and modifications are held back until no new event for the same
//! path arrived for the stabilization window, so a file that is still being
//! copied in is reported once, after the last write.

use std::{
	collections::HashMap,
	path::PathBuf,
	time::{Duration, Instant},
};

use tokio::sync::RwLock;
use tracing::trace;

use crate::{
	event::{FsEvent, FsEventKind, RawEventKind, RawNotifyEvent},
	platform::EventHandler,
	Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
	Create,
	Modify,
}

#[derive(Debug)]
struct Pending {
	kind: PendingKind,
	last_seen: Instant,
}

pub(crate) struct BufferedHandler {
	stabilization: Duration,
	pending_updates: RwLock<HashMap<PathBuf, Pending>>,
}

impl BufferedHandler {
	pub(crate) fn new(stabilization: Duration) -> Self {
		Self {
			stabilization,
			pending_updates: RwLock::new(HashMap::new()),
		}
	}

	async fn touch(&self, path: PathBuf, kind: PendingKind) {
		let mut updates = self.pending_updates.write().await;
		let now = Instant::now();
		updates
			.entry(path)
			.and_modify(|pending| {
				// A create followed by writes is still a create
				if kind == PendingKind::Create {
					pending.kind = PendingKind::Create;
				}
				pending.last_seen = now;
			})
			.or_insert(Pending {
				kind,
				last_seen: now,
			});
	}

	async fn forget(&self, path: &PathBuf) -> Option<PendingKind> {
		self.pending_updates
			.write()
			.await
			.remove(path)
			.map(|pending| pending.kind)
	}

	async fn evict_updates(&self) -> Vec<FsEvent> {
		let mut updates = self.pending_updates.write().await;
		let mut events = Vec::new();

		updates.retain(|path, pending| {
			if pending.last_seen.elapsed() < self.stabilization {
				return true;
			}

			trace!(path = %path.display(), kind = ?pending.kind, "Evicting stabilized update");
			events.push(match pending.kind {
				PendingKind::Create => FsEvent::create(path.clone()),
				PendingKind::Modify => FsEvent::modify(path.clone()),
			});
			false
		});

		events
	}
}

#[async_trait::async_trait]
impl EventHandler for BufferedHandler {
	async fn process(&self, event: RawNotifyEvent) -> Result<Vec<FsEvent>> {
		let Some(path) = event.primary_path().cloned() else {
			return Ok(vec![]);
		};

		match event.kind {
			RawEventKind::Create | RawEventKind::RenameTo => {
				self.touch(path, PendingKind::Create).await;
				Ok(vec![])
			}
			RawEventKind::Modify => {
				self.touch(path, PendingKind::Modify).await;
				Ok(vec![])
			}
			RawEventKind::Remove | RawEventKind::RenameFrom => {
				// A file that appeared and vanished inside the window never existed
				// for the consumer
				if self.forget(&path).await == Some(PendingKind::Create) {
					trace!(path = %path.display(), "Dropping create neutralized by remove");
					return Ok(vec![]);
				}
				Ok(vec![FsEvent::remove(path)])
			}
			RawEventKind::Rename if event.paths.len() >= 2 => {
				let from = event.paths[0].clone();
				let to = event.paths[1].clone();
				let from_was_pending = self.forget(&from).await;
				if from_was_pending == Some(PendingKind::Create) {
					// Renamed before it settled; report the final name only
					self.touch(to, PendingKind::Create).await;
					return Ok(vec![]);
				}
				Ok(vec![FsEvent {
					kind: FsEventKind::Rename { from },
					path: to,
					timestamp: event.timestamp,
				}])
			}
			RawEventKind::Rename => {
				// Backends like FSEvents only report one end of a rename
				if tokio::fs::try_exists(&path).await.unwrap_or(false) {
					self.touch(path, PendingKind::Create).await;
					Ok(vec![])
				} else if self.forget(&path).await == Some(PendingKind::Create) {
					Ok(vec![])
				} else {
					Ok(vec![FsEvent::remove(path)])
				}
			}
			RawEventKind::Other(ref kind) => {
				trace!(%kind, "Ignoring unknown event kind");
				Ok(vec![])
			}
		}
	}

	async fn tick(&self) -> Result<Vec<FsEvent>> {
		Ok(self.evict_updates().await)
	}

	async fn reset(&self) {
		self.pending_updates.write().await.clear();
	}
}

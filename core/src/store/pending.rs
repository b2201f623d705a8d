use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::Arc,
	time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::trace;

/// Registrations older than this are assumed to have lost their event (the
/// watcher was off or the backend dropped it) and no longer mask changes.
const PENDING_TTL: Duration = Duration::from_secs(30);

/// Destination paths of file operations the store itself is performing.
///
/// A path is registered before the operation starts and consumed by the
/// watcher when the matching event shows up, so the store's own writes are
/// never imported a second time.
#[derive(Clone, Default)]
pub struct PendingSet {
	paths: Arc<Mutex<HashMap<PathBuf, Instant>>>,
}

impl PendingSet {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, path: impl Into<PathBuf>) {
		let path = path.into();
		let mut paths = self.paths.lock();
		paths.retain(|_, registered_at| registered_at.elapsed() < PENDING_TTL);
		trace!(path = %path.display(), "Registering pending path");
		paths.insert(path, Instant::now());
	}

	/// Restarts the TTL once the operation finished; long copies would
	/// otherwise expire before their event arrives.
	pub fn settle(&self, path: &Path) {
		if let Some(registered_at) = self.paths.lock().get_mut(path) {
			*registered_at = Instant::now();
		}
	}

	/// Drops a registration whose operation failed.
	pub fn unregister(&self, path: &Path) {
		self.paths.lock().remove(path);
	}

	/// Consumes the registration for `path`, returning whether there was a
	/// live one.
	pub fn take(&self, path: &Path) -> bool {
		match self.paths.lock().remove(path) {
			Some(registered_at) => registered_at.elapsed() < PENDING_TTL,
			None => false,
		}
	}

	pub fn contains(&self, path: &Path) -> bool {
		self.paths
			.lock()
			.get(path)
			.map(|registered_at| registered_at.elapsed() < PENDING_TTL)
			.unwrap_or(false)
	}

	pub fn len(&self) -> usize {
		self.paths.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn take_consumes_once() {
		let pending = PendingSet::new();
		let path = Path::new("/launcher/mods/a.jar");
		pending.register(path);
		assert!(pending.contains(path));
		assert!(pending.take(path));
		assert!(!pending.take(path));
		assert!(pending.is_empty());
	}

	#[test]
	fn unregister_forgets_failed_operations() {
		let pending = PendingSet::new();
		let path = Path::new("/launcher/mods/a.jar");
		pending.register(path);
		pending.unregister(path);
		assert!(!pending.take(path));
	}

	#[test]
	fn clones_share_state() {
		let pending = PendingSet::new();
		let watcher_side = pending.clone();
		pending.register("/launcher/mods/a.jar");
		assert!(watcher_side.take(Path::new("/launcher/mods/a.jar")));
	}
}

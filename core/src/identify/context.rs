use std::{
	collections::HashMap,
	fs::Metadata,
	path::{Path, PathBuf},
	sync::Arc,
	time::SystemTime,
};

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::{error::FileIOError, resource::ContentHash};

use super::hash::{file_checksum, FileDigest};

/// Filesystem facts about a path, captured once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
	pub size: u64,
	/// Zero when the platform has no stable inode.
	pub ino: u64,
	pub is_dir: bool,
	pub modified: Option<SystemTime>,
}

impl FileStat {
	fn from_metadata(metadata: &Metadata) -> Self {
		Self {
			size: metadata.len(),
			ino: get_inode(metadata).unwrap_or(0),
			is_dir: metadata.is_dir(),
			modified: metadata.modified().ok(),
		}
	}
}

#[cfg(unix)]
pub fn get_inode(metadata: &Metadata) -> Option<u64> {
	use std::os::unix::fs::MetadataExt;
	Some(metadata.ino())
}

#[cfg(not(unix))]
pub fn get_inode(_metadata: &Metadata) -> Option<u64> {
	// File indices on other platforms are not stable enough to dedup on
	None
}

pub async fn stat_file(path: impl AsRef<Path>) -> Result<FileStat, FileIOError> {
	let path = path.as_ref();
	tokio::fs::metadata(path)
		.await
		.map(|metadata| FileStat::from_metadata(&metadata))
		.map_err(|e| FileIOError::from((path, e, "stat")))
}

#[derive(Default)]
struct PathFacts {
	stat: OnceCell<FileStat>,
	digest: OnceCell<FileDigest>,
	hash_hint: Mutex<Option<ContentHash>>,
}

/// Per-call cache shared by the requests of one bulk operation.
///
/// The same path is stat'ed and hashed at most once per context; a second
/// request for a path whose digest is still being computed waits for the
/// first one instead of reading the file again.
#[derive(Default, Clone)]
pub struct ResolveContext {
	entries: Arc<Mutex<HashMap<PathBuf, Arc<PathFacts>>>>,
}

impl ResolveContext {
	pub fn new() -> Self {
		Self::default()
	}

	fn facts(&self, path: &Path) -> Arc<PathFacts> {
		Arc::clone(self.entries.lock().entry(path.to_path_buf()).or_default())
	}

	pub async fn stat(&self, path: &Path) -> Result<FileStat, FileIOError> {
		let facts = self.facts(path);
		facts.stat.get_or_try_init(|| stat_file(path)).await.copied()
	}

	pub async fn digest(&self, path: &Path, ext: &str) -> Result<FileDigest, FileIOError> {
		let facts = self.facts(path);
		facts
			.digest
			.get_or_try_init(|| file_checksum(path, ext))
			.await
			.cloned()
	}

	/// Digest if it was already computed in this context.
	pub fn known_digest(&self, path: &Path) -> Option<FileDigest> {
		self.entries
			.lock()
			.get(path)
			.and_then(|facts| facts.digest.get().cloned())
	}

	/// Records a hash the caller already knows (e.g. published by the
	/// download source) so it can be used for an index lookup before
	/// the file is read.
	pub fn set_hash_hint(&self, path: &Path, hash: ContentHash) {
		*self.facts(path).hash_hint.lock() = Some(hash);
	}

	pub fn hash_hint(&self, path: &Path) -> Option<ContentHash> {
		let known = self.known_digest(path).map(|digest| digest.hash);
		known.or_else(|| {
			self.entries
				.lock()
				.get(path)
				.and_then(|facts| facts.hash_hint.lock().clone())
		})
	}

	/// Drops everything known about `path`, e.g. after it was moved.
	pub fn forget(&self, path: &Path) {
		self.entries.lock().remove(path);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn digest_is_computed_once_per_path() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("a.jar");
		tokio::fs::write(&path, b"abc").await.unwrap();

		let context = ResolveContext::new();
		let (a, b) = tokio::join!(context.digest(&path, ".jar"), context.digest(&path, ".jar"));
		assert_eq!(a.unwrap(), b.unwrap());

		// The cached digest survives the file changing underneath
		tokio::fs::write(&path, b"changed").await.unwrap();
		let again = context.digest(&path, ".jar").await.unwrap();
		assert_eq!(again.hash.as_str(), "a9993e364706816aba3e25717850c26c9cd0d89d");

		context.forget(&path);
		let fresh = context.digest(&path, ".jar").await.unwrap();
		assert_ne!(fresh.hash, again.hash);
	}

	#[tokio::test]
	async fn stat_captures_inode_and_kind() {
		let dir = tempfile::tempdir().unwrap();
		let context = ResolveContext::new();
		let stat = context.stat(dir.path()).await.unwrap();
		assert!(stat.is_dir);
		#[cfg(unix)]
		assert_ne!(stat.ino, 0);
	}

	#[tokio::test]
	async fn hash_hint_prefers_computed_digest() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("a.jar");
		tokio::fs::write(&path, b"abc").await.unwrap();

		let context = ResolveContext::new();
		let hint = ContentHash::parse("0000000000000000000000000000000000000001").unwrap();
		context.set_hash_hint(&path, hint.clone());
		assert_eq!(context.hash_hint(&path), Some(hint));

		let digest = context.digest(&path, ".jar").await.unwrap();
		assert_eq!(context.hash_hint(&path), Some(digest.hash));
	}
}

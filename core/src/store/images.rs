use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};
use tokio::fs;

use crate::error::FileIOError;

const IMAGE_SCHEME: &str = "image://";

/// Content addressed storage for icons extracted from resources.
#[derive(Debug, Clone)]
pub struct ImageStore {
	dir: PathBuf,
}

impl ImageStore {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	/// Stores the bytes once and returns their `image://<sha1>` reference.
	pub async fn add(&self, bytes: &[u8]) -> Result<String, FileIOError> {
		let hash = hex::encode(Sha1::digest(bytes));
		let path = self.dir.join(format!("{hash}.png"));

		if !fs::try_exists(&path).await.unwrap_or(false) {
			fs::create_dir_all(&self.dir)
				.await
				.map_err(|e| FileIOError::from((&self.dir, e, "create image directory")))?;
			let partial = self.dir.join(format!(".{hash}.png.partial"));
			fs::write(&partial, bytes)
				.await
				.map_err(|e| FileIOError::from((&partial, e, "write icon")))?;
			fs::rename(&partial, &path)
				.await
				.map_err(|e| FileIOError::from((&path, e, "move icon into place")))?;
		}

		Ok(format!("{IMAGE_SCHEME}{hash}"))
	}

	/// Where the bytes behind an `image://` reference live.
	pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
		let hash = reference.strip_prefix(IMAGE_SCHEME)?;
		(hash.len() == 40 && hash.bytes().all(|b| b.is_ascii_hexdigit()))
			.then(|| self.dir.join(format!("{hash}.png")))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn icons_are_stored_once() {
		let dir = tempfile::tempdir().unwrap();
		let images = ImageStore::new(dir.path().join("resource-images"));

		let first = images.add(b"abc").await.unwrap();
		let second = images.add(b"abc").await.unwrap();
		assert_eq!(first, "image://a9993e364706816aba3e25717850c26c9cd0d89d");
		assert_eq!(first, second);

		let path = images.resolve(&first).unwrap();
		assert_eq!(fs::read(path).await.unwrap(), b"abc");
		assert!(images.resolve("https://example.com/icon.png").is_none());
	}
}

use std::{
	fmt::Display,
	io,
	path::Path,
};

use thiserror::Error;

use crate::{
	config::ConfigError,
	deploy::DeployError,
	index::RecordStoreError,
	resource::{ContentHash, ResourceDomain},
	store::StoreError,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for every operation exposed by the resource manager.
#[derive(Error, Debug)]
pub enum Error {
	#[error("resource not found: <key='{key}'>")]
	NotFound { key: String },
	#[error("resource domain mismatch: expected {expected}, found {found}")]
	DomainMismatch {
		expected: ResourceDomain,
		found: ResourceDomain,
	},
	#[error("canonical file of resource is missing on disk: <hash='{hash}', path='{}'>", .path.display())]
	FilesystemDrift { hash: ContentHash, path: Box<Path> },
	#[error("unable to find a free name for resource: <path='{}'>", .path.display())]
	Collision { path: Box<Path> },
	#[error("only regular files can be imported: <path='{}'>", .path.display())]
	NotAFile { path: Box<Path> },
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error(transparent)]
	Records(#[from] RecordStoreError),
	#[error(transparent)]
	Deploy(#[from] DeployError),
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error(transparent)]
	Watcher(#[from] quarry_fs_watcher::WatcherError),
	#[error("background task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}

impl From<StoreError> for Error {
	fn from(e: StoreError) -> Self {
		match e {
			StoreError::Collision(path) => Self::Collision { path },
			StoreError::NotAFile(path) => Self::NotAFile { path },
			StoreError::FileIO(e) => Self::FileIO(e),
		}
	}
}

/// File I/O error that includes the path that caused the error
#[derive(Error, Debug)]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
	pub maybe_context: Option<String>,
}

impl Display for FileIOError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"file I/O error{}: {}; path: '{}'",
			self.maybe_context
				.as_ref()
				.map(|ctx| format!(" ({ctx})"))
				.unwrap_or_default(),
			self.source,
			self.path.display()
		)
	}
}

impl FileIOError {
	pub fn is_not_found(&self) -> bool {
		self.source.kind() == io::ErrorKind::NotFound
	}
}

impl<P: AsRef<Path>> From<(P, io::Error)> for FileIOError {
	fn from((path, source): (P, io::Error)) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: None,
		}
	}
}

impl<P: AsRef<Path>> From<(P, io::Error, &str)> for FileIOError {
	fn from((path, source, context): (P, io::Error, &str)) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
			maybe_context: Some(context.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_io_error_mentions_path_and_context() {
		let e = FileIOError::from((
			"/launcher/mods/a.jar",
			io::Error::from(io::ErrorKind::NotFound),
			"stat canonical file",
		));
		let text = e.to_string();
		assert!(text.contains("stat canonical file"));
		assert!(text.contains("/launcher/mods/a.jar"));
		assert!(e.is_not_found());
	}
}

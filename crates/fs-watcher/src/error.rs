use std::path::Path;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WatcherError>;

#[derive(Error, Debug)]
pub enum WatcherError {
	#[error("notify backend error: {0}")]
	Notify(#[from] notify::Error),
	#[error("watched path is not a directory: <path='{}'>", .0.display())]
	NotADirectory(Box<Path>),
}

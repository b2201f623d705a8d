use std::{
	io,
	path::{Path, PathBuf},
	time::Duration,
};

use tokio::{fs, time::timeout};
use tracing::{debug, warn};

use crate::error::FileIOError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
	Linked,
	Copied,
}

/// Hard links `src` to `dest`, falling back to a copy when linking fails or
/// does not finish within `link_timeout` (slow network filesystems). A zero
/// timeout skips linking.
///
/// The copy goes through a hidden temporary file next to `dest` and is
/// renamed into place, so `dest` only ever appears complete.
pub async fn link_or_copy(
	src: &Path,
	dest: &Path,
	link_timeout: Duration,
) -> Result<Transfer, FileIOError> {
	if link_timeout.is_zero() {
		return copy_into_place(src, dest).await;
	}

	match timeout(link_timeout, fs::hard_link(src, dest)).await {
		Ok(Ok(())) => return Ok(Transfer::Linked),
		Ok(Err(e)) if e.kind() == io::ErrorKind::AlreadyExists => {
			return Err(FileIOError::from((dest, e, "link destination exists")));
		}
		Ok(Err(e)) => {
			debug!(src = %src.display(), dest = %dest.display(), %e, "Hard link failed, copying");
		}
		Err(_) => {
			warn!(
				src = %src.display(),
				dest = %dest.display(),
				timeout_ms = link_timeout.as_millis() as u64,
				"Hard link timed out, copying",
			);
		}
	}

	copy_into_place(src, dest).await
}

async fn copy_into_place(src: &Path, dest: &Path) -> Result<Transfer, FileIOError> {
	if exists(dest).await? {
		return Err(FileIOError::from((
			dest,
			io::Error::from(io::ErrorKind::AlreadyExists),
			"copy destination exists",
		)));
	}

	let partial = partial_path(dest);
	if let Err(e) = fs::copy(src, &partial).await {
		let _ = fs::remove_file(&partial).await;
		return Err(FileIOError::from((src, e, "copy resource")));
	}
	if let Err(e) = fs::rename(&partial, dest).await {
		let _ = fs::remove_file(&partial).await;
		return Err(FileIOError::from((dest, e, "move copied resource into place")));
	}

	Ok(Transfer::Copied)
}

pub async fn move_file(src: &Path, dest: &Path) -> Result<(), FileIOError> {
	fs::rename(src, dest)
		.await
		.map_err(|e| FileIOError::from((src, e, "rename resource")))
}

/// Removes a file, treating "already gone" as success.
pub async fn remove_file_if_exists(path: &Path) -> Result<bool, FileIOError> {
	match fs::remove_file(path).await {
		Ok(()) => Ok(true),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
		Err(e) => Err(FileIOError::from((path, e, "remove file"))),
	}
}

pub async fn exists(path: &Path) -> Result<bool, FileIOError> {
	fs::try_exists(path)
		.await
		.map_err(|e| FileIOError::from((path, e, "check existence")))
}

fn partial_path(dest: &Path) -> PathBuf {
	let name = dest
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_default();
	dest.with_file_name(format!(".{name}.partial"))
}

/// Makes a display name safe to use as a file name on every platform.
pub fn sanitize_file_name(name: &str) -> String {
	let mut sanitized = name
		.chars()
		.map(|c| match c {
			'<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '-',
			c if c.is_control() => '-',
			c => c,
		})
		.collect::<String>();

	let trimmed_len = sanitized.trim_end_matches(['.', ' ']).len();
	sanitized.truncate(trimmed_len);
	let sanitized = sanitized.trim_start().trim_start_matches('.').to_string();

	if sanitized.is_empty() {
		return "resource".to_string();
	}

	let stem = sanitized.split('.').next().unwrap_or_default();
	const RESERVED: [&str; 22] = [
		"CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
		"COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
	];
	if RESERVED.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
		return format!("_{sanitized}");
	}

	sanitized
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sanitizes_names() {
		assert_eq!(sanitize_file_name("sodium-0.5.3.jar"), "sodium-0.5.3.jar");
		assert_eq!(sanitize_file_name("a/b:c?.zip"), "a-b-c-.zip");
		assert_eq!(sanitize_file_name("trailing. . "), "trailing");
		assert_eq!(sanitize_file_name(".hidden.jar"), "hidden.jar");
		assert_eq!(sanitize_file_name("con.zip"), "_con.zip");
		assert_eq!(sanitize_file_name("..."), "resource");
	}

	#[tokio::test]
	async fn links_within_a_filesystem() {
		let dir = tempfile::tempdir().unwrap();
		let src = dir.path().join("a.jar");
		let dest = dir.path().join("b.jar");
		fs::write(&src, b"abc").await.unwrap();

		let transfer = link_or_copy(&src, &dest, Duration::from_millis(1500))
			.await
			.unwrap();
		assert_eq!(transfer, Transfer::Linked);
		assert_eq!(fs::read(&dest).await.unwrap(), b"abc");
		assert!(src.exists());
	}

	#[tokio::test]
	async fn refuses_to_overwrite() {
		let dir = tempfile::tempdir().unwrap();
		let src = dir.path().join("a.jar");
		let dest = dir.path().join("b.jar");
		fs::write(&src, b"abc").await.unwrap();
		fs::write(&dest, b"other").await.unwrap();

		assert!(link_or_copy(&src, &dest, Duration::from_millis(1500))
			.await
			.is_err());
		assert_eq!(fs::read(&dest).await.unwrap(), b"other");
	}

	#[tokio::test]
	async fn zero_timeout_copies_through_a_partial_file() {
		let dir = tempfile::tempdir().unwrap();
		let src = dir.path().join("a.jar");
		let dest = dir.path().join("b.jar");
		fs::write(&src, b"abc").await.unwrap();

		let transfer = link_or_copy(&src, &dest, Duration::ZERO).await.unwrap();
		assert_eq!(transfer, Transfer::Copied);
		assert_eq!(fs::read(&dest).await.unwrap(), b"abc");
		assert!(!partial_path(&dest).exists());

		let mut names = std::fs::read_dir(dir.path())
			.unwrap()
			.map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
			.collect::<Vec<_>>();
		names.sort();
		assert_eq!(names, vec!["a.jar", "b.jar"]);

		use std::os::unix::fs::MetadataExt;
		assert_ne!(
			std::fs::metadata(&src).unwrap().ino(),
			std::fs::metadata(&dest).unwrap().ino()
		);
	}

	#[tokio::test]
	async fn remove_missing_file_is_ok() {
		let dir = tempfile::tempdir().unwrap();
		assert!(!remove_file_if_exists(&dir.path().join("nope")).await.unwrap());
	}
}

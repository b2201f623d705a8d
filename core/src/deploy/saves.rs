//! Worlds are played from a directory, so zipped saves are unpacked into
//! the instance instead of linked.

use std::{
	fs::{self, File},
	io::{self, BufReader},
	path::{Path, PathBuf},
};

use tracing::trace;
use zip::ZipArchive;

use crate::error::FileIOError;

use super::DeployError;

/// Marker a directory needs before uninstall may delete it.
pub(super) const LEVEL_DAT: &str = "level.dat";

/// Unpacks the entries below `root` (a prefix such as `World/`, or empty)
/// into `dest`, which must not exist yet.
///
/// Extraction happens in a sibling directory that is renamed into place at
/// the end, so a failed extraction leaves nothing behind.
pub(super) fn extract_world(archive: &Path, root: &str, dest: &Path) -> Result<(), DeployError> {
	let file = File::open(archive).map_err(|e| FileIOError::from((archive, e, "open save")))?;
	let mut zip = ZipArchive::new(BufReader::new(file))?;

	let staging = staging_dir(dest);
	fs::create_dir_all(&staging)
		.map_err(|e| FileIOError::from((&staging, e, "create save staging directory")))?;

	let result = (|| -> Result<(), DeployError> {
		for i in 0..zip.len() {
			let mut entry = zip.by_index(i)?;
			let Some(name) = entry.enclosed_name() else {
				trace!(entry = entry.name(), "Skipping unsafe save entry");
				continue;
			};
			let Ok(relative) = name.strip_prefix(root.trim_end_matches('/')) else {
				continue;
			};
			if relative.as_os_str().is_empty() {
				continue;
			}

			let target = staging.join(relative);
			if entry.is_dir() {
				fs::create_dir_all(&target)
					.map_err(|e| FileIOError::from((&target, e, "create save directory")))?;
				continue;
			}
			if let Some(parent) = target.parent() {
				fs::create_dir_all(parent)
					.map_err(|e| FileIOError::from((parent, e, "create save directory")))?;
			}
			let mut out = File::create(&target)
				.map_err(|e| FileIOError::from((&target, e, "create save file")))?;
			io::copy(&mut entry, &mut out)
				.map_err(|e| FileIOError::from((&target, e, "extract save file")))?;
		}

		fs::rename(&staging, dest)
			.map_err(|e| FileIOError::from((dest, e, "move extracted save into place")))?;
		Ok(())
	})();

	if result.is_err() {
		let _ = fs::remove_dir_all(&staging);
	}
	result
}

fn staging_dir(dest: &Path) -> PathBuf {
	let name = dest
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.unwrap_or_default();
	dest.with_file_name(format!(".{name}.partial"))
}

/// Whether `dir` looks like a world we could have extracted.
pub(super) fn is_world(dir: &Path) -> bool {
	dir.join(LEVEL_DAT).is_file()
}

use std::{
	fs::{self, File},
	io::{self, BufReader, Read},
	path::{Path, PathBuf},
};

use serde::de::DeserializeOwned;
use zip::{result::ZipError, ZipArchive};

use crate::error::FileIOError;

use super::ParseError;

/// Directory entries are listed this many levels deep at most.
const MAX_DIRECTORY_DEPTH: usize = 4;

/// Manifests and icons are tiny; anything bigger is not read into memory.
/// Sizes claimed by archive headers are never trusted for allocation.
pub(crate) const MAX_ENTRY_LEN: u64 = 8 * 1024 * 1024;

/// Read access to the entries of a resource, regardless of whether it is a
/// zip-like archive or an unpacked directory.
pub enum ArchiveHandle {
	Zip(Box<ZipArchive<BufReader<File>>>),
	Directory(PathBuf),
}

impl ArchiveHandle {
	pub fn open(path: impl AsRef<Path>) -> Result<Self, ParseError> {
		let path = path.as_ref();
		let metadata = fs::metadata(path).map_err(|e| FileIOError::from((path, e)))?;
		if metadata.is_dir() {
			return Ok(Self::Directory(path.to_path_buf()));
		}

		let file = File::open(path).map_err(|e| FileIOError::from((path, e)))?;
		Ok(Self::Zip(Box::new(ZipArchive::new(BufReader::new(file))?)))
	}

	pub fn has_entry(&mut self, name: &str) -> bool {
		match self {
			Self::Zip(zip) => zip.index_for_name(name).is_some(),
			Self::Directory(root) => root.join(name).exists(),
		}
	}

	/// Reads an entry, `None` if there is no such entry.
	pub fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, ParseError> {
		match self {
			Self::Zip(zip) => match zip.by_name(name) {
				Ok(mut entry) => {
					let mut buf = Vec::new();
					entry
						.by_ref()
						.take(MAX_ENTRY_LEN + 1)
						.read_to_end(&mut buf)
						.map_err(|e| FileIOError::from((name, e, "read archive entry")))?;
					check_entry_len(name, buf.len() as u64)?;
					Ok(Some(buf))
				}
				Err(ZipError::FileNotFound) => Ok(None),
				Err(e) => Err(e.into()),
			},
			Self::Directory(root) => {
				let path = root.join(name);
				let file = match File::open(&path) {
					Ok(file) => file,
					Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
					Err(e) => return Err(FileIOError::from((path, e)).into()),
				};
				let mut buf = Vec::new();
				file.take(MAX_ENTRY_LEN + 1)
					.read_to_end(&mut buf)
					.map_err(|e| FileIOError::from((&path, e, "read directory entry")))?;
				check_entry_len(name, buf.len() as u64)?;
				Ok(Some(buf))
			}
		}
	}

	pub fn read_required(&mut self, name: &str) -> Result<Vec<u8>, ParseError> {
		self.read_entry(name)?
			.ok_or_else(|| ParseError::MissingEntry(name.to_string()))
	}

	pub fn read_json<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, ParseError> {
		let bytes = self.read_required(name)?;
		// Plenty of mods ship their json with a BOM
		let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&bytes[..]);
		serde_json::from_slice(bytes).map_err(|source| ParseError::Json {
			entry: name.to_string(),
			source,
		})
	}

	pub fn read_toml<T: DeserializeOwned>(&mut self, name: &str) -> Result<T, ParseError> {
		let bytes = self.read_required(name)?;
		let text = String::from_utf8_lossy(&bytes);
		toml::from_str(&text).map_err(|source| ParseError::Toml {
			entry: name.to_string(),
			source,
		})
	}

	/// Entry names using `/` as separator. Directories end with `/`.
	pub fn entry_names(&mut self) -> Vec<String> {
		match self {
			Self::Zip(zip) => zip.file_names().map(str::to_string).collect(),
			Self::Directory(root) => {
				let mut names = Vec::new();
				list_directory(root, "", 0, &mut names);
				names
			}
		}
	}
}

fn check_entry_len(name: &str, len: u64) -> Result<(), ParseError> {
	if len > MAX_ENTRY_LEN {
		return Err(ParseError::EntryTooLarge {
			entry: name.to_string(),
			limit: MAX_ENTRY_LEN,
		});
	}
	Ok(())
}

fn list_directory(dir: &Path, prefix: &str, depth: usize, names: &mut Vec<String>) {
	if depth >= MAX_DIRECTORY_DEPTH {
		return;
	}

	let Ok(entries) = fs::read_dir(dir) else {
		return;
	};

	for entry in entries.flatten() {
		let Some(name) = entry.file_name().to_str().map(str::to_string) else {
			continue;
		};
		if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
			let nested = format!("{prefix}{name}/");
			names.push(nested.clone());
			list_directory(&entry.path(), &nested, depth + 1, names);
		} else {
			names.push(format!("{prefix}{name}"));
		}
	}
}

#[cfg(test)]
pub(crate) mod test_utils {
	use std::io::Write;

	use zip::{write::SimpleFileOptions, ZipWriter};

	use super::*;

	/// Writes a zip with the given entries. Entries ending with `/` become
	/// directories.
	pub(crate) fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
		let file = File::create(path).unwrap();
		let mut zip = ZipWriter::new(file);
		let options = SimpleFileOptions::default();
		for (name, content) in entries {
			if name.ends_with('/') {
				zip.add_directory(*name, options).unwrap();
			} else {
				zip.start_file(*name, options).unwrap();
				zip.write_all(content).unwrap();
			}
		}
		zip.finish().unwrap();
	}

	/// A single stored entry whose zip64 extra field claims `claimed_len`
	/// uncompressed bytes while the archive only holds `content`.
	pub(crate) fn write_zip_claiming_size(
		path: &Path,
		name: &str,
		content: &[u8],
		claimed_len: u64,
	) {
		let crc = crc32(content);
		let mut zip64_extra = Vec::new();
		zip64_extra.extend_from_slice(&0x0001u16.to_le_bytes());
		zip64_extra.extend_from_slice(&16u16.to_le_bytes());
		zip64_extra.extend_from_slice(&claimed_len.to_le_bytes());
		zip64_extra.extend_from_slice(&(content.len() as u64).to_le_bytes());

		let mut out = Vec::new();
		// Local file header
		out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
		out.extend_from_slice(&45u16.to_le_bytes());
		out.extend_from_slice(&[0; 2 + 2 + 2 + 2]);
		out.extend_from_slice(&crc.to_le_bytes());
		out.extend_from_slice(&u32::MAX.to_le_bytes());
		out.extend_from_slice(&u32::MAX.to_le_bytes());
		out.extend_from_slice(&(name.len() as u16).to_le_bytes());
		out.extend_from_slice(&(zip64_extra.len() as u16).to_le_bytes());
		out.extend_from_slice(name.as_bytes());
		out.extend_from_slice(&zip64_extra);
		out.extend_from_slice(content);

		let central_offset = out.len() as u32;
		out.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
		out.extend_from_slice(&45u16.to_le_bytes());
		out.extend_from_slice(&45u16.to_le_bytes());
		out.extend_from_slice(&[0; 2 + 2 + 2 + 2]);
		out.extend_from_slice(&crc.to_le_bytes());
		out.extend_from_slice(&u32::MAX.to_le_bytes());
		out.extend_from_slice(&u32::MAX.to_le_bytes());
		out.extend_from_slice(&(name.len() as u16).to_le_bytes());
		out.extend_from_slice(&(zip64_extra.len() as u16).to_le_bytes());
		// comment len, disk start, internal and external attributes, offset
		out.extend_from_slice(&[0; 2 + 2 + 2 + 4 + 4]);
		out.extend_from_slice(name.as_bytes());
		out.extend_from_slice(&zip64_extra);
		let central_len = out.len() as u32 - central_offset;

		out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
		out.extend_from_slice(&[0; 2 + 2]);
		out.extend_from_slice(&1u16.to_le_bytes());
		out.extend_from_slice(&1u16.to_le_bytes());
		out.extend_from_slice(&central_len.to_le_bytes());
		out.extend_from_slice(&central_offset.to_le_bytes());
		out.extend_from_slice(&0u16.to_le_bytes());

		fs::write(path, out).unwrap();
	}

	fn crc32(bytes: &[u8]) -> u32 {
		let mut crc = u32::MAX;
		for byte in bytes {
			crc ^= u32::from(*byte);
			for _ in 0..8 {
				crc = if crc & 1 == 1 {
					(crc >> 1) ^ 0xEDB8_8320
				} else {
					crc >> 1
				};
			}
		}
		!crc
	}
}

#[cfg(test)]
mod tests {
	use super::{
		test_utils::{write_zip, write_zip_claiming_size},
		*,
	};

	#[test]
	fn header_size_claims_do_not_drive_allocation() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("huge-claim.jar");
		let manifest = br#"{"schemaVersion":1,"id":"tiny","version":"1.0.0"}"#;
		write_zip_claiming_size(&path, "fabric.mod.json", manifest, 1 << 62);

		// Opening may already reject the archive, which is as good as reading it
		let Ok(mut handle) = ArchiveHandle::open(&path) else {
			return;
		};
		match handle.read_entry("fabric.mod.json") {
			Ok(Some(bytes)) => assert_eq!(bytes, manifest),
			Ok(None) => panic!("entry should be listed"),
			Err(_) => {}
		}
	}

	#[test]
	fn oversized_entries_are_refused() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("big.zip");
		let big = vec![0u8; MAX_ENTRY_LEN as usize + 1];
		write_zip(&path, &[("pack.mcmeta", &big)]);

		let mut handle = ArchiveHandle::open(&path).unwrap();
		assert!(matches!(
			handle.read_entry("pack.mcmeta"),
			Err(ParseError::EntryTooLarge { .. })
		));

		let unpacked = dir.path().join("unpacked");
		fs::create_dir_all(&unpacked).unwrap();
		fs::write(unpacked.join("pack.mcmeta"), &big).unwrap();
		let mut handle = ArchiveHandle::open(&unpacked).unwrap();
		assert!(matches!(
			handle.read_entry("pack.mcmeta"),
			Err(ParseError::EntryTooLarge { .. })
		));
	}

	#[test]
	fn reads_zip_entries() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("pack.zip");
		write_zip(
			&path,
			&[("pack.mcmeta", b"{}"), ("assets/", b""), ("assets/a.txt", b"a")],
		);

		let mut handle = ArchiveHandle::open(&path).unwrap();
		assert!(handle.has_entry("pack.mcmeta"));
		assert_eq!(handle.read_entry("assets/a.txt").unwrap().unwrap(), b"a");
		assert!(handle.read_entry("missing").unwrap().is_none());
		assert!(matches!(
			handle.read_required("missing"),
			Err(ParseError::MissingEntry(_))
		));
		assert!(handle.entry_names().contains(&"assets/a.txt".to_string()));
	}

	#[test]
	fn reads_directory_entries() {
		let dir = tempfile::tempdir().unwrap();
		fs::create_dir_all(dir.path().join("world/region")).unwrap();
		fs::write(dir.path().join("world/level.dat"), b"nbt").unwrap();

		let mut handle = ArchiveHandle::open(dir.path()).unwrap();
		assert!(handle.has_entry("world/level.dat"));
		let names = handle.entry_names();
		assert!(names.contains(&"world/".to_string()));
		assert!(names.contains(&"world/region/".to_string()));
		assert!(names.contains(&"world/level.dat".to_string()));
	}

	#[test]
	fn json_with_bom_is_accepted() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("a.zip");
		write_zip(&path, &[("x.json", b"\xEF\xBB\xBF{\"a\": 1}")]);

		let mut handle = ArchiveHandle::open(&path).unwrap();
		let value: serde_json::Value = handle.read_json("x.json").unwrap();
		assert_eq!(value["a"], 1);
	}

	#[test]
	fn garbage_is_not_an_archive() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("a.jar");
		fs::write(&path, b"definitely not a zip").unwrap();
		assert!(matches!(
			ArchiveHandle::open(&path),
			Err(ParseError::Archive(_))
		));
	}
}

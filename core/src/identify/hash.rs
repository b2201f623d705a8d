use std::path::Path;

use sha1::{Digest as _, Sha1};
use tokio::{fs::File, io::AsyncReadExt};

use crate::{
	error::FileIOError,
	resource::{ContentHash, FileType},
};

use super::sniff::{sniff, SNIFF_LEN};

const BLOCK_LEN: usize = 1048576;

/// Result of reading a file once: its digest and what it looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigest {
	pub hash: ContentHash,
	pub file_type: FileType,
	pub size: u64,
}

/// Streams the file through SHA-1, sniffing its type from the first block.
pub async fn file_checksum(path: impl AsRef<Path>, ext: &str) -> Result<FileDigest, FileIOError> {
	let path = path.as_ref();
	let mut reader = File::open(path)
		.await
		.map_err(|e| FileIOError::from((path, e, "open for hashing")))?;

	let mut context = Sha1::new();
	let mut buffer = vec![0; BLOCK_LEN].into_boxed_slice();
	let mut head = Vec::with_capacity(SNIFF_LEN);
	let mut size = 0u64;

	loop {
		let read_count = reader
			.read(&mut buffer)
			.await
			.map_err(|e| FileIOError::from((path, e, "read for hashing")))?;
		if read_count == 0 {
			break;
		}

		if head.len() < SNIFF_LEN {
			let missing = (SNIFF_LEN - head.len()).min(read_count);
			head.extend_from_slice(&buffer[..missing]);
		}

		context.update(&buffer[..read_count]);
		size += read_count as u64;
	}

	Ok(FileDigest {
		hash: ContentHash::from_digest(&context.finalize()),
		file_type: sniff(&head, ext),
		size,
	})
}

use crate::resource::FileType;

/// Bytes needed from the head of a file to tell the types apart.
pub const SNIFF_LEN: usize = 8;

const ZIP: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY: &[u8] = b"PK\x05\x06";
const GZIP: &[u8] = b"\x1F\x8B";
const PNG: &[u8] = b"\x89PNG\r\n\x1A\n";
const JPEG: &[u8] = b"\xFF\xD8\xFF";

/// Coarse file type from the first bytes; `ext` only refines zips into jars.
pub fn sniff(head: &[u8], ext: &str) -> FileType {
	if head.starts_with(ZIP) || head.starts_with(ZIP_EMPTY) {
		if ext.eq_ignore_ascii_case(".jar") {
			FileType::Jar
		} else {
			FileType::Zip
		}
	} else if head.starts_with(PNG) {
		FileType::Png
	} else if head.starts_with(JPEG) {
		FileType::Jpeg
	} else if head.starts_with(GZIP) {
		FileType::Gzip
	} else {
		FileType::Unknown
	}
}

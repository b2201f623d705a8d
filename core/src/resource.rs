//! The resource record and the small value types it is built from.

use std::{
	collections::{BTreeMap, BTreeSet},
	fmt,
	path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use crate::parser::ParsedMetadata;

/// SHA-1 of the empty byte string. Never used as an index key.
pub const EMPTY_SHA1: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";

/// Coarse resource category; decides the storage directory and which parsers
/// apply. Variant order is the tie-break priority when parsers of several
/// domains recognize the same file.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	PartialOrd,
	Ord,
	Serialize,
	Deserialize,
	Display,
	EnumString,
	AsRefStr,
	EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ResourceDomain {
	Mods,
	ResourcePacks,
	ShaderPacks,
	Saves,
	Modpacks,
	Unclassified,
}

impl ResourceDomain {
	/// Directory name under the launcher root (and under instances).
	pub fn dir_name(&self) -> &'static str {
		match self {
			Self::Mods => "mods",
			Self::ResourcePacks => "resourcepacks",
			Self::ShaderPacks => "shaderpacks",
			Self::Saves => "saves",
			Self::Modpacks => "modpacks",
			Self::Unclassified => "unclassified",
		}
	}

	pub fn all() -> impl Iterator<Item = Self> {
		Self::iter()
	}

	pub fn is_classified(&self) -> bool {
		!matches!(self, Self::Unclassified)
	}
}

/// Specific format recognized by a parser.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ResourceType {
	Forge,
	Fabric,
	Quilt,
	#[serde(rename = "liteloader")]
	#[strum(serialize = "liteloader")]
	LiteLoader,
	#[serde(rename = "resourcepack")]
	#[strum(serialize = "resourcepack")]
	ResourcePack,
	#[serde(rename = "shaderpack")]
	#[strum(serialize = "shaderpack")]
	ShaderPack,
	Save,
	ModrinthModpack,
	CurseforgeModpack,
	McbbsModpack,
	Unknown,
}

/// Coarse type sniffed from the first bytes of a file.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FileType {
	Zip,
	Jar,
	Gzip,
	Png,
	Jpeg,
	Directory,
	Unknown,
}

impl FileType {
	pub fn is_archive(&self) -> bool {
		matches!(self, Self::Zip | Self::Jar | Self::Directory)
	}
}

/// Hex encoded SHA-1 content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
	pub fn from_digest(digest: &[u8]) -> Self {
		Self(hex::encode(digest))
	}

	/// Placeholder identity of directories, which are never hashed.
	pub fn none() -> Self {
		Self(String::new())
	}

	/// Parses a hex digest, or a `sha1:<hex>` uri.
	pub fn parse(value: &str) -> Option<Self> {
		let hex = value.strip_prefix("sha1:").unwrap_or(value);
		(hex.len() == 40 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
			.then(|| Self(hex.to_ascii_lowercase()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Short fragment used to disambiguate colliding file names.
	pub fn fragment(&self) -> &str {
		&self.0[..self.0.len().min(6)]
	}

	/// Whether this hash can identify content at all. The empty string and
	/// the digest of zero bytes never do.
	pub fn is_identifying(&self) -> bool {
		!self.0.is_empty() && self.0 != EMPTY_SHA1
	}

	pub fn uri(&self) -> String {
		format!("sha1:{}", self.0)
	}
}

impl fmt::Display for ContentHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurseforgeSource {
	pub project_id: u64,
	pub file_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModrinthSource {
	pub project_id: String,
	pub version_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubSource {
	pub owner: String,
	pub repo: String,
	pub artifact: String,
}

/// Where a resource was downloaded from, when known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub curseforge: Option<CurseforgeSource>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub modrinth: Option<ModrinthSource>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub github: Option<GithubSource>,
}

impl SourceInfo {
	pub fn is_empty(&self) -> bool {
		self.curseforge.is_none() && self.modrinth.is_none() && self.github.is_none()
	}

	/// Fields set on `other` win.
	pub fn merge(&mut self, other: SourceInfo) {
		if other.curseforge.is_some() {
			self.curseforge = other.curseforge;
		}
		if other.modrinth.is_some() {
			self.modrinth = other.modrinth;
		}
		if other.github.is_some() {
			self.github = other.github;
		}
	}

	pub fn identity_uris(&self) -> Vec<String> {
		let mut uris = Vec::new();
		if let Some(CurseforgeSource {
			project_id,
			file_id,
		}) = &self.curseforge
		{
			uris.push(format!("curseforge://id/{project_id}/{file_id}"));
		}
		if let Some(ModrinthSource { version_id, .. }) = &self.modrinth {
			uris.push(format!("modrinth://version/{version_id}"));
		}
		if let Some(GithubSource {
			owner,
			repo,
			artifact,
		}) = &self.github
		{
			uris.push(format!(
				"https://github.com/{owner}/{repo}/releases/download/{artifact}"
			));
		}
		uris
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetadata {
	/// Payloads keyed by the name of the parser that produced them.
	#[serde(default)]
	pub parsed: BTreeMap<String, ParsedMetadata>,
	#[serde(default)]
	pub source: SourceInfo,
}

/// The canonical unit of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
	pub hash: ContentHash,
	pub size: u64,
	/// Inode at scan time; only reliable until the file is moved.
	pub ino: u64,
	/// Display name, from parsed metadata or the file stem.
	pub name: String,
	/// File name on disk, extension included.
	pub file_name: String,
	/// Extension with its leading dot, or empty.
	pub ext: String,
	pub path: PathBuf,
	pub domain: ResourceDomain,
	#[serde(rename = "type")]
	pub resource_type: ResourceType,
	pub file_type: FileType,
	#[serde(default)]
	pub metadata: ResourceMetadata,
	#[serde(default)]
	pub uris: BTreeSet<String>,
	#[serde(default)]
	pub tags: BTreeSet<String>,
	#[serde(default)]
	pub icons: Vec<String>,
	/// Set once the file lives in its canonical domain directory.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stored_path: Option<PathBuf>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Resource {
	pub fn is_persisted(&self) -> bool {
		self.stored_path.is_some()
	}

	/// The canonical path if persisted, else where the file was observed.
	pub fn location(&self) -> &Path {
		self.stored_path.as_deref().unwrap_or(&self.path)
	}

	pub fn is_directory(&self) -> bool {
		self.file_type == FileType::Directory
	}
}

/// Splits a file name into stem and extension (with its dot).
pub fn split_file_name(file_name: &str) -> (&str, &str) {
	match file_name.rfind('.') {
		Some(0) | None => (file_name, ""),
		Some(idx) => file_name.split_at(idx),
	}
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use super::*;

	#[test]
	fn domain_names_match_directories() {
		for domain in ResourceDomain::all() {
			assert_eq!(domain.to_string(), domain.dir_name());
			assert_eq!(ResourceDomain::from_str(domain.dir_name()).unwrap(), domain);
		}
		assert_eq!(
			ResourceDomain::from_str("ResourcePacks").unwrap(),
			ResourceDomain::ResourcePacks
		);
	}

	#[test]
	fn domain_priority_follows_declaration_order() {
		assert!(ResourceDomain::Mods < ResourceDomain::ResourcePacks);
		assert!(ResourceDomain::ResourcePacks < ResourceDomain::ShaderPacks);
		assert!(ResourceDomain::ShaderPacks < ResourceDomain::Saves);
		assert!(ResourceDomain::Saves < ResourceDomain::Modpacks);
	}

	#[test]
	fn empty_content_hash_is_not_identifying() {
		assert!(!ContentHash::parse(EMPTY_SHA1).unwrap().is_identifying());
		assert!(!ContentHash::none().is_identifying());
		let hash = ContentHash::parse("sha1:A9993E364706816ABA3E25717850C26C9CD0D89D").unwrap();
		assert!(hash.is_identifying());
		assert_eq!(hash.fragment(), "a9993e");
		assert_eq!(hash.uri(), "sha1:a9993e364706816aba3e25717850c26c9cd0d89d");
		assert!(ContentHash::parse("not-a-hash").is_none());
	}

	#[test]
	fn source_identity_uris() {
		let source = SourceInfo {
			curseforge: Some(CurseforgeSource {
				project_id: 238222,
				file_id: 4712345,
			}),
			modrinth: Some(ModrinthSource {
				project_id: "AANobbMI".into(),
				version_id: "mc1.20".into(),
			}),
			github: None,
		};
		assert_eq!(
			source.identity_uris(),
			vec![
				"curseforge://id/238222/4712345".to_string(),
				"modrinth://version/mc1.20".to_string(),
			]
		);
	}

	#[test]
	fn split_names() {
		assert_eq!(split_file_name("sodium.jar"), ("sodium", ".jar"));
		assert_eq!(split_file_name("pack.v2.zip"), ("pack.v2", ".zip"));
		assert_eq!(split_file_name("README"), ("README", ""));
		assert_eq!(split_file_name(".hidden"), (".hidden", ""));
	}
}

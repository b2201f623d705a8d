//! Format parsers and the registry that dispatches to them.
//!
//! A parser recognizes one format inside one domain. The registry picks the
//! candidate parsers for a file, runs all of them and folds their results:
//! the first parser that succeeds decides the domain, type, display name and
//! icon, every success contributes its metadata entry. A failing parser
//! never prevents the others from running.

use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
	error::FileIOError,
	resource::{FileType, ResourceDomain, ResourceType},
};

mod archive;
mod modpacks;
mod mods;
mod packs;

pub use archive::ArchiveHandle;
pub use modpacks::{
	CurseforgeModpackMetadata, CurseforgeModpackParser, McbbsModpackMetadata, McbbsModpackParser,
	ModrinthModpackMetadata, ModrinthModpackParser,
};
pub use mods::{
	FabricMetadata, FabricParser, ForgeMetadata, ForgeModInfo, ForgeParser, LiteLoaderMetadata,
	LiteLoaderParser, QuiltParser,
};
pub use packs::{
	PackMetadata, ResourcePackParser, SaveMetadata, SaveParser, ShaderPackMetadata,
	ShaderPackParser,
};

#[cfg(test)]
pub(crate) use archive::test_utils;

#[derive(Error, Debug)]
pub enum ParseError {
	#[error("unreadable archive: {0}")]
	Archive(#[from] zip::result::ZipError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("missing entry: <entry='{0}'>")]
	MissingEntry(String),
	#[error("invalid json: <entry='{entry}'>: {source}")]
	Json {
		entry: String,
		source: serde_json::Error,
	},
	#[error("invalid toml: <entry='{entry}'>: {source}")]
	Toml {
		entry: String,
		source: toml::de::Error,
	},
	#[error("entry too large: <entry='{entry}', limit={limit}>")]
	EntryTooLarge { entry: String, limit: u64 },
	#[error("not a {0}")]
	NotRecognized(&'static str),
}

/// Payload produced by one parser, tagged with the format it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "kebab-case")]
pub enum ParsedMetadata {
	Forge(ForgeMetadata),
	Fabric(FabricMetadata),
	Quilt(FabricMetadata),
	#[serde(rename = "liteloader")]
	LiteLoader(LiteLoaderMetadata),
	#[serde(rename = "resourcepack")]
	ResourcePack(PackMetadata),
	#[serde(rename = "shaderpack")]
	ShaderPack(ShaderPackMetadata),
	Save(SaveMetadata),
	ModrinthModpack(ModrinthModpackMetadata),
	CurseforgeModpack(CurseforgeModpackMetadata),
	McbbsModpack(McbbsModpackMetadata),
}

impl ParsedMetadata {
	/// Human readable names carried by the payload, used for search.
	pub fn display_names(&self) -> Vec<&str> {
		match self {
			Self::Forge(meta) => meta
				.mods
				.iter()
				.flat_map(|m| [Some(m.mod_id.as_str()), m.name.as_deref()])
				.flatten()
				.collect(),
			Self::Fabric(meta) | Self::Quilt(meta) => {
				[Some(meta.id.as_str()), meta.name.as_deref()]
					.into_iter()
					.flatten()
					.collect()
			}
			Self::LiteLoader(meta) => vec![meta.name.as_str()],
			Self::ResourcePack(meta) => vec![meta.description.as_str()],
			Self::ShaderPack(_) => vec![],
			Self::Save(meta) => vec![meta.level_name.as_str()],
			Self::ModrinthModpack(meta) => vec![meta.name.as_str()],
			Self::CurseforgeModpack(meta) => vec![meta.name.as_str()],
			Self::McbbsModpack(meta) => vec![meta.name.as_str()],
		}
	}
}

/// A metadata extractor for one format.
///
/// Implementations are pure functions over an opened [`ArchiveHandle`]; they
/// run on a blocking thread.
pub trait ResourceParser: Send + Sync {
	/// Key of the payload in the resource metadata bag.
	fn name(&self) -> &'static str;

	fn domain(&self) -> ResourceDomain;

	fn resource_type(&self) -> ResourceType;

	/// Extension (with dot) this format is usually shipped with.
	fn ext(&self) -> &'static str;

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		path: &Path,
	) -> Result<ParsedMetadata, ParseError>;

	fn parse_icon(
		&self,
		_metadata: &ParsedMetadata,
		_handle: &mut ArchiveHandle,
	) -> Result<Option<Vec<u8>>, ParseError> {
		Ok(None)
	}

	fn suggested_name(&self, metadata: &ParsedMetadata) -> Option<String>;

	fn identity_uris(&self, _metadata: &ParsedMetadata) -> Vec<String> {
		Vec::new()
	}
}

/// Folded result of running the candidate parsers over one file.
#[derive(Debug, Default)]
pub struct ParseOutcome {
	/// Whether the file could be opened as an archive or directory at all.
	pub readable: bool,
	/// Domain of the first parser that succeeded.
	pub domain: Option<ResourceDomain>,
	pub resource_type: Option<ResourceType>,
	pub metadata: BTreeMap<String, ParsedMetadata>,
	pub suggested_name: Option<String>,
	pub icon: Option<Vec<u8>>,
	pub uris: Vec<String>,
}

pub struct ParserRegistry {
	parsers: Vec<Box<dyn ResourceParser>>,
}

impl Default for ParserRegistry {
	fn default() -> Self {
		Self::with_default_parsers()
	}
}

impl ParserRegistry {
	/// Parsers are tried in the given order, which should follow domain
	/// priority.
	pub fn new(parsers: Vec<Box<dyn ResourceParser>>) -> Self {
		Self { parsers }
	}

	pub fn with_default_parsers() -> Self {
		Self::new(vec![
			Box::new(ForgeParser),
			Box::new(FabricParser),
			Box::new(QuiltParser),
			Box::new(LiteLoaderParser),
			Box::new(ResourcePackParser),
			Box::new(ShaderPackParser),
			Box::new(SaveParser),
			Box::new(ModrinthModpackParser),
			Box::new(CurseforgeModpackParser),
			Box::new(McbbsModpackParser),
		])
	}

	pub fn parsers(&self) -> impl Iterator<Item = &dyn ResourceParser> {
		self.parsers.iter().map(|parser| &**parser)
	}

	/// Parsers that should look at a file.
	///
	/// With a domain, only that domain's parsers. Without one, parsers are
	/// matched by extension (`.zip` also gets the forge heuristic, jars are
	/// routinely shipped zipped); if nothing matches and the file is an
	/// archive, every parser is tried.
	pub fn candidates(
		&self,
		domain: Option<ResourceDomain>,
		ext: &str,
		file_type: FileType,
	) -> Vec<&dyn ResourceParser> {
		if let Some(domain) = domain.filter(ResourceDomain::is_classified) {
			return self.parsers().filter(|p| p.domain() == domain).collect();
		}

		let is_zip = ext.eq_ignore_ascii_case(".zip");
		let by_ext = self
			.parsers()
			.filter(|p| {
				p.ext().eq_ignore_ascii_case(ext)
					|| (is_zip && p.resource_type() == ResourceType::Forge)
			})
			.collect::<Vec<_>>();

		if by_ext.is_empty() && file_type.is_archive() {
			return self.parsers().collect();
		}

		by_ext
	}

	/// Runs the candidate parsers over `path`.
	///
	/// When a domain hint is given but none of that domain's parsers
	/// recognize the file, the remaining parsers get a chance so the caller
	/// can tell "wrong domain" from "unknown format".
	pub fn parse(
		&self,
		path: &Path,
		ext: &str,
		file_type: FileType,
		domain: Option<ResourceDomain>,
	) -> ParseOutcome {
		let mut handle = match ArchiveHandle::open(path) {
			Ok(handle) => handle,
			Err(e) => {
				debug!(path = %path.display(), ?e, "Resource is not an archive;");
				return ParseOutcome::default();
			}
		};

		let candidates = self.candidates(domain, ext, file_type);
		let mut outcome = ParseOutcome {
			readable: true,
			..Default::default()
		};
		self.run(&candidates, &mut handle, path, &mut outcome);

		if outcome.domain.is_none() && domain.is_some() {
			let fallback = self
				.candidates(None, ext, file_type)
				.into_iter()
				.filter(|p| !candidates.iter().any(|c| c.name() == p.name()))
				.collect::<Vec<_>>();
			self.run(&fallback, &mut handle, path, &mut outcome);
		}

		outcome
	}

	fn run(
		&self,
		candidates: &[&dyn ResourceParser],
		handle: &mut ArchiveHandle,
		path: &Path,
		outcome: &mut ParseOutcome,
	) {
		for parser in candidates {
			let metadata = match parser.parse_metadata(handle, path) {
				Ok(metadata) => metadata,
				Err(e) => {
					trace!(parser = parser.name(), path = %path.display(), %e, "Parser did not match");
					continue;
				}
			};

			debug!(parser = parser.name(), path = %path.display(), "Parser matched");

			if outcome.domain.is_none() {
				outcome.domain = Some(parser.domain());
				outcome.resource_type = Some(parser.resource_type());
				outcome.suggested_name = parser
					.suggested_name(&metadata)
					.filter(|name| !name.trim().is_empty());
				outcome.icon = match parser.parse_icon(&metadata, handle) {
					Ok(icon) => icon,
					Err(e) => {
						debug!(parser = parser.name(), %e, "Failed to read resource icon;");
						None
					}
				};
			}

			for uri in parser.identity_uris(&metadata) {
				if !outcome.uris.contains(&uri) {
					outcome.uris.push(uri);
				}
			}

			outcome
				.metadata
				.entry(parser.name().to_string())
				.or_insert(metadata);
		}
	}
}

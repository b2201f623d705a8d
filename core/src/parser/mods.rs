use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::resource::{ResourceDomain, ResourceType};

use super::{ArchiveHandle, ParseError, ParsedMetadata, ResourceParser};

const MODS_TOML: &str = "META-INF/mods.toml";
const NEOFORGE_MODS_TOML: &str = "META-INF/neoforge.mods.toml";
const MCMOD_INFO: &str = "mcmod.info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgeModInfo {
	pub mod_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mc_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub logo_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeMetadata {
	pub mods: Vec<ForgeModInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricMetadata {
	pub id: String,
	pub version: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiteLoaderMetadata {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub mc_version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub revision: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub author: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
}

// On-disk shapes

#[derive(Deserialize)]
struct ModsToml {
	#[serde(default)]
	mods: Vec<ModsTomlEntry>,
	#[serde(default, rename = "logoFile")]
	logo_file: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModsTomlEntry {
	mod_id: String,
	#[serde(default)]
	version: Option<String>,
	#[serde(default)]
	display_name: Option<String>,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	logo_file: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum McmodInfo {
	List(Vec<McmodInfoEntry>),
	Wrapped {
		#[serde(rename = "modList", alias = "modlist")]
		mod_list: Vec<McmodInfoEntry>,
	},
}

#[derive(Deserialize)]
struct McmodInfoEntry {
	modid: String,
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	version: Option<String>,
	#[serde(default)]
	mcversion: Option<String>,
	#[serde(default)]
	description: Option<String>,
	#[serde(default, rename = "logoFile")]
	logo_file: Option<String>,
}

#[derive(Deserialize)]
struct FabricModJson {
	id: String,
	version: String,
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	icon: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct QuiltModJson {
	quilt_loader: QuiltLoader,
}

#[derive(Deserialize)]
struct QuiltLoader {
	id: String,
	version: String,
	#[serde(default)]
	metadata: QuiltDisplay,
}

#[derive(Deserialize, Default)]
struct QuiltDisplay {
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	icon: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct LiteModJson {
	name: String,
	#[serde(default)]
	version: Option<String>,
	#[serde(default)]
	mcversion: Option<String>,
	#[serde(default)]
	revision: Option<serde_json::Value>,
	#[serde(default)]
	author: Option<String>,
	#[serde(default)]
	description: Option<String>,
}

/// Fabric and Quilt icons are either a path or a map of size to path; the
/// largest size wins.
fn resolve_icon(icon: Option<serde_json::Value>) -> Option<String> {
	match icon? {
		serde_json::Value::String(path) => Some(path),
		serde_json::Value::Object(sizes) => sizes
			.into_iter()
			.filter_map(|(size, path)| Some((size.parse::<u32>().ok()?, path.as_str()?.to_string())))
			.max_by_key(|(size, _)| *size)
			.map(|(_, path)| path),
		_ => None,
	}
}

fn read_icon(handle: &mut ArchiveHandle, path: Option<&str>) -> Result<Option<Vec<u8>>, ParseError> {
	match path {
		Some(path) if !path.is_empty() => handle.read_entry(path.trim_start_matches('/')),
		_ => Ok(None),
	}
}

fn join_name(parts: &[Option<&str>]) -> Option<String> {
	let parts = parts
		.iter()
		.flatten()
		.filter(|part| !part.is_empty())
		.copied()
		.collect::<Vec<_>>();
	(!parts.is_empty()).then(|| parts.join("-"))
}

pub struct ForgeParser;

impl ForgeParser {
	fn read_mods_toml(handle: &mut ArchiveHandle, entry: &str) -> Result<ForgeMetadata, ParseError> {
		let ModsToml { mods, logo_file } = handle.read_toml(entry)?;
		if mods.is_empty() {
			return Err(ParseError::NotRecognized("forge mod"));
		}

		Ok(ForgeMetadata {
			mods: mods
				.into_iter()
				.map(|entry| ForgeModInfo {
					mod_id: entry.mod_id,
					name: entry.display_name,
					version: entry.version,
					mc_version: None,
					description: entry.description.map(|d| d.trim().to_string()),
					logo_file: entry.logo_file.or_else(|| logo_file.clone()),
				})
				.collect(),
		})
	}

	fn read_mcmod_info(handle: &mut ArchiveHandle) -> Result<ForgeMetadata, ParseError> {
		let entries = match handle.read_json::<McmodInfo>(MCMOD_INFO)? {
			McmodInfo::List(entries) | McmodInfo::Wrapped { mod_list: entries } => entries,
		};
		if entries.is_empty() {
			return Err(ParseError::NotRecognized("forge mod"));
		}

		Ok(ForgeMetadata {
			mods: entries
				.into_iter()
				.map(|entry| ForgeModInfo {
					mod_id: entry.modid,
					name: entry.name,
					version: entry.version,
					mc_version: entry.mcversion,
					description: entry.description,
					logo_file: entry.logo_file,
				})
				.collect(),
		})
	}
}

impl ResourceParser for ForgeParser {
	fn name(&self) -> &'static str {
		"forge"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::Mods
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::Forge
	}

	fn ext(&self) -> &'static str {
		".jar"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		_path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let metadata = if handle.has_entry(MODS_TOML) {
			Self::read_mods_toml(handle, MODS_TOML)?
		} else if handle.has_entry(NEOFORGE_MODS_TOML) {
			Self::read_mods_toml(handle, NEOFORGE_MODS_TOML)?
		} else if handle.has_entry(MCMOD_INFO) {
			Self::read_mcmod_info(handle)?
		} else {
			return Err(ParseError::NotRecognized("forge mod"));
		};

		Ok(ParsedMetadata::Forge(metadata))
	}

	fn parse_icon(
		&self,
		metadata: &ParsedMetadata,
		handle: &mut ArchiveHandle,
	) -> Result<Option<Vec<u8>>, ParseError> {
		let ParsedMetadata::Forge(forge) = metadata else {
			return Ok(None);
		};
		read_icon(
			handle,
			forge.mods.first().and_then(|m| m.logo_file.as_deref()),
		)
	}

	fn suggested_name(&self, metadata: &ParsedMetadata) -> Option<String> {
		let ParsedMetadata::Forge(forge) = metadata else {
			return None;
		};
		let first = forge.mods.first()?;
		join_name(&[
			Some(first.name.as_deref().unwrap_or(&first.mod_id)),
			first.mc_version.as_deref(),
			first.version.as_deref(),
		])
	}

	fn identity_uris(&self, metadata: &ParsedMetadata) -> Vec<String> {
		let ParsedMetadata::Forge(forge) = metadata else {
			return vec![];
		};
		forge
			.mods
			.first()
			.and_then(|m| Some(format!("forge://{}/{}", m.mod_id, m.version.as_deref()?)))
			.into_iter()
			.collect()
	}
}

pub struct FabricParser;

impl ResourceParser for FabricParser {
	fn name(&self) -> &'static str {
		"fabric"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::Mods
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::Fabric
	}

	fn ext(&self) -> &'static str {
		".jar"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		_path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let FabricModJson {
			id,
			version,
			name,
			description,
			icon,
		} = handle.read_json("fabric.mod.json")?;

		Ok(ParsedMetadata::Fabric(FabricMetadata {
			id,
			version,
			name,
			description,
			icon: resolve_icon(icon),
		}))
	}

	fn parse_icon(
		&self,
		metadata: &ParsedMetadata,
		handle: &mut ArchiveHandle,
	) -> Result<Option<Vec<u8>>, ParseError> {
		match metadata {
			ParsedMetadata::Fabric(fabric) => read_icon(handle, fabric.icon.as_deref()),
			_ => Ok(None),
		}
	}

	fn suggested_name(&self, metadata: &ParsedMetadata) -> Option<String> {
		match metadata {
			ParsedMetadata::Fabric(fabric) => join_name(&[
				Some(fabric.name.as_deref().unwrap_or(&fabric.id)),
				Some(fabric.version.as_str()),
			]),
			_ => None,
		}
	}

	fn identity_uris(&self, metadata: &ParsedMetadata) -> Vec<String> {
		match metadata {
			ParsedMetadata::Fabric(fabric) => {
				vec![format!("fabric://{}/{}", fabric.id, fabric.version)]
			}
			_ => vec![],
		}
	}
}

pub struct QuiltParser;

impl ResourceParser for QuiltParser {
	fn name(&self) -> &'static str {
		"quilt"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::Mods
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::Quilt
	}

	fn ext(&self) -> &'static str {
		".jar"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		_path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let QuiltModJson {
			quilt_loader: QuiltLoader {
				id,
				version,
				metadata,
			},
		} = handle.read_json("quilt.mod.json")?;

		Ok(ParsedMetadata::Quilt(FabricMetadata {
			id,
			version,
			name: metadata.name,
			description: metadata.description,
			icon: resolve_icon(metadata.icon),
		}))
	}

	fn parse_icon(
		&self,
		metadata: &ParsedMetadata,
		handle: &mut ArchiveHandle,
	) -> Result<Option<Vec<u8>>, ParseError> {
		match metadata {
			ParsedMetadata::Quilt(quilt) => read_icon(handle, quilt.icon.as_deref()),
			_ => Ok(None),
		}
	}

	fn suggested_name(&self, metadata: &ParsedMetadata) -> Option<String> {
		match metadata {
			ParsedMetadata::Quilt(quilt) => join_name(&[
				Some(quilt.name.as_deref().unwrap_or(&quilt.id)),
				Some(quilt.version.as_str()),
			]),
			_ => None,
		}
	}

	fn identity_uris(&self, metadata: &ParsedMetadata) -> Vec<String> {
		match metadata {
			ParsedMetadata::Quilt(quilt) => {
				vec![format!("quilt://{}/{}", quilt.id, quilt.version)]
			}
			_ => vec![],
		}
	}
}

pub struct LiteLoaderParser;

impl ResourceParser for LiteLoaderParser {
	fn name(&self) -> &'static str {
		"liteloader"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::Mods
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::LiteLoader
	}

	fn ext(&self) -> &'static str {
		".litemod"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		_path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let raw: LiteModJson = handle.read_json("litemod.json")?;

		Ok(ParsedMetadata::LiteLoader(LiteLoaderMetadata {
			name: raw.name,
			version: raw.version,
			mc_version: raw.mcversion,
			revision: raw.revision.map(|revision| match revision {
				serde_json::Value::String(revision) => revision,
				other => other.to_string(),
			}),
			author: raw.author,
			description: raw.description,
		}))
	}

	fn suggested_name(&self, metadata: &ParsedMetadata) -> Option<String> {
		match metadata {
			ParsedMetadata::LiteLoader(lite) => join_name(&[
				Some(lite.name.as_str()),
				lite.mc_version.as_deref(),
				lite.version.as_deref(),
				lite.revision.as_deref(),
			]),
			_ => None,
		}
	}

	fn identity_uris(&self, metadata: &ParsedMetadata) -> Vec<String> {
		match metadata {
			ParsedMetadata::LiteLoader(LiteLoaderMetadata {
				name,
				version: Some(version),
				..
			}) => vec![format!("liteloader://{name}/{version}")],
			_ => vec![],
		}
	}
}

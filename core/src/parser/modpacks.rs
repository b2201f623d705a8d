use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::resource::{ResourceDomain, ResourceType};

use super::{ArchiveHandle, ParseError, ParsedMetadata, ResourceParser};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModrinthModpackMetadata {
	pub name: String,
	pub version_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub summary: Option<String>,
	/// Game and loader versions, e.g. `minecraft` -> `1.20.1`.
	#[serde(default)]
	pub dependencies: BTreeMap<String, String>,
	pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurseforgeModpackMetadata {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub author: Option<String>,
	pub minecraft_version: String,
	#[serde(default)]
	pub mod_loaders: Vec<String>,
	pub files: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McbbsModpackMetadata {
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub version: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub author: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	/// Addon id (game, loaders) to version.
	#[serde(default)]
	pub addons: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModrinthIndex {
	game: String,
	name: String,
	version_id: String,
	#[serde(default)]
	summary: Option<String>,
	#[serde(default)]
	files: Vec<serde_json::Value>,
	#[serde(default)]
	dependencies: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurseforgeManifest {
	manifest_type: String,
	#[serde(default)]
	name: String,
	#[serde(default)]
	version: Option<String>,
	#[serde(default)]
	author: Option<String>,
	minecraft: CurseforgeMinecraft,
	#[serde(default)]
	files: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurseforgeMinecraft {
	version: String,
	#[serde(default)]
	mod_loaders: Vec<CurseforgeModLoader>,
}

#[derive(Deserialize)]
struct CurseforgeModLoader {
	id: String,
}

#[derive(Deserialize)]
struct McbbsPackMeta {
	name: String,
	#[serde(default)]
	version: Option<String>,
	#[serde(default)]
	author: Option<String>,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	addons: Vec<McbbsAddon>,
}

#[derive(Deserialize)]
struct McbbsAddon {
	id: String,
	version: String,
}

fn name_with_version(name: &str, version: Option<&str>) -> Option<String> {
	if name.trim().is_empty() {
		return None;
	}
	Some(match version.filter(|v| !v.is_empty()) {
		Some(version) => format!("{name}-{version}"),
		None => name.to_string(),
	})
}

pub struct ModrinthModpackParser;

impl ResourceParser for ModrinthModpackParser {
	fn name(&self) -> &'static str {
		"modrinth-modpack"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::Modpacks
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::ModrinthModpack
	}

	fn ext(&self) -> &'static str {
		".mrpack"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		_path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let index: ModrinthIndex = handle.read_json("modrinth.index.json")?;
		if index.game != "minecraft" {
			return Err(ParseError::NotRecognized("minecraft modrinth modpack"));
		}

		Ok(ParsedMetadata::ModrinthModpack(ModrinthModpackMetadata {
			name: index.name,
			version_id: index.version_id,
			summary: index.summary,
			dependencies: index.dependencies,
			files: index.files.len(),
		}))
	}

	fn suggested_name(&self, metadata: &ParsedMetadata) -> Option<String> {
		match metadata {
			ParsedMetadata::ModrinthModpack(pack) => {
				name_with_version(&pack.name, Some(pack.version_id.as_str()))
			}
			_ => None,
		}
	}
}

pub struct CurseforgeModpackParser;

impl ResourceParser for CurseforgeModpackParser {
	fn name(&self) -> &'static str {
		"curseforge-modpack"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::Modpacks
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::CurseforgeModpack
	}

	fn ext(&self) -> &'static str {
		".zip"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		_path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let manifest: CurseforgeManifest = handle.read_json("manifest.json")?;
		if manifest.manifest_type.is_empty() {
			return Err(ParseError::NotRecognized("curseforge modpack"));
		}

		Ok(ParsedMetadata::CurseforgeModpack(CurseforgeModpackMetadata {
			name: manifest.name,
			version: manifest.version,
			author: manifest.author,
			minecraft_version: manifest.minecraft.version,
			mod_loaders: manifest
				.minecraft
				.mod_loaders
				.into_iter()
				.map(|loader| loader.id)
				.collect(),
			files: manifest.files.len(),
		}))
	}

	fn suggested_name(&self, metadata: &ParsedMetadata) -> Option<String> {
		match metadata {
			ParsedMetadata::CurseforgeModpack(pack) => {
				name_with_version(&pack.name, pack.version.as_deref())
			}
			_ => None,
		}
	}
}

pub struct McbbsModpackParser;

impl ResourceParser for McbbsModpackParser {
	fn name(&self) -> &'static str {
		"mcbbs-modpack"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::Modpacks
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::McbbsModpack
	}

	fn ext(&self) -> &'static str {
		".zip"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		_path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let meta: McbbsPackMeta = handle.read_json("mcbbs.packmeta")?;

		Ok(ParsedMetadata::McbbsModpack(McbbsModpackMetadata {
			name: meta.name,
			version: meta.version,
			author: meta.author,
			description: meta.description,
			addons: meta
				.addons
				.into_iter()
				.map(|addon| (addon.id, addon.version))
				.collect(),
		}))
	}

	fn suggested_name(&self, metadata: &ParsedMetadata) -> Option<String> {
		match metadata {
			ParsedMetadata::McbbsModpack(pack) => {
				name_with_version(&pack.name, pack.version.as_deref())
			}
			_ => None,
		}
	}
}

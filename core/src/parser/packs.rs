use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::resource::{split_file_name, ResourceDomain, ResourceType};

use super::{ArchiveHandle, ParseError, ParsedMetadata, ResourceParser};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackMetadata {
	pub pack_format: u32,
	pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderPackMetadata {
	/// Number of shader program sources under `shaders/`.
	pub programs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveMetadata {
	/// Prefix of the world inside the archive, empty or ending with `/`.
	pub root: String,
	pub level_name: String,
}

#[derive(Deserialize)]
struct PackMcmeta {
	pack: PackSection,
}

#[derive(Deserialize)]
struct PackSection {
	pack_format: u32,
	#[serde(default)]
	description: serde_json::Value,
}

/// Flattens a chat component (string, object or array) to plain text.
fn component_text(value: &serde_json::Value) -> String {
	match value {
		serde_json::Value::String(text) => text.clone(),
		serde_json::Value::Array(parts) => parts.iter().map(component_text).collect(),
		serde_json::Value::Object(object) => {
			let mut text = object
				.get("text")
				.and_then(serde_json::Value::as_str)
				.unwrap_or_default()
				.to_string();
			if let Some(extra) = object.get("extra") {
				text.push_str(&component_text(extra));
			}
			text
		}
		serde_json::Value::Null => String::new(),
		other => other.to_string(),
	}
}

pub struct ResourcePackParser;

impl ResourceParser for ResourcePackParser {
	fn name(&self) -> &'static str {
		"resourcepack"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::ResourcePacks
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::ResourcePack
	}

	fn ext(&self) -> &'static str {
		".zip"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		_path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let PackMcmeta {
			pack: PackSection {
				pack_format,
				description,
			},
		} = handle.read_json("pack.mcmeta")?;

		Ok(ParsedMetadata::ResourcePack(PackMetadata {
			pack_format,
			description: component_text(&description),
		}))
	}

	fn parse_icon(
		&self,
		_metadata: &ParsedMetadata,
		handle: &mut ArchiveHandle,
	) -> Result<Option<Vec<u8>>, ParseError> {
		handle.read_entry("pack.png")
	}

	fn suggested_name(&self, _metadata: &ParsedMetadata) -> Option<String> {
		None
	}
}

pub struct ShaderPackParser;

impl ResourceParser for ShaderPackParser {
	fn name(&self) -> &'static str {
		"shaderpack"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::ShaderPacks
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::ShaderPack
	}

	fn ext(&self) -> &'static str {
		".zip"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		_path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let shaders = handle
			.entry_names()
			.into_iter()
			.filter(|name| name.starts_with("shaders/"))
			.collect::<Vec<_>>();
		if shaders.is_empty() {
			return Err(ParseError::NotRecognized("shader pack"));
		}

		let programs = shaders
			.iter()
			.filter(|name| {
				[".fsh", ".vsh", ".gsh", ".csh"]
					.iter()
					.any(|ext| name.ends_with(ext))
			})
			.count();

		Ok(ParsedMetadata::ShaderPack(ShaderPackMetadata { programs }))
	}

	fn suggested_name(&self, _metadata: &ParsedMetadata) -> Option<String> {
		None
	}
}

pub struct SaveParser;

impl SaveParser {
	/// `level.dat` at the root, or inside exactly one directory.
	fn find_level_root(handle: &mut ArchiveHandle) -> Option<String> {
		if handle.has_entry("level.dat") {
			return Some(String::new());
		}

		handle
			.entry_names()
			.into_iter()
			.filter_map(|name| {
				let root = name.strip_suffix("level.dat")?;
				(root.ends_with('/') && root.matches('/').count() == 1).then(|| root.to_string())
			})
			.min()
	}
}

impl ResourceParser for SaveParser {
	fn name(&self) -> &'static str {
		"save"
	}

	fn domain(&self) -> ResourceDomain {
		ResourceDomain::Saves
	}

	fn resource_type(&self) -> ResourceType {
		ResourceType::Save
	}

	fn ext(&self) -> &'static str {
		".zip"
	}

	fn parse_metadata(
		&self,
		handle: &mut ArchiveHandle,
		path: &Path,
	) -> Result<ParsedMetadata, ParseError> {
		let root = Self::find_level_root(handle).ok_or(ParseError::NotRecognized("save"))?;

		let level_name = if root.is_empty() {
			let file_name = path
				.file_name()
				.map(|name| name.to_string_lossy().into_owned())
				.unwrap_or_default();
			if matches!(handle, ArchiveHandle::Directory(_)) {
				file_name
			} else {
				split_file_name(&file_name).0.to_string()
			}
		} else {
			root.trim_end_matches('/').to_string()
		};

		Ok(ParsedMetadata::Save(SaveMetadata { root, level_name }))
	}

	fn parse_icon(
		&self,
		metadata: &ParsedMetadata,
		handle: &mut ArchiveHandle,
	) -> Result<Option<Vec<u8>>, ParseError> {
		match metadata {
			ParsedMetadata::Save(save) => handle.read_entry(&format!("{}icon.png", save.root)),
			_ => Ok(None),
		}
	}

	fn suggested_name(&self, metadata: &ParsedMetadata) -> Option<String> {
		match metadata {
			ParsedMetadata::Save(save) => Some(save.level_name.clone()),
			_ => None,
		}
	}
}

//! Turns a path into a [`Resource`].
//!
//! The index is consulted before any expensive work: a known inode, then a
//! known hash hint, then the freshly computed digest. Only a genuine miss
//! runs the parsers.

use std::{
	path::{Path, PathBuf},
	sync::Arc,
};

use chrono::Utc;
use tracing::{debug, instrument, trace};

use crate::{
	error::Result,
	index::{IndexKey, ResourceIndex},
	parser::{ParseOutcome, ParserRegistry},
	resource::{
		split_file_name, ContentHash, FileType, Resource, ResourceDomain, ResourceMetadata,
		ResourceType,
	},
};

mod context;
mod hash;
mod sniff;

pub use context::{get_inode, stat_file, FileStat, ResolveContext};
pub use hash::{file_checksum, FileDigest};
pub use sniff::sniff;

/// Outcome of classifying a path.
#[derive(Debug, Clone)]
pub enum Classified {
	/// Content already indexed; the record is returned as stored.
	Known(Resource),
	/// Never seen before. The resource is transient until persisted.
	New {
		resource: Resource,
		icon: Option<Vec<u8>>,
	},
}

impl Classified {
	pub fn resource(&self) -> &Resource {
		match self {
			Self::Known(resource) | Self::New { resource, .. } => resource,
		}
	}

	pub fn into_resource(self) -> Resource {
		match self {
			Self::Known(resource) | Self::New { resource, .. } => resource,
		}
	}
}

pub struct Classifier {
	registry: Arc<ParserRegistry>,
	index: Arc<ResourceIndex>,
}

impl Classifier {
	pub fn new(registry: Arc<ParserRegistry>, index: Arc<ResourceIndex>) -> Self {
		Self { registry, index }
	}

	pub fn registry(&self) -> &ParserRegistry {
		&self.registry
	}

	#[instrument(skip_all, fields(path = %path.display(), ?domain), err)]
	pub async fn classify(
		&self,
		path: &Path,
		domain: Option<ResourceDomain>,
		context: &ResolveContext,
	) -> Result<Classified> {
		let stat = context.stat(path).await?;
		let file_name = path
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_default();
		let ext = split_file_name(&file_name).1.to_ascii_lowercase();

		if stat.is_dir {
			let outcome = self.parse(path, "", FileType::Directory, domain).await?;
			let resource = build_resource(
				path,
				&file_name,
				"",
				ContentHash::none(),
				FileType::Directory,
				stat.size,
				stat.ino,
				domain,
				&outcome,
			);
			return Ok(Classified::New {
				resource,
				icon: outcome.icon,
			});
		}

		if stat.ino != 0 {
			if let Some(known) = self
				.index
				.get(&IndexKey::Ino(stat.ino))
				.filter(|known| known.size == stat.size)
			{
				trace!(hash = %known.hash, "Inode already indexed");
				return Ok(Classified::Known(known));
			}
		}

		if let Some(hint) = context.hash_hint(path) {
			if let Some(known) = self.index.get(&IndexKey::Hash(hint)) {
				trace!(hash = %known.hash, "Hash hint already indexed");
				return Ok(Classified::Known(known));
			}
		}

		let digest = context.digest(path, &ext).await?;
		if let Some(known) = self.index.get(&IndexKey::Hash(digest.hash.clone())) {
			trace!(hash = %known.hash, "Content already indexed");
			return Ok(Classified::Known(known));
		}

		let outcome = self.parse(path, &ext, digest.file_type, domain).await?;
		debug!(
			hash = %digest.hash,
			domain = ?outcome.domain,
			parsers = outcome.metadata.len(),
			"Classified new resource",
		);

		let resource = build_resource(
			path,
			&file_name,
			&ext,
			digest.hash,
			digest.file_type,
			digest.size,
			stat.ino,
			domain,
			&outcome,
		);

		Ok(Classified::New {
			resource,
			icon: outcome.icon,
		})
	}

	async fn parse(
		&self,
		path: &Path,
		ext: &str,
		file_type: FileType,
		domain: Option<ResourceDomain>,
	) -> Result<ParseOutcome> {
		let registry = Arc::clone(&self.registry);
		let path = path.to_path_buf();
		let ext = ext.to_string();
		Ok(
			tokio::task::spawn_blocking(move || registry.parse(&path, &ext, file_type, domain))
				.await?,
		)
	}
}

/// Domain of a freshly parsed file.
///
/// A recognized format decides. An archive no parser recognized keeps the
/// requested domain (library jars in `mods/` have no metadata); anything
/// unreadable is unclassified.
fn resolve_domain(outcome: &ParseOutcome, requested: Option<ResourceDomain>) -> ResourceDomain {
	match (outcome.domain, requested) {
		(Some(found), _) => found,
		(None, Some(requested)) if outcome.readable => requested,
		_ => ResourceDomain::Unclassified,
	}
}

#[allow(clippy::too_many_arguments)]
fn build_resource(
	path: &Path,
	file_name: &str,
	ext: &str,
	hash: ContentHash,
	file_type: FileType,
	size: u64,
	ino: u64,
	requested: Option<ResourceDomain>,
	outcome: &ParseOutcome,
) -> Resource {
	let now = Utc::now();
	let name = outcome
		.suggested_name
		.clone()
		.unwrap_or_else(|| split_file_name(file_name).0.to_string());

	let mut uris = outcome.uris.iter().cloned().collect::<std::collections::BTreeSet<_>>();
	if hash.is_identifying() {
		uris.insert(hash.uri());
	}

	Resource {
		hash,
		size,
		ino,
		name,
		file_name: file_name.to_string(),
		ext: ext.to_string(),
		path: PathBuf::from(path),
		domain: resolve_domain(outcome, requested),
		resource_type: outcome.resource_type.unwrap_or(ResourceType::Unknown),
		file_type,
		metadata: ResourceMetadata {
			parsed: outcome.metadata.clone(),
			..Default::default()
		},
		uris,
		tags: Default::default(),
		icons: Vec::new(),
		stored_path: None,
		created_at: now,
		updated_at: now,
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use crate::parser::test_utils::write_zip;

	use super::*;

	fn classifier() -> (Classifier, Arc<ResourceIndex>) {
		let index = Arc::new(ResourceIndex::new());
		(
			Classifier::new(Arc::new(ParserRegistry::default()), Arc::clone(&index)),
			index,
		)
	}

	#[tokio::test]
	async fn classifies_fabric_mod() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("sodium-0.5.3.jar");
		write_zip(
			&path,
			&[(
				"fabric.mod.json",
				br#"{"id":"sodium","version":"0.5.3","name":"Sodium"}"#,
			)],
		);

		let (classifier, _) = classifier();
		let Classified::New { resource, .. } = classifier
			.classify(&path, None, &ResolveContext::new())
			.await
			.unwrap()
		else {
			panic!("expected a new resource");
		};

		assert_eq!(resource.domain, ResourceDomain::Mods);
		assert_eq!(resource.resource_type, ResourceType::Fabric);
		assert_eq!(resource.file_type, FileType::Jar);
		assert_eq!(resource.name, "Sodium-0.5.3");
		assert_eq!(resource.file_name, "sodium-0.5.3.jar");
		assert_eq!(resource.ext, ".jar");
		assert!(resource.uris.contains("fabric://sodium/0.5.3"));
		assert!(resource.uris.contains(&resource.hash.uri()));
		assert!(!resource.is_persisted());
	}

	#[tokio::test]
	async fn unreadable_file_is_unclassified() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("notes.txt");
		tokio::fs::write(&path, b"just text").await.unwrap();

		let (classifier, _) = classifier();
		let resource = classifier
			.classify(&path, Some(ResourceDomain::Mods), &ResolveContext::new())
			.await
			.unwrap()
			.into_resource();

		assert_eq!(resource.domain, ResourceDomain::Unclassified);
		assert_eq!(resource.resource_type, ResourceType::Unknown);
		assert!(resource.metadata.parsed.is_empty());
		assert_eq!(resource.name, "notes");
	}

	#[tokio::test]
	async fn unrecognized_archive_keeps_requested_domain() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("library.jar");
		write_zip(&path, &[("com/example/Lib.class", b"\xCA\xFE\xBA\xBE")]);

		let (classifier, _) = classifier();
		let resource = classifier
			.classify(&path, Some(ResourceDomain::Mods), &ResolveContext::new())
			.await
			.unwrap()
			.into_resource();
		assert_eq!(resource.domain, ResourceDomain::Mods);

		let resource = classifier
			.classify(&path, None, &ResolveContext::new())
			.await
			.unwrap()
			.into_resource();
		assert_eq!(resource.domain, ResourceDomain::Unclassified);
	}

	#[tokio::test]
	async fn indexed_hash_short_circuits() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("a.jar");
		tokio::fs::write(&path, b"abc").await.unwrap();

		let (classifier, index) = classifier();
		let first = classifier
			.classify(&path, None, &ResolveContext::new())
			.await
			.unwrap()
			.into_resource();
		let mut stored = first.clone();
		stored.ino = 0;
		stored.stored_path = Some(dir.path().join("elsewhere.jar"));
		index.put(stored.clone());

		let copy = dir.path().join("copy.jar");
		tokio::fs::write(&copy, b"abc").await.unwrap();
		match classifier
			.classify(&copy, None, &ResolveContext::new())
			.await
			.unwrap()
		{
			Classified::Known(known) => assert_eq!(known, stored),
			other => panic!("expected index hit, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn directories_are_not_hashed() {
		let dir = tempfile::tempdir().unwrap();
		let world = dir.path().join("World");
		tokio::fs::create_dir_all(&world).await.unwrap();
		tokio::fs::write(world.join("level.dat"), b"nbt").await.unwrap();

		let (classifier, _) = classifier();
		let resource = classifier
			.classify(&world, None, &ResolveContext::new())
			.await
			.unwrap()
			.into_resource();
		assert_eq!(resource.file_type, FileType::Directory);
		assert_eq!(resource.hash, ContentHash::none());
		assert_eq!(resource.domain, ResourceDomain::Saves);
		assert_eq!(resource.name, "World");
	}
}

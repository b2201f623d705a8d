use std::{
	collections::{HashMap, HashSet},
	fmt,
	path::{Path, PathBuf},
};

use parking_lot::RwLock;
use tracing::trace;

use crate::resource::{ContentHash, Resource, ResourceDomain};

/// Any key a resource can be looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
	Hash(ContentHash),
	Ino(u64),
	Path(PathBuf),
	Uri(String),
}

impl IndexKey {
	/// Best guess at what a user supplied string refers to: a hash, an
	/// `sha1:`/`scheme://` uri, or a path.
	pub fn parse(value: &str) -> Self {
		if let Some(hash) = ContentHash::parse(value) {
			if !value.starts_with("sha1:") {
				return Self::Hash(hash);
			}
		}
		if value.starts_with("sha1:") || value.contains("://") {
			return Self::Uri(value.to_string());
		}
		Self::Path(PathBuf::from(value))
	}
}

impl fmt::Display for IndexKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Hash(hash) => write!(f, "{hash}"),
			Self::Ino(ino) => write!(f, "ino:{ino}"),
			Self::Path(path) => write!(f, "{}", path.display()),
			Self::Uri(uri) => f.write_str(uri),
		}
	}
}

#[derive(Default)]
struct IndexState {
	by_hash: HashMap<ContentHash, Resource>,
	by_ino: HashMap<u64, ContentHash>,
	by_path: HashMap<PathBuf, ContentHash>,
	by_uri: HashMap<String, ContentHash>,
	/// Extra paths known to hold the same bytes (dedup hits).
	aliases: HashMap<ContentHash, HashSet<PathBuf>>,
}

impl IndexState {
	fn register(&mut self, resource: &Resource) {
		let hash = &resource.hash;
		if resource.ino != 0 {
			self.by_ino.insert(resource.ino, hash.clone());
		}
		self.by_path.insert(resource.path.clone(), hash.clone());
		if let Some(stored) = &resource.stored_path {
			self.by_path.insert(stored.clone(), hash.clone());
		}
		for uri in &resource.uris {
			self.by_uri.insert(uri.clone(), hash.clone());
		}
		if let Some(aliases) = self.aliases.get(hash) {
			for alias in aliases {
				self.by_path.insert(alias.clone(), hash.clone());
			}
		}
	}

	fn unregister(&mut self, resource: &Resource) {
		let hash = &resource.hash;
		remove_if_points_to(&mut self.by_ino, &resource.ino, hash);
		remove_if_points_to(&mut self.by_path, &resource.path, hash);
		if let Some(stored) = &resource.stored_path {
			remove_if_points_to(&mut self.by_path, stored, hash);
		}
		for uri in &resource.uris {
			remove_if_points_to(&mut self.by_uri, uri, hash);
		}
	}
}

/// Secondary keys are only dropped while they still point at `hash`; a newer
/// resource may have claimed them since.
fn remove_if_points_to<K>(map: &mut HashMap<K, ContentHash>, key: &K, hash: &ContentHash)
where
	K: std::hash::Hash + Eq,
{
	if map.get(key) == Some(hash) {
		map.remove(key);
	}
}

/// In-memory resource index.
///
/// Resources live in one map keyed by hash; inode, path and uri maps only
/// point at hashes. Every mutation takes the write lock once, so a reader
/// sees either all keys of a resource or none.
#[derive(Default)]
pub struct ResourceIndex {
	state: RwLock<IndexState>,
}

impl ResourceIndex {
	pub fn new() -> Self {
		Self::default()
	}

	/// Inserts or replaces the resource with the same hash. Resources whose
	/// hash cannot identify content are ignored.
	pub fn put(&self, resource: Resource) -> Option<Resource> {
		if !resource.hash.is_identifying() {
			trace!(path = %resource.path.display(), "Not indexing resource without identity");
			return None;
		}

		let mut state = self.state.write();
		let previous = state.by_hash.remove(&resource.hash);
		if let Some(previous) = &previous {
			state.unregister(previous);
		}
		state.register(&resource);
		state.by_hash.insert(resource.hash.clone(), resource);
		previous
	}

	pub fn put_all(&self, resources: impl IntoIterator<Item = Resource>) {
		for resource in resources {
			self.put(resource);
		}
	}

	/// Removes a resource and every key pointing at it.
	pub fn discard(&self, hash: &ContentHash) -> Option<Resource> {
		let mut state = self.state.write();
		let resource = state.by_hash.remove(hash)?;
		state.unregister(&resource);
		if let Some(aliases) = state.aliases.remove(hash) {
			for alias in aliases {
				remove_if_points_to(&mut state.by_path, &alias, hash);
			}
		}
		Some(resource)
	}

	/// Makes `path` resolve to an already indexed resource.
	pub fn alias_path(&self, hash: &ContentHash, path: impl Into<PathBuf>) -> bool {
		let path = path.into();
		let mut state = self.state.write();
		if !state.by_hash.contains_key(hash) {
			return false;
		}
		state.by_path.insert(path.clone(), hash.clone());
		state.aliases.entry(hash.clone()).or_default().insert(path);
		true
	}

	/// Alias paths of `hash`, sorted.
	pub fn aliases(&self, hash: &ContentHash) -> Vec<PathBuf> {
		let mut aliases = self
			.state
			.read()
			.aliases
			.get(hash)
			.map(|aliases| aliases.iter().cloned().collect::<Vec<_>>())
			.unwrap_or_default();
		aliases.sort();
		aliases
	}

	/// Forgets an alias path, e.g. after the duplicate file was deleted.
	pub fn remove_alias(&self, path: &Path) -> Option<ContentHash> {
		let mut state = self.state.write();
		let hash = state.by_path.get(path)?.clone();
		let removed = state
			.aliases
			.get_mut(&hash)
			.map(|aliases| aliases.remove(path))
			.unwrap_or(false);
		if removed {
			state.by_path.remove(path);
			Some(hash)
		} else {
			None
		}
	}

	pub fn get(&self, key: &IndexKey) -> Option<Resource> {
		let state = self.state.read();
		let hash = match key {
			IndexKey::Hash(hash) => {
				if !hash.is_identifying() {
					return None;
				}
				hash
			}
			IndexKey::Ino(0) => return None,
			IndexKey::Ino(ino) => state.by_ino.get(ino)?,
			IndexKey::Path(path) => state.by_path.get(path)?,
			IndexKey::Uri(uri) => state.by_uri.get(uri)?,
		};
		state.by_hash.get(hash).cloned()
	}

	pub fn get_many<'a>(&self, keys: impl IntoIterator<Item = &'a IndexKey>) -> Vec<Resource> {
		let mut seen = HashSet::new();
		keys.into_iter()
			.filter_map(|key| self.get(key))
			.filter(|resource| seen.insert(resource.hash.clone()))
			.collect()
	}

	/// Whether `path` is the canonical location of an indexed resource, as
	/// opposed to an alias or unknown.
	pub fn primary_at(&self, path: &Path) -> Option<Resource> {
		let state = self.state.read();
		let hash = state.by_path.get(path)?;
		state
			.by_hash
			.get(hash)
			.filter(|resource| resource.location() == path)
			.cloned()
	}

	pub fn contains(&self, hash: &ContentHash) -> bool {
		self.state.read().by_hash.contains_key(hash)
	}

	pub fn len(&self) -> usize {
		self.state.read().by_hash.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn all(&self) -> Vec<Resource> {
		self.state.read().by_hash.values().cloned().collect()
	}

	pub fn by_domain(&self, domain: ResourceDomain) -> Vec<Resource> {
		self.state
			.read()
			.by_hash
			.values()
			.filter(|resource| resource.domain == domain)
			.cloned()
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use crate::{index::test_utils::resource, resource::EMPTY_SHA1};

	use super::*;

	const H1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";
	const H2: &str = "0000000000000000000000000000000000000002";

	#[test]
	fn every_key_resolves_to_the_resource() {
		let index = ResourceIndex::new();
		let mut a = resource(H1, "/launcher/mods/a.jar");
		a.ino = 42;
		a.uris.insert("modrinth://version/abc".into());
		index.put(a.clone());

		for key in [
			IndexKey::Hash(a.hash.clone()),
			IndexKey::Ino(42),
			IndexKey::Path("/launcher/mods/a.jar".into()),
			IndexKey::Uri("modrinth://version/abc".into()),
		] {
			assert_eq!(index.get(&key), Some(a.clone()), "{key}");
		}
	}

	#[test]
	fn discard_removes_every_key() {
		let index = ResourceIndex::new();
		let mut a = resource(H1, "/launcher/mods/a.jar");
		a.ino = 42;
		a.uris.insert("modrinth://version/abc".into());
		index.put(a.clone());
		index.alias_path(&a.hash, "/downloads/a.jar");

		assert_eq!(index.discard(&a.hash), Some(a.clone()));
		assert!(index.is_empty());
		assert_eq!(index.get(&IndexKey::Ino(42)), None);
		assert_eq!(index.get(&IndexKey::Path("/downloads/a.jar".into())), None);
		assert_eq!(index.get(&IndexKey::Uri("modrinth://version/abc".into())), None);
	}

	#[test]
	fn replacing_a_resource_drops_stale_keys() {
		let index = ResourceIndex::new();
		let mut a = resource(H1, "/launcher/mods/a.jar");
		a.ino = 42;
		index.put(a.clone());

		a.ino = 43;
		a.path = "/launcher/mods/renamed.jar".into();
		index.put(a.clone());

		assert_eq!(index.get(&IndexKey::Ino(42)), None);
		assert_eq!(index.get(&IndexKey::Path("/launcher/mods/a.jar".into())), None);
		assert_eq!(index.get(&IndexKey::Ino(43)), Some(a));
	}

	#[test]
	fn uri_claimed_by_another_resource_survives_discard() {
		let index = ResourceIndex::new();
		let mut a = resource(H1, "/launcher/mods/a.jar");
		a.uris.insert("https://example.com/mod.jar".into());
		let mut b = resource(H2, "/launcher/mods/b.jar");
		b.uris.insert("https://example.com/mod.jar".into());
		index.put(a.clone());
		index.put(b.clone());

		index.discard(&a.hash);
		assert_eq!(
			index.get(&IndexKey::Uri("https://example.com/mod.jar".into())),
			Some(b)
		);
	}

	#[test]
	fn empty_content_is_never_a_key() {
		let index = ResourceIndex::new();
		let empty = resource(EMPTY_SHA1, "/launcher/mods/empty.jar");
		assert_eq!(index.put(empty.clone()), None);
		assert!(index.is_empty());
		assert_eq!(index.get(&IndexKey::Hash(empty.hash)), None);
		assert_eq!(index.get(&IndexKey::Ino(0)), None);
	}

	#[test]
	fn alias_is_not_primary() {
		let index = ResourceIndex::new();
		let a = resource(H1, "/launcher/mods/a.jar");
		index.put(a.clone());
		assert!(index.alias_path(&a.hash, "/downloads/a-copy.jar"));

		assert_eq!(
			index.get(&IndexKey::Path("/downloads/a-copy.jar".into())),
			Some(a.clone())
		);
		assert_eq!(index.primary_at(Path::new("/downloads/a-copy.jar")), None);
		assert_eq!(index.primary_at(Path::new("/launcher/mods/a.jar")), Some(a.clone()));

		assert_eq!(
			index.remove_alias(Path::new("/downloads/a-copy.jar")),
			Some(a.hash.clone())
		);
		assert_eq!(index.remove_alias(Path::new("/launcher/mods/a.jar")), None);
	}

	#[test]
	fn discard_drops_aliases() {
		let index = ResourceIndex::new();
		let a = resource(H1, "/launcher/mods/a.jar");
		index.put(a.clone());
		index.alias_path(&a.hash, "/launcher/mods/b.jar");
		index.alias_path(&a.hash, "/downloads/a.jar");
		assert_eq!(
			index.aliases(&a.hash),
			vec![PathBuf::from("/downloads/a.jar"), PathBuf::from("/launcher/mods/b.jar")]
		);

		index.discard(&a.hash);
		assert!(index.aliases(&a.hash).is_empty());
		assert_eq!(index.get(&IndexKey::Path("/launcher/mods/b.jar".into())), None);
	}

	#[test]
	fn parse_keys() {
		assert_eq!(IndexKey::parse(H1), IndexKey::Hash(ContentHash::parse(H1).unwrap()));
		assert_eq!(
			IndexKey::parse("sha1:a9993e364706816aba3e25717850c26c9cd0d89d"),
			IndexKey::Uri("sha1:a9993e364706816aba3e25717850c26c9cd0d89d".into())
		);
		assert_eq!(
			IndexKey::parse("curseforge://id/1/2"),
			IndexKey::Uri("curseforge://id/1/2".into())
		);
		assert_eq!(
			IndexKey::parse("mods/a.jar"),
			IndexKey::Path("mods/a.jar".into())
		);
	}
}

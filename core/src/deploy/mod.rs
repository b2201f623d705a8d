//! Projects canonical resources into instance directories.
//!
//! An instance gets the same domain layout as the launcher root. Files are
//! hard linked (copied when linking is slow or impossible) so the canonical
//! copy stays the only real one; worlds are unpacked because the game plays
//! them from a directory.

use std::{
	ffi::OsString,
	path::{Path, PathBuf},
	time::Duration,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use crate::{
	error::FileIOError,
	identify::{file_checksum, stat_file},
	parser::ParsedMetadata,
	resource::{split_file_name, ContentHash, FileType, Resource, ResourceDomain},
	store::{exists, link_or_copy, move_file, remove_file_if_exists, Transfer},
};

mod saves;

pub const DISABLED_SUFFIX: &str = ".disabled";

#[derive(Error, Debug)]
pub enum DeployError {
	#[error("unclassified resources cannot be installed: <hash='{hash}'>")]
	Unclassified { hash: ContentHash },
	#[error("resource has no canonical copy to deploy: <hash='{hash}'>")]
	NotPersisted { hash: ContentHash },
	#[error("failed to read archive: {0}")]
	Archive(#[from] zip::result::ZipError),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("deployment task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}

/// How one domain is materialized inside an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Installer {
	/// Link or copy the single canonical file.
	Link,
	/// Unpack a zipped world into its own directory.
	ExtractWorld,
}

impl Installer {
	/// Strategy table keyed by domain. Domains without an entry are deployed
	/// with [`Installer::Link`] after a warning; unclassified resources are
	/// never deployed.
	pub fn for_domain(domain: ResourceDomain) -> Option<Self> {
		match domain {
			ResourceDomain::Mods | ResourceDomain::ResourcePacks | ResourceDomain::ShaderPacks => {
				Some(Self::Link)
			}
			ResourceDomain::Saves => Some(Self::ExtractWorld),
			ResourceDomain::Modpacks | ResourceDomain::Unclassified => None,
		}
	}

	fn resolve(resource: &Resource) -> Self {
		match Self::for_domain(resource.domain) {
			Some(Self::ExtractWorld) if resource.file_type != FileType::Zip => Self::Link,
			Some(installer) => installer,
			None => {
				warn!(
					hash = %resource.hash,
					domain = %resource.domain,
					"No installer registered for domain, linking the file as is;"
				);
				Self::Link
			}
		}
	}

	fn resolve_quiet(resource: &Resource) -> Self {
		match Self::for_domain(resource.domain) {
			Some(Self::ExtractWorld) if resource.file_type == FileType::Zip => Self::ExtractWorld,
			_ => Self::Link,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployAction {
	Linked,
	Copied,
	Extracted,
	/// A different file sat at the destination and was replaced.
	Repaired,
	Unchanged,
	Removed,
	Enabled,
	Disabled,
	/// Already in the requested state.
	Skipped,
	/// Nothing belonging to the resource was found in the instance.
	Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployReport {
	pub hash: ContentHash,
	pub path: PathBuf,
	pub action: DeployAction,
}

/// `<path>.disabled`
pub fn disabled_path(path: &Path) -> PathBuf {
	let mut name = OsString::from(path.as_os_str());
	name.push(DISABLED_SUFFIX);
	PathBuf::from(name)
}

#[derive(Debug, Clone)]
pub struct Deployer {
	link_timeout: Duration,
}

impl Deployer {
	pub fn new(link_timeout: Duration) -> Self {
		Self { link_timeout }
	}

	/// Where `resource` lives inside `instance` while enabled.
	pub fn destination(resource: &Resource, instance: &Path) -> PathBuf {
		let dir = instance.join(resource.domain.dir_name());
		match Installer::resolve_quiet(resource) {
			Installer::Link => dir.join(&resource.file_name),
			Installer::ExtractWorld => dir.join(split_file_name(&resource.file_name).0),
		}
	}

	#[instrument(skip_all, fields(instance = %instance.display(), count = resources.len()), err)]
	pub async fn install(
		&self,
		resources: &[Resource],
		instance: &Path,
	) -> Result<Vec<DeployReport>, DeployError> {
		let mut reports = Vec::with_capacity(resources.len());
		for resource in resources {
			reports.push(self.install_one(resource, instance).await?);
		}
		Ok(reports)
	}

	async fn install_one(
		&self,
		resource: &Resource,
		instance: &Path,
	) -> Result<DeployReport, DeployError> {
		if resource.domain == ResourceDomain::Unclassified {
			return Err(DeployError::Unclassified {
				hash: resource.hash.clone(),
			});
		}
		let Some(canonical) = resource.stored_path.as_deref() else {
			return Err(DeployError::NotPersisted {
				hash: resource.hash.clone(),
			});
		};

		let dest = Self::destination(resource, instance);
		if let Some(parent) = dest.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| FileIOError::from((parent, e, "create instance directory")))?;
		}

		let action = match Installer::resolve(resource) {
			Installer::Link => self.link(canonical, &dest).await?,
			Installer::ExtractWorld => extract(resource, canonical, &dest).await?,
		};
		debug!(hash = %resource.hash, dest = %dest.display(), ?action, "Installed resource");

		Ok(DeployReport {
			hash: resource.hash.clone(),
			path: dest,
			action,
		})
	}

	async fn link(&self, canonical: &Path, dest: &Path) -> Result<DeployAction, DeployError> {
		let canonical_ino = stat_file(canonical).await?.ino;

		if exists(dest).await? {
			let dest_ino = stat_file(dest).await?.ino;
			if canonical_ino != 0 && dest_ino == canonical_ino {
				return Ok(DeployAction::Unchanged);
			}
			trace!(dest = %dest.display(), "Destination drifted from canonical file, replacing");
			remove_file_if_exists(dest).await?;
			link_or_copy(canonical, dest, self.link_timeout).await?;
			return Ok(DeployAction::Repaired);
		}

		let disabled = disabled_path(dest);
		if exists(&disabled).await? && stat_file(&disabled).await?.ino == canonical_ino {
			trace!(dest = %disabled.display(), "Installed but disabled, leaving as is");
			return Ok(DeployAction::Unchanged);
		}

		Ok(match link_or_copy(canonical, dest, self.link_timeout).await? {
			Transfer::Linked => DeployAction::Linked,
			Transfer::Copied => DeployAction::Copied,
		})
	}

	/// Removes the resource from the instance.
	///
	/// When nothing at the expected path belongs to the resource, the domain
	/// directory is searched by inode, then by hash. Files that match neither
	/// are never touched.
	#[instrument(skip_all, fields(instance = %instance.display(), count = resources.len()), err)]
	pub async fn uninstall(
		&self,
		resources: &[Resource],
		instance: &Path,
	) -> Result<Vec<DeployReport>, DeployError> {
		let mut reports = Vec::with_capacity(resources.len());
		for resource in resources {
			let dest = Self::destination(resource, instance);
			let (path, action) = match Installer::resolve_quiet(resource) {
				Installer::Link => uninstall_file(resource, &dest).await?,
				Installer::ExtractWorld => uninstall_world(&dest).await?,
			};
			if action == DeployAction::Missing {
				warn!(hash = %resource.hash, dest = %dest.display(), "Resource not found in instance;");
			}
			reports.push(DeployReport {
				hash: resource.hash.clone(),
				path,
				action,
			});
		}
		Ok(reports)
	}

	pub async fn enable(
		&self,
		resources: &[Resource],
		instance: &Path,
	) -> Result<Vec<DeployReport>, DeployError> {
		self.toggle(resources, instance, true).await
	}

	pub async fn disable(
		&self,
		resources: &[Resource],
		instance: &Path,
	) -> Result<Vec<DeployReport>, DeployError> {
		self.toggle(resources, instance, false).await
	}

	#[instrument(skip(self, resources, instance), fields(instance = %instance.display()), err)]
	async fn toggle(
		&self,
		resources: &[Resource],
		instance: &Path,
		enable: bool,
	) -> Result<Vec<DeployReport>, DeployError> {
		let mut reports = Vec::with_capacity(resources.len());
		for resource in resources {
			let enabled = Self::destination(resource, instance);
			let disabled = disabled_path(&enabled);
			let (from, to, done) = if enable {
				(disabled, enabled, DeployAction::Enabled)
			} else {
				(enabled, disabled, DeployAction::Disabled)
			};

			let action = match (exists(&from).await?, exists(&to).await?) {
				(true, true) => {
					warn!(
						from = %from.display(),
						to = %to.display(),
						"Both enabled and disabled copies exist, skipping;"
					);
					DeployAction::Skipped
				}
				(true, false) => {
					if holds_resource(resource, &from).await? {
						move_file(&from, &to).await?;
						done
					} else {
						warn!(
							hash = %resource.hash,
							path = %from.display(),
							"File at destination belongs to another resource, leaving it;"
						);
						DeployAction::Missing
					}
				}
				(false, true) => {
					warn!(path = %to.display(), enable, "Resource already in requested state, skipping;");
					DeployAction::Skipped
				}
				(false, false) => {
					warn!(path = %from.display(), "Resource is not installed in instance;");
					DeployAction::Missing
				}
			};

			reports.push(DeployReport {
				hash: resource.hash.clone(),
				path: to,
				action,
			});
		}
		Ok(reports)
	}
}

async fn extract(
	resource: &Resource,
	canonical: &Path,
	dest: &Path,
) -> Result<DeployAction, DeployError> {
	if exists(dest).await? {
		return Ok(DeployAction::Unchanged);
	}
	if exists(&disabled_path(dest)).await? {
		return Ok(DeployAction::Unchanged);
	}

	let root = resource
		.metadata
		.parsed
		.values()
		.find_map(|metadata| match metadata {
			ParsedMetadata::Save(save) => Some(save.root.clone()),
			_ => None,
		})
		.unwrap_or_default();

	let canonical = canonical.to_path_buf();
	let dest = dest.to_path_buf();
	tokio::task::spawn_blocking(move || saves::extract_world(&canonical, &root, &dest)).await??;

	Ok(DeployAction::Extracted)
}

/// Inode of the canonical file, or the recorded one if it is gone.
async fn canonical_ino(resource: &Resource) -> Result<u64, DeployError> {
	match resource.stored_path.as_deref() {
		Some(canonical) => match stat_file(canonical).await {
			Ok(stat) => Ok(stat.ino),
			Err(e) if e.is_not_found() => Ok(resource.ino),
			Err(e) => Err(e.into()),
		},
		None => Ok(resource.ino),
	}
}

/// Whether the instance entry at `path` is this resource: an extracted
/// world, a link to the canonical file, or a copy with the same bytes.
async fn holds_resource(resource: &Resource, path: &Path) -> Result<bool, DeployError> {
	if Installer::resolve_quiet(resource) == Installer::ExtractWorld {
		return Ok(saves::is_world(path));
	}

	let ino = canonical_ino(resource).await?;
	let stat = stat_file(path).await?;
	if ino != 0 && stat.ino == ino {
		return Ok(true);
	}
	if stat.is_dir || stat.size != resource.size {
		return Ok(false);
	}
	Ok(file_checksum(path, &resource.ext).await?.hash == resource.hash)
}

async fn uninstall_file(
	resource: &Resource,
	dest: &Path,
) -> Result<(PathBuf, DeployAction), DeployError> {
	let ino = canonical_ino(resource).await?;

	for candidate in [dest.to_path_buf(), disabled_path(dest)] {
		if !exists(&candidate).await? {
			continue;
		}
		let stat = stat_file(&candidate).await?;
		if ino != 0 && stat.ino == ino {
			remove_file_if_exists(&candidate).await?;
			return Ok((candidate, DeployAction::Removed));
		}
	}

	if let Some(found) = find_in_dir(resource, ino, dest).await? {
		debug!(hash = %resource.hash, path = %found.display(), "Located resource under another name");
		remove_file_if_exists(&found).await?;
		return Ok((found, DeployAction::Removed));
	}

	Ok((dest.to_path_buf(), DeployAction::Missing))
}

/// Searches the directory of `dest` for the resource, first by inode, then
/// by size and hash.
async fn find_in_dir(
	resource: &Resource,
	ino: u64,
	dest: &Path,
) -> Result<Option<PathBuf>, FileIOError> {
	let Some(dir) = dest.parent() else {
		return Ok(None);
	};
	let mut entries = match tokio::fs::read_dir(dir).await {
		Ok(entries) => entries,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(FileIOError::from((dir, e, "read instance directory"))),
	};

	let mut same_size = Vec::new();
	while let Some(entry) = entries
		.next_entry()
		.await
		.map_err(|e| FileIOError::from((dir, e, "read instance directory entry")))?
	{
		let path = entry.path();
		let stat = stat_file(&path).await?;
		if stat.is_dir {
			continue;
		}
		if ino != 0 && stat.ino == ino {
			return Ok(Some(path));
		}
		if stat.size == resource.size {
			same_size.push(path);
		}
	}

	for path in same_size {
		if file_checksum(&path, &resource.ext).await?.hash == resource.hash {
			return Ok(Some(path));
		}
	}

	Ok(None)
}

async fn uninstall_world(dest: &Path) -> Result<(PathBuf, DeployAction), DeployError> {
	for candidate in [dest.to_path_buf(), disabled_path(dest)] {
		if saves::is_world(&candidate) {
			tokio::fs::remove_dir_all(&candidate)
				.await
				.map_err(|e| FileIOError::from((&candidate, e, "remove world")))?;
			return Ok((candidate, DeployAction::Removed));
		}
	}
	Ok((dest.to_path_buf(), DeployAction::Missing))
}

#[cfg(test)]
mod tests {
	use pretty_assertions::assert_eq;

	use crate::{
		index::test_utils,
		parser::{test_utils::write_zip, SaveMetadata},
	};

	use super::*;

	struct Fixture {
		dir: tempfile::TempDir,
		instance: PathBuf,
		deployer: Deployer,
	}

	fn fixture() -> Fixture {
		let dir = tempfile::tempdir().unwrap();
		let instance = dir.path().join("instances/survival");
		Fixture {
			dir,
			instance,
			deployer: Deployer::new(Duration::from_millis(1500)),
		}
	}

	async fn canonical_mod(f: &Fixture, name: &str, content: &[u8]) -> Resource {
		let mods = f.dir.path().join("launcher/mods");
		tokio::fs::create_dir_all(&mods).await.unwrap();
		let path = mods.join(name);
		tokio::fs::write(&path, content).await.unwrap();

		let digest = file_checksum(&path, ".jar").await.unwrap();
		let mut resource = test_utils::resource(digest.hash.as_str(), &path.to_string_lossy());
		resource.size = digest.size;
		resource.ino = stat_file(&path).await.unwrap().ino;
		resource
	}

	#[tokio::test]
	async fn install_links_and_is_idempotent() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;

		let reports = f
			.deployer
			.install(std::slice::from_ref(&resource), &f.instance)
			.await
			.unwrap();
		let dest = f.instance.join("mods/mod-a.jar");
		assert_eq!(reports[0].path, dest);
		assert!(matches!(reports[0].action, DeployAction::Linked | DeployAction::Copied));
		assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"mod a");

		if reports[0].action == DeployAction::Linked {
			let again = f
				.deployer
				.install(std::slice::from_ref(&resource), &f.instance)
				.await
				.unwrap();
			assert_eq!(again[0].action, DeployAction::Unchanged);
		}
	}

	#[tokio::test]
	async fn install_recreates_deleted_link() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;
		f.deployer
			.install(std::slice::from_ref(&resource), &f.instance)
			.await
			.unwrap();

		let dest = f.instance.join("mods/mod-a.jar");
		tokio::fs::remove_file(&dest).await.unwrap();

		let reports = f
			.deployer
			.install(std::slice::from_ref(&resource), &f.instance)
			.await
			.unwrap();
		assert!(matches!(reports[0].action, DeployAction::Linked | DeployAction::Copied));
		assert!(dest.exists());
	}

	#[tokio::test]
	async fn install_repairs_replaced_file() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;
		let dest = f.instance.join("mods/mod-a.jar");
		tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
		tokio::fs::write(&dest, b"user replaced this").await.unwrap();

		let reports = f
			.deployer
			.install(std::slice::from_ref(&resource), &f.instance)
			.await
			.unwrap();
		assert_eq!(reports[0].action, DeployAction::Repaired);
		assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"mod a");
	}

	#[tokio::test]
	async fn unclassified_is_refused() {
		let f = fixture();
		let mut resource = canonical_mod(&f, "notes.txt", b"hello").await;
		resource.domain = ResourceDomain::Unclassified;

		assert!(matches!(
			f.deployer.install(&[resource], &f.instance).await,
			Err(DeployError::Unclassified { .. })
		));
	}

	#[tokio::test]
	async fn disable_and_enable_are_idempotent() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;
		let resources = std::slice::from_ref(&resource);
		f.deployer.install(resources, &f.instance).await.unwrap();

		let dest = f.instance.join("mods/mod-a.jar");
		let disabled = f.instance.join("mods/mod-a.jar.disabled");

		assert_eq!(
			f.deployer.disable(resources, &f.instance).await.unwrap()[0].action,
			DeployAction::Disabled
		);
		assert!(!dest.exists());
		assert!(disabled.exists());
		assert_eq!(
			f.deployer.disable(resources, &f.instance).await.unwrap()[0].action,
			DeployAction::Skipped
		);

		assert_eq!(
			f.deployer.enable(resources, &f.instance).await.unwrap()[0].action,
			DeployAction::Enabled
		);
		assert_eq!(
			f.deployer.enable(resources, &f.instance).await.unwrap()[0].action,
			DeployAction::Skipped
		);
		assert!(dest.exists());
	}

	#[tokio::test]
	async fn enable_keeps_both_files_when_both_exist() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;
		let resources = std::slice::from_ref(&resource);
		f.deployer.install(resources, &f.instance).await.unwrap();
		f.deployer.disable(resources, &f.instance).await.unwrap();

		// The user dropped a newer build under the enabled name
		let dest = f.instance.join("mods/mod-a.jar");
		tokio::fs::write(&dest, b"user build").await.unwrap();

		let reports = f.deployer.enable(resources, &f.instance).await.unwrap();
		assert_eq!(reports[0].action, DeployAction::Skipped);
		assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"user build");
		assert_eq!(
			tokio::fs::read(f.instance.join("mods/mod-a.jar.disabled"))
				.await
				.unwrap(),
			b"mod a"
		);
	}

	#[tokio::test]
	async fn disable_leaves_foreign_files_alone() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;
		let dest = f.instance.join("mods/mod-a.jar");
		tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
		tokio::fs::write(&dest, b"something else").await.unwrap();

		let reports = f
			.deployer
			.disable(std::slice::from_ref(&resource), &f.instance)
			.await
			.unwrap();
		assert_eq!(reports[0].action, DeployAction::Missing);
		assert!(dest.exists());
		assert!(!f.instance.join("mods/mod-a.jar.disabled").exists());
	}

	#[tokio::test]
	async fn disable_accepts_a_copy_with_the_same_bytes() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;
		let dest = f.instance.join("mods/mod-a.jar");
		tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
		tokio::fs::write(&dest, b"mod a").await.unwrap();

		let reports = f
			.deployer
			.disable(std::slice::from_ref(&resource), &f.instance)
			.await
			.unwrap();
		assert_eq!(reports[0].action, DeployAction::Disabled);
		assert!(f.instance.join("mods/mod-a.jar.disabled").exists());
	}

	#[tokio::test]
	async fn uninstall_finds_disabled_file() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;
		let resources = std::slice::from_ref(&resource);
		f.deployer.install(resources, &f.instance).await.unwrap();
		f.deployer.disable(resources, &f.instance).await.unwrap();

		let reports = f.deployer.uninstall(resources, &f.instance).await.unwrap();
		let disabled = f.instance.join("mods/mod-a.jar.disabled");
		assert_eq!(reports[0].action, DeployAction::Removed);
		assert_eq!(reports[0].path, disabled);
		assert!(!disabled.exists());
		assert!(resource.location().exists());
	}

	#[tokio::test]
	async fn uninstall_finds_renamed_copy_by_hash() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;
		let mods = f.instance.join("mods");
		tokio::fs::create_dir_all(&mods).await.unwrap();
		tokio::fs::write(mods.join("renamed.jar"), b"mod a").await.unwrap();
		tokio::fs::write(mods.join("other.jar"), b"mod b").await.unwrap();

		let reports = f
			.deployer
			.uninstall(std::slice::from_ref(&resource), &f.instance)
			.await
			.unwrap();
		assert_eq!(reports[0].action, DeployAction::Removed);
		assert_eq!(reports[0].path, mods.join("renamed.jar"));
		assert!(mods.join("other.jar").exists());
	}

	#[tokio::test]
	async fn uninstall_never_touches_unrelated_files() {
		let f = fixture();
		let resource = canonical_mod(&f, "mod-a.jar", b"mod a").await;
		let dest = f.instance.join("mods/mod-a.jar");
		tokio::fs::create_dir_all(dest.parent().unwrap()).await.unwrap();
		tokio::fs::write(&dest, b"something else").await.unwrap();

		let reports = f
			.deployer
			.uninstall(std::slice::from_ref(&resource), &f.instance)
			.await
			.unwrap();
		assert_eq!(reports[0].action, DeployAction::Missing);
		assert!(dest.exists());
	}

	#[tokio::test]
	async fn worlds_are_extracted_and_removed() {
		let f = fixture();
		let saves = f.dir.path().join("launcher/saves");
		tokio::fs::create_dir_all(&saves).await.unwrap();
		let path = saves.join("Skyblock.zip");
		write_zip(&path, &[("Skyblock/level.dat", b"nbt"), ("Skyblock/icon.png", b"png")]);

		let mut resource = test_utils::resource(crate::resource::EMPTY_SHA1, &path.to_string_lossy());
		resource.hash = file_checksum(&path, ".zip").await.unwrap().hash;
		resource.domain = ResourceDomain::Saves;
		resource.file_type = FileType::Zip;
		resource.file_name = "Skyblock.zip".into();
		resource.metadata.parsed.insert(
			"save".into(),
			ParsedMetadata::Save(SaveMetadata {
				root: "Skyblock/".into(),
				level_name: "Skyblock".into(),
			}),
		);
		let resources = std::slice::from_ref(&resource);

		let reports = f.deployer.install(resources, &f.instance).await.unwrap();
		let world = f.instance.join("saves/Skyblock");
		assert_eq!(reports[0].action, DeployAction::Extracted);
		assert!(world.join("level.dat").exists());

		assert_eq!(
			f.deployer.install(resources, &f.instance).await.unwrap()[0].action,
			DeployAction::Unchanged
		);

		let reports = f.deployer.uninstall(resources, &f.instance).await.unwrap();
		assert_eq!(reports[0].action, DeployAction::Removed);
		assert!(!world.exists());
	}
}

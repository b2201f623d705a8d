//! Canonical, deduplicated storage of resource files.
//!
//! Every persisted resource is one file under `<root>/<domain>/`. Moving a
//! file that already sits in its domain directory is a rename; anything else
//! is linked (or copied when linking is slow or impossible) so the source is
//! left untouched.

use std::{
	path::{Path, PathBuf},
	time::Duration,
};

use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::{
	error::FileIOError,
	identify::{file_checksum, stat_file, ResolveContext},
	resource::{split_file_name, Resource, ResourceDomain},
};

mod fs;
mod images;
mod pending;

pub use fs::{exists, link_or_copy, move_file, remove_file_if_exists, sanitize_file_name, Transfer};
pub use images::ImageStore;
pub use pending::PendingSet;

#[derive(Error, Debug)]
pub enum StoreError {
	#[error("no free file name for resource: <path='{}'>", .0.display())]
	Collision(Box<Path>),
	#[error("directories cannot be stored: <path='{}'>", .0.display())]
	NotAFile(Box<Path>),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

/// What persisting a resource actually did on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOp {
	/// The file already was at its canonical path.
	InPlace,
	/// An identical file already occupied the target.
	Reused,
	Renamed,
	Linked,
	Copied,
}

#[derive(Debug, Clone)]
pub struct Persisted {
	pub resource: Resource,
	pub op: PersistOp,
}

pub struct ContentStore {
	root: PathBuf,
	pending: PendingSet,
	images: ImageStore,
	link_timeout: Duration,
}

impl ContentStore {
	pub fn new(
		root: impl Into<PathBuf>,
		images_dir: impl Into<PathBuf>,
		pending: PendingSet,
		link_timeout: Duration,
	) -> Self {
		Self {
			root: root.into(),
			pending,
			images: ImageStore::new(images_dir),
			link_timeout,
		}
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn domain_dir(&self, domain: ResourceDomain) -> PathBuf {
		self.root.join(domain.dir_name())
	}

	pub fn pending(&self) -> &PendingSet {
		&self.pending
	}

	pub fn images(&self) -> &ImageStore {
		&self.images
	}

	pub fn link_timeout(&self) -> Duration {
		self.link_timeout
	}

	/// Creates every domain directory and the icon directory.
	pub async fn ensure_layout(&self) -> Result<(), FileIOError> {
		for dir in ResourceDomain::all()
			.map(|domain| self.domain_dir(domain))
			.chain([self.images.dir().to_path_buf()])
		{
			tokio::fs::create_dir_all(&dir)
				.await
				.map_err(|e| FileIOError::from((&dir, e, "create store directory")))?;
		}
		Ok(())
	}

	/// Moves the resource into its canonical location and returns it with
	/// `stored_path` and a fresh inode.
	///
	/// The destination is registered as pending before anything touches the
	/// disk and unregistered again if the operation fails.
	#[instrument(skip_all, fields(hash = %resource.hash, path = %resource.path.display()), err)]
	pub async fn persist(
		&self,
		mut resource: Resource,
		context: &ResolveContext,
	) -> Result<Persisted, StoreError> {
		if resource.is_directory() {
			return Err(StoreError::NotAFile(resource.path.into_boxed_path()));
		}

		let dir = self.domain_dir(resource.domain);
		tokio::fs::create_dir_all(&dir)
			.await
			.map_err(|e| FileIOError::from((&dir, e, "create domain directory")))?;

		let source = resource.path.clone();
		let file_name = sanitize_file_name(&resource.file_name);
		let mut target = dir.join(&file_name);

		if target == source {
			trace!("Resource already in place");
			resource.stored_path = Some(target);
			return Ok(Persisted {
				resource,
				op: PersistOp::InPlace,
			});
		}

		if exists(&target).await? {
			if self.holds_same_content(&target, &resource, context).await? {
				return Ok(self.reuse(resource, target).await?);
			}

			let (stem, ext) = split_file_name(&file_name);
			target = dir.join(format!("{stem}.{}{ext}", resource.hash.fragment()));
			if target == source {
				resource.stored_path = Some(target);
				return Ok(Persisted {
					resource,
					op: PersistOp::InPlace,
				});
			}
			if exists(&target).await? {
				if self.holds_same_content(&target, &resource, context).await? {
					return Ok(self.reuse(resource, target).await?);
				}
				return Err(StoreError::Collision(target.into_boxed_path()));
			}
		}

		self.pending.register(&target);
		let op = match self.transfer(&source, &target).await {
			Ok(op) => op,
			Err(e) => {
				self.pending.unregister(&target);
				return Err(e.into());
			}
		};
		self.pending.settle(&target);

		let stat = stat_file(&target).await?;
		debug!(target = %target.display(), ?op, "Persisted resource");

		if op == PersistOp::Renamed {
			context.forget(&source);
		}
		resource.ino = stat.ino;
		resource.size = stat.size;
		resource.file_name = target
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or(file_name);
		resource.path = target.clone();
		resource.stored_path = Some(target);

		Ok(Persisted { resource, op })
	}

	async fn transfer(&self, source: &Path, target: &Path) -> Result<PersistOp, FileIOError> {
		if source.parent() == target.parent() {
			move_file(source, target).await?;
			return Ok(PersistOp::Renamed);
		}

		Ok(match link_or_copy(source, target, self.link_timeout).await? {
			Transfer::Linked => PersistOp::Linked,
			Transfer::Copied => PersistOp::Copied,
		})
	}

	async fn holds_same_content(
		&self,
		target: &Path,
		resource: &Resource,
		context: &ResolveContext,
	) -> Result<bool, FileIOError> {
		let stat = context.stat(target).await?;
		if stat.ino != 0 && stat.ino == resource.ino {
			return Ok(true);
		}
		if stat.size != resource.size {
			return Ok(false);
		}
		Ok(context.digest(target, &resource.ext).await?.hash == resource.hash)
	}

	async fn reuse(&self, mut resource: Resource, target: PathBuf) -> Result<Persisted, FileIOError> {
		trace!(target = %target.display(), "Identical file already stored");
		let stat = stat_file(&target).await?;
		resource.ino = stat.ino;
		resource.file_name = target
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_default();
		resource.path = target.clone();
		resource.stored_path = Some(target);
		Ok(Persisted {
			resource,
			op: PersistOp::Reused,
		})
	}

	/// Deletes the canonical file of a resource.
	pub async fn delete(&self, resource: &Resource) -> Result<bool, FileIOError> {
		match &resource.stored_path {
			Some(stored) => remove_file_if_exists(stored).await,
			None => Ok(false),
		}
	}

	/// Re-reads a stored file, e.g. after the watcher saw it change.
	pub async fn rehash(&self, resource: &Resource) -> Result<crate::identify::FileDigest, FileIOError> {
		file_checksum(resource.location(), &resource.ext).await
	}
}

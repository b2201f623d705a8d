use std::{
	ffi::OsStr,
	path::{Path, PathBuf},
	time::SystemTime,
};

use notify::{
	event::{AccessKind, AccessMode, ModifyKind, RenameMode},
	EventKind,
};

/// Extensions that are bookkeeping next to real content (metadata sidecars,
/// icons) or leftovers of in-progress writes.
const IGNORED_EXTENSIONS: [&str; 7] = ["json", "png", "tmp", "temp", "part", "partial", "swp"];

/// Event kinds as they come out of the backend, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEventKind {
	Create,
	Modify,
	Remove,
	/// A rename where the backend gave us both ends, or a single path and
	/// no hint about which end it is.
	Rename,
	RenameFrom,
	RenameTo,
	Other(String),
}

#[derive(Debug, Clone)]
pub struct RawNotifyEvent {
	pub kind: RawEventKind,
	pub paths: Vec<PathBuf>,
	pub timestamp: SystemTime,
}

impl RawNotifyEvent {
	pub fn from_notify(event: notify::Event) -> Self {
		let kind = match event.kind {
			EventKind::Create(_) => RawEventKind::Create,
			EventKind::Remove(_) => RawEventKind::Remove,
			EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => RawEventKind::Rename,
			EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RawEventKind::RenameFrom,
			EventKind::Modify(ModifyKind::Name(RenameMode::To)) => RawEventKind::RenameTo,
			EventKind::Modify(ModifyKind::Name(_)) => RawEventKind::Rename,
			EventKind::Modify(_) => RawEventKind::Modify,
			EventKind::Access(AccessKind::Close(AccessMode::Write)) => RawEventKind::Modify,
			other => RawEventKind::Other(format!("{other:?}")),
		};

		Self {
			kind,
			paths: event.paths,
			timestamp: SystemTime::now(),
		}
	}

	pub fn primary_path(&self) -> Option<&PathBuf> {
		self.paths.first()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEventKind {
	Create,
	Modify,
	Remove,
	Rename { from: PathBuf },
}

impl FsEventKind {
	pub fn is_create(&self) -> bool {
		matches!(self, Self::Create)
	}

	pub fn is_modify(&self) -> bool {
		matches!(self, Self::Modify)
	}

	pub fn is_remove(&self) -> bool {
		matches!(self, Self::Remove)
	}

	pub fn is_rename(&self) -> bool {
		matches!(self, Self::Rename { .. })
	}
}

/// A normalized filesystem event. For renames `path` is the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
	pub kind: FsEventKind,
	pub path: PathBuf,
	pub timestamp: SystemTime,
}

impl FsEvent {
	fn new(kind: FsEventKind, path: PathBuf) -> Self {
		Self {
			kind,
			path,
			timestamp: SystemTime::now(),
		}
	}

	pub fn create(path: impl Into<PathBuf>) -> Self {
		Self::new(FsEventKind::Create, path.into())
	}

	pub fn modify(path: impl Into<PathBuf>) -> Self {
		Self::new(FsEventKind::Modify, path.into())
	}

	pub fn remove(path: impl Into<PathBuf>) -> Self {
		Self::new(FsEventKind::Remove, path.into())
	}

	pub fn rename(from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
		Self::new(FsEventKind::Rename { from: from.into() }, to.into())
	}

	/// Whether a consumer should ever see this event.
	///
	/// A rename is kept if either end is interesting, a rename of a jar to
	/// `foo.jar.tmp` is still a removal from the consumer's point of view.
	pub fn should_process(&self) -> bool {
		match &self.kind {
			FsEventKind::Rename { from } => !is_ignored_path(from) || !is_ignored_path(&self.path),
			_ => !is_ignored_path(&self.path),
		}
	}
}

/// Hidden files, editor backups and sidecar files are never resources.
pub fn is_ignored_path(path: &Path) -> bool {
	let Some(name) = path.file_name().and_then(OsStr::to_str) else {
		return true;
	};

	if name.starts_with('.') || name.ends_with('~') || name == "Thumbs.db" {
		return true;
	}

	path.extension()
		.and_then(OsStr::to_str)
		.map(|ext| {
			IGNORED_EXTENSIONS
				.iter()
				.any(|ignored| ext.eq_ignore_ascii_case(ignored))
		})
		.unwrap_or(false)
}

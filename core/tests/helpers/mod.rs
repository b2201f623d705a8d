//! Shared fixtures for the store integration tests.
#![allow(dead_code)]

use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
	time::Duration,
};

use quarry_core::{ResourceConfig, ResourceDomain, ResourceEvent, ResourceManager};
use tempfile::TempDir;
use tokio::sync::broadcast;
use zip::{write::SimpleFileOptions, ZipWriter};

/// A manager over a throwaway launcher root.
pub struct StoreHarness {
	pub dir: TempDir,
	pub manager: ResourceManager,
}

pub struct StoreHarnessBuilder {
	watch: bool,
	debounce_window_ms: u64,
}

impl StoreHarnessBuilder {
	pub fn new() -> Self {
		Self {
			watch: false,
			debounce_window_ms: 100,
		}
	}

	pub fn watch(mut self) -> Self {
		self.watch = true;
		self
	}

	pub async fn build(self) -> anyhow::Result<StoreHarness> {
		let dir = tempfile::tempdir()?;
		fs::create_dir_all(dir.path().join("downloads"))?;
		let manager = ResourceManager::open(self.config(dir.path())).await?;
		Ok(StoreHarness { dir, manager })
	}

	fn config(&self, dir: &Path) -> ResourceConfig {
		let mut config = ResourceConfig::default_with_root(dir.join("data"), dir.join("root"));
		config.watch = self.watch;
		config.debounce_window_ms = self.debounce_window_ms;
		config
	}
}

impl StoreHarness {
	pub fn root(&self) -> PathBuf {
		self.dir.path().join("root")
	}

	pub fn domain_dir(&self, domain: ResourceDomain) -> PathBuf {
		self.root().join(domain.dir_name())
	}

	/// Somewhere outside the store, like a browser download folder.
	pub fn downloads(&self) -> PathBuf {
		self.dir.path().join("downloads")
	}

	pub fn instance(&self, name: &str) -> PathBuf {
		self.dir.path().join("instances").join(name)
	}

	/// Shuts the manager down and opens a new one on the same directories.
	pub async fn reopen(self) -> anyhow::Result<Self> {
		let Self { dir, manager } = self;
		let config = manager.config().clone();
		manager.shutdown().await;
		drop(manager);

		let manager = ResourceManager::open(config).await?;
		Ok(Self { dir, manager })
	}

	pub async fn ready(&self) {
		for domain in ResourceDomain::all() {
			self.manager.when_ready(domain).await;
		}
	}
}

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
	if let Some(parent) = path.parent() {
		fs::create_dir_all(parent).unwrap();
	}
	let mut zip = ZipWriter::new(File::create(path).unwrap());
	let options = SimpleFileOptions::default();
	for (name, content) in entries {
		zip.start_file(*name, options).unwrap();
		zip.write_all(content).unwrap();
	}
	zip.finish().unwrap();
}

pub fn write_fabric_mod(path: &Path, id: &str, version: &str) {
	let manifest = format!(
		r#"{{"schemaVersion":1,"id":"{id}","version":"{version}","name":"{id}"}}"#
	);
	write_zip(
		path,
		&[
			("fabric.mod.json", manifest.as_bytes()),
			("assets/icon.txt", id.as_bytes()),
		],
	);
}

pub fn write_resource_pack(path: &Path, description: &str) {
	let mcmeta = format!(r#"{{"pack":{{"pack_format":15,"description":"{description}"}}}}"#);
	write_zip(path, &[("pack.mcmeta", mcmeta.as_bytes())]);
}

pub fn write_world(path: &Path, name: &str) {
	let level = format!("{name}/level.dat");
	let region = format!("{name}/region/r.0.0.mca");
	write_zip(
		path,
		&[(level.as_str(), b"nbt".as_slice()), (region.as_str(), b"region".as_slice())],
	);
}

/// Waits for the first event `accept` matches, skipping others.
pub async fn next_event<T>(
	events: &mut broadcast::Receiver<ResourceEvent>,
	mut accept: impl FnMut(&ResourceEvent) -> Option<T>,
) -> Option<T> {
	tokio::time::timeout(Duration::from_secs(10), async {
		loop {
			match events.recv().await {
				Ok(event) => {
					if let Some(found) = accept(&event) {
						return Some(found);
					}
				}
				Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => return None,
			}
		}
	})
	.await
	.ok()
	.flatten()
}

pub fn file_names(dir: &Path) -> Vec<String> {
	let mut names = fs::read_dir(dir)
		.map(|entries| {
			entries
				.filter_map(|entry| entry.ok())
				.map(|entry| entry.file_name().to_string_lossy().into_owned())
				.collect::<Vec<_>>()
		})
		.unwrap_or_default();
	names.sort();
	names
}

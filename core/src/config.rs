//! Store configuration

use std::{
	path::{Path, PathBuf},
	thread::available_parallelism,
	time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{error::FileIOError, resource::ResourceDomain};

pub const CONFIG_FILE_NAME: &str = "quarry.json";
pub const IMAGES_DIR_NAME: &str = "resource-images";
pub const RECORDS_FILE_NAME: &str = "resources.redb";

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("unable to find a data directory for this platform")]
	NoDataDir,
	#[error("invalid config file: <path='{}'>: {source}", .path.display())]
	Invalid {
		path: Box<Path>,
		source: serde_json::Error,
	},
	#[error("config version {found} is newer than the supported version {supported}")]
	UnsupportedVersion { found: u32, supported: u32 },
	#[error(transparent)]
	Serialize(#[from] serde_json::Error),
	#[error(transparent)]
	FileIO(#[from] FileIOError),
}

/// Configuration of a resource store, persisted as JSON in the data
/// directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
	/// Config schema version
	pub version: u32,

	/// Launcher root holding the domain directories
	pub root: PathBuf,

	/// Logging level used when `RUST_LOG` is not set
	#[serde(default = "default_log_level")]
	pub log_level: String,

	/// How long a hard link may take before falling back to a copy
	#[serde(default = "default_link_timeout_ms")]
	pub link_timeout_ms: u64,

	/// Watcher events closer together than this are handled as one batch
	#[serde(default = "default_debounce_window_ms")]
	pub debounce_window_ms: u64,

	/// Upper bound of paths handled in one watcher batch
	#[serde(default = "default_max_batch_size")]
	pub max_batch_size: usize,

	/// Files hashed and persisted concurrently by one import call
	#[serde(default = "default_import_concurrency")]
	pub import_concurrency: usize,

	/// Whether domain directories are watched after the initial scan
	#[serde(default = "default_watch")]
	pub watch: bool,

	/// Directory this config was loaded from
	#[serde(skip)]
	pub data_dir: PathBuf,
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_link_timeout_ms() -> u64 {
	1500
}

fn default_debounce_window_ms() -> u64 {
	1000
}

fn default_max_batch_size() -> usize {
	1024
}

fn default_import_concurrency() -> usize {
	available_parallelism().map_or(2, |n| n.get().max(2))
}

fn default_watch() -> bool {
	true
}

/// Platform data directory, e.g. `~/.local/share/quarry`.
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
	dirs::data_dir()
		.map(|dir| dir.join("quarry"))
		.ok_or(ConfigError::NoDataDir)
}

impl ResourceConfig {
	pub const fn target_version() -> u32 {
		1
	}

	/// Load configuration from the default location
	pub async fn load() -> Result<Self, ConfigError> {
		Self::load_from(default_data_dir()?).await
	}

	/// Loads `quarry.json` from `data_dir`, writing a default one when the
	/// file does not exist yet.
	pub async fn load_from(data_dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let data_dir = data_dir.as_ref();
		let config_path = data_dir.join(CONFIG_FILE_NAME);

		match tokio::fs::read(&config_path).await {
			Ok(bytes) => {
				info!(path = %config_path.display(), "Loading config");
				let mut config = serde_json::from_slice::<Self>(&bytes).map_err(|source| {
					ConfigError::Invalid {
						path: config_path.clone().into_boxed_path(),
						source,
					}
				})?;
				config.data_dir = data_dir.to_path_buf();

				if config.version > Self::target_version() {
					return Err(ConfigError::UnsupportedVersion {
						found: config.version,
						supported: Self::target_version(),
					});
				}
				if config.version < Self::target_version() {
					info!(
						from = config.version,
						to = Self::target_version(),
						"Migrating config"
					);
					config.version = Self::target_version();
					config.save().await?;
				}

				Ok(config)
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				warn!(path = %config_path.display(), "No config found, creating default");
				let config = Self::default_with_dir(data_dir);
				config.save().await?;
				Ok(config)
			}
			Err(e) => Err(FileIOError::from((config_path, e, "read config")).into()),
		}
	}

	/// Default configuration keeping the launcher root inside the data
	/// directory.
	pub fn default_with_dir(data_dir: impl Into<PathBuf>) -> Self {
		let data_dir = data_dir.into();
		Self::default_with_root(data_dir.clone(), data_dir)
	}

	pub fn default_with_root(data_dir: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
		Self {
			version: Self::target_version(),
			root: root.into(),
			log_level: default_log_level(),
			link_timeout_ms: default_link_timeout_ms(),
			debounce_window_ms: default_debounce_window_ms(),
			max_batch_size: default_max_batch_size(),
			import_concurrency: default_import_concurrency(),
			watch: default_watch(),
			data_dir: data_dir.into(),
		}
	}

	/// Save configuration to disk
	pub async fn save(&self) -> Result<(), ConfigError> {
		tokio::fs::create_dir_all(&self.data_dir)
			.await
			.map_err(|e| FileIOError::from((&self.data_dir, e, "create data directory")))?;

		let config_path = self.data_dir.join(CONFIG_FILE_NAME);
		let json = serde_json::to_vec_pretty(self)?;
		tokio::fs::write(&config_path, json)
			.await
			.map_err(|e| FileIOError::from((&config_path, e, "write config")))?;
		info!(path = %config_path.display(), "Saved config");
		Ok(())
	}

	pub fn logs_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	pub fn domain_dir(&self, domain: ResourceDomain) -> PathBuf {
		self.root.join(domain.dir_name())
	}

	pub fn images_dir(&self) -> PathBuf {
		self.root.join(IMAGES_DIR_NAME)
	}

	pub fn records_path(&self) -> PathBuf {
		self.root.join(RECORDS_FILE_NAME)
	}

	pub fn link_timeout(&self) -> Duration {
		Duration::from_millis(self.link_timeout_ms)
	}

	pub fn debounce_window(&self) -> Duration {
		Duration::from_millis(self.debounce_window_ms)
	}
}

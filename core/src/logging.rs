use std::path::Path;

use tracing::debug;
use tracing_appender::{
	non_blocking::WorkerGuard,
	rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::FileIOError;

/// Installs the global subscriber: stdout plus a daily rotated file under
/// `logs_dir`.
///
/// `RUST_LOG` takes precedence over `level`. If a subscriber is already
/// installed this leaves it in place; the returned guard must be kept alive
/// for the file writer to flush.
pub fn init(logs_dir: impl AsRef<Path>, level: &str) -> Result<WorkerGuard, FileIOError> {
	let logs_dir = logs_dir.as_ref();
	std::fs::create_dir_all(logs_dir)
		.map_err(|e| FileIOError::from((logs_dir, e, "create logs directory")))?;

	let (file_writer, guard) = tracing_appender::non_blocking(RollingFileAppender::new(
		Rotation::DAILY,
		logs_dir,
		"quarry.log",
	));

	let default_filter = format!("quarry_core={level},quarry_fs_watcher={level},quarry={level}");

	if let Err(e) = tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
		.with(fmt::layer().with_target(true).with_writer(std::io::stdout))
		.with(
			fmt::layer()
				.with_target(true)
				.with_thread_ids(true)
				.with_ansi(false)
				.with_writer(file_writer),
		)
		.try_init()
	{
		debug!(%e, "Tracing subscriber already installed;");
	}

	Ok(guard)
}

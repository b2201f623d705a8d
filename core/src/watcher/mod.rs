//! Keeps a domain directory and the index in agreement.
//!
//! Each domain is scanned once, then (optionally) watched. File system events
//! are folded by an [`Aggregator`] and handed to a [`Reconciler`] in batches.
//! Paths the store registered as pending are consumed here and never reach
//! the reconciler, so the store's own writes do not come back as imports.

use std::{
	path::{Path, PathBuf},
	pin::pin,
	sync::Arc,
	time::Duration,
};

use async_channel as chan;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use quarry_fs_watcher::{is_ignored_path, FsEvent, FsWatcher, WatcherConfig};
use tokio::{
	spawn,
	sync::mpsc,
	task::JoinHandle,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::{IntervalStream, ReceiverStream};
use tracing::{debug, error, info, instrument, trace, warn, Instrument};

use crate::{
	error::{FileIOError, Result},
	resource::ResourceDomain,
	store::PendingSet,
};

mod aggregate;
mod metrics;
mod state;

pub use aggregate::{Aggregator, WatchBatch};
pub use metrics::{MetricsSnapshot, ReconcileReport, WatcherMetrics};
pub use state::{ReadySignal, WatchState};

const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Applies file system changes of one domain to the store.
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync + 'static {
	/// Imports everything found by the initial scan.
	async fn scan(&self, domain: ResourceDomain, paths: Vec<PathBuf>) -> ReconcileReport;

	/// Handles one debounced batch. Failures are counted, never raised.
	async fn reconcile(&self, domain: ResourceDomain, batch: WatchBatch) -> ReconcileReport;
}

#[derive(Debug, Clone)]
pub struct DomainWatchConfig {
	/// Keep watching after the initial scan.
	pub watch: bool,
	pub debounce_window: Duration,
	pub max_batch_size: usize,
}

impl Default for DomainWatchConfig {
	fn default() -> Self {
		Self {
			watch: true,
			debounce_window: Duration::from_secs(1),
			max_batch_size: 1024,
		}
	}
}

/// Files directly inside a domain directory that are worth importing.
pub async fn list_domain_dir(dir: &Path) -> Result<Vec<PathBuf>, FileIOError> {
	let mut entries = match tokio::fs::read_dir(dir).await {
		Ok(entries) => entries,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
		Err(e) => return Err(FileIOError::from((dir, e, "read domain directory"))),
	};

	let mut paths = Vec::new();
	while let Some(entry) = entries
		.next_entry()
		.await
		.map_err(|e| FileIOError::from((dir, e, "read domain directory entry")))?
	{
		let path = entry.path();
		if is_ignored_path(&path) || path.extension().is_some_and(|ext| ext == "disabled") {
			trace!(path = %path.display(), "Skipping ignored entry");
			continue;
		}
		paths.push(path);
	}
	paths.sort();

	Ok(paths)
}

/// Scan-then-watch driver of one domain directory.
pub struct DomainWatcher {
	domain: ResourceDomain,
	dir: PathBuf,
	metrics: Arc<WatcherMetrics>,
	handle: Option<JoinHandle<()>>,
	stop_tx: chan::Sender<()>,
}

impl DomainWatcher {
	/// Scans `dir` and raises `ready`, then starts reconciling events.
	///
	/// The backend watcher is started before the scan so nothing written
	/// during the scan is lost, but its events are only looked at after the
	/// scan finished.
	#[instrument(name = "domain_watcher", skip_all, fields(%domain, dir = %dir.display()), err)]
	pub async fn mount(
		domain: ResourceDomain,
		dir: PathBuf,
		pending: PendingSet,
		reconciler: Arc<dyn Reconciler>,
		ready: ReadySignal,
		config: DomainWatchConfig,
	) -> Result<Self> {
		ready.set(WatchState::ScanningInitial);

		let backend = if config.watch {
			Some(FsWatcher::watch(&dir, WatcherConfig::default())?)
		} else {
			None
		};

		let paths = list_domain_dir(&dir).await?;
		let found = paths.len();
		let report = reconciler.scan(domain, paths).await;
		info!(
			found,
			imported = report.imported,
			failed = report.failed,
			"Initial domain scan finished"
		);
		ready.set(WatchState::Ready);

		let metrics = Arc::new(WatcherMetrics::new());
		let (stop_tx, stop_rx) = chan::bounded(1);

		let handle = backend.map(|(backend, events_rx)| {
			spawn(
				Self::handle_watch_events(
					domain,
					backend,
					events_rx,
					stop_rx,
					pending,
					reconciler,
					Arc::clone(&metrics),
					config,
				)
				.in_current_span(),
			)
		});

		Ok(Self {
			domain,
			dir,
			metrics,
			handle,
			stop_tx,
		})
	}

	pub fn domain(&self) -> ResourceDomain {
		self.domain
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn is_watching(&self) -> bool {
		self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
	}

	pub fn metrics(&self) -> MetricsSnapshot {
		self.metrics.snapshot()
	}

	/// Flushes what was already aggregated, then stops the task.
	pub async fn stop(mut self) {
		if let Some(handle) = self.handle.take() {
			if self.stop_tx.send(()).await.is_err() {
				trace!(domain = %self.domain, "Domain watcher already gone");
			}
			if let Err(e) = handle.await {
				error!(domain = %self.domain, ?e, "Failed to join domain watcher;");
			}
		}
	}

	#[allow(clippy::too_many_arguments)]
	async fn handle_watch_events(
		domain: ResourceDomain,
		backend: FsWatcher,
		events_rx: mpsc::Receiver<FsEvent>,
		stop_rx: chan::Receiver<()>,
		pending: PendingSet,
		reconciler: Arc<dyn Reconciler>,
		metrics: Arc<WatcherMetrics>,
		config: DomainWatchConfig,
	) {
		enum StreamMessage {
			NewEvent(FsEvent),
			Tick,
			Stop,
		}

		let mut aggregator = Aggregator::new(config.debounce_window, config.max_batch_size);
		let mut coalesced = 0;

		let mut tick_interval = interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
		tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut msg_stream = pin!((
			ReceiverStream::new(events_rx).map(StreamMessage::NewEvent),
			IntervalStream::new(tick_interval).map(|_| StreamMessage::Tick),
			stop_rx.map(|()| StreamMessage::Stop),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			match msg {
				StreamMessage::NewEvent(event) => {
					trace!(?event, "Received file system event");
					metrics.record_event();
					aggregator.push(event);
				}

				StreamMessage::Tick => {
					if aggregator.is_due(Instant::now()) {
						metrics.record_coalesced(aggregator.coalesced() - coalesced);
						coalesced = aggregator.coalesced();
						Self::flush(domain, aggregator.drain(), &pending, &*reconciler, &metrics)
							.await;
					}
				}

				StreamMessage::Stop => {
					debug!("Stopping domain watcher");
					break;
				}
			}
		}

		if aggregator.pending() > 0 {
			Self::flush(domain, aggregator.drain(), &pending, &*reconciler, &metrics).await;
		}

		backend.stop().await;
		info!(%domain, "Domain watcher gracefully shutdown");
	}

	#[instrument(skip_all, fields(%domain, paths = batch.len()))]
	async fn flush(
		domain: ResourceDomain,
		mut batch: WatchBatch,
		pending: &PendingSet,
		reconciler: &dyn Reconciler,
		metrics: &WatcherMetrics,
	) {
		for list in [&mut batch.added, &mut batch.changed] {
			list.retain(|path| {
				if pending.take(path) {
					trace!(path = %path.display(), "Consumed pending store write");
					metrics.record_pending_hit();
					return false;
				}
				true
			});
		}

		if batch.is_empty() {
			return;
		}

		let report = reconciler.reconcile(domain, batch).await;
		if report.failed > 0 {
			warn!(failed = report.failed, "Some watcher changes could not be applied;");
		}
		debug!(?report, "Reconciled watcher batch");
		metrics.record_batch(&report);
	}
}

impl Drop for DomainWatcher {
	fn drop(&mut self) {
		if self.handle.is_some() && self.stop_tx.try_send(()).is_err() {
			trace!(domain = %self.domain, "Domain watcher stop already requested");
		}
	}
}

#[cfg(test)]
mod tests {
	use parking_lot::Mutex;

	use super::*;

	#[derive(Default)]
	struct Recorder {
		scanned: Mutex<Vec<PathBuf>>,
		batches: Mutex<Vec<WatchBatch>>,
	}

	#[async_trait::async_trait]
	impl Reconciler for Recorder {
		async fn scan(&self, _domain: ResourceDomain, paths: Vec<PathBuf>) -> ReconcileReport {
			let imported = paths.len();
			self.scanned.lock().extend(paths);
			ReconcileReport {
				imported,
				..Default::default()
			}
		}

		async fn reconcile(&self, _domain: ResourceDomain, batch: WatchBatch) -> ReconcileReport {
			let imported = batch.added.len();
			self.batches.lock().push(batch);
			ReconcileReport {
				imported,
				..Default::default()
			}
		}
	}

	fn config() -> DomainWatchConfig {
		DomainWatchConfig {
			watch: true,
			debounce_window: Duration::from_millis(200),
			max_batch_size: 1024,
		}
	}

	async fn wait_for(mut condition: impl FnMut() -> bool) {
		tokio::time::timeout(Duration::from_secs(5), async {
			while !condition() {
				tokio::time::sleep(Duration::from_millis(25)).await;
			}
		})
		.await
		.unwrap();
	}

	#[tokio::test]
	async fn lists_only_importable_entries() {
		let dir = tempfile::tempdir().unwrap();
		for name in ["a.jar", "b.jar.disabled", ".hidden", "a.json", "c.zip"] {
			tokio::fs::write(dir.path().join(name), b"x").await.unwrap();
		}

		let paths = list_domain_dir(dir.path()).await.unwrap();
		assert_eq!(paths, vec![dir.path().join("a.jar"), dir.path().join("c.zip")]);
		assert!(list_domain_dir(&dir.path().join("missing")).await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn scans_before_ready() {
		let dir = tempfile::tempdir().unwrap();
		tokio::fs::write(dir.path().join("a.jar"), b"x").await.unwrap();

		let recorder = Arc::new(Recorder::default());
		let ready = ReadySignal::new();
		let watcher = DomainWatcher::mount(
			ResourceDomain::Mods,
			dir.path().to_path_buf(),
			PendingSet::new(),
			Arc::clone(&recorder) as Arc<dyn Reconciler>,
			ready.clone(),
			DomainWatchConfig {
				watch: false,
				..config()
			},
		)
		.await
		.unwrap();

		assert!(ready.is_ready());
		assert_eq!(*recorder.scanned.lock(), vec![dir.path().join("a.jar")]);
		assert!(!watcher.is_watching());
		watcher.stop().await;
	}

	#[tokio::test]
	async fn pending_writes_are_consumed() {
		let dir = tempfile::tempdir().unwrap();
		let pending = PendingSet::new();
		let recorder = Arc::new(Recorder::default());
		let watcher = DomainWatcher::mount(
			ResourceDomain::Mods,
			dir.path().to_path_buf(),
			pending.clone(),
			Arc::clone(&recorder) as Arc<dyn Reconciler>,
			ReadySignal::new(),
			config(),
		)
		.await
		.unwrap();

		let own = dir.path().join("own.jar");
		pending.register(&own);
		tokio::fs::write(&own, b"store").await.unwrap();
		pending.settle(&own);

		let external = dir.path().join("external.jar");
		tokio::fs::write(&external, b"user").await.unwrap();

		wait_for(|| !recorder.batches.lock().is_empty()).await;
		wait_for(|| watcher.metrics().pending_hits >= 1).await;

		let added = recorder
			.batches
			.lock()
			.iter()
			.flat_map(|batch| batch.added.clone())
			.collect::<Vec<_>>();
		assert_eq!(added, vec![external]);
		assert!(!pending.contains(&own));

		watcher.stop().await;
	}
}

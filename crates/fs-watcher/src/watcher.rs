use std::{
	path::{Path, PathBuf},
	pin::pin,
	sync::Arc,
	time::Duration,
};

use async_channel as chan;
use futures::StreamExt;
use futures_concurrency::stream::Merge;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{
	spawn,
	sync::mpsc,
	task::JoinHandle,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, instrument, trace, warn, Instrument};

use crate::{
	error::{Result, WatcherError},
	event::{FsEvent, RawNotifyEvent},
	platform::{BufferedHandler, EventHandler},
};

#[derive(Debug, Clone)]
pub struct WatcherConfig {
	/// Watch subdirectories as well. Resource folders are flat, so this is
	/// off by default.
	pub recursive: bool,
	/// How often held-back events are checked for stability.
	pub tick_interval: Duration,
	/// How long a path must stay quiet before its create/modify is released.
	pub stabilization: Duration,
	/// Capacity of the channel handed to the consumer.
	pub channel_capacity: usize,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			recursive: false,
			tick_interval: Duration::from_millis(100),
			stabilization: Duration::from_millis(100),
			channel_capacity: 1024,
		}
	}
}

/// Watches a single directory and forwards normalized events to a channel.
///
/// Dropping the watcher stops the backend and the forwarding task; the
/// receiving end then yields `None`.
pub struct FsWatcher {
	root: PathBuf,
	_watcher: RecommendedWatcher,
	handle: Option<JoinHandle<()>>,
	stop_tx: chan::Sender<()>,
}

impl FsWatcher {
	#[instrument(skip_all, fields(root = %root.as_ref().display()), err)]
	pub fn watch(
		root: impl AsRef<Path>,
		config: WatcherConfig,
	) -> Result<(Self, mpsc::Receiver<FsEvent>)> {
		let root = root.as_ref().to_path_buf();
		if !root.is_dir() {
			return Err(WatcherError::NotADirectory(root.into_boxed_path()));
		}

		let (events_tx, events_rx) = chan::unbounded();
		let (stop_tx, stop_rx) = chan::bounded(1);
		let (out_tx, out_rx) = mpsc::channel(config.channel_capacity.max(1));

		let mut watcher = RecommendedWatcher::new(
			move |result| {
				if !events_tx.is_closed() {
					// SAFETY: we are not blocking the thread as this is an unbounded channel
					if events_tx.send_blocking(result).is_err() {
						error!("Unable to forward file system event;");
					}
				}
			},
			Config::default(),
		)?;

		let mode = if config.recursive {
			RecursiveMode::Recursive
		} else {
			RecursiveMode::NonRecursive
		};
		watcher.watch(&root, mode)?;

		let handler = Arc::new(BufferedHandler::new(config.stabilization));
		let handle = spawn(
			Self::handle_watch_events(handler, config.tick_interval, events_rx, stop_rx, out_tx)
				.in_current_span(),
		);

		trace!("Now watching directory");

		Ok((
			Self {
				root,
				_watcher: watcher,
				handle: Some(handle),
				stop_tx,
			},
			out_rx,
		))
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Stops the forwarding task and waits for it to finish.
	pub async fn stop(mut self) {
		if let Some(handle) = self.handle.take() {
			if self.stop_tx.send(()).await.is_err() {
				trace!("Watcher task already gone");
			}
			if let Err(e) = handle.await {
				error!(?e, "Failed to join watcher task;");
			}
		}
	}

	async fn handle_watch_events(
		handler: Arc<impl EventHandler>,
		tick_interval: Duration,
		events_rx: chan::Receiver<notify::Result<Event>>,
		stop_rx: chan::Receiver<()>,
		out_tx: mpsc::Sender<FsEvent>,
	) {
		enum StreamMessage {
			NewEvent(notify::Result<Event>),
			Tick,
			Stop,
		}

		let mut handler_tick_interval = interval_at(Instant::now() + tick_interval, tick_interval);
		handler_tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		let mut msg_stream = pin!((
			events_rx.map(StreamMessage::NewEvent),
			IntervalStream::new(handler_tick_interval).map(|_| StreamMessage::Tick),
			stop_rx.map(|()| StreamMessage::Stop),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			let produced = match msg {
				StreamMessage::NewEvent(Ok(event)) => {
					handler.process(RawNotifyEvent::from_notify(event)).await
				}
				StreamMessage::NewEvent(Err(e)) => {
					error!(?e, "Watcher error;");
					continue;
				}
				StreamMessage::Tick => handler.tick().await,
				StreamMessage::Stop => {
					debug!("Stopping file system watcher");
					break;
				}
			};

			let events = match produced {
				Ok(events) => events,
				Err(e) => {
					warn!(?e, "Failed to handle file system event;");
					continue;
				}
			};

			for event in events.into_iter().filter(FsEvent::should_process) {
				trace!(?event, "Forwarding file system event");
				if out_tx.send(event).await.is_err() {
					debug!("Event receiver dropped, stopping watcher");
					handler.reset().await;
					return;
				}
			}
		}

		handler.reset().await;
	}
}

impl Drop for FsWatcher {
	fn drop(&mut self) {
		if self.handle.take().is_some() {
			// The task also exits on its own once the backend sender is dropped
			let _ = self.stop_tx.try_send(());
		}
	}
}

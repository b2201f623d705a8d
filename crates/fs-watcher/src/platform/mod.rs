//! Normalization of raw backend events.

use crate::{event::RawNotifyEvent, FsEvent, Result};

mod buffered;

pub(crate) use buffered::BufferedHandler;

/// Turns raw backend events into normalized [`FsEvent`]s.
///
/// `process` is called for every raw event, `tick` periodically so that a
/// handler holding events back can release them.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + 'static {
	async fn process(&self, event: RawNotifyEvent) -> Result<Vec<FsEvent>>;

	async fn tick(&self) -> Result<Vec<FsEvent>>;

	async fn reset(&self);
}

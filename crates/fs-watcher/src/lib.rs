//! Platform-agnostic filesystem watcher.
//!
//! Wraps `notify` and turns the raw, platform-flavoured events into a small
//! normalized vocabulary ([`FsEvent`]): create, modify, remove and rename.
//! Creates and modifies are held back until the file stops changing so that
//! consumers never look at a half-written file, and sidecar/temporary files
//! are filtered out before they reach the consumer.

mod error;
mod event;
mod platform;
mod watcher;

pub use error::{Result, WatcherError};
pub use event::{is_ignored_path, FsEvent, FsEventKind, RawEventKind, RawNotifyEvent};
pub use platform::EventHandler;
pub use watcher::{FsWatcher, WatcherConfig};

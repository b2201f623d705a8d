//! Content-addressable resource store of a game launcher.
//!
//! Mods, resource packs, shader packs, saves and modpacks are identified by
//! the SHA-1 of their bytes, stored once under `<root>/<domain>/`, indexed by
//! hash, inode, path and alternate uri, and projected into instance
//! directories on demand. [`ResourceManager`] ties the pieces together.

pub mod config;
pub mod deploy;
pub mod error;
pub mod identify;
pub mod index;
pub mod logging;
pub mod manager;
pub mod parser;
pub mod resource;
pub mod store;
pub mod watcher;

pub use config::ResourceConfig;
pub use deploy::{DeployAction, DeployReport};
pub use error::{Error, FileIOError, Result};
pub use index::IndexKey;
pub use manager::{ImportOptions, ResourceEvent, ResourceManager, ResourcePatch};
pub use resource::{ContentHash, Resource, ResourceDomain, ResourceType, SourceInfo};

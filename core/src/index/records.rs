//! Durable resource records, one per hash, in a redb database.
//!
//! The records only exist to survive restarts; the filesystem scan and the
//! watcher decide what is current.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::{trace, warn};

use crate::resource::{ContentHash, Resource};

const RESOURCES_TABLE: TableDefinition<'_, &str, &[u8]> = TableDefinition::new("resources");

#[derive(Error, Debug)]
pub enum RecordStoreError {
	#[error("failed to open record database: {0}")]
	Database(#[from] redb::DatabaseError),
	#[error("record transaction failed: {0}")]
	Transaction(#[from] redb::TransactionError),
	#[error("record table unavailable: {0}")]
	Table(#[from] redb::TableError),
	#[error("record storage failed: {0}")]
	Storage(#[from] redb::StorageError),
	#[error("failed to commit records: {0}")]
	Commit(#[from] redb::CommitError),
	#[error("malformed resource record: {0}")]
	Serde(#[from] serde_json::Error),
	#[error("record task failed: {0}")]
	Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct RecordStore {
	db: Arc<Database>,
}

impl RecordStore {
	pub fn open(path: impl AsRef<Path>) -> Result<Self, RecordStoreError> {
		let db = Database::create(path.as_ref())?;

		let txn = db.begin_write()?;
		{
			txn.open_table(RESOURCES_TABLE)?;
		}
		txn.commit()?;

		Ok(Self { db: Arc::new(db) })
	}

	pub fn put_blocking(&self, resources: &[Resource]) -> Result<(), RecordStoreError> {
		let encoded = resources
			.iter()
			.map(|resource| Ok((resource.hash.as_str(), serde_json::to_vec(resource)?)))
			.collect::<Result<Vec<_>, serde_json::Error>>()?;

		let txn = self.db.begin_write()?;
		{
			let mut table = txn.open_table(RESOURCES_TABLE)?;
			for (hash, bytes) in &encoded {
				table.insert(*hash, bytes.as_slice())?;
			}
		}
		txn.commit()?;

		trace!(count = resources.len(), "Wrote resource records");
		Ok(())
	}

	pub fn remove_blocking(&self, hashes: &[ContentHash]) -> Result<(), RecordStoreError> {
		let txn = self.db.begin_write()?;
		{
			let mut table = txn.open_table(RESOURCES_TABLE)?;
			for hash in hashes {
				table.remove(hash.as_str())?;
			}
		}
		txn.commit()?;

		Ok(())
	}

	pub fn get_blocking(&self, hash: &ContentHash) -> Result<Option<Resource>, RecordStoreError> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(RESOURCES_TABLE)?;
		let Some(value) = table.get(hash.as_str())? else {
			return Ok(None);
		};
		Ok(Some(serde_json::from_slice(value.value())?))
	}

	/// Every record that still decodes. Undecodable records are skipped with
	/// a warning so one bad row does not take the whole store down.
	pub fn all_blocking(&self) -> Result<Vec<Resource>, RecordStoreError> {
		let txn = self.db.begin_read()?;
		let table = txn.open_table(RESOURCES_TABLE)?;

		let mut resources = Vec::new();
		for entry in table.iter()? {
			let (key, value) = entry?;
			match serde_json::from_slice::<Resource>(value.value()) {
				Ok(resource) => resources.push(resource),
				Err(e) => warn!(hash = key.value(), ?e, "Skipping malformed resource record;"),
			}
		}

		Ok(resources)
	}

	pub async fn put(&self, resources: Vec<Resource>) -> Result<(), RecordStoreError> {
		if resources.is_empty() {
			return Ok(());
		}
		let store = self.clone();
		tokio::task::spawn_blocking(move || store.put_blocking(&resources)).await?
	}

	pub async fn remove(&self, hashes: Vec<ContentHash>) -> Result<(), RecordStoreError> {
		if hashes.is_empty() {
			return Ok(());
		}
		let store = self.clone();
		tokio::task::spawn_blocking(move || store.remove_blocking(&hashes)).await?
	}

	pub async fn get(&self, hash: ContentHash) -> Result<Option<Resource>, RecordStoreError> {
		let store = self.clone();
		tokio::task::spawn_blocking(move || store.get_blocking(&hash)).await?
	}

	pub async fn all(&self) -> Result<Vec<Resource>, RecordStoreError> {
		let store = self.clone();
		tokio::task::spawn_blocking(move || store.all_blocking()).await?
	}
}

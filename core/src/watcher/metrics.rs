//! Counters for the domain watchers

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct WatcherMetrics {
	pub events_received: AtomicU64,
	pub events_coalesced: AtomicU64,
	pub batches_processed: AtomicU64,
	/// Events for paths the store itself just wrote
	pub pending_hits: AtomicU64,
	pub imports: AtomicU64,
	pub updates: AtomicU64,
	pub removals: AtomicU64,
	pub failures: AtomicU64,
}

/// Point-in-time copy of [`WatcherMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
	pub events_received: u64,
	pub events_coalesced: u64,
	pub batches_processed: u64,
	pub pending_hits: u64,
	pub imports: u64,
	pub updates: u64,
	pub removals: u64,
	pub failures: u64,
}

impl WatcherMetrics {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record_event(&self) {
		self.events_received.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_coalesced(&self, count: u64) {
		self.events_coalesced.fetch_add(count, Ordering::Relaxed);
	}

	pub fn record_pending_hit(&self) {
		self.pending_hits.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_batch(&self, report: &ReconcileReport) {
		self.batches_processed.fetch_add(1, Ordering::Relaxed);
		self.imports
			.fetch_add(report.imported as u64, Ordering::Relaxed);
		self.updates
			.fetch_add(report.updated as u64, Ordering::Relaxed);
		self.removals
			.fetch_add(report.removed as u64, Ordering::Relaxed);
		self.failures
			.fetch_add(report.failed as u64, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			events_received: self.events_received.load(Ordering::Relaxed),
			events_coalesced: self.events_coalesced.load(Ordering::Relaxed),
			batches_processed: self.batches_processed.load(Ordering::Relaxed),
			pending_hits: self.pending_hits.load(Ordering::Relaxed),
			imports: self.imports.load(Ordering::Relaxed),
			updates: self.updates.load(Ordering::Relaxed),
			removals: self.removals.load(Ordering::Relaxed),
			failures: self.failures.load(Ordering::Relaxed),
		}
	}
}

/// What a reconciler did with one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
	pub imported: usize,
	pub updated: usize,
	pub removed: usize,
	pub ignored: usize,
	pub failed: usize,
}

impl ReconcileReport {
	pub fn merge(&mut self, other: ReconcileReport) {
		self.imported += other.imported;
		self.updated += other.updated;
		self.removed += other.removed;
		self.ignored += other.ignored;
		self.failed += other.failed;
	}
}

//! The resource manager: the one entry point collaborators talk to.
//!
//! Everything is wired once in [`ResourceManager::open`]. Imports from
//! callers and changes reported by the domain watchers both end up in
//! [`Inner::import_paths`], which consults the index before hashing and only
//! persists genuine misses. Index and record store are written before any
//! [`ResourceEvent`] is sent.

use std::{
	collections::{BTreeMap, BTreeSet, HashMap, HashSet},
	path::{Path, PathBuf},
	sync::Arc,
};

use chrono::Utc;
use futures::{stream, StreamExt};
use futures_concurrency::future::Join;
use tokio::{
	sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard},
	task::JoinHandle,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::{
	config::ResourceConfig,
	deploy::{DeployReport, Deployer},
	error::{Error, Result},
	identify::{Classified, Classifier, ResolveContext},
	index::{IndexKey, RecordStore, ResourceIndex},
	parser::ParserRegistry,
	resource::{ContentHash, Resource, ResourceDomain, SourceInfo},
	store::{exists, remove_file_if_exists, ContentStore, PendingSet, PersistOp, Persisted},
	watcher::{
		DomainWatchConfig, DomainWatcher, MetricsSnapshot, ReadySignal, ReconcileReport,
		Reconciler, WatchBatch, WatchState,
	},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State changes, sent after index and record store were updated.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
	Added(Vec<Resource>),
	Updated(Vec<Resource>),
	Removed(Vec<(ContentHash, ResourceDomain)>),
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
	/// Restricts the import to one domain; anything else is a
	/// [`Error::DomainMismatch`].
	pub domain: Option<ResourceDomain>,
	/// Best effort: failures are logged and counted instead of returned.
	pub background: bool,
	/// Paths that do not exist (anymore) are skipped silently.
	pub optional: bool,
	/// Remote origin known to the caller, e.g. the download pipeline.
	pub source: SourceInfo,
	pub uris: Vec<String>,
	pub tags: BTreeSet<String>,
	/// Icon references already stored in the image store.
	pub icons: Vec<String>,
	/// Hashes the caller already knows per path, e.g. published by the
	/// download source. A hinted hash that is indexed resolves the path
	/// without reading it.
	pub hashes: HashMap<PathBuf, ContentHash>,
}

impl ImportOptions {
	pub fn in_domain(domain: ResourceDomain) -> Self {
		Self {
			domain: Some(domain),
			..Default::default()
		}
	}

	fn carries_metadata(&self) -> bool {
		!self.source.is_empty()
			|| !self.uris.is_empty()
			|| !self.tags.is_empty()
			|| !self.icons.is_empty()
	}
}

/// Changes applied by [`ResourceManager::update`]. Unset fields are left
/// alone.
#[derive(Debug, Clone)]
pub struct ResourcePatch {
	pub hash: ContentHash,
	pub name: Option<String>,
	/// Replaces the tag set.
	pub tags: Option<BTreeSet<String>>,
	/// Added to the existing uris.
	pub uris: Vec<String>,
	/// Merged into the existing source information.
	pub source: Option<SourceInfo>,
}

impl ResourcePatch {
	pub fn new(hash: ContentHash) -> Self {
		Self {
			hash,
			name: None,
			tags: None,
			uris: Vec::new(),
			source: None,
		}
	}
}

#[derive(Debug)]
enum Imported {
	New(Resource),
	Existing { resource: Resource, enriched: bool },
}

#[derive(Debug, Default)]
struct ImportSummary {
	added: Vec<Resource>,
	updated: Vec<Resource>,
	resolved: Vec<Resource>,
	unknown: usize,
	existing: usize,
	skipped: usize,
	errors: Vec<Error>,
}

impl ImportSummary {
	fn log(&self) {
		info!(
			imported = self.added.len() - self.unknown,
			existing = self.existing,
			unknown = self.unknown,
			skipped = self.skipped,
			failed = self.errors.len(),
			"Import finished",
		);
	}
}

/// Serializes work on one hash so two paths with the same bytes cannot both
/// be persisted.
#[derive(Default)]
struct HashLocks {
	locks: parking_lot::Mutex<HashMap<ContentHash, Arc<AsyncMutex<()>>>>,
}

impl HashLocks {
	async fn lock(&self, hash: &ContentHash) -> OwnedMutexGuard<()> {
		let lock = {
			let mut locks = self.locks.lock();
			locks.retain(|_, lock| Arc::strong_count(lock) > 1);
			Arc::clone(locks.entry(hash.clone()).or_default())
		};
		lock.lock_owned().await
	}
}

struct Inner {
	config: ResourceConfig,
	index: Arc<ResourceIndex>,
	records: RecordStore,
	store: ContentStore,
	classifier: Classifier,
	deployer: Deployer,
	ready: BTreeMap<ResourceDomain, ReadySignal>,
	events: broadcast::Sender<ResourceEvent>,
	hash_locks: HashLocks,
}

pub struct ResourceManager {
	inner: Arc<Inner>,
	watchers: Arc<AsyncMutex<Vec<DomainWatcher>>>,
	mount_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl ResourceManager {
	/// Opens the store under `config.root`.
	///
	/// Records are loaded into the index before anything else; records whose
	/// canonical file vanished while the launcher was closed are dropped.
	/// Domains are then scanned (and watched) concurrently in the background,
	/// use [`Self::when_ready`] to wait for one.
	#[instrument(skip_all, fields(root = %config.root.display()), err)]
	pub async fn open(config: ResourceConfig) -> Result<Self> {
		Self::open_with_registry(config, ParserRegistry::default()).await
	}

	pub async fn open_with_registry(
		config: ResourceConfig,
		registry: ParserRegistry,
	) -> Result<Self> {
		let store = ContentStore::new(
			&config.root,
			config.images_dir(),
			PendingSet::new(),
			config.link_timeout(),
		);
		store.ensure_layout().await?;

		let records_path = config.records_path();
		let records =
			tokio::task::spawn_blocking(move || RecordStore::open(records_path)).await??;

		let index = Arc::new(ResourceIndex::new());
		let mut drifted = Vec::new();
		let mut loaded = Vec::new();
		for resource in records.all().await? {
			if exists(resource.location()).await? {
				loaded.push(resource);
			} else {
				warn!(
					hash = %resource.hash,
					path = %resource.location().display(),
					"Canonical file disappeared while closed, dropping record;"
				);
				drifted.push(resource.hash);
			}
		}
		if !drifted.is_empty() {
			records.remove(drifted).await?;
		}
		info!(count = loaded.len(), "Loaded resource records");
		index.put_all(loaded);

		let ready = ResourceDomain::all()
			.map(|domain| (domain, ReadySignal::new()))
			.collect::<BTreeMap<_, _>>();
		if let Some(signal) = ready.get(&ResourceDomain::Unclassified) {
			// Never scanned; there is nothing to wait for
			signal.set(WatchState::Ready);
		}

		let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
		let inner = Arc::new(Inner {
			classifier: Classifier::new(Arc::new(registry), Arc::clone(&index)),
			deployer: Deployer::new(config.link_timeout()),
			index,
			records,
			store,
			ready,
			events,
			hash_locks: HashLocks::default(),
			config,
		});

		let watchers = Arc::new(AsyncMutex::new(Vec::new()));
		let mount_task = tokio::spawn(Self::mount_domains(
			Arc::clone(&inner),
			Arc::clone(&watchers),
		));

		Ok(Self {
			inner,
			watchers,
			mount_task: parking_lot::Mutex::new(Some(mount_task)),
		})
	}

	async fn mount_domains(inner: Arc<Inner>, watchers: Arc<AsyncMutex<Vec<DomainWatcher>>>) {
		let config = DomainWatchConfig {
			watch: inner.config.watch,
			debounce_window: inner.config.debounce_window(),
			max_batch_size: inner.config.max_batch_size,
		};

		let mounted = ResourceDomain::all()
			.filter(ResourceDomain::is_classified)
			.map(|domain| {
				let inner = Arc::clone(&inner);
				let config = config.clone();
				async move {
					let ready = inner.ready_signal(domain);
					let result = DomainWatcher::mount(
						domain,
						inner.store.domain_dir(domain),
						inner.store.pending().clone(),
						Arc::clone(&inner) as Arc<dyn Reconciler>,
						ready.clone(),
						config,
					)
					.await;
					if let Err(e) = &result {
						error!(%domain, ?e, "Failed to mount domain;");
						// Waiters must not hang on a domain that will never scan
						ready.set(WatchState::Ready);
					}
					result.ok()
				}
			})
			.collect::<Vec<_>>()
			.join()
			.await;

		watchers.lock().await.extend(mounted.into_iter().flatten());
	}

	/// Resolves when the initial scan of `domain` finished.
	pub async fn when_ready(&self, domain: ResourceDomain) {
		self.inner.when_ready(domain).await
	}

	pub fn is_ready(&self, domain: ResourceDomain) -> bool {
		self.inner.ready_signal(domain).is_ready()
	}

	pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
		self.inner.events.subscribe()
	}

	pub fn config(&self) -> &ResourceConfig {
		&self.inner.config
	}

	pub fn store(&self) -> &ContentStore {
		&self.inner.store
	}

	/// Classifies paths without persisting anything. Unknown files come back
	/// as transient resources.
	#[instrument(skip_all, fields(count = paths.len()), err)]
	pub async fn resolve(&self, paths: &[PathBuf]) -> Result<Vec<Resource>> {
		let context = ResolveContext::new();
		let results = stream::iter(dedup_paths(paths))
			.map(|path| {
				let context = &context;
				async move {
					self.inner
						.classifier
						.classify(&path, None, context)
						.await
						.map(Classified::into_resource)
				}
			})
			.buffered(self.inner.config.import_concurrency.max(1))
			.collect::<Vec<_>>()
			.await;

		results.into_iter().collect()
	}

	/// Imports files into the store.
	///
	/// Byte-identical files resolve to the already stored resource; only the
	/// first copy of some content is ever persisted.
	#[instrument(skip_all, fields(count = paths.len(), domain = ?options.domain), err)]
	pub async fn import(&self, paths: &[PathBuf], options: ImportOptions) -> Result<Vec<Resource>> {
		let summary = self.inner.import_paths(dedup_paths(paths), &options).await;
		summary.log();
		self.inner.notify_imported(&summary);

		if !options.background {
			if let Some(e) = summary.errors.into_iter().next() {
				return Err(e);
			}
		} else {
			for e in &summary.errors {
				warn!(?e, "Background import failed for one resource;");
			}
		}

		Ok(summary.resolved)
	}

	/// Deletes resources, their records and canonical files.
	///
	/// Byte-identical duplicates inside the resource's domain directory are
	/// deleted too, so the store does not pick them up again.
	#[instrument(skip_all, fields(count = keys.len()), err)]
	pub async fn remove(&self, keys: &[IndexKey]) -> Result<Vec<Resource>> {
		let resources = self.inner.lookup_all(keys)?;
		let duplicates = resources
			.iter()
			.flat_map(|resource| self.inner.domain_aliases(resource))
			.collect::<Vec<_>>();

		let removed = self.inner.remove_resources(resources).await?;
		for duplicate in duplicates {
			if remove_file_if_exists(&duplicate).await? {
				debug!(path = %duplicate.display(), "Deleted duplicate of removed resource");
			}
		}
		Ok(removed)
	}

	/// Applies metadata patches; the hash of a resource never changes.
	#[instrument(skip_all, fields(count = patches.len()), err)]
	pub async fn update(&self, patches: Vec<ResourcePatch>) -> Result<Vec<Resource>> {
		let mut updated = Vec::with_capacity(patches.len());
		for patch in patches {
			let mut resource = self
				.inner
				.index
				.get(&IndexKey::Hash(patch.hash.clone()))
				.ok_or_else(|| Error::NotFound {
					key: patch.hash.to_string(),
				})?;
			apply_patch(&mut resource, patch);
			updated.push(resource);
		}

		self.inner.write_through(&updated).await?;
		self.inner.send(ResourceEvent::Updated(updated.clone()));
		Ok(updated)
	}

	/// Looks up by hash, dropping the resource if its canonical file is gone.
	pub async fn get_by_hash(&self, hash: &ContentHash) -> Result<Option<Resource>> {
		match self.inner.index.get(&IndexKey::Hash(hash.clone())) {
			Some(resource) => self.inner.check_drift(resource).await,
			None => Ok(None),
		}
	}

	pub async fn get_by_hashes(&self, hashes: &[ContentHash]) -> Result<Vec<Resource>> {
		let mut found = Vec::with_capacity(hashes.len());
		for hash in hashes {
			if let Some(resource) = self.get_by_hash(hash).await? {
				found.push(resource);
			}
		}
		Ok(found)
	}

	pub fn get_by_uri(&self, uri: &str) -> Option<Resource> {
		self.inner.index.get(&IndexKey::Uri(uri.to_string()))
	}

	pub fn get_by_uris<'a>(&self, uris: impl IntoIterator<Item = &'a str>) -> Vec<Resource> {
		let keys = uris
			.into_iter()
			.map(|uri| IndexKey::Uri(uri.to_string()))
			.collect::<Vec<_>>();
		self.inner.index.get_many(&keys)
	}

	pub fn get_by_ino(&self, ino: u64) -> Option<Resource> {
		self.inner.index.get(&IndexKey::Ino(ino))
	}

	pub fn get_by_path(&self, path: &Path) -> Option<Resource> {
		self.inner.index.get(&IndexKey::Path(path.to_path_buf()))
	}

	pub fn get(&self, key: &IndexKey) -> Option<Resource> {
		self.inner.index.get(key)
	}

	/// Every resource of a domain, once its initial scan finished.
	pub async fn list(&self, domain: ResourceDomain) -> Vec<Resource> {
		self.when_ready(domain).await;
		let mut resources = self.inner.index.by_domain(domain);
		resources.sort_by(|a, b| a.file_name.cmp(&b.file_name));
		resources
	}

	/// Case-insensitive match on file name, display name and parsed names.
	pub fn search(&self, keyword: &str, domain: Option<ResourceDomain>) -> Vec<Resource> {
		let keyword = keyword.to_lowercase();
		let mut found = self
			.inner
			.index
			.all()
			.into_iter()
			.filter(|resource| domain.map_or(true, |domain| resource.domain == domain))
			.filter(|resource| {
				resource.file_name.to_lowercase().contains(&keyword)
					|| resource.name.to_lowercase().contains(&keyword)
					|| resource.metadata.parsed.values().any(|metadata| {
						metadata
							.display_names()
							.iter()
							.any(|name| name.to_lowercase().contains(&keyword))
					})
			})
			.collect::<Vec<_>>();
		found.sort_by(|a, b| a.file_name.cmp(&b.file_name));
		found
	}

	/// Copies canonical files into `target_dir`, never replacing existing
	/// files. Returns the paths that were written.
	#[instrument(skip_all, fields(target = %target_dir.display()), err)]
	pub async fn export(&self, hashes: &[ContentHash], target_dir: &Path) -> Result<Vec<PathBuf>> {
		let keys = hashes.iter().cloned().map(IndexKey::Hash).collect::<Vec<_>>();
		let resources = self.inner.lookup_all(&keys)?;

		tokio::fs::create_dir_all(target_dir).await.map_err(|e| {
			crate::error::FileIOError::from((target_dir, e, "create export directory"))
		})?;

		let mut written = Vec::new();
		for resource in resources {
			let Some(resource) = self.inner.check_drift(resource).await? else {
				continue;
			};
			let dest = target_dir.join(&resource.file_name);
			if exists(&dest).await? {
				debug!(dest = %dest.display(), "Export target exists, skipping");
				continue;
			}
			tokio::fs::copy(resource.location(), &dest)
				.await
				.map_err(|e| crate::error::FileIOError::from((&dest, e, "export resource")))?;
			written.push(dest);
		}
		Ok(written)
	}

	pub async fn install(&self, resources: &[Resource], instance: &Path) -> Result<Vec<DeployReport>> {
		let resources = self.inner.deployable(resources).await?;
		Ok(self.inner.deployer.install(&resources, instance).await?)
	}

	pub async fn uninstall(
		&self,
		resources: &[Resource],
		instance: &Path,
	) -> Result<Vec<DeployReport>> {
		self.inner.wait_domains(resources).await;
		Ok(self.inner.deployer.uninstall(resources, instance).await?)
	}

	pub async fn enable(&self, resources: &[Resource], instance: &Path) -> Result<Vec<DeployReport>> {
		self.inner.wait_domains(resources).await;
		Ok(self.inner.deployer.enable(resources, instance).await?)
	}

	pub async fn disable(&self, resources: &[Resource], instance: &Path) -> Result<Vec<DeployReport>> {
		self.inner.wait_domains(resources).await;
		Ok(self.inner.deployer.disable(resources, instance).await?)
	}

	pub async fn watcher_metrics(&self) -> Vec<(ResourceDomain, MetricsSnapshot)> {
		self.watchers
			.lock()
			.await
			.iter()
			.map(|watcher| (watcher.domain(), watcher.metrics()))
			.collect()
	}

	/// Stops every domain watcher and waits for them to finish.
	pub async fn shutdown(&self) {
		let mount_task = self.mount_task.lock().take();
		if let Some(task) = mount_task {
			if let Err(e) = task.await {
				error!(?e, "Domain mount task failed;");
			}
		}

		let watchers = std::mem::take(&mut *self.watchers.lock().await);
		watchers
			.into_iter()
			.map(DomainWatcher::stop)
			.collect::<Vec<_>>()
			.join()
			.await;
		info!("Resource manager shutdown");
	}
}

impl Inner {
	fn ready_signal(&self, domain: ResourceDomain) -> ReadySignal {
		self.ready.get(&domain).cloned().unwrap_or_default()
	}

	async fn when_ready(&self, domain: ResourceDomain) {
		if let Some(signal) = self.ready.get(&domain) {
			signal.wait_ready().await;
		}
	}

	async fn wait_domains(&self, resources: &[Resource]) {
		let domains = resources
			.iter()
			.map(|resource| resource.domain)
			.collect::<BTreeSet<_>>();
		for domain in domains {
			self.when_ready(domain).await;
		}
	}

	fn send(&self, event: ResourceEvent) {
		if self.events.send(event).is_err() {
			trace!("No event subscribers");
		}
	}

	fn notify_imported(&self, summary: &ImportSummary) {
		if !summary.added.is_empty() {
			self.send(ResourceEvent::Added(summary.added.clone()));
		}
		if !summary.updated.is_empty() {
			self.send(ResourceEvent::Updated(summary.updated.clone()));
		}
	}

	fn lookup_all(&self, keys: &[IndexKey]) -> Result<Vec<Resource>> {
		let mut seen = HashSet::new();
		let mut resources = Vec::with_capacity(keys.len());
		for key in keys {
			let resource = self
				.index
				.get(key)
				.ok_or_else(|| Error::NotFound { key: key.to_string() })?;
			if seen.insert(resource.hash.clone()) {
				resources.push(resource);
			}
		}
		Ok(resources)
	}

	/// Record store first, then index.
	async fn write_through(&self, resources: &[Resource]) -> Result<()> {
		if resources.is_empty() {
			return Ok(());
		}
		self.records.put(resources.to_vec()).await?;
		for resource in resources {
			self.index.put(resource.clone());
		}
		Ok(())
	}

	async fn remove_resources(&self, resources: Vec<Resource>) -> Result<Vec<Resource>> {
		if resources.is_empty() {
			return Ok(resources);
		}

		for resource in &resources {
			self.index.discard(&resource.hash);
		}
		self.records
			.remove(resources.iter().map(|r| r.hash.clone()).collect())
			.await?;
		for resource in &resources {
			if self.store.delete(resource).await? {
				debug!(hash = %resource.hash, "Deleted canonical file");
			}
		}

		self.send(ResourceEvent::Removed(
			resources
				.iter()
				.map(|r| (r.hash.clone(), r.domain))
				.collect(),
		));
		Ok(resources)
	}

	/// Drops a resource whose canonical file no longer exists. A duplicate
	/// left in the domain directory takes its place if there is one.
	async fn check_drift(&self, resource: Resource) -> Result<Option<Resource>> {
		if !resource.is_persisted() || exists(resource.location()).await? {
			return Ok(Some(resource));
		}
		warn!(
			hash = %resource.hash,
			path = %resource.location().display(),
			"Canonical file is missing, dropping stale record;"
		);
		let survivors = self.domain_aliases(&resource);
		let domain = resource.domain;
		self.remove_resources(vec![resource]).await?;

		if survivors.is_empty() {
			return Ok(None);
		}
		let promoted = self.import_paths(survivors, &background_in(domain)).await;
		self.notify_imported(&promoted);
		Ok(promoted.resolved.into_iter().next())
	}

	/// Alias paths of `resource` inside its own domain directory, i.e.
	/// duplicates a user dropped next to the canonical file.
	fn domain_aliases(&self, resource: &Resource) -> Vec<PathBuf> {
		let dir = self.store.domain_dir(resource.domain);
		self.index
			.aliases(&resource.hash)
			.into_iter()
			.filter(|alias| alias.parent() == Some(dir.as_path()))
			.collect()
	}

	/// Fresh, on-disk versions of resources about to be installed.
	async fn deployable(&self, resources: &[Resource]) -> Result<Vec<Resource>> {
		self.wait_domains(resources).await;

		let mut fresh = Vec::with_capacity(resources.len());
		for resource in resources {
			let current = self
				.index
				.get(&IndexKey::Hash(resource.hash.clone()))
				.unwrap_or_else(|| resource.clone());
			let location = current.location().to_path_buf();
			match self.check_drift(current).await? {
				Some(current) => fresh.push(current),
				None => {
					return Err(Error::FilesystemDrift {
						hash: resource.hash.clone(),
						path: location.into_boxed_path(),
					})
				}
			}
		}
		Ok(fresh)
	}

	async fn import_paths(&self, paths: Vec<PathBuf>, options: &ImportOptions) -> ImportSummary {
		let context = ResolveContext::new();
		for (path, hash) in &options.hashes {
			context.set_hash_hint(path, hash.clone());
		}
		let results = stream::iter(paths)
			.map(|path| {
				let context = &context;
				async move {
					let result = self.import_one(&path, options, context).await;
					(path, result)
				}
			})
			.buffered(self.config.import_concurrency.max(1))
			.collect::<Vec<_>>()
			.await;

		let mut summary = ImportSummary::default();
		let mut seen = HashSet::new();
		for (path, result) in results {
			match result {
				Ok(Imported::New(resource)) => {
					if !resource.domain.is_classified() {
						summary.unknown += 1;
					}
					seen.insert(resource.hash.clone());
					summary.resolved.push(resource.clone());
					summary.added.push(resource);
				}
				Ok(Imported::Existing { resource, enriched }) => {
					summary.existing += 1;
					if seen.insert(resource.hash.clone()) {
						if enriched {
							summary.updated.push(resource.clone());
						}
						summary.resolved.push(resource);
					}
				}
				Err(Error::FileIO(e)) if options.optional && e.is_not_found() => {
					trace!(path = %path.display(), "Optional path is gone, skipping");
					summary.skipped += 1;
				}
				Err(e) => {
					debug!(path = %path.display(), ?e, "Failed to import resource;");
					summary.errors.push(e);
				}
			}
		}

		summary
	}

	async fn import_one(
		&self,
		path: &Path,
		options: &ImportOptions,
		context: &ResolveContext,
	) -> Result<Imported> {
		match self.classifier.classify(path, options.domain, context).await? {
			Classified::Known(known) => self.import_known(known, path, options).await,

			Classified::New { resource, icon } => {
				if let Some(expected) = options.domain {
					if resource.domain != expected {
						return Err(Error::DomainMismatch {
							expected,
							found: resource.domain,
						});
					}
				}

				let _guard = self.hash_locks.lock(&resource.hash).await;
				// Another path with the same bytes may have won the race
				if let Some(known) = self.index.get(&IndexKey::Hash(resource.hash.clone())) {
					return self.import_known(known, path, options).await;
				}

				let Persisted { mut resource, op } = self.store.persist(resource, context).await?;

				if let Some(icon) = icon {
					match self.store.images().add(&icon).await {
						Ok(reference) => resource.icons.push(reference),
						Err(e) => warn!(hash = %resource.hash, ?e, "Failed to store resource icon;"),
					}
				}
				enrich(&mut resource, options);

				self.write_through(std::slice::from_ref(&resource)).await?;
				if op != PersistOp::Renamed && resource.location() != path {
					self.index.alias_path(&resource.hash, path);
				}

				debug!(hash = %resource.hash, ?op, domain = %resource.domain, "Imported resource");
				Ok(Imported::New(resource))
			}
		}
	}

	async fn import_known(
		&self,
		mut known: Resource,
		path: &Path,
		options: &ImportOptions,
	) -> Result<Imported> {
		if let Some(expected) = options.domain {
			if known.domain != expected {
				return Err(Error::DomainMismatch {
					expected,
					found: known.domain,
				});
			}
		}

		if known.location() != path {
			trace!(hash = %known.hash, path = %path.display(), "Duplicate of a stored resource");
			self.index.alias_path(&known.hash, path);
		}

		let enriched = options.carries_metadata() && enrich(&mut known, options);
		if enriched {
			known.updated_at = Utc::now();
			self.write_through(std::slice::from_ref(&known)).await?;
		}

		Ok(Imported::Existing {
			resource: known,
			enriched,
		})
	}

	/// A stored file changed in place. Same bytes are a no-op, new bytes
	/// replace the old resource.
	async fn reimport_changed(
		&self,
		previous: Resource,
		domain: ResourceDomain,
		report: &mut ReconcileReport,
		summary: &mut ImportSummary,
		removed: &mut Vec<(ContentHash, ResourceDomain)>,
	) {
		let digest = match self.store.rehash(&previous).await {
			Ok(digest) => digest,
			Err(e) => {
				warn!(path = %previous.location().display(), ?e, "Failed to rehash changed file;");
				report.failed += 1;
				return;
			}
		};
		if digest.hash == previous.hash {
			report.ignored += 1;
			return;
		}

		let path = previous.location().to_path_buf();
		// Duplicates still hold the old bytes and keep the old resource alive
		let survivors = self.domain_aliases(&previous);
		if let Err(e) = self.forget(&previous).await {
			warn!(hash = %previous.hash, ?e, "Failed to drop replaced resource;");
			report.failed += 1;
			return;
		}
		removed.push((previous.hash.clone(), previous.domain));

		let replaced = self
			.import_paths(
				std::iter::once(path).chain(survivors).collect(),
				&background_in(domain),
			)
			.await;
		report.failed += replaced.errors.len();
		report.updated += replaced.added.len();
		summary.added.extend(replaced.added);
	}

	/// Index and record removal without touching the file.
	async fn forget(&self, resource: &Resource) -> Result<()> {
		self.index.discard(&resource.hash);
		self.records.remove(vec![resource.hash.clone()]).await?;
		Ok(())
	}
}

#[async_trait::async_trait]
impl Reconciler for Inner {
	async fn scan(&self, domain: ResourceDomain, paths: Vec<PathBuf>) -> ReconcileReport {
		let summary = self.import_paths(paths, &background_in(domain)).await;
		summary.log();
		for e in &summary.errors {
			warn!(%domain, ?e, "Failed to import file found by scan;");
		}
		self.notify_imported(&summary);

		ReconcileReport {
			imported: summary.added.len(),
			ignored: summary.existing + summary.skipped,
			failed: summary.errors.len(),
			..Default::default()
		}
	}

	#[instrument(skip_all, fields(%domain, paths = batch.len()))]
	async fn reconcile(&self, domain: ResourceDomain, batch: WatchBatch) -> ReconcileReport {
		let mut report = ReconcileReport::default();
		let mut summary = ImportSummary::default();
		let mut removed = Vec::new();

		let mut to_import = Vec::new();
		for path in &batch.removed {
			if let Some(resource) = self.index.primary_at(path) {
				let survivors = self.domain_aliases(&resource);
				match self.forget(&resource).await {
					Ok(()) => {
						report.removed += 1;
						removed.push((resource.hash, resource.domain));
						if !survivors.is_empty() {
							debug!(path = %path.display(), "Promoting duplicate of removed resource");
							to_import.extend(survivors);
						}
					}
					Err(e) => {
						warn!(path = %path.display(), ?e, "Failed to drop removed resource;");
						report.failed += 1;
					}
				}
			} else if self.index.remove_alias(path).is_some() {
				trace!(path = %path.display(), "Dropped alias of removed duplicate");
			} else {
				report.ignored += 1;
			}
		}

		for path in &batch.changed {
			match self.index.primary_at(path) {
				Some(previous) => {
					self.reimport_changed(previous, domain, &mut report, &mut summary, &mut removed)
						.await
				}
				None => to_import.push(path.clone()),
			}
		}
		for path in &batch.added {
			if self.index.primary_at(path).is_some() {
				report.ignored += 1;
			} else {
				to_import.push(path.clone());
			}
		}

		if !to_import.is_empty() {
			let imported = self
				.import_paths(dedup_paths(&to_import), &background_in(domain))
				.await;
			for e in &imported.errors {
				warn!(?e, "Failed to import watched file;");
			}
			report.imported += imported.added.len();
			report.ignored += imported.existing + imported.skipped;
			report.failed += imported.errors.len();
			summary.added.extend(imported.added);
			summary.updated.extend(imported.updated);
		}

		if !removed.is_empty() {
			self.send(ResourceEvent::Removed(removed));
		}
		self.notify_imported(&summary);

		report
	}
}

fn background_in(domain: ResourceDomain) -> ImportOptions {
	ImportOptions {
		domain: Some(domain),
		background: true,
		optional: true,
		..Default::default()
	}
}

fn dedup_paths(paths: &[PathBuf]) -> Vec<PathBuf> {
	let mut seen = HashSet::new();
	paths
		.iter()
		.filter(|path| seen.insert(path.as_path()))
		.cloned()
		.collect()
}

/// Merges caller supplied metadata. Returns whether anything changed.
fn enrich(resource: &mut Resource, options: &ImportOptions) -> bool {
	let before = (
		resource.metadata.source.clone(),
		resource.uris.len(),
		resource.tags.len(),
		resource.icons.len(),
	);

	resource.metadata.source.merge(options.source.clone());
	resource
		.uris
		.extend(options.uris.iter().cloned().chain(options.source.identity_uris()));
	resource.tags.extend(options.tags.iter().cloned());
	for icon in &options.icons {
		if !resource.icons.contains(icon) {
			resource.icons.push(icon.clone());
		}
	}

	before
		!= (
			resource.metadata.source.clone(),
			resource.uris.len(),
			resource.tags.len(),
			resource.icons.len(),
		)
}

fn apply_patch(resource: &mut Resource, patch: ResourcePatch) {
	if let Some(name) = patch.name {
		resource.name = name;
	}
	if let Some(tags) = patch.tags {
		resource.tags = tags;
	}
	if let Some(source) = patch.source {
		resource.uris.extend(source.identity_uris());
		resource.metadata.source.merge(source);
	}
	resource.uris.extend(patch.uris);
	resource.updated_at = Utc::now();
}

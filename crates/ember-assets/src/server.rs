//! Asset server: owns the registry, the loaders, the job workers and the
//! main-thread queue for one engine instance.

use std::panic::Location;
use std::sync::{Arc, Weak};
use std::time::Duration;

#[cfg(feature = "hot-reload")]
use std::path::Path;

use ember_core::profiling::profile_function;
use parking_lot::RwLock;
#[cfg(feature = "hot-reload")]
use parking_lot::Mutex;

use crate::Asset;
use crate::config::AssetConfig;
use crate::diagnostics::{Diagnostics, Referrer};
use crate::error::{AssetError, AssetResult};
use crate::event::{AssetEvent, ListenerId};
use crate::gpu::GpuObjectTable;
use crate::handle::AssetPtr;
use crate::id::{AssetId, AssetType};
use crate::job::{Job, JobEnv, JobStats, JobSystem};
use crate::loader::{AssetLoader, LoadContext, LoaderRegistry, RecordDesc, TaskPhase};
use crate::main_thread::{MainThreadQueue, MainThreadStats};
use crate::path::AssetPath;
use crate::record::{AssetRecord, RecordLifecycle, ReferenceTransition};
use crate::registry::AssetRegistry;
use crate::state::RecordFlags;

#[cfg(feature = "hot-reload")]
use crate::hot_reload::AssetWatcher;

/// State shared between the server, its records and its workers.
pub(crate) struct ServerShared {
    this: Weak<ServerShared>,
    config: AssetConfig,
    registry: AssetRegistry,
    loaders: RwLock<LoaderRegistry>,
    env: Arc<JobEnv>,
    jobs: JobSystem,
    #[cfg(feature = "hot-reload")]
    watcher: Mutex<Option<AssetWatcher>>,
}

impl ServerShared {
    pub(crate) fn diagnostics(&self) -> &Diagnostics {
        &self.env.diagnostics
    }

    pub(crate) fn main_thread(&self) -> &Arc<MainThreadQueue> {
        &self.env.main_thread
    }

    pub(crate) fn wait_poll_interval(&self) -> Duration {
        self.config.wait_poll_interval
    }

    fn loader_for(&self, record: &AssetRecord) -> Option<Arc<dyn AssetLoader>> {
        let extension = record.extension()?;
        self.loaders.read().get(extension)
    }

    /// Make whatever progress the calling thread can: drain the main-thread
    /// queue if this is its owner, and run jobs in manual mode.
    pub(crate) fn pump(&self) -> usize {
        let mut work = 0;
        if self.env.main_thread.is_owning_thread() {
            work += self.env.main_thread.drain();
        }
        work + self.jobs.run_pending()
    }

    pub(crate) fn wait_for_progress(&self) {
        self.jobs.wait_for_progress(self.config.wait_poll_interval);
    }

    /// Queue a load for a record the caller just latched.
    ///
    /// Unloaded records sharing the path are latched and loaded with it.
    pub(crate) fn enqueue_load(&self, record: &Arc<AssetRecord>) -> ReferenceTransition {
        if self.env.is_shutting_down() {
            record.abort_load();
            return ReferenceTransition::Unavailable;
        }
        let Some(loader) = self.loader_for(record) else {
            tracing::warn!(
                "No loader registered for .{}, cannot load '{}' ({})",
                record.extension().unwrap_or_default(),
                record.name(),
                record.path()
            );
            record.abort_load();
            return ReferenceTransition::Unavailable;
        };

        let mut records = vec![Arc::clone(record)];
        for sibling in self.registry.records_for_path(record.path()) {
            if sibling.id() != record.id() && sibling.latch_sibling() {
                records.push(sibling);
            }
        }

        let job = Job::Load {
            path: record.path().clone(),
            loader,
            records: records.clone(),
        };
        if self.jobs.submit(job) {
            ReferenceTransition::LoadQueued
        } else {
            for latched in &records {
                latched.abort_load();
            }
            ReferenceTransition::Unavailable
        }
    }

    /// Queue an unload for a record whose count just reached zero.
    ///
    /// Loaded siblings that nothing references are released along with it.
    pub(crate) fn enqueue_unload(&self, record: &Arc<AssetRecord>) {
        let mut records = vec![Arc::clone(record)];
        records.extend(
            self.registry
                .records_for_path(record.path())
                .into_iter()
                .filter(|sibling| sibling.id() != record.id()),
        );

        let job = Job::Unload {
            path: record.path().clone(),
            loader: self.loader_for(record),
            records,
            forced: false,
        };
        if !self.jobs.submit(job) {
            record.clear_unload_queued();
        }
    }

    pub(crate) fn enqueue_push_event(
        &self,
        record: &Arc<AssetRecord>,
        listener: ListenerId,
        event: AssetEvent,
    ) -> bool {
        self.jobs.submit(Job::PushEvent {
            record: Arc::clone(record),
            listener,
            event,
        })
    }

    fn enqueue_refresh(&self, records: Vec<Arc<AssetRecord>>) -> usize {
        let Some(first) = records.first() else {
            return 0;
        };
        let Some(loader) = self.loader_for(first) else {
            tracing::warn!("No loader to refresh {}", first.path());
            for record in &records {
                record.end_refresh();
            }
            return 0;
        };

        let count = records.len();
        let job = Job::Refresh {
            path: first.path().clone(),
            loader,
            records,
        };
        if self.jobs.submit(job) { count } else { 0 }
    }

    fn enqueue_forced_unload(&self, path: AssetPath, records: Vec<Arc<AssetRecord>>) {
        let loader = records.first().and_then(|record| self.loader_for(record));
        self.jobs.submit(Job::Unload {
            path,
            loader,
            records,
            forced: true,
        });
    }

    fn discover(&self, path: AssetPath, reload: bool) -> AssetResult<Vec<Arc<AssetRecord>>> {
        if !reload {
            let existing = self.registry.records_for_path(&path);
            if !existing.is_empty() {
                return Ok(existing);
            }
        }

        let extension = path
            .extension()
            .ok_or_else(|| AssetError::NoLoaderForExtension {
                extension: String::new(),
            })?;
        let loader = self
            .loaders
            .read()
            .get(&extension)
            .ok_or(AssetError::NoLoaderForExtension { extension })?;

        let mut ctx = LoadContext::new(&self.env, &path, TaskPhase::LoadMeta, &[]);
        loader.process(&mut ctx)?;
        let declared = ctx.take_declared();
        if declared.is_empty() {
            tracing::warn!("Loader declared no records for {}", path);
        }

        Ok(declared
            .into_iter()
            .map(|desc| self.register(desc, path.clone(), reload))
            .collect())
    }

    fn register(&self, desc: RecordDesc, path: AssetPath, reload: bool) -> Arc<AssetRecord> {
        let record = AssetRecord::new(
            desc.name,
            path,
            desc.asset_type,
            RecordFlags::HAS_METADATA,
            self.this.clone(),
        );
        self.registry.register(Arc::new(record), reload)
    }
}

/// Counters across the whole server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub jobs: JobStats,
    pub main_thread: MainThreadStats,
    pub usage_errors: u64,
    pub records: usize,
    pub retired_records: usize,
}

/// The owner of every asset record, loader and worker of one engine.
///
/// Create it on the thread that owns the graphics context: that thread
/// becomes the owner of [`AssetServer::main_thread`]. Dropping the server
/// unloads everything and joins the workers.
///
/// # Example
///
/// ```
/// use ember_assets::prelude::*;
///
/// struct Palette(Vec<u32>);
/// impl Asset for Palette {}
///
/// let server = AssetServer::new(AssetConfig::manual());
/// let (record, palette) = server.create_asset("default", Palette(vec![0xff00ff]));
///
/// let handle = AssetPtr::<Palette>::new(&record);
/// assert_eq!(handle.load_sync().map(|p| p.0.len()), Some(palette.0.len()));
/// assert_eq!(server.stats().jobs.total_enqueued(), 0);
/// ```
pub struct AssetServer {
    shared: Arc<ServerShared>,
}

impl Default for AssetServer {
    fn default() -> Self {
        Self::new(AssetConfig::default())
    }
}

impl AssetServer {
    /// Create a server owned by the calling thread.
    pub fn new(config: AssetConfig) -> Self {
        Self::with_main_thread(config, Arc::new(MainThreadQueue::new()))
    }

    /// Create a server that hands graphics work to `main_thread`.
    pub fn with_main_thread(config: AssetConfig, main_thread: Arc<MainThreadQueue>) -> Self {
        let env = Arc::new(JobEnv::new(&config, main_thread));
        let jobs = JobSystem::new(&config, Arc::clone(&env));
        let shared = Arc::new_cyclic(|this| ServerShared {
            this: this.clone(),
            config,
            registry: AssetRegistry::new(),
            loaders: RwLock::new(LoaderRegistry::new()),
            env,
            jobs,
            #[cfg(feature = "hot-reload")]
            watcher: Mutex::new(None),
        });
        tracing::info!(
            "Asset server ready ({} worker(s), root {})",
            shared.jobs.worker_count(),
            shared.config.asset_root.display()
        );
        Self { shared }
    }

    /// The configuration the server was built with.
    pub fn config(&self) -> &AssetConfig {
        &self.shared.config
    }

    /// The record registry backing the `find_*` lookups.
    pub fn registry(&self) -> &AssetRegistry {
        &self.shared.registry
    }

    /// Register `loader` for each extension (case-insensitive, dot optional).
    pub fn register_extensions(&self, extensions: &[&str], loader: impl AssetLoader) {
        self.shared.loaders.write().register_extensions(extensions, loader);
    }

    /// Remove the loaders for `extensions`. Returns how many were registered.
    pub fn unregister_extensions(&self, extensions: &[&str]) -> usize {
        self.shared.loaders.write().unregister_extensions(extensions)
    }

    /// Check if a loader handles `extension`.
    pub fn has_loader(&self, extension: &str) -> bool {
        self.shared.loaders.read().contains(extension)
    }

    /// Register a metadata-only record for `path`.
    pub fn register(
        &self,
        desc: RecordDesc,
        path: impl Into<AssetPath>,
        reload: bool,
    ) -> Arc<AssetRecord> {
        self.shared.register(desc, path.into(), reload)
    }

    /// The records `path` produces, asking its loader (`LoadMeta`) the first
    /// time.
    pub fn discover(&self, path: impl Into<AssetPath>) -> AssetResult<Vec<Arc<AssetRecord>>> {
        self.shared.discover(path.into(), false)
    }

    /// Ask the loader again and replace the records of `path`.
    ///
    /// Handles to the replaced records keep working until they let go.
    pub fn rediscover(&self, path: impl Into<AssetPath>) -> AssetResult<Vec<Arc<AssetRecord>>> {
        self.shared.discover(path.into(), true)
    }

    /// An automatic handle to the first record of type `T` in `path`.
    ///
    /// The handle starts loading immediately.
    #[track_caller]
    pub fn load<T: Asset>(&self, path: impl Into<AssetPath>) -> AssetResult<AssetPtr<T>> {
        let location = Location::caller();
        let path = path.into();
        let records = self.discover(path.clone())?;
        let record = records
            .iter()
            .find(|record| record.asset_type().is::<T>())
            .ok_or_else(|| match records.first() {
                Some(first) => AssetError::TypeMismatch {
                    expected: T::type_name(),
                    found: first.asset_type().name(),
                },
                None => AssetError::NotFound {
                    path: path.to_string(),
                },
            })?;
        Ok(AssetPtr::attach(record, location))
    }

    /// Register a record built in memory. It is loaded immediately, never
    /// goes through a loader, and stays loaded until unregistered.
    pub fn create_asset<T: Asset>(
        &self,
        name: impl Into<String>,
        value: T,
    ) -> (Arc<AssetRecord>, Arc<T>) {
        let record = AssetRecord::new(
            name,
            AssetPath::empty(),
            AssetType::of::<T>(),
            RecordFlags::MANUALLY_CREATED,
            self.shared.this.clone(),
        );
        let payload = Arc::new(value);
        record.commit_manual(payload.clone());
        let record = self.shared.registry.register(Arc::new(record), false);
        tracing::debug!("Created '{}' in memory as {}", record.name(), record.id());
        (record, payload)
    }

    /// Remove an unreferenced record, releasing its payload.
    pub fn unregister(&self, id: AssetId) -> AssetResult<()> {
        let record = self.shared.registry.unregister(id)?;
        self.shared.diagnostics().forget(id);
        if !record.is_loaded() {
            return Ok(());
        }

        if record.is_manually_created() {
            if record.take_payload().is_some() {
                record.dispatcher().dispatch(&record, AssetEvent::Unloaded);
            }
        } else {
            let path = record.path().clone();
            self.shared.enqueue_forced_unload(path, vec![record]);
        }
        Ok(())
    }

    /// Look up a record by id.
    pub fn find_by_id(&self, id: AssetId) -> Option<Arc<AssetRecord>> {
        self.shared.registry.find_by_id(id)
    }

    /// The first record registered under `name`.
    pub fn find_by_name(&self, name: &str) -> Option<Arc<AssetRecord>> {
        self.shared.registry.find_by_name(name)
    }

    /// Every record registered under `name`.
    pub fn find_all_by_name(&self, name: &str) -> Vec<Arc<AssetRecord>> {
        self.shared.registry.find_all_by_name(name)
    }

    /// The first record registered for `path`.
    pub fn find_by_path(&self, path: impl Into<AssetPath>) -> Option<Arc<AssetRecord>> {
        self.shared.registry.find_by_path(path)
    }

    /// Queue a refresh of one loaded record. Returns `false` if it is not
    /// loaded or a refresh is already queued.
    pub fn refresh(&self, record: &Arc<AssetRecord>) -> bool {
        if !record.begin_refresh() {
            return false;
        }
        self.shared.enqueue_refresh(vec![Arc::clone(record)]) > 0
    }

    /// Queue one refresh for every loaded record of `path`.
    pub fn refresh_path(&self, path: impl Into<AssetPath>) -> usize {
        let path = path.into();
        let records: Vec<_> = self
            .shared
            .registry
            .records_for_path(&path)
            .into_iter()
            .filter(|record| record.begin_refresh())
            .collect();
        if !records.is_empty() {
            tracing::debug!("Refreshing {} record(s) of {}", records.len(), path);
        }
        self.shared.enqueue_refresh(records)
    }

    /// Per-frame work on the owning thread: run queued graphics tasks, pick
    /// up file changes and drop retired records.
    ///
    /// In manual mode jobs still only run through
    /// [`run_pending_jobs`](Self::run_pending_jobs).
    pub fn update(&self) -> usize {
        profile_function!();
        let mut work = 0;
        if self.shared.main_thread().is_owning_thread() {
            work += self.shared.main_thread().drain();
        }
        #[cfg(feature = "hot-reload")]
        {
            work += self.process_hot_reload();
        }
        self.shared.registry.prune_retired();
        work
    }

    /// Run every queued job on the calling thread. Manual mode only.
    pub fn run_pending_jobs(&self) -> usize {
        self.shared.jobs.run_pending()
    }

    /// Pump until no job is queued or running.
    ///
    /// On the owning thread this also runs graphics tasks that jobs are
    /// waiting on.
    pub fn wait_idle(&self) {
        let main_thread = self.shared.main_thread();
        loop {
            let progressed = self.shared.pump();
            let main_idle = !main_thread.is_owning_thread() || main_thread.pending_len() == 0;
            if self.shared.jobs.is_idle() && main_idle {
                return;
            }
            if progressed == 0 {
                self.shared.wait_for_progress();
            }
        }
    }

    /// Queue for work that must run on the graphics-owning thread.
    pub fn main_thread(&self) -> &Arc<MainThreadQueue> {
        self.shared.main_thread()
    }

    /// Bindings from graphics objects to their owning assets.
    pub fn gpu_objects(&self) -> &GpuObjectTable {
        &self.shared.env.gpu_objects
    }

    /// Number of worker threads. `0` in manual mode.
    pub fn worker_count(&self) -> usize {
        self.shared.jobs.worker_count()
    }

    /// Check if [`Drop`] has started tearing the server down.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.env.is_shutting_down()
    }

    /// Snapshot of job, registry and main-thread counters.
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            jobs: self.shared.jobs.stats(),
            main_thread: self.shared.main_thread().stats(),
            usage_errors: self.shared.diagnostics().usage_error_count(),
            records: self.shared.registry.len(),
            retired_records: self.shared.registry.retired_len(),
        }
    }

    /// Call sites currently referencing `record`. Empty unless referrer
    /// tracking is on in a debug build.
    pub fn referrers(&self, record: &AssetRecord) -> Vec<Referrer> {
        self.shared.diagnostics().referrers(record.id())
    }

    /// Watch `dir` for changes and refresh the records of changed files on
    /// [`update`](Self::update).
    #[cfg(feature = "hot-reload")]
    pub fn enable_hot_reload(&self, dir: impl AsRef<Path>) -> AssetResult<()> {
        let mut watcher = self.shared.watcher.lock();
        if watcher.is_none() {
            let created = AssetWatcher::new(&self.shared.config.asset_root).map_err(|e| {
                AssetError::Other {
                    message: format!("failed to start file watcher: {e}"),
                }
            })?;
            *watcher = Some(created);
        }
        if let Some(watcher) = watcher.as_mut() {
            watcher
                .watch_directory(dir.as_ref())
                .map_err(|e| AssetError::Other {
                    message: format!("failed to watch {}: {e}", dir.as_ref().display()),
                })?;
            tracing::info!("Hot reload enabled for {}", dir.as_ref().display());
        }
        Ok(())
    }

    /// Turn pending file changes into refreshes. Returns the number of
    /// records queued.
    #[cfg(feature = "hot-reload")]
    pub fn process_hot_reload(&self) -> usize {
        let changed = match self.shared.watcher.lock().as_mut() {
            Some(watcher) => watcher.poll_changes(),
            None => return 0,
        };
        changed.into_iter().map(|path| self.refresh_path(path)).sum()
    }

    fn shutdown(&self) {
        let shared = &self.shared;
        if !shared.env.begin_shutdown() {
            return;
        }
        tracing::debug!("Shutting down asset server");

        for path in shared.registry.paths() {
            let loaded: Vec<_> = shared
                .registry
                .records_for_path(&path)
                .into_iter()
                .filter(|record| record.is_loaded())
                .collect();
            if !loaded.is_empty() {
                shared.enqueue_forced_unload(path, loaded);
            }
        }
        for record in shared.registry.retired() {
            if record.is_loaded() {
                let path = record.path().clone();
                shared.enqueue_forced_unload(path, vec![record]);
            }
        }
        shared.jobs.shutdown();

        let main_thread = shared.main_thread();
        if main_thread.is_owning_thread() {
            shared.jobs.run_pending();
            shared.jobs.join_workers(|| {
                main_thread.drain();
            });
            main_thread.drain();
        } else {
            main_thread.close();
            shared.jobs.run_pending();
            shared.jobs.join_workers(|| {});
        }

        for record in shared.registry.drain() {
            if record.is_manually_created() {
                record.take_payload();
            }
        }
        tracing::debug!("Asset server shut down");
    }
}

impl Drop for AssetServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AssetServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetServer")
            .field("workers", &self.worker_count())
            .field("registry", &self.shared.registry)
            .field("main_thread", self.shared.main_thread())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LoadState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Mesh {
        vertices: usize,
    }
    impl Asset for Mesh {}

    struct Material;
    impl Asset for Material {}

    fn quiet() -> AssetConfig {
        AssetConfig::manual().with_break_on_usage_error(false)
    }

    fn pack_loader(calls: Arc<AtomicUsize>) -> impl AssetLoader {
        move |ctx: &mut LoadContext<'_>| -> AssetResult<()> {
            match ctx.phase() {
                TaskPhase::LoadMeta => {
                    ctx.declare::<Mesh>("body");
                    ctx.declare::<Material>("paint");
                }
                TaskPhase::LoadAsset | TaskPhase::RefreshAsset => {
                    calls.fetch_add(1, Ordering::SeqCst);
                    for index in 0..ctx.records().len() {
                        if ctx.records()[index].asset_type().is::<Mesh>() {
                            ctx.set_payload(index, Mesh { vertices: 8 })?;
                        } else {
                            ctx.set_payload(index, Material)?;
                        }
                    }
                }
                TaskPhase::UnloadAsset => {}
            }
            Ok(())
        }
    }

    #[test]
    fn test_discover_registers_declared_records_once() {
        let server = AssetServer::new(quiet());
        server.register_extensions(&["pack"], pack_loader(Arc::new(AtomicUsize::new(0))));

        let records = server.discover("cars/red.pack").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.flags().contains(RecordFlags::HAS_METADATA)));

        let again = server.discover("cars/./red.pack").unwrap();
        assert_eq!(again[0].id(), records[0].id());
        assert_eq!(server.registry().len(), 2);
    }

    #[test]
    fn test_discover_without_loader_fails() {
        let server = AssetServer::new(quiet());
        assert!(matches!(
            server.discover("cars/red.pack"),
            Err(AssetError::NoLoaderForExtension { .. })
        ));
    }

    #[test]
    fn test_shared_path_loads_in_one_job() {
        let server = AssetServer::new(quiet());
        let calls = Arc::new(AtomicUsize::new(0));
        server.register_extensions(&["pack"], pack_loader(Arc::clone(&calls)));

        let records = server.discover("cars/red.pack").unwrap();
        assert_eq!(records[0].add_referrer(), ReferenceTransition::LoadQueued);
        assert_eq!(records[1].state(), LoadState::Loading);
        assert_eq!(records[1].add_referrer(), ReferenceTransition::AlreadyLoading);

        server.run_pending_jobs();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(records.iter().all(|r| r.is_loaded()));
        assert_eq!(server.stats().jobs.load_enqueued, 1);
    }

    #[test]
    fn test_missing_loader_leaves_record_unloaded() {
        let server = AssetServer::new(quiet());
        let record = server.register(RecordDesc::new::<Mesh>("orphan"), "models/orphan.obj", false);

        assert_eq!(record.add_referrer(), ReferenceTransition::Unavailable);
        assert_eq!(record.state(), LoadState::Unloaded);
        assert_eq!(server.stats().jobs.total_enqueued(), 0);
        assert!(record.remove_referrer());
    }

    #[test]
    fn test_rejected_load_unlatches_every_sibling() {
        let server = AssetServer::new(quiet());
        server.register_extensions(&["pack"], pack_loader(Arc::new(AtomicUsize::new(0))));
        let records = server.discover("cars/red.pack").unwrap();

        server.shared.jobs.shutdown();
        assert_eq!(records[0].add_referrer(), ReferenceTransition::Unavailable);
        assert!(records.iter().all(|r| r.state() == LoadState::Unloaded));
        assert_eq!(server.stats().jobs.rejected, 1);
        assert!(records[0].remove_referrer());
        assert_eq!(server.stats().jobs.unload_enqueued, 0);
    }

    #[test]
    fn test_load_picks_record_by_type() {
        let server = AssetServer::new(quiet());
        server.register_extensions(&["pack"], pack_loader(Arc::new(AtomicUsize::new(0))));

        let mesh = server.load::<Mesh>("cars/red.pack").unwrap();
        assert_eq!(mesh.record().map(|r| r.name().to_string()), Some("body".into()));
        assert_eq!(mesh.load_sync().map(|m| m.vertices), Some(8));

        struct Sound;
        impl Asset for Sound {}
        assert!(matches!(
            server.load::<Sound>("cars/red.pack"),
            Err(AssetError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_refresh_path_updates_loaded_records() {
        let server = AssetServer::new(quiet());
        let calls = Arc::new(AtomicUsize::new(0));
        server.register_extensions(&["pack"], pack_loader(Arc::clone(&calls)));

        let records = server.discover("cars/red.pack").unwrap();
        records[0].add_referrer();
        server.run_pending_jobs();

        let updates = Arc::new(AtomicUsize::new(0));
        {
            let updates = Arc::clone(&updates);
            records[0].add_listener(move |_, event| {
                if event.is_updated() {
                    updates.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        assert_eq!(server.refresh_path("cars/red.pack"), 2);
        assert_eq!(server.refresh_path("cars/red.pack"), 0);
        server.run_pending_jobs();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(updates.load(Ordering::SeqCst), 1);
        assert_eq!(records[0].version(), 2);
        assert!(!records[0].flags().contains(RecordFlags::STALE));
    }

    #[test]
    fn test_unregister_manual_asset_releases_payload() {
        let server = AssetServer::new(quiet());
        let (record, _) = server.create_asset("paint", Material);
        let unloaded = Arc::new(AtomicUsize::new(0));
        {
            let unloaded = Arc::clone(&unloaded);
            record.add_listener(move |_, event| {
                if event.is_unloaded() {
                    unloaded.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        record.add_referrer();
        assert!(matches!(
            server.unregister(record.id()),
            Err(AssetError::StillReferenced { .. })
        ));
        record.remove_referrer();
        assert!(record.is_loaded());

        server.unregister(record.id()).unwrap();
        assert_eq!(record.state(), LoadState::Unloaded);
        assert_eq!(unloaded.load(Ordering::SeqCst), 1);
        assert!(server.find_by_name("paint").is_none());
    }

    #[test]
    fn test_usage_errors_are_counted_in_stats() {
        let server = AssetServer::new(quiet());
        let record = server.register(RecordDesc::new::<Mesh>("cube"), "models/cube.mesh", false);
        assert!(!record.remove_referrer());
        assert_eq!(server.stats().usage_errors, 1);
    }

    #[test]
    fn test_drop_unloads_file_backed_records_without_events() {
        let calls = Arc::new(AtomicUsize::new(0));
        let unload_calls = Arc::new(AtomicUsize::new(0));
        let events = Arc::new(AtomicUsize::new(0));
        let record;
        {
            let server = AssetServer::new(quiet());
            let unload_calls = Arc::clone(&unload_calls);
            let calls = Arc::clone(&calls);
            server.register_extensions(&["mesh"], move |ctx: &mut LoadContext<'_>| -> AssetResult<()> {
                match ctx.phase() {
                    TaskPhase::LoadAsset => {
                        calls.fetch_add(1, Ordering::SeqCst);
                        ctx.set_payload(0, Mesh { vertices: 3 })
                    }
                    TaskPhase::UnloadAsset => {
                        unload_calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    _ => Ok(()),
                }
            });
            record = server.register(RecordDesc::new::<Mesh>("tri"), "models/tri.mesh", false);
            record.add_referrer();
            server.run_pending_jobs();
            assert!(record.is_loaded());

            let events = Arc::clone(&events);
            record.add_listener(move |_, _| {
                events.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(unload_calls.load(Ordering::SeqCst), 1);
        assert_eq!(events.load(Ordering::SeqCst), 0);
        assert!(record.payload().is_none());
    }
}

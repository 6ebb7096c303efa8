//! Background jobs: the Load/Refresh/Unload/PushEvent queue and its workers.
//!
//! Each worker owns one FIFO. Jobs for the same path always hash to the same
//! worker, so a record's Load, Unload and Refresh run in submission order.
//! Workers drain their queue by swapping out the whole pending list under the
//! lock and running the batch with the lock released.

use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ember_core::alloc::RandomState;
use ember_core::profiling::profile_scope;
use parking_lot::{Condvar, Mutex};

use crate::config::AssetConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{AssetError, AssetResult};
use crate::event::{AssetEvent, ListenerId};
use crate::gpu::GpuObjectTable;
use crate::loader::{AssetLoader, LoadContext, TaskPhase};
use crate::main_thread::MainThreadQueue;
use crate::path::AssetPath;
use crate::record::{AssetRecord, RecordLifecycle};

/// The four kinds of background job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Load,
    Refresh,
    Unload,
    PushEvent,
}

impl JobKind {
    const ALL: [JobKind; 4] = [
        JobKind::Load,
        JobKind::Refresh,
        JobKind::Unload,
        JobKind::PushEvent,
    ];

    fn index(self) -> usize {
        match self {
            JobKind::Load => 0,
            JobKind::Refresh => 1,
            JobKind::Unload => 2,
            JobKind::PushEvent => 3,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobKind::Load => "Load",
            JobKind::Refresh => "Refresh",
            JobKind::Unload => "Unload",
            JobKind::PushEvent => "PushEvent",
        };
        f.write_str(name)
    }
}

pub(crate) enum Job {
    Load {
        path: AssetPath,
        loader: Arc<dyn AssetLoader>,
        records: Vec<Arc<AssetRecord>>,
    },
    Refresh {
        path: AssetPath,
        loader: Arc<dyn AssetLoader>,
        records: Vec<Arc<AssetRecord>>,
    },
    /// `records[0]` is the record whose release queued the job.
    Unload {
        path: AssetPath,
        loader: Option<Arc<dyn AssetLoader>>,
        records: Vec<Arc<AssetRecord>>,
        forced: bool,
    },
    PushEvent {
        record: Arc<AssetRecord>,
        listener: ListenerId,
        event: AssetEvent,
    },
}

impl Job {
    pub(crate) fn kind(&self) -> JobKind {
        match self {
            Job::Load { .. } => JobKind::Load,
            Job::Refresh { .. } => JobKind::Refresh,
            Job::Unload { .. } => JobKind::Unload,
            Job::PushEvent { .. } => JobKind::PushEvent,
        }
    }

    fn path(&self) -> &AssetPath {
        match self {
            Job::Load { path, .. } | Job::Refresh { path, .. } | Job::Unload { path, .. } => path,
            Job::PushEvent { record, .. } => record.path(),
        }
    }
}

/// Counters shared by every queue of one server.
#[derive(Debug, Default)]
pub(crate) struct JobCounters {
    enqueued: [AtomicU64; 4],
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of job activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    pub load_enqueued: u64,
    pub refresh_enqueued: u64,
    pub unload_enqueued: u64,
    pub push_event_enqueued: u64,
    /// Jobs that ran to completion without error.
    pub completed: u64,
    /// Jobs whose loader returned an error or panicked.
    pub failed: u64,
    /// Jobs refused because the queue was shut down.
    pub rejected: u64,
    /// Jobs queued but not yet picked up.
    pub pending: usize,
}

impl JobStats {
    /// Jobs of `kind` queued since the server started.
    pub fn enqueued(&self, kind: JobKind) -> u64 {
        match kind {
            JobKind::Load => self.load_enqueued,
            JobKind::Refresh => self.refresh_enqueued,
            JobKind::Unload => self.unload_enqueued,
            JobKind::PushEvent => self.push_event_enqueued,
        }
    }

    /// Jobs of every kind queued since the server started.
    pub fn total_enqueued(&self) -> u64 {
        JobKind::ALL.iter().map(|kind| self.enqueued(*kind)).sum()
    }
}

/// What a job needs from the server while it runs.
pub(crate) struct JobEnv {
    pub(crate) main_thread: Arc<MainThreadQueue>,
    pub(crate) gpu_objects: GpuObjectTable,
    pub(crate) asset_root: PathBuf,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) counters: JobCounters,
    shutting_down: AtomicBool,
}

impl JobEnv {
    pub(crate) fn new(config: &AssetConfig, main_thread: Arc<MainThreadQueue>) -> Self {
        Self {
            main_thread,
            gpu_objects: GpuObjectTable::new(),
            asset_root: config.asset_root.clone(),
            diagnostics: Diagnostics::new(config),
            counters: JobCounters::default(),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub(crate) fn begin_shutdown(&self) -> bool {
        !self.shutting_down.swap(true, Ordering::AcqRel)
    }
}

thread_local! {
    static ON_JOB_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is running asset jobs.
pub(crate) fn on_job_thread() -> bool {
    ON_JOB_THREAD.with(Cell::get)
}

struct JobThreadGuard {
    previous: bool,
}

impl JobThreadGuard {
    fn enter() -> Self {
        Self {
            previous: ON_JOB_THREAD.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for JobThreadGuard {
    fn drop(&mut self) {
        ON_JOB_THREAD.with(|flag| flag.set(self.previous));
    }
}

#[derive(Default)]
struct QueueState {
    jobs: Vec<Job>,
    busy: bool,
    shutdown: bool,
}

/// One worker's FIFO.
#[derive(Default)]
pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
    idle: Condvar,
}

impl JobQueue {
    fn push(&self, job: Job) -> Result<(), Job> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(job);
        }
        state.jobs.push(job);
        self.available.notify_one();
        Ok(())
    }

    /// Block until there is work or the queue shuts down.
    fn next_batch(&self) -> Option<Vec<Job>> {
        let mut state = self.state.lock();
        loop {
            if !state.jobs.is_empty() {
                state.busy = true;
                return Some(std::mem::take(&mut state.jobs));
            }
            if state.shutdown {
                return None;
            }
            self.available.wait(&mut state);
        }
    }

    /// Take the pending batch unless another thread is already draining.
    fn try_batch(&self) -> Option<Vec<Job>> {
        let mut state = self.state.lock();
        if state.busy || state.jobs.is_empty() {
            return None;
        }
        state.busy = true;
        Some(std::mem::take(&mut state.jobs))
    }

    fn finish_batch(&self) {
        let mut state = self.state.lock();
        state.busy = false;
        if state.jobs.is_empty() {
            self.idle.notify_all();
        }
    }

    fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.jobs.is_empty() && !state.busy
    }

    /// Wait up to `timeout` for this queue to go idle. Returns `false` if it
    /// was already idle.
    fn wait_idle_for(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if state.jobs.is_empty() && !state.busy {
            return false;
        }
        self.idle.wait_for(&mut state, timeout);
        true
    }

    fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.available.notify_all();
        self.idle.notify_all();
    }
}

/// The queues and worker threads of one server.
pub(crate) struct JobSystem {
    queues: Vec<Arc<JobQueue>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    router: RandomState,
    env: Arc<JobEnv>,
    manual: bool,
}

impl JobSystem {
    /// Spawn `config.worker_threads` workers, or none in manual mode.
    pub(crate) fn new(config: &AssetConfig, env: Arc<JobEnv>) -> Self {
        let manual = config.is_manual();
        let queue_count = config.worker_threads.max(1);
        let queues: Vec<_> = (0..queue_count).map(|_| Arc::new(JobQueue::default())).collect();
        let mut workers = Vec::new();

        if !manual {
            for (index, queue) in queues.iter().enumerate() {
                let queue = Arc::clone(queue);
                let env = Arc::clone(&env);
                let handle = thread::Builder::new()
                    .name(format!("{}-{}", config.thread_name_prefix, index))
                    .spawn(move || worker_loop(queue, env))
                    .expect("Failed to spawn asset worker thread");
                workers.push(handle);
            }
            tracing::debug!("Asset job system started with {} worker(s)", workers.len());
        } else {
            tracing::debug!("Asset job system running in manual mode");
        }

        Self {
            queues,
            workers: Mutex::new(workers),
            router: RandomState::new(),
            env,
            manual,
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        if self.manual { 0 } else { self.queues.len() }
    }

    fn route(&self, job: &Job) -> usize {
        let hash = match job {
            Job::PushEvent { record, .. } if record.path().is_empty() => {
                self.router.hash_one(record.id())
            }
            _ => self.router.hash_one(job.path()),
        };
        (hash % self.queues.len() as u64) as usize
    }

    /// Queue `job` behind every earlier job for the same path.
    pub(crate) fn submit(&self, job: Job) -> bool {
        let kind = job.kind();
        let queue = &self.queues[self.route(&job)];
        match queue.push(job) {
            Ok(()) => {
                self.env.counters.enqueued[kind.index()].fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(job) => {
                self.env.counters.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Job queue shut down, dropping {} job for {}", kind, job.path());
                false
            }
        }
    }

    /// Run queued jobs on the calling thread until none are left.
    ///
    /// Only does anything in manual mode. Returns the number of jobs run.
    pub(crate) fn run_pending(&self) -> usize {
        if !self.manual {
            return 0;
        }
        let _marker = JobThreadGuard::enter();
        let mut ran = 0;
        while let Some(batch) = self.queues[0].try_batch() {
            ran += batch.len();
            run_batch(&self.env, batch);
            self.queues[0].finish_batch();
        }
        ran
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.queues.iter().all(|queue| queue.is_idle())
    }

    /// Block on the first busy queue for at most `timeout`.
    pub(crate) fn wait_for_progress(&self, timeout: Duration) {
        for queue in &self.queues {
            if queue.wait_idle_for(timeout) {
                return;
            }
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.queues.iter().map(|queue| queue.len()).sum()
    }

    pub(crate) fn stats(&self) -> JobStats {
        let counters = &self.env.counters;
        let enqueued = |kind: JobKind| counters.enqueued[kind.index()].load(Ordering::Relaxed);
        JobStats {
            load_enqueued: enqueued(JobKind::Load),
            refresh_enqueued: enqueued(JobKind::Refresh),
            unload_enqueued: enqueued(JobKind::Unload),
            push_event_enqueued: enqueued(JobKind::PushEvent),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }

    /// Stop accepting jobs. Workers finish what is queued, then exit.
    pub(crate) fn shutdown(&self) {
        for queue in &self.queues {
            queue.shutdown();
        }
    }

    /// Join every worker, calling `pump` while any is still running.
    pub(crate) fn join_workers(&self, mut pump: impl FnMut()) {
        let workers = std::mem::take(&mut *self.workers.lock());
        while workers.iter().any(|worker| !worker.is_finished()) {
            pump();
            thread::sleep(Duration::from_millis(1));
        }
        for worker in workers {
            if let Err(e) = worker.join() {
                tracing::error!("Asset worker panicked: {:?}", e);
            }
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(queue: Arc<JobQueue>, env: Arc<JobEnv>) {
    let _marker = JobThreadGuard::enter();
    tracing::trace!("Asset worker started");
    while let Some(batch) = queue.next_batch() {
        run_batch(&env, batch);
        queue.finish_batch();
    }
    tracing::trace!("Asset worker stopped");
}

fn run_batch(env: &JobEnv, batch: Vec<Job>) {
    profile_scope!("asset_job_batch");
    for job in batch {
        execute(env, job);
    }
}

fn execute(env: &JobEnv, job: Job) {
    let kind = job.kind();
    let span = tracing::debug_span!("asset_job", kind = %kind, path = %job.path());
    let _enter = span.enter();

    match panic::catch_unwind(AssertUnwindSafe(|| run_job(env, job))) {
        Ok(Ok(())) => {
            env.counters.completed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            env.counters.failed.fetch_add(1, Ordering::Relaxed);
            if e.is_missing_resource() {
                tracing::warn!("{} job failed: {}", kind, e);
            } else {
                tracing::error!("{} job failed: {}", kind, e);
            }
        }
        Err(payload) => {
            env.counters.failed.fetch_add(1, Ordering::Relaxed);
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!("{} job panicked: {}", kind, message);
        }
    }
}

fn run_job(env: &JobEnv, job: Job) -> AssetResult<()> {
    match job {
        Job::Load {
            path,
            loader,
            records,
        } => run_load(env, &path, loader.as_ref(), &records),
        Job::Refresh {
            path,
            loader,
            records,
        } => run_refresh(env, &path, loader.as_ref(), &records),
        Job::Unload {
            path,
            loader,
            records,
            forced,
        } => run_unload(env, &path, loader.as_deref(), &records, forced),
        Job::PushEvent {
            record,
            listener,
            event,
        } => {
            push_event(&record, listener, event);
            Ok(())
        }
    }
}

fn missing_payloads(path: &AssetPath, missing: Vec<&str>) -> AssetResult<()> {
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AssetError::loader(
            path,
            format!("no payload produced for {}", missing.join(", ")),
        ))
    }
}

fn run_load(
    env: &JobEnv,
    path: &AssetPath,
    loader: &dyn AssetLoader,
    records: &[Arc<AssetRecord>],
) -> AssetResult<()> {
    let mut ctx = LoadContext::new(env, path, TaskPhase::LoadAsset, records);
    if let Err(e) = loader.process(&mut ctx) {
        if ctx.latch_released() {
            for record in records {
                record.abort_load();
            }
        }
        return Err(e);
    }

    // Records without a payload stay latched in Loading.
    let mut missing = Vec::new();
    for (record, payload) in records.iter().zip(ctx.take_staged()) {
        match payload {
            Some(payload) => {
                record.commit_load(payload);
            }
            None => missing.push(record.name()),
        }
    }
    missing_payloads(path, missing)
}

fn run_refresh(
    env: &JobEnv,
    path: &AssetPath,
    loader: &dyn AssetLoader,
    records: &[Arc<AssetRecord>],
) -> AssetResult<()> {
    let mut ctx = LoadContext::new(env, path, TaskPhase::RefreshAsset, records);
    if let Err(e) = loader.process(&mut ctx) {
        for record in records {
            record.end_refresh();
        }
        return Err(e);
    }

    let mut missing = Vec::new();
    for (record, payload) in records.iter().zip(ctx.take_staged()) {
        match payload {
            Some(payload) => {
                if !record.commit_refresh(payload) {
                    tracing::trace!("'{}' unloaded before its refresh committed", record.name());
                }
            }
            None => {
                record.end_refresh();
                missing.push(record.name());
            }
        }
    }
    missing_payloads(path, missing)
}

fn run_unload(
    env: &JobEnv,
    path: &AssetPath,
    loader: Option<&dyn AssetLoader>,
    records: &[Arc<AssetRecord>],
    forced: bool,
) -> AssetResult<()> {
    let mut released = Vec::new();
    let mut payloads = Vec::new();
    for (index, record) in records.iter().enumerate() {
        match record.begin_unload(forced || index == 0, forced) {
            Some(payload) => {
                released.push(Arc::clone(record));
                payloads.push(Some(payload));
            }
            None if index == 0 && !forced => {
                tracing::trace!("Unload of '{}' cancelled", record.name());
                return Ok(());
            }
            None => {}
        }
    }
    if released.is_empty() {
        return Ok(());
    }

    if !env.is_shutting_down() {
        for record in &released {
            record.dispatcher().dispatch(record, AssetEvent::Unloaded);
        }
    }

    let result = match loader {
        Some(loader) => {
            let mut ctx = LoadContext::new(env, path, TaskPhase::UnloadAsset, &released)
                .with_released(payloads);
            loader.process(&mut ctx)
        }
        None => Ok(()),
    };

    for record in &released {
        let leftover = env.gpu_objects.unbind_owner(record.id());
        if !leftover.is_empty() {
            tracing::warn!(
                "'{}' unloaded with {} GPU object(s) still bound",
                record.name(),
                leftover.len()
            );
        }
        tracing::debug!("Unloaded '{}' ({})", record.name(), path);
    }
    result
}

fn push_event(record: &Arc<AssetRecord>, listener: ListenerId, event: AssetEvent) {
    if event.is_loaded() && !record.is_loaded() {
        tracing::trace!("Dropping stale catch-up event for '{}'", record.name());
        return;
    }
    record.dispatcher().dispatch_to(listener, record, event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Asset;
    use std::sync::atomic::AtomicUsize;

    struct Blob(usize);
    impl Asset for Blob {}

    fn env(config: &AssetConfig) -> Arc<JobEnv> {
        Arc::new(JobEnv::new(config, Arc::new(MainThreadQueue::new())))
    }

    fn latched(name: &str, path: &str) -> Arc<AssetRecord> {
        let record = Arc::new(AssetRecord::detached::<Blob>(name, path));
        record.latch_sibling();
        record
    }

    fn blob_loader(calls: Arc<AtomicUsize>) -> Arc<dyn AssetLoader> {
        Arc::new(move |ctx: &mut LoadContext<'_>| -> AssetResult<()> {
            calls.fetch_add(1, Ordering::SeqCst);
            for index in 0..ctx.records().len() {
                ctx.set_payload(index, Blob(index))?;
            }
            Ok(())
        })
    }

    #[test]
    fn test_manual_mode_runs_only_when_pumped() {
        let config = AssetConfig::manual();
        let jobs = JobSystem::new(&config, env(&config));
        let calls = Arc::new(AtomicUsize::new(0));
        let record = latched("blob", "data/a.blob");

        assert!(jobs.submit(Job::Load {
            path: record.path().clone(),
            loader: blob_loader(Arc::clone(&calls)),
            records: vec![Arc::clone(&record)],
        }));
        assert_eq!(jobs.pending(), 1);
        assert!(!jobs.is_idle());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(jobs.run_pending(), 1);
        assert!(jobs.is_idle());
        assert!(record.is_loaded());
        assert_eq!(jobs.stats().completed, 1);
        assert_eq!(jobs.stats().load_enqueued, 1);
    }

    #[test]
    fn test_workers_load_every_record_of_a_path() {
        let config = AssetConfig::default().with_worker_threads(2);
        let jobs = JobSystem::new(&config, env(&config));
        let calls = Arc::new(AtomicUsize::new(0));
        let records = vec![latched("a", "pack/models.pak"), latched("b", "pack/models.pak")];

        jobs.submit(Job::Load {
            path: AssetPath::new("pack/models.pak"),
            loader: blob_loader(Arc::clone(&calls)),
            records: records.clone(),
        });
        while !jobs.is_idle() {
            jobs.wait_for_progress(Duration::from_millis(5));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(records[1].payload_as::<Blob>().map(|blob| blob.0), Some(1));
        jobs.shutdown();
        jobs.join_workers(|| {});
    }

    #[test]
    fn test_failed_load_keeps_latch() {
        let config = AssetConfig::manual();
        let jobs = JobSystem::new(&config, env(&config));
        let record = latched("broken", "data/broken.blob");

        jobs.submit(Job::Load {
            path: record.path().clone(),
            loader: Arc::new(|ctx: &mut LoadContext<'_>| -> AssetResult<()> {
                Err(AssetError::loader(ctx.path(), "corrupt"))
            }),
            records: vec![Arc::clone(&record)],
        });
        jobs.run_pending();

        assert!(record.state().is_loading());
        assert_eq!(jobs.stats().failed, 1);
    }

    #[test]
    fn test_failed_load_can_release_latch() {
        let config = AssetConfig::manual();
        let jobs = JobSystem::new(&config, env(&config));
        let record = latched("broken", "data/broken.blob");

        jobs.submit(Job::Load {
            path: record.path().clone(),
            loader: Arc::new(|ctx: &mut LoadContext<'_>| -> AssetResult<()> {
                ctx.release_latch_on_error();
                Err(AssetError::loader(ctx.path(), "corrupt"))
            }),
            records: vec![Arc::clone(&record)],
        });
        jobs.run_pending();

        assert!(record.state().is_unloaded());
    }

    #[test]
    fn test_panicking_loader_is_contained() {
        let config = AssetConfig::manual();
        let jobs = JobSystem::new(&config, env(&config));
        let record = latched("bomb", "data/bomb.blob");

        jobs.submit(Job::Load {
            path: record.path().clone(),
            loader: Arc::new(|_: &mut LoadContext<'_>| -> AssetResult<()> {
                panic!("loader exploded")
            }),
            records: vec![Arc::clone(&record)],
        });
        jobs.run_pending();

        assert_eq!(jobs.stats().failed, 1);
        assert!(record.state().is_loading());
    }

    #[test]
    fn test_unload_dispatches_then_calls_loader() {
        let config = AssetConfig::manual();
        let env = env(&config);
        let jobs = JobSystem::new(&config, Arc::clone(&env));
        let record = latched("blob", "data/a.blob");
        record.commit_load(Arc::new(Blob(9)));

        let order = Arc::new(Mutex::new(Vec::new()));
        {
            let order = Arc::clone(&order);
            record.add_listener(move |_, event| order.lock().push(format!("event:{event:?}")));
        }
        let loader: Arc<dyn AssetLoader> = {
            let order = Arc::clone(&order);
            Arc::new(move |ctx: &mut LoadContext<'_>| -> AssetResult<()> {
                let released = ctx.released_payload::<Blob>(0).map(|blob| blob.0);
                order.lock().push(format!("loader:{:?}:{}", released, ctx.phase()));
                Ok(())
            })
        };

        env.gpu_objects.bind(crate::gpu::GpuObjectId::new(1), record.id());
        jobs.submit(Job::Unload {
            path: record.path().clone(),
            loader: Some(loader),
            records: vec![Arc::clone(&record)],
            forced: false,
        });
        jobs.run_pending();

        assert_eq!(
            *order.lock(),
            vec!["event:Unloaded".to_string(), "loader:Some(9):UnloadAsset".to_string()]
        );
        assert!(record.payload().is_none());
        assert!(env.gpu_objects.is_empty());
    }

    #[test]
    fn test_job_thread_marker() {
        assert!(!on_job_thread());
        let config = AssetConfig::manual();
        let jobs = JobSystem::new(&config, env(&config));
        let seen = Arc::new(AtomicBool::new(false));
        let record = latched("marker", "data/marker.blob");
        let flag = Arc::clone(&seen);

        jobs.submit(Job::Load {
            path: record.path().clone(),
            loader: Arc::new(move |ctx: &mut LoadContext<'_>| -> AssetResult<()> {
                flag.store(on_job_thread(), Ordering::SeqCst);
                ctx.set_payload(0, Blob(0))
            }),
            records: vec![record],
        });
        jobs.run_pending();

        assert!(seen.load(Ordering::SeqCst));
        assert!(!on_job_thread());
    }

    #[test]
    fn test_rejected_after_shutdown() {
        let config = AssetConfig::manual();
        let jobs = JobSystem::new(&config, env(&config));
        jobs.shutdown();

        let record = latched("late", "data/late.blob");
        assert!(!jobs.submit(Job::PushEvent {
            record,
            listener: crate::event::EventDispatcher::new().add_listener(|_, _| {}),
            event: AssetEvent::Loaded,
        }));
        assert_eq!(jobs.stats().rejected, 1);
    }
}

//! Per-extension loader callbacks and the context they run with.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use ember_core::alloc::HashMap;

use crate::Asset;
use crate::error::{AssetError, AssetResult};
use crate::gpu::GpuObjectTable;
use crate::id::AssetType;
use crate::job::JobEnv;
use crate::main_thread::MainThreadQueue;
use crate::path::{AssetPath, normalize_extension};
use crate::record::{AssetRecord, Payload};

/// Which part of the lifecycle a loader is asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskPhase {
    /// Report which records the file produces. Never touches payloads.
    LoadMeta,
    /// Build the payload of every affected record.
    LoadAsset,
    /// Rebuild the payload of every affected record in place.
    RefreshAsset,
    /// Release whatever the payloads hold outside of the record.
    UnloadAsset,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskPhase::LoadMeta => "LoadMeta",
            TaskPhase::LoadAsset => "LoadAsset",
            TaskPhase::RefreshAsset => "RefreshAsset",
            TaskPhase::UnloadAsset => "UnloadAsset",
        };
        f.write_str(name)
    }
}

/// A per-extension loader.
///
/// `LoadMeta` must be idempotent: it may be called speculatively to find out
/// what a file contains. `LoadAsset` and `RefreshAsset` must populate exactly
/// the records in the context. Any closure of the right shape is a loader:
///
/// ```
/// use ember_assets::{AssetResult, LoadContext, LoaderRegistry};
///
/// let mut loaders = LoaderRegistry::new();
/// loaders.register_extensions(&["txt"], |_ctx: &mut LoadContext<'_>| -> AssetResult<()> {
///     Ok(())
/// });
/// assert!(loaders.contains("TXT"));
/// ```
pub trait AssetLoader: Send + Sync + 'static {
    fn process(&self, ctx: &mut LoadContext<'_>) -> AssetResult<()>;
}

impl<F> AssetLoader for F
where
    F: Fn(&mut LoadContext<'_>) -> AssetResult<()> + Send + Sync + 'static,
{
    fn process(&self, ctx: &mut LoadContext<'_>) -> AssetResult<()> {
        self(ctx)
    }
}

/// A record a loader declared during `LoadMeta`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDesc {
    pub name: String,
    pub asset_type: AssetType,
}

impl RecordDesc {
    /// Describe a record named `name` holding a `T`.
    pub fn new<T: Asset>(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            asset_type: AssetType::of::<T>(),
        }
    }
}

/// Maps extensions to loaders.
///
/// Extensions are compared case-insensitively, without the leading dot.
#[derive(Default)]
pub struct LoaderRegistry {
    loaders: HashMap<String, Arc<dyn AssetLoader>>,
}

impl LoaderRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `loader` for every extension in `extensions`, replacing any
    /// previous loader for them.
    pub fn register_extensions(&mut self, extensions: &[&str], loader: impl AssetLoader) {
        self.register_shared(extensions, Arc::new(loader));
    }

    /// Register an already shared loader for every extension in `extensions`.
    pub fn register_shared(&mut self, extensions: &[&str], loader: Arc<dyn AssetLoader>) {
        for extension in extensions {
            let key = normalize_extension(extension);
            if key.is_empty() {
                tracing::warn!("Ignoring empty extension in loader registration");
                continue;
            }
            if self.loaders.insert(key.clone(), Arc::clone(&loader)).is_some() {
                tracing::debug!("Replaced loader for .{}", key);
            } else {
                tracing::debug!("Registered loader for .{}", key);
            }
        }
    }

    /// Returns how many extensions were removed.
    pub fn unregister_extensions(&mut self, extensions: &[&str]) -> usize {
        extensions
            .iter()
            .filter(|extension| self.loaders.remove(&normalize_extension(extension)).is_some())
            .count()
    }

    /// The loader for `extension`, which may include a leading dot.
    pub fn get(&self, extension: &str) -> Option<Arc<dyn AssetLoader>> {
        self.loaders.get(&normalize_extension(extension)).cloned()
    }

    /// Check if a loader is registered for `extension`.
    pub fn contains(&self, extension: &str) -> bool {
        self.loaders.contains_key(&normalize_extension(extension))
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut extensions: Vec<_> = self.loaders.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    /// Number of registered extensions.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl fmt::Debug for LoaderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

/// Everything a loader gets to see while it runs.
pub struct LoadContext<'a> {
    path: &'a AssetPath,
    phase: TaskPhase,
    records: &'a [Arc<AssetRecord>],
    env: &'a JobEnv,
    staged: Vec<Option<Payload>>,
    released: Vec<Option<Payload>>,
    declared: Vec<RecordDesc>,
    release_latch: bool,
}

impl<'a> LoadContext<'a> {
    pub(crate) fn new(
        env: &'a JobEnv,
        path: &'a AssetPath,
        phase: TaskPhase,
        records: &'a [Arc<AssetRecord>],
    ) -> Self {
        Self {
            path,
            phase,
            records,
            env,
            staged: vec![None; records.len()],
            released: Vec::new(),
            declared: Vec::new(),
            release_latch: false,
        }
    }

    pub(crate) fn with_released(mut self, released: Vec<Option<Payload>>) -> Self {
        self.released = released;
        self
    }

    /// Path of the file being processed, relative to the asset root.
    pub fn path(&self) -> &AssetPath {
        self.path
    }

    /// Which step of the lifecycle this call performs.
    pub fn phase(&self) -> TaskPhase {
        self.phase
    }

    /// The records this task affects, in the order payload indices refer to.
    pub fn records(&self) -> &[Arc<AssetRecord>] {
        self.records
    }

    /// The affected record at `index`.
    pub fn record(&self, index: usize) -> Option<&Arc<AssetRecord>> {
        self.records.get(index)
    }

    /// Index of the affected record called `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.records.iter().position(|record| record.name() == name)
    }

    /// The path resolved against the asset root.
    pub fn full_path(&self) -> PathBuf {
        let path = self.path.as_path();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.env.asset_root.join(path)
        }
    }

    /// Read the whole file.
    pub fn read_bytes(&self) -> AssetResult<Vec<u8>> {
        let full_path = self.full_path();
        std::fs::read(&full_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AssetError::NotFound {
                    path: full_path.display().to_string(),
                }
            } else {
                AssetError::Io {
                    path: full_path.clone(),
                    source: e,
                }
            }
        })
    }

    /// Read the whole file as UTF-8.
    pub fn read_to_string(&self) -> AssetResult<String> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| AssetError::loader(self.path, e.to_string()))
    }

    /// Stage the payload for the record at `index`.
    ///
    /// Payloads are committed after the loader returns `Ok`. Fails if the
    /// phase does not build payloads, the index is out of range, or `T` is
    /// not the record's type.
    pub fn set_payload<T: Asset>(&mut self, index: usize, value: T) -> AssetResult<()> {
        self.set_shared_payload(index, Arc::new(value))
    }

    /// Stage an already shared payload for the record at `index`.
    ///
    /// Like [`Self::set_payload`], but lets the loader keep its own `Arc`.
    pub fn set_shared_payload<T: Asset>(&mut self, index: usize, value: Arc<T>) -> AssetResult<()> {
        if !matches!(self.phase, TaskPhase::LoadAsset | TaskPhase::RefreshAsset) {
            return Err(AssetError::usage(format!(
                "set_payload called during {} for {}",
                self.phase, self.path
            )));
        }
        let Some(record) = self.records.get(index) else {
            return Err(AssetError::usage(format!(
                "payload index {} out of range for {} ({} record(s))",
                index,
                self.path,
                self.records.len()
            )));
        };
        if !record.asset_type().is::<T>() {
            return Err(AssetError::TypeMismatch {
                expected: record.asset_type().name(),
                found: T::type_name(),
            });
        }
        let payload: Payload = value;
        self.staged[index] = Some(payload);
        Ok(())
    }

    /// Declare a record the file produces. Only meaningful during `LoadMeta`.
    pub fn declare<T: Asset>(&mut self, name: impl Into<String>) {
        let desc = RecordDesc::new::<T>(name);
        if self.phase != TaskPhase::LoadMeta {
            tracing::warn!(
                "Ignoring declaration of '{}' during {} for {}",
                desc.name,
                self.phase,
                self.path
            );
            return;
        }
        self.declared.push(desc);
    }

    /// The payload the record at `index` held before this unload.
    pub fn released_payload<T: Asset>(&self, index: usize) -> Option<Arc<T>> {
        self.released
            .get(index)?
            .clone()?
            .downcast::<T>()
            .ok()
    }

    /// Queue for work that must run on the graphics-owning thread.
    pub fn main_thread(&self) -> &Arc<MainThreadQueue> {
        &self.env.main_thread
    }

    /// Side-table for binding graphics objects to the records that own them.
    pub fn gpu_objects(&self) -> &GpuObjectTable {
        &self.env.gpu_objects
    }

    /// On failure, reset the affected records to `Unloaded` instead of leaving
    /// them latched in `Loading`.
    pub fn release_latch_on_error(&mut self) {
        self.release_latch = true;
    }

    pub(crate) fn latch_released(&self) -> bool {
        self.release_latch
    }

    pub(crate) fn take_staged(&mut self) -> Vec<Option<Payload>> {
        std::mem::take(&mut self.staged)
    }

    pub(crate) fn take_declared(&mut self) -> Vec<RecordDesc> {
        std::mem::take(&mut self.declared)
    }
}

impl fmt::Debug for LoadContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("path", self.path)
            .field("phase", &self.phase)
            .field("records", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssetConfig;
    use crate::state::LoadState;

    struct Text(String);
    impl Asset for Text {}

    struct Image;
    impl Asset for Image {}

    fn env(root: &std::path::Path) -> JobEnv {
        JobEnv::new(
            &AssetConfig::manual().with_asset_root(root),
            Arc::new(MainThreadQueue::new()),
        )
    }

    #[test]
    fn test_extensions_are_case_insensitive() {
        let mut loaders = LoaderRegistry::new();
        loaders.register_extensions(&[".Mesh", "OBJ"], |_: &mut LoadContext<'_>| -> AssetResult<()> {
            Ok(())
        });

        assert!(loaders.contains("mesh"));
        assert!(loaders.contains(".obj"));
        assert_eq!(loaders.extensions(), vec!["mesh".to_string(), "obj".to_string()]);

        assert_eq!(loaders.unregister_extensions(&["MESH", "png"]), 1);
        assert!(loaders.get("mesh").is_none());
        assert_eq!(loaders.len(), 1);
    }

    #[test]
    fn test_read_bytes_resolves_against_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("text")).unwrap();
        std::fs::write(dir.path().join("text/hello.txt"), "hello").unwrap();

        let env = env(dir.path());
        let path = AssetPath::new("text/./hello.txt");
        let ctx = LoadContext::new(&env, &path, TaskPhase::LoadAsset, &[]);
        assert_eq!(ctx.read_to_string().unwrap(), "hello");

        let missing = AssetPath::new("text/missing.txt");
        let ctx = LoadContext::new(&env, &missing, TaskPhase::LoadAsset, &[]);
        assert!(matches!(ctx.read_bytes(), Err(AssetError::NotFound { .. })));
    }

    #[test]
    fn test_set_payload_checks_type_and_phase() {
        let env = env(std::path::Path::new("."));
        let path = AssetPath::new("notes/readme.txt");
        let records = vec![Arc::new(AssetRecord::detached::<Text>("readme", "notes/readme.txt"))];

        let mut ctx = LoadContext::new(&env, &path, TaskPhase::LoadAsset, &records);
        assert!(matches!(
            ctx.set_payload(0, Image),
            Err(AssetError::TypeMismatch { .. })
        ));
        assert!(matches!(
            ctx.set_payload(1, Text("x".into())),
            Err(AssetError::Usage { .. })
        ));
        ctx.set_payload(0, Text("ok".into())).unwrap();
        assert!(ctx.take_staged()[0].is_some());

        let mut meta = LoadContext::new(&env, &path, TaskPhase::LoadMeta, &records);
        assert!(meta.set_payload(0, Text("early".into())).is_err());
        assert_eq!(records[0].state(), LoadState::Unloaded);
    }

    #[test]
    fn test_declare_only_during_load_meta() {
        let env = env(std::path::Path::new("."));
        let path = AssetPath::new("scenes/level.scene");

        let mut meta = LoadContext::new(&env, &path, TaskPhase::LoadMeta, &[]);
        meta.declare::<Text>("title");
        meta.declare::<Image>("thumbnail");
        let declared = meta.take_declared();
        assert_eq!(declared.len(), 2);
        assert_eq!(declared[1], RecordDesc::new::<Image>("thumbnail"));

        let mut load = LoadContext::new(&env, &path, TaskPhase::LoadAsset, &[]);
        load.declare::<Text>("late");
        assert!(load.take_declared().is_empty());
    }

    #[test]
    fn test_released_payload_downcasts() {
        let env = env(std::path::Path::new("."));
        let path = AssetPath::new("notes/readme.txt");
        let payload: Payload = Arc::new(Text("bye".into()));
        let ctx = LoadContext::new(&env, &path, TaskPhase::UnloadAsset, &[])
            .with_released(vec![Some(payload)]);

        assert_eq!(ctx.released_payload::<Text>(0).map(|t| t.0.clone()), Some("bye".into()));
        assert!(ctx.released_payload::<Image>(0).is_none());
        assert!(ctx.released_payload::<Text>(1).is_none());
    }
}

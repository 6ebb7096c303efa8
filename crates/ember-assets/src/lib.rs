//! Ember asset lifecycle.
//!
//! Named, typed asset records are reference counted by handles. The first
//! reference queues a background load through the extension's loader, the last
//! one queues an unload, and listeners on each record hear about every
//! `Loaded`/`Updated`/`Unloaded` transition. Loaders that need the graphics
//! context hand work to the [`MainThreadQueue`], which the owning thread drains
//! once per frame (and while it is blocked in [`AssetPtr::load_sync`]).
//!
//! # Example
//!
//! ```no_run
//! use ember_assets::prelude::*;
//!
//! struct Mesh {
//!     vertices: Vec<f32>,
//! }
//!
//! impl Asset for Mesh {
//!     fn type_name() -> &'static str {
//!         "Mesh"
//!     }
//! }
//!
//! let server = AssetServer::new(AssetConfig::default());
//! server.register_extensions(&["mesh"], |ctx: &mut LoadContext<'_>| -> AssetResult<()> {
//!     match ctx.phase() {
//!         TaskPhase::LoadMeta => ctx.declare::<Mesh>("cube"),
//!         TaskPhase::LoadAsset | TaskPhase::RefreshAsset => {
//!             let bytes = ctx.read_bytes()?;
//!             let vertices = bytes.iter().map(|b| *b as f32).collect();
//!             ctx.set_payload(0, Mesh { vertices })?;
//!         }
//!         TaskPhase::UnloadAsset => {}
//!     }
//!     Ok(())
//! });
//!
//! let cube = server.load::<Mesh>("models/cube.mesh").expect("cube.mesh");
//! if let Some(mesh) = cube.load_sync() {
//!     println!("{} vertices", mesh.vertices.len());
//! }
//! ```

pub mod config;
mod diagnostics;
pub mod error;
pub mod event;
pub mod gpu;
pub mod handle;
#[cfg(feature = "hot-reload")]
pub mod hot_reload;
pub mod id;
pub mod job;
pub mod loader;
pub mod main_thread;
pub mod path;
pub mod record;
pub mod registry;
pub mod server;
pub mod state;

pub use config::AssetConfig;
pub use diagnostics::Referrer;
pub use error::{AssetError, AssetResult};
pub use event::{AssetEvent, EventDispatcher, ListenerId};
pub use gpu::{GpuObjectId, GpuObjectTable};
pub use handle::{AssetPtr, AssetRef};
#[cfg(feature = "hot-reload")]
pub use hot_reload::AssetWatcher;
pub use id::{AssetId, AssetType};
pub use job::{JobKind, JobStats};
pub use loader::{AssetLoader, LoadContext, LoaderRegistry, RecordDesc, TaskPhase};
pub use main_thread::{MainThreadQueue, MainThreadStats, Submission};
pub use path::AssetPath;
pub use record::{AssetRecord, Payload, ReferenceTransition};
pub use registry::AssetRegistry;
pub use server::{AssetServer, ServerStats};
pub use state::{AssetVersion, HandleState, LoadState, RecordFlags};

/// Marker trait for concrete asset kinds (meshes, shaders, textures, scenes).
///
/// The type name is what diagnostics print and what typed handles compare
/// against when validating a record.
pub trait Asset: Send + Sync + 'static {
    /// A human-readable name for this asset type.
    fn type_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        Asset, AssetConfig, AssetError, AssetEvent, AssetId, AssetLoader, AssetPath, AssetPtr,
        AssetRecord, AssetRef, AssetResult, AssetServer, AssetType, GpuObjectId, HandleState,
        LoadContext, LoadState, MainThreadQueue, RecordDesc, TaskPhase,
    };
}

//! Streaming asset example.
//!
//! This example demonstrates:
//! - Loaders that declare several records per file
//! - Background loading on the worker pool
//! - Handing GPU-style work back to the owning thread
//! - Sharing handles across threads
//! - Unloading when the last handle goes away

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use ember_assets::prelude::*;

/// A level's tile grid.
#[derive(Debug)]
struct LevelData {
    width: u32,
    height: u32,
    tiles: Vec<u8>,
}

impl Asset for LevelData {
    fn type_name() -> &'static str {
        "LevelData"
    }
}

/// The level's tile atlas, uploaded on the main thread.
#[derive(Debug)]
struct TileAtlas {
    texture: u64,
}

impl Asset for TileAtlas {
    fn type_name() -> &'static str {
        "TileAtlas"
    }
}

static NEXT_TEXTURE: AtomicU64 = AtomicU64::new(1);

/// Level files: `width` and `height` as little-endian u32, then one byte per
/// tile. Each file yields a `LevelData` and a `TileAtlas`.
fn level_loader(ctx: &mut LoadContext<'_>) -> AssetResult<()> {
    match ctx.phase() {
        TaskPhase::LoadMeta => {
            let stem = ctx.path().file_stem().unwrap_or("level").to_string();
            ctx.declare::<LevelData>(format!("{}/data", stem));
            ctx.declare::<TileAtlas>(format!("{}/atlas", stem));
        }
        TaskPhase::LoadAsset | TaskPhase::RefreshAsset => {
            let bytes = ctx.read_bytes()?;
            if bytes.len() < 8 {
                return Err(AssetError::loader(ctx.path(), "level file too small"));
            }
            let width = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let height = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            let tiles = bytes[8..].to_vec();

            // Simulate parsing work
            thread::sleep(Duration::from_millis(30));

            let texture = ctx
                .main_thread()
                .run_blocking(move || {
                    let texture = NEXT_TEXTURE.fetch_add(1, Ordering::Relaxed);
                    println!(
                        "[{:?}] uploading {}x{} atlas as texture #{}",
                        thread::current().name().unwrap_or("?"),
                        width,
                        height,
                        texture
                    );
                    texture
                })
                .ok_or(AssetError::ShuttingDown)?;

            for index in 0..ctx.records().len() {
                if ctx.records()[index].asset_type().is::<LevelData>() {
                    ctx.set_payload(
                        index,
                        LevelData {
                            width,
                            height,
                            tiles: tiles.clone(),
                        },
                    )?;
                } else {
                    let atlas = ctx.records()[index].id();
                    ctx.gpu_objects().bind(GpuObjectId::new(texture), atlas);
                    ctx.set_payload(index, TileAtlas { texture })?;
                }
            }
        }
        TaskPhase::UnloadAsset => {
            for index in 0..ctx.records().len() {
                if let Some(atlas) = ctx.released_payload::<TileAtlas>(index) {
                    ctx.gpu_objects().unbind(GpuObjectId::new(atlas.texture));
                    ctx.main_thread().submit(
                        move || println!("releasing texture #{}", atlas.texture),
                        false,
                    );
                }
            }
        }
    }
    Ok(())
}

fn write_level(dir: &std::path::Path, name: &str, width: u32, height: u32) -> std::io::Result<()> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&width.to_le_bytes());
    bytes.extend_from_slice(&height.to_le_bytes());
    bytes.extend((0..width * height).map(|i| (i % 7) as u8));
    std::fs::write(dir.join(name), bytes)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    ember_core::logging::init();

    println!("=== Streaming Asset Example ===\n");

    let temp_dir = tempfile::tempdir()?;
    for (i, size) in [8, 16, 32, 64].into_iter().enumerate() {
        write_level(temp_dir.path(), &format!("level{}.lvl", i + 1), size, size)?;
    }

    let server = AssetServer::new(AssetConfig::from_env().with_asset_root(temp_dir.path()));
    server.register_extensions(&["lvl", "level"], level_loader);
    println!("Server running {} worker(s)\n", server.worker_count());

    // Kick off every level at once; they load in the background.
    let levels: Vec<AssetPtr<LevelData>> = (1..=4)
        .map(|i| server.load::<LevelData>(format!("level{}.lvl", i)))
        .collect::<AssetResult<_>>()?;

    // Another thread holds its own references to the first two levels.
    let records: Vec<_> = levels.iter().take(2).filter_map(|level| level.record()).collect();
    let observer = thread::spawn(move || {
        let handles: Vec<_> = records.iter().map(AssetPtr::<LevelData>::new).collect();
        for _ in 0..50 {
            if handles.iter().all(|handle| handle.is_loaded()) {
                return handles.len();
            }
            thread::sleep(Duration::from_millis(10));
        }
        0
    });

    // The main loop drains GPU work until everything is in.
    let mut frame = 0;
    while !levels.iter().all(|level| level.is_loaded()) {
        ember_core::profiling::new_frame();
        server.update();
        frame += 1;
        thread::sleep(Duration::from_millis(5));
    }
    println!("\nAll levels loaded after {} frame(s)", frame);

    for level in &levels {
        if let Some(data) = level.get() {
            println!(
                "  {}: {}x{}, {} tiles",
                level.record().map(|r| r.name().to_string()).unwrap_or_default(),
                data.width,
                data.height,
                data.tiles.len()
            );
        }
    }

    let atlas = server
        .find_by_name("level1/atlas")
        .ok_or("level1 atlas not registered")?;
    println!("\nlevel1 atlas loaded alongside its data: {}", atlas.is_loaded());

    let seen = observer.join().map_err(|_| "observer thread panicked")?;
    println!("Observer thread saw {} level(s) loaded", seen);

    // Dropping the handles unloads the levels.
    drop(levels);
    server.wait_idle();
    server.update();

    let stats = server.stats();
    println!(
        "\nJobs: {} load(s), {} unload(s), {} completed, {} failed",
        stats.jobs.load_enqueued, stats.jobs.unload_enqueued, stats.jobs.completed, stats.jobs.failed
    );
    println!("GPU objects still bound: {}", server.gpu_objects().len());

    println!("\n=== Example Complete ===");
    Ok(())
}

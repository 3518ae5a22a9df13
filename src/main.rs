use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context as _};
use clap::Parser;
use glam::{DMat4, DVec3};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tileset_streamer::config::{CliArgs, StreamerConfig};
use tileset_streamer::render::ResourceStatistics;
use tileset_streamer::scene::{AttributeValue, MemoryStage, SceneHost, ScenePath};
use tileset_streamer::streaming::{FileSourceFactory, RayonAsyncSystem, Viewport};
use tileset_streamer::{tokens, Context, Services, TilesetStatistics};

#[derive(Serialize)]
struct Report {
    frames: u32,
    seconds: f64,
    tileset: TilesetStatistics,
    resources: ResourceStatistics,
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Init tracing
    let filter = if args.verbose {
        EnvFilter::new("tileset_streamer=debug")
    } else {
        EnvFilter::new("tileset_streamer=info")
    };
    if args.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config: StreamerConfig = args.into();

    let async_system = match config.context.threads {
        Some(threads) => RayonAsyncSystem::with_threads(threads).context("Failed to configure rayon thread pool")?,
        None => RayonAsyncSystem::default(),
    };
    let services = Services {
        sources: Arc::new(FileSourceFactory::new(None)),
        async_system: Arc::new(async_system),
    };

    match run(&config, services) {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Streaming failed");
            Err(e).context("tileset-streamer failed")
        }
    }
}

fn run(config: &StreamerConfig, services: Services) -> anyhow::Result<Report> {
    let mut stage = MemoryStage::new(1);
    let mut ctx = Context::new(&stage, config.context.clone(), services);
    ctx.set_georeference_origin(&mut stage, config.longitude, config.latitude, config.height);

    let url = config.tileset.to_string_lossy();
    let handle = ctx.add_tileset_from_url(&mut stage, &url);
    if !handle.is_valid() {
        bail!("could not add tileset {url}");
    }

    // CLI options go through the same path as host edits.
    let Some(path) = ctx
        .registries()
        .assets
        .tileset_by_id(handle.0)
        .filter(|t| t.is_loaded())
        .map(|t| t.path().clone())
    else {
        bail!("could not load tileset {url}");
    };
    let options = &config.tileset_options;
    let edits = [
        (tokens::MAXIMUM_SCREEN_SPACE_ERROR, AttributeValue::Float(options.maximum_screen_space_error)),
        (
            tokens::MAXIMUM_SIMULTANEOUS_TILE_LOADS,
            AttributeValue::Int(options.maximum_simultaneous_tile_loads as i64),
        ),
        (tokens::MAXIMUM_CACHED_BYTES, AttributeValue::Int(options.maximum_cached_bytes as i64)),
    ];
    let mut changed: Vec<ScenePath> = Vec::with_capacity(edits.len());
    for (name, value) in edits {
        stage.set_attribute(&path, name, value);
        changed.push(path.append_property(name));
    }
    ctx.on_objects_changed(&mut stage, &[], &changed);

    info!(
        tileset = %path,
        frames = config.frames,
        distance = config.camera_distance,
        "Streaming"
    );
    let start = Instant::now();
    for frame in 0..config.frames {
        let viewport = orbit_viewport(config, frame);
        ctx.on_update_frame(&mut stage, &[viewport]);
        // Give background loads a frame's worth of time.
        std::thread::sleep(Duration::from_millis(16));
    }
    let seconds = start.elapsed().as_secs_f64();

    let report = Report {
        frames: config.frames,
        seconds,
        tileset: ctx.tileset_statistics(handle).unwrap_or_default(),
        resources: ctx.resource_statistics(),
    };
    ctx.shutdown(&mut stage);
    Ok(report)
}

/// Camera circling the georeference origin, looking at it.
fn orbit_viewport(config: &StreamerConfig, frame: u32) -> Viewport {
    let angle = f64::from(frame) / f64::from(config.frames.max(1)) * std::f64::consts::TAU;
    let d = config.camera_distance;
    let eye = DVec3::new(d * angle.cos(), d * angle.sin(), d * 0.5);
    let view = DMat4::look_at_rh(eye, DVec3::ZERO, DVec3::Z);
    let aspect = config.viewport_width / config.viewport_height.max(1.0);
    let projection = DMat4::perspective_rh_gl(60f64.to_radians(), aspect, 1.0, d * 100.0);
    Viewport {
        view: view.to_cols_array(),
        projection: projection.to_cols_array(),
        width: config.viewport_width,
        height: config.viewport_height,
    }
}

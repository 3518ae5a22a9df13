//! Level-of-detail selection, cache eviction and georeferencing as seen
//! from the scene.

mod common;

use approx::assert_abs_diff_eq;

use tileset_streamer::scene::{AttributeValue, MemoryStage, SceneHost, ScenePath};
use tileset_streamer::{tokens, Context, ContextConfig, TilesetHandle};

use common::*;

fn setup(root_content: bool) -> (MemoryStage, Context, TilesetHandle, ScenePath) {
    let mut stage = MemoryStage::new(1);
    let mut ctx = Context::new(&stage, ContextConfig::default(), inline_services(root_content));
    let handle = ctx.add_tileset_from_url(&mut stage, TILESET_URL);
    let path = ctx
        .registries()
        .assets
        .tileset_by_id(handle.0)
        .map(|t| t.path().clone())
        .unwrap();
    (stage, ctx, handle, path)
}

/// Authors options on the tileset prim the way a host would.
fn edit(stage: &mut MemoryStage, ctx: &mut Context, path: &ScenePath, edits: &[(&str, AttributeValue)]) {
    let mut changed = Vec::new();
    for (name, value) in edits {
        stage.set_attribute(path, name, value.clone());
        changed.push(path.append_property(name));
    }
    ctx.on_objects_changed(stage, &[], &changed);
}

fn visible_mesh_positions(stage: &MemoryStage) -> Vec<[f64; 3]> {
    stage
        .prims_of_type(tokens::MESH_PRIM)
        .into_iter()
        .filter(|p| stage.attribute(p, tokens::WORLD_VISIBILITY) == Some(AttributeValue::Bool(true)))
        .filter_map(|p| stage.attribute(&p, tokens::WORLD_POSITION).and_then(|v| v.as_vec3d()))
        .collect()
}

#[test]
fn detail_follows_camera_distance() {
    let (mut stage, mut ctx, handle, _) = setup(true);

    for _ in 0..3 {
        ctx.on_update_frame(&mut stage, &[far_viewport()]);
    }
    let far = ctx.tileset_statistics(handle).unwrap();
    assert_eq!(far.tiles_rendered, 1);
    assert_eq!(far.max_depth_visited, 0);
    assert_eq!(visible_mesh_positions(&stage).len(), 1);

    for _ in 0..3 {
        ctx.on_update_frame(&mut stage, &[near_viewport()]);
    }
    let near = ctx.tileset_statistics(handle).unwrap();
    assert_eq!(near.tiles_rendered, 2);
    assert_eq!(near.max_depth_visited, 1);
    // The root is hidden once its children replace it.
    assert_eq!(visible_mesh_positions(&stage).len(), 2);
    assert_eq!(ctx.resource_statistics().geometries_rendered, 2);
    assert_eq!(ctx.resource_statistics().geometries_loaded, 3);
}

#[test]
fn culled_tiles_are_released_over_budget() {
    let (mut stage, mut ctx, handle, path) = setup(true);
    edit(
        &mut stage,
        &mut ctx,
        &path,
        &[
            (tokens::MAXIMUM_CACHED_BYTES, AttributeValue::Int(0)),
            (tokens::PRELOAD_SIBLINGS, AttributeValue::Bool(false)),
            (tokens::ENFORCE_CULLED_SCREEN_SPACE_ERROR, AttributeValue::Bool(false)),
        ],
    );
    for _ in 0..3 {
        ctx.on_update_frame(&mut stage, &[near_viewport()]);
    }
    assert_eq!(ctx.tileset_statistics(handle).unwrap().tiles_loaded, 3);

    ctx.on_update_frame(&mut stage, &[away_viewport()]);
    let stats = ctx.tileset_statistics(handle).unwrap();
    assert_eq!(stats.tiles_rendered, 0);
    assert_eq!(stats.tiles_loaded, 0);
    assert_eq!(stats.cached_bytes, 0);
    assert_eq!(ctx.resource_statistics().geometries_loaded, 0);
    assert!(visible_mesh_positions(&stage).is_empty());

    // Released geometry is reused, not rebuilt.
    for _ in 0..3 {
        ctx.on_update_frame(&mut stage, &[near_viewport()]);
    }
    let pools = ctx.resources().geometry_pool_stats();
    assert_eq!(pools.len(), 1);
    assert_eq!(pools[0].1.constructed, 3);
}

#[test]
fn suspended_tileset_keeps_its_selection() {
    let (mut stage, mut ctx, handle, path) = setup(true);
    for _ in 0..3 {
        ctx.on_update_frame(&mut stage, &[near_viewport()]);
    }
    edit(&mut stage, &mut ctx, &path, &[(tokens::SUSPEND_UPDATE, AttributeValue::Bool(true))]);
    for _ in 0..3 {
        ctx.on_update_frame(&mut stage, &[far_viewport()]);
    }
    assert_eq!(ctx.tileset_statistics(handle).unwrap().tiles_rendered, 2);
    assert_eq!(visible_mesh_positions(&stage).len(), 2);
}

#[test]
fn moving_the_origin_moves_loaded_tiles() {
    let (mut stage, mut ctx, _, _) = setup(false);
    ctx.set_georeference_origin(&mut stage, 0.0, 0.0, 0.0);
    for _ in 0..3 {
        ctx.on_update_frame(&mut stage, &[near_viewport()]);
    }
    let before = visible_mesh_positions(&stage);
    assert_eq!(before.len(), 2);
    for p in &before {
        assert_abs_diff_eq!(p[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p[1], 0.0, epsilon = 1e-6);
    }

    // A thousandth of a degree east is about 111.3 m at the equator.
    ctx.set_georeference_origin(&mut stage, 0.001, 0.0, 0.0);
    ctx.on_update_frame(&mut stage, &[near_viewport()]);
    let after = visible_mesh_positions(&stage);
    assert_eq!(after.len(), 2);
    for p in &after {
        assert_abs_diff_eq!(p[0], -111.32, epsilon = 0.05);
        assert_abs_diff_eq!(p[1], 0.0, epsilon = 0.05);
        assert_abs_diff_eq!(p[2], 0.0, epsilon = 0.05);
    }
}

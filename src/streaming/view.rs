use glam::{DMat4, DVec3, DVec4};
use serde::{Deserialize, Serialize};

use crate::transform::ecef::height_above_ellipsoid;
use crate::types::BoundingSphere;

/// A camera as the host reports it, in scene coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// World-to-camera matrix, column-major.
    pub view: [f64; 16],
    /// Camera-to-clip matrix, column-major.
    pub projection: [f64; 16],
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn view_matrix(&self) -> DMat4 {
        DMat4::from_cols_array(&self.view)
    }

    pub fn projection_matrix(&self) -> DMat4 {
        DMat4::from_cols_array(&self.projection)
    }
}

/// Camera heights (m) and atmospheric fog densities, from low orbit down
/// to ground level.
const FOG_HEIGHTS: [f64; 20] = [
    359.393, 800.749, 1275.6501, 2151.1192, 3141.7763, 4777.5198, 6281.2493, 12364.307, 15900.765, 49889.0549,
    78026.8259, 99260.7344, 120036.3873, 151011.0158, 156091.1953, 203849.3112, 274866.9803, 319916.3149,
    493552.0528, 628733.5874,
];
const FOG_DENSITIES: [f64; 20] = [
    2.0e-5, 2.0e-4, 1.0e-4, 7.0e-5, 5.0e-5, 4.0e-5, 3.0e-5, 1.9e-5, 1.0e-5, 8.5e-6, 6.2e-6, 5.8e-6, 5.3e-6,
    5.2e-6, 5.1e-6, 4.2e-6, 4.0e-6, 3.4e-6, 2.6e-6, 2.2e-6,
];

/// Fog density at a camera height, interpolated linearly in the table and
/// clamped at both ends.
pub fn fog_density(height: f64) -> f64 {
    if height <= FOG_HEIGHTS[0] {
        return FOG_DENSITIES[0];
    }
    for i in 1..FOG_HEIGHTS.len() {
        if height <= FOG_HEIGHTS[i] {
            let t = (height - FOG_HEIGHTS[i - 1]) / (FOG_HEIGHTS[i] - FOG_HEIGHTS[i - 1]);
            return FOG_DENSITIES[i - 1] + t * (FOG_DENSITIES[i] - FOG_DENSITIES[i - 1]);
        }
    }
    FOG_DENSITIES[FOG_DENSITIES.len() - 1]
}

/// A viewport resolved into ECEF for tile selection.
#[derive(Debug, Clone)]
pub struct ViewState {
    pub position: DVec3,
    /// Inward-facing planes `(n, d)` with `|n| = 1`; a point `p` is inside
    /// when `n·p + d >= 0`.
    pub planes: Vec<DVec4>,
    pub viewport_height: f64,
    /// `2 tan(fovy / 2)`.
    pub sse_denominator: f64,
    pub fog_density: f64,
}

impl ViewState {
    /// `usd_to_ecef` maps scene coordinates to ECEF.
    pub fn from_viewport(viewport: &Viewport, usd_to_ecef: DMat4) -> Self {
        let view = viewport.view_matrix();
        let projection = viewport.projection_matrix();
        let camera_in_scene = view.inverse().w_axis.truncate();
        let position = usd_to_ecef.transform_point3(camera_in_scene);

        let clip = projection * view * usd_to_ecef.inverse();
        let (r0, r1, r2, r3) = (clip.row(0), clip.row(1), clip.row(2), clip.row(3));
        let planes = [r3 + r0, r3 - r0, r3 + r1, r3 - r1, r3 + r2, r3 - r2]
            .into_iter()
            .filter_map(|p| {
                let len = p.truncate().length();
                (len > 1e-12).then(|| p / len)
            })
            .collect();

        let p11 = projection.y_axis.y;
        let sse_denominator = if p11.abs() > f64::EPSILON { 2.0 / p11 } else { 1.0 };

        Self {
            position,
            planes,
            viewport_height: viewport.height,
            sse_denominator,
            fog_density: fog_density(height_above_ellipsoid(position)),
        }
    }

    pub fn is_bounding_sphere_visible(&self, sphere: &BoundingSphere) -> bool {
        self.planes
            .iter()
            .all(|p| p.truncate().dot(sphere.center) + p.w >= -sphere.radius)
    }

    pub fn distance_to(&self, sphere: &BoundingSphere) -> f64 {
        sphere.distance_to(self.position)
    }

    /// Projected error in pixels. Zero distance (camera inside the volume)
    /// is infinitely large.
    pub fn screen_space_error(&self, geometric_error: f64, distance: f64) -> f64 {
        if distance <= 0.0 {
            return f64::INFINITY;
        }
        geometric_error * self.viewport_height / (distance * self.sse_denominator)
    }

    /// Whether fog fully hides an object at `distance`.
    pub fn is_fog_culled(&self, distance: f64) -> bool {
        let x = self.fog_density * distance;
        1.0 - (-(x * x)).exp() >= 1.0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Camera at `eye` looking at `target` with Z up, 60° vertical fov.
    pub(crate) fn look_at_viewport(eye: DVec3, target: DVec3, height: f64) -> Viewport {
        let view = DMat4::look_at_rh(eye, target, DVec3::Z);
        let projection = DMat4::perspective_rh_gl(60f64.to_radians(), 16.0 / 9.0, 1.0, 1.0e7);
        Viewport {
            view: view.to_cols_array(),
            projection: projection.to_cols_array(),
            width: height * 16.0 / 9.0,
            height,
        }
    }

    fn sphere(center: DVec3, radius: f64) -> BoundingSphere {
        BoundingSphere { center, radius }
    }

    #[test]
    fn frustum_keeps_what_is_in_front() {
        let vp = look_at_viewport(DVec3::new(0.0, -100.0, 0.0), DVec3::ZERO, 1080.0);
        let state = ViewState::from_viewport(&vp, DMat4::IDENTITY);
        assert_relative_eq!(state.position.y, -100.0, epsilon = 1e-9);
        assert!(state.is_bounding_sphere_visible(&sphere(DVec3::ZERO, 1.0)));
        assert!(!state.is_bounding_sphere_visible(&sphere(DVec3::new(0.0, -300.0, 0.0), 1.0)));
        assert!(!state.is_bounding_sphere_visible(&sphere(DVec3::new(500.0, 0.0, 0.0), 1.0)));
        // Large enough to reach back into view.
        assert!(state.is_bounding_sphere_visible(&sphere(DVec3::new(500.0, 0.0, 0.0), 490.0)));
    }

    #[test]
    fn screen_space_error_scales_with_distance() {
        let vp = look_at_viewport(DVec3::new(0.0, -100.0, 0.0), DVec3::ZERO, 1000.0);
        let state = ViewState::from_viewport(&vp, DMat4::IDENTITY);
        let near = state.screen_space_error(10.0, 100.0);
        let far = state.screen_space_error(10.0, 200.0);
        assert_relative_eq!(near, 2.0 * far, epsilon = 1e-9);
        assert_relative_eq!(state.sse_denominator, 2.0 * 30f64.to_radians().tan(), epsilon = 1e-9);
        assert!(state.screen_space_error(1.0, 0.0).is_infinite());
    }

    #[test]
    fn fog_density_interpolates_and_clamps() {
        assert_relative_eq!(fog_density(0.0), 2.0e-5);
        assert_relative_eq!(fog_density(1.0e7), 2.2e-6);
        let mid = fog_density((359.393 + 800.749) / 2.0);
        assert_relative_eq!(mid, 1.1e-4, epsilon = 1e-12);
    }

    #[test]
    fn fog_culls_only_far_objects() {
        let state = ViewState {
            position: DVec3::ZERO,
            planes: Vec::new(),
            viewport_height: 1080.0,
            sse_denominator: 1.0,
            fog_density: 2.0e-4,
        };
        assert!(!state.is_fog_culled(1_000.0));
        assert!(state.is_fog_culled(1.0e6));
    }
}

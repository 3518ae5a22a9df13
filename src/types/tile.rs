use glam::{DMat4, DVec3};

use super::{ImageData, MaterialInfo, MeshPrimitive};
use crate::transform::ecef::geodetic_to_ecef;

/// Axis-aligned bounding box in 3-D.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    /// The degenerate box at the origin.
    pub const ZERO: BoundingBox = BoundingBox {
        min: [0.0; 3],
        max: [0.0; 3],
    };

    /// Centre point of the box.
    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Half-extents along each axis.
    pub fn half_extents(&self) -> [f64; 3] {
        [
            (self.max[0] - self.min[0]) * 0.5,
            (self.max[1] - self.min[1]) * 0.5,
            (self.max[2] - self.min[2]) * 0.5,
        ]
    }

    /// Return the smallest box that contains both `self` and `other`.
    pub fn merge(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: [
                self.min[0].min(other.min[0]),
                self.min[1].min(other.min[1]),
                self.min[2].min(other.min[2]),
            ],
            max: [
                self.max[0].max(other.max[0]),
                self.max[1].max(other.max[1]),
                self.max[2].max(other.max[2]),
            ],
        }
    }

    /// Smallest box containing every point, `None` for an empty slice.
    pub fn from_points(points: &[DVec3]) -> Option<BoundingBox> {
        let first = points.first()?;
        let mut bb = BoundingBox {
            min: first.to_array(),
            max: first.to_array(),
        };
        for p in &points[1..] {
            bb = bb.merge(&BoundingBox {
                min: p.to_array(),
                max: p.to_array(),
            });
        }
        Some(bb)
    }

    pub fn corners(&self) -> [DVec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            DVec3::new(a[0], a[1], a[2]),
            DVec3::new(b[0], a[1], a[2]),
            DVec3::new(a[0], b[1], a[2]),
            DVec3::new(b[0], b[1], a[2]),
            DVec3::new(a[0], a[1], b[2]),
            DVec3::new(b[0], a[1], b[2]),
            DVec3::new(a[0], b[1], b[2]),
            DVec3::new(b[0], b[1], b[2]),
        ]
    }

    /// Axis-aligned box around this box's corners after `transform`.
    pub fn transformed(&self, transform: &DMat4) -> BoundingBox {
        let corners = self.corners().map(|c| transform.transform_point3(c));
        BoundingBox::from_points(&corners).unwrap_or(BoundingBox::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl BoundingSphere {
    pub fn distance_to(&self, point: DVec3) -> f64 {
        (self.center.distance(point) - self.radius).max(0.0)
    }
}

/// A 3D Tiles bounding volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    /// Center followed by three half-axis vectors.
    Box { center: DVec3, half_axes: [DVec3; 3] },
    Sphere(BoundingSphere),
    /// West, south, east, north in radians, then min and max height.
    Region {
        west: f64,
        south: f64,
        east: f64,
        north: f64,
        min_height: f64,
        max_height: f64,
    },
}

impl BoundingVolume {
    /// Parses the `box`, `sphere` or `region` arrays of a tileset.json
    /// bounding volume.
    pub fn from_arrays(
        box_values: Option<&[f64]>,
        sphere: Option<&[f64]>,
        region: Option<&[f64]>,
    ) -> Option<BoundingVolume> {
        if let Some(b) = box_values {
            if b.len() != 12 {
                return None;
            }
            return Some(BoundingVolume::Box {
                center: DVec3::new(b[0], b[1], b[2]),
                half_axes: [
                    DVec3::new(b[3], b[4], b[5]),
                    DVec3::new(b[6], b[7], b[8]),
                    DVec3::new(b[9], b[10], b[11]),
                ],
            });
        }
        if let Some(r) = region {
            if r.len() != 6 {
                return None;
            }
            return Some(BoundingVolume::Region {
                west: r[0],
                south: r[1],
                east: r[2],
                north: r[3],
                min_height: r[4],
                max_height: r[5],
            });
        }
        if let Some(s) = sphere {
            if s.len() != 4 || s[3] < 0.0 {
                return None;
            }
            return Some(BoundingVolume::Sphere(BoundingSphere {
                center: DVec3::new(s[0], s[1], s[2]),
                radius: s[3],
            }));
        }
        None
    }

    /// Bounding sphere in ECEF. Boxes and spheres are placed by the tile's
    /// world transform; regions are already geographic.
    pub fn to_sphere(&self, transform: &DMat4) -> BoundingSphere {
        match self {
            BoundingVolume::Box { center, half_axes } => {
                let c = transform.transform_point3(*center);
                let axes = half_axes.map(|a| transform.transform_vector3(a));
                let radius = (axes[0].length_squared()
                    + axes[1].length_squared()
                    + axes[2].length_squared())
                .sqrt();
                BoundingSphere { center: c, radius }
            }
            BoundingVolume::Sphere(s) => {
                let scale = transform
                    .x_axis
                    .truncate()
                    .length()
                    .max(transform.y_axis.truncate().length())
                    .max(transform.z_axis.truncate().length());
                BoundingSphere {
                    center: transform.transform_point3(s.center),
                    radius: s.radius * scale,
                }
            }
            BoundingVolume::Region {
                west,
                south,
                east,
                north,
                min_height,
                max_height,
            } => {
                let mut points = Vec::with_capacity(18);
                for lon in [*west, (west + east) * 0.5, *east] {
                    for lat in [*south, (south + north) * 0.5, *north] {
                        for h in [*min_height, *max_height] {
                            let p = geodetic_to_ecef(lon.to_degrees(), lat.to_degrees(), h);
                            points.push(DVec3::from_array(p));
                        }
                    }
                }
                let center = points.iter().copied().sum::<DVec3>() / points.len() as f64;
                let radius = points
                    .iter()
                    .map(|p| p.distance(center))
                    .fold(0.0, f64::max);
                BoundingSphere { center, radius }
            }
        }
    }
}

/// Decoded content of one tile: primitives, their materials and images.
#[derive(Debug, Clone, Default)]
pub struct TileModel {
    pub primitives: Vec<MeshPrimitive>,
    pub materials: Vec<MaterialInfo>,
    pub images: Vec<ImageData>,
    /// `RTC_CENTER` of batched content, in tile (Z-up) space.
    pub rtc_center: Option<[f64; 3]>,
}

impl TileModel {
    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    /// Approximate memory held by this content, used for cache accounting.
    pub fn byte_size(&self) -> usize {
        self.primitives.iter().map(MeshPrimitive::byte_size).sum::<usize>()
            + self.images.iter().map(ImageData::byte_size).sum::<usize>()
    }
}

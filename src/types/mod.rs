pub mod material;
pub mod mesh;
pub mod tile;

pub use material::{AlphaMode, ImageData, MaterialInfo};
pub use mesh::{MeshPrimitive, PrimitiveMode};
pub use tile::{BoundingBox, BoundingSphere, BoundingVolume, TileModel};

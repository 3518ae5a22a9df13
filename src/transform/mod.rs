pub mod ecef;
pub mod georeference;

pub use georeference::{Cartographic, Georeference};

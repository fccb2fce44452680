//! Tile planning: which assets, levels and source tiles make up a destination
//! tile, and where each lands.

pub mod composition;
pub mod intersect;

pub use composition::{build, compositions, Composition, Resize, SourceTile};
pub use intersect::{intersect, select_level, Intersection};

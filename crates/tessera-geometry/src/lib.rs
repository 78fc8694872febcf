//! Planar tessellation of cell positions.
//!
//! Triangulates with `delaunator`, derives the dual Voronoi regions and
//! ridges, and exposes the outer/inner classification and the weighted
//! neighbor graph used by the population and by derivative functions.

pub mod polygon;
pub mod tessellation;

pub use polygon::{convex_hull, convex_hull_area, principal_axis};
pub use tessellation::{NeighborWeights, Region, Ridge, TessellationGraph, MAX_RIDGE_LENGTH};

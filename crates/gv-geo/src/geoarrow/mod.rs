//! Columnar geometry buffers for rendering
//!
//! WKB rows coming out of a map query are regrouped by geometry kind into
//! GeoArrow-style tables: flat coordinate arrays plus offsets, ready to hand to
//! a GPU layer without per-feature objects.

mod builder;
mod table;

pub use builder::{build, build_from_map_result};
pub use table::*;

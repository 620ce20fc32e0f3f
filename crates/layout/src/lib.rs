//! Grid layout: maps a linear instance index to a unique position in a
//! cube-packed grid normalized into `[-1, 1]^3`.
//!
//! # Invariants
//! - Decoded cells are unique across indices and lie in `[0, dim)`.
//! - The mapping is pure; identical inputs give bit-identical output.
//! - The device kernel is the source of truth at runtime. This crate is the
//!   host mirror used for verification and CPU-side previews.

mod grid;

pub use grid::{GridCoord, GridLayout, LayoutError, cube_dim, normalize_axis};

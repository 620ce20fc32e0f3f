//! wgpu render backend for the instance grid.
//!
//! Draws a grid floor and one cube per instance. Cube translations are read
//! directly from the compute-written position buffer, bound as a
//! per-instance vertex stream.
//!
//! # Invariants
//! - The renderer only reads the position buffer.
//! - Cubes are drawn only once the dispatch has been submitted.

mod gpu;
mod shaders;

pub use gpu::{DEFAULT_CUBE_SIZE, InstancedGridRenderer};
pub use shaders::cube_shader_source;

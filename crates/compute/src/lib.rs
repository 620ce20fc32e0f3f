//! GPU side of the instance grid: the position buffer, the layout compute
//! kernel, and the coordinator that sequences them.
//!
//! Data flow: `DispatchCoordinator` allocates a `ComputeBuffer`, dispatches
//! the layout kernel over every index, then hands the buffer to the render
//! path as per-instance offsets. Host readback is optional and diagnostic.
//!
//! # Invariants
//! - Each kernel lane writes exactly one disjoint record; no lane reads
//!   another's output.
//! - The dispatch is submitted before any render or readback that uses the
//!   buffer. Device queue ordering, not a host lock, makes writes visible.
//! - The buffer is never resized. A new instance count means a new buffer.

mod buffer;
mod context;
mod coordinator;
mod error;
mod kernel;
mod shaders;

pub use buffer::{ComputeBuffer, InstanceOffsets, PendingReadback};
pub use context::GpuContext;
pub use coordinator::{CoordinatorState, DispatchCoordinator};
pub use error::{AllocationError, ContextError, CoordinatorError, DispatchError, ReadbackError};
pub use kernel::{LayoutKernel, MAX_WORKGROUPS_PER_DIMENSION, dispatch_grid};
pub use shaders::layout_kernel_source;

pub fn crate_info() -> &'static str {
    "cubegrid-compute v0.1.0"
}

use crate::coordinator::CoordinatorState;

/// Failure to obtain a device.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("no compatible GPU adapter found")]
    AdapterNotFound,
    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

/// Failure to reserve the position buffer. Not retryable: reduce the instance
/// count or free other device memory.
#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error("instance count must be at least 1")]
    EmptyCount,
    #[error("instance count {count} exceeds the supported maximum of {max}")]
    TooManyInstances { count: u32, max: u32 },
    #[error("buffer of {requested} bytes exceeds the device limit of {limit} bytes")]
    ExceedsDeviceLimit { requested: u64, limit: u64 },
    #[error("device out of memory: {0}")]
    OutOfMemory(String),
    #[error("device lost")]
    DeviceLost,
}

/// Failure to compile or submit the layout kernel. Fatal for the device
/// context; recovery means recreating the context.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("layout kernel failed to compile: {0}")]
    KernelCompilation(String),
    #[error("workgroup size must be within 1..={max}, got {size}")]
    InvalidWorkgroupSize { size: u32, max: u32 },
    #[error("device lost")]
    DeviceLost,
}

/// Failure of a diagnostic host readback. Never affects rendering.
#[derive(Debug, thiserror::Error)]
pub enum ReadbackError {
    #[error("no position buffer has been allocated")]
    NoBuffer,
    #[error("device lost")]
    DeviceLost,
    #[error("failed to map staging buffer: {0}")]
    MapFailed(#[from] wgpu::BufferAsyncError),
    #[error("readback was dropped before the device completed it")]
    Cancelled,
}

/// Errors surfaced by [`crate::DispatchCoordinator`].
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("cannot {operation} while {state}")]
    InvalidTransition {
        state: CoordinatorState,
        operation: &'static str,
    },
}

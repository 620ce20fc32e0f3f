use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cubegrid_common::{GridConfig, PositionSnapshot};

use crate::buffer::{ComputeBuffer, InstanceOffsets, PendingReadback};
use crate::context::GpuContext;
use crate::error::{CoordinatorError, DispatchError, ReadbackError};
use crate::kernel::LayoutKernel;

/// Lifecycle of a [`DispatchCoordinator`] for one instance count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    BufferAllocated,
    DispatchIssued,
    Ready,
}

impl std::fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CoordinatorState::Uninitialized => "uninitialized",
            CoordinatorState::BufferAllocated => "buffer allocated",
            CoordinatorState::DispatchIssued => "dispatch issued",
            CoordinatorState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Sequences buffer allocation, the one-shot layout dispatch, and hand-off of
/// the populated buffer to the render path.
///
/// `Ready` is terminal for a given instance count. A different count needs
/// [`DispatchCoordinator::reconfigure`], which tears everything down first.
pub struct DispatchCoordinator {
    config: GridConfig,
    state: CoordinatorState,
    buffer: Option<ComputeBuffer>,
    kernel: Option<LayoutKernel>,
    work_done: Arc<AtomicBool>,
}

impl DispatchCoordinator {
    pub fn new(config: GridConfig) -> Self {
        Self {
            config,
            state: CoordinatorState::Uninitialized,
            buffer: None,
            kernel: None,
            work_done: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Allocate the buffer and submit the layout dispatch.
    ///
    /// Allocation failure leaves the coordinator `Uninitialized`. A dispatch
    /// failure releases the buffer, returns to `Uninitialized`, and is fatal
    /// for the context; it is not retried here.
    pub async fn initialize(&mut self, ctx: &GpuContext) -> Result<(), CoordinatorError> {
        if self.state != CoordinatorState::Uninitialized {
            return Err(CoordinatorError::InvalidTransition {
                state: self.state,
                operation: "initialize",
            });
        }
        tracing::info!(
            count = self.config.instance_count,
            stride = %self.config.stride,
            workgroup_size = self.config.workgroup_size,
            "initializing position buffer"
        );

        let buffer =
            ComputeBuffer::allocate(ctx, self.config.instance_count, self.config.stride).await?;
        self.transition(CoordinatorState::BufferAllocated);

        let kernel = match self.kernel.take() {
            Some(kernel) => kernel,
            None => match LayoutKernel::compile(ctx, self.config.workgroup_size).await {
                Ok(kernel) => kernel,
                Err(e) => return Err(self.abort(buffer, e)),
            },
        };
        if let Err(e) = submit_dispatch(ctx, &kernel, &buffer, &self.work_done) {
            return Err(self.abort(buffer, e));
        }

        self.kernel = Some(kernel);
        self.buffer = Some(buffer);
        self.transition(CoordinatorState::DispatchIssued);
        Ok(())
    }

    fn abort(&mut self, buffer: ComputeBuffer, error: DispatchError) -> CoordinatorError {
        tracing::error!("layout dispatch failed: {error}");
        buffer.destroy();
        self.teardown();
        error.into()
    }

    /// Promote `DispatchIssued` to `Ready` if the device has finished the
    /// dispatch. Never blocks.
    pub fn poll_ready(&mut self, ctx: &GpuContext) -> CoordinatorState {
        if self.state == CoordinatorState::DispatchIssued {
            ctx.poll();
            self.promote_if_done();
        }
        self.state
    }

    /// Block until the dispatch has completed on the device.
    pub async fn wait_ready(&mut self, ctx: &GpuContext) -> CoordinatorState {
        if self.state == CoordinatorState::DispatchIssued {
            ctx.wait_idle();
            self.promote_if_done();
        }
        self.state
    }

    fn promote_if_done(&mut self) {
        if self.work_done.load(Ordering::SeqCst) {
            self.transition(CoordinatorState::Ready);
        }
    }

    /// The buffer as a per-instance offset source. Available once the dispatch
    /// has been submitted: device queue ordering runs it before any render
    /// work submitted afterwards.
    pub fn instance_offsets(&self) -> Option<InstanceOffsets<'_>> {
        match self.state {
            CoordinatorState::DispatchIssued | CoordinatorState::Ready => {
                self.buffer.as_ref().map(ComputeBuffer::offsets)
            }
            _ => None,
        }
    }

    /// Fire-and-forget diagnostic readback; poll the handle from the frame loop.
    pub fn request_readback(&self, ctx: &GpuContext) -> Result<PendingReadback, ReadbackError> {
        self.buffer
            .as_ref()
            .ok_or(ReadbackError::NoBuffer)?
            .request_readback(ctx)
    }

    /// Await a full copy of the buffer on the host.
    pub async fn export_to_host(&self, ctx: &GpuContext) -> Result<PositionSnapshot, ReadbackError> {
        let buffer = self.buffer.as_ref().ok_or(ReadbackError::NoBuffer)?;
        buffer.export_to_host(ctx).await
    }

    /// Destroy the buffer and kernel and return to `Uninitialized`.
    pub fn teardown(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy();
        }
        self.kernel = None;
        self.work_done.store(false, Ordering::SeqCst);
        self.transition(CoordinatorState::Uninitialized);
    }

    /// Replace the config. The existing buffer cannot be resized, so this
    /// tears down; call [`DispatchCoordinator::initialize`] again afterwards.
    pub fn reconfigure(&mut self, config: GridConfig) {
        self.teardown();
        self.config = config;
    }

    fn transition(&mut self, next: CoordinatorState) {
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "coordinator state");
            self.state = next;
        }
    }
}

/// Encode and submit one layout dispatch over `buffer`. `work_done` flips to
/// true once the device has executed it.
fn submit_dispatch(
    ctx: &GpuContext,
    kernel: &LayoutKernel,
    buffer: &ComputeBuffer,
    work_done: &Arc<AtomicBool>,
) -> Result<(), DispatchError> {
    if ctx.is_lost() {
        return Err(DispatchError::DeviceLost);
    }

    let mut encoder = ctx
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("layout_encoder"),
        });
    kernel.encode(ctx, &mut encoder, buffer);

    work_done.store(false, Ordering::SeqCst);
    ctx.queue().submit(std::iter::once(encoder.finish()));
    let done = work_done.clone();
    ctx.queue().on_submitted_work_done(move || {
        done.store(true, Ordering::SeqCst);
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support;
    use crate::error::AllocationError;
    use cubegrid_common::Stride;
    use cubegrid_layout::GridLayout;

    const TOLERANCE: f32 = 1e-5;

    fn run(ctx: &GpuContext, config: GridConfig) -> (DispatchCoordinator, PositionSnapshot) {
        let mut coordinator = DispatchCoordinator::new(config);
        pollster::block_on(coordinator.initialize(ctx)).unwrap();
        let snap = pollster::block_on(coordinator.export_to_host(ctx)).unwrap();
        (coordinator, snap)
    }

    fn assert_matches_layout(snap: &PositionSnapshot) {
        let layout = GridLayout::new(snap.count).unwrap();
        for i in 0..snap.count {
            let expected = layout.position(i);
            let actual = snap.position(i);
            assert!(
                (expected - actual).abs().max_element() <= TOLERANCE,
                "index {i}: expected {expected}, got {actual}"
            );
            if snap.stride == Stride::Vec4 {
                assert_eq!(snap.record(i)[3], 0.0);
            }
        }
    }

    #[test]
    fn state_display() {
        assert_eq!(CoordinatorState::DispatchIssued.to_string(), "dispatch issued");
    }

    #[test]
    fn new_coordinator_has_no_offsets() {
        let coordinator = DispatchCoordinator::new(GridConfig::default());
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
        assert!(coordinator.instance_offsets().is_none());
    }

    #[test]
    fn readback_without_buffer_fails() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let coordinator = DispatchCoordinator::new(GridConfig::default());
        assert!(matches!(
            coordinator.request_readback(&ctx),
            Err(ReadbackError::NoBuffer)
        ));
    }

    #[test]
    fn initialize_reaches_ready() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let mut coordinator = DispatchCoordinator::new(GridConfig::with_count(64));
        pollster::block_on(coordinator.initialize(&ctx)).unwrap();
        assert!(matches!(
            coordinator.state(),
            CoordinatorState::DispatchIssued | CoordinatorState::Ready
        ));
        assert!(coordinator.instance_offsets().is_some());

        let state = pollster::block_on(coordinator.wait_ready(&ctx));
        assert_eq!(state, CoordinatorState::Ready);
        assert_eq!(coordinator.poll_ready(&ctx), CoordinatorState::Ready);
        let offsets = coordinator.instance_offsets().unwrap();
        assert_eq!(offsets.count, 64);
    }

    #[test]
    fn double_initialize_is_rejected() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let mut coordinator = DispatchCoordinator::new(GridConfig::with_count(8));
        pollster::block_on(coordinator.initialize(&ctx)).unwrap();
        let err = pollster::block_on(coordinator.initialize(&ctx)).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::InvalidTransition {
                operation: "initialize",
                ..
            }
        ));
    }

    #[test]
    fn allocation_failure_stays_uninitialized() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let mut coordinator = DispatchCoordinator::new(GridConfig::with_count(0));
        let err = pollster::block_on(coordinator.initialize(&ctx)).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Allocation(AllocationError::EmptyCount)
        ));
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
    }

    #[test]
    fn bad_workgroup_size_is_dispatch_error() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let config = GridConfig {
            workgroup_size: 0,
            ..GridConfig::with_count(8)
        };
        let mut coordinator = DispatchCoordinator::new(config);
        let err = pollster::block_on(coordinator.initialize(&ctx)).unwrap_err();
        assert!(matches!(err, CoordinatorError::Dispatch(_)));
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
        assert!(coordinator.instance_offsets().is_none());
    }

    #[test]
    fn dispatch_fills_buffer_with_layout() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        for (count, stride, workgroup_size) in [
            (1, Stride::Vec3, 64),
            (5, Stride::Vec4, 8),
            (8, Stride::Vec3, 8),
            (1000, Stride::Vec4, 64),
            (1000, Stride::Vec3, 7),
            (4097, Stride::Vec3, 256),
        ] {
            let config = GridConfig {
                instance_count: count,
                stride,
                workgroup_size,
                readback_on_init: false,
            };
            let (_, snap) = run(&ctx, config);
            assert_eq!(snap.count, count);
            assert_eq!(
                snap.data.len(),
                count as usize * stride.components() as usize
            );
            assert_matches_layout(&snap);
        }
    }

    #[test]
    fn known_positions_on_device() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let (_, one) = run(&ctx, GridConfig::with_count(1));
        assert_eq!(one.record(0), &[0.0, 0.0, 0.0]);

        let (_, thousand) = run(&ctx, GridConfig::with_count(1000));
        let last = thousand.record(999);
        assert!(last.iter().all(|c| (c - 1.0).abs() <= TOLERANCE), "{last:?}");
        let first = thousand.record(0);
        assert!(first.iter().all(|c| (c + 1.0).abs() <= TOLERANCE), "{first:?}");
    }

    #[test]
    fn redispatch_is_idempotent() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let (mut coordinator, first) = run(&ctx, GridConfig::with_count(343));
        coordinator.teardown();
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);
        assert!(coordinator.instance_offsets().is_none());

        pollster::block_on(coordinator.initialize(&ctx)).unwrap();
        let second = pollster::block_on(coordinator.export_to_host(&ctx)).unwrap();
        assert_eq!(
            first.data.iter().map(|f| f.to_bits()).collect::<Vec<_>>(),
            second.data.iter().map(|f| f.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn reconfigure_recreates_for_new_count() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let (mut coordinator, _) = run(&ctx, GridConfig::with_count(8));
        coordinator.reconfigure(GridConfig {
            stride: Stride::Vec4,
            ..GridConfig::with_count(27)
        });
        assert_eq!(coordinator.state(), CoordinatorState::Uninitialized);

        pollster::block_on(coordinator.initialize(&ctx)).unwrap();
        let snap = pollster::block_on(coordinator.export_to_host(&ctx)).unwrap();
        assert_eq!(snap.count, 27);
        assert_eq!(snap.stride, Stride::Vec4);
        assert_matches_layout(&snap);
    }

    #[test]
    fn fire_and_forget_readback_lands_after_polling() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let mut coordinator = DispatchCoordinator::new(GridConfig::with_count(125));
        pollster::block_on(coordinator.initialize(&ctx)).unwrap();
        let mut pending = coordinator.request_readback(&ctx).unwrap();

        let mut snapshot = None;
        for _ in 0..10_000 {
            coordinator.poll_ready(&ctx);
            ctx.poll();
            if let Some(result) = pending.try_take() {
                snapshot = Some(result.unwrap());
                break;
            }
            std::thread::yield_now();
        }
        let snap = match snapshot {
            Some(snap) => snap,
            None => {
                ctx.wait_idle();
                pending.try_take().expect("readback resolved").unwrap()
            }
        };
        assert_matches_layout(&snap);
    }
}

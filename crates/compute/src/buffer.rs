use cubegrid_common::{MAX_INSTANCE_COUNT, PositionSnapshot, Stride};
use futures::channel::oneshot;

use crate::context::GpuContext;
use crate::error::{AllocationError, ReadbackError};

type MapResult = Result<(), wgpu::BufferAsyncError>;

/// Device-resident array of `count` position records.
///
/// Written only by the layout kernel, read by the render pass as a
/// per-instance vertex buffer, and copied out on demand for diagnostics.
/// The contents start zeroed; reading before a dispatch yields zeros.
pub struct ComputeBuffer {
    buffer: wgpu::Buffer,
    count: u32,
    stride: Stride,
}

impl ComputeBuffer {
    /// Reserve zero-initialized storage for `count` records of `stride` floats.
    pub async fn allocate(
        ctx: &GpuContext,
        count: u32,
        stride: Stride,
    ) -> Result<Self, AllocationError> {
        if count == 0 {
            return Err(AllocationError::EmptyCount);
        }
        if count > MAX_INSTANCE_COUNT {
            return Err(AllocationError::TooManyInstances {
                count,
                max: MAX_INSTANCE_COUNT,
            });
        }
        if ctx.is_lost() {
            return Err(AllocationError::DeviceLost);
        }

        let size = count as u64 * stride.record_bytes();
        let limits = ctx.device().limits();
        let limit = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64);
        if size > limit {
            return Err(AllocationError::ExceedsDeviceLimit {
                requested: size,
                limit,
            });
        }

        let device = ctx.device();
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("position_buffer"),
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        if let Some(err) = device.pop_error_scope().await {
            return Err(AllocationError::OutOfMemory(err.to_string()));
        }

        tracing::debug!(count, %stride, bytes = size, "position buffer allocated");
        Ok(Self {
            buffer,
            count,
            stride,
        })
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn stride(&self) -> Stride {
        self.stride
    }

    /// Backing size: `count * stride * 4` bytes.
    pub fn byte_len(&self) -> u64 {
        self.buffer.size()
    }

    /// Underlying wgpu buffer.
    pub fn raw(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    /// Read-only view handed to the render path.
    pub fn offsets(&self) -> InstanceOffsets<'_> {
        InstanceOffsets {
            buffer: &self.buffer,
            count: self.count,
            stride: self.stride,
        }
    }

    /// Start copying the buffer to host memory. Never blocks: the returned
    /// handle completes once the device has processed the copy and a later
    /// `poll` delivers the map callback.
    ///
    /// Queue ordering places the copy after any dispatch submitted earlier,
    /// so the snapshot reflects every completed write.
    pub fn request_readback(&self, ctx: &GpuContext) -> Result<PendingReadback, ReadbackError> {
        if ctx.is_lost() {
            return Err(ReadbackError::DeviceLost);
        }

        let device = ctx.device();
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("position_readback"),
            size: self.byte_len(),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback_encoder"),
        });
        encoder.copy_buffer_to_buffer(&self.buffer, 0, &staging, 0, self.byte_len());
        ctx.queue().submit(std::iter::once(encoder.finish()));

        let (tx, rx) = oneshot::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                // Receiver gone means the readback was abandoned.
                let _ = tx.send(result);
            });

        tracing::debug!(bytes = self.byte_len(), "readback requested");
        Ok(PendingReadback {
            staging,
            receiver: Some(rx),
            count: self.count,
            stride: self.stride,
        })
    }

    /// Copy the whole buffer to host memory, suspending until the device has
    /// finished all pending writes and the transfer.
    pub async fn export_to_host(&self, ctx: &GpuContext) -> Result<PositionSnapshot, ReadbackError> {
        let pending = self.request_readback(ctx)?;
        ctx.wait_idle();
        if ctx.is_lost() {
            return Err(ReadbackError::DeviceLost);
        }
        pending.finish().await
    }

    /// Release device memory now instead of on drop.
    pub fn destroy(self) {
        self.buffer.destroy();
    }
}

/// Borrowed render-side view of a populated [`ComputeBuffer`].
///
/// Record `i` is the translation applied to instance `i`.
#[derive(Clone, Copy)]
pub struct InstanceOffsets<'a> {
    pub buffer: &'a wgpu::Buffer,
    pub count: u32,
    pub stride: Stride,
}

impl<'a> InstanceOffsets<'a> {
    /// Slice to bind as the per-instance vertex buffer.
    pub fn slice(&self) -> wgpu::BufferSlice<'a> {
        self.buffer.slice(..)
    }

    /// Vertex format matching one record.
    pub fn vertex_format(&self) -> wgpu::VertexFormat {
        match self.stride {
            Stride::Vec3 => wgpu::VertexFormat::Float32x3,
            Stride::Vec4 => wgpu::VertexFormat::Float32x4,
        }
    }
}

/// An in-flight host readback.
pub struct PendingReadback {
    staging: wgpu::Buffer,
    receiver: Option<oneshot::Receiver<MapResult>>,
    count: u32,
    stride: Stride,
}

impl PendingReadback {
    /// Non-blocking check. `None` while the transfer is in flight; once a
    /// result has been returned, later calls return `None` as well.
    pub fn try_take(&mut self) -> Option<Result<PositionSnapshot, ReadbackError>> {
        let receiver = self.receiver.as_mut()?;
        let outcome = match receiver.try_recv() {
            Ok(None) => return None,
            Ok(Some(result)) => result.map_err(ReadbackError::from),
            Err(oneshot::Canceled) => Err(ReadbackError::Cancelled),
        };
        self.receiver = None;
        Some(outcome.map(|()| self.read_mapped()))
    }

    /// Wait for the mapping to resolve. Something must still drive the
    /// device (`GpuContext::poll` or `wait_idle`) for this to complete.
    pub async fn finish(mut self) -> Result<PositionSnapshot, ReadbackError> {
        let receiver = self.receiver.take().ok_or(ReadbackError::Cancelled)?;
        let result = receiver.await.map_err(|_| ReadbackError::Cancelled)?;
        result?;
        Ok(self.read_mapped())
    }

    pub fn is_done(&self) -> bool {
        self.receiver.is_none()
    }

    fn read_mapped(&self) -> PositionSnapshot {
        let data = {
            let view = self.staging.slice(..).get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&view).to_vec()
        };
        self.staging.unmap();
        tracing::info!(count = self.count, stride = %self.stride, "readback complete");
        PositionSnapshot::new(self.count, self.stride, data)
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::ContextError;

/// Explicitly owned device handle threaded through every GPU-side constructor.
///
/// Created once by the application. Tracks device loss so later operations
/// can fail with a typed error instead of touching a dead device.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: wgpu::AdapterInfo,
    lost: Arc<AtomicBool>,
}

impl GpuContext {
    /// Create a context with no presentation surface (CLI, tests).
    pub async fn headless() -> Result<Self, ContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(ContextError::AdapterNotFound)?;
        Self::from_adapter(&adapter).await
    }

    /// Create a context on an adapter the caller already picked, e.g. one
    /// compatible with a window surface.
    pub async fn from_adapter(adapter: &wgpu::Adapter) -> Result<Self, ContextError> {
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("cubegrid_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await?;

        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            flag.store(true, Ordering::SeqCst);
            tracing::error!(?reason, %message, "GPU device lost");
        });

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = info.backend.to_str(),
            "GPU context created"
        );

        Ok(Self {
            device,
            queue,
            info,
            lost,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    /// True once the device reported loss. Every resource on it is invalid.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Drive pending callbacks (map completions, work-done notifications)
    /// without blocking.
    pub fn poll(&self) {
        let _ = self.device.poll(wgpu::Maintain::Poll);
    }

    /// Block until the device has finished all submitted work.
    pub fn wait_idle(&self) {
        let _ = self.device.poll(wgpu::Maintain::Wait);
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_context_is_alive() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        assert!(!ctx.is_lost());
        assert!(!ctx.adapter_info().backend.to_str().is_empty());
        ctx.poll();
        ctx.wait_idle();
    }
}

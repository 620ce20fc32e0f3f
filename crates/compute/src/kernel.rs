//! Compute pipeline for the layout kernel.
//!
//! ## Bind Group Layout (Group 0)
//! | Binding | Type | Buffer |
//! |---------|------|--------|
//! | 0 | Uniform | params (count, stride, row_pitch) |
//! | 1 | Storage (read_write) | positions |

use bytemuck::{Pod, Zeroable};
use cubegrid_common::MAX_WORKGROUP_SIZE;
use wgpu::util::DeviceExt;

use crate::buffer::ComputeBuffer;
use crate::context::GpuContext;
use crate::error::DispatchError;
use crate::shaders;

/// Per-dimension workgroup cap from the default device limits.
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct LayoutParams {
    count: u32,
    stride: u32,
    row_pitch: u32,
    _pad: u32,
}

/// Workgroup grid `(x, y)` covering `count` lanes of `workgroup_size`.
///
/// Lane `(gx, gy)` handles index `gy * (x * workgroup_size) + gx`. Every index
/// below `count` maps to exactly one lane; surplus lanes exit early.
pub fn dispatch_grid(count: u32, workgroup_size: u32) -> (u32, u32) {
    let groups = count.div_ceil(workgroup_size).max(1);
    let x = groups.min(MAX_WORKGROUPS_PER_DIMENSION);
    let y = groups.div_ceil(x);
    (x, y)
}

/// Compiled layout kernel for one workgroup size.
pub struct LayoutKernel {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    workgroup_size: u32,
}

impl LayoutKernel {
    /// Compile the kernel. Validation errors from shader or pipeline creation
    /// surface as [`DispatchError::KernelCompilation`].
    pub async fn compile(ctx: &GpuContext, workgroup_size: u32) -> Result<Self, DispatchError> {
        if workgroup_size == 0 || workgroup_size > MAX_WORKGROUP_SIZE {
            return Err(DispatchError::InvalidWorkgroupSize {
                size: workgroup_size,
                max: MAX_WORKGROUP_SIZE,
            });
        }
        if ctx.is_lost() {
            return Err(DispatchError::DeviceLost);
        }

        let device = ctx.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("layout_kernel"),
            source: wgpu::ShaderSource::Wgsl(shaders::layout_kernel_source(workgroup_size).into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("layout_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("layout_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("layout_pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = device.pop_error_scope().await {
            return Err(DispatchError::KernelCompilation(err.to_string()));
        }

        tracing::debug!(workgroup_size, "layout kernel compiled");
        Ok(Self {
            pipeline,
            bind_group_layout,
            workgroup_size,
        })
    }

    pub fn workgroup_size(&self) -> u32 {
        self.workgroup_size
    }

    /// Record one dispatch over every record of `buffer` into `encoder`.
    pub fn encode(
        &self,
        ctx: &GpuContext,
        encoder: &mut wgpu::CommandEncoder,
        buffer: &ComputeBuffer,
    ) {
        let (groups_x, groups_y) = dispatch_grid(buffer.count(), self.workgroup_size);
        let params = LayoutParams {
            count: buffer.count(),
            stride: buffer.stride().components(),
            row_pitch: groups_x * self.workgroup_size,
            _pad: 0,
        };

        let device = ctx.device();
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("layout_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("layout_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffer.raw().as_entire_binding(),
                },
            ],
        });

        tracing::debug!(
            count = params.count,
            stride = params.stride,
            groups_x,
            groups_y,
            "encoding layout dispatch"
        );

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("layout_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups_x, groups_y, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support;

    /// Replays the kernel's lane-to-index mapping on the host.
    fn covered_indices(count: u32, workgroup_size: u32) -> Vec<u32> {
        let (x, y) = dispatch_grid(count, workgroup_size);
        let row_pitch = x * workgroup_size;
        let mut hits = vec![0u32; count as usize];
        for gy in 0..y {
            for gx in 0..row_pitch {
                let index = gy as u64 * row_pitch as u64 + gx as u64;
                if index < count as u64 {
                    hits[index as usize] += 1;
                }
            }
        }
        hits
    }

    #[test]
    fn grid_covers_each_index_once() {
        for (count, wg) in [(1, 64), (5, 8), (8, 8), (9, 8), (1000, 64), (1000, 7), (4097, 256)] {
            let hits = covered_indices(count, wg);
            assert!(hits.iter().all(|&h| h == 1), "count={count} wg={wg}");
        }
    }

    #[test]
    fn grid_spills_into_second_dimension() {
        let count = MAX_WORKGROUPS_PER_DIMENSION * 2 + 5;
        let (x, y) = dispatch_grid(count, 1);
        assert_eq!(x, MAX_WORKGROUPS_PER_DIMENSION);
        assert_eq!(y, 3);
        let hits = covered_indices(count, 1);
        assert!(hits.iter().all(|&h| h == 1));
    }

    #[test]
    fn grid_for_largest_count_fits_limits() {
        let (x, y) = dispatch_grid(cubegrid_common::MAX_INSTANCE_COUNT, 1);
        assert!(x <= MAX_WORKGROUPS_PER_DIMENSION && y <= MAX_WORKGROUPS_PER_DIMENSION);
        assert!(x as u64 * y as u64 >= cubegrid_common::MAX_INSTANCE_COUNT as u64);
    }

    #[test]
    fn params_are_uniform_sized() {
        assert_eq!(std::mem::size_of::<LayoutParams>(), 16);
    }

    #[test]
    fn kernel_compiles() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        for wg in [1, 8, 64, 256] {
            let kernel = pollster::block_on(LayoutKernel::compile(&ctx, wg)).unwrap();
            assert_eq!(kernel.workgroup_size(), wg);
        }
    }

    #[test]
    fn kernel_rejects_bad_workgroup_size() {
        let Some(ctx) = test_support::context() else {
            return;
        };
        let result = pollster::block_on(LayoutKernel::compile(&ctx, 0));
        assert!(matches!(
            result,
            Err(DispatchError::InvalidWorkgroupSize { size: 0, .. })
        ));
    }
}

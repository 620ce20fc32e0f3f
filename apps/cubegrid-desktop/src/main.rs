use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cubegrid_common::{GridConfig, Stride};
use cubegrid_compute::{CoordinatorState, DispatchCoordinator, GpuContext, PendingReadback};
use cubegrid_render::RenderView;
use cubegrid_render_wgpu::{DEFAULT_CUBE_SIZE, InstancedGridRenderer};
use cubegrid_tools::SnapshotInspector;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

const VERIFY_TOLERANCE: f32 = 1e-5;

#[derive(Parser)]
#[command(name = "cubegrid-desktop", about = "Instanced cube grid viewer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON config file; flags below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of instances
    #[arg(short, long)]
    count: Option<u32>,

    /// Components per record (3 or 4)
    #[arg(short, long)]
    stride: Option<u32>,

    /// Compute workgroup size
    #[arg(short, long)]
    workgroup_size: Option<u32>,

    /// Edge length of each cube in world units
    #[arg(long, default_value_t = DEFAULT_CUBE_SIZE)]
    cube_size: f32,

    /// Skip the diagnostic readback after the first dispatch
    #[arg(long)]
    no_readback: bool,
}

impl Cli {
    fn grid_config(&self) -> Result<GridConfig> {
        let mut cfg = match &self.config {
            Some(path) => GridConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => GridConfig::default(),
        };
        if let Some(count) = self.count {
            cfg.instance_count = count;
        }
        if let Some(stride) = self.stride {
            cfg.stride = Stride::try_from(stride)?;
        }
        if let Some(size) = self.workgroup_size {
            cfg.workgroup_size = size;
        }
        if self.no_readback {
            cfg.readback_on_init = false;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Window, surface, and device state created on `resumed`.
struct Gpu {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,
    ctx: GpuContext,
    renderer: InstancedGridRenderer,
}

impl Gpu {
    fn aspect(&self) -> f32 {
        self.surface_config.width as f32 / self.surface_config.height.max(1) as f32
    }
}

struct CubeGridApp {
    coordinator: DispatchCoordinator,
    view: RenderView,
    cube_size: f32,
    gpu: Option<Gpu>,
    pending: Option<PendingReadback>,
}

impl CubeGridApp {
    fn new(config: GridConfig, cube_size: f32) -> Self {
        Self {
            coordinator: DispatchCoordinator::new(config),
            view: RenderView::default(),
            cube_size,
            gpu: None,
            pending: None,
        }
    }

    fn init_gpu(&mut self, event_loop: &ActiveEventLoop) -> Result<Gpu> {
        let attrs = Window::default_attributes()
            .with_title("cubegrid")
            .with_inner_size(PhysicalSize::new(1280u32, 720));
        let window = Arc::new(event_loop.create_window(attrs)?);

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| anyhow!("no GPU adapter compatible with the window surface"))?;
        let ctx = pollster::block_on(GpuContext::from_adapter(&adapter))?;

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow!("surface reports no supported formats"))?;
        let alpha_mode = surface_caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(ctx.device(), &surface_config);

        let renderer = InstancedGridRenderer::new(
            ctx.device(),
            surface_format,
            surface_config.width,
            surface_config.height,
            self.coordinator.config().stride,
            self.cube_size,
        );

        pollster::block_on(self.coordinator.initialize(&ctx))?;
        if self.coordinator.config().readback_on_init {
            match self.coordinator.request_readback(&ctx) {
                Ok(pending) => self.pending = Some(pending),
                Err(e) => tracing::warn!("diagnostic readback not started: {e}"),
            }
        }

        tracing::info!(
            "GPU initialized with {} backend",
            adapter.get_info().backend.to_str()
        );
        Ok(Gpu {
            window,
            surface,
            surface_config,
            ctx,
            renderer,
        })
    }

    /// Check the in-flight readback without blocking; log it when it lands.
    fn poll_readback(&mut self) {
        let Some(pending) = &mut self.pending else {
            return;
        };
        match pending.try_take() {
            None => {}
            Some(Ok(snapshot)) => {
                tracing::info!("{}", SnapshotInspector::summary(&snapshot));
                let report = SnapshotInspector::verify(&snapshot, VERIFY_TOLERANCE);
                if report.is_ok() {
                    tracing::info!("{report}");
                } else {
                    tracing::error!("{report}");
                }
                self.pending = None;
            }
            Some(Err(e)) => {
                tracing::warn!("diagnostic readback failed: {e}");
                self.pending = None;
            }
        }
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(gpu) = &mut self.gpu else {
            return;
        };
        if gpu.ctx.is_lost() {
            tracing::error!("GPU device lost, exiting");
            event_loop.exit();
            return;
        }

        let previous = self.coordinator.state();
        if self.coordinator.poll_ready(&gpu.ctx) == CoordinatorState::Ready
            && previous != CoordinatorState::Ready
        {
            tracing::debug!("layout dispatch complete");
        }
        if self.pending.is_some() {
            gpu.ctx.poll();
        }

        let output = match gpu.surface.get_current_texture() {
            Ok(t) => t,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                gpu.surface.configure(gpu.ctx.device(), &gpu.surface_config);
                return;
            }
            Err(e) => {
                tracing::error!("surface error: {e}");
                return;
            }
        };
        let target = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        gpu.renderer.render(
            gpu.ctx.device(),
            gpu.ctx.queue(),
            &target,
            &self.view,
            gpu.aspect(),
            self.coordinator.instance_offsets(),
        );
        output.present();
        gpu.window.request_redraw();

        self.poll_readback();
    }
}

impl ApplicationHandler for CubeGridApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.gpu.is_some() {
            return;
        }
        match self.init_gpu(event_loop) {
            Ok(gpu) => self.gpu = Some(gpu),
            Err(e) => {
                tracing::error!("startup failed: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.coordinator.teardown();
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(gpu) = &mut self.gpu {
                    gpu.surface_config.width = new_size.width.max(1);
                    gpu.surface_config.height = new_size.height.max(1);
                    gpu.surface.configure(gpu.ctx.device(), &gpu.surface_config);
                    gpu.renderer.resize(
                        gpu.ctx.device(),
                        gpu.surface_config.width,
                        gpu.surface_config.height,
                    );
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(gpu) = &self.gpu {
            gpu.window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = cli.grid_config()?;
    tracing::info!(
        count = config.instance_count,
        stride = %config.stride,
        "cubegrid-desktop starting"
    );

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = CubeGridApp::new(config, cli.cube_size);
    event_loop.run_app(&mut app)?;

    Ok(())
}

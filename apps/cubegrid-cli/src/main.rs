use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use cubegrid_common::{GridConfig, Stride};
use cubegrid_compute::{DispatchCoordinator, GpuContext};
use cubegrid_layout::GridLayout;
use cubegrid_render::{DebugTextRenderer, RenderView, Renderer};
use cubegrid_tools::SnapshotInspector;
use tracing_subscriber::EnvFilter;

/// Per-axis tolerance when comparing a readback to the host layout.
const VERIFY_TOLERANCE: f32 = 1e-5;

#[derive(Parser)]
#[command(name = "cubegrid-cli", about = "CLI tool for cubegrid layout and dispatch")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Print the host reference layout
    Layout {
        /// Number of instances
        #[arg(short, long, default_value = "1000")]
        count: u32,
        /// Components per record (3 or 4)
        #[arg(short, long, default_value = "3")]
        stride: u32,
        /// Records to print
        #[arg(short, long, default_value = "16")]
        rows: usize,
    },
    /// Run the layout kernel on a headless device and verify the readback
    Dispatch {
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
        /// Write the readback as JSON
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Tear down, dispatch again, and require identical contents
        #[arg(long)]
        check_idempotent: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("cubegrid-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("compute: {}", cubegrid_compute::crate_info());
            println!("render: {}", cubegrid_render::crate_info());
            println!("tools: {}", cubegrid_tools::crate_info());
            println!("default config: {:?}", GridConfig::default());
        }
        Commands::Layout {
            count,
            stride,
            rows,
        } => {
            let stride = Stride::try_from(stride)?;
            let layout = GridLayout::new(count)?;
            println!(
                "Layout: count={} dim={} unused_cells={}",
                layout.count(),
                layout.dim(),
                layout.unused_cells()
            );
            let snapshot = layout.snapshot(stride);
            let renderer = DebugTextRenderer::with_max_rows(rows);
            print!("{}", renderer.render(&snapshot, &RenderView::default()));
        }
        Commands::Dispatch {
            config,
            count,
            stride,
            workgroup_size,
            out,
            check_idempotent,
        } => {
            let mut cfg = match config {
                Some(path) => GridConfig::from_json_file(&path)
                    .with_context(|| format!("loading config {}", path.display()))?,
                None => GridConfig::default(),
            };
            if let Some(count) = count {
                cfg.instance_count = count;
            }
            if let Some(stride) = stride {
                cfg.stride = Stride::try_from(stride)?;
            }
            if let Some(size) = workgroup_size {
                cfg.workgroup_size = size;
            }
            cfg.validate()?;

            pollster::block_on(run_dispatch(cfg, out, check_idempotent))?;
        }
    }

    Ok(())
}

async fn run_dispatch(
    config: GridConfig,
    out: Option<PathBuf>,
    check_idempotent: bool,
) -> anyhow::Result<()> {
    let ctx = GpuContext::headless().await?;
    let info = ctx.adapter_info();
    println!("Adapter: {} ({:?})", info.name, info.backend);

    let mut coordinator = DispatchCoordinator::new(config);
    coordinator.initialize(&ctx).await?;
    let state = coordinator.wait_ready(&ctx).await;
    println!("Coordinator: {state}");

    let snapshot = coordinator.export_to_host(&ctx).await?;
    println!("{}", SnapshotInspector::summary(&snapshot));
    let report = SnapshotInspector::verify(&snapshot, VERIFY_TOLERANCE);
    println!("{report}");

    if let Some(path) = out {
        cubegrid_tools::write_snapshot_json(&path, &snapshot)?;
        println!("Wrote {}", path.display());
    }

    if check_idempotent {
        let first = SnapshotInspector::digest(&snapshot);
        let config = coordinator.config().clone();
        coordinator.reconfigure(config);
        coordinator.initialize(&ctx).await?;
        coordinator.wait_ready(&ctx).await;
        let second = SnapshotInspector::digest(&coordinator.export_to_host(&ctx).await?);
        println!(
            "Re-dispatch: {}",
            if first == second { "OK" } else { "MISMATCH" }
        );
        if first != second {
            bail!("re-dispatch produced different contents ({first} != {second})");
        }
    }

    coordinator.teardown();
    if !report.is_ok() {
        bail!("readback does not match the host layout");
    }
    Ok(())
}

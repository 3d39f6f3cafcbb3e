use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use sortlast::{
    CompositeStrategy, CpuReadbackDevice, DMat4, DVec3, FramePipeline, LocalCluster, Light,
    PipelineConfig, PngSink, Sphere, SphereRenderer, TickOutcome, TilePolicy, ViewId, ViewParams,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sortlast", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a sphere scene split across in-process ranks and write the composited PNGs.
    Run(RunArgs),
    /// Print the default pipeline configuration as JSON.
    Config,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Output directory for PNG tiles.
    #[arg(long)]
    out: PathBuf,

    /// Pipeline configuration JSON (defaults when omitted).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of ranks.
    #[arg(long, default_value_t = 4)]
    ranks: usize,

    /// Frames to render.
    #[arg(long, default_value_t = 8)]
    frames: u64,

    /// Number of views.
    #[arg(long, default_value_t = 1)]
    views: usize,

    /// View width.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// View height.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Spheres owned by each rank.
    #[arg(long, default_value_t = 6)]
    spheres: usize,

    /// Override the configured asynchronicity.
    #[arg(long)]
    asynchronicity: Option<usize>,

    /// Override the configured compositing strategy.
    #[arg(long, value_enum)]
    strategy: Option<StrategyChoice>,

    /// Split the final image into one band per rank.
    #[arg(long, default_value_t = false)]
    bands: bool,

    /// Paint each rank's spheres in its own color.
    #[arg(long, default_value_t = false)]
    color_rank: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyChoice {
    Sequential,
    BinaryTree,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => cmd_run(args),
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
            Ok(())
        }
    }
}

fn load_config(args: &RunArgs) -> anyhow::Result<PipelineConfig> {
    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("load config '{}'", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(k) = args.asynchronicity {
        cfg.asynchronicity = k;
    }
    if let Some(s) = args.strategy {
        cfg.strategy = match s {
            StrategyChoice::Sequential => CompositeStrategy::Sequential,
            StrategyChoice::BinaryTree => CompositeStrategy::BinaryTree,
        };
    }
    if args.bands {
        cfg.tile_policy = TilePolicy::Bands;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Spheres of `rank` on a shared spiral so that ranks interleave in depth.
fn rank_spheres(rank: usize, ranks: usize, per_rank: usize) -> Vec<Sphere> {
    let total = (ranks * per_rank).max(1) as f64;
    (0..per_rank)
        .map(|i| {
            let k = (i * ranks + rank) as f64;
            let a = k * 2.399_963;
            let r = 3.0 * (k / total).sqrt();
            Sphere {
                center: DVec3::new(r * a.cos(), r * a.sin(), (k / total - 0.5) * 4.0),
                radius: 0.6,
                color: [220, 180, 120, 255],
            }
        })
        .collect()
}

fn camera(view: usize, frame: u64, width: u32, height: u32) -> ViewParams {
    let angle = frame as f64 * 0.15 + view as f64 * std::f64::consts::FRAC_PI_2;
    let eye = DVec3::new(10.0 * angle.sin(), 3.0, 10.0 * angle.cos());
    ViewParams {
        width,
        height,
        model: DMat4::IDENTITY,
        view: DMat4::look_at_rh(eye, DVec3::ZERO, DVec3::Y),
        proj: DMat4::perspective_rh_gl(0.9, width as f64 / height as f64, 0.5, 50.0),
        lights: vec![Light {
            position: eye.extend(1.0),
            ..Light::default()
        }],
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    if args.ranks == 0 {
        anyhow::bail!("--ranks must be >= 1");
    }
    let cfg = load_config(&args)?;

    let results = LocalCluster::run(args.ranks, |comm| -> anyhow::Result<sortlast::PipelineStats> {
        let rank = sortlast::Communicator::rank(&comm);
        let mut renderer = SphereRenderer::new(rank_spheres(rank, args.ranks, args.spheres));
        if args.color_rank {
            renderer = renderer.color_rank(rank);
        }
        let mut pipeline = FramePipeline::new(
            cfg.clone(),
            Box::new(comm),
            Box::new(renderer),
            Box::new(CpuReadbackDevice::new(cfg.readback_threads)?),
            Box::new(PngSink::new(&args.out)?),
        )?;

        if pipeline.is_authority() {
            pipeline.set_view_count(args.views)?;
        }
        let mut rendered = 0;
        let mut frame = 0;
        while rendered < args.frames {
            if pipeline.is_authority() {
                for v in 0..args.views {
                    pipeline.update_view(
                        ViewId(v as u32),
                        camera(v, frame, args.width, args.height),
                    )?;
                }
            }
            match pipeline.render()? {
                TickOutcome::Rendered { .. } => {
                    rendered += 1;
                    frame += 1;
                }
                TickOutcome::Blocked { .. } => std::thread::yield_now(),
                TickOutcome::Skipped { .. } | TickOutcome::Abandoned => {}
            }
        }
        Ok(pipeline.shutdown()?)
    });

    for (rank, stats) in results.into_iter().enumerate() {
        let stats = stats.with_context(|| format!("rank {rank}"))?;
        eprintln!(
            "rank {rank}: begun {} composited {} delivered {} dropped {}",
            stats.frames_begun, stats.frames_composited, stats.frames_delivered, stats.frames_dropped
        );
    }
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

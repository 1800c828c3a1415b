//! calib-corners CLI: corner detection, initial poses and target rendering.

use calib_corners::aprilgrid::{render_aprilgrid, AprilGridRenderParams};
use calib_corners::chessboard::{render_checkerboard, CheckerboardRenderParams};
use calib_corners::core::{GrayImage, TargetGeometry};
use calib_corners::pose::{
    init_cam_poses, pinhole_candidates, select_intrinsics, unified_candidates, CameraModel,
    InitialPose, PoseInitializer,
};
use calib_corners::{
    CachePaths, CornerCache, CornerDetectionRun, CornerMap, FolderDataset, PipelineConfig,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{info, warn, LevelFilter};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "calib-corners")]
#[command(about = "Detect calibration target corners and initialize camera poses")]
#[command(version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Emit structured JSON logs (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect corners in a `cam<N>/<timestamp_ns>.png` dataset.
    Detect(DetectArgs),

    /// Initial camera-from-target poses from a corner cache.
    Poses(PosesArgs),

    /// Render the configured target to a PNG.
    Render(RenderArgs),
}

#[derive(Debug, Args)]
struct DetectArgs {
    /// Pipeline config (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Dataset root directory.
    #[arg(long)]
    dataset: PathBuf,

    /// Cache directory; overrides the config.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Worker threads; overrides the config.
    #[arg(long)]
    workers: Option<usize>,

    /// Ignore an existing cache and detect again.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Args)]
struct PosesArgs {
    /// Pipeline config (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Cache directory; overrides the config.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// JSON array of camera models, one per camera index. When omitted,
    /// intrinsics are estimated from the corners.
    #[arg(long)]
    cameras: Option<PathBuf>,

    /// Camera model to estimate when `--cameras` is not given.
    #[arg(long, value_enum, default_value_t = ModelKind::Pinhole)]
    model: ModelKind,

    /// Image size `WIDTHxHEIGHT`, needed to estimate intrinsics.
    #[arg(long, value_parser = parse_size)]
    image_size: Option<(usize, usize)>,

    /// Output JSON path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModelKind {
    Pinhole,
    Unified,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Pipeline config (JSON).
    #[arg(long)]
    config: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Pixels per code cell (AprilGrid) or per square (checkerboard).
    #[arg(long)]
    px: Option<usize>,

    /// Also write the target descriptor JSON here.
    #[arg(long)]
    descriptor: Option<PathBuf>,
}

fn parse_size(s: &str) -> Result<(usize, usize), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got `{s}`"))?;
    let w = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((w, h))
}

fn init_logging(level: LevelFilter, json: bool) -> CliResult<()> {
    #[cfg(feature = "tracing")]
    {
        LogTracer::init()?;
        calib_corners::core::init_tracing(level, json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        if json {
            eprintln!("--json-log needs the `tracing` feature; using plain logs");
        }
        calib_corners::core::init_stderr(level)?;
    }
    Ok(())
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn try_main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.json_log)?;
    match cli.command {
        Commands::Detect(args) => run_detect(args),
        Commands::Poses(args) => run_poses(args),
        Commands::Render(args) => run_render(args),
    }
}

fn run_detect(args: DetectArgs) -> CliResult<()> {
    let mut cfg = PipelineConfig::load_json(&args.config)?;
    if let Some(dir) = args.cache_dir {
        cfg.cache = Some(dir);
    }
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }

    let strategy = cfg.build_strategy()?;
    let ctx = cfg.build_context()?;
    let dataset = FolderDataset::open(&args.dataset)?;

    if args.force {
        if let Some(paths) = cfg.cache_paths() {
            if paths.bin.exists() {
                fs::remove_file(&paths.bin)?;
            }
        }
    }

    let mut run = CornerDetectionRun::new(&ctx, &dataset, &strategy);
    if let Some(paths) = cfg.cache_paths() {
        run = run.with_cache(paths);
    }
    let outcome = run.run()?;

    let total: usize = outcome.cache.accepted.values().map(|d| d.len()).sum();
    info!(
        "{} frames, {} corners ({})",
        outcome.cache.accepted.len(),
        total,
        if outcome.from_cache { "cached" } else { "detected" }
    );
    Ok(())
}

#[derive(Serialize)]
struct PoseEntry<'a> {
    timestamp_ns: i64,
    cam_id: usize,
    #[serde(flatten)]
    pose: &'a InitialPose,
}

#[derive(Serialize)]
struct PosesReport<'a> {
    cameras: &'a [CameraModel],
    failures: usize,
    poses: Vec<PoseEntry<'a>>,
}

fn estimate_cameras(
    target: &TargetGeometry,
    corners: &CornerMap,
    num_cams: usize,
    image_size: (usize, usize),
    model: ModelKind,
    initializer: &PoseInitializer,
) -> CliResult<Vec<CameraModel>> {
    let mut cameras = Vec::with_capacity(num_cams);
    for cam in 0..num_cams {
        let frames: Vec<_> = corners
            .iter()
            .filter(|(f, _)| f.cam_id == cam)
            .map(|(_, d)| d)
            .collect();
        let candidates = match model {
            ModelKind::Pinhole => pinhole_candidates(target, frames.iter().copied(), image_size),
            ModelKind::Unified => unified_candidates(target, frames.iter().copied(), image_size),
        };
        let (best, score) = select_intrinsics(&candidates, target, frames.iter().copied(), initializer)
            .ok_or_else(|| format!("no intrinsics candidate for cam {cam}"))?;
        info!(
            "cam {cam}: focal {:.1} px ({} inliers)",
            candidates[best].focal(),
            score.total_inliers
        );
        cameras.push(candidates[best].clone());
    }
    Ok(cameras)
}

fn run_poses(args: PosesArgs) -> CliResult<()> {
    let mut cfg = PipelineConfig::load_json(&args.config)?;
    if let Some(dir) = args.cache_dir {
        cfg.cache = Some(dir);
    }
    let paths: CachePaths = cfg
        .cache_paths()
        .ok_or("no cache directory in config or on the command line")?;
    let strategy = cfg.build_strategy()?;
    let initializer = cfg.build_pose_initializer()?;

    let mut cache = CornerCache::default();
    if !cache.try_load(&paths, &strategy)? {
        return Err(format!("no corner cache at {}", paths.bin.display()).into());
    }
    let num_cams = cache.accepted.keys().map(|f| f.cam_id + 1).max().unwrap_or(0);

    let cameras: Vec<CameraModel> = match (&args.cameras, args.image_size) {
        (Some(path), _) => serde_json::from_str(&fs::read_to_string(path)?)?,
        (None, Some(size)) => estimate_cameras(
            &cfg.target,
            &cache.accepted,
            num_cams,
            size,
            args.model,
            &initializer,
        )?,
        (None, None) => return Err("either --cameras or --image-size is required".into()),
    };
    if cameras.len() < num_cams {
        warn!(
            "{} camera models for {} cameras; frames of the others are skipped",
            cameras.len(),
            num_cams
        );
    }

    let set = init_cam_poses(&cache.accepted, &cfg.target, &cameras, &initializer);
    let report = PosesReport {
        cameras: &cameras,
        failures: set.failures,
        poses: set
            .poses
            .iter()
            .map(|(f, pose)| PoseEntry {
                timestamp_ns: f.timestamp_ns,
                cam_id: f.cam_id,
                pose,
            })
            .collect(),
    };
    fs::write(&args.out, serde_json::to_string_pretty(&report)?)?;
    info!(
        "wrote {} poses ({} failures) to {}",
        set.poses.len(),
        set.failures,
        args.out.display()
    );
    Ok(())
}

fn save_png(img: &GrayImage, out: &Path) -> CliResult<()> {
    let buf = image::GrayImage::from_raw(img.width as u32, img.height as u32, img.data.clone())
        .ok_or("rendered buffer does not match its size")?;
    buf.save(out)?;
    Ok(())
}

fn run_render(args: RenderArgs) -> CliResult<()> {
    let cfg = PipelineConfig::load_json(&args.config)?;
    let img = match &cfg.target {
        TargetGeometry::AprilGrid(grid) => {
            let mut params = AprilGridRenderParams::default();
            if let Some(px) = args.px {
                params.px_per_bit = px;
            }
            render_aprilgrid(grid, &params)?.0
        }
        TargetGeometry::Checkerboard(board) => {
            let mut params = CheckerboardRenderParams::default();
            if let Some(px) = args.px {
                params.square_px = px;
            }
            render_checkerboard(board, &params)?.0
        }
    };
    save_png(&img, &args.out)?;
    if let Some(path) = &args.descriptor {
        cfg.target.write_json(path)?;
    }
    info!(
        "rendered {}x{} {} to {}",
        img.width,
        img.height,
        cfg.target.target_type(),
        args.out.display()
    );
    Ok(())
}

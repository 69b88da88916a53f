//! tiled-sgemm - benchmark tiled SGEMM strategies on an OpenCL GPU.
//!
//! # Examples
//!
//! ```bash
//! # List platforms and GPUs
//! tiled-sgemm --list-gpu
//!
//! # Three trials of 2048x1024 times 1024x512, checked against the CPU
//! tiled-sgemm -m 2048 -k 1024 -n 512 --trials 3 --validate
//!
//! # Ten random problem sizes between 128 and 1024
//! tiled-sgemm --random-sizes --min-size 128 --max-size 1024 --trials 10
//!
//! # Pin the tiling and run every strategy, including the naive kernel
//! tiled-sgemm --tiling 64,64,8,4,4 --strategy naive,tiled,tiled-colmajor
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tiled_sgemm::{
    random_dims, run_trial, Matrix, MatrixFill, Session, SessionConfig, Strategy, TilingConfig,
    TilingPolicy, TransposeMode,
};
use tiled_sgemm_opencl::{list_platforms, OpenClConfig, OpenClDevice};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Tiled single-precision matrix multiplication benchmark
#[derive(Parser, Debug)]
#[command(name = "tiled-sgemm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// List OpenCL platforms and GPUs, then exit
    #[arg(long)]
    list_gpu: bool,

    /// Rows of A and C
    #[arg(short, long, default_value_t = 4096)]
    m: usize,

    /// Columns of A, rows of B
    #[arg(short, long, default_value_t = 4096)]
    k: usize,

    /// Columns of B and C
    #[arg(short, long, default_value_t = 4096)]
    n: usize,

    /// Number of trials
    #[arg(short, long, default_value_t = 1)]
    trials: usize,

    /// Draw M, K and N uniformly from [min-size, max-size] on every trial
    #[arg(long)]
    random_sizes: bool,

    /// Smallest random dimension
    #[arg(long, default_value_t = 128)]
    min_size: usize,

    /// Largest random dimension
    #[arg(long, default_value_t = 4096)]
    max_size: usize,

    /// Seed for sizes and matrix contents
    #[arg(long)]
    seed: Option<u64>,

    /// How to fill A and B
    #[arg(long, value_enum, default_value_t = FillArg::Increasing)]
    fill: FillArg,

    /// Check every result against a CPU reference
    #[arg(long)]
    validate: bool,

    /// Print operands and results
    #[arg(long)]
    print: bool,

    /// Strategies to run, in order
    #[arg(
        long,
        value_enum,
        value_delimiter = ',',
        default_values_t = [StrategyArg::Tiled, StrategyArg::TiledColmajor, StrategyArg::TiledColmajorPadded]
    )]
    strategy: Vec<StrategyArg>,

    /// Fixed tiling BM,BN,BK,WIM,WIN instead of the size-based selection
    #[arg(long, value_parser = parse_tiling)]
    tiling: Option<TilingConfig>,

    /// Skip the tiling invariant checks before launch
    #[arg(long)]
    no_validate_tiling: bool,

    /// Transpose A on the host instead of the device
    #[arg(long)]
    host_transpose: bool,

    /// Check the device transpose against a host transpose
    #[arg(long)]
    validate_transpose: bool,

    /// Directory holding the .cl kernel sources
    #[arg(long, env = tiled_sgemm::KERNEL_DIR_ENV)]
    kernel_dir: Option<PathBuf>,

    /// Seconds to wait on any single device operation before giving up
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Platform index
    #[arg(long, default_value_t = 0)]
    platform: usize,

    /// GPU index within the platform
    #[arg(long, default_value_t = 0)]
    device: usize,

    /// Override the square work-group side derived from the device
    #[arg(long)]
    max_local_size: Option<usize>,

    /// Enable debug output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Naive,
    Tiled,
    TiledColmajor,
    TiledColmajorPadded,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Naive => Strategy::Naive,
            StrategyArg::Tiled => Strategy::Tiled,
            StrategyArg::TiledColmajor => Strategy::TiledColMajor,
            StrategyArg::TiledColmajorPadded => Strategy::TiledColMajorPadded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FillArg {
    /// Random digits 0..9
    Random,
    /// Each element equals its column index
    Column,
    /// Row-major counter from 0
    Increasing,
}

impl From<FillArg> for MatrixFill {
    fn from(arg: FillArg) -> Self {
        match arg {
            FillArg::Random => MatrixFill::Random,
            FillArg::Column => MatrixFill::ColumnIndex,
            FillArg::Increasing => MatrixFill::Increasing,
        }
    }
}

fn parse_tiling(s: &str) -> std::result::Result<TilingConfig, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<usize>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid tiling value: {e}"))?;
    match values.as_slice() {
        &[bm, bn, bk, wim, win] => Ok(TilingConfig::new(bm, bn, bk, wim, win)),
        _ => Err(format!(
            "expected 5 comma-separated values BM,BN,BK,WIM,WIN, got {}",
            values.len()
        )),
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn list_gpus() -> Result<()> {
    let platforms = list_platforms().context("failed to enumerate OpenCL platforms")?;
    for platform in platforms {
        println!("{platform}");
    }
    Ok(())
}

fn session_config(cli: &Cli) -> SessionConfig {
    let mut config = SessionConfig::default()
        .with_transpose_mode(if cli.host_transpose {
            TransposeMode::Host
        } else {
            TransposeMode::Device
        })
        .with_validate_transpose(cli.validate_transpose)
        .with_validate_tiling(!cli.no_validate_tiling)
        .with_print_matrices(cli.print)
        .with_launch_timeout(Duration::from_secs(cli.timeout_secs));
    if let Some(tiling) = cli.tiling {
        config = config.with_tiling(TilingPolicy::Fixed(tiling));
    }
    if let Some(dir) = &cli.kernel_dir {
        config = config.with_kernel_dir(dir);
    }
    config
}

fn run(cli: Cli) -> Result<()> {
    if cli.list_gpu {
        return list_gpus();
    }
    if cli.random_sizes && (cli.min_size == 0 || cli.min_size > cli.max_size) {
        bail!(
            "invalid size range [{}, {}]",
            cli.min_size,
            cli.max_size
        );
    }
    if !cli.random_sizes && (cli.m == 0 || cli.k == 0 || cli.n == 0) {
        bail!("dimensions must be positive, got {}x{}x{}", cli.m, cli.k, cli.n);
    }

    let device = OpenClDevice::with_config(&OpenClConfig {
        platform_index: cli.platform,
        device_index: cli.device,
        max_local_size: cli.max_local_size,
    })
    .context("failed to open OpenCL device")?;
    let session = Session::new(device, session_config(&cli));

    let strategies: Vec<Strategy> = cli.strategy.iter().map(|&s| s.into()).collect();
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    for trial in 1..=cli.trials {
        let (m, k, n) = if cli.random_sizes {
            random_dims(&mut rng, cli.min_size..=cli.max_size)
        } else {
            (cli.m, cli.k, cli.n)
        };
        info!(trial, total = cli.trials, m, k, n, "trial");

        let a = Matrix::generate_with(m, k, cli.fill.into(), &mut rng);
        let b = Matrix::generate_with(k, n, cli.fill.into(), &mut rng);
        let report = run_trial(&session, &strategies, &a, &b, cli.validate)
            .with_context(|| format!("trial {trial} ({m}x{k}x{n}) failed"))?;

        println!("Trial {trial}/{}: M = {m}, K = {k}, N = {n}", cli.trials);
        for strategy in &report.strategies {
            println!("  {strategy}");
        }
        if report.validated {
            println!("  all results match the CPU reference");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

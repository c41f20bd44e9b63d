use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use log::LevelFilter;

use kmeans_cl::load::{read_centroids, read_points, save_binary, write_centroids, write_points};
use kmeans_cl::logger::{init_logger, init_logger_with_level, parse_level};
use kmeans_cl::{build_strategy, validate_input, ClusteringEngine, Result, Strategy};

/// k-means over a point file, on the host or on an accelerator.
#[derive(Parser, Debug)]
#[command(name = "kmeans-cl", version)]
struct Args {
    /// Points, one per line
    input: PathBuf,
    /// Initial centroids, one per line
    centroids: PathBuf,
    /// Clustered points: coordinates followed by the cluster index
    output: PathBuf,
    /// cpu | ocl
    strategy: String,
    #[arg(default_value_t = 1)]
    iterations: usize,

    /// Also write the final centroids here
    #[arg(long)]
    centroids_out: Option<PathBuf>,
    /// Also write the whole run as protobuf
    #[arg(long)]
    binary: Option<PathBuf>,
    /// off | error | warn | info | debug | trace (overrides KMEANS_LOG)
    #[arg(long, value_parser = log_level)]
    log_level: Option<LevelFilter>,

    /// Memory of the emulated device
    #[arg(long, default_value_t = 1)]
    device_memory_mb: u64,
    #[arg(long, default_value_t = 64)]
    wave_size: usize,
    #[arg(long, default_value_t = 256)]
    max_work_group_size: usize,
    /// Worker threads of the emulated device
    #[arg(long)]
    threads: Option<usize>,
}

fn log_level(level: &str) -> std::result::Result<LevelFilter, String> {
    parse_level(level).ok_or_else(|| format!("unknown log level {:?}", level))
}

#[cfg(not(feature = "opencl"))]
fn open_device(args: &Args) -> Result<Arc<kmeans_cl::HostDevice>> {
    use kmeans_cl::{HostDevice, HostDeviceConfig};

    let mut config = HostDeviceConfig::default()
        .max_memory_bytes(args.device_memory_mb * 1024 * 1024)
        .wave_size(args.wave_size)
        .max_work_group_size(args.max_work_group_size);
    if let Some(threads) = args.threads {
        config = config.threads(threads);
    }
    Ok(Arc::new(HostDevice::new(config)?))
}

#[cfg(feature = "opencl")]
fn open_device(args: &Args) -> Result<Arc<kmeans_cl::device::OclDevice>> {
    Ok(Arc::new(kmeans_cl::device::OclDevice::new(args.wave_size)?))
}

fn run(args: &Args) -> Result<()> {
    let strategy: Strategy = args.strategy.parse()?;

    let started = Instant::now();
    log::info!("Read input file ...");
    let mut points = read_points(&args.input)?;
    log::info!("Read center file ...");
    let mut centroids = read_centroids(&args.centroids)?;
    log::debug!("Centroid size: {}", centroids.len());

    let dimension = validate_input(&points, &centroids)?;

    let mut engine = ClusteringEngine::new(build_strategy(strategy, || open_device(args))?);
    engine.initialize(dimension, centroids.len())?;

    let compute_started = Instant::now();
    let report = engine.run(&mut points, &mut centroids, args.iterations)?;
    log::info!("timeCompute{}={}ms;", strategy, compute_started.elapsed().as_millis());
    log::info!("time{}={}ms;", strategy, started.elapsed().as_millis());
    log::info!(
        "Finished {} iterations - Inertia: {} - cluster sizes: {:?}",
        report.iterations,
        report.inertia,
        report.cluster_sizes
    );

    write_points(&args.output, &points)?;
    if let Some(path) = &args.centroids_out {
        write_centroids(path, &centroids)?;
    }
    if let Some(path) = &args.binary {
        save_binary(path, &points, &centroids)?;
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let logger = match args.log_level {
        Some(level) => init_logger_with_level(level),
        None => init_logger(),
    };
    if let Err(err) = logger {
        eprintln!("Failed to initialize logger: {}", err);
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

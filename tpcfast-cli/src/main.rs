//! tpcfast command-line interface.
//!
//! Builds transform snapshots from JSON geometry, inspects and
//! recalibrates them, and transforms CSV hit lists to space points.
#![allow(clippy::uninlined_format_args, clippy::cast_precision_loss)]

use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;
use tpcfast_core::{load_calibration, GeometryConfig, GridDistortion, RowInfo, TpcFastTransform};
use tpcfast_io::{
    read_hits_csv, rewrite_calibration, SnapshotReader, SnapshotWriter, SpacePointWriter,
};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    TpcfastIo(#[from] tpcfast_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] tpcfast_core::Error),
}

/// Fast raw-to-space-point transformation for TPC hits.
#[derive(Parser)]
#[command(name = "tpcfast")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a transform snapshot from a JSON geometry file
    Build {
        /// Geometry JSON file
        config: PathBuf,

        /// Output snapshot file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Show information about a snapshot
    Info {
        /// Snapshot file
        input: PathBuf,
    },

    /// Transform a CSV of raw hits (slice,row,pad,time) to space points
    Transform {
        /// Snapshot file
        snapshot: PathBuf,

        /// Input hits CSV
        hits: PathBuf,

        /// Output points CSV
        #[arg(short, long)]
        output: PathBuf,

        /// Rotate points into the global frame
        #[arg(long)]
        global: bool,
    },

    /// Replace the calibration stored in a snapshot
    Calibrate {
        /// Snapshot file
        snapshot: PathBuf,

        /// Calibration JSON file
        calibration: PathBuf,

        /// Override the calibration time stamp
        #[arg(long)]
        time_stamp: Option<i64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Build { config, output } => {
            let geometry = GeometryConfig::from_file(&config)?;
            let transform = geometry.build()?;
            SnapshotWriter::create(&output)?.write(&transform)?;

            println!("Wrote {}", output.display());
            println!("Rows: {}", transform.number_of_rows());
            println!("Region: {} bytes", transform.flat_size());
        }

        Commands::Info { input } => {
            let reader = SnapshotReader::open(&input)?;
            let transform = reader.transform::<GridDistortion>()?;
            print_info(&input, &transform);
        }

        Commands::Transform {
            snapshot,
            hits,
            output,
            global,
        } => {
            let reader = SnapshotReader::open(&snapshot)?;
            let transform = reader.transform::<GridDistortion>()?;
            let hits = read_hits_csv(&hits)?;
            info!("transforming {} hits", hits.len());

            let start = Instant::now();
            let (mut points, stats) = transform.transform_batch(&hits);
            if global {
                for i in 0..points.len() {
                    let info = transform.slice_info(usize::from(points.slice[i]));
                    if let (Some(info), Some(point)) = (info, points.point(i)) {
                        let rotated = point.to_global(info);
                        points.x[i] = rotated.x;
                        points.y[i] = rotated.y;
                    }
                }
            }
            let elapsed = start.elapsed();

            SpacePointWriter::create(&output)?.write_points_csv(&points)?;

            println!(
                "Transformed {} hits in {:.3}s",
                hits.len(),
                elapsed.as_secs_f64()
            );
            println!("Points: {}", stats.transformed);
            println!("Rejected: {}", stats.rejected);
        }

        Commands::Calibrate {
            snapshot,
            calibration,
            time_stamp,
        } => {
            let mut calibration = load_calibration(&calibration)?;
            if let Some(time_stamp) = time_stamp {
                calibration.time_stamp = time_stamp;
            }
            let previous = SnapshotReader::open(&snapshot)?.calibration();
            rewrite_calibration(&snapshot, &calibration)?;

            println!(
                "Calibration time stamp: {} -> {}",
                previous.time_stamp, calibration.time_stamp
            );
        }
    }

    Ok(())
}

fn print_info<R: AsRef<[u8]>>(
    path: &std::path::Path,
    transform: &TpcFastTransform<GridDistortion, R>,
) {
    let calibration = transform.calibration();
    println!("File: {}", path.display());
    println!(
        "Region: {} bytes ({:.2} KB)",
        transform.flat_size(),
        transform.flat_size() as f64 / 1024.0
    );
    println!(
        "Slices: {}",
        TpcFastTransform::<GridDistortion, R>::number_of_slices()
    );
    println!("Rows: {}", transform.number_of_rows());
    println!(
        "Drift length: A {} cm, C {} cm",
        transform.z_length_a(),
        transform.z_length_c()
    );

    let rows = transform.rows();
    if let (Some(first), Some(last)) = (rows.first(), rows.last()) {
        println!("Row x range: {} - {} cm", first.x, last.x);
        let pads: i32 = rows.iter().map(RowInfo::number_of_pads).sum();
        println!("Pads: {}", pads);
    }

    println!("Calibration time stamp: {}", calibration.time_stamp);
    println!("  t0: {}", calibration.t0);
    println!(
        "  drift velocity: {} + {} * y",
        calibration.v_drift, calibration.v_drift_corr_y
    );
    println!("  drift length correction: {}", calibration.l_drift_corr);
    println!("  time-of-flight: {}", calibration.tof_corr);
    println!("  primary vertex z: {}", calibration.prim_vtx_z);
    println!("  alignment z: {}", calibration.alignment_z);
}

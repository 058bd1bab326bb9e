//! CLI driver for the bundle-adjustment rig calibrator (SPEC_FULL §6).

use std::path::PathBuf;

use clap::Parser;
use eyre::Context;

/// Multi-camera rig calibration via bundle adjustment over fiducial-marker
/// observations.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input document path (required, must exist).
    #[arg(short = 'i', value_name = "PATH")]
    input: PathBuf,

    /// Output document path (required).
    #[arg(short = 'o', value_name = "PATH")]
    output: PathBuf,

    /// Optimize camera intrinsics (focal, principal, and -- with -r -- distortion).
    #[arg(short = 'k')]
    optimize_intrinsic: bool,

    /// Optimize radial/tangential distortion (has effect only with -k).
    #[arg(short = 'r')]
    optimize_radial: bool,

    /// Optimize camera extrinsics.
    #[arg(short = 'm')]
    optimize_extrinsic: bool,

    /// Share intrinsic model across all cameras (stored in camera 0).
    #[arg(short = 's')]
    share_camera_model: bool,

    /// Enable the Huber robust loss (delta = 0.2) in place of squared loss.
    #[arg(long)]
    huber: bool,

    /// Raise the tracing log level (repeatable); overridden by RUST_LOG.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    rig_bundle_cal::logging::init(cli.verbose);

    let config = rig_bundle_cal::RunConfig {
        optimize_intrinsic: cli.optimize_intrinsic,
        optimize_radial: cli.optimize_radial,
        optimize_extrinsic: cli.optimize_extrinsic,
        share_intrinsics: cli.share_camera_model,
        huber: cli.huber,
    };

    let report = rig_bundle_cal::run_calibration(&cli.input, &cli.output, config)
        .wrap_err("calibration failed")?;

    tracing::info!(
        status = ?report.status,
        final_cost = report.final_cost,
        iterations = report.iterations,
        "calibration complete"
    );
    Ok(())
}

//! Multi-camera rig calibration via bundle adjustment over fiducial-marker
//! observations (see `SPEC_FULL.md` for the full design).
//!
//! The pipeline (SPEC_FULL §2): an input document is read into a
//! [`model::ParameterStore`] by [`io::load_input`]; optionally, a
//! [`detector::FiducialDetector`] pool (not wired into [`run_calibration`]
//! directly — see its module docs) produces observations upstream; a
//! [`problem::BundleProblem`] is built from the store, the observations, and
//! the optimization mode; [`solver::solve`] mutates it in place; and
//! [`io::write_output`] serializes the result.

pub mod camera;
pub mod detector;
pub mod error;
pub mod io;
pub mod logging;
pub mod model;
pub mod problem;
pub mod residual;
pub mod solver;

pub use error::{Error, Result};
use residual::OptimizationMode;

/// Configuration resolved from CLI flags (SPEC_FULL §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct RunConfig {
    pub optimize_intrinsic: bool,
    pub optimize_radial: bool,
    pub optimize_extrinsic: bool,
    pub share_intrinsics: bool,
    pub huber: bool,
}

/// Runs the whole optimizer pipeline: load, build, solve, write.
///
/// The detector pool (SPEC_FULL §4.4) is a separate, independently testable
/// entry point (`detector::detect_batch`/`detect_video`) — its output feeds
/// the `ObservedPoints` section of the input document this function reads,
/// rather than being invoked inline here, matching SPEC_FULL §2's data flow
/// (`Detector Pool` writes observations that land in the same document
/// `Parameter Store` is built from).
pub fn run_calibration(
    input: &std::path::Path,
    output: &std::path::Path,
    config: RunConfig,
) -> Result<solver::SolveReport> {
    let mode = OptimizationMode::resolve(
        config.optimize_intrinsic,
        config.optimize_radial,
        config.optimize_extrinsic,
    )?;
    tracing::info!(?mode, ?config, "resolved optimization mode");

    let (store, observations) = io::load_input(input)?;
    let observations: Vec<problem::Observation> =
        observations.into_iter().map(Into::into).collect();

    let huber_delta = config.huber.then_some(0.2);
    let problem = problem::BundleProblem::new(
        &store,
        observations,
        mode,
        config.share_intrinsics,
        huber_delta,
    );

    let (solved, report) = solver::solve(problem);
    let mut store = solved.into_store();
    if config.share_intrinsics {
        store.broadcast_shared_intrinsics();
    }

    io::write_output(output, &store, &report)?;
    Ok(report)
}

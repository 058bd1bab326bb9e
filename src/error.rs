//! Typed errors for the calibration library.
//!
//! Mirrors the shape of `bundle-adj::Error` (a small, flat `thiserror` enum)
//! rather than `braid-april-cal`'s field-carrying `MyError`, since this
//! crate's fallible surface is narrower: document parsing/validation and
//! problem construction.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("input file does not exist: {0}")]
    MissingInputFile(std::path::PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as JSON: {source}")]
    Json {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Camera needs to be defined by 17 parameters")]
    BadCameraCardinality,

    #[error("World point needs three scalars")]
    BadModelPointCardinality,

    #[error("Object pose needs six scalars")]
    BadObjectPoseCardinality,

    #[error("Observed point needs two scalars")]
    BadObservationCardinality,

    #[error("ObservedPoints arrays (coords, pid, cid, fid) must have equal length")]
    MismatchedObservationArrays,

    #[error("observation references out-of-range index: {what} {idx} (have {len})")]
    IndexOutOfRange {
        what: &'static str,
        idx: usize,
        len: usize,
    },

    #[error(
        "optimizeIntrinsic=true with optimizeExtrinsic=false is not a supported optimization mode"
    )]
    UnsupportedMode,

    #[error("at least one camera is required")]
    NoCameras,
}

pub type Result<T> = std::result::Result<T, Error>;

//! Serializer (SPEC_FULL §4.5, §6): reads the input problem document into a
//! [`ParameterStore`] + observation list with strict schema validation, and
//! writes the post-optimization document.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::camera::Camera;
use crate::error::{Error, Result};
use crate::model::{ModelPoint, ObjectPose, Observation, ParameterStore};
use crate::solver::SolveReport;

/// The `ObservedPoints` section: four parallel arrays (SPEC_FULL §6).
#[derive(Debug, Deserialize)]
struct ObservedPointsDoc {
    coords: Vec<Vec<f64>>,
    pid: Vec<usize>,
    cid: Vec<usize>,
    fid: Vec<usize>,
}

#[derive(Debug, Deserialize)]
struct InputDocument {
    #[serde(rename = "Camera")]
    camera: Vec<Vec<f64>>,
    #[serde(rename = "ModelPoints")]
    model_points: Vec<Vec<f64>>,
    #[serde(rename = "ObjectPoses")]
    object_poses: Vec<Vec<f64>>,
    #[serde(rename = "ObservedPoints")]
    observed_points: ObservedPointsDoc,
}

#[derive(Debug, Serialize)]
struct OutputDocument {
    #[serde(rename = "Camera")]
    camera: Vec<[f64; 15]>,
    #[serde(rename = "ObjectPoses")]
    object_poses: Vec<[f64; 6]>,
    termination: SolveReport,
}

/// Reads and validates the input document at `path` (SPEC_FULL §6), returning
/// the parsed [`ParameterStore`] and the flat observation list.
pub fn load_input(path: &Path) -> Result<(ParameterStore, Vec<Observation>)> {
    if !path.exists() {
        return Err(Error::MissingInputFile(path.to_path_buf()));
    }

    let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: InputDocument =
        serde_json::from_str(&text).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;

    if doc.camera.is_empty() {
        return Err(Error::NoCameras);
    }

    let cameras = doc
        .camera
        .into_iter()
        .map(|scalars| {
            let arr: [f64; 17] = scalars
                .try_into()
                .map_err(|_| Error::BadCameraCardinality)?;
            Ok(Camera::from_scalars(&arr))
        })
        .collect::<Result<Vec<_>>>()?;

    let model_points = doc
        .model_points
        .into_iter()
        .map(|scalars| {
            let arr: ModelPoint = scalars
                .try_into()
                .map_err(|_| Error::BadModelPointCardinality)?;
            Ok(arr)
        })
        .collect::<Result<Vec<_>>>()?;

    let object_poses = doc
        .object_poses
        .into_iter()
        .map(|scalars| {
            let arr: [f64; 6] = scalars
                .try_into()
                .map_err(|_| Error::BadObjectPoseCardinality)?;
            Ok(ObjectPose::from_scalars(&arr))
        })
        .collect::<Result<Vec<_>>>()?;

    let op = &doc.observed_points;
    let n = op.coords.len();
    if op.pid.len() != n || op.cid.len() != n || op.fid.len() != n {
        return Err(Error::MismatchedObservationArrays);
    }

    let mut observations = Vec::with_capacity(n);
    for i in 0..n {
        let [u, v]: [f64; 2] = op.coords[i]
            .clone()
            .try_into()
            .map_err(|_| Error::BadObservationCardinality)?;
        let (cid, pid, fid) = (op.cid[i], op.pid[i], op.fid[i]);
        if cid >= cameras.len() {
            return Err(Error::IndexOutOfRange {
                what: "cid",
                idx: cid,
                len: cameras.len(),
            });
        }
        if pid >= model_points.len() {
            return Err(Error::IndexOutOfRange {
                what: "pid",
                idx: pid,
                len: model_points.len(),
            });
        }
        if fid >= object_poses.len() {
            return Err(Error::IndexOutOfRange {
                what: "fid",
                idx: fid,
                len: object_poses.len(),
            });
        }
        observations.push(Observation { cid, pid, fid, u, v });
    }

    tracing::info!(
        cameras = cameras.len(),
        model_points = model_points.len(),
        frames = object_poses.len(),
        observations = observations.len(),
        "loaded input document"
    );

    Ok((
        ParameterStore::new(cameras, model_points, object_poses),
        observations,
    ))
}

/// Writes the output document (SPEC_FULL §6): 15-scalar cameras, object
/// poses unchanged in shape, and the ADDED `termination` object.
pub fn write_output(path: &Path, store: &ParameterStore, report: &SolveReport) -> Result<()> {
    let doc = OutputDocument {
        camera: store.cameras.iter().map(Camera::to_output_scalars).collect(),
        object_poses: store
            .object_poses
            .iter()
            .map(|pose| pose.to_scalars())
            .collect(),
        termination: *report,
    };

    let file = std::fs::File::create(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut writer = std::io::BufWriter::new(file);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut writer, formatter);
    doc.serialize(&mut ser).map_err(|source| Error::Json {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::info!(path = %path.display(), "wrote output document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "Camera": [[800.0, 800.0, 320.0, 240.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 640.0, 480.0]],
            "ModelPoints": [[0.0, 0.0, 0.0], [0.1, 0.0, 0.0]],
            "ObjectPoses": [[0.0, 0.0, 0.0, 0.0, 0.0, 0.0]],
            "ObservedPoints": {
                "coords": [[320.0, 240.0], [350.0, 240.0]],
                "pid": [0, 1],
                "cid": [0, 0],
                "fid": [0, 0]
            }
        }"#
    }

    #[test]
    fn parses_well_formed_document() {
        let dir = std::env::temp_dir().join(format!("rig-cal-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("input.json");
        std::fs::write(&path, sample_json()).unwrap();

        let (store, observations) = load_input(&path).unwrap();
        assert_eq!(store.num_cameras(), 1);
        assert_eq!(store.model_points.len(), 2);
        assert_eq!(store.num_frames(), 1);
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[1].pid, 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_16_scalar_camera() {
        let dir = std::env::temp_dir().join(format!("rig-cal-test-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("input.json");
        let bad = sample_json().replacen("640.0, 480.0", "640.0", 1);
        std::fs::write(&path, bad).unwrap();

        let err = load_input(&path).unwrap_err();
        assert!(matches!(err, Error::BadCameraCardinality));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn rejects_out_of_range_observation_index() {
        let dir = std::env::temp_dir().join(format!("rig-cal-test-oob-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("input.json");
        let bad = sample_json().replace("\"pid\": [0, 1]", "\"pid\": [0, 9]");
        std::fs::write(&path, bad).unwrap();

        let err = load_input(&path).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { what: "pid", .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_input_file_is_reported() {
        let err = load_input(Path::new("/nonexistent/path/does-not-exist.json")).unwrap_err();
        assert!(matches!(err, Error::MissingInputFile(_)));
    }
}

//! The data model (SPEC_FULL §3) and the Parameter Store.

use crate::camera::Camera;

/// A fixed 3-D point in the tracked object's local frame. Never optimized.
pub type ModelPoint = [f64; 3];

/// One frame's 6-DOF object pose, laid out rotation-then-translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectPose {
    pub rotation: [f64; 3],
    pub translation: [f64; 3],
}

impl ObjectPose {
    pub fn from_scalars(s: &[f64; 6]) -> Self {
        ObjectPose {
            rotation: [s[0], s[1], s[2]],
            translation: [s[3], s[4], s[5]],
        }
    }

    pub fn to_scalars(self) -> [f64; 6] {
        [
            self.rotation[0],
            self.rotation[1],
            self.rotation[2],
            self.translation[0],
            self.translation[1],
            self.translation[2],
        ]
    }
}

/// A single 2-D detection: camera `cid` saw model point `pid` in frame `fid`
/// at pixel `(u, v)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub cid: usize,
    pub pid: usize,
    pub fid: usize,
    pub u: f64,
    pub v: f64,
}

/// Owns every optimizable parameter and the immutable model geometry.
///
/// This is the "arena" referred to in SPEC_FULL §9: cameras and object poses
/// live in flat `Vec`s addressed by stable index (`cid`, `fid`). The solver
/// never holds a pointer into this struct directly — instead the Problem
/// Builder assembles a flat `DVector<f64>` view of whichever scalars a given
/// optimization mode makes free, and `set_params`/`residuals` round-trip
/// through index→offset maps back into this store. The store itself is never
/// touched by more than one thread at a time (§5).
#[derive(Debug, Clone)]
pub struct ParameterStore {
    pub cameras: Vec<Camera>,
    pub model_points: Vec<ModelPoint>,
    pub object_poses: Vec<ObjectPose>,
}

impl ParameterStore {
    pub fn new(
        cameras: Vec<Camera>,
        model_points: Vec<ModelPoint>,
        object_poses: Vec<ObjectPose>,
    ) -> Self {
        ParameterStore {
            cameras,
            model_points,
            object_poses,
        }
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn num_frames(&self) -> usize {
        self.object_poses.len()
    }

    /// Copies camera 0's intrinsic fields onto every other camera. Called
    /// after a shared-intrinsics solve, before serialization.
    pub fn broadcast_shared_intrinsics(&mut self) {
        if self.cameras.is_empty() {
            return;
        }
        let source = self.cameras[0];
        for cam in self.cameras.iter_mut().skip(1) {
            cam.adopt_intrinsics_from(&source);
        }
    }
}

//! Problem Builder (SPEC_FULL §4.2): turns a [`ParameterStore`] and a set of
//! [`Observation`]s into a [`levenberg_marquardt::LeastSquaresProblem`].
//!
//! # Parameter vector layout
//!
//! The flat vector the solver sees is assembled in this fixed order, each
//! section present only if the active [`OptimizationMode`] frees it:
//!
//! ```text
//! [ object poses: num_frames * 6 ]
//! [ camera extrinsics: num_cameras * 6 ]            (modes Full, IntrinsicExtrinsic, ExtrinsicOnly)
//! [ camera intrinsics (focal+principal): owners * 4 ] (modes Full, IntrinsicExtrinsic)
//! [ camera distortion: owners * 5 ]                  (mode Full)
//! ```
//!
//! where `owners` is 1 if intrinsics are shared (camera 0 only) or
//! `num_cameras` otherwise. Object pose is always free: every variant lists
//! it as a parameter block (SPEC_FULL §4.1).
//!
//! Fields of [`Camera`]/[`ObjectPose`] that a mode does not free are simply
//! never written back by `set_params` — they stay at whatever value they
//! were constructed with, which is precisely the "baked constant" behavior
//! the spec calls for, with no separate storage needed.

use nalgebra::{self as na, Dyn, Owned};
use num_dual::{first_derivative, Dual64, DualNum};

use crate::camera::Camera;
use crate::model::{ModelPoint, ObjectPose, ParameterStore};
use crate::residual::{
    residual_full, residual_intrinsic_extrinsic, residual_reprojection_only, OptimizationMode,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub cid: usize,
    pub pid: usize,
    pub fid: usize,
    pub u: f64,
    pub v: f64,
}

impl From<crate::model::Observation> for Observation {
    fn from(o: crate::model::Observation) -> Self {
        Observation {
            cid: o.cid,
            pid: o.pid,
            fid: o.fid,
            u: o.u,
            v: o.v,
        }
    }
}

/// The least-squares problem handed to `levenberg_marquardt::LevenbergMarquardt`.
///
/// Owns a working copy of the cameras and object poses (mutated in place by
/// `set_params`, read back into a [`ParameterStore`] once the solve
/// returns), the immutable model points, and the observation list.
pub struct BundleProblem {
    mode: OptimizationMode,
    share_intrinsics: bool,
    observations: Vec<Observation>,
    model_points: Vec<ModelPoint>,
    cameras: Vec<Camera>,
    object_poses: Vec<ObjectPose>,
    huber_delta: Option<f64>,
    x: na::DVector<f64>,
}

const FRAME_BLOCK_LEN: usize = 6;
const EXTRINSIC_BLOCK_LEN: usize = 6;
const INTRINSIC_BLOCK_LEN: usize = 4;
const DISTORTION_BLOCK_LEN: usize = 5;

impl BundleProblem {
    pub fn new(
        store: &ParameterStore,
        observations: Vec<Observation>,
        mode: OptimizationMode,
        share_intrinsics: bool,
        huber_delta: Option<f64>,
    ) -> Self {
        let mut problem = BundleProblem {
            mode,
            share_intrinsics,
            observations,
            model_points: store.model_points.clone(),
            cameras: store.cameras.clone(),
            object_poses: store.object_poses.clone(),
            huber_delta,
            x: na::DVector::zeros(0),
        };
        problem.x = problem.gather_params();
        problem
    }

    fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    fn num_frames(&self) -> usize {
        self.object_poses.len()
    }

    fn num_intrinsic_owners(&self) -> usize {
        if self.share_intrinsics {
            1
        } else {
            self.num_cameras()
        }
    }

    fn intrinsic_owner(&self, cid: usize) -> usize {
        if self.share_intrinsics {
            0
        } else {
            cid
        }
    }

    fn frame_offset(&self, fid: usize) -> usize {
        fid * FRAME_BLOCK_LEN
    }

    fn extrinsic_block_start(&self) -> usize {
        self.num_frames() * FRAME_BLOCK_LEN
    }

    fn cam_extrinsic_offset(&self, cid: usize) -> usize {
        self.extrinsic_block_start() + cid * EXTRINSIC_BLOCK_LEN
    }

    fn intrinsic_block_start(&self) -> usize {
        let mut start = self.extrinsic_block_start();
        if self.mode.optimizes_extrinsic() {
            start += self.num_cameras() * EXTRINSIC_BLOCK_LEN;
        }
        start
    }

    fn cam_intrinsic_offset(&self, owner: usize) -> usize {
        self.intrinsic_block_start() + owner * INTRINSIC_BLOCK_LEN
    }

    fn distortion_block_start(&self) -> usize {
        let mut start = self.intrinsic_block_start();
        if self.mode.optimizes_intrinsic() {
            start += self.num_intrinsic_owners() * INTRINSIC_BLOCK_LEN;
        }
        start
    }

    fn cam_distortion_offset(&self, owner: usize) -> usize {
        self.distortion_block_start() + owner * DISTORTION_BLOCK_LEN
    }

    fn total_params(&self) -> usize {
        let mut total = self.distortion_block_start();
        if self.mode.optimizes_distortion() {
            total += self.num_intrinsic_owners() * DISTORTION_BLOCK_LEN;
        }
        total
    }

    fn gather_params(&self) -> na::DVector<f64> {
        let mut x = na::DVector::zeros(self.total_params());
        for (fid, pose) in self.object_poses.iter().enumerate() {
            let o = self.frame_offset(fid);
            x.as_mut_slice()[o..o + 6].copy_from_slice(&pose.to_scalars());
        }
        if self.mode.optimizes_extrinsic() {
            for cid in 0..self.num_cameras() {
                let o = self.cam_extrinsic_offset(cid);
                let cam = &self.cameras[cid];
                x.as_mut_slice()[o..o + 3].copy_from_slice(&cam.rotation());
                x.as_mut_slice()[o + 3..o + 6].copy_from_slice(&cam.translation());
            }
        }
        if self.mode.optimizes_intrinsic() {
            for owner in 0..self.num_intrinsic_owners() {
                let o = self.cam_intrinsic_offset(owner);
                let cam = &self.cameras[owner];
                x.as_mut_slice()[o..o + 2].copy_from_slice(&cam.focal());
                x.as_mut_slice()[o + 2..o + 4].copy_from_slice(&cam.principal());
            }
        }
        if self.mode.optimizes_distortion() {
            for owner in 0..self.num_intrinsic_owners() {
                let o = self.cam_distortion_offset(owner);
                let cam = &self.cameras[owner];
                x.as_mut_slice()[o..o + 5].copy_from_slice(&cam.distortion());
            }
        }
        x
    }

    /// Consumes the problem (after a solve has mutated `set_params`'s working
    /// copy) and writes the result back into a [`ParameterStore`].
    pub fn into_store(self) -> ParameterStore {
        ParameterStore::new(self.cameras, self.model_points, self.object_poses)
    }

    fn loss_scale(&self, residual: f64) -> f64 {
        match self.huber_delta {
            None => 1.0,
            Some(delta) => {
                let a = residual.abs();
                if a <= delta {
                    1.0
                } else {
                    (delta / a).sqrt()
                }
            }
        }
    }

    /// The IRLS scale factor for one observation's two reprojection
    /// residuals under the Huber loss (1.0 when `--huber` is off). Scoped to
    /// the reprojection residuals only — the distortion/principal-point
    /// priors (SPEC_FULL §4.2 step 6) are not robustified — and shared by
    /// `residuals()` and `jacobian()` so the two stay consistent.
    fn reprojection_loss_scale(&self, residual: &[f64]) -> f64 {
        if self.huber_delta.is_none() {
            return 1.0;
        }
        let raw_norm = (residual[0] * residual[0] + residual[1] * residual[1]).sqrt();
        self.loss_scale(raw_norm)
    }
}

impl levenberg_marquardt::LeastSquaresProblem<f64, Dyn, Dyn> for BundleProblem {
    type ParameterStorage = Owned<f64, Dyn>;
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;

    fn set_params(&mut self, x: &na::DVector<f64>) {
        self.x = x.clone();
        for fid in 0..self.num_frames() {
            let o = self.frame_offset(fid);
            let s = x.as_slice();
            self.object_poses[fid] = ObjectPose::from_scalars(&[
                s[o],
                s[o + 1],
                s[o + 2],
                s[o + 3],
                s[o + 4],
                s[o + 5],
            ]);
        }
        if self.mode.optimizes_extrinsic() {
            for cid in 0..self.num_cameras() {
                let o = self.cam_extrinsic_offset(cid);
                let s = x.as_slice();
                self.cameras[cid].rx = s[o];
                self.cameras[cid].ry = s[o + 1];
                self.cameras[cid].rz = s[o + 2];
                self.cameras[cid].tx = s[o + 3];
                self.cameras[cid].ty = s[o + 4];
                self.cameras[cid].tz = s[o + 5];
            }
        }
        if self.mode.optimizes_intrinsic() {
            for owner in 0..self.num_intrinsic_owners() {
                let o = self.cam_intrinsic_offset(owner);
                let s = x.as_slice();
                self.cameras[owner].fx = s[o];
                self.cameras[owner].fy = s[o + 1];
                self.cameras[owner].cx = s[o + 2];
                self.cameras[owner].cy = s[o + 3];
            }
        }
        if self.mode.optimizes_distortion() {
            for owner in 0..self.num_intrinsic_owners() {
                let o = self.cam_distortion_offset(owner);
                let s = x.as_slice();
                self.cameras[owner].k1 = s[o];
                self.cameras[owner].k2 = s[o + 1];
                self.cameras[owner].p1 = s[o + 2];
                self.cameras[owner].p2 = s[o + 3];
                self.cameras[owner].k3 = s[o + 4];
            }
        }
    }

    fn params(&self) -> na::DVector<f64> {
        self.x.clone()
    }

    fn residuals(&self) -> Option<na::DVector<f64>> {
        let dim = self.mode.residual_dim();
        let mut out = na::DVector::zeros(self.observations.len() * dim);
        for (i, obs) in self.observations.iter().enumerate() {
            let (_cols, values) = self.active_columns(obs);
            let r = self.typed_residual::<f64>(obs, &values);
            let scale = self.reprojection_loss_scale(&r);
            for (k, val) in r.into_iter().enumerate() {
                out[i * dim + k] = if k < 2 { val * scale } else { val };
            }
        }
        Some(out)
    }

    fn jacobian(&self) -> Option<na::Matrix<f64, Dyn, Dyn, Self::JacobianStorage>> {
        let dim = self.mode.residual_dim();
        let nparams = self.total_params();
        let mut jac = na::OMatrix::<f64, Dyn, Dyn>::zeros(self.observations.len() * dim, nparams);
        for (i, obs) in self.observations.iter().enumerate() {
            let (cols, values) = self.active_columns(obs);
            let r = self.typed_residual::<f64>(obs, &values);
            let scale = self.reprojection_loss_scale(&r);
            for (local_k, _) in values.iter().enumerate().take(dim) {
                let row_scale = if local_k < 2 { scale } else { 1.0 };
                for (local_i, &global_col) in cols.iter().enumerate() {
                    let d = self.partial_derivative(obs, local_i, local_k);
                    jac[(i * dim + local_k, global_col)] = d * row_scale;
                }
            }
        }
        Some(jac)
    }
}

impl BundleProblem {
    /// Column indices into the global parameter vector that this
    /// observation's residual depends on, laid out in the spec's parameter
    /// order `[obj_rot(3), obj_trans(3), cam_rot(3), cam_trans(3),
    /// focal(2), principal(2), distortion(5)]`, truncated per mode. Also
    /// returns the current scalar value at each column (used as the base
    /// point for numerical/dual perturbation).
    fn active_columns(&self, obs: &Observation) -> (Vec<usize>, Vec<f64>) {
        let mut cols = Vec::with_capacity(self.mode.free_param_count());
        let fid = obs.fid;
        let o = self.frame_offset(fid);
        cols.extend(o..o + 6);

        if self.mode.optimizes_extrinsic() {
            let o = self.cam_extrinsic_offset(obs.cid);
            cols.extend(o..o + 6);
        }
        if self.mode.optimizes_intrinsic() {
            let owner = self.intrinsic_owner(obs.cid);
            let o = self.cam_intrinsic_offset(owner);
            cols.extend(o..o + 4);
        }
        if self.mode.optimizes_distortion() {
            let owner = self.intrinsic_owner(obs.cid);
            let o = self.cam_distortion_offset(owner);
            cols.extend(o..o + 5);
        }
        let values: Vec<f64> = cols.iter().map(|&c| self.x[c]).collect();
        (cols, values)
    }

    /// Evaluates the residual for one observation given the current value of
    /// each *active* scalar (in the same order `active_columns` returns
    /// them), promoting everything — active and baked alike — to `D`.
    /// Baked fields are read straight from the stored `Camera`/`ObjectPose`,
    /// so calling this with `D = f64` and `active` holding the live values
    /// reproduces exactly what `residuals()` needs, while calling it with a
    /// dual-seeded `active` (see `partial_derivative`) yields one Jacobian
    /// column.
    fn typed_residual<D: DualNum<f64> + Copy>(&self, obs: &Observation, active: &[D]) -> Vec<D> {
        let mut idx = 0usize;
        let mut next = || {
            let v = active[idx];
            idx += 1;
            v
        };

        let object_rotation = [next(), next(), next()];
        let object_translation = [next(), next(), next()];

        let cam_extrinsic_src = &self.cameras[obs.cid];
        let (camera_rotation, camera_translation) = if self.mode.optimizes_extrinsic() {
            ([next(), next(), next()], [next(), next(), next()])
        } else {
            (
                cam_extrinsic_src.rotation().map(D::from_re),
                cam_extrinsic_src.translation().map(D::from_re),
            )
        };

        let owner = self.intrinsic_owner(obs.cid);
        let cam_intrinsic_src = &self.cameras[owner];
        let (focal, principal) = if self.mode.optimizes_intrinsic() {
            ([next(), next()], [next(), next()])
        } else {
            (
                cam_intrinsic_src.focal().map(D::from_re),
                cam_intrinsic_src.principal().map(D::from_re),
            )
        };

        let distortion = if self.mode.optimizes_distortion() {
            [next(), next(), next(), next(), next()]
        } else {
            cam_intrinsic_src.distortion().map(D::from_re)
        };

        let point_d = self.model_points[obs.pid].map(D::from_re);
        let observed = (obs.u, obs.v);
        let width = cam_intrinsic_src.width;
        let height = cam_intrinsic_src.height;

        match self.mode {
            OptimizationMode::Full => residual_full(
                object_rotation,
                object_translation,
                camera_rotation,
                camera_translation,
                focal,
                principal,
                distortion,
                point_d,
                observed,
                width,
                height,
            )
            .to_vec(),
            OptimizationMode::IntrinsicExtrinsic => residual_intrinsic_extrinsic(
                object_rotation,
                object_translation,
                camera_rotation,
                camera_translation,
                focal,
                principal,
                distortion,
                point_d,
                observed,
                width,
                height,
            )
            .to_vec(),
            OptimizationMode::ExtrinsicOnly | OptimizationMode::PoseOnly => {
                residual_reprojection_only(
                    object_rotation,
                    object_translation,
                    camera_rotation,
                    camera_translation,
                    focal,
                    principal,
                    distortion,
                    point_d,
                    observed,
                )
                .to_vec()
            }
        }
    }

    /// Builds the active-parameter vector for one observation by calling
    /// `promote(i)` for each active column index `i` in `active_columns`
    /// order, then evaluates the residual over it. Used both directly (with
    /// `D = f64`, though `residuals()` takes the faster path instead) and as
    /// the inner evaluation of `partial_derivative`'s dual-seeded pass.
    fn eval_residual_with<D: DualNum<f64> + Copy>(
        &self,
        obs: &Observation,
        mut promote: impl FnMut(usize) -> D,
    ) -> Vec<D> {
        let n = self.mode.free_param_count();
        let active: Vec<D> = (0..n).map(&mut promote).collect();
        self.typed_residual(obs, &active)
    }

    /// `∂residual[local_k] / ∂(active parameter local_i)` via one forward-mode
    /// automatic-differentiation pass: every active scalar except
    /// `local_i` is held at its current value; `local_i` is seeded with a
    /// unit dual-number derivative.
    fn partial_derivative(&self, obs: &Observation, local_i: usize, local_k: usize) -> f64 {
        let (_cols, values) = self.active_columns(obs);
        let (_, deriv) = first_derivative(
            |seeded: Dual64| {
                self.eval_residual_with(obs, |idx| {
                    if idx == local_i {
                        seeded
                    } else {
                        Dual64::from_re(values[idx])
                    }
                })[local_k]
            },
            values[local_i],
        );
        deriv
    }
}

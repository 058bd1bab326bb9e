//! The four residual-variant functors (SPEC_FULL §4.1) as a tagged sum type
//! over the optimization mode, plus the generic residual-evaluation
//! functions themselves.
//!
//! Each `residual_*` function is generic over `D: DualNum<f64>` and is
//! called twice per observation by the Problem Builder: once with `D = f64`
//! for the residual vector, once with a dual-seeded `D` for the Jacobian
//! column block (see `problem.rs`).

use num_dual::DualNum;

use crate::camera::project;
use crate::error::{Error, Result};

/// Which of the four residual variants (A/B/C/D) governs a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Default)]
pub enum OptimizationMode {
    /// Variant A: intrinsic + radial distortion + extrinsic, 9 residuals.
    Full,
    /// Variant B: intrinsic + extrinsic, distortion frozen, 4 residuals.
    IntrinsicExtrinsic,
    /// Variant C: extrinsic only, intrinsics frozen, 2 residuals.
    ExtrinsicOnly,
    /// Variant D: object pose only, camera fully frozen, 2 residuals.
    #[default]
    PoseOnly,
}

impl OptimizationMode {
    /// Resolves the `(optimizeIntrinsic, optimizeRadial, optimizeExtrinsic)`
    /// triple from SPEC_FULL §4.2 into a variant, rejecting the one
    /// combination the original left undefined.
    pub fn resolve(
        optimize_intrinsic: bool,
        optimize_radial: bool,
        optimize_extrinsic: bool,
    ) -> Result<Self> {
        use OptimizationMode::*;
        match (optimize_intrinsic, optimize_extrinsic, optimize_radial) {
            (true, false, _) => Err(Error::UnsupportedMode),
            (true, true, true) => Ok(Full),
            (true, true, false) => Ok(IntrinsicExtrinsic),
            (false, true, _) => Ok(ExtrinsicOnly),
            (false, false, _) => Ok(PoseOnly),
        }
    }

    /// Number of residuals one observation contributes under this variant.
    pub fn residual_dim(self) -> usize {
        use OptimizationMode::*;
        match self {
            Full => 9,
            IntrinsicExtrinsic => 4,
            ExtrinsicOnly | PoseOnly => 2,
        }
    }

    /// Number of free scalars one observation's residual depends on, laid
    /// out `[object_rotation(3), object_translation(3), camera_rotation(3),
    /// camera_translation(3), focal(2), principal(2), distortion(5)]`,
    /// truncated to whichever prefix this variant frees.
    pub fn free_param_count(self) -> usize {
        use OptimizationMode::*;
        match self {
            Full => 21,
            IntrinsicExtrinsic => 16,
            ExtrinsicOnly => 12,
            PoseOnly => 6,
        }
    }

    pub fn optimizes_extrinsic(self) -> bool {
        !matches!(self, OptimizationMode::PoseOnly)
    }

    pub fn optimizes_intrinsic(self) -> bool {
        matches!(
            self,
            OptimizationMode::Full | OptimizationMode::IntrinsicExtrinsic
        )
    }

    pub fn optimizes_distortion(self) -> bool {
        matches!(self, OptimizationMode::Full)
    }
}

/// Variant A: 2 reprojection residuals, 5 distortion-shrinkage priors, 2
/// principal-point-centering priors.
#[allow(clippy::too_many_arguments)]
pub fn residual_full<D: DualNum<f64> + Copy>(
    object_rotation: [D; 3],
    object_translation: [D; 3],
    camera_rotation: [D; 3],
    camera_translation: [D; 3],
    focal: [D; 2],
    principal: [D; 2],
    distortion: [D; 5],
    point: [D; 3],
    observed: (f64, f64),
    width: f64,
    height: f64,
) -> [D; 9] {
    let [u_hat, v_hat] = project(
        object_rotation,
        object_translation,
        camera_rotation,
        camera_translation,
        focal,
        principal,
        distortion,
        point,
    );
    let [k1, k2, p1, p2, k3] = distortion;
    let [cx, cy] = principal;
    [
        u_hat - D::from_re(observed.0),
        v_hat - D::from_re(observed.1),
        k1 * D::from_re(0.1),
        k2 * D::from_re(0.5),
        p1 * D::from_re(0.1),
        p2 * D::from_re(0.1),
        k3 * D::from_re(1.0),
        (D::from_re(width / 2.0) - cx) * D::from_re(0.001),
        (D::from_re(height / 2.0) - cy) * D::from_re(0.001),
    ]
}

/// Variant B: 2 reprojection residuals, 2 principal-point-centering priors.
/// Distortion is passed in already baked (not differentiated).
#[allow(clippy::too_many_arguments)]
pub fn residual_intrinsic_extrinsic<D: DualNum<f64> + Copy>(
    object_rotation: [D; 3],
    object_translation: [D; 3],
    camera_rotation: [D; 3],
    camera_translation: [D; 3],
    focal: [D; 2],
    principal: [D; 2],
    distortion: [D; 5],
    point: [D; 3],
    observed: (f64, f64),
    width: f64,
    height: f64,
) -> [D; 4] {
    let [u_hat, v_hat] = project(
        object_rotation,
        object_translation,
        camera_rotation,
        camera_translation,
        focal,
        principal,
        distortion,
        point,
    );
    let [cx, cy] = principal;
    [
        u_hat - D::from_re(observed.0),
        v_hat - D::from_re(observed.1),
        (D::from_re(width / 2.0) - cx) * D::from_re(0.001),
        (D::from_re(height / 2.0) - cy) * D::from_re(0.001),
    ]
}

/// Variants C and D: 2 reprojection residuals only. Whether camera
/// extrinsics are free (C) or baked (D) is decided by the caller, not by
/// this function — it only ever sees concrete scalar values.
#[allow(clippy::too_many_arguments)]
pub fn residual_reprojection_only<D: DualNum<f64> + Copy>(
    object_rotation: [D; 3],
    object_translation: [D; 3],
    camera_rotation: [D; 3],
    camera_translation: [D; 3],
    focal: [D; 2],
    principal: [D; 2],
    distortion: [D; 5],
    point: [D; 3],
    observed: (f64, f64),
) -> [D; 2] {
    let [u_hat, v_hat] = project(
        object_rotation,
        object_translation,
        camera_rotation,
        camera_translation,
        focal,
        principal,
        distortion,
        point,
    );
    [u_hat - D::from_re(observed.0), v_hat - D::from_re(observed.1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_intrinsic_without_extrinsic() {
        assert!(matches!(
            OptimizationMode::resolve(true, true, false),
            Err(Error::UnsupportedMode)
        ));
    }

    #[test]
    fn resolves_all_four_supported_combinations() {
        assert_eq!(
            OptimizationMode::resolve(true, true, true).unwrap(),
            OptimizationMode::Full
        );
        assert_eq!(
            OptimizationMode::resolve(true, false, true).unwrap(),
            OptimizationMode::IntrinsicExtrinsic
        );
        assert_eq!(
            OptimizationMode::resolve(false, true, true).unwrap(),
            OptimizationMode::ExtrinsicOnly
        );
        assert_eq!(
            OptimizationMode::resolve(false, false, true).unwrap(),
            OptimizationMode::ExtrinsicOnly
        );
        assert_eq!(
            OptimizationMode::resolve(false, false, false).unwrap(),
            OptimizationMode::PoseOnly
        );
    }

    #[test]
    fn dims_match_spec_table() {
        assert_eq!(OptimizationMode::Full.residual_dim(), 9);
        assert_eq!(OptimizationMode::IntrinsicExtrinsic.residual_dim(), 4);
        assert_eq!(OptimizationMode::ExtrinsicOnly.residual_dim(), 2);
        assert_eq!(OptimizationMode::PoseOnly.residual_dim(), 2);
        assert_eq!(OptimizationMode::Full.free_param_count(), 21);
        assert_eq!(OptimizationMode::IntrinsicExtrinsic.free_param_count(), 16);
        assert_eq!(OptimizationMode::ExtrinsicOnly.free_param_count(), 12);
        assert_eq!(OptimizationMode::PoseOnly.free_param_count(), 6);
    }
}

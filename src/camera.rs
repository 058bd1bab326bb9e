//! Pinhole camera model, Brown-Conrady distortion, and the projection kernel
//! shared by all four residual variants.
//!
//! The projection kernel is written once, generic over a scalar type
//! implementing [`num_dual::DualNum`]. Calling it with `f64` evaluates plain
//! residuals; calling it with a dual-number type evaluates residuals and
//! Jacobian columns in the same pass. See `residual.rs`.

use num_dual::DualNum;
use serde::{Deserialize, Serialize};

/// One camera's full parameter set, as stored in the Parameter Store.
///
/// `width`/`height` are immutable and only ever used as a principal-point
/// centering prior (Variant A/B).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub width: f64,
    pub height: f64,
}

impl Camera {
    /// Parses the 17-scalar `fx, fy, cx, cy, k1, k2, p1, p2, k3, rx, ry, rz,
    /// tx, ty, tz, width, height` layout from the input document.
    pub fn from_scalars(s: &[f64; 17]) -> Self {
        Camera {
            fx: s[0],
            fy: s[1],
            cx: s[2],
            cy: s[3],
            k1: s[4],
            k2: s[5],
            p1: s[6],
            p2: s[7],
            k3: s[8],
            rx: s[9],
            ry: s[10],
            rz: s[11],
            tx: s[12],
            ty: s[13],
            tz: s[14],
            width: s[15],
            height: s[16],
        }
    }

    /// The 15-scalar output layout (no width/height).
    pub fn to_output_scalars(&self) -> [f64; 15] {
        [
            self.fx, self.fy, self.cx, self.cy, self.k1, self.k2, self.p1, self.p2, self.k3,
            self.rx, self.ry, self.rz, self.tx, self.ty, self.tz,
        ]
    }

    pub fn focal(&self) -> [f64; 2] {
        [self.fx, self.fy]
    }

    pub fn principal(&self) -> [f64; 2] {
        [self.cx, self.cy]
    }

    pub fn distortion(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn rotation(&self) -> [f64; 3] {
        [self.rx, self.ry, self.rz]
    }

    pub fn translation(&self) -> [f64; 3] {
        [self.tx, self.ty, self.tz]
    }

    /// Overwrite the intrinsic fields from another camera, used to broadcast
    /// camera 0's solved intrinsics to every camera in shared-intrinsics mode.
    pub fn adopt_intrinsics_from(&mut self, source: &Camera) {
        self.fx = source.fx;
        self.fy = source.fy;
        self.cx = source.cx;
        self.cy = source.cy;
        self.k1 = source.k1;
        self.k2 = source.k2;
        self.p1 = source.p1;
        self.p2 = source.p2;
        self.k3 = source.k3;
    }
}

/// Rotates `p` by the Rodrigues vector `axis_angle` (direction = axis,
/// magnitude = angle in radians), via the closed-form rotation formula
///
/// `v' = v + sinc(θ)(r × v) + cosc(θ)(r × (r × v))`
///
/// with `sinc(θ) = sin(θ)/θ`, `cosc(θ) = (1 - cos θ)/θ²`. Both are smooth at
/// θ = 0 in the limit (sinc → 1, cosc → ½) but evaluate to `0/0` if computed
/// directly there, so near-zero rotations take a small-angle branch instead
/// — the same split `ceres::AngleAxisRotatePoint` uses. An identity or
/// near-identity pose (a reference camera, an object at the world origin) is
/// routine input, not a degenerate case.
const SMALL_ANGLE_THETA2: f64 = 1e-8;

pub fn rotate_axis_angle<D: DualNum<f64> + Copy>(axis_angle: [D; 3], p: [D; 3]) -> [D; 3] {
    let [rx, ry, rz] = axis_angle;
    let theta2 = rx * rx + ry * ry + rz * rz;

    let r_cross_p = [
        ry * p[2] - rz * p[1],
        rz * p[0] - rx * p[2],
        rx * p[1] - ry * p[0],
    ];
    let r_dot_p = rx * p[0] + ry * p[1] + rz * p[2];

    if theta2.re() < SMALL_ANGLE_THETA2 {
        let half = D::from(0.5);
        return [
            p[0] + r_cross_p[0] + half * (r_dot_p * rx - theta2 * p[0]),
            p[1] + r_cross_p[1] + half * (r_dot_p * ry - theta2 * p[1]),
            p[2] + r_cross_p[2] + half * (r_dot_p * rz - theta2 * p[2]),
        ];
    }

    let theta = theta2.sqrt();
    let sinc = theta.sin() / theta;
    let cosc = (D::one() - theta.cos()) / theta2;

    [
        p[0] + sinc * r_cross_p[0] + cosc * (r_dot_p * rx - theta2 * p[0]),
        p[1] + sinc * r_cross_p[1] + cosc * (r_dot_p * ry - theta2 * p[1]),
        p[2] + sinc * r_cross_p[2] + cosc * (r_dot_p * rz - theta2 * p[2]),
    ]
}

/// The projection kernel common to all four residual variants (SPEC_FULL §4.1).
///
/// Composes the object pose then the camera pose, perspective-divides,
/// applies the 5-coefficient Brown-Conrady distortion, and returns the
/// predicted pixel coordinates `(u_hat, v_hat)`.
#[allow(clippy::too_many_arguments)]
pub fn project<D: DualNum<f64> + Copy>(
    object_rotation: [D; 3],
    object_translation: [D; 3],
    camera_rotation: [D; 3],
    camera_translation: [D; 3],
    focal: [D; 2],
    principal: [D; 2],
    distortion: [D; 5],
    point: [D; 3],
) -> [D; 2] {
    let p_world = {
        let rotated = rotate_axis_angle(object_rotation, point);
        [
            rotated[0] + object_translation[0],
            rotated[1] + object_translation[1],
            rotated[2] + object_translation[2],
        ]
    };
    let p_cam = {
        let rotated = rotate_axis_angle(camera_rotation, p_world);
        [
            rotated[0] + camera_translation[0],
            rotated[1] + camera_translation[1],
            rotated[2] + camera_translation[2],
        ]
    };

    let x = p_cam[0] / p_cam[2];
    let y = p_cam[1] / p_cam[2];

    let [k1, k2, p1, p2, k3] = distortion;
    let r2 = x * x + y * y;
    let radial = D::one() + r2 * (k1 + r2 * (k2 + r2 * k3));
    let dx = (p1 * x * y) * D::from(2.0) + p2 * (r2 + x * x * D::from(2.0));
    let dy = (p2 * x * y) * D::from(2.0) + p1 * (r2 + y * y * D::from(2.0));

    let [fx, fy] = focal;
    let [cx, cy] = principal;
    [
        fx * (x * radial + dx) + cx,
        fy * (y * radial + dy) + cy,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn projection_round_trip_no_distortion_centered_principal_point() {
        let object_rotation = [0.0_f64, 0.0, 0.0];
        let object_translation = [0.0_f64, 0.0, 0.0];
        // An arbitrary, non-degenerate camera pose.
        let camera_rotation = [0.1_f64, -0.2, 0.05];
        let camera_translation = [0.3_f64, -0.1, 2.0];
        let focal = [800.0_f64, 810.0];
        let width = 640.0_f64;
        let height = 480.0_f64;
        let principal = [width / 2.0, height / 2.0];
        let distortion = [0.0_f64; 5];
        let point = [0.05_f64, -0.02, 0.01];

        let [u, v] = project(
            object_rotation,
            object_translation,
            camera_rotation,
            camera_translation,
            focal,
            principal,
            distortion,
            point,
        );

        let p_cam = {
            let rotated = rotate_axis_angle(camera_rotation, point);
            [
                rotated[0] + camera_translation[0],
                rotated[1] + camera_translation[1],
                rotated[2] + camera_translation[2],
            ]
        };
        let expected_u = focal[0] * p_cam[0] / p_cam[2] + principal[0];
        let expected_v = focal[1] * p_cam[1] / p_cam[2] + principal[1];

        assert_relative_eq!(u, expected_u, max_relative = 1e-10);
        assert_relative_eq!(v, expected_v, max_relative = 1e-10);
    }

    #[test]
    fn rotation_by_zero_angle_plus_epsilon_is_near_identity() {
        let axis_angle = [1e-6_f64, 0.0, 0.0];
        let p = [1.0_f64, 2.0, 3.0];
        let rotated = rotate_axis_angle(axis_angle, p);
        assert_relative_eq!(rotated[0], p[0], epsilon = 1e-5);
        assert_relative_eq!(rotated[1], p[1], epsilon = 1e-5);
        assert_relative_eq!(rotated[2], p[2], epsilon = 1e-5);
    }

    #[test]
    fn exact_zero_rotation_is_identity_without_producing_nan() {
        let axis_angle = [0.0_f64, 0.0, 0.0];
        let p = [1.0_f64, 2.0, 3.0];
        let rotated = rotate_axis_angle(axis_angle, p);
        assert!(rotated.iter().all(|c| c.is_finite()));
        assert_eq!(rotated, p);
    }

    #[test]
    fn projection_round_trip_holds_at_identity_object_and_camera_rotation() {
        let object_rotation = [0.0_f64, 0.0, 0.0];
        let object_translation = [0.0_f64, 0.0, 0.0];
        let camera_rotation = [0.0_f64, 0.0, 0.0];
        let camera_translation = [0.0_f64, 0.0, 2.0];
        let focal = [800.0_f64, 810.0];
        let principal = [320.0_f64, 240.0];
        let distortion = [0.0_f64; 5];
        let point = [0.05_f64, -0.02, 0.01];

        let [u, v] = project(
            object_rotation,
            object_translation,
            camera_rotation,
            camera_translation,
            focal,
            principal,
            distortion,
            point,
        );

        assert!(u.is_finite() && v.is_finite());
        let expected_u = focal[0] * point[0] / (point[2] + camera_translation[2]) + principal[0];
        let expected_v = focal[1] * point[1] / (point[2] + camera_translation[2]) + principal[1];
        assert_relative_eq!(u, expected_u, max_relative = 1e-10);
        assert_relative_eq!(v, expected_v, max_relative = 1e-10);
    }
}

//! # Riemann helical fit
//!
//! Algebraic helix fit of the hits of one segment candidate, in three stages that are chained
//! by [`helical_fit::riemann_helical_fit`]:
//!
//! 1. **Circle fit** ([`circle_fit`]) – the transverse positions `(x, y)` are lifted onto the
//!    paraboloid `w = x² + y²`. Points of a circle map onto a plane of that space, so fitting
//!    the circle reduces to finding the plane normal that minimizes the weighted quadratic
//!    form of the lifted points: the eigenvector of the smallest eigenvalue of their `3×3`
//!    moment matrix.
//! 2. **Line fit** ([`line_fit`]) – each measurement is projected on the fitted circle and the
//!    arc length from the first point is regressed against `z` to obtain `tan λ` and the
//!    vertex position.
//! 3. **Covariance update** ([`covariance`]) – the radial and azimuthal measurement
//!    covariances are rebuilt from the new trajectory, including multiple scattering in the
//!    chamber material and the non-normal incidence on the wire planes.
//!
//! The sign of the curvature is estimated in between by [`charge::estimate_charge`].
//!
//! ## Fit state
//!
//! Every stage is a pure function returning a new value ([`CircleFit`], [`LineFit`],
//! [`TrajectoryUpdate`]); nothing is carried between calls. The refinement loop threads these
//! values explicitly, which also makes every stage testable on its own.
//!
//! ## Point layout
//!
//! A fit over `n` hits works on `n + 1` points: the hits, ordered as in the segment (most
//! downstream first), followed by a synthetic point on the beam line at the target position
//! with variance [`BEAM_VARIANCE`](crate::constants::BEAM_VARIANCE).

pub mod charge;
pub mod circle_fit;
pub mod covariance;
pub mod helical_fit;
pub mod line_fit;

use std::fmt;

use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::{
    constants::{Centimeter, Radian},
    hits::Pseudopoint,
};

/// Result of the circle fit.
///
/// Fields
/// -----------------
/// * `normal`: unit normal `N` of the plane fitted in `(x, y, x² + y²)` space.
/// * `dist_to_origin`: signed distance `c` of the plane to the origin, `N·p + c = 0`.
/// * `xc`, `yc`, `rc`: center and radius of the projected circle (cm).
/// * `xavg`: weighted mean of the lifted points.
/// * `var_avg`: inverse of the total weight.
/// * `var_normal`: covariance of `N`. It is never estimated and stays zero; the covariance
///   propagation consumes it anyway.
/// * `chisq`: the minimized quadratic form (smallest eigenvalue of the moment matrix).
#[derive(Debug, Clone, PartialEq)]
pub struct CircleFit {
    pub normal: Vector3<f64>,
    pub dist_to_origin: f64,
    pub xc: Centimeter,
    pub yc: Centimeter,
    pub rc: Centimeter,
    pub xavg: Vector3<f64>,
    pub var_avg: f64,
    pub var_normal: Matrix3<f64>,
    pub chisq: f64,
}

impl CircleFit {
    /// Plane representation of a known circle, with zero uncertainty.
    ///
    /// Useful to seed the line fit or the covariance propagation with an exact trajectory.
    pub fn from_circle(xc: Centimeter, yc: Centimeter, rc: Centimeter) -> Self {
        // N ∝ (-2 xc, -2 yc, 1), c ∝ xc² + yc² - rc²
        let raw = Vector3::new(-2.0 * xc, -2.0 * yc, 1.0);
        let norm = raw.norm();
        CircleFit {
            normal: raw / norm,
            dist_to_origin: (xc * xc + yc * yc - rc * rc) / norm,
            xc,
            yc,
            rc,
            xavg: Vector3::zeros(),
            var_avg: 0.0,
            var_normal: Matrix3::zeros(),
            chisq: 0.0,
        }
    }
}

/// Result of the line fit.
///
/// Fields
/// -----------------
/// * `tanl`: tangent of the dip angle.
/// * `z0`: `z` at zero arc length from the first point, as found by the regression.
/// * `zvertex`: `z` extrapolated to the arc length of the beam-line point.
/// * `var_tanl`: variance of `tanl`.
/// * `projected`: the measurements moved onto the fitted circle, keeping their `z`.
#[derive(Debug, Clone, PartialEq)]
pub struct LineFit {
    pub tanl: f64,
    pub z0: Centimeter,
    pub zvertex: Centimeter,
    pub var_tanl: f64,
    pub projected: Vec<Vector3<Centimeter>>,
}

/// Radial (`CR`) and azimuthal (`CRPhi`) measurement covariances of the `n + 1` fit points.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementCovariance {
    pub cr: DMatrix<f64>,
    pub crphi: DMatrix<f64>,
}

impl MeasurementCovariance {
    /// Diagonal covariances built from the `(x, y)` covariances of the hits, followed by the
    /// beam-line point with variance `beam_variance` in both projections.
    pub fn from_hits(hits: &[Pseudopoint], beam_variance: f64) -> Self {
        let n = hits.len() + 1;
        let mut cr = DMatrix::zeros(n, n);
        let mut crphi = DMatrix::zeros(n, n);
        for (m, hit) in hits.iter().enumerate() {
            let phi = hit.y.atan2(hit.x);
            let (sinp, cosp) = phi.sin_cos();
            let drphi_dx = phi * cosp - sinp;
            let drphi_dy = phi * sinp + cosp;
            let cov = &hit.cov;
            crphi[(m, m)] = drphi_dx * drphi_dx * cov[(0, 0)]
                + drphi_dy * drphi_dy * cov[(1, 1)]
                + 2.0 * drphi_dy * drphi_dx * cov[(1, 0)];
            cr[(m, m)] = cosp * cosp * cov[(0, 0)]
                + sinp * sinp * cov[(1, 1)]
                + 2.0 * sinp * cosp * cov[(1, 0)];
        }
        cr[(n - 1, n - 1)] = beam_variance;
        crphi[(n - 1, n - 1)] = beam_variance;
        MeasurementCovariance { cr, crphi }
    }
}

/// Positions predicted along the helix, the reference azimuth and the rebuilt covariances.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryUpdate {
    /// Azimuth of the reference plane's point around the circle center
    pub phi1: Radian,
    pub predicted: Vec<Vector3<Centimeter>>,
    pub cov: MeasurementCovariance,
}

/// Per-hit outcome of a fit.
///
/// Fields
/// -----------------
/// * `hit_id`: position of the hit in its segment.
/// * `dx`, `dy`: predicted minus measured position (cm).
/// * `s`: path length from the vertex (cm).
/// * `chi2`: contribution of the hit to the segment χ².
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackResidual {
    pub hit_id: usize,
    pub dx: Centimeter,
    pub dy: Centimeter,
    pub s: Centimeter,
    pub chi2: f64,
}

/// Complete outcome of [`helical_fit::riemann_helical_fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct HelicalFit {
    pub circle: CircleFit,
    pub line: LineFit,
    /// Estimated sign of the curvature, `±1`
    pub charge: f64,
    pub ref_plane: usize,
    pub update: TrajectoryUpdate,
    pub residuals: Vec<TrackResidual>,
    pub chisq: f64,
}

impl HelicalFit {
    /// Transverse position of the helix at `z`, measured from the reference plane at `z_ref`.
    pub fn position_at(&self, z: Centimeter, z_ref: Centimeter) -> (Centimeter, Centimeter) {
        helix_position(
            &self.circle,
            self.update.phi1,
            self.charge,
            self.line.tanl,
            z - z_ref,
        )
    }
}

/// Point of the circle reached after moving `dz` along the helix from the reference azimuth.
pub(crate) fn helix_position(
    circle: &CircleFit,
    phi1: Radian,
    charge: f64,
    tanl: f64,
    dz: Centimeter,
) -> (Centimeter, Centimeter) {
    let sperp = charge * dz / tanl;
    let (sinp, cosp) = (phi1 + sperp / circle.rc).sin_cos();
    (circle.xc + circle.rc * cosp, circle.yc + circle.rc * sinp)
}

impl fmt::Display for CircleFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "circle: center = ({:.4}, {:.4}) cm, radius = {:.4} cm, N = ({:.6}, {:.6}, {:.6})",
            self.xc, self.yc, self.rc, self.normal.x, self.normal.y, self.normal.z
        )
    }
}

#[cfg(test)]
mod riemann_mod_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plane_of_known_circle() {
        let circle = CircleFit::from_circle(30.0, -40.0, 50.0);
        // Points of the circle satisfy N·(x, y, x²+y²) + c = 0.
        for t in [0.0_f64, 0.7, 2.0, 4.5] {
            let x = 30.0 + 50.0 * t.cos();
            let y = -40.0 + 50.0 * t.sin();
            let p = Vector3::new(x, y, x * x + y * y);
            assert_relative_eq!(
                circle.normal.dot(&p) + circle.dist_to_origin,
                0.0,
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn test_helix_position_follows_charge() {
        let circle = CircleFit::from_circle(0.0, 10.0, 10.0);
        let phi1 = -std::f64::consts::FRAC_PI_2;
        // At the reference plane the helix sits at the origin.
        let (x, y) = helix_position(&circle, phi1, 1.0, 1.0, 0.0);
        assert_relative_eq!(x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(y, 0.0, epsilon = 1e-12);
        // Positive charge turns counter-clockwise around the center.
        let (x, _) = helix_position(&circle, phi1, 1.0, 1.0, 1.0);
        assert!(x > 0.0);
        let (x, _) = helix_position(&circle, phi1, -1.0, 1.0, 1.0);
        assert!(x < 0.0);
    }
}

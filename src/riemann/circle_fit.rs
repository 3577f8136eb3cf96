//! Circle fit on the Riemann paraboloid.
//!
//! The plane `N·(x, y, x² + y²) + c = 0` minimizing
//!
//! ```text
//! λ = Nᵀ (Xᵀ W X − W_sum · X̄ᵀ X̄) N
//! ```
//!
//! is given by the eigenvector of the smallest eigenvalue of the `3×3` moment matrix `A`
//! between the parentheses. `W` is the inverse of the `RΦ` covariance of the points and
//! `W_sum` the sum of its elements. The characteristic polynomial `λ³ + B2·λ² + B1·λ + B0`
//! must have three real roots; the eigenpair itself comes from a symmetric eigen-decomposition.

use nalgebra::{DMatrix, DVector, Matrix3, Vector3};

use crate::{
    fdc_errors::FdcError,
    numeric::{cubic_roots, smallest_eigenpair, try_invert},
    riemann::CircleFit,
};

/// Relative tolerance below which a negative eigenvalue is considered rounding noise.
const EIGENVALUE_TOLERANCE: f64 = 1e-10;

/// Smallest admissible `|N₂|`; below it the points lie on a straight line.
const MIN_NORMAL_W: f64 = 1e-12;

/// Fit a circle through the transverse projection of `points`.
///
/// Arguments
/// -----------------
/// * `points`: the fit points (hits followed by the beam-line point); only `x` and `y` are used.
/// * `crphi`: the `RΦ` covariance of the points, `n × n`.
///
/// Return
/// ----------
/// * The fitted [`CircleFit`], or
///   - [`FdcError::InsufficientHits`] with fewer than three points,
///   - [`FdcError::SingularMatrix`] if `crphi` cannot be inverted,
///   - [`FdcError::ValueOutOfRange`] if the characteristic polynomial has no three real roots,
///     if the smallest eigenvalue is significantly negative, or if the plane does not cut the
///     paraboloid,
///   - [`FdcError::DegenerateEigenvector`] if no finite normal can be computed.
pub fn riemann_circle_fit(
    points: &[Vector3<f64>],
    crphi: &DMatrix<f64>,
) -> Result<CircleFit, FdcError> {
    let n = points.len();
    if n < 3 {
        return Err(FdcError::InsufficientHits {
            found: n,
            required: 3,
        });
    }
    if crphi.nrows() != n || crphi.ncols() != n {
        return Err(FdcError::ValueOutOfRange(format!(
            "RPhi covariance is {}x{} for {} points",
            crphi.nrows(),
            crphi.ncols(),
            n
        )));
    }

    let x = DMatrix::from_fn(n, 3, |i, j| match j {
        0 => points[i].x,
        1 => points[i].y,
        _ => points[i].x * points[i].x + points[i].y * points[i].y,
    });

    let w = try_invert(crphi)?;
    let ones = DVector::from_element(n, 1.0);
    let w_ones = &w * &ones;
    let w_sum = ones.dot(&w_ones);
    if !(w_sum > 0.0) || !w_sum.is_finite() {
        return Err(FdcError::SingularMatrix);
    }

    let xavg_dyn = x.transpose() * &w_ones / w_sum;
    let xavg = Vector3::new(xavg_dyn[0], xavg_dyn[1], xavg_dyn[2]);
    let xtwx = x.transpose() * (&w * &x);
    let a = Matrix3::from_fn(|i, j| xtwx[(i, j)] - w_sum * xavg[i] * xavg[j]);

    let (lambda, normal) = plane_normal(&a)?;

    let dist_to_origin = -normal.dot(&xavg);
    if normal.z.abs() < MIN_NORMAL_W {
        return Err(FdcError::ValueOutOfRange(
            "plane normal has no paraboloid component (straight track)".into(),
        ));
    }
    let radicand = 1.0 - normal.z * normal.z - 4.0 * dist_to_origin * normal.z;
    if radicand < 0.0 {
        return Err(FdcError::ValueOutOfRange(format!(
            "fitted plane does not cut the paraboloid (radicand {radicand:e})"
        )));
    }

    Ok(CircleFit {
        normal,
        dist_to_origin,
        xc: -normal.x / (2.0 * normal.z),
        yc: -normal.y / (2.0 * normal.z),
        rc: radicand.sqrt() / (2.0 * normal.z.abs()),
        xavg,
        var_avg: 1.0 / w_sum,
        var_normal: Matrix3::zeros(),
        chisq: lambda,
    })
}

/// Smallest eigenvalue of the symmetric moment matrix and its unit eigenvector.
///
/// The closed-form roots of the characteristic polynomial decide whether the moment matrix has
/// a valid configuration of three real eigenvalues. They are not precise enough to define the
/// plane: for noise-free points the smallest root sits far above the true, near-zero eigenvalue.
/// The pair itself comes from the symmetric eigen-decomposition, and the returned eigenvalue is
/// the Rayleigh quotient of the normal.
fn plane_normal(a: &Matrix3<f64>) -> Result<(f64, Vector3<f64>), FdcError> {
    let b2 = -a.trace();
    let b1 = a[(0, 0)] * a[(1, 1)] - a[(1, 0)] * a[(0, 1)] + a[(0, 0)] * a[(2, 2)]
        - a[(2, 0)] * a[(0, 2)]
        + a[(1, 1)] * a[(2, 2)]
        - a[(2, 1)] * a[(1, 2)];
    let b0 = -a.determinant();
    let roots = cubic_roots(b2, b1, b0)?;

    let (lambda, normal) = smallest_eigenpair(a)?;
    let scale = roots.iter().fold(a.norm(), |acc, r| acc.max(r.abs()));
    if !lambda.is_finite() || lambda < -EIGENVALUE_TOLERANCE * scale {
        return Err(FdcError::ValueOutOfRange(format!(
            "smallest eigenvalue {lambda:e} of the moment matrix is negative"
        )));
    }
    Ok((lambda.max(0.0), normal))
}

#[cfg(test)]
mod circle_fit_tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Points of a circle through the origin, plus the origin itself as beam-line point.
    fn circle_points(xc: f64, yc: f64, angles: &[f64]) -> Vec<Vector3<f64>> {
        let rc = (xc * xc + yc * yc).sqrt();
        let mut pts: Vec<Vector3<f64>> = angles
            .iter()
            .map(|t| Vector3::new(xc + rc * t.cos(), yc + rc * t.sin(), 0.0))
            .collect();
        pts.push(Vector3::new(0.0, 0.0, 65.0));
        pts
    }

    #[test]
    fn test_exact_circle_is_recovered() {
        let (xc, yc): (f64, f64) = (30.0, 40.0);
        let origin_angle = (-yc).atan2(-xc);
        let angles: Vec<f64> = (1..=6).map(|k| origin_angle + 0.08 * k as f64).collect();
        let pts = circle_points(xc, yc, &angles);
        let crphi = DMatrix::from_diagonal_element(pts.len(), pts.len(), 4e-4);

        let fit = riemann_circle_fit(&pts, &crphi).unwrap();
        assert_relative_eq!(fit.xc, xc, max_relative = 1e-6);
        assert_relative_eq!(fit.yc, yc, max_relative = 1e-6);
        assert_relative_eq!(fit.rc, 50.0, max_relative = 1e-6);
        assert!(fit.chisq.abs() < 1e-6, "chisq = {}", fit.chisq);
        assert_eq!(fit.var_normal, Matrix3::zeros());
    }

    #[test]
    fn test_circle_with_weights_still_exact() {
        let (xc, yc): (f64, f64) = (-120.0, 35.0);
        let origin_angle = (-yc).atan2(-xc);
        let angles: Vec<f64> = (1..=5).map(|k| origin_angle - 0.05 * k as f64).collect();
        let pts = circle_points(xc, yc, &angles);
        let n = pts.len();
        let mut crphi = DMatrix::from_diagonal_element(n, n, 1e-3);
        crphi[(0, 0)] = 5e-2;
        crphi[(1, 2)] = 2e-4;
        crphi[(2, 1)] = 2e-4;

        let fit = riemann_circle_fit(&pts, &crphi).unwrap();
        assert_relative_eq!(fit.rc, (xc * xc + yc * yc).sqrt(), max_relative = 1e-6);
        assert_relative_eq!(fit.xc, xc, max_relative = 1e-6);
    }

    #[test]
    fn test_large_circle_short_arc() {
        // Chamber-like geometry: six points over a few cm of arc, far from the beam axis.
        for (xc, yc) in [(-163.3, 75.6), (11.2, -179.65), (127.3, 127.3)] {
            let rc: f64 = f64::hypot(xc, yc);
            let origin_angle = f64::atan2(-yc, -xc);
            for sign in [1.0, -1.0] {
                let angles: Vec<f64> = (0..6)
                    .map(|k| origin_angle + sign * (0.6 + 0.004 * k as f64))
                    .collect();
                let pts = circle_points(xc, yc, &angles);
                let mut crphi = DMatrix::from_diagonal_element(pts.len(), pts.len(), 9e-4);
                crphi[(6, 6)] = 0.1;

                let fit = riemann_circle_fit(&pts, &crphi).unwrap();
                assert_relative_eq!(fit.rc, rc, max_relative = 1e-6);
                assert_relative_eq!(fit.xc, xc, epsilon = 1e-5 * rc);
                assert_relative_eq!(fit.yc, yc, epsilon = 1e-5 * rc);
                assert!(fit.chisq < 1e-4, "chisq = {}", fit.chisq);
            }
        }
    }

    #[test]
    fn test_singular_covariance() {
        let pts = circle_points(30.0, 40.0, &[0.1, 0.2, 0.3, 0.4]);
        let crphi = DMatrix::zeros(pts.len(), pts.len());
        assert_eq!(
            riemann_circle_fit(&pts, &crphi),
            Err(FdcError::SingularMatrix)
        );
    }

    #[test]
    fn test_too_few_points() {
        let pts = vec![Vector3::new(1.0, 0.0, 0.0), Vector3::zeros()];
        let crphi = DMatrix::identity(2, 2);
        assert_eq!(
            riemann_circle_fit(&pts, &crphi),
            Err(FdcError::InsufficientHits {
                found: 2,
                required: 3
            })
        );
    }
}

//! Curvature sign from the azimuth progression along `z`.

use std::f64::consts::PI;

use nalgebra::{DMatrix, Vector3};

/// Estimate the charge sign of a track from its hit positions.
///
/// The azimuth `φ = atan2(y, x)` of every point is unwrapped across `±π` and regressed against
/// `z`, each point weighted by `r² / (CRΦ + φ²·CR)`. The sign of the slope is the charge.
///
/// Arguments
/// -----------------
/// * `points`: hit positions, without the beam-line point.
/// * `cr`, `crphi`: radial and azimuthal covariances; the diagonal entry `k` belongs to
///   `points[k]`.
///
/// Return
/// ----------
/// * `-1.0` for a decreasing azimuth, `+1.0` otherwise (including degenerate inputs).
pub fn estimate_charge(points: &[Vector3<f64>], cr: &DMatrix<f64>, crphi: &DMatrix<f64>) -> f64 {
    let Some(first) = points.first() else {
        return 1.0;
    };
    let mut phi_old = first.y.atan2(first.x);
    let (mut sumv, mut sumx, mut sumy, mut sumxx, mut sumxy) = (0.0, 0.0, 0.0, 0.0, 0.0);

    for (k, p) in points.iter().enumerate() {
        let mut phi = p.y.atan2(p.x);
        if (phi - phi_old).abs() > PI {
            if phi_old < 0.0 {
                phi -= 2.0 * PI;
            } else {
                phi += 2.0 * PI;
            }
        }
        phi_old = phi;

        let r2 = p.x * p.x + p.y * p.y;
        let var = (crphi[(k, k)] + phi * phi * cr[(k, k)]) / r2;
        if !(var > 0.0) || !var.is_finite() {
            continue;
        }
        sumv += 1.0 / var;
        sumy += phi / var;
        sumx += p.z / var;
        sumxx += p.z * p.z / var;
        sumxy += phi * p.z / var;
    }

    let delta = sumv * sumxx - sumx * sumx;
    let slope = (sumv * sumxy - sumy * sumx) / delta;
    if slope < 0.0 {
        -1.0
    } else {
        1.0
    }
}

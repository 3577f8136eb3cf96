//! Arc length versus `z` regression on a fitted circle.
//!
//! Each measurement is first moved onto the circle at constant transverse radius, i.e. to the
//! intersection of the fitted circle with the circle of radius `√(x² + y²)` around the beam
//! axis. The arc length of every projected point, counted from the first one, is then regressed
//! against the plane position with weights `1 / CR(k, k)`.

use nalgebra::{DMatrix, Vector3};

use crate::{
    constants::Centimeter,
    fdc_errors::FdcError,
    riemann::{CircleFit, LineFit},
};

/// Fit `tan λ` and the vertex position of the helix whose transverse projection is `circle`.
///
/// Arguments
/// -----------------
/// * `measured`: the fit points (hits followed by the beam-line point).
/// * `cr`: radial covariance of the points; only its diagonal is used.
/// * `circle`: result of the circle fit.
///
/// Return
/// ----------
/// * The [`LineFit`], whose `projected` field holds the measurements moved onto the circle,
///   or [`FdcError::ValueOutOfRange`] if a weight is not positive, if the plane normal is
///   parallel to the paraboloid axis, or if the regression is degenerate.
pub fn riemann_line_fit(
    measured: &[Vector3<f64>],
    cr: &DMatrix<f64>,
    circle: &CircleFit,
) -> Result<LineFit, FdcError> {
    let n = measured.len();
    if n < 2 || cr.nrows() < n {
        return Err(FdcError::InsufficientHits {
            found: n,
            required: 2,
        });
    }

    let projected = measured
        .iter()
        .map(|p| project_on_circle(p, circle))
        .collect::<Result<Vec<_>, _>>()?;

    let first = projected[0];
    let mut sumv = 0.0;
    let mut sumx = 0.0;
    let mut sumy = 0.0;
    let mut sumxx = 0.0;
    let mut sumxy = 0.0;
    let mut sperp = 0.0;
    for (k, p) in projected.iter().enumerate() {
        let var = cr[(k, k)];
        if !(var > 0.0) {
            return Err(FdcError::ValueOutOfRange(format!(
                "radial variance of point {k} is not positive ({var:e})"
            )));
        }
        sperp = arc_length(first.x, first.y, p.x, p.y, circle.rc);
        sumv += 1.0 / var;
        sumy += sperp / var;
        sumx += p.z / var;
        sumxx += p.z * p.z / var;
        sumxy += sperp * p.z / var;
    }
    let delta = sumv * sumxx - sumx * sumx;

    // z = z0 - tanl * sperp
    let tanl = -delta / (sumv * sumxy - sumy * sumx);
    let z0 = (sumxx * sumy - sumx * sumxy) / delta * tanl;
    if !tanl.is_finite() || !z0.is_finite() {
        return Err(FdcError::ValueOutOfRange(
            "arc length does not vary with z (degenerate line fit)".into(),
        ));
    }

    Ok(LineFit {
        tanl,
        z0,
        zvertex: z0 - sperp * tanl,
        var_tanl: sumv / delta * tanl.powi(4),
        projected,
    })
}

/// Point of the circle at the same transverse radius as `p`, on the branch closest to `p`.
///
/// When the two circles do not intersect (rounding, or a point off the fitted circle) the
/// square root is taken on the absolute value. The `z` coordinate is kept.
fn project_on_circle(p: &Vector3<f64>, circle: &CircleFit) -> Result<Vector3<f64>, FdcError> {
    let nv = &circle.normal;
    let r2 = p.x * p.x + p.y * p.y;
    let denom = nv.x * nv.x + nv.y * nv.y;
    if !(denom > 0.0) {
        return Err(FdcError::ValueOutOfRange(
            "plane normal is parallel to the paraboloid axis".into(),
        ));
    }
    let numer = circle.dist_to_origin + r2 * nv.z;
    let x_int0 = -nv.x * numer / denom;
    let y_int0 = -nv.y * numer / denom;
    // negative only through rounding for points close to the circle
    let temp = (denom * r2 - numer * numer).abs().sqrt() / denom;

    let (x1, y1) = (x_int0 + nv.y * temp, y_int0 - nv.x * temp);
    let (x2, y2) = (x_int0 - nv.y * temp, y_int0 + nv.x * temp);
    let d1 = (x1 - p.x).powi(2) + (y1 - p.y).powi(2);
    let d2 = (x2 - p.x).powi(2) + (y2 - p.y).powi(2);
    Ok(if d1 > d2 {
        Vector3::new(x2, y2, p.z)
    } else {
        Vector3::new(x1, y1, p.z)
    })
}

/// Arc length of the chord between two points of a circle of radius `rc`.
///
/// Chords longer than the diameter (rounding) are taken as half a turn.
pub(crate) fn arc_length(
    x0: Centimeter,
    y0: Centimeter,
    x1: Centimeter,
    y1: Centimeter,
    rc: Centimeter,
) -> Centimeter {
    let chord = ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt();
    let ratio = chord / (2.0 * rc);
    if ratio > 1.0 {
        std::f64::consts::PI * rc
    } else {
        2.0 * rc * ratio.asin()
    }
}

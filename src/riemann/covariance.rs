//! # Covariance propagation
//!
//! After each circle + line fit the measurement covariances are rebuilt from the current
//! trajectory:
//!
//! * the diagonal of `CR` and `CRΦ` is obtained by propagating the uncertainties of the fit
//!   parameters (circle center, entry point, radius, `tan λ`) to every point,
//! * a multiple-scattering block couples the points: the scattering at an intermediate plane
//!   `i` displaces every later point proportionally to its lever arm,
//! * the non-normal incidence on the wire planes mixes the radial covariance into the
//!   azimuthal one: `CRΦ' = C·CRΦ·C + S·CR·S` with `S = R / 4ρ` and `C = √(1 − S²)`.
//!
//! The matrices are rebuilt from scratch on every call, so calling twice with the same
//! trajectory yields the same covariances.
//!
//! ## See also
//!
//! * [`highland_variance`] – shared with the Kalman process noise.

use nalgebra::{DMatrix, Vector3};

use crate::{
    bfield::{momentum_estimate, pion_beta, MagneticField},
    constants::{Material, CHAMBER_MATERIALS, EPS, HIGHLAND_LOG_COEFF, HIGHLAND_SCALE},
    fdc_errors::FdcError,
    riemann::{helix_position, CircleFit, LineFit, MeasurementCovariance, TrajectoryUpdate},
};

/// Rebuild the predicted positions and the `CR` / `CRΦ` covariances from the current fit.
///
/// Arguments
/// -----------------
/// * `circle`: the current circle fit.
/// * `line`: the current line fit; its `projected` points are the working trajectory.
/// * `charge`: estimated curvature sign.
/// * `ref_plane`: index of the point the helix is propagated from.
/// * `cov`: covariances of the previous iteration; only `CR(ref_plane, ref_plane)` is read.
/// * `field`: magnetic field service, queried at every predicted point.
/// * `mass`: mass hypothesis of the particle (GeV/c²).
///
/// Return
/// ----------
/// * A [`TrajectoryUpdate`] holding `Φ₁`, the helix positions at the plane of every point and
///   the rebuilt covariances, or [`FdcError::ValueOutOfRange`] if the inputs are inconsistent
///   or the propagation produces non-finite values.
pub fn update_positions_and_covariance(
    circle: &CircleFit,
    line: &LineFit,
    charge: f64,
    ref_plane: usize,
    cov: &MeasurementCovariance,
    field: &dyn MagneticField,
    mass: f64,
) -> Result<TrajectoryUpdate, FdcError> {
    let xyz = &line.projected;
    let n = xyz.len();
    if ref_plane >= n || cov.cr.nrows() != n || cov.crphi.nrows() != n {
        return Err(FdcError::ValueOutOfRange(format!(
            "reference plane {ref_plane} or covariance size {} inconsistent with {n} points",
            cov.cr.nrows()
        )));
    }

    let (xc, yc, rc) = (circle.xc, circle.yc, circle.rc);
    let tanl = if line.tanl.abs() < EPS {
        EPS.copysign(line.tanl)
    } else {
        line.tanl
    };

    let reference = xyz[ref_plane];
    let delta_x = reference.x - xc;
    let delta_y = reference.y - yc;
    let denom = delta_x * delta_x + delta_y * delta_y;
    let phi1 = delta_y.atan2(delta_x);
    let variances = ParameterVariances::new(
        circle,
        xyz[0],
        reference,
        cov.cr[(ref_plane, ref_plane)],
    )
    .as_array(line.var_tanl);

    let mut cr = DMatrix::zeros(n, n);
    let mut crphi = DMatrix::zeros(n, n);
    let mut predicted = Vec::with_capacity(n);
    let mut s_diag = vec![0.0; n];
    let mut c_diag = vec![1.0; n];

    for (k, p) in xyz.iter().enumerate() {
        let dz = p.z - reference.z;
        let sperp = charge * dz / tanl;
        let phi = p.y.atan2(p.x);
        let (sin_phi, cos_phi) = phi.sin_cos();
        let drphi_dx = phi * cos_phi - sin_phi;
        let drphi_dy = phi * sin_phi + cos_phi;

        let (x, y) = helix_position(circle, phi1, charge, tanl, dz);
        let (sinp, cosp) = (phi1 + sperp / rc).sin_cos();
        predicted.push(Vector3::new(x, y, p.z));

        let dx_drho = cosp + sperp / rc * sinp;
        let dx_dx0 = 1.0 - ratio(rc * sinp * delta_y, denom);
        let dx_dy0 = ratio(rc * sinp * delta_x, denom);
        let dx_dx1 = ratio(rc * sinp * delta_y, denom);
        let dx_dy1 = -ratio(rc * sinp * delta_x, denom);
        let dx_dtanl = sinp * sperp / tanl;

        let dy_drho = sinp - sperp / rc * cosp;
        let dy_dx0 = ratio(rc * cosp * delta_y, denom);
        let dy_dy0 = 1.0 - ratio(rc * cosp * delta_x, denom);
        let dy_dx1 = -ratio(rc * cosp * delta_y, denom);
        let dy_dy1 = ratio(rc * cosp * delta_x, denom);
        let dy_dtanl = -cosp * sperp / tanl;

        let rphi = [
            drphi_dx * dx_dx0 + drphi_dy * dy_dx0,
            drphi_dx * dx_dy0 + drphi_dy * dy_dy0,
            drphi_dx * dx_dx1 + drphi_dy * dy_dx1,
            drphi_dx * dx_dy1 + drphi_dy * dy_dy1,
            drphi_dx * dx_drho + drphi_dy * dy_drho,
            drphi_dx * dx_dtanl + drphi_dy * dy_dtanl,
        ];
        let r = [
            cos_phi * dx_dx0 + sin_phi * dy_dx0,
            cos_phi * dx_dy0 + sin_phi * dy_dy0,
            cos_phi * dx_dx1 + sin_phi * dy_dx1,
            cos_phi * dx_dy1 + sin_phi * dy_dy1,
            cos_phi * dx_drho + sin_phi * dy_drho,
            cos_phi * dx_dtanl + sin_phi * dy_dtanl,
        ];
        crphi[(k, k)] = rphi
            .iter()
            .zip(&variances)
            .map(|(d, v)| d * d * v)
            .sum::<f64>();
        cr[(k, k)] = r.iter().zip(&variances).map(|(d, v)| d * d * v).sum::<f64>();

        let stemp = (x * x + y * y).sqrt() / (4.0 * rc);
        let ctemp = 1.0 - stemp * stemp;
        if ctemp > 0.0 {
            s_diag[k] = stemp;
            c_diag[k] = ctemp.sqrt();
        }
    }

    // The beam-line point is left out: its lever arm is too long for the thin-scatterer
    // approximation.
    let (sinl, cosl) = tanl.atan().sin_cos();
    let sinl = sinl.abs().max(EPS);
    let cosl = cosl.abs().max(EPS);
    let last = n - 1;
    let sigma2: Vec<f64> = predicted[..last]
        .iter()
        .map(|p| process_noise(p, rc, sinl, cosl, field, mass, &CHAMBER_MATERIALS))
        .collect();
    let radius: Vec<f64> = predicted.iter().map(|p| p.x.hypot(p.y)).collect();
    for m in 0..last {
        for k in m..last {
            let mut ms_rphi = 0.0;
            let mut ms_r = 0.0;
            for i in (k + 1)..last {
                let (ri, zi) = (radius[i], predicted[i].z);
                ms_rphi += sigma2[i] * (radius[k] - ri) * (radius[m] - ri) / (cosl * cosl);
                ms_r += sigma2[i] * (predicted[k].z - zi) * (predicted[m].z - zi) / sinl.powi(4);
            }
            crphi[(m, k)] += ms_rphi;
            cr[(m, k)] += ms_r;
            if k != m {
                crphi[(k, m)] += ms_rphi;
                cr[(k, m)] += ms_r;
            }
        }
    }

    let crphi = DMatrix::from_fn(n, n, |i, j| {
        c_diag[i] * crphi[(i, j)] * c_diag[j] + s_diag[i] * cr[(i, j)] * s_diag[j]
    });

    if crphi.iter().chain(cr.iter()).any(|v| !v.is_finite()) {
        return Err(FdcError::ValueOutOfRange(
            "covariance propagation produced non-finite values".into(),
        ));
    }

    Ok(TrajectoryUpdate {
        phi1,
        predicted,
        cov: MeasurementCovariance { cr, crphi },
    })
}

/// Variances of the helix parameters seen by the covariance propagation: circle center
/// `(x0, y0)`, entry point `(x1, y1)`, radius. `tan λ` is appended by [`Self::as_array`].
struct ParameterVariances {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
    r: f64,
}

impl ParameterVariances {
    fn new(circle: &CircleFit, first: Vector3<f64>, reference: Vector3<f64>, var_r1: f64) -> Self {
        let nv = &circle.normal;
        let vn = &circle.var_normal;
        let (n0, n1, n2) = (nv.x, nv.y, nv.z);
        let rc = circle.rc;
        let xavg = &circle.xavg;

        let x0 = (vn[(0, 0)] + n0 * n0 * vn[(2, 2)] / (n2 * n2) - 2.0 * vn[(0, 2)] * n0 / n2)
            / (4.0 * n2 * n2);
        let y0 = (vn[(1, 1)] + n1 * n1 * vn[(2, 2)] / (n2 * n2) - 2.0 * vn[(1, 2)] * n1 / n2)
            / (4.0 * n2 * n2);

        let dr_dn1 = xavg[0] / (2.0 * n2 * rc);
        let dr_dn2 = xavg[1] / (2.0 * n2 * rc);
        let dr_dn3 = -(1.0 + 4.0 * xavg[0] * n0 + 4.0 * xavg[1] * n1) / (4.0 * rc * n2 * n2);
        let r = dr_dn1 * dr_dn1 * vn[(0, 0)]
            + dr_dn2 * dr_dn2 * vn[(1, 1)]
            + dr_dn3 * dr_dn3 * vn[(2, 2)]
            + 2.0 * vn[(0, 1)] * dr_dn1 * dr_dn2
            + 2.0 * vn[(1, 2)] * dr_dn2 * dr_dn3
            + 2.0 * vn[(0, 2)] * dr_dn1 * dr_dn3
            + circle.var_avg / (4.0 * rc * rc * n2 * n2);

        let (dc_dn1, dc_dn2, dc_dn3) = (-xavg[0], -xavg[1], -xavg[2]);
        let r1sq = reference.x * reference.x + reference.y * reference.y;
        let r1 = r1sq.sqrt();
        let cdist = circle.dist_to_origin + r1sq * n2;
        let nt2 = n0 * n0 + n1 * n1;

        let ydenom = first.y * nt2 + n1 * cdist;
        let dy1_dn3 = -ratio((dc_dn3 + r1sq) * (n1 * first.y + cdist), ydenom);
        let dy1_dr1 = -ratio(
            r1 * (2.0 * n1 * n2 * first.y + 2.0 * n2 * cdist - n0 * n0),
            ydenom,
        );
        let dy1_dn2 = ratio(
            first.y * (n1 * n1 - n0 * n0) * cdist - first.y * n1 * nt2 * dc_dn2
                + n1 * cdist * cdist
                - nt2 * cdist * dc_dn2
                - n0 * n0 * n1 * r1sq,
            nt2 * ydenom,
        );
        let y1 = dy1_dr1 * dy1_dr1 * var_r1
            + dy1_dn3 * dy1_dn3 * vn[(2, 2)]
            + dy1_dn2 * dy1_dn2 * vn[(1, 1)]
            + 2.0 * dy1_dn2 * dy1_dn3 * vn[(1, 2)];

        let xdenom = first.x * nt2 + n0 * cdist;
        let dx1_dn3 = -ratio((dc_dn3 + r1sq) * (first.x * n0 + cdist), xdenom);
        let dx1_dr1 = -ratio(
            r1 * (2.0 * n0 * n2 * first.x + 2.0 * n2 * cdist - n1 * n1),
            xdenom,
        );
        let dx1_dn1 = ratio(
            first.x * (n0 * n0 - n1 * n1) * cdist - first.x * n0 * nt2 * dc_dn1
                + n0 * cdist * cdist
                - nt2 * cdist * dc_dn1
                - n0 * n1 * n1 * r1sq,
            nt2 * xdenom,
        );
        let x1 = dx1_dr1 * dx1_dr1 * var_r1
            + dx1_dn3 * dx1_dn3 * vn[(2, 2)]
            + dx1_dn1 * dx1_dn1 * vn[(0, 0)]
            + 2.0 * dx1_dn3 * dx1_dn1 * vn[(0, 2)];

        ParameterVariances { x0, y0, x1, y1, r }
    }

    fn as_array(&self, var_tanl: f64) -> [f64; 6] {
        [self.x0, self.y0, self.x1, self.y1, self.r, var_tanl]
    }
}

/// `num / den`, or zero when the denominator vanishes.
#[inline]
fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Variance of the projected scattering angle after crossing `x_over_x0` radiation lengths
/// (Highland formula).
pub(crate) fn highland_variance(p: f64, beta: f64, x_over_x0: f64) -> f64 {
    let log_term = 1.0 + HIGHLAND_LOG_COEFF * x_over_x0.ln();
    (HIGHLAND_SCALE / (p * beta)).powi(2) * x_over_x0 * log_term * log_term
}

/// Scattering variance of one plane crossing at `point` for a helix of radius `rc`.
///
/// The momentum is estimated from the local field; without a usable estimate (no field)
/// the point contributes no scattering.
fn process_noise(
    point: &Vector3<f64>,
    rc: f64,
    sinl: f64,
    cosl: f64,
    field: &dyn MagneticField,
    mass: f64,
    materials: &[Material],
) -> f64 {
    let b = field.magnitude(point.x, point.y, point.z);
    let p = momentum_estimate(b, rc, cosl);
    if !(p > 0.0) || !p.is_finite() {
        return 0.0;
    }
    let beta = pion_beta(p, mass);
    let material_sum: f64 = materials.iter().map(Material::radiation_lengths).sum();
    highland_variance(p, beta, material_sum / sinl)
}

//! # Sequential helix filter
//!
//! A Kalman filter over the hits of a segment, working on the same helix state vector
//! `(κ, φ₀, D, tanλ, z₀)` as the Riemann fit seeds. It is an alternative to the global fit and
//! is not used by the segment finder itself.
//!
//! ## Helix parametrization
//!
//! With `ρ = 1 / 2κ` the signed radius and `s⊥ = (z − z₀) / tanλ` the transverse path length
//! from the point of closest approach to the pivot (the beam line), the helix is
//!
//! ```text
//! x(z) = −D·sin φ₀ + ρ·cos φ₀·sin 2κs⊥ − ρ·sin φ₀·(1 − cos 2κs⊥)
//! y(z) =  D·cos φ₀ + ρ·sin φ₀·sin 2κs⊥ + ρ·cos φ₀·(1 − cos 2κs⊥)
//! ```
//!
//! and its center is at `(−(D + ρ)·sin φ₀, (D + ρ)·cos φ₀)` from the pivot.
//!
//! ## Building blocks
//!
//! * [`helix_position`] – the trajectory above.
//! * [`translate_state`] / [`transport_matrix`] – the state re-expressed at another pivot, and
//!   its Jacobian.
//! * [`process_noise_covariance`] – multiple scattering in one chamber plane, including the
//!   support material.
//! * [`projection_matrix`] – derivatives of the trajectory with respect to the state.
//! * [`KalmanFilter::filter`] – the sequential update, with per-hit χ².
//!
//! ## See also
//! ------------
//! * [`Segment::state`](crate::segment::Segment::state) – the seed produced by the Riemann fit.

use std::f64::consts::PI;

use log::warn;
use nalgebra::{Matrix2, Matrix2x5, Vector2};

use crate::{
    bfield::{momentum_estimate, pion_beta, MagneticField},
    constants::{
        Centimeter, Material, StateCovariance, StateVector, CHAMBER_MATERIALS_WITH_SUPPORT, EPS,
    },
    fdc_errors::FdcError,
    hits::Pseudopoint,
    riemann::covariance::highland_variance,
    segment::Segment,
};

/// Transverse position of the helix `state` at `z`.
///
/// `κ` and `tanλ` must be non-zero.
pub fn helix_position(state: &StateVector, z: Centimeter) -> (Centimeter, Centimeter) {
    let (kappa, phi, d, tanl, z0) = (state[0], state[1], state[2], state[3], state[4]);
    let rho = 0.5 / kappa;
    let theta = 2.0 * kappa * (z - z0) / tanl;
    let (sinp, cosp) = phi.sin_cos();
    let (sint, cost) = theta.sin_cos();
    (
        -d * sinp + rho * cosp * sint - rho * sinp * (1.0 - cost),
        d * cosp + rho * sinp * sint + rho * cosp * (1.0 - cost),
    )
}

/// Circle center of `state` seen from `to`, the state being expressed at pivot `from`.
fn center_from(
    state: &StateVector,
    from: (Centimeter, Centimeter),
    to: (Centimeter, Centimeter),
) -> (f64, f64) {
    let (kappa, phi, d) = (state[0], state[1], state[2]);
    let u = d + 0.5 / kappa;
    let (sinp, cosp) = phi.sin_cos();
    (from.0 - to.0 - u * sinp, from.1 - to.1 + u * cosp)
}

fn direction_at(kappa: f64, xc: f64, yc: f64) -> f64 {
    let phi = (-xc).atan2(yc);
    if kappa < 0.0 {
        phi + PI
    } else {
        phi
    }
}

/// Wrap an angle difference into `(−π, π]`.
fn wrap(dphi: f64) -> f64 {
    let wrapped = (dphi + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// Re-express `state`, given at pivot `from`, at pivot `to`.
///
/// The curvature and dip are unchanged; `φ₀` and `D` describe the closest approach to the new
/// pivot and `z₀` moves by the helix length between the two closest approaches.
///
/// Arguments
/// -----------------
/// * `state`: helix state at `from`, with `κ ≠ 0`.
/// * `from`, `to`: transverse pivot positions (cm).
///
/// Return
/// ----------
/// * The state at `to`.
///
/// See also
/// ------------
/// * [`transport_matrix`] – Jacobian of this transformation.
pub fn translate_state(
    state: &StateVector,
    from: (Centimeter, Centimeter),
    to: (Centimeter, Centimeter),
) -> StateVector {
    let kappa = state[0];
    let q = kappa.signum();
    let (xc, yc) = center_from(state, from, to);
    let rc = xc.hypot(yc);
    let phi1 = direction_at(kappa, xc, yc);
    let dphi = wrap(phi1 - state[1]);
    StateVector::new(
        kappa,
        state[1] + dphi,
        q * rc - 0.5 / kappa,
        state[3],
        state[4] + state[3] * dphi / 2.0 / kappa,
    )
}

/// Jacobian of [`translate_state`] with respect to the state.
pub fn transport_matrix(
    state: &StateVector,
    from: (Centimeter, Centimeter),
    to: (Centimeter, Centimeter),
) -> StateCovariance {
    let (kappa, phi, d, tanl) = (state[0], state[1], state[2], state[3]);
    let q = kappa.signum();
    let (xc, yc) = center_from(state, from, to);
    let rc2 = xc * xc + yc * yc;
    let rc = rc2.sqrt();
    let dphi = wrap(direction_at(kappa, xc, yc) - phi);
    let u = d + 0.5 / kappa;

    let (sinp, cosp) = phi.sin_cos();
    let a = yc * sinp + xc * cosp;
    let c = yc * cosp - xc * sinp;

    let mut f = StateCovariance::identity();
    f[(1, 0)] = -a / 2.0 / kappa / kappa / rc2;
    f[(1, 1)] = u * c / rc2;
    f[(1, 2)] = a / rc2;
    f[(2, 0)] = (1.0 - q * c / rc) / 2.0 / kappa / kappa;
    f[(2, 1)] = -q * a / rc * u;
    f[(2, 2)] = q * c / rc;
    f[(4, 0)] = tanl / 2.0 / kappa * (f[(1, 0)] - dphi / kappa);
    f[(4, 1)] = tanl / 2.0 / kappa * (f[(1, 1)] - 1.0);
    f[(4, 2)] = tanl / 2.0 / kappa * f[(1, 2)];
    f[(4, 3)] = dphi / 2.0 / kappa;
    f
}

/// Process noise of one plane crossing at `(x, y, z)`.
///
/// The scattering variance is computed with the Highland formula for the chamber stack and its
/// support, traversed at the dip angle of `state`, and distributed on the state parameters.
/// Without a field the momentum is unknown and the noise is zero.
pub fn process_noise_covariance(
    state: &StateVector,
    (x, y, z): (Centimeter, Centimeter, Centimeter),
    field: &dyn MagneticField,
    mass: f64,
) -> StateCovariance {
    let (kappa, phi, d, tanl) = (state[0], state[1], state[2], state[3]);
    let lambda = tanl.atan();
    let cosl = lambda.cos();
    let sinl = lambda.sin().abs().max(EPS);

    let b = field.magnitude(x, y, z);
    let p = momentum_estimate(b, 0.5 / kappa.abs(), cosl);
    if !(p > 0.0) || !p.is_finite() {
        return StateCovariance::zeros();
    }
    let beta = pion_beta(p, mass);
    let material_sum: f64 = CHAMBER_MATERIALS_WITH_SUPPORT
        .iter()
        .map(Material::radiation_lengths)
        .sum();
    let sigma2 = highland_variance(p, beta, material_sum / sinl);

    let tan2phi = phi.tan().powi(2).max(EPS);
    let one_tan2 = 1.0 + tanl * tanl;
    let mut q = StateCovariance::zeros();
    q[(0, 0)] = kappa * kappa * tanl * tanl;
    q[(0, 3)] = kappa * tanl * one_tan2;
    q[(3, 0)] = q[(0, 3)];
    q[(1, 1)] = 1.0 / cosl / cosl;
    q[(2, 2)] = d * d / tan2phi / cosl / cosl;
    q[(3, 3)] = one_tan2 * one_tan2;
    q * sigma2
}

/// Derivatives of [`helix_position`] at `z` with respect to the state.
pub fn projection_matrix(state: &StateVector, z: Centimeter) -> Matrix2x5<f64> {
    let (kappa, phi, d, tanl, z0) = (state[0], state[1], state[2], state[3], state[4]);
    let sperp = (z - z0) / tanl;
    let theta = 2.0 * kappa * sperp;
    let (sinp, cosp) = phi.sin_cos();
    let (sint, cost) = theta.sin_cos();
    let half_k2 = 0.5 / kappa / kappa;
    let rho = 0.5 / kappa;

    // Direction of the track at z
    let tx = cosp * cost - sinp * sint;
    let ty = sinp * cost + cosp * sint;

    let mut h = Matrix2x5::zeros();
    h[(0, 0)] = half_k2 * (cosp * (theta * cost - sint) + sinp * (1.0 - cost - theta * sint));
    h[(1, 0)] = half_k2 * (sinp * (theta * cost - sint) - cosp * (1.0 - cost - theta * sint));
    h[(0, 1)] = -d * cosp - rho * sinp * sint - rho * cosp * (1.0 - cost);
    h[(1, 1)] = -d * sinp + rho * cosp * sint - rho * sinp * (1.0 - cost);
    h[(0, 2)] = -sinp;
    h[(1, 2)] = cosp;
    h[(0, 3)] = -tx * sperp / tanl;
    h[(1, 3)] = -ty * sperp / tanl;
    h[(0, 4)] = -tx / tanl;
    h[(1, 4)] = -ty / tanl;
    h
}

/// Outcome of [`KalmanFilter::filter`].
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanResult {
    pub state: StateVector,
    pub cov: StateCovariance,
    pub chisq: f64,
    /// Hits whose innovation covariance could not be inverted
    pub skipped: usize,
}

/// Sequential filter of the hits of a segment around a seed helix.
pub struct KalmanFilter<'a> {
    field: &'a dyn MagneticField,
    mass: f64,
}

impl<'a> KalmanFilter<'a> {
    pub fn new(field: &'a dyn MagneticField, mass: f64) -> Self {
        KalmanFilter { field, mass }
    }

    /// Filter `hits` starting from `seed`.
    ///
    /// The state is linearized around the seed helix. For every hit the covariance is
    /// transported from the previous plane and inflated by the process noise, the state is
    /// updated with the measured position and the filtered residual is added to the χ².
    /// A hit whose innovation covariance is singular is skipped.
    ///
    /// Arguments
    /// -----------------
    /// * `hits`: measurements, in the order they are filtered.
    /// * `seed`: seed state, with non-zero curvature and dip.
    ///
    /// Return
    /// ----------
    /// * The filtered [`KalmanResult`], or an error for an empty hit list or a degenerate seed.
    pub fn filter(
        &self,
        hits: &[Pseudopoint],
        seed: &StateVector,
    ) -> Result<KalmanResult, FdcError> {
        let Some(first) = hits.first() else {
            return Err(FdcError::InsufficientHits {
                found: 0,
                required: 1,
            });
        };
        if seed[0] == 0.0 || seed[3] == 0.0 || seed.iter().any(|v| !v.is_finite()) {
            return Err(FdcError::ValueOutOfRange(format!(
                "Kalman seed needs a finite helix with non-zero curvature and dip: {:?}",
                seed.as_slice()
            )));
        }

        let mut state = *seed;
        let mut cov = StateCovariance::identity();
        let mut chisq = 0.0;
        let mut skipped = 0;
        let mut z = first.z();

        for hit in hits {
            let measured = Vector2::new(hit.x, hit.y);
            let v = hit.cov;

            let old_z = z;
            z = hit.z();
            let (old_x, old_y) = helix_position(seed, old_z);
            let (x, y) = helix_position(seed, z);

            let q = process_noise_covariance(seed, (old_x, old_y, old_z), self.field, self.mass);
            let f = transport_matrix(seed, (old_x, old_y), (x, y));
            cov = f * cov * f.transpose() + q;
            state = seed + f * (state - seed);

            let h = projection_matrix(seed, z);
            let predicted = Vector2::new(x, y) + h * (state - seed);

            let innovation_cov: Matrix2<f64> = v + h * cov * h.transpose();
            let Some(innovation_inv) = innovation_cov.try_inverse() else {
                warn!("Singular innovation covariance at hit {} (z = {z}), hit skipped", hit.id);
                skipped += 1;
                continue;
            };

            let gain = cov * h.transpose() * innovation_inv;
            state += gain * (measured - predicted);
            cov -= gain * h * cov;

            let (xf, yf) = helix_position(&state, z);
            let residual = measured - Vector2::new(xf, yf);
            let residual_cov: Matrix2<f64> = v - h * cov * h.transpose();
            match residual_cov.try_inverse() {
                Some(inv) => chisq += (residual.transpose() * inv * residual)[(0, 0)],
                None => warn!("Singular residual covariance at hit {}, no χ² contribution", hit.id),
            }
        }

        Ok(KalmanResult {
            state,
            cov,
            chisq,
            skipped,
        })
    }

    /// Filter the hits of a fitted segment, seeded by its Riemann state.
    pub fn filter_segment(&self, segment: &Segment) -> Result<KalmanResult, FdcError> {
        self.filter(&segment.hits, &segment.state)
    }
}

#[cfg(test)]
mod kalman_tests {
    use std::sync::Arc;

    use nalgebra::Vector3;

    use super::*;
    use crate::{
        bfield::UniformField,
        constants::{PositionCovariance, PION_MASS},
        hits::Wire,
    };
    use approx::assert_relative_eq;

    fn state() -> StateVector {
        StateVector::new(1.0 / 300.0, 0.4, 1.5, 3.0, 64.0)
    }

    fn hits_on(state: &StateVector) -> Vec<Pseudopoint> {
        (0..6)
            .map(|k| {
                let z = 230.0 - 2.0 * k as f64;
                let (x, y) = helix_position(state, z);
                let origin = Vector3::new(0.0, 0.0, z);
                let wire = Arc::new(Wire::new(6 - k as u32, 48, 0.5 * k as f64, origin));
                let cov = PositionCovariance::from_diagonal_element(4e-4);
                Pseudopoint::from_position(k, wire, x, y, 0.0, cov)
            })
            .collect()
    }

    #[test]
    fn test_helix_position_at_vertex_and_radius() {
        let s = state();
        let (x, y) = helix_position(&s, s[4]);
        assert_relative_eq!(x, -1.5 * 0.4_f64.sin(), epsilon = 1e-12);
        assert_relative_eq!(y, 1.5 * 0.4_f64.cos(), epsilon = 1e-12);

        // Every point is at distance 1/2κ from the center.
        let u = s[2] + 0.5 / s[0];
        let (xc, yc) = (-u * s[1].sin(), u * s[1].cos());
        for z in [80.0, 150.0, 230.0] {
            let (x, y) = helix_position(&s, z);
            assert_relative_eq!((x - xc).hypot(y - yc), 150.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_translate_state_keeps_the_trajectory() {
        let s = state();
        let to = helix_position(&s, 120.0);
        let moved = translate_state(&s, (0.0, 0.0), to);
        assert_relative_eq!(moved[2], 0.0, epsilon = 1e-9);
        assert_relative_eq!(moved[4], 120.0, epsilon = 1e-9);
        assert_eq!(moved[0], s[0]);
        assert_eq!(moved[3], s[3]);

        // Back to the original pivot.
        let back = translate_state(&moved, to, (0.0, 0.0));
        for i in 0..5 {
            assert_relative_eq!(back[i], s[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_transport_matrix_is_the_jacobian() {
        let s = state();
        let from = (0.0, 0.0);
        let to = (12.0, -3.0);
        let f = transport_matrix(&s, from, to);
        for j in 0..5 {
            let h = 1e-6 * s[j].abs().max(1e-3);
            let mut plus = s;
            let mut minus = s;
            plus[j] += h;
            minus[j] -= h;
            let dp = translate_state(&plus, from, to);
            let dm = translate_state(&minus, from, to);
            for i in 0..5 {
                let numeric = (dp[i] - dm[i]) / (2.0 * h);
                assert_relative_eq!(f[(i, j)], numeric, epsilon = 1e-4, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn test_projection_matrix_is_the_jacobian() {
        let s = state();
        let z = 210.0;
        let h_mat = projection_matrix(&s, z);
        for j in 0..5 {
            let h = 1e-6 * s[j].abs().max(1e-3);
            let mut plus = s;
            let mut minus = s;
            plus[j] += h;
            minus[j] -= h;
            let (xp, yp) = helix_position(&plus, z);
            let (xm, ym) = helix_position(&minus, z);
            assert_relative_eq!(
                h_mat[(0, j)],
                (xp - xm) / (2.0 * h),
                epsilon = 1e-4,
                max_relative = 1e-4
            );
            assert_relative_eq!(
                h_mat[(1, j)],
                (yp - ym) / (2.0 * h),
                epsilon = 1e-4,
                max_relative = 1e-4
            );
        }
    }

    #[test]
    fn test_process_noise() {
        let s = state();
        let field = UniformField::along_z(2.0);
        let q = process_noise_covariance(&s, (10.0, 5.0, 200.0), &field, PION_MASS);
        assert!(q[(1, 1)] > 0.0 && q[(3, 3)] > 0.0);
        assert_eq!(q[(0, 3)], q[(3, 0)]);
        assert_eq!(q[(0, 1)], 0.0);
        // (1 + tan²λ)² against 1 / cos²λ = 1 + tan²λ
        assert_relative_eq!(q[(3, 3)] / q[(1, 1)], 10.0, max_relative = 1e-12);

        let no_field = UniformField::along_z(0.0);
        assert_eq!(
            process_noise_covariance(&s, (10.0, 5.0, 200.0), &no_field, PION_MASS),
            StateCovariance::zeros()
        );
    }

    #[test]
    fn test_filter_on_exact_hits() {
        let s = state();
        let field = UniformField::along_z(2.0);
        let filter = KalmanFilter::new(&field, PION_MASS);
        let result = filter.filter(&hits_on(&s), &s).unwrap();
        assert_eq!(result.skipped, 0);
        assert_relative_eq!(result.chisq, 0.0, epsilon = 1e-9);
        for i in 0..5 {
            assert_relative_eq!(result.state[i], s[i], epsilon = 1e-9);
        }
        assert!(result.cov.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_filter_rejects_degenerate_seed() {
        let field = UniformField::along_z(2.0);
        let filter = KalmanFilter::new(&field, PION_MASS);
        let hits = hits_on(&state());
        assert!(matches!(
            filter.filter(&hits, &StateVector::zeros()),
            Err(FdcError::ValueOutOfRange(_))
        ));
        assert_eq!(
            filter.filter(&[], &state()),
            Err(FdcError::InsufficientHits {
                found: 0,
                required: 1
            })
        );
    }
}

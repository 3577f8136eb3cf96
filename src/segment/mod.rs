//! # Track segments
//!
//! A [`Segment`] is a track stub confined to one chamber package: the hits clustered by the
//! [`finder`], the helix fitted through them and the per-hit residuals of the last fit.
//!
//! ## Variants of fit quality
//!
//! The finder runs up to two fits per candidate and records how far it got in [`FitQuality`]:
//!
//! * [`FitQuality::Unfit`] – the hit-based fit failed; the segment keeps its hits with a zero
//!   state vector and a χ² of [`UNFIT_CHISQ`].
//! * [`FitQuality::HitBased`] – only the fit on the raw hit positions succeeded; the hits carry
//!   the corrections derived from it.
//! * [`FitQuality::TimeBased`] – the refit on drift-corrected positions succeeded as well.
//!
//! ## Helix state
//!
//! The state vector is `(κ, φ₀, D, tanλ, z₀)` with `κ = q / 2rc` the signed half curvature,
//! `φ₀` the direction at the point of closest approach to the beam line, `D` the signed
//! distance of closest approach and `z₀` the vertex position. See
//! [`kalman::helix_position`](crate::kalman::helix_position) for the trajectory it describes.
//!
//! ## See also
//! ------------
//! * [`finder::SegmentFinder`] – clustering and fit sequence.
//! * [`params::SegmentParams`] – configuration.

pub mod finder;
pub mod params;

use std::f64::consts::PI;
use std::fmt;

use crate::{
    constants::{Centimeter, Radian, StateCovariance, StateVector, UNFIT_CHISQ},
    hits::Pseudopoint,
    riemann::{HelicalFit, TrackResidual},
};

/// How far the fit sequence of a segment progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitQuality {
    Unfit,
    HitBased,
    TimeBased,
}

impl fmt::Display for FitQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FitQuality::Unfit => "unfit",
            FitQuality::HitBased => "hit-based",
            FitQuality::TimeBased => "time-based",
        };
        f.write_str(label)
    }
}

/// A fitted track stub within one chamber package.
///
/// Fields
/// -----------------
/// * `package`: 0-based package index.
/// * `hits`: the hits of the segment, most downstream first, as corrected by the last fit.
/// * `state`: helix state `(κ, φ₀, D, tanλ, z₀)`.
/// * `cov`: covariance of `state` (unit diagonal seed).
/// * `xc`, `yc`, `rc`: circle of the Riemann fit (cm).
/// * `phi1`: azimuth of the reference hit around the circle center.
/// * `charge`: curvature sign `±1`.
/// * `chisq`: sum of the per-hit χ² contributions.
/// * `residuals`: one record per hit, same order as `hits`.
/// * `quality`: see [`FitQuality`].
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub package: usize,
    pub hits: Vec<Pseudopoint>,
    pub state: StateVector,
    pub cov: StateCovariance,
    pub xc: Centimeter,
    pub yc: Centimeter,
    pub rc: Centimeter,
    pub phi1: Radian,
    pub charge: f64,
    pub chisq: f64,
    pub residuals: Vec<TrackResidual>,
    pub quality: FitQuality,
}

impl Segment {
    /// A segment whose hit-based fit failed.
    ///
    /// The candidate is kept with zero track parameters, positive charge and a χ² of
    /// [`UNFIT_CHISQ`], so that downstream consumers can still see the clustered hits.
    pub fn unfit(package: usize, hits: Vec<Pseudopoint>) -> Self {
        let residuals = (0..hits.len())
            .map(|m| TrackResidual {
                hit_id: m,
                ..TrackResidual::default()
            })
            .collect();
        Segment {
            package,
            hits,
            state: StateVector::zeros(),
            cov: StateCovariance::identity(),
            xc: 0.0,
            yc: 0.0,
            rc: 0.0,
            phi1: 0.0,
            charge: 1.0,
            chisq: UNFIT_CHISQ,
            residuals,
            quality: FitQuality::Unfit,
        }
    }

    /// Build a segment from the outcome of its last successful fit.
    ///
    /// Arguments
    /// -----------------
    /// * `package`: package index.
    /// * `hits`: the final hits of the segment.
    /// * `fit`: the helix whose parameters are stored.
    /// * `residuals`: the residuals of `hits` with respect to `fit`.
    /// * `quality`: which fit `fit` is.
    ///
    /// Return
    /// ----------
    /// * The segment, with the seed state vector derived from the circle and line of `fit` and
    ///   `chisq` the sum of the residual χ².
    pub fn from_fit(
        package: usize,
        hits: Vec<Pseudopoint>,
        fit: &HelicalFit,
        residuals: Vec<TrackResidual>,
        quality: FitQuality,
    ) -> Self {
        let chisq = residuals.iter().map(|r| r.chi2).sum();
        Segment {
            package,
            hits,
            state: seed_state(fit),
            cov: StateCovariance::identity(),
            xc: fit.circle.xc,
            yc: fit.circle.yc,
            rc: fit.circle.rc,
            phi1: fit.update.phi1,
            charge: fit.charge,
            chisq,
            residuals,
            quality,
        }
    }

    pub fn is_fit(&self) -> bool {
        self.quality != FitQuality::Unfit
    }

    /// Transverse position of the Riemann helix at `z`.
    ///
    /// Arc lengths are counted from the plane of the first (most downstream) hit.
    ///
    /// Return
    /// ----------
    /// * `Some((x, y))`, or `None` for an unfit segment or a helix without dip.
    pub fn helical_position(&self, z: Centimeter) -> Option<(Centimeter, Centimeter)> {
        let tanl = self.state[3];
        if !self.is_fit() || self.rc <= 0.0 || tanl == 0.0 {
            return None;
        }
        let z_ref = self.hits.first()?.z();
        let sperp = self.charge * (z - z_ref) / tanl;
        let (sinp, cosp) = (self.phi1 + sperp / self.rc).sin_cos();
        Some((self.xc + self.rc * cosp, self.yc + self.rc * sinp))
    }
}

/// State vector of the helix described by a Riemann fit.
///
/// `φ₀` is the direction of the track at its closest approach to the beam line, and `D` is
/// read from whichever of `xc = −(D + q·rc)·sin φ₀`, `yc = (D + q·rc)·cos φ₀` is better
/// conditioned.
fn seed_state(fit: &HelicalFit) -> StateVector {
    let (xc, yc, rc) = (fit.circle.xc, fit.circle.yc, fit.circle.rc);
    let q = fit.charge;
    if !(rc > 0.0) {
        return StateVector::new(0.0, 0.0, 0.0, fit.line.tanl, fit.line.zvertex);
    }

    let kappa = q / 2.0 / rc;
    let mut phi0 = (-xc).atan2(yc);
    if q < 0.0 {
        phi0 += PI;
    }
    let (sinp, cosp) = phi0.sin_cos();
    let d = if sinp.abs() >= cosp.abs() {
        -xc / sinp - q * rc
    } else {
        yc / cosp - q * rc
    };
    StateVector::new(kappa, phi0, d, fit.line.tanl, fit.line.zvertex)
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "FDC segment (package {}, {} hits, {} fit)",
            self.package,
            self.hits.len(),
            self.quality
        )?;
        writeln!(
            f,
            "  circle    : center = ({:.4}, {:.4}) cm, radius = {:.4} cm, charge = {:+}",
            self.xc, self.yc, self.rc, self.charge
        )?;
        writeln!(
            f,
            "  state     : κ = {:.6e} 1/cm, φ₀ = {:.6} rad, D = {:.4} cm, tanλ = {:.6}, z₀ = {:.4} cm",
            self.state[0], self.state[1], self.state[2], self.state[3], self.state[4]
        )?;
        writeln!(f, "  χ²        : {:.4}", self.chisq)?;
        for (hit, r) in self.hits.iter().zip(&self.residuals) {
            writeln!(
                f,
                "    hit {:>4} (layer {:>2}, wire {:>3}): dx = {:+.5}, dy = {:+.5}, s = {:.3}, χ² = {:.4}",
                hit.id,
                hit.layer(),
                hit.wire.wire,
                r.dx,
                r.dy,
                r.s,
                r.chi2
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod segment_tests {
    use std::sync::Arc;

    use nalgebra::Vector3;

    use super::*;
    use crate::{
        constants::PositionCovariance,
        hits::Wire,
        riemann::{CircleFit, LineFit, MeasurementCovariance, TrajectoryUpdate},
    };
    use approx::assert_relative_eq;

    fn hits(n: usize) -> Vec<Pseudopoint> {
        (0..n)
            .map(|k| {
                let wire = Arc::new(Wire::new(
                    6 - k as u32,
                    50,
                    0.0,
                    Vector3::new(0.0, 0.0, 200.0 - k as f64),
                ));
                Pseudopoint::new(k, wire, 1.0, 2.0, 0.0, PositionCovariance::identity())
            })
            .collect()
    }

    fn fit_of_circle(xc: f64, yc: f64, rc: f64, charge: f64) -> HelicalFit {
        HelicalFit {
            circle: CircleFit::from_circle(xc, yc, rc),
            line: LineFit {
                tanl: 3.0,
                z0: 0.0,
                zvertex: 65.0,
                var_tanl: 0.0,
                projected: vec![],
            },
            charge,
            ref_plane: 0,
            update: TrajectoryUpdate {
                phi1: 0.3,
                predicted: vec![],
                cov: MeasurementCovariance::from_hits(&[], 0.1),
            },
            residuals: vec![],
            chisq: 0.0,
        }
    }

    #[test]
    fn test_unfit_defaults() {
        let seg = Segment::unfit(2, hits(4));
        assert_eq!(seg.quality, FitQuality::Unfit);
        assert_eq!(seg.chisq, UNFIT_CHISQ);
        assert_eq!(seg.state, StateVector::zeros());
        assert_eq!(seg.residuals.len(), 4);
        assert_eq!(seg.residuals[3].hit_id, 3);
        assert_eq!(seg.helical_position(190.0), None);
    }

    #[test]
    fn test_seed_state_through_origin() {
        // Circles through the origin have no impact parameter.
        for (xc, yc) in [(30.0, 40.0), (-48.0, 14.0), (0.0, -50.0), (50.0, 0.0)] {
            for q in [1.0, -1.0] {
                let state = seed_state(&fit_of_circle(xc, yc, 50.0, q));
                assert_relative_eq!(state[0], q / 100.0);
                assert_relative_eq!(state[2], 0.0, epsilon = 1e-10);
                assert_eq!(state[3], 3.0);
                assert_eq!(state[4], 65.0);
                // The center is on the left of the direction for positive curvature.
                let (sinp, cosp) = state[1].sin_cos();
                let left = -xc * sinp + yc * cosp;
                assert!(q * left > 0.0);
            }
        }
    }

    #[test]
    fn test_seed_state_impact_parameter() {
        // Circle of radius 10 centered 12 cm away: closest approach 2 cm from the beam line.
        let state = seed_state(&fit_of_circle(0.0, 12.0, 10.0, 1.0));
        assert_relative_eq!(state[1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(state[2], 2.0, epsilon = 1e-12);

        let state = seed_state(&fit_of_circle(12.0, 0.0, 10.0, -1.0));
        assert_relative_eq!(state[2].abs(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_from_fit_and_display() {
        let fit = fit_of_circle(30.0, 40.0, 50.0, -1.0);
        let residuals = vec![
            TrackResidual {
                hit_id: 0,
                chi2: 1.5,
                ..TrackResidual::default()
            },
            TrackResidual {
                hit_id: 1,
                chi2: 0.5,
                ..TrackResidual::default()
            },
            TrackResidual {
                hit_id: 2,
                chi2: 1.0,
                ..TrackResidual::default()
            },
        ];
        let seg = Segment::from_fit(1, hits(3), &fit, residuals, FitQuality::TimeBased);
        assert_relative_eq!(seg.chisq, 3.0);
        assert_eq!(seg.charge, -1.0);
        assert!(seg.is_fit());

        // At the reference plane the helix sits at phi1 around the center.
        let (x, y) = seg.helical_position(200.0).unwrap();
        assert_relative_eq!(x, 30.0 + 50.0 * 0.3_f64.cos(), epsilon = 1e-12);
        assert_relative_eq!(y, 40.0 + 50.0 * 0.3_f64.sin(), epsilon = 1e-12);

        let text = format!("{seg}");
        assert!(text.contains("package 1, 3 hits, time-based fit"));
        assert!(text.contains("radius = 50.0000 cm"));
    }
}

//! # Drift-time and Lorentz correction
//!
//! Once a segment has a helix estimate, every hit is corrected in its wire frame:
//!
//! * **Across the wire** – the drift time, minus the time of flight of a pion from the vertex
//!   (`s / βc`), times the drift velocity gives the drift distance `dw`. Its sign is the side
//!   of the wire the helix passes on.
//! * **Along the wire** – the magnetic field deflects the drifting electrons. The tangents of
//!   the deflection are interpolated from a [`DeflectionTable`] at the radius and depth of the
//!   hit, and combined with the drift distance and dip angle into the along-wire shift `ds`.
//!   Without a table the along-wire coordinate is left as measured, with the wide variance
//!   `max_deflection² / 3`, and the run diagnostics warn once.
//!
//! The corrector never mutates the hits it is given: it returns corrected copies built from the
//! raw wire-frame measurement (see [`Pseudopoint::with_correction`]).

pub mod deflection_table;

use std::f64::consts::FRAC_PI_2;

use log::debug;

use crate::{
    bfield::{momentum_estimate, pion_beta, MagneticField},
    constants::{Centimeter, SPEED_OF_LIGHT},
    diagnostics::Diagnostics,
    hits::Pseudopoint,
    riemann::HelicalFit,
    segment::params::SegmentParams,
};

pub use deflection_table::DeflectionTable;

/// Applies the drift and Lorentz corrections of one run.
pub struct LorentzCorrector<'a> {
    pub params: &'a SegmentParams,
    pub field: &'a dyn MagneticField,
    pub table: Option<&'a DeflectionTable>,
    pub diagnostics: &'a Diagnostics,
}

impl<'a> LorentzCorrector<'a> {
    pub fn new(
        params: &'a SegmentParams,
        field: &'a dyn MagneticField,
        table: Option<&'a DeflectionTable>,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        LorentzCorrector {
            params,
            field,
            table,
            diagnostics,
        }
    }

    /// Corrected copies of `hits` from the helix `fit` of the segment they belong to.
    ///
    /// `hits[m]` is corrected with the helix position at its plane and the path length of the
    /// `m`-th residual of the fit.
    pub fn correct_points(&self, hits: &[Pseudopoint], fit: &HelicalFit) -> Vec<Pseudopoint> {
        hits.iter()
            .zip(&fit.update.predicted)
            .zip(&fit.residuals)
            .map(|((hit, pred), residual)| {
                self.correct(hit, pred.x, pred.y, residual.s, fit.line.tanl, fit.circle.rc)
            })
            .collect()
    }

    /// Correct one hit.
    ///
    /// Arguments
    /// -----------------
    /// * `hit`: the hit to correct.
    /// * `x`, `y`: position of the helix at the plane of the hit.
    /// * `s`: path length from the vertex to the hit.
    /// * `tanl`, `rc`: dip angle tangent and radius of the helix.
    ///
    /// Return
    /// ----------
    /// * A copy of `hit` with `dw`, `ds`, the corrected position and the wire-frame variances
    ///   `(x_resolution², y_resolution²)` (or `max_deflection² / 3` along the wire when no
    ///   deflection is applied).
    pub fn correct(
        &self,
        hit: &Pseudopoint,
        x: Centimeter,
        y: Centimeter,
        s: Centimeter,
        tanl: f64,
        rc: Centimeter,
    ) -> Pseudopoint {
        let p = self.params;
        let (cosa, sina) = hit.wire.frame();
        let z = hit.z();

        let sigx2 = p.x_resolution * p.x_resolution;
        let mut sigy2 = p.uncorrected_along_wire_variance();

        let w = x * cosa - y * sina - hit.w;
        let sign = if w > 0.0 { 1.0 } else { -1.0 };

        let lambda = tanl.atan();
        let b = self.field.magnitude(x, y, z);
        let beta = pion_beta(momentum_estimate(b, rc, lambda.cos()), p.pion_mass);
        let dw = sign * (hit.time - s / beta / SPEED_OF_LIGHT) * p.drift_velocity;

        let mut ds = 0.0;
        match self.table {
            Some(table) => match table.tangents(x.hypot(y), z) {
                Ok((tanr, tanz)) => {
                    let alpha = FRAC_PI_2 - lambda;
                    let phi = y.atan2(x);
                    let delta_y =
                        tanr * dw * alpha.cos() - tanz * dw * alpha.sin() * phi.cos();
                    ds = -delta_y;
                    sigy2 = p.y_resolution * p.y_resolution;
                }
                Err(e) => debug!("Lorentz deflection not applied to hit {}: {e}", hit.id),
            },
            None => {
                self.diagnostics.warn_missing_deflection_table();
            }
        }

        debug!(
            "hit {} (layer {}): dw = {dw:.5} cm, ds = {ds:.5} cm",
            hit.id,
            hit.layer()
        );
        hit.with_correction(dw, ds, sigx2, sigy2)
    }
}

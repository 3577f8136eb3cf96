//! Complete helix fit of one segment candidate.
//!
//! The fit runs the three stages (circle, line, covariance) once on the measured covariances
//! and twice more on the propagated ones. The charge is first estimated on the measurements,
//! then on the positions projected on the current circle. After the last covariance update the
//! residuals, path lengths and per-hit χ² are computed against the final helix by
//! [`track_residuals`], which the segment finder also uses once the hits are corrected.

use nalgebra::Vector3;

use crate::{
    bfield::MagneticField,
    fdc_errors::FdcError,
    hits::Pseudopoint,
    riemann::{
        charge::estimate_charge,
        circle_fit::riemann_circle_fit,
        covariance::update_positions_and_covariance,
        line_fit::riemann_line_fit,
        HelicalFit, LineFit, MeasurementCovariance, TrackResidual, TrajectoryUpdate,
    },
    segment::params::SegmentParams,
};

/// Number of fit passes run on the propagated covariances.
const REFINEMENT_PASSES: usize = 2;

/// Fit a helix through `hits` and the beam-line point.
///
/// Arguments
/// -----------------
/// * `hits`: the hits of the segment, most downstream first; their current `(x, y)` and
///   covariance are used.
/// * `ref_plane`: index of the hit the helix is propagated from.
/// * `params`: beam-line point position/variance and mass hypothesis.
/// * `field`: magnetic field service.
///
/// Return
/// ----------
/// * The [`HelicalFit`], or the error of the first stage that failed.
///
/// See also
/// ------------
/// * [`riemann_circle_fit`], [`riemann_line_fit`], [`update_positions_and_covariance`],
///   [`estimate_charge`]
pub fn riemann_helical_fit(
    hits: &[Pseudopoint],
    ref_plane: usize,
    params: &SegmentParams,
    field: &dyn MagneticField,
) -> Result<HelicalFit, FdcError> {
    let n = hits.len();
    if n < 3 {
        return Err(FdcError::InsufficientHits {
            found: n,
            required: 3,
        });
    }

    let measured: Vec<Vector3<f64>> = hits
        .iter()
        .map(|h| Vector3::new(h.x, h.y, h.z()))
        .chain(std::iter::once(Vector3::new(0.0, 0.0, params.z_target)))
        .collect();
    let initial = MeasurementCovariance::from_hits(hits, params.beam_variance);

    let mut circle = riemann_circle_fit(&measured, &initial.crphi)?;
    let mut line = riemann_line_fit(&measured, &initial.cr, &circle)?;
    let mut charge = estimate_charge(&measured[..n], &initial.cr, &initial.crphi);
    let mut update = update_positions_and_covariance(
        &circle,
        &line,
        charge,
        ref_plane,
        &initial,
        field,
        params.pion_mass,
    )?;

    for _ in 0..REFINEMENT_PASSES {
        circle = riemann_circle_fit(&measured, &update.cov.crphi)?;
        line = riemann_line_fit(&measured, &update.cov.cr, &circle)?;
        charge = estimate_charge(&line.projected[..n], &update.cov.cr, &update.cov.crphi);
        update = update_positions_and_covariance(
            &circle,
            &line,
            charge,
            ref_plane,
            &update.cov,
            field,
            params.pion_mass,
        )?;
    }

    let residuals = track_residuals(hits, &line, &update)?;
    let chisq = residuals.iter().map(|r| r.chi2).sum();

    Ok(HelicalFit {
        circle,
        line,
        charge,
        ref_plane,
        update,
        residuals,
        chisq,
    })
}

/// Residuals, path lengths and χ² contributions of `hits` with respect to a fitted helix.
///
/// `hits[m]` is compared with the helix position `update.predicted[m]`; the χ² contribution
/// is the squared transverse distance over the propagated radial variance of the point.
///
/// Return
/// ----------
/// * One [`TrackResidual`] per hit, or [`FdcError::ValueOutOfRange`] if a propagated variance
///   is not positive.
pub fn track_residuals(
    hits: &[Pseudopoint],
    line: &LineFit,
    update: &TrajectoryUpdate,
) -> Result<Vec<TrackResidual>, FdcError> {
    let sinl = line.tanl.atan().sin();
    hits.iter()
        .zip(&update.predicted)
        .enumerate()
        .map(|(m, (hit, pred))| {
            let var = update.cov.cr[(m, m)];
            if !(var > 0.0) {
                return Err(FdcError::ValueOutOfRange(format!(
                    "propagated radial variance of hit {m} is not positive ({var:e})"
                )));
            }
            let dx = pred.x - hit.x;
            let dy = pred.y - hit.y;
            Ok(TrackResidual {
                hit_id: m,
                dx,
                dy,
                s: (hit.z() - line.zvertex) / sinl,
                chi2: (dx * dx + dy * dy) / var,
            })
        })
        .collect()
}

//! # Segment finder
//!
//! Clusters the hits of one chamber package into segment candidates and runs the fit sequence
//! on each of them.
//!
//! ## Clustering
//!
//! The hits of a package are expected most downstream first (layer descending). Every unused
//! hit of the first plane seeds a candidate. Walking upstream, the candidate takes, in each
//! plane, the unused hit nearest to the last hit it took, provided it lies within
//! [`SegmentParams::match_radius`]. Unused hits on a wire adjacent to a chained hit, in the
//! same plane, are then absorbed and the candidate re-sorted by layer. Every hit taken is
//! marked used, including the hits of candidates that end up too short to be fitted.
//!
//! ## Fit sequence
//!
//! 1. Hit-based Riemann fit on the raw positions, referenced to
//!    [`SegmentParams::hit_based_ref_plane`]. A failure keeps the candidate as an unfit segment.
//! 2. Drift and Lorentz correction of the hits from that helix.
//! 3. Time-based fit on the corrected positions, referenced to
//!    [`SegmentParams::time_based_ref_plane`].
//! 4. Final correction from the time-based helix, and residuals of the final hits.
//!
//! The finalized hits are written back into the package slice with
//! [`Pseudopoint::merge_correction`].

use itertools::Itertools;
use log::debug;
use smallvec::SmallVec;

use crate::{
    bfield::MagneticField,
    diagnostics::Diagnostics,
    hits::Pseudopoint,
    lorentz::{DeflectionTable, LorentzCorrector},
    riemann::{
        helical_fit::{riemann_helical_fit, track_residuals},
        HelicalFit, TrackResidual,
    },
    segment::{params::SegmentParams, FitQuality, Segment},
};

/// Positions of the hits of one candidate in the package slice.
type Members = SmallVec<[usize; 8]>;

/// Per-package driver of the clustering and the fit sequence.
pub struct SegmentFinder<'a> {
    params: &'a SegmentParams,
    field: &'a dyn MagneticField,
    corrector: LorentzCorrector<'a>,
}

impl<'a> SegmentFinder<'a> {
    pub fn new(
        params: &'a SegmentParams,
        field: &'a dyn MagneticField,
        table: Option<&'a DeflectionTable>,
        diagnostics: &'a Diagnostics,
    ) -> Self {
        SegmentFinder {
            params,
            field,
            corrector: LorentzCorrector::new(params, field, table, diagnostics),
        }
    }

    /// Find and fit the segments of one package.
    ///
    /// Arguments
    /// -----------------
    /// * `package`: index of the package, stored in the segments.
    /// * `points`: the hits of the package, sorted by layer descending. Clustered hits are
    ///   flagged as used and the hits of fitted segments receive their final correction.
    ///
    /// Return
    /// ----------
    /// * The segments in seed order. A package with fewer than three hits yields none.
    pub fn find_segments(&self, package: usize, points: &mut [Pseudopoint]) -> Vec<Segment> {
        if points.len() < 3 {
            return Vec::new();
        }

        let planes = plane_boundaries(points);
        let mut segments = Vec::new();
        for seed in 0..planes[0] {
            if points[seed].used_in_segment {
                continue;
            }
            let members = self.cluster(points, seed, &planes);
            if members.len() < self.params.min_hits.max(3) {
                debug!(
                    "package {package}: candidate seeded by hit {} has {} hits, rejected",
                    points[seed].id,
                    members.len()
                );
                continue;
            }

            let hits: Vec<Pseudopoint> = members.iter().map(|&i| points[i].clone()).collect();
            let segment = self.fit_segment(package, hits);
            for (&slot, hit) in members.iter().zip(&segment.hits) {
                points[slot].merge_correction(hit);
            }
            segments.push(segment);
        }
        segments
    }

    /// Indices of the hits of the candidate seeded by `points[seed]`.
    fn cluster(&self, points: &mut [Pseudopoint], seed: usize, planes: &[usize]) -> Members {
        points[seed].used_in_segment = true;
        let mut members: Members = smallvec::smallvec![seed];
        let (mut x, mut y) = (points[seed].x, points[seed].y);

        for plane in planes.windows(2) {
            let nearest = (plane[0]..plane[1])
                .filter(|&m| !points[m].used_in_segment)
                .map(|m| (m, (points[m].x - x).hypot(points[m].y - y)))
                .filter(|&(_, delta)| delta < self.params.match_radius)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((m, _)) = nearest {
                points[m].used_in_segment = true;
                x = points[m].x;
                y = points[m].y;
                members.push(m);
            }
        }

        let chained = members.len();
        for k in 0..points.len() {
            if points[k].used_in_segment {
                continue;
            }
            if members[..chained]
                .iter()
                .any(|&j| points[j].is_adjacent(&points[k]))
            {
                points[k].used_in_segment = true;
                members.push(k);
            }
        }
        if members.len() > chained {
            members.sort_by_key(|&i| std::cmp::Reverse(points[i].layer()));
        }
        members
    }

    /// Run the hit-based fit, correction, time-based fit and final correction on `hits`.
    pub fn fit_segment(&self, package: usize, hits: Vec<Pseudopoint>) -> Segment {
        let n = hits.len();
        let p = self.params;

        let hit_based = match riemann_helical_fit(
            &hits,
            p.hit_based_ref_plane.min(n.saturating_sub(1)),
            p,
            self.field,
        ) {
            Ok(fit) => fit,
            Err(e) => {
                debug!("package {package}: hit-based fit of {n} hits failed: {e}");
                return Segment::unfit(package, hits);
            }
        };
        let corrected = self.corrector.correct_points(&hits, &hit_based);

        match riemann_helical_fit(
            &corrected,
            p.time_based_ref_plane.min(n.saturating_sub(1)),
            p,
            self.field,
        ) {
            Ok(time_based) => {
                let last = self.corrector.correct_points(&corrected, &time_based);
                let residuals = final_residuals(package, &last, &time_based);
                Segment::from_fit(package, last, &time_based, residuals, FitQuality::TimeBased)
            }
            Err(e) => {
                debug!("package {package}: time-based fit of {n} hits failed: {e}");
                let residuals = final_residuals(package, &corrected, &hit_based);
                Segment::from_fit(package, corrected, &hit_based, residuals, FitQuality::HitBased)
            }
        }
    }
}

/// Residuals of the finalized `hits` against `fit`, or the residuals computed inside the fit
/// if the propagated covariance does not allow it.
fn final_residuals(package: usize, hits: &[Pseudopoint], fit: &HelicalFit) -> Vec<TrackResidual> {
    track_residuals(hits, &fit.line, &fit.update).unwrap_or_else(|e| {
        debug!("package {package}: final residuals unavailable, keeping the fit's: {e}");
        fit.residuals.clone()
    })
}

/// Start index of every plane after the first one, followed by `points.len()`.
///
/// The first entry is therefore the number of hits in the most downstream plane.
fn plane_boundaries(points: &[Pseudopoint]) -> Vec<usize> {
    let mut planes: Vec<usize> = points
        .iter()
        .tuple_windows()
        .positions(|(a, b)| a.z() != b.z())
        .map(|i| i + 1)
        .collect();
    planes.push(points.len());
    planes
}

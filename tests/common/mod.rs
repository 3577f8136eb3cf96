#![allow(dead_code)]

use std::f64::consts::{FRAC_PI_3, PI};
use std::sync::Arc;

use approx::assert_relative_eq;
use fdc_segments::{
    bfield::{momentum_estimate, pion_beta},
    constants::{PositionCovariance, PION_MASS, SPEED_OF_LIGHT},
    hits::{Pseudopoint, Wire},
    segment::Segment,
};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Field of the synthetic events (T)
pub const BZ: f64 = 2.0;

/// Raw resolution perpendicular to and along the wire (cm)
pub const SIGMA_W: f64 = 0.03;
pub const SIGMA_S: f64 = 0.02;

/// z of a wire plane: four packages of six planes, 1.2 cm apart.
pub fn plane_z(layer: u32) -> f64 {
    let package = (layer - 1) / 6;
    let plane = (layer - 1) % 6;
    176.0 + 57.0 * package as f64 + 1.2 * plane as f64
}

/// Wire orientation of a layer: 0, +60° and -60° planes in turn.
pub fn wire_angle(layer: u32) -> f64 {
    match (layer - 1) % 3 {
        0 => 0.0,
        1 => FRAC_PI_3,
        _ => -FRAC_PI_3,
    }
}

/// A helix leaving the beam line at `z_vertex`.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticTrack {
    pub rc: f64,
    /// Azimuth of the circle center seen from the beam line
    pub phi_center: f64,
    pub charge: f64,
    pub tanl: f64,
    pub z_vertex: f64,
}

impl SyntheticTrack {
    pub fn new(rc: f64, phi_center: f64, charge: f64, tanl: f64) -> Self {
        SyntheticTrack {
            rc,
            phi_center,
            charge,
            tanl,
            z_vertex: 65.0,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.rc * self.phi_center.cos(),
            self.rc * self.phi_center.sin(),
        )
    }

    pub fn position_at(&self, z: f64) -> (f64, f64) {
        let (xc, yc) = self.center();
        let a0 = self.phi_center + PI;
        let sperp = (z - self.z_vertex) / self.tanl;
        let a = a0 + self.charge * sperp / self.rc;
        (xc + self.rc * a.cos(), yc + self.rc * a.sin())
    }

    /// Drift time of a hit sitting on its wire: the time of flight of a pion from the vertex.
    pub fn time_of_flight(&self, z: f64) -> f64 {
        let lambda = self.tanl.atan();
        let s = (z - self.z_vertex) / lambda.sin();
        let beta = pion_beta(momentum_estimate(BZ, self.rc, lambda.cos()), PION_MASS);
        s / beta / SPEED_OF_LIGHT
    }

    /// One hit per layer, exactly on the helix, on wire `wire` of every plane.
    pub fn hits(
        &self,
        layers: impl IntoIterator<Item = u32>,
        first_id: usize,
        wire: u32,
    ) -> Vec<Pseudopoint> {
        layers
            .into_iter()
            .enumerate()
            .map(|(k, layer)| {
                let z = plane_z(layer);
                let (x, y) = self.position_at(z);
                make_hit(first_id + k, layer, wire, x, y, self.time_of_flight(z))
            })
            .collect()
    }

    /// Same as [`SyntheticTrack::hits`] with Gaussian noise on both wire-frame coordinates.
    pub fn smeared_hits(
        &self,
        layers: impl IntoIterator<Item = u32>,
        first_id: usize,
        wire: u32,
        sigma: f64,
        rng: &mut StdRng,
    ) -> Vec<Pseudopoint> {
        let noise = Normal::new(0.0, sigma).unwrap();
        self.hits(layers, first_id, wire)
            .into_iter()
            .map(|h| {
                Pseudopoint::new(
                    h.id,
                    h.wire.clone(),
                    h.w + noise.sample(rng),
                    h.s + noise.sample(rng),
                    h.time,
                    h.cov,
                )
            })
            .collect()
    }
}

/// Hit at lab position `(x, y)` on `layer`, with the raw wire-frame resolution.
pub fn make_hit(id: usize, layer: u32, wire: u32, x: f64, y: f64, time: f64) -> Pseudopoint {
    let alpha = wire_angle(layer);
    let wire = Arc::new(Wire::new(layer, wire, alpha, Vector3::new(0.0, 0.0, plane_z(layer))));
    let (cosa, sina) = wire.frame();
    let (sw2, ss2) = (SIGMA_W * SIGMA_W, SIGMA_S * SIGMA_S);
    let cross = (ss2 - sw2) * sina * cosa;
    let cov = PositionCovariance::new(
        sw2 * cosa * cosa + ss2 * sina * sina,
        cross,
        cross,
        sw2 * sina * sina + ss2 * cosa * cosa,
    );
    Pseudopoint::from_position(id, wire, x, y, time, cov)
}

/// Layers of one package, most upstream first.
pub fn package_layers(package: u32) -> std::ops::RangeInclusive<u32> {
    6 * package + 1..=6 * package + 6
}

/// Check the fitted circle and dip of a segment against the generating track.
pub fn assert_segment_matches(segment: &Segment, track: &SyntheticTrack, max_relative: f64) {
    let (xc, yc) = track.center();
    assert_eq!(segment.charge, track.charge);
    assert_relative_eq!(segment.rc, track.rc, max_relative = max_relative);
    assert_relative_eq!(segment.xc, xc, epsilon = max_relative * track.rc);
    assert_relative_eq!(segment.yc, yc, epsilon = max_relative * track.rc);
    assert_relative_eq!(segment.state[3], track.tanl, max_relative = max_relative);
}

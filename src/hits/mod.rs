//! # Chamber hits
//!
//! This module defines the measurement side of the reconstruction:
//!
//! * [`Wire`] – identity and geometry of a sense wire (layer, wire number, direction, origin),
//! * [`Pseudopoint`] – a cathode/anode cluster measured on one wire plane, with its wire-frame
//!   coordinates, drift time, covariance and the bookkeeping of the corrections applied by the
//!   segment fit,
//! * [`package_index`] – the deterministic `(layer - 1) / 6` grouping rule.
//!
//! ## Coordinates
//!
//! With `udir = (sin α, cos α, 0)` the wire direction, a pseudopoint at lab position `(x, y)`
//! has wire-frame coordinates
//!
//! ```text
//! w =  x·cos α − y·sin α      (perpendicular to the wire, from the anode wire position)
//! s =  x·sin α + y·cos α      (along the wire, from the cathode strips)
//! ```
//!
//! and the inverse transform is `x = w·cos α + s·sin α`, `y = −w·sin α + s·cos α`.
//!
//! ## Ownership
//!
//! Pseudopoints are owned by the event. The segment fit works on value copies of the hits it
//! clusters and writes the final corrected positions back with [`Pseudopoint::merge_correction`]
//! once a segment is finalized.

use std::sync::Arc;

use nalgebra::Vector3;

use crate::{
    constants::{Centimeter, Nanosecond, PositionCovariance},
    fdc_errors::FdcError,
};

/// A sense wire of the forward drift chambers.
#[derive(Debug, Clone, PartialEq)]
pub struct Wire {
    /// Layer number, 1-based, increasing downstream
    pub layer: u32,
    /// Wire number within the plane
    pub wire: u32,
    /// Unit vector along the wire
    pub udir: Vector3<f64>,
    /// Center of the wire; `origin.z` is the plane position
    pub origin: Vector3<Centimeter>,
}

impl Wire {
    /// Build a wire of a plane rotated by `angle` (radians) around the beam axis.
    pub fn new(layer: u32, wire: u32, angle: f64, origin: Vector3<Centimeter>) -> Self {
        Wire {
            layer,
            wire,
            udir: Vector3::new(angle.sin(), angle.cos(), 0.0),
            origin,
        }
    }

    /// `(cos α, sin α)` of the wire frame.
    #[inline]
    pub fn frame(&self) -> (f64, f64) {
        (self.udir.y, self.udir.x)
    }

    /// Plane position along the beam axis.
    #[inline]
    pub fn z(&self) -> Centimeter {
        self.origin.z
    }
}

/// A hit on one wire plane.
///
/// Fields
/// -----------------
/// * `id`: identifier of the hit within the event, preserved in the segments.
/// * `wire`: the wire the avalanche was recorded on (shared geometry).
/// * `w`, `s`: measured wire-frame coordinates (cm).
/// * `time`: drift time (ns).
/// * `x`, `y`: current lab position, i.e. `(w + dw, s + ds)` rotated to the lab frame.
/// * `cov`: `(x, y)` covariance of the current position.
/// * `dw`, `ds`: drift-distance and along-wire corrections applied by the last correction pass.
/// * `w_x`, `w_y`, `s_x`, `s_y`: lab-frame components of `dw` and `ds`.
/// * `xcorr`, `ycorr`: total shift of the lab position with respect to the raw measurement.
/// * `used_in_segment`: set once the hit has been claimed by a segment candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Pseudopoint {
    pub id: usize,
    pub wire: Arc<Wire>,
    pub w: Centimeter,
    pub s: Centimeter,
    pub time: Nanosecond,
    pub x: Centimeter,
    pub y: Centimeter,
    pub cov: PositionCovariance,
    pub dw: Centimeter,
    pub ds: Centimeter,
    pub w_x: Centimeter,
    pub w_y: Centimeter,
    pub s_x: Centimeter,
    pub s_y: Centimeter,
    pub xcorr: Centimeter,
    pub ycorr: Centimeter,
    pub used_in_segment: bool,
}

impl Pseudopoint {
    /// Create a pseudopoint from its wire-frame measurement.
    ///
    /// Arguments
    /// -----------------
    /// * `id`: identifier of the hit in the event.
    /// * `wire`: shared wire geometry.
    /// * `w`: coordinate perpendicular to the wire (cm).
    /// * `s`: coordinate along the wire (cm).
    /// * `time`: drift time (ns).
    /// * `cov`: `(x, y)` covariance of the measurement.
    pub fn new(
        id: usize,
        wire: Arc<Wire>,
        w: Centimeter,
        s: Centimeter,
        time: Nanosecond,
        cov: PositionCovariance,
    ) -> Self {
        let (cosa, sina) = wire.frame();
        Pseudopoint {
            id,
            x: w * cosa + s * sina,
            y: -w * sina + s * cosa,
            wire,
            w,
            s,
            time,
            cov,
            dw: 0.0,
            ds: 0.0,
            w_x: 0.0,
            w_y: 0.0,
            s_x: 0.0,
            s_y: 0.0,
            xcorr: 0.0,
            ycorr: 0.0,
            used_in_segment: false,
        }
    }

    /// Create a pseudopoint from a lab position, deriving the wire-frame coordinates.
    pub fn from_position(
        id: usize,
        wire: Arc<Wire>,
        x: Centimeter,
        y: Centimeter,
        time: Nanosecond,
        cov: PositionCovariance,
    ) -> Self {
        let (cosa, sina) = wire.frame();
        let w = x * cosa - y * sina;
        let s = x * sina + y * cosa;
        Pseudopoint::new(id, wire, w, s, time, cov)
    }

    #[inline]
    pub fn layer(&self) -> u32 {
        self.wire.layer
    }

    #[inline]
    pub fn z(&self) -> Centimeter {
        self.wire.z()
    }

    /// Raw lab position, before any correction.
    pub fn raw_position(&self) -> (Centimeter, Centimeter) {
        let (cosa, sina) = self.wire.frame();
        (
            self.w * cosa + self.s * sina,
            -self.w * sina + self.s * cosa,
        )
    }

    /// Whether `other` sits on a neighbouring wire of the same plane.
    pub fn is_adjacent(&self, other: &Pseudopoint) -> bool {
        self.wire.wire.abs_diff(other.wire.wire) == 1 && self.z() == other.z()
    }

    /// Copy of this hit moved by the drift correction `dw` and along-wire correction `ds`.
    ///
    /// The position is rebuilt from the raw wire-frame measurement, so successive corrections
    /// do not accumulate. The covariance is the wire-frame diagonal `(sigx2, sigy2)` rotated
    /// to the lab frame.
    pub fn with_correction(&self, dw: Centimeter, ds: Centimeter, sigx2: f64, sigy2: f64) -> Self {
        let (cosa, sina) = self.wire.frame();
        let (x_raw, y_raw) = self.raw_position();
        let x = (self.w + dw) * cosa + (self.s + ds) * sina;
        let y = -(self.w + dw) * sina + (self.s + ds) * cosa;
        let cross = (sigy2 - sigx2) * sina * cosa;
        Pseudopoint {
            x,
            y,
            dw,
            ds,
            w_x: dw * cosa,
            w_y: -dw * sina,
            s_x: ds * sina,
            s_y: ds * cosa,
            xcorr: x - x_raw,
            ycorr: y - y_raw,
            cov: PositionCovariance::new(
                sigx2 * cosa * cosa + sigy2 * sina * sina,
                cross,
                cross,
                sigx2 * sina * sina + sigy2 * cosa * cosa,
            ),
            ..self.clone()
        }
    }

    /// Write the outcome of a finalized segment back into the canonical record.
    pub fn merge_correction(&mut self, corrected: &Pseudopoint) {
        self.x = corrected.x;
        self.y = corrected.y;
        self.cov = corrected.cov;
        self.dw = corrected.dw;
        self.ds = corrected.ds;
        self.w_x = corrected.w_x;
        self.w_y = corrected.w_y;
        self.s_x = corrected.s_x;
        self.s_y = corrected.s_y;
        self.xcorr = corrected.xcorr;
        self.ycorr = corrected.ycorr;
        self.used_in_segment = true;
    }
}

/// Package holding a given layer: `(layer - 1) / planes_per_package`.
///
/// Return
/// ----------
/// * The 0-based package index, or [`FdcError::InvalidLayer`] if the layer is 0 or beyond the
///   last package.
pub fn package_index(
    layer: u32,
    planes_per_package: u32,
    num_packages: usize,
) -> Result<usize, FdcError> {
    if layer == 0 || planes_per_package == 0 {
        return Err(FdcError::InvalidLayer(layer));
    }
    let idx = ((layer - 1) / planes_per_package) as usize;
    if idx >= num_packages {
        return Err(FdcError::InvalidLayer(layer));
    }
    Ok(idx)
}

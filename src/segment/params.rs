//! # Segment finder parameters
//!
//! [`SegmentParams`] gathers every tunable of the segment finder: the clustering radius, the
//! synthetic beam-line point, the chamber resolutions used by the drift/Lorentz correction, the
//! mass hypothesis, the reference planes of the two fits and the package geometry. The
//! [`SegmentParamsBuilder`] validates the values once, at configuration time, so that the
//! per-event path never has to.
//!
//! ## Example
//!
//! ```rust,no_run
//! use fdc_segments::segment::params::SegmentParams;
//!
//! let params = SegmentParams::builder()
//!     .match_radius(4.0)
//!     .beam_variance(0.05)
//!     .build()
//!     .unwrap();
//! println!("{params:#}");
//! ```

use std::cmp::Ordering::{Equal, Greater};
use std::fmt;

use crate::{
    constants::{
        Centimeter, BEAM_VARIANCE, DRIFT_VELOCITY, FDC_X_RESOLUTION, FDC_Y_RESOLUTION,
        MATCH_RADIUS, MAX_DEFLECTION, NUM_PACKAGES, PION_MASS, PLANES_PER_PACKAGE, Z_TARGET,
    },
    fdc_errors::FdcError,
};

/// Shape of the Lorentz deflection table.
///
/// The table is sampled on `x_points` radii and `z_points` depths. The depth samples are split
/// in consecutive blocks of `package_z_points`, one per chamber package, and interpolation
/// along `z` never crosses a block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeflectionGrid {
    pub x_points: usize,
    pub z_points: usize,
    pub package_z_points: usize,
}

impl Default for DeflectionGrid {
    fn default() -> Self {
        DeflectionGrid {
            x_points: 21,
            z_points: 84,
            package_z_points: 21,
        }
    }
}

impl DeflectionGrid {
    /// Number of data rows expected in a deflection file.
    pub fn rows(&self) -> usize {
        self.x_points * self.z_points
    }
}

/// Configuration of the segment finder.
///
/// Fields
/// -----------------
/// * `match_radius` – transverse distance within which a hit of the next plane is chained (cm).
/// * `z_target` – `z` of the synthetic beam-line point (cm).
/// * `beam_variance` – variance of the beam-line point in both projections (cm²).
/// * `x_resolution` – resolution perpendicular to the wire after the drift correction (cm).
/// * `y_resolution` – resolution along the wire after the Lorentz correction (cm).
/// * `max_deflection` – largest along-wire deflection; sets the variance `max_deflection² / 3`
///   used when no deflection table is available (cm).
/// * `drift_velocity` – electron drift velocity (cm/ns).
/// * `pion_mass` – mass hypothesis for the time-of-flight and scattering estimates (GeV/c²).
/// * `min_hits` – smallest number of hits of a segment candidate.
/// * `hit_based_ref_plane`, `time_based_ref_plane` – index, within the segment, of the hit the
///   helix is propagated from in the first and second fit.
/// * `planes_per_package`, `num_packages` – chamber geometry.
/// * `deflection_grid` – shape of the Lorentz deflection table.
///
/// Defaults
/// -----------------
/// * `match_radius`: 5.0 cm
/// * `z_target`: 65.0 cm
/// * `beam_variance`: 0.1 cm²
/// * `x_resolution`, `y_resolution`: 0.02 cm
/// * `max_deflection`: 0.15 cm
/// * `drift_velocity`: 55e-4 cm/ns
/// * `pion_mass`: 0.140 GeV/c²
/// * `min_hits`: 3
/// * `hit_based_ref_plane`: 2, `time_based_ref_plane`: 0
/// * `planes_per_package`: 6, `num_packages`: 4
/// * `deflection_grid`: 21 × 84, blocks of 21
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentParams {
    // --- Clustering ---
    pub match_radius: Centimeter,
    pub min_hits: usize,

    // --- Beam-line constraint ---
    pub z_target: Centimeter,
    pub beam_variance: f64,

    // --- Drift / Lorentz correction ---
    pub x_resolution: Centimeter,
    pub y_resolution: Centimeter,
    pub max_deflection: Centimeter,
    pub drift_velocity: f64,
    pub pion_mass: f64,
    pub deflection_grid: DeflectionGrid,

    // --- Fit sequence ---
    pub hit_based_ref_plane: usize,
    pub time_based_ref_plane: usize,

    // --- Geometry ---
    pub planes_per_package: u32,
    pub num_packages: usize,
}

impl SegmentParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent builder starting from the defaults.
    pub fn builder() -> SegmentParamsBuilder {
        SegmentParamsBuilder::new()
    }

    /// Variance along the wire when the Lorentz deflection is not corrected.
    pub fn uncorrected_along_wire_variance(&self) -> f64 {
        self.max_deflection * self.max_deflection / 3.0
    }
}

impl Default for SegmentParams {
    fn default() -> Self {
        SegmentParams {
            match_radius: MATCH_RADIUS,
            min_hits: 3,
            z_target: Z_TARGET,
            beam_variance: BEAM_VARIANCE,
            x_resolution: FDC_X_RESOLUTION,
            y_resolution: FDC_Y_RESOLUTION,
            max_deflection: MAX_DEFLECTION,
            drift_velocity: DRIFT_VELOCITY,
            pion_mass: PION_MASS,
            deflection_grid: DeflectionGrid::default(),
            hit_based_ref_plane: 2,
            time_based_ref_plane: 0,
            planes_per_package: PLANES_PER_PACKAGE,
            num_packages: NUM_PACKAGES,
        }
    }
}

/// Builder for [`SegmentParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct SegmentParamsBuilder {
    params: SegmentParams,
}

impl SegmentParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: SegmentParams::default(),
        }
    }

    pub fn match_radius(mut self, v: Centimeter) -> Self {
        self.params.match_radius = v;
        self
    }
    pub fn min_hits(mut self, v: usize) -> Self {
        self.params.min_hits = v;
        self
    }
    pub fn z_target(mut self, v: Centimeter) -> Self {
        self.params.z_target = v;
        self
    }
    pub fn beam_variance(mut self, v: f64) -> Self {
        self.params.beam_variance = v;
        self
    }
    pub fn x_resolution(mut self, v: Centimeter) -> Self {
        self.params.x_resolution = v;
        self
    }
    pub fn y_resolution(mut self, v: Centimeter) -> Self {
        self.params.y_resolution = v;
        self
    }
    pub fn max_deflection(mut self, v: Centimeter) -> Self {
        self.params.max_deflection = v;
        self
    }
    pub fn drift_velocity(mut self, v: f64) -> Self {
        self.params.drift_velocity = v;
        self
    }
    pub fn pion_mass(mut self, v: f64) -> Self {
        self.params.pion_mass = v;
        self
    }
    pub fn deflection_grid(mut self, v: DeflectionGrid) -> Self {
        self.params.deflection_grid = v;
        self
    }
    pub fn hit_based_ref_plane(mut self, v: usize) -> Self {
        self.params.hit_based_ref_plane = v;
        self
    }
    pub fn time_based_ref_plane(mut self, v: usize) -> Self {
        self.params.time_based_ref_plane = v;
        self
    }
    pub fn planes_per_package(mut self, v: u32) -> Self {
        self.params.planes_per_package = v;
        self
    }
    pub fn num_packages(mut self, v: usize) -> Self {
        self.params.num_packages = v;
        self
    }

    /// Return true iff x > 0.0 (NaN is invalid).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Return true iff x >= 0.0 (NaN is invalid).
    #[inline]
    fn ge0(x: f64) -> bool {
        matches!(x.partial_cmp(&0.0), Some(Greater) | Some(Equal))
    }

    /// Validate and produce the [`SegmentParams`].
    ///
    /// Validation rules
    /// -----------------
    /// * `match_radius`, `beam_variance`, `x_resolution`, `y_resolution`, `drift_velocity` > 0.
    /// * `max_deflection`, `pion_mass` ≥ 0.
    /// * `z_target` finite.
    /// * `min_hits ≥ 3` – a circle needs three points.
    /// * `planes_per_package ≥ 1`, `num_packages ≥ 1`.
    /// * `deflection_grid`: `x_points ≥ 2`, `package_z_points ≥ 2`, and `z_points` a positive
    ///   multiple of `package_z_points`.
    ///
    /// Return
    /// ----------
    /// * `Ok(SegmentParams)`, or [`FdcError::InvalidSegmentParameter`] naming the first rule
    ///   that fails.
    pub fn build(self) -> Result<SegmentParams, FdcError> {
        let p = &self.params;

        let positive = [
            ("match_radius", p.match_radius),
            ("beam_variance", p.beam_variance),
            ("x_resolution", p.x_resolution),
            ("y_resolution", p.y_resolution),
            ("drift_velocity", p.drift_velocity),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| !Self::gt0(*v)) {
            return Err(FdcError::InvalidSegmentParameter(format!(
                "{name} must be > 0"
            )));
        }
        if !Self::ge0(p.max_deflection) {
            return Err(FdcError::InvalidSegmentParameter(
                "max_deflection must be >= 0".into(),
            ));
        }
        if !Self::ge0(p.pion_mass) {
            return Err(FdcError::InvalidSegmentParameter(
                "pion_mass must be >= 0".into(),
            ));
        }
        if !p.z_target.is_finite() {
            return Err(FdcError::InvalidSegmentParameter(
                "z_target must be finite".into(),
            ));
        }
        if p.min_hits < 3 {
            return Err(FdcError::InvalidSegmentParameter(
                "min_hits must be >= 3".into(),
            ));
        }
        if p.planes_per_package == 0 || p.num_packages == 0 {
            return Err(FdcError::InvalidSegmentParameter(
                "planes_per_package and num_packages must be >= 1".into(),
            ));
        }

        let grid = &p.deflection_grid;
        if grid.x_points < 2 || grid.package_z_points < 2 {
            return Err(FdcError::InvalidSegmentParameter(
                "deflection grid needs at least 2 points per axis".into(),
            ));
        }
        if grid.z_points == 0 || grid.z_points % grid.package_z_points != 0 {
            return Err(FdcError::InvalidSegmentParameter(format!(
                "deflection grid z_points ({}) must be a multiple of package_z_points ({})",
                grid.z_points, grid.package_z_points
            )));
        }

        Ok(self.params)
    }
}

impl fmt::Display for SegmentParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "FDC Segment Finder Parameters")?;
            writeln!(f, "-----------------------------")?;
            writeln!(f, "[Clustering]")?;
            writeln!(f, "  match_radius         = {:.3} cm", self.match_radius)?;
            writeln!(f, "  min_hits             = {}", self.min_hits)?;
            writeln!(f, "[Beam-line point]")?;
            writeln!(f, "  z_target             = {:.3} cm", self.z_target)?;
            writeln!(f, "  beam_variance        = {:.3} cm^2", self.beam_variance)?;
            writeln!(f, "[Drift / Lorentz correction]")?;
            writeln!(f, "  x_resolution         = {:.4} cm", self.x_resolution)?;
            writeln!(f, "  y_resolution         = {:.4} cm", self.y_resolution)?;
            writeln!(f, "  max_deflection       = {:.4} cm", self.max_deflection)?;
            writeln!(f, "  drift_velocity       = {:.2e} cm/ns", self.drift_velocity)?;
            writeln!(f, "  pion_mass            = {:.4} GeV", self.pion_mass)?;
            writeln!(
                f,
                "  deflection_grid      = {} x {} (blocks of {})",
                self.deflection_grid.x_points,
                self.deflection_grid.z_points,
                self.deflection_grid.package_z_points
            )?;
            writeln!(f, "[Fit sequence]")?;
            writeln!(f, "  hit_based_ref_plane  = {}", self.hit_based_ref_plane)?;
            writeln!(f, "  time_based_ref_plane = {}", self.time_based_ref_plane)?;
            writeln!(f, "[Geometry]")?;
            writeln!(f, "  planes_per_package   = {}", self.planes_per_package)?;
            write!(f, "  num_packages         = {}", self.num_packages)
        } else {
            write!(
                f,
                "SegmentParams(match_radius={:.2} cm, z_target={:.1} cm, beam_var={:.3}, \
                 min_hits={}, ref_planes={}/{}, packages={}x{})",
                self.match_radius,
                self.z_target,
                self.beam_variance,
                self.min_hits,
                self.hit_based_ref_plane,
                self.time_based_ref_plane,
                self.num_packages,
                self.planes_per_package
            )
        }
    }
}

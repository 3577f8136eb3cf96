//! # Constants and type definitions for the FDC segment finder
//!
//! This module centralizes the **physical constants**, **detector constants**, and **common type
//! definitions** used throughout the crate.
//!
//! ## Overview
//!
//! - Kinematic constants (speed of light, pion mass, Highland coefficients)
//! - Default detector geometry and resolution figures of the forward drift chambers
//! - The material stack traversed by a track between two chamber planes
//! - Core type aliases (units, helix state vector and covariance)
//!
//! Units are the usual ones of the reconstruction: centimeters, nanoseconds, Tesla and GeV/c.

use nalgebra::{Matrix2, Matrix5, Vector5};

// -------------------------------------------------------------------------------------------------
// Physical constants
// -------------------------------------------------------------------------------------------------

/// Speed of light in cm/ns
pub const SPEED_OF_LIGHT: f64 = 29.98;

/// Charged pion mass in GeV/c², the default mass hypothesis
pub const PION_MASS: f64 = 0.140;

/// Conversion factor from `B [T] · r [cm]` to transverse momentum in GeV/c
pub const MOMENTUM_FACTOR: f64 = 0.002998;

/// Highland multiple-scattering scale (GeV)
pub const HIGHLAND_SCALE: f64 = 0.0136;

/// Highland logarithmic correction coefficient
pub const HIGHLAND_LOG_COEFF: f64 = 0.038;

/// Numerical epsilon used to keep trigonometric denominators away from zero
pub const EPS: f64 = 1e-8;

// -------------------------------------------------------------------------------------------------
// Detector defaults
// -------------------------------------------------------------------------------------------------

/// z position of the target center (cm)
pub const Z_TARGET: f64 = 65.0;

/// Variance assigned to the synthetic beam-line point (cm²)
pub const BEAM_VARIANCE: f64 = 0.1;

/// Transverse distance within which hits of consecutive planes are chained (cm)
pub const MATCH_RADIUS: f64 = 5.0;

/// Resolution perpendicular to the wire (cm)
pub const FDC_X_RESOLUTION: f64 = 0.02;

/// Resolution along the wire once the Lorentz deflection is corrected (cm)
pub const FDC_Y_RESOLUTION: f64 = 0.02;

/// Largest Lorentz deflection along the wire (cm); sets the uncorrected variance
pub const MAX_DEFLECTION: f64 = 0.15;

/// Electron drift velocity (cm/ns)
pub const DRIFT_VELOCITY: f64 = 55e-4;

/// Number of wire planes in one chamber package
pub const PLANES_PER_PACKAGE: u32 = 6;

/// Number of chamber packages
pub const NUM_PACKAGES: usize = 4;

/// χ² assigned to a segment that never received a successful fit
pub const UNFIT_CHISQ: f64 = 1.0e8;

// -------------------------------------------------------------------------------------------------
// Material stack
// -------------------------------------------------------------------------------------------------

/// One layer of material crossed between two wire planes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Thickness (cm)
    pub thickness: f64,
    /// Density (g/cm³)
    pub density: f64,
    /// Radiation length (g/cm²)
    pub radiation_length: f64,
}

impl Material {
    const fn new(thickness: f64, density: f64, radiation_length: f64) -> Self {
        Material {
            thickness,
            density,
            radiation_length,
        }
    }

    /// Thickness in units of radiation length.
    pub fn radiation_lengths(&self) -> f64 {
        self.thickness * self.density / self.radiation_length
    }
}

/// Copper, Kapton, Mylar, air, argon and CO2: the stack seen by the Riemann fit.
pub const CHAMBER_MATERIALS: [Material; 6] = [
    Material::new(4e-4, 8.96, 12.86),
    Material::new(50e-4, 1.42, 40.56),
    Material::new(13e-4, 1.39, 39.95),
    Material::new(1.0, 1.2931e-3, 36.66),
    Material::new(0.4, 1.782e-3, 19.55),
    Material::new(0.6, 1.977e-3, 36.2),
];

/// The chamber stack plus the Rohacell support, used by the Kalman filter.
pub const CHAMBER_MATERIALS_WITH_SUPPORT: [Material; 7] = [
    Material::new(4e-4, 8.96, 12.86),
    Material::new(50e-4, 1.42, 40.56),
    Material::new(13e-4, 1.39, 39.95),
    Material::new(1.0, 1.2931e-3, 36.66),
    Material::new(0.4, 1.782e-3, 19.55),
    Material::new(0.6, 1.977e-3, 36.2),
    Material::new(0.9894, 0.032, 41.04),
];

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Length in centimeters
pub type Centimeter = f64;
/// Time in nanoseconds
pub type Nanosecond = f64;
/// Angle in radians
pub type Radian = f64;
/// Magnetic field in Tesla
pub type Tesla = f64;

/// Helix state vector `(κ, φ₀, D, tanλ, z₀)`
pub type StateVector = Vector5<f64>;

/// Covariance of a [`StateVector`]
pub type StateCovariance = Matrix5<f64>;

/// Covariance of a transverse `(x, y)` measurement
pub type PositionCovariance = Matrix2<f64>;

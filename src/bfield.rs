//! # Magnetic field service
//!
//! The field map itself lives outside this crate; the fit only needs the field vector at
//! arbitrary points, many times per iteration. [`MagneticField`] is the seam through which a
//! map is injected, and [`UniformField`] is the trivial implementation used for tests and for
//! quick studies with an ideal solenoid.
//!
//! The helpers [`momentum_estimate`] and [`pion_beta`] turn a fitted radius of
//! curvature into the momentum and velocity estimates needed by the multiple-scattering and
//! time-of-flight corrections.

use nalgebra::Vector3;

use crate::constants::{Centimeter, Tesla, MOMENTUM_FACTOR};

/// Field lookup returning `(Bx, By, Bz)` in Tesla at a point given in cm.
///
/// Implementations must be callable concurrently from the per-package workers.
pub trait MagneticField: Send + Sync {
    fn field(&self, x: Centimeter, y: Centimeter, z: Centimeter) -> Vector3<Tesla>;

    /// Magnitude of the field at the given point.
    fn magnitude(&self, x: Centimeter, y: Centimeter, z: Centimeter) -> Tesla {
        self.field(x, y, z).norm()
    }
}

/// A field that is the same everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UniformField {
    pub b: Vector3<Tesla>,
}

impl UniformField {
    /// Solenoidal field along the beam axis.
    pub fn along_z(bz: Tesla) -> Self {
        UniformField {
            b: Vector3::new(0.0, 0.0, bz),
        }
    }
}

impl MagneticField for UniformField {
    fn field(&self, _x: Centimeter, _y: Centimeter, _z: Centimeter) -> Vector3<Tesla> {
        self.b
    }
}

/// Total momentum (GeV/c) of a helix of radius `rc` in a field `b`, given `cos λ`.
pub fn momentum_estimate(b: Tesla, rc: Centimeter, cos_lambda: f64) -> f64 {
    MOMENTUM_FACTOR * b * rc / cos_lambda
}

/// Velocity `β = p / E` for a particle of momentum `p` and mass `mass`.
///
/// A non-positive or non-finite momentum carries no information; the particle is then treated
/// as ultra-relativistic (`β = 1`).
pub fn pion_beta(p: f64, mass: f64) -> f64 {
    if !(p > 0.0) || !p.is_finite() {
        return 1.0;
    }
    p / (p * p + mass * mass).sqrt()
}

#[cfg(test)]
mod bfield_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_field() {
        let field = UniformField::along_z(2.0);
        assert_eq!(field.field(1.0, -3.0, 200.0), Vector3::new(0.0, 0.0, 2.0));
        assert_relative_eq!(field.magnitude(0.0, 0.0, 0.0), 2.0);
    }

    #[test]
    fn test_momentum_and_beta() {
        // 1 GeV/c transverse momentum in 2 T has a radius of ~166.8 cm.
        let p = momentum_estimate(2.0, 166.778, 1.0);
        assert_relative_eq!(p, 1.0, epsilon = 1e-4);
        assert_relative_eq!(pion_beta(p, 0.14), 0.99035, epsilon = 1e-4);
        assert_eq!(pion_beta(0.0, 0.14), 1.0);
        assert_eq!(pion_beta(f64::NAN, 0.14), 1.0);
    }
}

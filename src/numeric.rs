//! # Numeric primitives
//!
//! Small, allocation-light helpers shared by the Riemann fit, the covariance propagation and
//! the Lorentz correction:
//!
//! * [`try_invert`] – checked inversion of a measurement covariance (LU based),
//! * [`locate`] / [`polint`] – bracketing search and Neville polynomial interpolation on an
//!   irregular lookup table,
//! * [`cubic_roots`] – the three real roots of the characteristic polynomial of a symmetric
//!   `3×3` matrix, by the trigonometric (DeMoivre) closed form,
//! * [`smallest_eigenpair`] – the smallest eigenvalue of a symmetric `3×3` matrix and its unit
//!   eigenvector.
//!
//! Everything else (products, transposes, determinants) is taken directly from `nalgebra`.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};

use crate::fdc_errors::FdcError;

/// Scale applied to `Q` and `R` of the cubic so that `Q³ + R²` does not overflow.
const CUBIC_Q_SCALE: f64 = 1.0e4;
const CUBIC_R_SCALE: f64 = 1.0e6;

/// Invert a square covariance matrix, failing on singular or non-finite input.
///
/// Arguments
/// -----------------
/// * `m`: the matrix to invert (typically the `RΦ` covariance of a fit).
///
/// Return
/// ----------
/// * The inverse, or [`FdcError::SingularMatrix`] if the LU decomposition cannot be inverted
///   or produces non-finite entries.
pub fn try_invert(m: &DMatrix<f64>) -> Result<DMatrix<f64>, FdcError> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(FdcError::SingularMatrix);
    }
    let inverse = m
        .clone()
        .lu()
        .try_inverse()
        .ok_or(FdcError::SingularMatrix)?;
    if inverse.iter().any(|v| !v.is_finite()) {
        return Err(FdcError::SingularMatrix);
    }
    Ok(inverse)
}

/// Locate `x` in the monotonic table `xx`.
///
/// Returns `j` such that `x` lies between `xx[j]` and `xx[j + 1]`. Values outside the table are
/// clamped to the first or last interval so that the result can always be used as the start of
/// an interpolation stencil. Both ascending and descending tables are accepted.
pub fn locate(xx: &[f64], x: f64) -> usize {
    let n = xx.len();
    if n < 2 {
        return 0;
    }
    let ascending = xx[n - 1] >= xx[0];
    let mut jl: isize = -1;
    let mut ju: isize = n as isize;
    while ju - jl > 1 {
        let jm = (ju + jl) >> 1;
        if (x >= xx[jm as usize]) == ascending {
            jl = jm;
        } else {
            ju = jm;
        }
    }
    if x == xx[0] {
        0
    } else if x == xx[n - 1] {
        n - 2
    } else {
        jl.clamp(0, n as isize - 2) as usize
    }
}

/// Polynomial interpolation through all the points `(xa[i], ya[i])` (Neville's algorithm).
///
/// Return
/// ----------
/// * `(y, dy)`: the interpolated value at `x` and the last correction applied, which serves as
///   an error estimate.
/// * [`FdcError::ValueOutOfRange`] if two abscissae coincide or the slices are empty or of
///   different length.
pub fn polint(xa: &[f64], ya: &[f64], x: f64) -> Result<(f64, f64), FdcError> {
    let n = xa.len();
    if n == 0 || ya.len() != n {
        return Err(FdcError::ValueOutOfRange(format!(
            "polint needs matching non-empty tables, got {} and {} points",
            n,
            ya.len()
        )));
    }

    let mut ns = 0usize;
    let mut dif = (x - xa[0]).abs();
    for (i, xi) in xa.iter().enumerate() {
        let dift = (x - xi).abs();
        if dift < dif {
            ns = i;
            dif = dift;
        }
    }
    let mut c = ya.to_vec();
    let mut d = ya.to_vec();

    let mut y = ya[ns];
    let mut dy = 0.0;
    // Position in the Neville tableau, one to the left of the closest abscissa.
    let mut ns = ns as isize - 1;

    for m in 1..n {
        for i in 0..n - m {
            let ho = xa[i] - x;
            let hp = xa[i + m] - x;
            let w = c[i + 1] - d[i];
            let den = ho - hp;
            if den == 0.0 {
                return Err(FdcError::ValueOutOfRange(format!(
                    "polint: coincident abscissae at {}",
                    xa[i]
                )));
            }
            let den = w / den;
            d[i] = hp * den;
            c[i] = ho * den;
        }
        dy = if 2 * (ns + 1) < (n - m) as isize {
            c[(ns + 1) as usize]
        } else {
            let v = d[ns as usize];
            ns -= 1;
            v
        };
        y += dy;
    }
    Ok((y, dy))
}

/// Real roots of `λ³ + b2·λ² + b1·λ + b0 = 0` when all three are real.
///
/// The closed form uses DeMoivre's theorem on `S = (R + i√(-(Q³+R²)))^(1/3)`. `Q` and `R` are
/// divided by fixed factors before being cubed/squared so that the intermediate products stay
/// in range for the large moments produced by the Riemann fit.
///
/// Return
/// ----------
/// * The three roots (unordered), or [`FdcError::ValueOutOfRange`] when the discriminant
///   `Q³ + R²` is not strictly negative, i.e. no configuration of three distinct real roots.
pub fn cubic_roots(b2: f64, b1: f64, b0: f64) -> Result<[f64; 3], FdcError> {
    let q = (3.0 * b1 - b2 * b2) / (9.0 * CUBIC_Q_SCALE);
    let r = (9.0 * b2 * b1 - 27.0 * b0 - 2.0 * b2 * b2 * b2) / (54.0 * CUBIC_R_SCALE);
    let q1 = q * q * q + r * r;
    if !(q1 < 0.0) {
        return Err(FdcError::ValueOutOfRange(format!(
            "cubic discriminant {q1:e} is not negative"
        )));
    }
    let q1 = (-q1).sqrt();

    let modulus = CUBIC_Q_SCALE.sqrt() * (r * r + q1 * q1).powf(1.0 / 6.0);
    let theta = q1.atan2(r) / 3.0;
    let sum = 2.0 * modulus * theta.cos();
    let diff = -2.0 * modulus * theta.sin();
    let shift = -b2 / 3.0;
    let half_sqrt3 = 3f64.sqrt() / 2.0;

    Ok([
        shift + sum,
        shift - sum / 2.0 - half_sqrt3 * diff,
        shift - sum / 2.0 + half_sqrt3 * diff,
    ])
}

/// Smallest eigenvalue of the symmetric matrix `a` and its unit eigenvector.
///
/// The pair comes from the symmetric eigen-decomposition of `a`. The eigenvalue returned is the
/// Rayleigh quotient `nᵀ·A·n` of the normalized vector, which stays at rounding level for a
/// matrix that is singular up to noise. The sign is fixed so that the first non-zero component
/// is positive.
///
/// Return
/// ----------
/// * `(λ, n)`, or [`FdcError::DegenerateEigenvector`] if no finite direction exists.
pub fn smallest_eigenpair(a: &Matrix3<f64>) -> Result<(f64, Vector3<f64>), FdcError> {
    if a.iter().any(|v| !v.is_finite()) {
        return Err(FdcError::DegenerateEigenvector);
    }
    let eigen = SymmetricEigen::new(*a);
    let (idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|(_, u), (_, v)| u.total_cmp(v))
        .ok_or(FdcError::DegenerateEigenvector)?;
    let mut normal: Vector3<f64> = eigen.eigenvectors.column(idx).into_owned();

    let norm = normal.norm();
    if !norm.is_finite() || norm == 0.0 {
        return Err(FdcError::DegenerateEigenvector);
    }
    normal /= norm;
    if let Some(first) = normal.iter().copied().find(|v| *v != 0.0) {
        if first < 0.0 {
            normal = -normal;
        }
    }
    let lambda = normal.dot(&(a * normal));
    Ok((lambda, normal))
}

#[cfg(test)]
mod numeric_tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_locate_inside_and_clamped() {
        let xx = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(locate(&xx, 2.5), 2);
        assert_eq!(locate(&xx, 0.0), 0);
        assert_eq!(locate(&xx, 4.0), 3);
        assert_eq!(locate(&xx, -1.0), 0);
        assert_eq!(locate(&xx, 10.0), 3);

        let descending = [4.0, 3.0, 2.0, 1.0];
        assert_eq!(locate(&descending, 2.5), 1);
    }

    #[test]
    fn test_polint_reproduces_polynomial() {
        // A cubic is reproduced exactly by a four point stencil.
        let xa = [0.0, 1.5, 2.0, 4.0];
        let f = |x: f64| 2.0 * x * x * x - x * x + 0.5 * x - 3.0;
        let ya: Vec<f64> = xa.iter().map(|&x| f(x)).collect();
        for x in [0.3, 1.0, 2.7, 3.9, 5.0] {
            let (y, _) = polint(&xa, &ya, x).unwrap();
            assert_relative_eq!(y, f(x), epsilon = 1e-10);
        }
    }

    #[test]
    fn test_polint_rejects_duplicate_abscissae() {
        let xa = [0.0, 1.0, 1.0];
        let ya = [1.0, 2.0, 3.0];
        assert!(matches!(
            polint(&xa, &ya, 0.5),
            Err(FdcError::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn test_cubic_roots_known_polynomial() {
        // (λ-1)(λ-2)(λ-3) = λ³ - 6λ² + 11λ - 6
        let mut roots = cubic_roots(-6.0, 11.0, -6.0).unwrap();
        roots.sort_by(f64::total_cmp);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(roots[1], 2.0, epsilon = 1e-9);
        assert_relative_eq!(roots[2], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cubic_roots_complex_pair_is_out_of_range() {
        // λ³ + λ = 0 has a pair of imaginary roots.
        assert!(matches!(
            cubic_roots(0.0, 1.0, 0.0),
            Err(FdcError::ValueOutOfRange(_))
        ));
    }

    #[test]
    fn test_smallest_eigenpair_of_diagonal_matrix() {
        let a = Matrix3::new(3.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 2.0);
        let (lambda, n) = smallest_eigenpair(&a).unwrap();
        assert_relative_eq!(lambda, 1.0, epsilon = 1e-12);
        assert_relative_eq!(n, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_smallest_eigenpair_of_ill_conditioned_matrix() {
        // Rank-2 matrix with entries spanning eight orders of magnitude and a known null vector.
        let u = Vector3::new(1.0e3, 2.0, 1.0);
        let v = Vector3::new(-3.0, 1.0, 2.0e4);
        let a = u * u.transpose() * 1.0e2 + v * v.transpose();
        let expected = u.cross(&v).normalize();

        let (lambda, n) = smallest_eigenpair(&a).unwrap();
        assert!(lambda.abs() < 1e-6 * a.norm(), "lambda = {lambda}");
        assert_relative_eq!(n.dot(&expected).abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_smallest_eigenpair_rejects_non_finite() {
        let a = Matrix3::from_element(f64::NAN);
        assert_eq!(smallest_eigenpair(&a), Err(FdcError::DegenerateEigenvector));
    }

    #[test]
    fn test_try_invert_singular() {
        let zeros = DMatrix::<f64>::zeros(3, 3);
        assert_eq!(try_invert(&zeros), Err(FdcError::SingularMatrix));

        let diag = DMatrix::from_diagonal_element(3, 3, 4.0);
        let inv = try_invert(&diag).unwrap();
        assert_relative_eq!(inv[(1, 1)], 0.25, epsilon = 1e-15);
    }
}

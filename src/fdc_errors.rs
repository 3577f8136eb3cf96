use thiserror::Error;

#[derive(Error, Debug)]
pub enum FdcError {
    #[error("Measurement covariance matrix is singular (cannot be inverted)")]
    SingularMatrix,

    #[error("Value out of range: {0}")]
    ValueOutOfRange(String),

    #[error("Unable to compute a finite normal vector for the Riemann plane")]
    DegenerateEigenvector,

    #[error("Not enough hits to define a circle: found {found}, need at least {required}")]
    InsufficientHits { found: usize, required: usize },

    #[error("Wire layer {0} does not belong to any chamber package")]
    InvalidLayer(u32),

    #[error("Lorentz deflection file not found at: {0}")]
    DeflectionTableNotFound(String),

    #[error("Error during the deflection table parsing: {0}")]
    DeflectionTableParse(String),

    #[error("Deflection table has {found} rows, expected {expected}")]
    DeflectionTableShape { expected: usize, found: usize },

    #[error("Unable to perform file operation: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid segment parameter: {0}")]
    InvalidSegmentParameter(String),
}

impl PartialEq for FdcError {
    fn eq(&self, other: &Self) -> bool {
        use FdcError::*;
        match (self, other) {
            (ValueOutOfRange(a), ValueOutOfRange(b)) => a == b,
            (
                InsufficientHits {
                    found: a,
                    required: b,
                },
                InsufficientHits {
                    found: c,
                    required: d,
                },
            ) => a == c && b == d,
            (InvalidLayer(a), InvalidLayer(b)) => a == b,
            (DeflectionTableNotFound(a), DeflectionTableNotFound(b)) => a == b,
            (DeflectionTableParse(a), DeflectionTableParse(b)) => a == b,
            (
                DeflectionTableShape {
                    expected: a,
                    found: b,
                },
                DeflectionTableShape {
                    expected: c,
                    found: d,
                },
            ) => a == c && b == d,
            (InvalidSegmentParameter(a), InvalidSegmentParameter(b)) => a == b,

            // I/O errors are not comparable: equal when the variant matches
            (IoError(_), IoError(_)) => true,

            (SingularMatrix, SingularMatrix) => true,
            (DegenerateEigenvector, DegenerateEigenvector) => true,

            _ => false,
        }
    }
}

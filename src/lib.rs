pub mod bfield;
pub mod constants;
pub mod diagnostics;
pub mod fdc;
pub mod fdc_errors;
pub mod hits;
pub mod kalman;
pub mod lorentz;
pub mod numeric;
pub mod riemann;
pub mod segment;

//! # Run-scoped diagnostics
//!
//! Collects the "tell me once" warnings of a reconstruction run. A [`Diagnostics`] value is
//! owned by the [`FdcSegmentFinder`](crate::fdc::FdcSegmentFinder) and shared by reference with
//! the per-package workers, so its state is scoped to the run instead of the process and is
//! safe to hit concurrently.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use log::warn;

use crate::fdc_errors::FdcError;

#[derive(Debug, Default)]
pub struct Diagnostics {
    missing_deflection_warned: AtomicBool,
    unusable_deflection_warned: AtomicBool,
    warnings_emitted: AtomicUsize,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report that along-wire positions are left uncorrected because no deflection table was
    /// loaded. Only the first call logs.
    ///
    /// Return
    /// ----------
    /// * `true` if this call emitted the warning.
    pub fn warn_missing_deflection_table(&self) -> bool {
        if self
            .missing_deflection_warned
            .swap(true, Ordering::AcqRel)
        {
            return false;
        }
        self.warnings_emitted.fetch_add(1, Ordering::Relaxed);
        warn!(
            "No Lorentz deflection table found: \
             pseudopoints will not be corrected for the Lorentz effect"
        );
        true
    }

    /// Report that the deflection table could not be used because loading it failed with
    /// `error`. Only the first call logs.
    pub fn warn_unusable_deflection_table(&self, error: &FdcError) -> bool {
        if self
            .unusable_deflection_warned
            .swap(true, Ordering::AcqRel)
        {
            return false;
        }
        self.warnings_emitted.fetch_add(1, Ordering::Relaxed);
        warn!("Deflection table unusable, along-wire positions left uncorrected: {error}");
        true
    }

    /// Number of warnings emitted since the run started.
    pub fn warnings_emitted(&self) -> usize {
        self.warnings_emitted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod diagnostics_tests {
    use super::*;

    #[test]
    fn test_missing_table_warns_once() {
        let diag = Diagnostics::new();
        assert!(diag.warn_missing_deflection_table());
        for _ in 0..10 {
            assert!(!diag.warn_missing_deflection_table());
        }
        assert_eq!(diag.warnings_emitted(), 1);
    }

    #[test]
    fn test_each_warning_fires_once() {
        let diag = Diagnostics::new();
        let error = FdcError::DeflectionTableParse("line 2: expected 6 columns".into());
        assert!(diag.warn_unusable_deflection_table(&error));
        assert!(!diag.warn_unusable_deflection_table(&error));
        assert!(diag.warn_missing_deflection_table());
        assert_eq!(diag.warnings_emitted(), 2);
    }

    #[test]
    fn test_concurrent_warnings() {
        use rayon::prelude::*;

        let diag = Diagnostics::new();
        let fired = (0..256)
            .into_par_iter()
            .filter(|_| diag.warn_missing_deflection_table())
            .count();
        assert_eq!(fired, 1);
        assert_eq!(diag.warnings_emitted(), 1);
    }
}

//! # FDC segment finder: run and event surface
//!
//! [`FdcSegmentFinder`] is the entry point of the crate. It wires together:
//!
//! 1. **Magnetic field** – an injected [`MagneticField`] service, shared with the workers.
//! 2. **Configuration** – a validated [`SegmentParams`].
//! 3. **Lorentz deflection table** – read from disk once per run, on [`begin_run`] or on the
//!    first event, and cached in a [`OnceCell`]. A failed load is cached as well.
//! 4. **Run diagnostics** – the warn-once state of the run ([`Diagnostics`]).
//!
//! ## Event processing
//!
//! [`find_segments`] splits the hits of an event into chamber packages with
//! [`package_index`], sorts every package most downstream first and runs the
//! [`SegmentFinder`] of each package on its own rayon worker. Each worker owns a copy of the
//! hits of its package; the copies, with their used flags and final corrections, are written
//! back into the caller's slice once all packages are done. Segments are returned in package
//! order, then seed order.
//!
//! ## Typical usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fdc_segments::{
//!     bfield::UniformField, fdc::FdcSegmentFinder, hits::Pseudopoint,
//!     segment::params::SegmentParams,
//! };
//!
//! let field = Arc::new(UniformField::along_z(2.0));
//! let finder = FdcSegmentFinder::new(field, SegmentParams::default())
//!     .with_deflection_file("fdc_deflections.dat");
//! finder.begin_run().unwrap();
//!
//! let mut hits: Vec<Pseudopoint> = Vec::new(); // pseudopoints of one event
//! for segment in finder.find_segments(&mut hits) {
//!     println!("{segment}");
//! }
//! ```
//!
//! ## See also
//! ------------
//! * [`SegmentFinder`] – clustering and fit sequence of one package.
//! * [`DeflectionTable`] – file format of the deflection table.
//!
//! [`begin_run`]: FdcSegmentFinder::begin_run
//! [`find_segments`]: FdcSegmentFinder::find_segments

use std::cmp::Reverse;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, warn};
use once_cell::sync::OnceCell;
use rayon::prelude::*;

use crate::{
    bfield::MagneticField,
    diagnostics::Diagnostics,
    fdc_errors::FdcError,
    hits::{package_index, Pseudopoint},
    lorentz::DeflectionTable,
    segment::{finder::SegmentFinder, params::SegmentParams, Segment},
};

/// Hits of one package: the working copies and where they came from in the event.
#[derive(Debug, Default)]
struct PackageHits {
    slots: Vec<usize>,
    points: Vec<Pseudopoint>,
}

pub struct FdcSegmentFinder {
    field: Arc<dyn MagneticField>,
    params: SegmentParams,
    deflection_path: Option<Utf8PathBuf>,
    table: OnceCell<Result<Option<DeflectionTable>, FdcError>>,
    diagnostics: Diagnostics,
}

impl FdcSegmentFinder {
    /// Construct a finder without a deflection table.
    ///
    /// Arguments
    /// -----------------
    /// * `field`: magnetic field service.
    /// * `params`: validated configuration, see [`SegmentParams::builder`].
    pub fn new(field: Arc<dyn MagneticField>, params: SegmentParams) -> Self {
        FdcSegmentFinder {
            field,
            params,
            deflection_path: None,
            table: OnceCell::new(),
            diagnostics: Diagnostics::new(),
        }
    }

    /// Read the Lorentz deflection table from `path` at the start of the run.
    pub fn with_deflection_file(mut self, path: impl AsRef<Utf8Path>) -> Self {
        self.deflection_path = Some(path.as_ref().to_owned());
        self
    }

    pub fn params(&self) -> &SegmentParams {
        &self.params
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Load the run resources.
    ///
    /// The deflection table is read on the first call only, whatever its outcome: a malformed
    /// file is not read again on later events. A missing file is not an error: the along-wire
    /// coordinates are then left uncorrected and a warning is logged once.
    ///
    /// Return
    /// ----------
    /// * The table, `None` if no file is configured or found, or the parsing error of a
    ///   malformed file.
    ///
    /// See also
    /// ------------
    /// * [`DeflectionTable::from_file`] – Reader and format checks.
    pub fn begin_run(&self) -> Result<Option<&DeflectionTable>, &FdcError> {
        self.table
            .get_or_init(|| self.load_table())
            .as_ref()
            .map(Option::as_ref)
    }

    fn load_table(&self) -> Result<Option<DeflectionTable>, FdcError> {
        let Some(path) = &self.deflection_path else {
            return Ok(None);
        };
        match DeflectionTable::from_file(path, self.params.deflection_grid) {
            Ok(table) => {
                debug!("Lorentz deflection table read from {path}");
                Ok(Some(table))
            }
            Err(FdcError::DeflectionTableNotFound(_)) => {
                self.diagnostics.warn_missing_deflection_table();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Find the segments of one event.
    ///
    /// Arguments
    /// -----------------
    /// * `hits`: the pseudopoints of the event, in any order. Hits taken by a candidate are
    ///   flagged as used; hits of fitted segments receive their final drift and Lorentz
    ///   corrections. Hits on a layer outside the chambers are skipped with a warning.
    ///
    /// Return
    /// ----------
    /// * The segments of all packages, in package order.
    pub fn find_segments(&self, hits: &mut [Pseudopoint]) -> Vec<Segment> {
        let table = match self.begin_run() {
            Ok(table) => table,
            Err(e) => {
                self.diagnostics.warn_unusable_deflection_table(e);
                None
            }
        };

        let mut packages = self.split_packages(hits);
        let finder =
            SegmentFinder::new(&self.params, self.field.as_ref(), table, &self.diagnostics);

        let per_package: Vec<Vec<Segment>> = packages
            .par_iter_mut()
            .enumerate()
            .map(|(package, pkg)| finder.find_segments(package, &mut pkg.points))
            .collect();

        for pkg in packages {
            for (slot, point) in pkg.slots.into_iter().zip(pkg.points) {
                hits[slot] = point;
            }
        }
        per_package.into_iter().flatten().collect()
    }

    fn split_packages(&self, hits: &[Pseudopoint]) -> Vec<PackageHits> {
        let p = &self.params;
        let mut grouped: Vec<Vec<(usize, &Pseudopoint)>> = vec![Vec::new(); p.num_packages];
        for (slot, hit) in hits.iter().enumerate() {
            match package_index(hit.layer(), p.planes_per_package, p.num_packages) {
                Ok(package) => grouped[package].push((slot, hit)),
                Err(e) => warn!("Pseudopoint {} skipped: {e}", hit.id),
            }
        }

        grouped
            .into_iter()
            .map(|mut members| {
                members.sort_by_key(|(_, hit)| Reverse(hit.layer()));
                let (slots, points) = members
                    .into_iter()
                    .map(|(slot, hit)| (slot, hit.clone()))
                    .unzip();
                PackageHits { slots, points }
            })
            .collect()
    }
}

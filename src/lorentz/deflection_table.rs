//! # Lorentz deflection table
//!
//! Text table of the Lorentz deflection tangents of the drifting electrons, sampled on a grid
//! of radii `x_i` and depths `z_j`.
//!
//! ## File format
//!
//! One free-form header line, then `x_points × z_points` records of six whitespace separated
//! numbers, radius index outer and depth index inner:
//!
//! ```text
//! x_i  z_j  Bx  Bz  nx_ij  nz_ij
//! ```
//!
//! The field components are informative only and are not kept. Records may be split across
//! lines arbitrarily.
//!
//! ## Interpolation
//!
//! [`DeflectionTable::tangents`] interpolates first along `z`, within the block of
//! `package_z_points` depths of the package containing `z`, for every radius of the grid; then
//! along the radius, on the four samples surrounding `r`.

use camino::Utf8Path;
use nom::{
    character::complete::multispace0,
    multi::{count, many0},
    number::complete::double,
    sequence::preceded,
    IResult, Parser,
};

use crate::{
    constants::Centimeter,
    fdc_errors::FdcError,
    numeric::{locate, polint},
    segment::params::DeflectionGrid,
};

/// Values per record: `x, z, Bx, Bz, nx, nz`.
const RECORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct DeflectionTable {
    grid: DeflectionGrid,
    x: Vec<Centimeter>,
    z: Vec<Centimeter>,
    /// Row-major `x_points × z_points`
    nx: Vec<f64>,
    nz: Vec<f64>,
}

fn parse_record(input: &str) -> IResult<&str, Vec<f64>> {
    count(preceded(multispace0, double), RECORD_LEN).parse(input)
}

fn parse_records(input: &str) -> IResult<&str, Vec<Vec<f64>>> {
    many0(parse_record).parse(input)
}

impl DeflectionTable {
    /// Read a deflection table from disk.
    ///
    /// Return
    /// ----------
    /// * [`FdcError::DeflectionTableNotFound`] if the file does not exist, the I/O error for any
    ///   other read failure, or the errors of [`DeflectionTable::parse`].
    pub fn from_file(path: &Utf8Path, grid: DeflectionGrid) -> Result<Self, FdcError> {
        let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FdcError::DeflectionTableNotFound(path.to_string()),
            _ => FdcError::IoError(e),
        })?;
        Self::parse(&text, grid)
    }

    /// Parse the textual table.
    ///
    /// Return
    /// ----------
    /// * [`FdcError::DeflectionTableParse`] if the body holds anything else than numeric
    ///   records, or [`FdcError::DeflectionTableShape`] if the number of records does not match
    ///   the grid.
    pub fn parse(text: &str, grid: DeflectionGrid) -> Result<Self, FdcError> {
        let body = text.split_once('\n').map_or("", |(_, rest)| rest);

        let (rest, records) = parse_records(body)
            .map_err(|e| FdcError::DeflectionTableParse(format!("{e:?}")))?;
        let rest = rest.trim();
        if !rest.is_empty() {
            let snippet: String = rest.chars().take(40).collect();
            return Err(FdcError::DeflectionTableParse(format!(
                "unexpected content after record {}: '{snippet}'",
                records.len()
            )));
        }
        if records.len() != grid.rows() {
            return Err(FdcError::DeflectionTableShape {
                expected: grid.rows(),
                found: records.len(),
            });
        }

        let mut x = vec![0.0; grid.x_points];
        let mut z = vec![0.0; grid.z_points];
        let mut nx = Vec::with_capacity(grid.rows());
        let mut nz = Vec::with_capacity(grid.rows());
        for (k, record) in records.iter().enumerate() {
            let (i, j) = (k / grid.z_points, k % grid.z_points);
            x[i] = record[0];
            z[j] = record[1];
            nx.push(record[4]);
            nz.push(record[5]);
        }

        Ok(DeflectionTable { grid, x, z, nx, nz })
    }

    pub fn grid(&self) -> DeflectionGrid {
        self.grid
    }

    fn nx_row(&self, i: usize) -> &[f64] {
        &self.nx[i * self.grid.z_points..(i + 1) * self.grid.z_points]
    }

    fn nz_row(&self, i: usize) -> &[f64] {
        &self.nz[i * self.grid.z_points..(i + 1) * self.grid.z_points]
    }

    /// Deflection tangents `(tan_r, tan_z)` at transverse radius `r` and depth `z`.
    ///
    /// Return
    /// ----------
    /// * The interpolated tangents, or [`FdcError::ValueOutOfRange`] if the grid has repeated
    ///   abscissae.
    pub fn tangents(&self, r: Centimeter, z: Centimeter) -> Result<(f64, f64), FdcError> {
        let DeflectionGrid {
            x_points,
            package_z_points,
            ..
        } = self.grid;

        let ind = locate(&self.x, r);
        let ind2 = locate(&self.z, z);

        let block = package_z_points * (ind2 / package_z_points);
        let z_block = &self.z[block..block + package_z_points];
        let mut tanr_at_x = Vec::with_capacity(x_points);
        let mut tanz_at_x = Vec::with_capacity(x_points);
        for i in 0..x_points {
            let nx = &self.nx_row(i)[block..block + package_z_points];
            let nz = &self.nz_row(i)[block..block + package_z_points];
            tanr_at_x.push(polint(z_block, nx, z)?.0);
            tanz_at_x.push(polint(z_block, nz, z)?.0);
        }

        let imin = ind.saturating_sub(1);
        let imax = if ind + 2 < x_points { ind + 2 } else { x_points - 1 };
        let x_stencil = &self.x[imin..=imax];
        let (tanr, _) = polint(x_stencil, &tanr_at_x[imin..=imax], r)?;
        let (tanz, _) = polint(x_stencil, &tanz_at_x[imin..=imax], r)?;
        Ok((tanr, tanz))
    }
}

#[cfg(test)]
pub(crate) mod deflection_table_tests {
    use super::*;
    use approx::assert_relative_eq;

    pub(crate) fn small_grid() -> DeflectionGrid {
        DeflectionGrid {
            x_points: 5,
            z_points: 8,
            package_z_points: 4,
        }
    }

    /// Table with `nx = a·x + b·z` and `nz = c·x·z`, exactly reproduced by the interpolation.
    pub(crate) fn linear_table_text(grid: DeflectionGrid) -> String {
        let mut text = String::from("x z bx bz nx nz\n");
        for i in 0..grid.x_points {
            for j in 0..grid.z_points {
                let x = 10.0 * i as f64;
                let z = 180.0 + 5.0 * j as f64;
                let nx = 0.01 * x + 0.002 * z;
                let nz = 1e-5 * x * z;
                text.push_str(&format!("{x} {z} 0.0 2.0 {nx} {nz}\n"));
            }
        }
        text
    }

    #[test]
    fn test_parse_and_interpolate() {
        let grid = small_grid();
        let table = DeflectionTable::parse(&linear_table_text(grid), grid).unwrap();
        assert_eq!(table.x, vec![0.0, 10.0, 20.0, 30.0, 40.0]);
        assert_eq!(table.z.len(), 8);

        let (tanr, tanz) = table.tangents(17.5, 186.0).unwrap();
        assert_relative_eq!(tanr, 0.01 * 17.5 + 0.002 * 186.0, epsilon = 1e-10);
        assert_relative_eq!(tanz, 1e-5 * 17.5 * 186.0, epsilon = 1e-10);

        // Second package block.
        let (tanr, _) = table.tangents(3.0, 203.0).unwrap();
        assert_relative_eq!(tanr, 0.01 * 3.0 + 0.002 * 203.0, epsilon = 1e-10);
    }

    #[test]
    fn test_records_split_across_lines() {
        let grid = DeflectionGrid {
            x_points: 2,
            z_points: 2,
            package_z_points: 2,
        };
        let text = "header\n0 1 0 0 0.1\n0.2 0 2 0 0 0.3 0.4 1 1 0 0 0.5\n0.6 1 2 0 0 0.7 0.8\n";
        let table = DeflectionTable::parse(text, grid).unwrap();
        assert_eq!(table.nx, vec![0.1, 0.3, 0.5, 0.7]);
        assert_eq!(table.nz, vec![0.2, 0.4, 0.6, 0.8]);
        assert_eq!(table.z, vec![1.0, 2.0]);
    }

    #[test]
    fn test_shape_and_garbage() {
        let grid = small_grid();
        let text = "header\n0 180 0 2 0.1 0.2\n";
        assert_eq!(
            DeflectionTable::parse(text, grid),
            Err(FdcError::DeflectionTableShape {
                expected: 40,
                found: 1
            })
        );
        let text = "header\n0 180 0 2 0.1 0.2\nnot a number\n";
        assert!(matches!(
            DeflectionTable::parse(text, grid),
            Err(FdcError::DeflectionTableParse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let path = Utf8Path::new("/nonexistent/fdc_deflections.dat");
        assert_eq!(
            DeflectionTable::from_file(path, small_grid()),
            Err(FdcError::DeflectionTableNotFound(path.to_string()))
        );
    }
}

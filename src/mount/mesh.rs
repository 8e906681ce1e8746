//! Tabulated, bilinearly-interpolated pointing-mesh correction (§4.2,
//! GLOSSARY "Mesh correction").

use crate::astro_math::{modulo, Radians};
use std::io::BufRead;
use std::path::Path;

/// A rectangular grid of (HA, Dec) -> (dHA, dDec) residuals, in radians,
/// measured empirically against a star catalog and interpolated bilinearly
/// between grid points.
#[derive(Debug, Clone)]
pub struct MeshTable {
    ha_grid: Vec<Radians>,
    dec_grid: Vec<Radians>,
    /// `dha[i][j]`/`ddec[i][j]` at `(ha_grid[i], dec_grid[j])`.
    dha: Vec<Vec<Radians>>,
    ddec: Vec<Vec<Radians>>,
}

impl MeshTable {
    /// A mesh with no correction at all (used when no mesh file is
    /// configured, or in tests).
    pub fn identity() -> Self {
        MeshTable {
            ha_grid: vec![-std::f64::consts::PI, std::f64::consts::PI],
            dec_grid: vec![
                -std::f64::consts::FRAC_PI_2,
                std::f64::consts::FRAC_PI_2,
            ],
            dha: vec![vec![0.; 2]; 2],
            ddec: vec![vec![0.; 2]; 2],
        }
    }

    /// Loads a mesh file: one header line `ha_count dec_count`, a line of
    /// `ha_count` HA grid values (radians), a line of `dec_count` Dec grid
    /// values, then `ha_count * dec_count` lines of `dha ddec` in row-major
    /// (HA-major) order. Blank lines and `#`-comments are ignored.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut lines = std::io::BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty() && !l.starts_with('#'));

        let header = lines.next().unwrap_or_default();
        let mut header_parts = header.split_whitespace();
        let ha_count: usize = header_parts.next().unwrap_or("0").parse().unwrap_or(0);
        let dec_count: usize = header_parts.next().unwrap_or("0").parse().unwrap_or(0);

        let parse_row = |line: Option<String>, n: usize| -> Vec<f64> {
            line.unwrap_or_default()
                .split_whitespace()
                .filter_map(|t| t.parse::<f64>().ok())
                .take(n)
                .collect()
        };

        let ha_grid = parse_row(lines.next(), ha_count);
        let dec_grid = parse_row(lines.next(), dec_count);

        let mut dha = vec![vec![0.; dec_count]; ha_count];
        let mut ddec = vec![vec![0.; dec_count]; ha_count];
        for i in 0..ha_count {
            for j in 0..dec_count {
                if let Some(line) = lines.next() {
                    let mut parts = line.split_whitespace();
                    dha[i][j] = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.);
                    ddec[i][j] = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.);
                }
            }
        }

        Ok(MeshTable {
            ha_grid,
            dec_grid,
            dha,
            ddec,
        })
    }

    /// Bilinearly interpolates `(dHA, dDec)` at the given apparent `(ha,
    /// dec)`, both radians. Falls back to the identity correction outside
    /// the grid bounds or for a degenerate (too-small) grid.
    pub fn correction(&self, ha: Radians, dec: Radians) -> (Radians, Radians) {
        if self.ha_grid.len() < 2 || self.dec_grid.len() < 2 {
            return (0., 0.);
        }

        let ha = modulo(ha - self.ha_grid[0], std::f64::consts::TAU) + self.ha_grid[0];

        let i = Self::bracket(&self.ha_grid, ha);
        let j = Self::bracket(&self.dec_grid, dec);

        let (i0, i1) = i;
        let (j0, j1) = j;

        let h0 = self.ha_grid[i0];
        let h1 = self.ha_grid[i1];
        let d0 = self.dec_grid[j0];
        let d1 = self.dec_grid[j1];

        let t_h = if h1 > h0 { (ha - h0) / (h1 - h0) } else { 0. };
        let t_d = if d1 > d0 { (dec - d0) / (d1 - d0) } else { 0. };

        let interp = |grid: &Vec<Vec<f64>>| -> f64 {
            let a = grid[i0][j0] * (1. - t_d) + grid[i0][j1] * t_d;
            let b = grid[i1][j0] * (1. - t_d) + grid[i1][j1] * t_d;
            a * (1. - t_h) + b * t_h
        };

        (interp(&self.dha), interp(&self.ddec))
    }

    fn bracket(grid: &[f64], val: f64) -> (usize, usize) {
        if val <= grid[0] {
            return (0, 0);
        }
        if val >= grid[grid.len() - 1] {
            let last = grid.len() - 1;
            return (last, last);
        }
        for i in 0..grid.len() - 1 {
            if grid[i] <= val && val <= grid[i + 1] {
                return (i, i + 1);
            }
        }
        (0, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn identity_mesh_returns_zero_correction() {
        let mesh = MeshTable::identity();
        assert_eq!(mesh.correction(0.3, 0.1), (0., 0.));
    }

    #[test]
    fn bilinear_interpolates_between_grid_points() {
        let mesh = MeshTable {
            ha_grid: vec![0., 1.],
            dec_grid: vec![0., 1.],
            dha: vec![vec![0., 0.], vec![2., 2.]],
            ddec: vec![vec![0., 4.], vec![0., 4.]],
        };
        let (dha, ddec) = mesh.correction(0.5, 0.5);
        assert_float_eq::assert_float_relative_eq!(dha, 1.0, 1E-9);
        assert_float_eq::assert_float_relative_eq!(ddec, 2.0, 1E-9);
    }

    #[test]
    fn load_parses_a_mesh_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "2 2").unwrap();
        writeln!(file, "0.0 1.0").unwrap();
        writeln!(file, "0.0 1.0").unwrap();
        writeln!(file, "0.0 0.0").unwrap();
        writeln!(file, "0.0 0.1").unwrap();
        writeln!(file, "0.2 0.0").unwrap();
        writeln!(file, "0.2 0.1").unwrap();
        file.flush().unwrap();

        let mesh = MeshTable::load(file.path()).unwrap();
        assert_float_eq::assert_float_relative_eq!(mesh.correction(1.0, 1.0).0, 0.2, 1E-9);
        assert_float_eq::assert_float_relative_eq!(mesh.correction(1.0, 1.0).1, 0.1, 1E-9);
    }
}

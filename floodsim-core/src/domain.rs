//! The domain bundle: everything read once by the external
//! loader and handed to the core immutably. Grounded on
//! `lperfect/domain.py`'s `Domain` dataclass and `cell_area_m2_from_domain`.

use floodsim_common::error::domain_error;
use floodsim_common::structures::Array2D;
use std::io::Error;

/// Per-cell area: a single scalar for projected (metric) grids, or a
/// per-row vector for geographic grids where a cell's area depends on
/// latitude.
#[derive(Clone, Debug)]
pub enum CellArea {
    Projected(f64),
    /// One area (m²) per row, repeated across every column in that row.
    Geographic(Vec<f64>),
}

impl CellArea {
    pub fn area_at(&self, row: isize) -> f64 {
        match self {
            CellArea::Projected(a) => *a,
            CellArea::Geographic(rows) => rows[row as usize],
        }
    }

    /// Ellipsoidal-polygon area of one grid cell at row `i`, spherical-cap
    /// approximation (`lperfect/domain.py`'s pyproj-less fallback path).
    /// `y_coords` are latitudes in degrees, `dlon_deg`/`dlat_deg` are the
    /// (positive) cell spacing in degrees.
    pub fn geographic_from_coords(y_coords: &[f64], dlon_deg: f64, dlat_deg: f64) -> CellArea {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let dlon = dlon_deg.abs().to_radians();
        let areas: Vec<f64> = y_coords
            .iter()
            .map(|&lat_top_deg| {
                let lat_top = lat_top_deg.to_radians();
                let lat_bot = (lat_top_deg - dlat_deg).to_radians();
                (EARTH_RADIUS_M * EARTH_RADIUS_M * dlon * (lat_bot.sin() - lat_top.sin())).abs()
            })
            .collect();
        CellArea::Geographic(areas)
    }
}

/// Everything the core needs about the terrain, read once and broadcast
/// at `UNINITIALIZED -> READY`. Immutable for the lifetime of the run.
pub struct DomainBundle {
    pub rows: isize,
    pub cols: isize,
    /// NaN marks an inactive cell.
    pub elevation: Array2D<f64>,
    pub direction: Array2D<i32>,
    pub d8_encoding: String,
    /// Invalid CN has already been cleaned to 0 on inactive/non-finite cells.
    pub cn: Array2D<f64>,
    /// `0`/`1` flags -- `bool` has no `AddAssign`/`SubAssign` so it can't
    /// satisfy `Array2D`'s bound; `i8` is used for flag grids instead,
    /// the same as `num_inflowing` in `d8_flow_accum.rs`.
    pub channel_mask: Option<Array2D<i8>>,
    pub active: Array2D<i8>,
    pub x_coords: Vec<f64>,
    pub y_coords: Vec<f64>,
    pub cell_area: CellArea,
    pub grid_mapping_name: Option<String>,
}

impl DomainBundle {
    /// Validates shape consistency and derives the active mask + cleaned CN.
    pub fn new(
        elevation: Array2D<f64>,
        direction: Array2D<i32>,
        d8_encoding: String,
        mut cn: Array2D<f64>,
        channel_mask: Option<Array2D<i8>>,
        x_coords: Vec<f64>,
        y_coords: Vec<f64>,
        cell_area: CellArea,
        grid_mapping_name: Option<String>,
    ) -> Result<DomainBundle, Error> {
        let rows = elevation.rows();
        let cols = elevation.columns();
        if direction.rows() != rows || direction.columns() != cols {
            return Err(domain_error("direction raster shape does not match elevation"));
        }
        if cn.rows() != rows || cn.columns() != cols {
            return Err(domain_error("curve-number raster shape does not match elevation"));
        }
        if let Some(ref m) = channel_mask {
            if m.rows() != rows || m.columns() != cols {
                return Err(domain_error("channel mask shape does not match elevation"));
            }
        }
        if x_coords.len() != cols as usize || y_coords.len() != rows as usize {
            return Err(domain_error("coordinate vector length does not match grid shape"));
        }
        if let CellArea::Geographic(ref v) = cell_area {
            if v.len() != rows as usize {
                return Err(domain_error("per-row cell area length does not match rows"));
            }
        }

        let mut active: Array2D<i8> = Array2D::new(rows, cols, 0, 0)
            .map_err(|e| domain_error(e.to_string()))?;
        for row in 0..rows {
            for col in 0..cols {
                let is_active = elevation.get_value(row, col).is_finite();
                active.set_value(row, col, if is_active { 1 } else { 0 });
                let cn_val = cn.get_value(row, col);
                if !(is_active && cn_val.is_finite()) {
                    cn.set_value(row, col, 0.0);
                }
            }
        }

        let channel_mask = channel_mask.map(|mut m| {
            for row in 0..rows {
                for col in 0..cols {
                    let masked = m.get_value(row, col) != 0 && active.get_value(row, col) != 0;
                    m.set_value(row, col, if masked { 1 } else { 0 });
                }
            }
            m
        });

        Ok(DomainBundle {
            rows,
            cols,
            elevation,
            direction,
            d8_encoding,
            cn,
            channel_mask,
            active,
            x_coords,
            y_coords,
            cell_area,
            grid_mapping_name,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn flat_domain(rows: isize, cols: isize) -> DomainBundle {
        let elevation: Array2D<f64> = Array2D::new(rows, cols, 10.0, f64::NAN).unwrap();
        let direction: Array2D<i32> = Array2D::new(rows, cols, 1, -1).unwrap();
        let cn: Array2D<f64> = Array2D::new(rows, cols, 80.0, -1.0).unwrap();
        DomainBundle::new(
            elevation,
            direction,
            "esri".to_string(),
            cn,
            None,
            (0..cols).map(|c| c as f64).collect(),
            (0..rows).map(|r| r as f64).collect(),
            CellArea::Projected(100.0),
            None,
        )
        .unwrap()
    }

    #[test]
    fn active_mask_follows_finite_elevation() {
        let mut elevation: Array2D<f64> = Array2D::new(2, 2, 10.0, f64::NAN).unwrap();
        elevation.set_value(0, 0, f64::NAN);
        let direction: Array2D<i32> = Array2D::new(2, 2, 1, -1).unwrap();
        let cn: Array2D<f64> = Array2D::new(2, 2, 80.0, -1.0).unwrap();
        let dom = DomainBundle::new(
            elevation,
            direction,
            "esri".to_string(),
            cn,
            None,
            vec![0.0, 1.0],
            vec![0.0, 1.0],
            CellArea::Projected(1.0),
            None,
        )
        .unwrap();
        assert_eq!(dom.active.get_value(0, 0), 0);
        assert_eq!(dom.active.get_value(0, 1), 1);
    }

    #[test]
    fn shape_mismatch_is_fatal() {
        let elevation: Array2D<f64> = Array2D::new(2, 2, 10.0, f64::NAN).unwrap();
        let direction: Array2D<i32> = Array2D::new(3, 2, 1, -1).unwrap();
        let cn: Array2D<f64> = Array2D::new(2, 2, 80.0, -1.0).unwrap();
        let result = DomainBundle::new(
            elevation,
            direction,
            "esri".to_string(),
            cn,
            None,
            vec![0.0, 1.0],
            vec![0.0, 1.0],
            CellArea::Projected(1.0),
            None,
        );
        assert!(result.is_err());
    }

    #[test]
    fn flat_domain_builds() {
        let dom = flat_domain(4, 4);
        assert_eq!(dom.rows, 4);
        assert_eq!(dom.active.get_value(1, 1), 1);
    }

    #[test]
    fn geographic_area_decreases_towards_pole() {
        let y = vec![10.0, 80.0];
        let area = CellArea::geographic_from_coords(&y, 0.01, 0.01);
        if let CellArea::Geographic(v) = area {
            assert!(v[0] > v[1]);
        } else {
            panic!("expected geographic cell area");
        }
    }
}

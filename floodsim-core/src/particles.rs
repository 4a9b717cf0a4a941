//! The Lagrangian particle engine: structure-of-arrays
//! container, spawn from runoff increments, single-hop advection, and the
//! wire format used to migrate particles across slab boundaries.
//!
//! Grounded on `lperfect/particles.py` (the SoA container and the
//! float64 pack/unpack used for the MPI transfer) and on the row-striped
//! worker pattern from `d8_pointer.rs` for the data-parallel parts.

use crate::direction::DirectionGraph;
use crate::domain::CellArea;
use floodsim_common::structures::Array2D;

/// Structure-of-arrays particle container. All four fields
/// always have equal length.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Particles {
    pub row: Vec<i32>,
    pub col: Vec<i32>,
    pub vol: Vec<f64>,
    pub tau: Vec<f64>,
}

impl Particles {
    pub fn empty() -> Particles {
        Particles::default()
    }

    pub fn len(&self) -> usize {
        self.row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    pub fn push(&mut self, row: i32, col: i32, vol: f64, tau: f64) {
        self.row.push(row);
        self.col.push(col);
        self.vol.push(vol);
        self.tau.push(tau);
    }

    pub fn append(&mut self, mut other: Particles) {
        self.row.append(&mut other.row);
        self.col.append(&mut other.col);
        self.vol.append(&mut other.vol);
        self.tau.append(&mut other.tau);
    }

    /// Packs every particle into a flat `(N,4)` row-major float64 buffer
    /// -- columns `{row, col, vol, tau}` coerced to a common floating
    /// type -- ready for the variable-length all-to-all transfer.
    pub fn pack(&self) -> Vec<[f64; 4]> {
        (0..self.len())
            .map(|i| [self.row[i] as f64, self.col[i] as f64, self.vol[i], self.tau[i]])
            .collect()
    }

    /// Inverse of [`Particles::pack`]. A buffer whose rows aren't exactly
    /// 4 columns can't happen here because the wire type is already
    /// `[f64; 4]`; the "not a multiple of 4" check applies at the
    /// byte-buffer boundary in the communicator, not here.
    pub fn unpack(buf: &[[f64; 4]]) -> Particles {
        let mut p = Particles {
            row: Vec::with_capacity(buf.len()),
            col: Vec::with_capacity(buf.len()),
            vol: Vec::with_capacity(buf.len()),
            tau: Vec::with_capacity(buf.len()),
        };
        for entry in buf {
            p.row.push(entry[0] as i32);
            p.col.push(entry[1] as i32);
            p.vol.push(entry[2]);
            p.tau.push(entry[3]);
        }
        p
    }

    /// Retains only the particles for which `keep(i)` is true.
    fn retain_by_index<F: Fn(usize) -> bool>(&self, keep: F) -> Particles {
        let mut out = Particles::empty();
        for i in 0..self.len() {
            if keep(i) {
                out.push(self.row[i], self.col[i], self.vol[i], self.tau[i]);
            }
        }
        out
    }
}

/// Result of [`spawn`]: the newly created particles plus their total
/// volume, for the driver's mass-balance accounting.
pub struct SpawnResult {
    pub particles: Particles,
    pub spawned_volume_m3: f64,
}

/// Spawns particles from a local slab's incremental runoff.
/// `delta_q_m` is the step's runoff increment already converted to
/// meters; `row_offset` is the slab's `r0` since `delta_q_m` is indexed
/// `[0, r1-r0)` but particles carry global row indices.
pub fn spawn(
    delta_q_m: &Array2D<f64>,
    active: &Array2D<i8>,
    cell_area: &CellArea,
    row_offset: isize,
    target_volume_m3: f64,
) -> SpawnResult {
    let mut particles = Particles::empty();
    let mut spawned_volume_m3 = 0.0;
    for local_row in 0..delta_q_m.rows() {
        let global_row = local_row + row_offset;
        let area = cell_area.area_at(global_row);
        for col in 0..delta_q_m.columns() {
            if active.get_value(local_row, col) == 0 {
                continue;
            }
            let dq = delta_q_m.get_value(local_row, col);
            if dq <= 0.0 {
                continue;
            }
            let total_vol = dq * area;
            let n = ((total_vol / target_volume_m3).round() as i64).max(1);
            let per_particle = total_vol / n as f64;
            for _ in 0..n {
                particles.push(global_row as i32, col as i32, per_particle, 0.0);
            }
            spawned_volume_m3 += total_vol;
        }
    }
    SpawnResult {
        particles,
        spawned_volume_m3,
    }
}

/// Result of [`advect`]: particles that remained local (post-hop, still
/// possibly outside the owning slab -- migration handles that separately),
/// the outflow volume retired this step, and a hop count for diagnostics.
pub struct AdvectResult {
    pub particles: Particles,
    pub outflow_vol_m3: f64,
    pub hops: usize,
}

/// Advances every eligible particle one hop. A particle is
/// "movable" once its cooldown `tau` has decayed to `<= 0`. Movable
/// particles with a downstream neighbor hop there and get a fresh
/// cooldown (channel or overland travel time); movable particles at a
/// terminal cell are retired under `outflow_sink`, or left in place to
/// retry next step otherwise.
///
/// The active mask is checked at spawn but not on every hop -- a particle
/// can be walked onto an inactive cell if the direction raster points
/// there. This preserves that behavior deliberately rather than adding a
/// mid-hop active check, since the direction graph is only ever built
/// from an already-masked D8 raster in practice.
pub fn advect(
    particles: Particles,
    dt_s: f64,
    graph: &DirectionGraph,
    channel_mask: Option<&Array2D<i8>>,
    travel_time_overland_s: f64,
    travel_time_channel_s: f64,
    outflow_sink: bool,
) -> AdvectResult {
    let n = particles.len();
    let mut row = particles.row;
    let mut col = particles.col;
    let mut vol = particles.vol;
    let mut tau: Vec<f64> = particles.tau.iter().map(|t| t - dt_s).collect();

    let mut outflow_vol_m3 = 0.0;
    let mut hops = 0usize;
    let mut keep = vec![true; n];

    for i in 0..n {
        if tau[i] > 0.0 {
            continue;
        }
        let r = row[i] as isize;
        let c = col[i] as isize;
        if graph.has_down.get_value(r, c) != 0 {
            let nr = graph.down_row.get_value(r, c);
            let nc = graph.down_col.get_value(r, c);
            row[i] = nr;
            col[i] = nc;
            let is_channel = channel_mask
                .map(|m| m.get_value(nr as isize, nc as isize) != 0)
                .unwrap_or(false);
            tau[i] += if is_channel {
                travel_time_channel_s
            } else {
                travel_time_overland_s
            };
            hops += 1;
        } else if outflow_sink {
            outflow_vol_m3 += vol[i];
            keep[i] = false;
            hops += 1;
        }
        // else: terminal and outflow_sink==false -> left in place, tau<=0,
        // retried next step.
    }

    let result = Particles { row, col, vol, tau }.retain_by_index(|i| keep[i]);
    AdvectResult {
        particles: result,
        outflow_vol_m3,
        hops,
    }
}

/// Scatter-adds every particle's volume into a deposition grid and
/// converts the accumulated volume to a depth in meters by dividing by
/// the cell's area. Particles outside the local slab's row
/// range are silently ignored -- the driver is responsible for migrating
/// them to their owning rank before calling this.
pub fn deposit(particles: &Particles, cell_area: &CellArea, rows: isize, cols: isize, row_offset: isize) -> Array2D<f64> {
    let mut grid: Array2D<f64> = Array2D::new(rows, cols, 0.0, 0.0).expect("non-negative dims");
    for i in 0..particles.len() {
        let local_row = particles.row[i] as isize - row_offset;
        let col = particles.col[i] as isize;
        if local_row < 0 || local_row >= rows || col < 0 || col >= cols {
            continue;
        }
        grid.increment(local_row, col, particles.vol[i]);
    }
    for local_row in 0..rows {
        let area = cell_area.area_at(local_row + row_offset);
        if area <= 0.0 {
            continue;
        }
        for col in 0..cols {
            let vol = grid.get_value(local_row, col);
            if vol != 0.0 {
                // m^3 / m^2 -> m.
                grid.set_value(local_row, col, vol / area);
            }
        }
    }
    grid
}

#[cfg(test)]
mod test {
    use super::*;
    use floodsim_common::structures::Array2D;

    fn line_east(n: isize) -> DirectionGraph {
        let mut g: Array2D<i32> = Array2D::new(1, n, 1, -1).unwrap();
        g.set_value(0, n - 1, 0);
        DirectionGraph::build(&g, "esri", 1, false).unwrap()
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let mut p = Particles::empty();
        p.push(1, 2, 3.5, -1.0);
        p.push(4, 5, 6.5, 2.0);
        let packed = p.pack();
        let back = Particles::unpack(&packed);
        assert_eq!(back.row, p.row);
        assert_eq!(back.vol, p.vol);
    }

    #[test]
    fn spawn_creates_target_sized_particles() {
        let mut delta_q: Array2D<f64> = Array2D::new(1, 1, 0.0, 0.0).unwrap();
        delta_q.set_value(0, 0, 0.01); // 10 mm in meters
        let active: Array2D<i8> = Array2D::new(1, 1, 1, 0).unwrap();
        let result = spawn(&delta_q, &active, &CellArea::Projected(100.0), 0, 0.1);
        // total vol = 0.01 * 100 = 1.0 m^3, target 0.1 -> 10 particles
        assert_eq!(result.particles.len(), 10);
        assert!((result.spawned_volume_m3 - 1.0).abs() < 1e-9);
        let sum: f64 = result.particles.vol.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn spawn_skips_inactive_and_zero_cells() {
        let mut delta_q: Array2D<f64> = Array2D::new(1, 2, 0.0, 0.0).unwrap();
        delta_q.set_value(0, 0, 0.0);
        delta_q.set_value(0, 1, 0.01);
        let mut active: Array2D<i8> = Array2D::new(1, 2, 1, 0).unwrap();
        active.set_value(0, 1, 0);
        let result = spawn(&delta_q, &active, &CellArea::Projected(1.0), 0, 1.0);
        assert!(result.particles.is_empty());
    }

    #[test]
    fn advect_hops_movable_particle_downstream() {
        let graph = line_east(4);
        let mut particles = Particles::empty();
        particles.push(0, 0, 1.0, 0.0);
        let result = advect(particles, 60.0, &graph, None, 60.0, 60.0, true);
        assert_eq!(result.particles.col[0], 1);
        assert_eq!(result.hops, 1);
        assert_eq!(result.outflow_vol_m3, 0.0);
    }

    #[test]
    fn advect_leaves_particle_in_cooldown() {
        let graph = line_east(4);
        let mut particles = Particles::empty();
        particles.push(0, 0, 1.0, 120.0);
        let result = advect(particles, 60.0, &graph, None, 60.0, 60.0, true);
        assert_eq!(result.particles.col[0], 0);
        assert_eq!(result.hops, 0);
    }

    #[test]
    fn terminal_particle_retires_under_outflow_sink() {
        let graph = line_east(1);
        let mut particles = Particles::empty();
        particles.push(0, 0, 2.5, 0.0);
        let result = advect(particles, 60.0, &graph, None, 60.0, 60.0, true);
        assert!(result.particles.is_empty());
        assert!((result.outflow_vol_m3 - 2.5).abs() < 1e-9);
    }

    #[test]
    fn terminal_particle_stays_when_sink_disabled() {
        let graph = line_east(1);
        let mut particles = Particles::empty();
        particles.push(0, 0, 2.5, 0.0);
        let result = advect(particles, 60.0, &graph, None, 60.0, 60.0, false);
        assert_eq!(result.particles.len(), 1);
        assert_eq!(result.outflow_vol_m3, 0.0);
    }

    #[test]
    fn deposit_scatters_volume_and_converts_to_depth_m() {
        let mut particles = Particles::empty();
        particles.push(0, 0, 2.0, 0.0);
        particles.push(0, 0, 1.0, 0.0);
        particles.push(0, 1, 4.0, 0.0);
        let grid = deposit(&particles, &CellArea::Projected(2.0), 1, 2, 0);
        // cell (0,0): vol=3.0 / area=2.0 -> 1.5 m
        assert!((grid.get_value(0, 0) - 1.5).abs() < 1e-9);
        // cell (0,1): vol=4.0 / area=2.0 -> 2.0 m
        assert!((grid.get_value(0, 1) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn deposit_ignores_particles_outside_local_slab() {
        let mut particles = Particles::empty();
        particles.push(5, 0, 10.0, 0.0);
        let grid = deposit(&particles, &CellArea::Projected(1.0), 2, 1, 0);
        assert_eq!(grid.get_value(0, 0), 0.0);
    }

    #[test]
    fn channel_mask_selects_channel_travel_time() {
        let graph = line_east(4);
        let mut channel: Array2D<i8> = Array2D::new(1, 4, 0, 0).unwrap();
        channel.set_value(0, 1, 1);
        let mut particles = Particles::empty();
        particles.push(0, 0, 1.0, 0.0);
        let result = advect(particles, 10.0, &graph, Some(&channel), 100.0, 5.0, true);
        // destination (0,1) is a channel cell -> tau = -10 + 5 = -5 (still movable next tick)
        assert!((result.particles.tau[0] - (-5.0)).abs() < 1e-9);
    }
}

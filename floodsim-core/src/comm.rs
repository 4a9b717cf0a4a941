//! Collective communication layer.
//!
//! whitebox-tools-app has no SPMD facility of its own -- every tool runs
//! single process and parallelizes only with worker threads. The collective
//! shapes here (broadcast, variable-length all-to-all, scatter/gather to
//! rank 0) are grounded on `lperfect/mpi_utils.py`'s
//! `alltoallv_float64` / `migrate_particles_slab` /
//! `gather_particles_to_rank0` / `scatter_particles_from_rank0`, and the
//! trait shape on the `mpi` crate's `Communicator`/`SizedCommunicator`
//! usage seen in other particle-exchange codebases in this family.

use crate::particles::Particles;
use floodsim_common::error::protocol_error;
use floodsim_common::structures::Array2D;
use std::io::Error;

/// A collective communication context. `SingleCommunicator` is the
/// default (single in-process worker, `size() == 1`); the `mpi-transport`
/// feature adds [`MpiCommunicator`] backed by a real MPI world.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Broadcasts `bytes` from `root` to every rank. On the root, `bytes`
    /// is both the input and the (unchanged) output.
    fn broadcast_bytes(&self, bytes: &mut Vec<u8>, root: usize);

    /// Sends `outgoing[dest]` to every rank `dest` and returns what every
    /// other rank sent here, indexed by source rank. `outgoing.len()`
    /// must equal `self.size()`.
    fn all_to_all_particles(&self, outgoing: Vec<Particles>) -> Result<Vec<Particles>, Error>;

    /// Gathers `local` from every rank to `root`; non-root ranks get an
    /// empty vec back.
    fn gather_particles(&self, local: Particles, root: usize) -> Vec<Particles>;

    /// Gathers each rank's row-slab into the full `(global_rows, cols)`
    /// grid on `root`, using the same deterministic per-rank row counts
    /// as [`crate::slab::SlabPartition`]. Non-root ranks get `None` back.
    fn gather_grid(&self, slab: &Array2D<f64>, global_rows: isize, root: usize) -> Option<Array2D<f64>>;
}

/// Single in-process worker: `size() == 1`, every collective is a no-op
/// pass-through. This is the default transport and what every unit test
/// in this crate runs under.
#[derive(Default, Clone, Copy)]
pub struct SingleCommunicator;

impl Communicator for SingleCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn broadcast_bytes(&self, _bytes: &mut Vec<u8>, _root: usize) {}

    fn all_to_all_particles(&self, mut outgoing: Vec<Particles>) -> Result<Vec<Particles>, Error> {
        if outgoing.len() != 1 {
            return Err(protocol_error(format!(
                "all_to_all_particles expected exactly 1 destination under SingleCommunicator, got {}",
                outgoing.len()
            )));
        }
        Ok(vec![outgoing.pop().unwrap_or_else(Particles::empty)])
    }

    fn gather_particles(&self, local: Particles, _root: usize) -> Vec<Particles> {
        vec![local]
    }

    fn gather_grid(&self, slab: &Array2D<f64>, _global_rows: isize, _root: usize) -> Option<Array2D<f64>> {
        Some(slab.duplicate())
    }
}

/// Validates a raw particle wire buffer's length is a multiple of 4
/// floats, used by transports that serialize particles to a flat
/// float64 buffer before handing them to the underlying collective.
pub fn validate_particle_buffer_len(len: usize) -> Result<(), Error> {
    if len % 4 != 0 {
        return Err(protocol_error(format!(
            "received particle buffer length {} is not a multiple of 4",
            len
        )));
    }
    Ok(())
}

#[cfg(feature = "mpi-transport")]
pub mod mpi_transport {
    //! Real MPI-backed [`Communicator`], grounded on the collective
    //! patterns in the `mpi` crate's `sweep`-style usage: a counts
    //! exchange (`all_gather`) followed by a variable-length payload
    //! exchange, mirroring `alltoallv_float64` in the original source.

    use super::*;
    use mpi::collective::CommunicatorCollectives;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::Communicator as MpiTopology;
    use mpi::traits::*;

    pub struct MpiCommunicator {
        world: mpi::topology::SimpleCommunicator,
    }

    impl MpiCommunicator {
        pub fn new(universe: &mpi::environment::Universe) -> MpiCommunicator {
            MpiCommunicator {
                world: universe.world(),
            }
        }
    }

    impl Communicator for MpiCommunicator {
        fn rank(&self) -> usize {
            self.world.rank() as usize
        }

        fn size(&self) -> usize {
            self.world.size() as usize
        }

        fn broadcast_bytes(&self, bytes: &mut Vec<u8>, root: usize) {
            let root_process = self.world.process_at_rank(root as i32);
            let mut len = bytes.len() as u64;
            root_process.broadcast_into(&mut len);
            if self.rank() != root {
                bytes.resize(len as usize, 0);
            }
            root_process.broadcast_into(&mut bytes[..]);
        }

        fn all_to_all_particles(&self, outgoing: Vec<Particles>) -> Result<Vec<Particles>, Error> {
            let size = self.size();
            let my_rank = self.rank();
            let mut incoming = Vec::with_capacity(size);
            // Point-to-point ring exchange: counts then payload, matching
            // the two-phase shape of `alltoallv_float64` (a size probe
            // followed by the actual transfer) rather than a single
            // variable-length collective, since `mpi` 0.8 has no
            // `all_to_all_varcount` helper for arbitrary structs.
            for dest in 0..size {
                let packed = outgoing[dest].pack();
                let flat: Vec<f64> = packed.into_iter().flatten().collect();
                if dest == my_rank {
                    incoming.push(Particles::unpack(
                        &flat
                            .chunks_exact(4)
                            .map(|c| [c[0], c[1], c[2], c[3]])
                            .collect::<Vec<_>>(),
                    ));
                    continue;
                }
                let dest_process = self.world.process_at_rank(dest as i32);
                let len = flat.len() as u64;
                dest_process.send(&len);
                dest_process.send(&flat[..]);
            }
            for src in 0..size {
                if src == my_rank {
                    continue;
                }
                let src_process = self.world.process_at_rank(src as i32);
                let (len, _status): (u64, _) = src_process.receive();
                validate_particle_buffer_len(len as usize)?;
                let mut flat = vec![0.0f64; len as usize];
                let _status = src_process.receive_into(&mut flat[..]);
                incoming.push(Particles::unpack(
                    &flat
                        .chunks_exact(4)
                        .map(|c| [c[0], c[1], c[2], c[3]])
                        .collect::<Vec<_>>(),
                ));
            }
            Ok(incoming)
        }

        fn gather_particles(&self, local: Particles, root: usize) -> Vec<Particles> {
            let root_process = self.world.process_at_rank(root as i32);
            let packed = local.pack();
            let flat: Vec<f64> = packed.into_iter().flatten().collect();
            if self.rank() != root {
                let len = flat.len() as u64;
                root_process.send(&len);
                root_process.send(&flat[..]);
                return Vec::new();
            }
            let mut all = vec![Particles::empty(); self.size()];
            all[root] = local;
            for src in 0..self.size() {
                if src == root {
                    continue;
                }
                let src_process = self.world.process_at_rank(src as i32);
                let (len, _status): (u64, _) = src_process.receive();
                let mut buf = vec![0.0f64; len as usize];
                let _status = src_process.receive_into(&mut buf[..]);
                all[src] = Particles::unpack(
                    &buf.chunks_exact(4)
                        .map(|c| [c[0], c[1], c[2], c[3]])
                        .collect::<Vec<_>>(),
                );
            }
            all
        }

        /// Point-to-point counterpart of `gather_field_slab_to_rank0`:
        /// every non-root rank ships its row-slab's flat payload to
        /// `root`, which reassembles the full grid using the same
        /// deterministic row counts `SlabPartition` derives from
        /// `(global_rows, size())`.
        fn gather_grid(&self, slab: &Array2D<f64>, global_rows: isize, root: usize) -> Option<Array2D<f64>> {
            let cols = slab.columns();
            let mut flat: Vec<f64> = Vec::with_capacity((slab.rows() * cols) as usize);
            for row in 0..slab.rows() {
                flat.extend(slab.get_row_data(row));
            }

            if self.rank() != root {
                let root_process = self.world.process_at_rank(root as i32);
                let len = flat.len() as u64;
                root_process.send(&len);
                root_process.send(&flat[..]);
                return None;
            }

            let (counts, starts) = crate::slab::slab_counts_starts(global_rows, self.size());
            let mut full: Array2D<f64> =
                Array2D::new(global_rows, cols, 0.0, 0.0).expect("non-negative dims");
            for row in 0..slab.rows() {
                full.set_row_data(starts[root] + row, slab.get_row_data(row));
            }
            for src in 0..self.size() {
                if src == root {
                    continue;
                }
                let src_process = self.world.process_at_rank(src as i32);
                let (len, _status): (u64, _) = src_process.receive();
                let mut buf = vec![0.0f64; len as usize];
                let _status = src_process.receive_into(&mut buf[..]);
                let rows_here = counts[src];
                for row in 0..rows_here {
                    let start = (row * cols) as usize;
                    full.set_row_data(starts[src] + row, buf[start..start + cols as usize].to_vec());
                }
            }
            Some(full)
        }
    }
}

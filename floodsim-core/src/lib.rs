//! Distributed Lagrangian surface-runoff routing and flood-risk index
//! core.
//!
//! Module layout mirrors `whitebox-tools-app`'s `src/tools/*` split: one
//! file per self-contained algorithm, a shared `floodsim_common` crate
//! for the grid/config/error plumbing every module needs, and a
//! `driver` that sequences them into a steppable run.

pub mod comm;
pub mod direction;
pub mod domain;
pub mod driver;
pub mod flow_accum;
pub mod particles;
pub mod rainfall;
pub mod restart;
pub mod risk;
pub mod runoff;
pub mod slab;

pub use comm::{Communicator, SingleCommunicator};
pub use direction::DirectionGraph;
pub use domain::{CellArea, DomainBundle};
pub use driver::{DriverState, StepDriver, StepOutcome};
pub use particles::Particles;
pub use restart::RestartState;
pub use slab::SlabPartition;

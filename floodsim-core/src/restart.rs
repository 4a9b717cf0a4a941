//! Restart / checkpoint state. Serialized with `serde_json`, the same
//! approach `whitebox-common::configs::Configs` uses, rather than a
//! binary format.

use crate::particles::Particles;
use floodsim_common::error::{io_error, protocol_error};
use floodsim_common::structures::Array2D;
use std::io::Error;

/// Bumped whenever the on-disk shape of [`RestartState`] changes
/// incompatibly; a mismatch on load is fatal.
pub const SCHEMA_VERSION: u32 = 1;

/// Everything needed to resume a run bit-for-bit from a checkpoint:
/// the particle population, the cumulative accumulator grids, and
/// a few scalar mass-balance counters. `config_hash` guards against
/// resuming a checkpoint under a different configuration.
#[derive(serde::Serialize, serde::Deserialize)]
pub struct RestartState {
    pub schema_version: u32,
    pub config_hash: u64,
    pub step_index: u64,
    pub sim_time_s: f64,
    pub particles: Particles,
    pub p_cum_mm: Array2D<f64>,
    pub q_cum_mm: Array2D<f64>,
    pub total_spawned_volume_m3: f64,
    pub total_outflow_volume_m3: f64,
}

impl RestartState {
    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
        serde_json::to_vec(self).map_err(|e| io_error(format!("failed to serialize restart state: {e}")))
    }

    /// Deserializes and validates schema/config provenance in one step,
    /// so callers can't accidentally resume from an incompatible
    /// checkpoint.
    pub fn from_json(bytes: &[u8], expected_config_hash: u64) -> Result<RestartState, Error> {
        let state: RestartState = serde_json::from_slice(bytes)
            .map_err(|e| io_error(format!("failed to parse restart state: {e}")))?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(protocol_error(format!(
                "restart schema version {} does not match expected {}",
                state.schema_version, SCHEMA_VERSION
            )));
        }
        if state.config_hash != expected_config_hash {
            return Err(protocol_error(
                "restart checkpoint config hash does not match the active configuration",
            ));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> RestartState {
        RestartState {
            schema_version: SCHEMA_VERSION,
            config_hash: 42,
            step_index: 7,
            sim_time_s: 420.0,
            particles: Particles::empty(),
            p_cum_mm: Array2D::new(2, 2, 0.0, 0.0).unwrap(),
            q_cum_mm: Array2D::new(2, 2, 0.0, 0.0).unwrap(),
            total_spawned_volume_m3: 3.0,
            total_outflow_volume_m3: 1.0,
        }
    }

    #[test]
    fn roundtrips_through_json() {
        let state = sample();
        let bytes = state.to_json().unwrap();
        let restored = RestartState::from_json(&bytes, 42).unwrap();
        assert_eq!(restored.step_index, 7);
        assert_eq!(restored.total_spawned_volume_m3, 3.0);
    }

    #[test]
    fn config_hash_mismatch_is_fatal() {
        let bytes = sample().to_json().unwrap();
        assert!(RestartState::from_json(&bytes, 99).is_err());
    }

    #[test]
    fn schema_version_mismatch_is_fatal() {
        let mut state = sample();
        state.schema_version = 999;
        let bytes = state.to_json().unwrap();
        assert!(RestartState::from_json(&bytes, 42).is_err());
    }
}

//! Rainfall acquisition. Grounded on `lperfect/rain.py`:
//! a `RainSource` can be a uniform scalar applied to every active cell or
//! a gridded source backed by an external reader, and the nearest-time
//! lookup uses the source's own timestamps once a run has a wall-clock
//! start time.
//!
//! The NetCDF reading itself is out of scope for this crate --
//! [`GriddedRainProvider`] is the contract an external loader implements;
//! this module only owns the time-selection and unit-conversion logic.

use chrono::{DateTime, Utc};
use floodsim_common::structures::Array2D;

/// A source's native units: either an intensity (mm/h, must be multiplied
/// by the step length) or an already-accumulated per-step depth (mm).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RainUnits {
    IntensityMmPerHour,
    DepthMmPerStep,
}

/// One configured rainfall source. `Scalar` applies the same
/// value to every active cell; `Gridded` defers to a
/// [`GriddedRainProvider`] keyed by `source_id`. `weight` lets a run
/// blend several sources (e.g. two overlapping gauges, or a gauge
/// plus a radar grid) into one field -- the acquired depth is the
/// weighted sum of every source's contribution.
pub enum RainSource {
    Scalar {
        weight: f64,
        times: Vec<DateTime<Utc>>,
        values: Vec<f64>,
        units: RainUnits,
    },
    Gridded {
        weight: f64,
        source_id: String,
        times: Vec<DateTime<Utc>>,
        units: RainUnits,
    },
}

impl RainSource {
    pub fn weight(&self) -> f64 {
        match self {
            RainSource::Scalar { weight, .. } => *weight,
            RainSource::Gridded { weight, .. } => *weight,
        }
    }

    pub fn units(&self) -> RainUnits {
        match self {
            RainSource::Scalar { units, .. } => *units,
            RainSource::Gridded { units, .. } => *units,
        }
    }
}

/// Contract for an external gridded-rainfall reader (e.g. backed by a
/// NetCDF store); this crate never implements one -- only time selection
/// and the unit conversion it feeds into live here.
pub trait GriddedRainProvider {
    fn read_field(&self, source_id: &str, time_index: usize) -> Array2D<f64>;
}

/// Finds the nearest time index to `target`, ties broken towards the
/// earlier index (mirrors `rain.py::pick_time_index`'s
/// `np.argmin(abs(times - target))`, which is stable towards the first
/// minimum for an exact tie).
pub fn pick_time_index(times: &[DateTime<Utc>], target: DateTime<Utc>) -> Option<usize> {
    if times.is_empty() {
        return None;
    }
    let mut best_idx = 0;
    let mut best_dist = (times[0] - target).num_milliseconds().abs();
    for (i, t) in times.iter().enumerate().skip(1) {
        let dist = (*t - target).num_milliseconds().abs();
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    Some(best_idx)
}

/// Converts a raw sampled value to a step depth in mm. Non-finite or
/// negative readings are clamped to `0.0`.
pub fn rain_to_step_mm(raw: f64, units: RainUnits, dt_s: f64) -> f64 {
    if !raw.is_finite() || raw < 0.0 {
        return 0.0;
    }
    match units {
        RainUnits::IntensityMmPerHour => raw * (dt_s / 3600.0),
        RainUnits::DepthMmPerStep => raw,
    }
}

/// Per-run rainfall state: which time index each source last resolved to,
/// so repeated lookups for the same simulated time don't re-scan. This is
/// an explicit struct threaded through the driver rather than a
/// process-wide mutable cache, since the ambient design here rules out
/// hidden global state.
#[derive(Default)]
pub struct RainfallContext {
    last_index: Vec<Option<usize>>,
}

impl RainfallContext {
    pub fn new(num_sources: usize) -> RainfallContext {
        RainfallContext {
            last_index: vec![None; num_sources],
        }
    }

    /// Resolves source `idx`'s step depth (mm) at `sim_time` when the run
    /// has a wall-clock start (`start_time_iso` configured); falls back
    /// to `step_index` directly into the source's time series otherwise.
    pub fn step_depth_mm(
        &mut self,
        idx: usize,
        source: &RainSource,
        sim_time: Option<DateTime<Utc>>,
        step_index: usize,
        dt_s: f64,
    ) -> (usize, f64) {
        let (times, value_for_index): (&[DateTime<Utc>], Box<dyn Fn(usize) -> f64 + '_>) = match source {
            RainSource::Scalar { times, values, .. } => {
                (times.as_slice(), Box::new(move |i: usize| values[i]))
            }
            RainSource::Gridded { times, .. } => {
                // Gridded sources resolve their field via the provider at
                // the driver layer; here we only resolve the time index.
                (times.as_slice(), Box::new(|_: usize| 0.0))
            }
        };

        let resolved = match sim_time {
            Some(t) => pick_time_index(times, t),
            None => {
                if times.is_empty() {
                    None
                } else {
                    Some(step_index.min(times.len() - 1))
                }
            }
        };
        let resolved = resolved.unwrap_or(0);
        self.last_index[idx] = Some(resolved);

        let raw = value_for_index(resolved);
        (resolved, rain_to_step_mm(raw, source.units(), dt_s))
    }

    pub fn last_resolved_index(&self, idx: usize) -> Option<usize> {
        self.last_index[idx]
    }

    /// Resizes the per-source last-resolved-index bookkeeping to match a
    /// (possibly changed) source count. A no-op if the length already
    /// matches, so calling this every step is cheap.
    pub fn resize(&mut self, num_sources: usize) {
        if self.last_index.len() != num_sources {
            self.last_index = vec![None; num_sources];
        }
    }
}

/// Broadcasts a uniform scalar rain depth to every active cell.
/// Gridded sources get their field from the provider and only
/// need the unit conversion applied cell-wise; that conversion is
/// [`rain_to_step_mm`] run per-cell by the caller.
pub fn broadcast_scalar(value_mm: f64, active: &Array2D<i8>) -> Array2D<f64> {
    let rows = active.rows();
    let cols = active.columns();
    let mut out: Array2D<f64> = Array2D::new(rows, cols, 0.0, 0.0).expect("non-negative dims");
    for row in 0..rows {
        for col in 0..cols {
            if active.get_value(row, col) != 0 {
                out.set_value(row, col, value_mm);
            }
        }
    }
    out
}

/// Acquires this step's blended rainfall field: a weighted sum over every
/// configured source, each contributing `weight * depth_mm_per_step`.
/// `Scalar` sources spread their resolved depth over every active cell;
/// `Gridded` sources defer to `provider` for the raw field and fall back
/// to contributing nothing if no provider was supplied (e.g. on a worker
/// that never mounted the backing store -- the driver broadcasts the
/// resolved field from the rank that did).
pub fn acquire(
    sources: &[RainSource],
    ctx: &mut RainfallContext,
    provider: Option<&dyn GriddedRainProvider>,
    step_index: usize,
    sim_time: Option<DateTime<Utc>>,
    dt_s: f64,
    active: &Array2D<i8>,
) -> Array2D<f64> {
    ctx.resize(sources.len());
    let rows = active.rows();
    let cols = active.columns();
    let mut field: Array2D<f64> = Array2D::new(rows, cols, 0.0, 0.0).expect("non-negative dims");

    for (idx, source) in sources.iter().enumerate() {
        let weight = source.weight();
        if weight == 0.0 {
            continue;
        }
        match source {
            RainSource::Scalar { .. } => {
                let (_, mm) = ctx.step_depth_mm(idx, source, sim_time, step_index, dt_s);
                if mm == 0.0 {
                    continue;
                }
                for row in 0..rows {
                    for col in 0..cols {
                        if active.get_value(row, col) != 0 {
                            field.increment(row, col, weight * mm);
                        }
                    }
                }
            }
            RainSource::Gridded { source_id, .. } => {
                let (resolved_idx, _) = ctx.step_depth_mm(idx, source, sim_time, step_index, dt_s);
                let Some(provider) = provider else {
                    continue;
                };
                let raw_field = provider.read_field(source_id, resolved_idx);
                let units = source.units();
                for row in 0..rows {
                    for col in 0..cols {
                        if active.get_value(row, col) == 0 {
                            continue;
                        }
                        let mm = rain_to_step_mm(raw_field.get_value(row, col), units, dt_s);
                        field.increment(row, col, weight * mm);
                    }
                }
            }
        }
    }
    field
}

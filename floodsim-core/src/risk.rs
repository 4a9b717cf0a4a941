//! Risk index: robust percentile normalization of cumulative
//! runoff and flow-accumulation area, alpha-blended into a single index.
//! Grounded on `lperfect/risk.py::robust_normalize` /
//! `compute_risk_index`.

use floodsim_common::structures::Array2D;

/// Sorted-percentile lookup over the active cells only, linear
/// interpolation between the two bracketing order statistics (matches
/// `numpy.percentile`'s default `linear` method, which the Python
/// original relies on).
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Normalizes `field` to `[0,1]` over the active mask using the
/// `p_low`/`p_high` percentiles as the clamp range; inactive cells or
/// cells outside the mask come back `NaN`. A degenerate range
/// (`p_high <= p_low`, e.g. a perfectly flat field) maps every active
/// cell to `0.0` rather than dividing by zero.
pub fn robust_normalize(field: &Array2D<f64>, active: &Array2D<i8>, p_low: f64, p_high: f64) -> Array2D<f64> {
    let rows = field.rows();
    let cols = field.columns();
    let mut values: Vec<f64> = Vec::new();
    for row in 0..rows {
        for col in 0..cols {
            if active.get_value(row, col) != 0 {
                let v = field.get_value(row, col);
                if v.is_finite() {
                    values.push(v);
                }
            }
        }
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let lo = percentile(&values, p_low);
    let hi = percentile(&values, p_high);
    let span = hi - lo;

    let mut out: Array2D<f64> = Array2D::new(rows, cols, f64::NAN, f64::NAN).expect("non-negative dims");
    for row in 0..rows {
        for col in 0..cols {
            if active.get_value(row, col) == 0 {
                continue;
            }
            let v = field.get_value(row, col);
            if !v.is_finite() {
                continue;
            }
            let norm = if span <= 0.0 {
                0.0
            } else {
                ((v - lo) / span).clamp(0.0, 1.0)
            };
            out.set_value(row, col, norm);
        }
    }
    out
}

/// `R = balance * norm(Q) + (1 - balance) * norm(A)`. Both inputs are
/// normalized with the same `p_low`/`p_high` pair, as the Python original
/// does not vary percentile bounds per field.
pub fn compute_risk_index(
    cumulative_runoff_mm: &Array2D<f64>,
    flow_accum_area_m2: &Array2D<f64>,
    active: &Array2D<i8>,
    balance: f64,
    p_low: f64,
    p_high: f64,
) -> Array2D<f64> {
    let norm_q = robust_normalize(cumulative_runoff_mm, active, p_low, p_high);
    let norm_a = robust_normalize(flow_accum_area_m2, active, p_low, p_high);

    let rows = cumulative_runoff_mm.rows();
    let cols = cumulative_runoff_mm.columns();
    let mut out: Array2D<f64> = Array2D::new(rows, cols, f64::NAN, f64::NAN).expect("non-negative dims");
    for row in 0..rows {
        for col in 0..cols {
            if active.get_value(row, col) == 0 {
                continue;
            }
            let nq = norm_q.get_value(row, col);
            let na = norm_a.get_value(row, col);
            if nq.is_nan() || na.is_nan() {
                continue;
            }
            out.set_value(row, col, balance * nq + (1.0 - balance) * na);
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn normalize_maps_extremes_to_zero_and_one() {
        let mut field: Array2D<f64> = Array2D::new(1, 3, 0.0, f64::NAN).unwrap();
        field.set_value(0, 0, 0.0);
        field.set_value(0, 1, 50.0);
        field.set_value(0, 2, 100.0);
        let active: Array2D<i8> = Array2D::new(1, 3, 1, 0).unwrap();
        let norm = robust_normalize(&field, &active, 0.0, 100.0);
        assert!((norm.get_value(0, 0) - 0.0).abs() < 1e-9);
        assert!((norm.get_value(0, 1) - 0.5).abs() < 1e-9);
        assert!((norm.get_value(0, 2) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn flat_field_normalizes_to_zero() {
        let field: Array2D<f64> = Array2D::new(1, 3, 42.0, f64::NAN).unwrap();
        let active: Array2D<i8> = Array2D::new(1, 3, 1, 0).unwrap();
        let norm = robust_normalize(&field, &active, 1.0, 99.0);
        for col in 0..3 {
            assert_eq!(norm.get_value(0, col), 0.0);
        }
    }

    #[test]
    fn inactive_cells_stay_nan() {
        let field: Array2D<f64> = Array2D::new(1, 2, 10.0, f64::NAN).unwrap();
        let mut active: Array2D<i8> = Array2D::new(1, 2, 1, 0).unwrap();
        active.set_value(0, 1, 0);
        let norm = robust_normalize(&field, &active, 0.0, 100.0);
        assert!(norm.get_value(0, 1).is_nan());
    }

    #[test]
    fn scenario_s5_balanced_blend() {
        let mut q: Array2D<f64> = Array2D::new(1, 2, 0.0, f64::NAN).unwrap();
        q.set_value(0, 0, 0.0);
        q.set_value(0, 1, 100.0);
        let mut a: Array2D<f64> = Array2D::new(1, 2, 0.0, f64::NAN).unwrap();
        a.set_value(0, 0, 100.0);
        a.set_value(0, 1, 0.0);
        let active: Array2D<i8> = Array2D::new(1, 2, 1, 0).unwrap();
        let risk = compute_risk_index(&q, &a, &active, 0.5, 0.0, 100.0);
        assert!((risk.get_value(0, 0) - 0.5).abs() < 1e-9);
        assert!((risk.get_value(0, 1) - 0.5).abs() < 1e-9);
    }
}

use serde::{Deserialize, Serialize};

use crate::error::CutResult;
use crate::space::{Mask, SpaceArray};

// ---------------------------------------------------------------------------
// Threshold predicates: column → mask in the column's space
// ---------------------------------------------------------------------------

pub fn in_int_range(values: &SpaceArray<i64>, low: i64, high: i64) -> Mask {
    values.map(|v| (low..=high).contains(v))
}

/// NaN never passes a threshold.
pub fn at_most(values: &SpaceArray<f64>, max: f64) -> Mask {
    values.map(|&v| v <= max)
}

pub fn at_least(values: &SpaceArray<f64>, min: f64) -> Mask {
    values.map(|&v| v >= min)
}

/// Quantile with linear interpolation between order statistics; NaNs are
/// ignored. `None` for an empty (or all-NaN) input.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
}

/// Entries not above the `q` quantile of the column.
pub fn below_quantile(values: &SpaceArray<f64>, q: f64) -> Mask {
    match quantile(values.values(), q) {
        Some(threshold) => at_most(values, threshold),
        None => values.map(|_| false),
    }
}

/// Euclidean length of two component columns of the same space.
pub fn hypot(a: &SpaceArray<f64>, b: &SpaceArray<f64>) -> CutResult<SpaceArray<f64>> {
    a.zip_with(b, |&x, &y| x.hypot(y))
}

// ---------------------------------------------------------------------------
// Region – fiducial polygon in local coordinates
// ---------------------------------------------------------------------------

/// Closed polygon given by its vertices, in column/row units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Region {
    vertices: Vec<[f64; 2]>,
}

impl Region {
    pub fn new(vertices: Vec<[f64; 2]>) -> Self {
        Self { vertices }
    }

    /// Axis-aligned rectangle.
    pub fn rect(x0: f64, x1: f64, y0: f64, y1: f64) -> Self {
        Self::new(vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1]])
    }

    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    /// Even-odd rule; fewer than three vertices contain nothing.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let n = self.vertices.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let [xi, yi] = self.vertices[i];
            let [xj, yj] = self.vertices[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Entries whose `(x, y)` lies inside `region`; everything passes without one.
pub fn in_region(
    x: &SpaceArray<f64>,
    y: &SpaceArray<f64>,
    region: Option<&Region>,
) -> CutResult<Mask> {
    match region {
        Some(region) => x.zip_with(y, |&x, &y| region.contains(x, y)),
        None => x.zip_with(y, |_, _| true),
    }
}

//! Calibration pattern geometry.
//!
//! The pattern frame has its origin on the first inner corner, X along the
//! grid columns and Z normal to the board. The physical board is the corner
//! grid grown by the border size on every side.

use crate::math::{Pt3, Real};
use crate::transform::TransformKey;
use serde::{Deserialize, Serialize};

/// Inner-corner grid size (columns `x`, rows `y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    pub x: usize,
    pub y: usize,
}

/// Border between the outermost corners and the board edge, in meters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BorderSize {
    pub x: Real,
    pub y: Real,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Whether the pattern stays put across collections.
    pub fixed: bool,
    pub parent_link: String,
    pub link: String,
    pub dimension: GridSize,
    /// Square size in meters.
    pub size: Real,
    #[serde(default)]
    pub border_size: BorderSize,
}

impl PatternConfig {
    pub fn transform_key(&self) -> TransformKey {
        TransformKey::new(self.parent_link.clone(), self.link.clone())
    }

    pub fn num_corners(&self) -> usize {
        self.dimension.x * self.dimension.y
    }

    /// `(column, row)` of a corner id, or `None` if the id is out of range.
    pub fn grid_coords(&self, id: usize) -> Option<(usize, usize)> {
        if id >= self.num_corners() || self.dimension.x == 0 {
            return None;
        }
        Some((id % self.dimension.x, id / self.dimension.x))
    }

    /// Position of a corner in the pattern frame.
    pub fn corner(&self, id: usize) -> Option<Pt3> {
        let (col, row) = self.grid_coords(id)?;
        Some(Pt3::new(
            col as Real * self.size,
            row as Real * self.size,
            0.0,
        ))
    }

    /// Board rectangle `(x_min, x_max, y_min, y_max)` in the pattern plane.
    pub fn limits(&self) -> (Real, Real, Real, Real) {
        let span_x = self.dimension.x.saturating_sub(1) as Real * self.size;
        let span_y = self.dimension.y.saturating_sub(1) as Real * self.size;
        (
            -self.border_size.x,
            span_x + self.border_size.x,
            -self.border_size.y,
            span_y + self.border_size.y,
        )
    }

    /// In-plane distance from `(x, y)` to the board border.
    ///
    /// Inside the board this is the distance to the closest side; outside it
    /// is the Euclidean distance to the rectangle.
    pub fn border_distance(&self, x: Real, y: Real) -> Real {
        let (x_min, x_max, y_min, y_max) = self.limits();
        let inside = x >= x_min && x <= x_max && y >= y_min && y <= y_max;
        if inside {
            (x - x_min).min(x_max - x).min(y - y_min).min(y_max - y)
        } else {
            let dx = (x_min - x).max(0.0).max(x - x_max);
            let dy = (y_min - y).max(0.0).max(y - y_max);
            dx.hypot(dy)
        }
    }
}

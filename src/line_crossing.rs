// src/line_crossing.rs
//
// Count-line geometry.
//
// A vehicle "crosses" when its box center comes within CROSSING_THRESHOLD_PX
// of the infinite line through the two configured points while it is still
// UNCROSSED. Direction of travel and the side it came from are ignored: the
// question answered is "was this vehicle at the stop line during a given
// phase", not "which way did it cross".

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::counting::CrossingState;

/// Proximity (pixels) under which a center point counts as on the line.
pub const CROSSING_THRESHOLD_PX: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Count line as configured, before the frame size is known.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinePoints(pub [[f64; 2]; 2]);

impl LinePoints {
    pub fn new(p1: (f64, f64), p2: (f64, f64)) -> Self {
        Self([[p1.0, p1.1], [p2.0, p2.1]])
    }

    /// Resolves both points against a `width x height` frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> CountLine {
        let [a, b] = self.0;
        CountLine::new(
            PixelPoint::new(resolve_coord(a[0], width), resolve_coord(a[1], height)),
            PixelPoint::new(resolve_coord(b[0], width), resolve_coord(b[1], height)),
        )
    }
}

/// A value in [0,1] is a fraction of `extent`; anything else is already a
/// pixel coordinate. Both cases truncate toward zero.
pub fn resolve_coord(value: f64, extent: u32) -> i32 {
    if (0.0..=1.0).contains(&value) {
        (value * extent as f64) as i32
    } else {
        value as i32
    }
}

/// Count line in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountLine {
    pub p1: PixelPoint,
    pub p2: PixelPoint,
}

impl CountLine {
    pub fn new(p1: PixelPoint, p2: PixelPoint) -> Self {
        let line = Self { p1, p2 };
        if line.is_degenerate() {
            warn!(
                "⚠️  Count line collapses to a single point ({}, {}); no crossings can be registered",
                p1.x, p1.y
            );
        }
        line
    }

    pub fn is_degenerate(&self) -> bool {
        self.p1 == self.p2
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        distance_to_line(
            (x, y),
            (self.p1.x as f64, self.p1.y as f64),
            (self.p2.x as f64, self.p2.y as f64),
        )
    }
}

/// Perpendicular distance from `point` to the infinite line through `p1`
/// and `p2`. NaN when the two points coincide.
pub fn distance_to_line(point: (f64, f64), p1: (f64, f64), p2: (f64, f64)) -> f64 {
    let (x, y) = point;
    let dy = p2.1 - p1.1;
    let dx = p2.0 - p1.0;
    (dy * x - dx * y + p2.0 * p1.1 - p2.1 * p1.0).abs() / dy.hypot(dx)
}

pub fn is_crossing(distance: f64, state: CrossingState) -> bool {
    distance < CROSSING_THRESHOLD_PX && state == CrossingState::Uncrossed
}

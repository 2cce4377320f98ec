// src/geometry.rs
//
// Side-of-line test for the counting line. Integer arithmetic only:
// inputs are pixel coordinates and crossings must be reproducible.
// Differences of i32 need 33 bits and their products 66, so the cross
// product is computed in i128 and is exact for every representable point.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Which half-plane `point` occupies relative to the directed line `p1 -> p2`.
///
/// Cross product of `(point - p1)` and `(p2 - p1)`. Zero means the point is
/// on the line (or the line is degenerate).
pub fn side(point: Point, p1: Point, p2: Point) -> i128 {
    let (px, py) = (point.x as i128, point.y as i128);
    let (x1, y1) = (p1.x as i128, p1.y as i128);
    let (x2, y2) = (p2.x as i128, p2.y as i128);
    (px - x1) * (y2 - y1) - (py - y1) * (x2 - x1)
}

/// True when the two side values lie strictly on opposite half-planes.
pub fn strictly_opposite(a: i128, b: i128) -> bool {
    a.signum() * b.signum() < 0
}

/// Counting line, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub p1: Point,
    pub p2: Point,
}

impl Line {
    pub fn new(p1: Point, p2: Point) -> Self {
        Self { p1, p2 }
    }

    pub fn side_of(&self, point: Point) -> i128 {
        side(point, self.p1, self.p2)
    }

    /// A zero-length line puts every point "on" it, so nothing ever crosses.
    pub fn is_degenerate(&self) -> bool {
        self.p1 == self.p2
    }

    pub fn reversed(&self) -> Self {
        Self::new(self.p2, self.p1)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({},{})->({},{})",
            self.p1.x, self.p1.y, self.p2.x, self.p2.y
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLineError(String);

impl fmt::Display for ParseLineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid line '{}': expected x1,y1,x2,y2", self.0)
    }
}

impl std::error::Error for ParseLineError {}

/// Parses the `x1,y1,x2,y2` form used by the stream endpoint's `line` query.
impl FromStr for Line {
    type Err = ParseLineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let coords = s
            .split(',')
            .map(|part| part.trim().parse::<i32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseLineError(s.to_string()))?;

        match coords.as_slice() {
            [x1, y1, x2, y2] => Ok(Line::new(Point::new(*x1, *y1), Point::new(*x2, *y2))),
            _ => Err(ParseLineError(s.to_string())),
        }
    }
}

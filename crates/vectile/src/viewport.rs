//! Viewport geometry and scale mapping.
//!
//! A viewport is a possibly-rotated rectangle on the map plane. Tile
//! coverage tests use its true rotated extent; everything else works
//! with the derived axis-aligned clip rect.

use glam::DVec2;
use vectile_decode::Rect;

use crate::tile::WORLD_EXTENT;

/// A rotated rectangular view of the map plane.
///
/// Equality is exact value equality on all fields; the scheduler relies
/// on it to short-circuit no-op updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    center: DVec2,
    half_extent: DVec2,
    angle: f64,
}

impl Viewport {
    /// Viewport rotated by `angle` radians around its center.
    #[must_use]
    pub fn new(center: DVec2, half_extent: DVec2, angle: f64) -> Self {
        Self {
            center,
            half_extent,
            angle,
        }
    }

    /// Axis-aligned viewport.
    #[must_use]
    pub fn axis_aligned(center: DVec2, half_extent: DVec2) -> Self {
        Self::new(center, half_extent, 0.0)
    }

    #[must_use]
    pub fn center(&self) -> DVec2 {
        self.center
    }

    #[must_use]
    pub fn half_extent(&self) -> DVec2 {
        self.half_extent
    }

    #[must_use]
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// The viewport's local axes in world space.
    fn axes(&self) -> [DVec2; 2] {
        let (sin, cos) = self.angle.sin_cos();
        [DVec2::new(cos, sin), DVec2::new(-sin, cos)]
    }

    /// Corner points of the rotated rectangle.
    #[must_use]
    pub fn corners(&self) -> [DVec2; 4] {
        let [ax, ay] = self.axes();
        let dx = ax * self.half_extent.x;
        let dy = ay * self.half_extent.y;
        [
            self.center - dx - dy,
            self.center + dx - dy,
            self.center + dx + dy,
            self.center - dx + dy,
        ]
    }

    /// Axis-aligned bounding rect of the rotated extent.
    #[must_use]
    pub fn clip_rect(&self) -> Rect {
        let mut rect = Rect::EMPTY;
        for corner in self.corners() {
            rect.add(corner);
        }
        rect
    }

    /// True geometric intersection with an axis-aligned rect.
    ///
    /// Separating-axis test over the rect's axes and the viewport's own,
    /// so tiles overlapping only the clip rect's corners are rejected.
    #[must_use]
    pub fn intersects_rect(&self, rect: &Rect) -> bool {
        if rect.is_empty() {
            return false;
        }

        let ours = self.corners();
        let theirs = rect.corners();
        let [ax, ay] = self.axes();

        for axis in [DVec2::X, DVec2::Y, ax, ay] {
            if !overlaps(project(&ours, axis), project(&theirs, axis)) {
                return false;
            }
        }
        true
    }

    /// True geometric intersection with another viewport.
    #[must_use]
    pub fn intersects(&self, other: &Viewport) -> bool {
        let ours = self.corners();
        let theirs = other.corners();
        let [ax, ay] = self.axes();
        let [bx, by] = other.axes();

        for axis in [ax, ay, bx, by] {
            if !overlaps(project(&ours, axis), project(&theirs, axis)) {
                return false;
            }
        }
        true
    }
}

fn project(points: &[DVec2; 4], axis: DVec2) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for p in points {
        let d = p.dot(axis);
        min = min.min(d);
        max = max.max(d);
    }
    (min, max)
}

fn overlaps(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0 <= b.1 && b.0 <= a.1
}

/// Maps a viewport to the tile scale used to read it.
pub trait ScaleMapper: Send + Sync {
    fn tile_scale(&self, viewport: &Viewport) -> i32;
}

/// Scale from the viewport's extent: the power of two whose tile size
/// best matches the visible width, clamped to the dataset's maximum.
#[derive(Debug, Clone, Copy)]
pub struct ExtentScaleMapper {
    pub max_scale: i32,
}

impl ScaleMapper for ExtentScaleMapper {
    fn tile_scale(&self, viewport: &Viewport) -> i32 {
        let clip = viewport.clip_rect();
        let width = (clip.max().x - clip.min().x).max(f64::EPSILON);
        let scale = (WORLD_EXTENT / width).log2().floor() as i32;
        scale.clamp(0, self.max_scale)
    }
}

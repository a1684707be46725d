//! Tile identifiers and viewport coverage.

use std::cmp::Ordering;

use vectile_decode::Rect;

use crate::viewport::Viewport;

/// Extent of the globally addressable map plane along each axis. Tiles at
/// scale `s` are squares of `WORLD_EXTENT / 2^s`.
pub const WORLD_EXTENT: f64 = 360.0;

/// Identity of one square map tile at a given scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub x: i32,
    pub y: i32,
    pub scale: i32,
}

impl TileKey {
    #[must_use]
    pub fn new(x: i32, y: i32, scale: i32) -> Self {
        Self { x, y, scale }
    }

    /// Edge length of tiles at this key's scale.
    #[must_use]
    pub fn tile_size(&self) -> f64 {
        WORLD_EXTENT / 2f64.powi(self.scale)
    }

    /// The tile's rectangle on the map plane.
    #[must_use]
    pub fn rect(&self) -> Rect {
        let size = self.tile_size();
        let left = f64::from(self.x) * size;
        let bottom = f64::from(self.y) * size;
        Rect::new(left, bottom, left + size, bottom + size)
    }
}

// Stable total order (scale, then y, then x); the scheduler's sorted-set
// diff depends on it.
impl Ord for TileKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.scale, self.y, self.x).cmp(&(other.scale, other.y, other.x))
    }
}

impl PartialOrd for TileKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compute the sorted set of tiles intersecting a viewport at a scale.
///
/// Candidate tiles come from the integer bounding box of the clip rect;
/// each is kept only if it truly intersects the rotated visible area.
#[must_use]
pub fn coverage_tiles(viewport: &Viewport, scale: i32) -> Vec<TileKey> {
    let size = WORLD_EXTENT / 2f64.powi(scale);
    let clip = viewport.clip_rect();

    let min_x = (clip.min().x / size).floor() as i32;
    let max_x = (clip.max().x / size).ceil() as i32;
    let min_y = (clip.min().y / size).floor() as i32;
    let max_y = (clip.max().y / size).ceil() as i32;

    let mut tiles = Vec::new();
    for ty in min_y..max_y {
        for tx in min_x..max_x {
            let key = TileKey::new(tx, ty, scale);
            if viewport.intersects_rect(&key.rect()) {
                tiles.push(key);
            }
        }
    }

    tiles.sort_unstable();
    tiles.dedup();
    tiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn test_tile_key_ordering() {
        let mut keys = vec![
            TileKey::new(1, 0, 10),
            TileKey::new(0, 1, 10),
            TileKey::new(0, 0, 9),
            TileKey::new(0, 0, 10),
        ];
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                TileKey::new(0, 0, 9),
                TileKey::new(0, 0, 10),
                TileKey::new(1, 0, 10),
                TileKey::new(0, 1, 10),
            ]
        );
    }

    #[test]
    fn test_tile_rect() {
        let key = TileKey::new(1, -1, 2);
        let size = WORLD_EXTENT / 4.0;
        let rect = key.rect();
        assert_eq!(rect.min(), DVec2::new(size, -size));
        assert_eq!(rect.max(), DVec2::new(2.0 * size, 0.0));
    }

    #[test]
    fn test_coverage_of_axis_aligned_viewport() {
        // Scale 2: tile size 90. A viewport spanning x 10..170, y 10..80
        // touches tiles (0,0) and (1,0).
        let v = Viewport::axis_aligned(DVec2::new(90.0, 45.0), DVec2::new(80.0, 35.0));
        let tiles = coverage_tiles(&v, 2);
        assert_eq!(tiles, vec![TileKey::new(0, 0, 2), TileKey::new(1, 0, 2)]);
    }

    #[test]
    fn test_coverage_spans_negative_indices() {
        let v = Viewport::axis_aligned(DVec2::ZERO, DVec2::new(10.0, 10.0));
        let tiles = coverage_tiles(&v, 2);
        assert_eq!(
            tiles,
            vec![
                TileKey::new(-1, -1, 2),
                TileKey::new(0, -1, 2),
                TileKey::new(-1, 0, 2),
                TileKey::new(0, 0, 2),
            ]
        );
    }

    #[test]
    fn test_rotated_coverage_drops_corner_tiles() {
        // A diamond centered on a tile-grid cross point: its clip rect
        // touches a 4x4 tile block, but the corner tiles of that block lie
        // outside the rotated area (L1 radius 60*sqrt(2) ~ 84.85 < 90).
        let size = WORLD_EXTENT / 2f64.powi(3); // 45
        let v = Viewport::new(
            DVec2::new(2.0 * size, 2.0 * size),
            DVec2::new(60.0, 60.0),
            FRAC_PI_4,
        );
        let tiles = coverage_tiles(&v, 3);

        assert!(!tiles.contains(&TileKey::new(0, 0, 3)));
        assert!(!tiles.contains(&TileKey::new(3, 3, 3)));
        assert!(tiles.contains(&TileKey::new(1, 1, 3)));
        assert!(tiles.contains(&TileKey::new(2, 2, 3)));

        // Sorted and unique.
        let mut sorted = tiles.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(tiles, sorted);
    }
}

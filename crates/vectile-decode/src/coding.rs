//! Delta-coded point sequences.
//!
//! Geometry is stored as zigzag-varint coordinate deltas on a quantized
//! grid. Every scale bucket carries its own [`CodingParams`]; outer
//! geometry re-anchors the params at the feature's inline anchor point
//! before decoding the per-scale stream.

use glam::DVec2;

use crate::error::DecodeResult;
use crate::varint::{read_varint, read_zigzag};

/// Quantization parameters for one coordinate stream.
///
/// Coordinates dequantize as `base + delta / 2^granularity_bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodingParams {
    base: (i64, i64),
    granularity_bits: u8,
}

impl CodingParams {
    /// Params with the given grid resolution, anchored at the origin.
    #[must_use]
    pub fn new(granularity_bits: u8) -> Self {
        Self {
            base: (0, 0),
            granularity_bits,
        }
    }

    /// Re-anchor the params at a decoded map point.
    pub fn set_base_point(&mut self, point: DVec2) {
        self.base = self.quantize(point);
    }

    fn granularity(&self) -> f64 {
        f64::from(1u32 << self.granularity_bits)
    }

    pub(crate) fn base(&self) -> (i64, i64) {
        self.base
    }

    pub(crate) fn quantize(&self, point: DVec2) -> (i64, i64) {
        let g = self.granularity();
        ((point.x * g).round() as i64, (point.y * g).round() as i64)
    }

    fn dequantize(&self, q: (i64, i64)) -> DVec2 {
        let g = self.granularity();
        DVec2::new(q.0 as f64 / g, q.1 as f64 / g)
    }
}

/// Decode one point as a delta from the params' base.
///
/// # Errors
///
/// Fails on a truncated or overlong coordinate varint.
pub fn load_point(data: &[u8], offset: &mut usize, cp: &CodingParams) -> DecodeResult<DVec2> {
    let dx = read_zigzag(data, offset)?;
    let dy = read_zigzag(data, offset)?;
    Ok(cp.dequantize((cp.base.0 + dx, cp.base.1 + dy)))
}

/// Decode a delta-chained path of `count` points, the first anchored at
/// the params' base.
///
/// # Errors
///
/// Fails on a truncated coordinate varint.
pub fn load_path(
    data: &[u8],
    offset: &mut usize,
    count: usize,
    cp: &CodingParams,
) -> DecodeResult<Vec<DVec2>> {
    let mut points = Vec::with_capacity(count);
    let mut cursor = cp.base;

    for _ in 0..count {
        cursor.0 += read_zigzag(data, offset)?;
        cursor.1 += read_zigzag(data, offset)?;
        points.push(cp.dequantize(cursor));
    }

    Ok(points)
}

/// Decode a count-prefixed outer path from a per-scale stream.
///
/// The decoded points continue from the params' base (the feature's
/// anchor point); the anchor itself is not part of the result.
///
/// # Errors
///
/// Fails on a truncated count or coordinate varint.
pub fn load_outer_path(
    data: &[u8],
    offset: &mut usize,
    cp: &CodingParams,
) -> DecodeResult<Vec<DVec2>> {
    let count = read_varint(data, offset)? as usize;
    load_path(data, offset, count, cp)
}

/// Decode an inner triangle strip of `vertex_count` vertices into a
/// triangle list (three points per triangle, consistent winding).
///
/// # Errors
///
/// Fails on a truncated coordinate varint.
pub fn load_strip(
    data: &[u8],
    offset: &mut usize,
    vertex_count: usize,
    cp: &CodingParams,
) -> DecodeResult<Vec<DVec2>> {
    let vertices = load_path(data, offset, vertex_count, cp)?;
    Ok(strip_to_triangles(&vertices))
}

/// Decode a count-prefixed outer triangle strip from a per-scale stream.
///
/// # Errors
///
/// Fails on a truncated count or coordinate varint.
pub fn load_outer_strip(
    data: &[u8],
    offset: &mut usize,
    cp: &CodingParams,
) -> DecodeResult<Vec<DVec2>> {
    let count = read_varint(data, offset)? as usize;
    load_strip(data, offset, count, cp)
}

/// Unroll a triangle strip into a triangle list, alternating vertex order
/// so every triangle keeps the strip's winding.
fn strip_to_triangles(vertices: &[DVec2]) -> Vec<DVec2> {
    if vertices.len() < 3 {
        return Vec::new();
    }

    let mut triangles = Vec::with_capacity((vertices.len() - 2) * 3);
    for i in 2..vertices.len() {
        if i % 2 == 0 {
            triangles.extend([vertices[i - 2], vertices[i - 1], vertices[i]]);
        } else {
            triangles.extend([vertices[i - 1], vertices[i - 2], vertices[i]]);
        }
    }
    triangles
}

//! Staged, memoized decoding of one packed feature record.
//!
//! A record is parsed in stages (types, common attributes, geometry
//! layout, geometry or triangles, metadata), each stage running at most
//! once and invoking its prerequisites itself. Geometry is resolved
//! lazily against a requested scale; the first resolution wins for the
//! record's lifetime until [`FeatureRecord::reset_geometry`].

use glam::DVec2;

use crate::bits::BitSource;
use crate::coding::{load_outer_path, load_outer_strip, load_path, load_point, load_strip};
use crate::error::{DecodeError, DecodeResult};
use crate::offsets::{GeometryOffsets, read_offsets};
use crate::rect::Rect;
use crate::scale::ScaleRequest;
use crate::source::{DecodeContext, Metadata};
use crate::varint::read_varint;

/// Header bit layout. Bits 0-2 carry the type count minus one; bits 5-6
/// the geometry kind. Unknown flag combinations are ignored, not rejected.
const HEADER_TYPE_COUNT_MASK: u8 = 0b0000_0111;
const HEADER_HAS_NAME: u8 = 1 << 3;
const HEADER_HAS_LAYER: u8 = 1 << 4;
const HEADER_GEOM_SHIFT: u8 = 5;
const HEADER_GEOM_MASK: u8 = 0b0110_0000;
const HEADER_HAS_EXTRA: u8 = 1 << 7;

/// Geometry kind of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomType {
    Point,
    Line,
    Area,
}

/// Geometry for records synthesized in memory rather than decoded from
/// storage. Area geometry is a triangle list, three points per triangle.
#[derive(Debug, Clone)]
pub enum GeometryData {
    Point(DVec2),
    Line(Vec<DVec2>),
    Area(Vec<DVec2>),
}

/// Size statistics for one decoded geometry stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeomStat {
    /// Bytes consumed from the backing stream (outer) or record (inner).
    pub bytes: u32,
    /// Decoded point count.
    pub elements: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct ParsedStages {
    types: bool,
    common: bool,
    header2: bool,
    points: bool,
    triangles: bool,
    metadata: bool,
    meta_ids: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct InnerStats {
    points: u32,
    strips: u32,
    size: u32,
}

/// One packed feature record plus its monotonically-advancing parse state.
#[derive(Debug)]
pub struct FeatureRecord {
    data: Vec<u8>,
    header: u8,
    id: u32,
    storage_backed: bool,
    parsed: ParsedStages,
    common_offset: usize,
    header2_offset: usize,
    types: Vec<u32>,
    name: Option<String>,
    layer: i8,
    rank: u8,
    road_ref: Option<String>,
    house_number: Option<String>,
    center: DVec2,
    points: Vec<DVec2>,
    triangles: Vec<DVec2>,
    pts_offsets: GeometryOffsets,
    trg_offsets: GeometryOffsets,
    pts_simp_mask: u32,
    inner_stats: InnerStats,
    limit_rect: Rect,
    metadata: Metadata,
    meta_ids: Vec<(u8, u64)>,
}

impl FeatureRecord {
    /// Wrap a storage-backed record buffer.
    ///
    /// # Errors
    ///
    /// Fails on an empty buffer.
    pub fn new(data: Vec<u8>, id: u32) -> DecodeResult<Self> {
        let header = *data.first().ok_or(DecodeError::InvalidFormat {
            context: "record",
            detail: String::from("empty buffer"),
        })?;

        Ok(Self {
            data,
            header,
            id,
            storage_backed: true,
            parsed: ParsedStages::default(),
            common_offset: 0,
            header2_offset: 0,
            types: Vec::new(),
            name: None,
            layer: 0,
            rank: 0,
            road_ref: None,
            house_number: None,
            center: DVec2::ZERO,
            points: Vec::new(),
            triangles: Vec::new(),
            pts_offsets: GeometryOffsets::default(),
            trg_offsets: GeometryOffsets::default(),
            pts_simp_mask: 0,
            inner_stats: InnerStats::default(),
            limit_rect: Rect::EMPTY,
            metadata: Metadata::new(),
            meta_ids: Vec::new(),
        })
    }

    /// Build a fully-parsed record from in-memory parts.
    ///
    /// Such records have no backing buffer: every stage is already
    /// complete and [`reset_geometry`](Self::reset_geometry) is a no-op.
    #[must_use]
    pub fn from_parts(
        id: u32,
        types: Vec<u32>,
        geometry: GeometryData,
        name: Option<String>,
    ) -> Self {
        let kind = match geometry {
            GeometryData::Point(_) => 0u8,
            GeometryData::Line(_) => 1,
            GeometryData::Area(_) => 2,
        };

        let type_count = types.len().clamp(1, 8);
        let mut header = (type_count - 1) as u8;
        header |= kind << HEADER_GEOM_SHIFT;
        if name.is_some() {
            header |= HEADER_HAS_NAME;
        }

        let mut limit_rect = Rect::EMPTY;
        let mut center = DVec2::ZERO;
        let mut points = Vec::new();
        let mut triangles = Vec::new();
        match geometry {
            GeometryData::Point(p) => {
                center = p;
                limit_rect.add(p);
            }
            GeometryData::Line(pts) => {
                limit_rect.add_all(&pts);
                points = pts;
            }
            GeometryData::Area(trg) => {
                limit_rect.add_all(&trg);
                triangles = trg;
            }
        }

        Self {
            data: Vec::new(),
            header,
            id,
            storage_backed: false,
            parsed: ParsedStages {
                types: true,
                common: true,
                header2: true,
                points: true,
                triangles: true,
                metadata: true,
                meta_ids: true,
            },
            common_offset: 0,
            header2_offset: 0,
            types,
            name,
            layer: 0,
            rank: 0,
            road_ref: None,
            house_number: None,
            center,
            points,
            triangles,
            pts_offsets: GeometryOffsets::default(),
            trg_offsets: GeometryOffsets::default(),
            pts_simp_mask: 0,
            inner_stats: InnerStats::default(),
            limit_rect,
            metadata: Metadata::new(),
            meta_ids: Vec::new(),
        }
    }

    /// Feature identity used for metadata lookups.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Geometry kind from the header byte. Unknown kind values decode as
    /// `Point` so newer-schema records stay readable.
    #[must_use]
    pub fn geom_type(&self) -> GeomType {
        match (self.header & HEADER_GEOM_MASK) >> HEADER_GEOM_SHIFT {
            1 => GeomType::Line,
            2 => GeomType::Area,
            _ => GeomType::Point,
        }
    }

    /// Decode the feature's type codes.
    ///
    /// Indices the classificator cannot resolve are substituted with its
    /// stub type and logged; this keeps newer-schema datasets readable.
    pub fn parse_types(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<()> {
        if self.parsed.types {
            return Ok(());
        }

        let mut pos = 1usize;
        let count = usize::from(self.header & HEADER_TYPE_COUNT_MASK) + 1;
        self.types.reserve(count);

        for _ in 0..count {
            let index = read_varint(&self.data, &mut pos)?;
            match ctx.classificator.type_for_index(index) {
                Some(code) => self.types.push(code),
                None => {
                    tracing::warn!(
                        feature = self.id,
                        index,
                        "unresolvable type index, substituting stub type"
                    );
                    self.types.push(ctx.classificator.stub_type());
                }
            }
        }

        self.common_offset = pos;
        self.parsed.types = true;
        Ok(())
    }

    /// Decode the common attributes (name, layer, extra attribute) and,
    /// for point features, the single coordinate pair.
    pub fn parse_common(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<()> {
        if self.parsed.common {
            return Ok(());
        }
        self.parse_types(ctx)?;

        let mut pos = self.common_offset;

        if self.header & HEADER_HAS_NAME != 0 {
            self.name = Some(read_string(&self.data, &mut pos, "name")?);
        }
        if self.header & HEADER_HAS_LAYER != 0 {
            let byte = *self.data.get(pos).ok_or(DecodeError::UnexpectedEof {
                context: "layer",
            })?;
            pos += 1;
            self.layer = byte as i8;
        }
        if self.header & HEADER_HAS_EXTRA != 0 {
            match self.geom_type() {
                GeomType::Point => {
                    self.rank = *self.data.get(pos).ok_or(DecodeError::UnexpectedEof {
                        context: "rank",
                    })?;
                    pos += 1;
                }
                GeomType::Line => {
                    self.road_ref = Some(read_string(&self.data, &mut pos, "road ref")?);
                }
                GeomType::Area => {
                    self.house_number = Some(read_string(&self.data, &mut pos, "house number")?);
                }
            }
        }

        if self.geom_type() == GeomType::Point {
            let cp = ctx.load_info.default_coding_params();
            self.center = load_point(&self.data, &mut pos, &cp)?;
            self.limit_rect.add(self.center);
        }

        self.header2_offset = pos;
        self.parsed.common = true;
        Ok(())
    }

    /// Decode the bit-packed geometry layout header and any inline
    /// geometry payload (inner vertices, or outer anchor + offset table).
    pub fn parse_header2(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<()> {
        if self.parsed.header2 {
            return Ok(());
        }
        self.parse_common(ctx)?;

        let geom = self.geom_type();
        let mut bits = BitSource::new(&self.data, self.header2_offset);

        let mut pts_count = 0u8;
        let mut pts_mask = 0u8;
        let mut trg_count = 0u8;
        let mut trg_mask = 0u8;

        match geom {
            GeomType::Line => {
                pts_count = bits.read(4)?;
                if pts_count == 0 {
                    pts_mask = bits.read(4)?;
                } else if pts_count < 2 {
                    return Err(DecodeError::InvalidFormat {
                        context: "geometry header",
                        detail: String::from("inner line with a single vertex"),
                    });
                }
            }
            GeomType::Area => {
                trg_count = bits.read(4)?;
                if trg_count == 0 {
                    trg_mask = bits.read(4)?;
                }
            }
            GeomType::Point => {}
        }

        let mut pos = bits.round_ptr();
        let cp = ctx.load_info.default_coding_params();
        let bucket_count = ctx.load_info.scales().len();

        match geom {
            GeomType::Line => {
                if pts_count > 0 {
                    // 2-bit simplification levels, four interior vertices
                    // per byte, precede the vertex list.
                    let interior = usize::from(pts_count) - 2;
                    let mask_bytes = interior.div_ceil(4);
                    for i in 0..mask_bytes {
                        let byte = *self.data.get(pos).ok_or(DecodeError::UnexpectedEof {
                            context: "simplification mask",
                        })?;
                        pos += 1;
                        self.pts_simp_mask |= u32::from(byte) << (i * 8);
                    }

                    let start = pos;
                    self.points = load_path(&self.data, &mut pos, usize::from(pts_count), &cp)?;
                    self.inner_stats.points = (pos - start) as u32;
                } else {
                    // Outer layout: a single anchor point, then one offset
                    // per present scale bucket.
                    self.points.push(load_point(&self.data, &mut pos, &cp)?);
                    self.pts_offsets = read_offsets(&self.data, &mut pos, pts_mask, bucket_count)?;
                }
            }
            GeomType::Area => {
                if trg_count > 0 {
                    let vertices = usize::from(trg_count) + 2;
                    let start = pos;
                    self.triangles = load_strip(&self.data, &mut pos, vertices, &cp)?;
                    self.inner_stats.strips = (pos - start) as u32;
                } else {
                    self.trg_offsets = read_offsets(&self.data, &mut pos, trg_mask, bucket_count)?;
                }
            }
            GeomType::Point => {}
        }

        self.inner_stats.size = pos as u32;
        self.parsed.header2 = true;
        Ok(())
    }

    /// Decode line geometry at the requested resolution.
    ///
    /// Inner layout filters the in-memory vertices by simplification
    /// level; outer layout resolves a scale bucket (falling back to the
    /// worst available one) and decodes the per-scale stream. Returns the
    /// bytes read from the outer stream, 0 for inner geometry or when the
    /// stage already ran.
    pub fn parse_geometry(
        &mut self,
        ctx: &DecodeContext<'_>,
        request: ScaleRequest,
    ) -> DecodeResult<u32> {
        if self.parsed.points {
            return Ok(0);
        }
        self.parse_header2(ctx)?;

        let mut bytes_read = 0u32;
        if self.geom_type() == GeomType::Line {
            let scales = ctx.load_info.scales();
            if self.points.len() < 2 {
                debug_assert_eq!(self.points.len(), 1);
                let ind = scales
                    .resolve_with_offsets(request, &self.pts_offsets)
                    .or_else(|| {
                        scales.resolve_with_offsets(ScaleRequest::Worst, &self.pts_offsets)
                    });
                if let Some(ind) = ind {
                    let stream = ctx.load_info.geometry_stream(ind)?;
                    let mut pos = self.pts_offsets.get(ind) as usize;
                    let start = pos;

                    let mut cp = ctx.load_info.coding_params(ind);
                    cp.set_base_point(self.points[0]);
                    let tail = load_outer_path(stream, &mut pos, &cp)?;
                    self.points.extend(tail);
                    bytes_read = (pos - start) as u32;
                }
            } else {
                let bucket = scales.resolve(request);
                self.points =
                    filter_inner_points(&self.points, self.pts_simp_mask, bucket, scales.len());
            }
            self.limit_rect.add_all(&self.points);
        }

        self.parsed.points = true;
        Ok(bytes_read)
    }

    /// Decode area triangles at the requested resolution.
    ///
    /// Returns the bytes read from the outer stream, 0 for inner strips
    /// or when the stage already ran.
    pub fn parse_triangles(
        &mut self,
        ctx: &DecodeContext<'_>,
        request: ScaleRequest,
    ) -> DecodeResult<u32> {
        if self.parsed.triangles {
            return Ok(0);
        }
        self.parse_header2(ctx)?;

        let mut bytes_read = 0u32;
        if self.geom_type() == GeomType::Area {
            if self.triangles.is_empty() {
                let scales = ctx.load_info.scales();
                if let Some(ind) = scales.resolve_with_offsets(request, &self.trg_offsets) {
                    let stream = ctx.load_info.triangles_stream(ind)?;
                    let mut pos = self.trg_offsets.get(ind) as usize;
                    let start = pos;

                    let cp = ctx.load_info.coding_params(ind);
                    self.triangles = load_outer_strip(stream, &mut pos, &cp)?;
                    bytes_read = (pos - start) as u32;
                }
            }
            self.limit_rect.add_all(&self.triangles);
        }

        self.parsed.triangles = true;
        Ok(bytes_read)
    }

    /// Decode geometry and triangles in one call.
    pub fn parse_all_geometry(
        &mut self,
        ctx: &DecodeContext<'_>,
        request: ScaleRequest,
    ) -> DecodeResult<()> {
        self.parse_geometry(ctx, request)?;
        self.parse_triangles(ctx, request)?;
        Ok(())
    }

    /// Fetch the feature's full tag set.
    ///
    /// A storage-open failure is logged and treated as "no metadata";
    /// other storage errors propagate.
    pub fn parse_metadata(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<()> {
        if self.parsed.metadata {
            return Ok(());
        }

        match ctx.metadata.metadata(self.id) {
            Ok(m) => self.metadata = m,
            Err(DecodeError::StorageOpen { .. }) => {
                tracing::error!(feature = self.id, "error reading metadata");
            }
            Err(e) => return Err(e),
        }

        self.parsed.metadata = true;
        Ok(())
    }

    /// Fetch the feature's tag-id list for lazy per-tag lookup.
    pub fn parse_meta_ids(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<()> {
        if self.parsed.meta_ids {
            return Ok(());
        }

        match ctx.metadata.meta_ids(self.id) {
            Ok(ids) => self.meta_ids = ids,
            Err(DecodeError::StorageOpen { .. }) => {
                tracing::error!(feature = self.id, "error reading metadata ids");
            }
            Err(e) => return Err(e),
        }

        self.parsed.meta_ids = true;
        Ok(())
    }

    /// Discard decoded geometry so it can be re-resolved at another scale.
    ///
    /// Only meaningful for storage-backed records; records built with
    /// [`from_parts`](Self::from_parts) keep their geometry.
    pub fn reset_geometry(&mut self) {
        if !self.storage_backed {
            return;
        }

        self.points.clear();
        self.triangles.clear();
        if self.geom_type() != GeomType::Point {
            self.limit_rect = Rect::EMPTY;
        }

        self.parsed.header2 = false;
        self.parsed.points = false;
        self.parsed.triangles = false;
        self.pts_offsets.clear();
        self.trg_offsets.clear();
        self.pts_simp_mask = 0;
    }

    /// The feature's canonical type codes.
    pub fn types(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<&[u32]> {
        self.parse_types(ctx)?;
        Ok(&self.types)
    }

    /// The feature's name, if any.
    pub fn name(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<Option<&str>> {
        self.parse_common(ctx)?;
        Ok(self.name.as_deref())
    }

    /// Display layer. Features without the layer flag are layer 0 and
    /// need no parsing at all.
    pub fn layer(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<i8> {
        if self.header & HEADER_HAS_LAYER == 0 {
            return Ok(0);
        }
        self.parse_common(ctx)?;
        Ok(self.layer)
    }

    pub fn rank(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<u8> {
        self.parse_common(ctx)?;
        Ok(self.rank)
    }

    pub fn road_ref(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<Option<&str>> {
        self.parse_common(ctx)?;
        Ok(self.road_ref.as_deref())
    }

    pub fn house_number(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<Option<&str>> {
        self.parse_common(ctx)?;
        Ok(self.house_number.as_deref())
    }

    /// The coordinate of a point feature.
    pub fn center(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<DVec2> {
        debug_assert_eq!(self.geom_type(), GeomType::Point);
        self.parse_common(ctx)?;
        Ok(self.center)
    }

    /// Bounding rect of the geometry decoded at the requested resolution.
    ///
    /// A non-point feature with no geometry at this resolution reports a
    /// zero rect.
    pub fn limit_rect(
        &mut self,
        ctx: &DecodeContext<'_>,
        request: ScaleRequest,
    ) -> DecodeResult<Rect> {
        self.parse_all_geometry(ctx, request)?;

        if self.triangles.is_empty() && self.points.is_empty() && self.geom_type() != GeomType::Point
        {
            self.limit_rect = Rect::new(0.0, 0.0, 0.0, 0.0);
        }

        Ok(self.limit_rect)
    }

    /// Whether the feature decodes to no drawable geometry at this
    /// resolution.
    pub fn is_empty_geometry(
        &mut self,
        ctx: &DecodeContext<'_>,
        request: ScaleRequest,
    ) -> DecodeResult<bool> {
        self.parse_all_geometry(ctx, request)?;
        Ok(match self.geom_type() {
            GeomType::Area => self.triangles.is_empty(),
            GeomType::Line => self.points.is_empty(),
            GeomType::Point => false,
        })
    }

    /// Decoded line vertices. Valid after the geometry stage.
    #[must_use]
    pub fn points(&self) -> &[DVec2] {
        debug_assert!(self.parsed.points);
        &self.points
    }

    /// Number of decoded line vertices. Valid after the geometry stage.
    #[must_use]
    pub fn points_count(&self) -> usize {
        debug_assert!(self.parsed.points);
        self.points.len()
    }

    /// One decoded line vertex. Valid after the geometry stage.
    #[must_use]
    pub fn point(&self, i: usize) -> DVec2 {
        debug_assert!(self.parsed.points);
        self.points[i]
    }

    /// Decoded triangle list. Valid after the triangles stage.
    #[must_use]
    pub fn triangles(&self) -> &[DVec2] {
        debug_assert!(self.parsed.triangles);
        &self.triangles
    }

    /// Triangles decoded at the requested resolution.
    pub fn triangles_at(
        &mut self,
        ctx: &DecodeContext<'_>,
        request: ScaleRequest,
    ) -> DecodeResult<&[DVec2]> {
        self.parse_triangles(ctx, request)?;
        Ok(&self.triangles)
    }

    /// Line geometry size statistics at the requested resolution.
    pub fn geometry_size(
        &mut self,
        ctx: &DecodeContext<'_>,
        request: ScaleRequest,
    ) -> DecodeResult<GeomStat> {
        let mut bytes = self.parse_geometry(ctx, request)?;
        if bytes == 0 && !self.points.is_empty() {
            bytes = self.inner_stats.points;
        }
        Ok(GeomStat {
            bytes,
            elements: self.points.len(),
        })
    }

    /// Triangle geometry size statistics at the requested resolution.
    pub fn triangles_size(
        &mut self,
        ctx: &DecodeContext<'_>,
        request: ScaleRequest,
    ) -> DecodeResult<GeomStat> {
        let mut bytes = self.parse_triangles(ctx, request)?;
        if bytes == 0 && !self.triangles.is_empty() {
            bytes = self.inner_stats.strips;
        }
        Ok(GeomStat {
            bytes,
            elements: self.triangles.len(),
        })
    }

    /// The feature's full tag set.
    pub fn metadata(&mut self, ctx: &DecodeContext<'_>) -> DecodeResult<&Metadata> {
        self.parse_metadata(ctx)?;
        Ok(&self.metadata)
    }

    /// One tag value, fetched lazily by id when not already cached.
    pub fn metadata_value(
        &mut self,
        ctx: &DecodeContext<'_>,
        kind: u8,
    ) -> DecodeResult<Option<&str>> {
        self.parse_meta_ids(ctx)?;

        if !self.metadata.has(kind) {
            let id = self
                .meta_ids
                .iter()
                .find(|&&(k, _)| k == kind)
                .map(|&(_, id)| id);
            if let Some(id) = id {
                let value = ctx.metadata.meta_by_id(id)?;
                self.metadata.insert(kind, value);
            }
        }

        Ok(self.metadata.get(kind))
    }

    /// Whether the feature carries a tag of the given kind.
    pub fn has_metadata(&mut self, ctx: &DecodeContext<'_>, kind: u8) -> DecodeResult<bool> {
        self.parse_meta_ids(ctx)?;
        Ok(self.metadata.has(kind) || self.meta_ids.iter().any(|&(k, _)| k == kind))
    }
}

fn read_string(data: &[u8], pos: &mut usize, context: &'static str) -> DecodeResult<String> {
    let len = read_varint(data, pos)? as usize;
    let bytes = data
        .get(*pos..*pos + len)
        .ok_or(DecodeError::UnexpectedEof { context })?;
    *pos += len;
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| DecodeError::InvalidFormat {
            context,
            detail: String::from("not valid UTF-8"),
        })
}

/// Filter inner-line vertices by simplification level.
///
/// Both endpoints always survive. Interior vertex `i` (1-based interior
/// index) survives when its 2-bit level is at or below the resolved
/// bucket. If no interior vertex survives, the vertices whose level
/// equals the minimum level seen while the kept set was still empty are
/// re-included, so a ≥2-point line never collapses below 2 points.
fn filter_inner_points(
    points: &[DVec2],
    simp_mask: u32,
    bucket: usize,
    bucket_count: usize,
) -> Vec<DVec2> {
    let count = points.len();
    debug_assert!(count >= 2);

    let level_of = |i: usize| ((simp_mask >> (2 * (i - 1))) & 0x3) as usize;

    let mut out = Vec::with_capacity(count);
    out.push(points[0]);

    let mut min_level = bucket_count - 1;
    for i in 1..count - 1 {
        let level = level_of(i);
        if level <= bucket {
            out.push(points[i]);
        } else if out.len() == 1 && min_level > level {
            min_level = level;
        }
    }

    if out.len() == 1 {
        for i in 1..count - 1 {
            if level_of(i) == min_level {
                out.push(points[i]);
            }
        }
    }

    out.push(points[count - 1]);
    out
}

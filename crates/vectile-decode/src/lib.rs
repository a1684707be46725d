//! Decode packed multi-resolution map features from vectile records.
//!
//! This crate provides pure synchronous decoding of scale-layered feature
//! records: staged header/attribute parsing, per-scale geometry offset
//! resolution, and bit-packed simplification masks. All functions are
//! designed to be called from any threading context - the library user
//! controls parallelism.
//!
//! # Design principles
//!
//! - **Synchronous**: No async, no threading primitives
//! - **Lazy**: Each record parses in memoized stages, geometry only at
//!   the resolution actually requested
//! - **Storage-agnostic**: Streams, classificator, and metadata arrive
//!   through collaborator traits

pub mod bits;
pub mod coding;
mod error;
pub mod feature;
pub mod offsets;
pub mod rect;
pub mod scale;
pub mod source;
mod varint;

#[cfg(test)]
pub(crate) mod testenc;

pub use bits::BitSource;
pub use coding::CodingParams;
pub use error::{DecodeError, DecodeResult};
pub use feature::{FeatureRecord, GeomStat, GeomType, GeometryData};
pub use offsets::{GeometryOffsets, INVALID_OFFSET};
pub use rect::Rect;
pub use scale::{ScaleRequest, ScaleTable};
pub use source::{
    Classificator, DecodeContext, LoadInfo, MemoryStore, Metadata, MetadataSource,
};
pub use varint::{read_varint, read_zigzag};

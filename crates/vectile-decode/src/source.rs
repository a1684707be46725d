//! Storage collaborator seams.
//!
//! The decoder never touches files or sockets itself; everything outside
//! the record buffer arrives through these traits. [`MemoryStore`] is an
//! in-process implementation for tests and embedders that already hold
//! the dataset in memory.

use std::collections::HashMap;

use crate::coding::CodingParams;
use crate::error::{DecodeError, DecodeResult};
use crate::scale::ScaleTable;

/// Maps dataset type indices to canonical type codes.
pub trait Classificator {
    /// Canonical code for a stored type index, `None` when the index is
    /// unknown to this classificator version.
    fn type_for_index(&self, index: u32) -> Option<u32>;

    /// Substitute code recorded for unresolvable indices.
    fn stub_type(&self) -> u32;
}

/// Dataset-wide geometry storage: scale table, coding parameters, and the
/// per-scale geometry and triangle streams.
pub trait LoadInfo {
    fn scales(&self) -> &ScaleTable;

    /// Coding parameters for one scale bucket's streams.
    fn coding_params(&self, bucket: usize) -> CodingParams;

    /// Coding parameters for geometry stored inline in the record.
    fn default_coding_params(&self) -> CodingParams;

    /// The geometry stream for a scale bucket.
    fn geometry_stream(&self, bucket: usize) -> DecodeResult<&[u8]>;

    /// The triangle stream for a scale bucket.
    fn triangles_stream(&self, bucket: usize) -> DecodeResult<&[u8]>;
}

/// Free-form tags attached to a feature, keyed by tag kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: HashMap<u8, String>,
}

impl Metadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, kind: u8) -> Option<&str> {
        self.entries.get(&kind).map(String::as_str)
    }

    #[must_use]
    pub fn has(&self, kind: u8) -> bool {
        self.entries.contains_key(&kind)
    }

    pub fn insert(&mut self, kind: u8, value: String) {
        self.entries.insert(kind, value);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Metadata blob access, keyed by feature identity.
pub trait MetadataSource {
    /// All tags for a feature.
    fn metadata(&self, feature: u32) -> DecodeResult<Metadata>;

    /// Tag kind / value-id pairs for a feature, for lazy per-tag lookup.
    fn meta_ids(&self, feature: u32) -> DecodeResult<Vec<(u8, u64)>>;

    /// A single tag value by its id.
    fn meta_by_id(&self, id: u64) -> DecodeResult<String>;
}

/// The collaborators one decode pass needs, bundled for call-site brevity.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    pub classificator: &'a dyn Classificator,
    pub load_info: &'a dyn LoadInfo,
    pub metadata: &'a dyn MetadataSource,
}

impl<'a> DecodeContext<'a> {
    #[must_use]
    pub fn new(
        classificator: &'a dyn Classificator,
        load_info: &'a dyn LoadInfo,
        metadata: &'a dyn MetadataSource,
    ) -> Self {
        Self {
            classificator,
            load_info,
            metadata,
        }
    }
}

/// In-memory dataset storage implementing all collaborator traits.
#[derive(Debug)]
pub struct MemoryStore {
    scales: ScaleTable,
    granularity_bits: u8,
    geometry: Vec<Vec<u8>>,
    triangles: Vec<Vec<u8>>,
    types: HashMap<u32, u32>,
    stub_type: u32,
    metadata: HashMap<u32, Metadata>,
    meta_ids: HashMap<u32, Vec<(u8, u64)>>,
    meta_values: HashMap<u64, String>,
}

impl MemoryStore {
    /// Empty store over the given scale table and grid resolution.
    #[must_use]
    pub fn new(scales: ScaleTable, granularity_bits: u8) -> Self {
        let buckets = scales.len();
        Self {
            scales,
            granularity_bits,
            geometry: vec![Vec::new(); buckets],
            triangles: vec![Vec::new(); buckets],
            types: HashMap::new(),
            stub_type: 0,
            metadata: HashMap::new(),
            meta_ids: HashMap::new(),
            meta_values: HashMap::new(),
        }
    }

    /// Register a type index translation.
    pub fn insert_type(&mut self, index: u32, code: u32) {
        self.types.insert(index, code);
    }

    pub fn set_stub_type(&mut self, code: u32) {
        self.stub_type = code;
    }

    /// Replace one bucket's geometry stream.
    pub fn set_geometry_stream(&mut self, bucket: usize, bytes: Vec<u8>) {
        self.geometry[bucket] = bytes;
    }

    /// Replace one bucket's triangle stream.
    pub fn set_triangles_stream(&mut self, bucket: usize, bytes: Vec<u8>) {
        self.triangles[bucket] = bytes;
    }

    pub fn insert_metadata(&mut self, feature: u32, metadata: Metadata) {
        self.metadata.insert(feature, metadata);
    }

    pub fn insert_meta_ids(&mut self, feature: u32, ids: Vec<(u8, u64)>) {
        self.meta_ids.insert(feature, ids);
    }

    pub fn insert_meta_value(&mut self, id: u64, value: String) {
        self.meta_values.insert(id, value);
    }

    /// A context borrowing this store for all three collaborator roles.
    #[must_use]
    pub fn context(&self) -> DecodeContext<'_> {
        DecodeContext::new(self, self, self)
    }
}

impl Classificator for MemoryStore {
    fn type_for_index(&self, index: u32) -> Option<u32> {
        self.types.get(&index).copied()
    }

    fn stub_type(&self) -> u32 {
        self.stub_type
    }
}

impl LoadInfo for MemoryStore {
    fn scales(&self) -> &ScaleTable {
        &self.scales
    }

    fn coding_params(&self, _bucket: usize) -> CodingParams {
        CodingParams::new(self.granularity_bits)
    }

    fn default_coding_params(&self) -> CodingParams {
        CodingParams::new(self.granularity_bits)
    }

    fn geometry_stream(&self, bucket: usize) -> DecodeResult<&[u8]> {
        self.geometry
            .get(bucket)
            .map(Vec::as_slice)
            .ok_or(DecodeError::StorageOpen {
                context: "geometry",
            })
    }

    fn triangles_stream(&self, bucket: usize) -> DecodeResult<&[u8]> {
        self.triangles
            .get(bucket)
            .map(Vec::as_slice)
            .ok_or(DecodeError::StorageOpen {
                context: "triangles",
            })
    }
}

impl MetadataSource for MemoryStore {
    fn metadata(&self, feature: u32) -> DecodeResult<Metadata> {
        Ok(self.metadata.get(&feature).cloned().unwrap_or_default())
    }

    fn meta_ids(&self, feature: u32) -> DecodeResult<Vec<(u8, u64)>> {
        Ok(self.meta_ids.get(&feature).cloned().unwrap_or_default())
    }

    fn meta_by_id(&self, id: u64) -> DecodeResult<String> {
        self.meta_values
            .get(&id)
            .cloned()
            .ok_or(DecodeError::StorageOpen { context: "metadata" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_map() {
        let mut m = Metadata::new();
        assert!(m.is_empty());
        m.insert(3, "24/7".to_string());
        assert!(m.has(3));
        assert_eq!(m.get(3), Some("24/7"));
        assert_eq!(m.get(4), None);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_memory_store_type_lookup() {
        let mut store = MemoryStore::new(ScaleTable::new(vec![5, 10]), 0);
        store.insert_type(7, 1234);
        store.set_stub_type(1);
        assert_eq!(store.type_for_index(7), Some(1234));
        assert_eq!(store.type_for_index(8), None);
        assert_eq!(store.stub_type(), 1);
    }

    #[test]
    fn test_memory_store_streams() {
        let mut store = MemoryStore::new(ScaleTable::new(vec![5, 10]), 0);
        store.set_geometry_stream(1, vec![1, 2, 3]);
        assert_eq!(store.geometry_stream(1).unwrap(), &[1, 2, 3]);
        assert!(store.geometry_stream(0).unwrap().is_empty());
        assert!(store.geometry_stream(5).is_err());
    }
}

//! Scale-bucket resolution.
//!
//! A dataset stores geometry at a handful of pre-simplified resolutions,
//! one stream per *scale bucket*. The [`ScaleTable`] maps a requested
//! display scale onto a bucket index; the offsets-aware variant also
//! honors per-feature presence so absent buckets can fall back.

use crate::offsets::GeometryOffsets;

/// A requested geometry resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleRequest {
    /// The most detailed geometry the feature carries.
    Best,
    /// The least detailed geometry the feature carries.
    Worst,
    /// Geometry appropriate for the given display scale.
    At(i32),
}

/// Ascending scale thresholds, one per declared scale bucket.
///
/// Bucket `i` covers requested scales up to and including `threshold(i)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleTable {
    thresholds: Vec<i32>,
}

impl ScaleTable {
    /// Build a table from ascending thresholds.
    #[must_use]
    pub fn new(thresholds: Vec<i32>) -> Self {
        debug_assert!(
            thresholds.windows(2).all(|w| w[0] < w[1]),
            "scale thresholds must be strictly ascending"
        );
        debug_assert!(!thresholds.is_empty());
        Self { thresholds }
    }

    /// Number of scale buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    #[must_use]
    pub fn threshold(&self, bucket: usize) -> i32 {
        self.thresholds[bucket]
    }

    /// The largest declared scale.
    #[must_use]
    pub fn last(&self) -> i32 {
        *self.thresholds.last().unwrap_or(&0)
    }

    /// Scales beyond the table clamp to the last threshold.
    fn clamp(&self, scale: i32) -> i32 {
        scale.min(self.last())
    }

    /// Resolve a request against the bare table.
    ///
    /// Total after clamping: `Best` is the last bucket, `Worst` the first,
    /// and any in-range scale finds the first threshold at or above it.
    #[must_use]
    pub fn resolve(&self, request: ScaleRequest) -> usize {
        match request {
            ScaleRequest::Worst => 0,
            ScaleRequest::Best => self.len() - 1,
            ScaleRequest::At(scale) => {
                let scale = self.clamp(scale);
                self.thresholds
                    .iter()
                    .position(|&t| scale <= t)
                    .unwrap_or(self.len() - 1)
            }
        }
    }

    /// Resolve a request against a feature's offset table.
    ///
    /// `Best`/`Worst` skip absent buckets from their respective ends. A
    /// plain scale resolves through the table and fails with `None` when
    /// that bucket is absent; the caller decides whether to retry with
    /// [`ScaleRequest::Worst`]. A feature with no geometry in any bucket
    /// is malformed data, reported and resolved as `None`.
    #[must_use]
    pub fn resolve_with_offsets(
        &self,
        request: ScaleRequest,
        offsets: &GeometryOffsets,
    ) -> Option<usize> {
        let count = offsets.len();

        let ind = match request {
            ScaleRequest::Best => (0..count).rev().find(|&i| offsets.is_present(i)),
            ScaleRequest::Worst => (0..count).find(|&i| offsets.is_present(i)),
            ScaleRequest::At(scale) => {
                let scale = self.clamp(scale);
                let bucket = self
                    .thresholds
                    .iter()
                    .position(|&t| scale <= t)
                    .unwrap_or(self.len() - 1);
                return offsets.is_present(bucket).then_some(bucket);
            }
        };

        if ind.is_none() {
            debug_assert!(false, "feature carries no geometry in any scale bucket");
            tracing::error!("feature carries no geometry in any scale bucket");
        }
        ind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::{GeometryOffsets, read_offsets};

    fn table() -> ScaleTable {
        ScaleTable::new(vec![5, 10, 15])
    }

    fn offsets_with_mask(mask: u8) -> GeometryOffsets {
        // One-byte offsets are enough for mask-shape tests.
        let data = [1u8; 8];
        let mut pos = 0;
        read_offsets(&data, &mut pos, mask, 3).unwrap()
    }

    #[test]
    fn test_plain_resolution() {
        let t = table();
        assert_eq!(t.resolve(ScaleRequest::At(7)), 1);
        assert_eq!(t.resolve(ScaleRequest::At(5)), 0);
        assert_eq!(t.resolve(ScaleRequest::At(15)), 2);
        assert_eq!(t.resolve(ScaleRequest::Best), 2);
        assert_eq!(t.resolve(ScaleRequest::Worst), 0);
    }

    #[test]
    fn test_plain_resolution_clamps_beyond_last() {
        assert_eq!(table().resolve(ScaleRequest::At(20)), 2);
    }

    #[test]
    fn test_offsets_all_present() {
        let t = table();
        let o = offsets_with_mask(0b111);
        assert_eq!(t.resolve_with_offsets(ScaleRequest::At(7), &o), Some(1));
        assert_eq!(t.resolve_with_offsets(ScaleRequest::Best, &o), Some(2));
        assert_eq!(t.resolve_with_offsets(ScaleRequest::Worst, &o), Some(0));
        assert_eq!(t.resolve_with_offsets(ScaleRequest::At(20), &o), Some(2));
    }

    #[test]
    fn test_offsets_absent_bucket_fails_plain_request() {
        let t = table();
        let o = offsets_with_mask(0b101);
        // Bucket 1 is absent: the plain request fails, Worst still works.
        assert_eq!(t.resolve_with_offsets(ScaleRequest::At(7), &o), None);
        assert_eq!(t.resolve_with_offsets(ScaleRequest::Worst, &o), Some(0));
    }

    #[test]
    fn test_offsets_best_worst_skip_absent_ends() {
        let t = table();
        let o = offsets_with_mask(0b010);
        assert_eq!(t.resolve_with_offsets(ScaleRequest::Best, &o), Some(1));
        assert_eq!(t.resolve_with_offsets(ScaleRequest::Worst, &o), Some(1));
    }
}

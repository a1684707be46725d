//! Viewport-driven tile coverage scheduling.
//!
//! One controller thread owns the scheduler and the active tile set; all
//! insertions, removals, and diffs happen synchronously inside
//! [`CoverageScheduler::update_coverage`] and [`CoverageScheduler::stop`].
//! Workers only decode: each queued task reads one tile's features at the
//! tile's scale, polling its cancellation flag before the tile and
//! between features, and delivers the complete set or nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glam::DVec2;
use vectile_decode::{
    Classificator, DecodeContext, FeatureRecord, GeomType, LoadInfo, MetadataSource, ScaleRequest,
};

use crate::diff::merge_diff;
use crate::error::Result;
use crate::pool::{Routine, WorkerPool};
use crate::tile::{TileKey, coverage_tiles};
use crate::viewport::{ScaleMapper, Viewport};

/// Produces the raw feature records of a tile, plus the decode
/// collaborators they resolve against.
pub trait TileSource: Send + Sync {
    /// All feature records stored for a tile.
    fn features_for_tile(&self, key: TileKey) -> Result<Vec<FeatureRecord>>;

    fn classificator(&self) -> &dyn Classificator;

    fn load_info(&self) -> &dyn LoadInfo;

    fn metadata(&self) -> &dyn MetadataSource;

    /// Release any index claim registered for a tile. Invoked when the
    /// tile is cancelled or the scheduler stops.
    fn release(&self, key: TileKey) {
        let _ = key;
    }

    /// The decode collaborators bundled for one pass.
    fn context(&self) -> DecodeContext<'_> {
        DecodeContext::new(self.classificator(), self.load_info(), self.metadata())
    }
}

/// Receives decoded tiles on worker threads.
pub trait TileConsumer: Send + Sync {
    fn tile_ready(&self, key: TileKey, features: Vec<DecodedFeature>);
}

/// Geometry of one decoded feature at the delivered resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    Point(DVec2),
    Line(Vec<DVec2>),
    /// Triangle list, three points per triangle.
    Area(Vec<DVec2>),
}

/// One feature decoded for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFeature {
    pub id: u32,
    pub types: Vec<u32>,
    pub name: Option<String>,
    pub rank: u8,
    pub layer: i8,
    pub geometry: FeatureGeometry,
}

/// Consumer invalidation signal from one coverage update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageChange {
    /// The viewport value did not change; nothing happened.
    Unchanged,
    /// Every previously delivered tile is invalid.
    DropAll,
    /// Exactly these tiles are no longer part of the coverage.
    DropTiles(Vec<TileKey>),
}

/// Per-tile lifecycle state: the cancellation flag shared with whichever
/// worker runs the tile's task.
#[derive(Debug)]
struct TileState {
    key: TileKey,
    cancelled: AtomicBool,
}

impl TileState {
    fn new(key: TileKey) -> Self {
        Self {
            key,
            cancelled: AtomicBool::new(false),
        }
    }

    fn key(&self) -> TileKey {
        self.key
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    fn cancel(&self, source: &dyn TileSource) {
        self.cancelled.store(true, Ordering::Relaxed);
        source.release(self.key);
    }
}

/// Task reading and decoding one tile.
struct ReadTileTask {
    state: Arc<TileState>,
    source: Arc<dyn TileSource>,
    consumer: Arc<dyn TileConsumer>,
}

impl Routine for ReadTileTask {
    fn run(&mut self) {
        if self.state.is_cancelled() {
            return;
        }

        let key = self.state.key();
        let ctx = self.source.context();

        let records = match self.source.features_for_tile(key) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(?key, error = %e, "failed to read tile features");
                return;
            }
        };

        let mut features = Vec::with_capacity(records.len());
        for record in records {
            if self.state.is_cancelled() {
                return;
            }
            match decode_feature(record, &ctx, key.scale) {
                Ok(Some(feature)) => features.push(feature),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(?key, error = %e, "skipping undecodable feature");
                }
            }
        }

        // Cancelled tiles deliver nothing, even when fully decoded.
        if self.state.is_cancelled() {
            return;
        }
        self.consumer.tile_ready(key, features);
    }
}

/// Decode one record at the tile's scale. Features with no drawable
/// geometry at this resolution decode to `None`.
fn decode_feature(
    mut record: FeatureRecord,
    ctx: &DecodeContext<'_>,
    scale: i32,
) -> Result<Option<DecodedFeature>> {
    let request = ScaleRequest::At(scale);
    if record.is_empty_geometry(ctx, request)? {
        return Ok(None);
    }

    let geometry = match record.geom_type() {
        GeomType::Point => FeatureGeometry::Point(record.center(ctx)?),
        GeomType::Line => FeatureGeometry::Line(record.points().to_vec()),
        GeomType::Area => FeatureGeometry::Area(record.triangles().to_vec()),
    };

    Ok(Some(DecodedFeature {
        id: record.id(),
        types: record.types(ctx)?.to_vec(),
        name: record.name(ctx)?.map(str::to_string),
        rank: record.rank(ctx)?,
        layer: record.layer(ctx)?,
        geometry,
    }))
}

/// Owns the active tile set and drives the worker pool as the viewport
/// moves.
pub struct CoverageScheduler {
    source: Arc<dyn TileSource>,
    consumer: Arc<dyn TileConsumer>,
    mapper: Box<dyn ScaleMapper>,
    pool: WorkerPool,
    /// Sorted by tile key; mutated only by the controller thread.
    active: Vec<Arc<TileState>>,
    current: Option<Viewport>,
}

impl CoverageScheduler {
    /// Scheduler with a machine-sized worker pool.
    #[must_use]
    pub fn new(
        source: Arc<dyn TileSource>,
        consumer: Arc<dyn TileConsumer>,
        mapper: Box<dyn ScaleMapper>,
    ) -> Self {
        Self::with_workers(source, consumer, mapper, WorkerPool::default_worker_count())
    }

    /// Scheduler with an explicit worker count.
    #[must_use]
    pub fn with_workers(
        source: Arc<dyn TileSource>,
        consumer: Arc<dyn TileConsumer>,
        mapper: Box<dyn ScaleMapper>,
        workers: usize,
    ) -> Self {
        Self {
            source,
            consumer,
            mapper,
            pool: WorkerPool::new(workers, Box::new(drop)),
            active: Vec::new(),
            current: None,
        }
    }

    /// The currently covered tiles, in key order.
    #[must_use]
    pub fn active_tiles(&self) -> Vec<TileKey> {
        self.active.iter().map(|state| state.key()).collect()
    }

    /// React to a viewport change.
    ///
    /// An identical viewport value is a no-op. A resolution change or a
    /// jump to a disjoint region drops everything and starts over;
    /// otherwise outdated tiles are cancelled, still-covered tiles are
    /// re-read ahead of the queue, and new tiles are appended behind it.
    pub fn update_coverage(&mut self, viewport: Viewport) -> CoverageChange {
        if self.current == Some(viewport) {
            return CoverageChange::Unchanged;
        }

        let scale = self.mapper.tile_scale(&viewport);
        let tiles = coverage_tiles(&viewport, scale);

        let change = if self.must_drop_all(&viewport) {
            for state in &self.active {
                state.cancel(self.source.as_ref());
            }
            self.active.clear();

            for &key in &tiles {
                self.enqueue_new_tile(key);
            }
            CoverageChange::DropAll
        } else {
            let (outdated, incoming) =
                merge_diff(&self.active, &tiles, |state| state.key(), |&key| key);
            let outdated: Vec<Arc<TileState>> = outdated.into_iter().map(Arc::clone).collect();
            let incoming: Vec<TileKey> = incoming.into_iter().copied().collect();

            for state in &outdated {
                state.cancel(self.source.as_ref());
            }
            self.active.retain(|state| !state.is_cancelled());

            // Tiles still in coverage are re-read ahead of brand-new
            // ones: a resolution-preserving pan mostly refines what is
            // already visible.
            for state in &self.active {
                self.pool.push_front(self.task_for(state));
            }
            for key in incoming {
                self.enqueue_new_tile(key);
            }

            CoverageChange::DropTiles(outdated.iter().map(|state| state.key()).collect())
        };

        self.current = Some(viewport);
        change
    }

    /// Cancel everything and shut the pool down. Terminal: the scheduler
    /// is consumed.
    pub fn stop(mut self) {
        for state in &self.active {
            state.cancel(self.source.as_ref());
        }
        self.active.clear();
        self.pool.stop();
    }

    fn must_drop_all(&self, next: &Viewport) -> bool {
        match &self.current {
            None => true,
            Some(current) => {
                self.mapper.tile_scale(current) != self.mapper.tile_scale(next)
                    || !current.intersects(next)
            }
        }
    }

    fn enqueue_new_tile(&mut self, key: TileKey) {
        let state = Arc::new(TileState::new(key));
        let position = self
            .active
            .binary_search_by(|s| s.key().cmp(&key))
            .unwrap_or_else(|insert_at| insert_at);
        self.active.insert(position, Arc::clone(&state));
        self.pool.push_back(self.task_for(&state));
    }

    fn task_for(&self, state: &Arc<TileState>) -> Box<ReadTileTask> {
        Box::new(ReadTileTask {
            state: Arc::clone(state),
            source: Arc::clone(&self.source),
            consumer: Arc::clone(&self.consumer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, Sender, unbounded};
    use std::sync::Mutex;
    use vectile_decode::{GeometryData, MemoryStore, ScaleTable};

    /// Tile source over a [`MemoryStore`], optionally blocking the first
    /// read until a gate opens, recording every released tile.
    struct TestSource {
        store: MemoryStore,
        records: Box<dyn Fn(TileKey) -> Vec<FeatureRecord> + Send + Sync>,
        gate: Mutex<Option<(Sender<()>, Receiver<()>)>>,
        released: Mutex<Vec<TileKey>>,
    }

    impl TestSource {
        fn empty() -> Self {
            Self::with_records(Box::new(|_| Vec::new()))
        }

        fn with_records(
            records: Box<dyn Fn(TileKey) -> Vec<FeatureRecord> + Send + Sync>,
        ) -> Self {
            Self {
                store: MemoryStore::new(ScaleTable::new(vec![5, 10, 15]), 0),
                records,
                gate: Mutex::new(None),
                released: Mutex::new(Vec::new()),
            }
        }

        /// Make the next read block; returns (started, release) handles.
        fn gate_next_read(&self) -> (Receiver<()>, Sender<()>) {
            let (started_tx, started_rx) = unbounded();
            let (release_tx, release_rx) = unbounded();
            *self.gate.lock().unwrap() = Some((started_tx, release_rx));
            (started_rx, release_tx)
        }

        fn released(&self) -> Vec<TileKey> {
            self.released.lock().unwrap().clone()
        }
    }

    impl TileSource for TestSource {
        fn features_for_tile(&self, key: TileKey) -> Result<Vec<FeatureRecord>> {
            let gate = self.gate.lock().unwrap().take();
            if let Some((started, release)) = gate {
                started.send(()).unwrap();
                release.recv().unwrap();
            }
            Ok((self.records)(key))
        }

        fn classificator(&self) -> &dyn Classificator {
            &self.store
        }

        fn load_info(&self) -> &dyn LoadInfo {
            &self.store
        }

        fn metadata(&self) -> &dyn MetadataSource {
            &self.store
        }

        fn release(&self, key: TileKey) {
            self.released.lock().unwrap().push(key);
        }
    }

    /// Consumer forwarding deliveries to a channel.
    struct ChannelConsumer {
        tx: Sender<(TileKey, Vec<DecodedFeature>)>,
    }

    impl TileConsumer for ChannelConsumer {
        fn tile_ready(&self, key: TileKey, features: Vec<DecodedFeature>) {
            let _ = self.tx.send((key, features));
        }
    }

    /// Mapper with a fixed tile scale, independent of the viewport.
    struct FixedMapper(i32);

    impl ScaleMapper for FixedMapper {
        fn tile_scale(&self, _viewport: &Viewport) -> i32 {
            self.0
        }
    }

    /// Mapper keyed on viewport width, for resolution-change tests.
    struct WidthMapper;

    impl ScaleMapper for WidthMapper {
        fn tile_scale(&self, viewport: &Viewport) -> i32 {
            if viewport.half_extent().x > 50.0 { 2 } else { 5 }
        }
    }

    fn scheduler_with(
        source: Arc<TestSource>,
        scale: i32,
    ) -> (
        CoverageScheduler,
        Receiver<(TileKey, Vec<DecodedFeature>)>,
    ) {
        let (tx, rx) = unbounded();
        let scheduler = CoverageScheduler::with_workers(
            source,
            Arc::new(ChannelConsumer { tx }),
            Box::new(FixedMapper(scale)),
            1,
        );
        (scheduler, rx)
    }

    /// Scale-10 tile size is 360/1024.
    const S10: f64 = 360.0 / 1024.0;

    /// Axis-aligned viewport spanning the given ranges, in units of the
    /// scale-10 tile size.
    fn vp10(x0: f64, x1: f64, y0: f64, y1: f64) -> Viewport {
        Viewport::axis_aligned(
            DVec2::new((x0 + x1) / 2.0 * S10, (y0 + y1) / 2.0 * S10),
            DVec2::new((x1 - x0) / 2.0 * S10, (y1 - y0) / 2.0 * S10),
        )
    }

    /// Covers tiles (0,0,10) and (1,0,10).
    fn viewport_covering_x0_x1() -> Viewport {
        vp10(0.1, 1.7, 0.1, 0.9)
    }

    /// Covers tiles (1,0,10) and (1,1,10), overlapping the above.
    fn viewport_covering_x1_y01() -> Viewport {
        vp10(1.1, 1.9, 0.1, 1.4)
    }

    #[test]
    fn test_first_update_drops_all_and_enqueues_coverage() {
        let source = Arc::new(TestSource::empty());
        let (mut scheduler, _rx) = scheduler_with(Arc::clone(&source), 10);

        let change = scheduler.update_coverage(viewport_covering_x0_x1());
        assert_eq!(change, CoverageChange::DropAll);
        assert_eq!(
            scheduler.active_tiles(),
            vec![TileKey::new(0, 0, 10), TileKey::new(1, 0, 10)]
        );
        scheduler.stop();
    }

    #[test]
    fn test_identical_viewport_is_noop() {
        let source = Arc::new(TestSource::empty());
        let (mut scheduler, _rx) = scheduler_with(Arc::clone(&source), 10);

        let v = viewport_covering_x0_x1();
        scheduler.update_coverage(v);
        let released_before = source.released().len();

        assert_eq!(scheduler.update_coverage(v), CoverageChange::Unchanged);
        assert_eq!(source.released().len(), released_before);
        assert_eq!(scheduler.active_tiles().len(), 2);
        scheduler.stop();
    }

    #[test]
    fn test_incremental_update_is_exact_symmetric_difference() {
        let source = Arc::new(TestSource::empty());
        let (mut scheduler, _rx) = scheduler_with(Arc::clone(&source), 10);

        let v1 = viewport_covering_x0_x1();
        let v2 = viewport_covering_x1_y01();
        scheduler.update_coverage(v1);

        let expected_v2 = coverage_tiles(&v2, 10);
        let change = scheduler.update_coverage(v2);

        assert_eq!(
            change,
            CoverageChange::DropTiles(vec![TileKey::new(0, 0, 10)])
        );
        assert_eq!(scheduler.active_tiles(), expected_v2);
        assert_eq!(
            expected_v2,
            vec![TileKey::new(1, 0, 10), TileKey::new(1, 1, 10)]
        );
        scheduler.stop();
    }

    #[test]
    fn test_end_to_end_cancel_requeue_enqueue() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let source = Arc::new(TestSource::empty());
        let (started, release) = source.gate_next_read();
        let (mut scheduler, rx) = scheduler_with(Arc::clone(&source), 10);

        // The single worker blocks inside tile (0,0,10).
        scheduler.update_coverage(viewport_covering_x0_x1());
        started.recv().unwrap();

        let change = scheduler.update_coverage(viewport_covering_x1_y01());
        assert_eq!(
            change,
            CoverageChange::DropTiles(vec![TileKey::new(0, 0, 10)])
        );
        assert_eq!(source.released(), vec![TileKey::new(0, 0, 10)]);

        // Unblock. The cancelled tile delivers nothing; the re-read of
        // (1,0) runs from the queue front, ahead of the not-yet-started
        // task from the first update and the brand-new (1,1).
        release.send(()).unwrap();

        let mut deliveries = Vec::new();
        for _ in 0..3 {
            let (key, _) = rx.recv().unwrap();
            deliveries.push(key);
        }
        assert_eq!(
            deliveries,
            vec![
                TileKey::new(1, 0, 10),
                TileKey::new(1, 0, 10),
                TileKey::new(1, 1, 10),
            ]
        );

        scheduler.stop();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_resolution_change_drops_all() {
        let source = Arc::new(TestSource::empty());
        let (tx, _rx) = unbounded();
        let mut scheduler = CoverageScheduler::with_workers(
            source.clone(),
            Arc::new(ChannelConsumer { tx }),
            Box::new(WidthMapper),
            1,
        );

        let near = Viewport::axis_aligned(DVec2::new(50.0, 50.0), DVec2::new(10.0, 10.0));
        let far = Viewport::axis_aligned(DVec2::new(50.0, 50.0), DVec2::new(80.0, 80.0));

        scheduler.update_coverage(near);
        let active_near = scheduler.active_tiles();
        assert!(!active_near.is_empty());

        let change = scheduler.update_coverage(far);
        assert_eq!(change, CoverageChange::DropAll);
        // Every old tile was cancelled, and the new coverage is at the
        // new scale.
        assert_eq!(source.released(), active_near);
        assert!(scheduler.active_tiles().iter().all(|k| k.scale == 2));
        scheduler.stop();
    }

    #[test]
    fn test_disjoint_viewports_drop_all() {
        let source = Arc::new(TestSource::empty());
        let (mut scheduler, _rx) = scheduler_with(Arc::clone(&source), 10);

        let here = Viewport::axis_aligned(DVec2::new(0.1, 0.1), DVec2::new(0.05, 0.05));
        let elsewhere = Viewport::axis_aligned(DVec2::new(90.0, 90.0), DVec2::new(0.05, 0.05));

        scheduler.update_coverage(here);
        let change = scheduler.update_coverage(elsewhere);
        assert_eq!(change, CoverageChange::DropAll);
        scheduler.stop();
    }

    #[test]
    fn test_stop_cancels_every_active_tile_once() {
        let source = Arc::new(TestSource::empty());
        let (mut scheduler, _rx) = scheduler_with(Arc::clone(&source), 10);

        scheduler.update_coverage(viewport_covering_x0_x1());
        let active = scheduler.active_tiles();
        assert_eq!(active.len(), 2);

        scheduler.stop();

        let mut released = source.released();
        released.sort_unstable();
        assert_eq!(released, active);
    }

    #[test]
    fn test_tile_features_are_decoded_and_delivered() {
        let source = Arc::new(TestSource::with_records(Box::new(|_key| {
            vec![
                FeatureRecord::from_parts(
                    1,
                    vec![101],
                    GeometryData::Point(DVec2::new(45.0, 45.0)),
                    Some("spring".to_string()),
                ),
                FeatureRecord::from_parts(
                    2,
                    vec![202],
                    GeometryData::Line(vec![DVec2::new(40.0, 40.0), DVec2::new(50.0, 50.0)]),
                    None,
                ),
            ]
        })));
        let (mut scheduler, rx) = scheduler_with(Arc::clone(&source), 2);

        // One tile of coverage at scale 2.
        scheduler.update_coverage(Viewport::axis_aligned(
            DVec2::new(45.0, 45.0),
            DVec2::new(10.0, 10.0),
        ));

        let (key, features) = rx.recv().unwrap();
        assert_eq!(key, TileKey::new(0, 0, 2));
        assert_eq!(features.len(), 2);

        assert_eq!(features[0].id, 1);
        assert_eq!(features[0].types, vec![101]);
        assert_eq!(features[0].name.as_deref(), Some("spring"));
        assert_eq!(
            features[0].geometry,
            FeatureGeometry::Point(DVec2::new(45.0, 45.0))
        );

        assert_eq!(features[1].id, 2);
        assert!(matches!(
            features[1].geometry,
            FeatureGeometry::Line(ref points) if points.len() == 2
        ));

        scheduler.stop();
    }
}

//! Viewport-driven tile coverage scheduling for vectile map data.
//!
//! This crate decides which map tiles a moving, zoomable viewport needs,
//! schedules background decoding for them, and cancels work the moment a
//! tile leaves coverage. Decoding itself lives in `vectile-decode`; this
//! crate owns the orchestration around it.
//!
//! # Design principles
//!
//! - **One controller**: the active tile set is mutated by exactly one
//!   thread, synchronously, inside coverage updates
//! - **Advisory cancellation**: workers poll a shared flag at coarse
//!   checkpoints and discard partial work silently
//! - **Two priorities**: tiles still in coverage re-read ahead of tiles
//!   never read before

pub mod diff;
mod error;
pub mod pool;
pub mod scheduler;
pub mod tile;
pub mod viewport;

pub use error::{Error, Result};
pub use pool::{FinishHook, Routine, Task, WorkerPool};
pub use scheduler::{
    CoverageChange, CoverageScheduler, DecodedFeature, FeatureGeometry, TileConsumer, TileSource,
};
pub use tile::{TileKey, WORLD_EXTENT, coverage_tiles};
pub use viewport::{ExtentScaleMapper, ScaleMapper, Viewport};

// Re-export decode types commonly needed alongside the scheduler.
pub use vectile_decode::{
    Classificator, DecodeContext, DecodeError, FeatureRecord, GeomType, LoadInfo, MemoryStore,
    Metadata, MetadataSource, Rect, ScaleRequest, ScaleTable,
};

pub mod batch;
pub mod config;
pub mod context;
pub mod cursor;
pub mod enrich;
pub mod error;
pub mod generator;
pub mod image_refresh;
pub mod logging;
pub mod report;
pub mod runner;
pub mod source_hash;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
pub mod types;

pub use batch::{
    BatchAborted, BatchController, BatchOptions, BatchResult, CursorSink, Selection, ShouldStop,
};
pub use enrich::{Enrichment, StatsErrorClassifier, VibesEnricher};
pub use error::BackfillError;
pub use report::{ReportWriter, RunReport};
pub use runner::{ResumableRunner, RunnerConfig, StopReason};
pub use types::{Entity, EntityKind};

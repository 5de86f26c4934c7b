//! Infrastructure layer: the journal, its readers, and the projection dispatch pipeline.

pub mod config;
pub mod journal;
pub mod projections;
pub mod supervision;
pub mod workers;

mod integration_tests;

pub use config::{ConfigError, DispatcherConfig};
pub use journal::{
    InMemoryJournal, InMemoryJournalReader, InMemoryStreamReader, Journal, JournalReader,
    StreamBatch, StreamReader,
};
pub use projections::{
    Confirmer, CycleReport, DispatchError, InMemoryConfirmer, JournalDispatcher, PatternMatcher,
    ProjectToDescription, Projection, ProjectionControl, ProjectionError, ProjectionRouter,
    RouterError,
};
pub use supervision::{BackoffStrategy, DecisionTable, Directive, RetryPolicy, Strategy, Supervisor};
pub use workers::{DispatchStats, DispatcherHandle, DispatcherWorker};

//! Projection dispatch pipeline.
//!
//! Journal entries flow one way:
//! - the [`JournalDispatcher`] polls a named global reader
//! - the [`ProjectionRouter`] resolves reasons to projections via [`PatternMatcher`]s
//! - each [`Projection`] confirms through [`ProjectionControl`]
//! - the [`Confirmer`] tracks pending/confirmed for at-least-once retry
//!
//! Projections must be idempotent: anything left unconfirmed may be delivered again.

pub mod confirmer;
pub mod dispatcher;
pub mod matcher;
pub mod projection;
pub mod router;

pub use confirmer::{Clock, Confirmer, InMemoryConfirmer};
pub use dispatcher::{CycleReport, DispatchError, JournalDispatcher};
pub use matcher::PatternMatcher;
pub use projection::{Projection, ProjectionControl, ProjectionError};
pub use router::{ProjectToDescription, ProjectionRouter, RouterError};

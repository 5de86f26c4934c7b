//! Journal dispatcher: reads the global log and hands entries to projections.
//!
//! One cycle is `read_next(batch_size)` followed by, for every entry in global
//! order:
//!
//! 1. wrap the entry as a [`Projectable`] (reason = entry type)
//! 2. resolve the matching projections through the [`ProjectionRouter`]
//! 3. mark the projectable pending in the [`Confirmer`]
//! 4. invoke each matching projection in registration order
//!
//! A projectable nobody matches is skipped without being marked pending.
//! Projection failures are returned, never swallowed: the caller (normally
//! the dispatcher worker) decides what to do through its supervisor. When a
//! cycle fails the reader is left at the failed entry, so nothing after it in
//! the batch is lost.
//!
//! The cursor lives in the named journal reader, not here, so a dispatcher
//! rebuilt under the same name continues where the previous one stopped.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, trace};

use chronicle_core::{FailureKind, JournalError};
use chronicle_events::{Projectable, ProjectableId};

use crate::config::{ConfigError, DispatcherConfig};
use crate::journal::{Journal, JournalReader};

use super::confirmer::Confirmer;
use super::projection::{ProjectionControl, ProjectionError};
use super::router::{ProjectionRouter, RouterError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error("invalid dispatcher config: {0}")]
    Config(#[from] ConfigError),

    #[error("projection '{projection}' failed to {operation} {projectable}: {source}")]
    Projection {
        projection: String,
        operation: &'static str,
        projectable: ProjectableId,
        global_position: Option<u64>,
        source: ProjectionError,
    },
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            DispatchError::Journal(e) => e.kind(),
            DispatchError::Router(RouterError::NoPatterns(_)) => FailureKind::Misuse,
            DispatchError::Router(RouterError::Poisoned) => FailureKind::Corruption,
            DispatchError::Config(_) => FailureKind::Misuse,
            DispatchError::Projection { source, .. } => source.kind(),
        }
    }

    /// Global position of the entry being projected when the failure happened.
    pub fn global_position(&self) -> Option<u64> {
        match self {
            DispatchError::Projection {
                global_position, ..
            } => *global_position,
            _ => None,
        }
    }

    /// Name of the projection that failed, if the failure came from one.
    pub fn projection(&self) -> Option<&str> {
        match self {
            DispatchError::Projection { projection, .. } => Some(projection),
            _ => None,
        }
    }
}

/// Outcome of one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Entries returned by the reader.
    pub read: usize,
    /// Projectables handed to at least one projection.
    pub dispatched: usize,
    /// Projectables no projection matched.
    pub unrouted: usize,
    /// Total projection invocations.
    pub projections_invoked: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.read == 0
    }
}

pub struct JournalDispatcher {
    reader: Arc<dyn JournalReader>,
    router: Arc<ProjectionRouter>,
    confirmer: Arc<dyn Confirmer>,
    control: ProjectionControl,
    config: DispatcherConfig,
}

impl core::fmt::Debug for JournalDispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JournalDispatcher")
            .field("reader", &self.reader.name())
            .field("position", &self.reader.position())
            .field("router", &self.router)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl JournalDispatcher {
    /// Fails with [`DispatchError::Config`] if `config` does not validate.
    pub fn new(
        reader: Arc<dyn JournalReader>,
        router: Arc<ProjectionRouter>,
        confirmer: Arc<dyn Confirmer>,
        config: DispatcherConfig,
    ) -> Result<Self, DispatchError> {
        config.validate()?;
        let control = ProjectionControl::new(confirmer.clone());
        Ok(Self {
            reader,
            router,
            confirmer,
            control,
            config,
        })
    }

    /// Build a dispatcher over the journal reader named after `config.name`.
    pub async fn for_journal<J>(
        journal: &J,
        router: Arc<ProjectionRouter>,
        confirmer: Arc<dyn Confirmer>,
        config: DispatcherConfig,
    ) -> Result<Self, DispatchError>
    where
        J: Journal + ?Sized,
    {
        config.validate()?;
        let reader = journal.journal_reader(&config.name).await?;
        Self::new(reader, router, confirmer, config)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn reader(&self) -> &Arc<dyn JournalReader> {
        &self.reader
    }

    pub fn router(&self) -> &Arc<ProjectionRouter> {
        &self.router
    }

    pub fn confirmer(&self) -> &Arc<dyn Confirmer> {
        &self.confirmer
    }

    /// Next global position the dispatcher will read.
    pub fn position(&self) -> u64 {
        self.reader.position()
    }

    /// Run one cycle over at most `batch_size` entries.
    ///
    /// On failure the reader is moved back to the failed entry; the error's
    /// `global_position()` names it when the failure came from a projection.
    pub async fn dispatch_next_batch(&self) -> Result<CycleReport, DispatchError> {
        let entries = self.reader.read_next(self.config.batch_size).await?;
        let mut report = CycleReport {
            read: entries.len(),
            ..CycleReport::default()
        };

        for entry in entries {
            let position = entry.global_position;
            let projectable = Projectable::from_entry(entry);
            match self.dispatch(&projectable).await {
                Ok(0) => report.unrouted += 1,
                Ok(invoked) => {
                    report.dispatched += 1;
                    report.projections_invoked += invoked;
                }
                Err(err) => {
                    self.reader.seek(position);
                    return Err(err);
                }
            }
        }

        Ok(report)
    }

    /// Route one projectable and invoke every matching projection.
    ///
    /// Returns the number of projections invoked (0 = unrouted). An unrouted
    /// projectable is never marked pending, so it never shows up in
    /// [`check_unconfirmed`](Self::check_unconfirmed).
    pub async fn dispatch(&self, projectable: &Projectable) -> Result<usize, DispatchError> {
        let projections = self.router.matching(projectable.because_of())?;
        if projections.is_empty() {
            trace!(projectable = %projectable.id(), "no projection matches");
            return Ok(0);
        }

        self.confirmer.pending(projectable);

        for projection in &projections {
            trace!(
                projection = projection.name(),
                projectable = %projectable.id(),
                "projecting"
            );
            projection
                .project_with(projectable, &self.control)
                .await
                .map_err(|source| DispatchError::Projection {
                    projection: projection.name().to_string(),
                    operation: "project",
                    projectable: projectable.id().clone(),
                    global_position: projectable.global_position(),
                    source,
                })?;
        }

        Ok(projections.len())
    }

    /// Dispatch a projectable again unless it has been confirmed meanwhile.
    pub async fn redispatch(&self, projectable: &Projectable) -> Result<usize, DispatchError> {
        if self.confirmer.is_confirmed(projectable.id()) {
            return Ok(0);
        }

        debug!(
            dispatcher = %self.config.name,
            projectable = %projectable.id(),
            "redispatching unconfirmed projectable"
        );
        self.dispatch(projectable).await
    }

    /// Projectables pending for longer than the confirmation timeout.
    pub fn check_unconfirmed(&self) -> Vec<Projectable> {
        self.confirmer
            .check_unconfirmed(self.config.confirmation_timeout)
    }

    /// Redispatch everything `check_unconfirmed` reports; returns how many were redispatched.
    pub async fn redispatch_unconfirmed(&self) -> Result<usize, DispatchError> {
        let mut redispatched = 0;
        for projectable in self.check_unconfirmed() {
            if self.redispatch(&projectable).await? > 0 {
                redispatched += 1;
            }
        }
        Ok(redispatched)
    }

    /// Reset the first registered projection with the given name; `false` if none.
    pub async fn reset_projection(&self, name: &str) -> Result<bool, DispatchError> {
        let Some(projection) = self.router.projection_named(name) else {
            return Ok(false);
        };

        debug!(dispatcher = %self.config.name, projection = name, "resetting projection");
        projection
            .reset()
            .await
            .map_err(|source| DispatchError::Projection {
                projection: name.to_string(),
                operation: "reset",
                projectable: ProjectableId {
                    projectable_type: "reset".to_string(),
                    data_id: name.to_string(),
                    data_version: 0,
                },
                global_position: None,
                source,
            })?;
        Ok(true)
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use chronicle_core::{FailureKind, JournalError};
use chronicle_events::{AdapterError, Projectable};

use super::confirmer::Confirmer;

/// A projection builds a materialized view from projectables routed to it.
///
/// ## Confirmation
///
/// Delivery is **at-least-once**. A projection that handled a projectable must
/// call [`ProjectionControl::confirm_projected`]; anything left unconfirmed past
/// the confirmation timeout is reported by `check_unconfirmed()` and may be
/// dispatched again. Projections must therefore be idempotent.
///
/// ## Errors
///
/// A returned error is *not* swallowed by the dispatcher: it propagates, with
/// context, to whoever supervises the dispatch loop. Classify errors with the
/// right `ProjectionError` variant so the supervisor can pick resume / restart /
/// retry.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Stable name, used in logs, errors and restart lookups.
    fn name(&self) -> &str;

    async fn project_with(
        &self,
        projectable: &Projectable,
        control: &ProjectionControl,
    ) -> Result<(), ProjectionError>;

    /// Drop materialized state after a restart directive.
    async fn reset(&self) -> Result<(), ProjectionError> {
        Ok(())
    }
}

/// Projection failure, classified for supervision.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("business rule rejected projectable: {0}")]
    Business(String),

    #[error("projection state corrupted: {0}")]
    Corruption(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Journal(#[from] JournalError),
}

impl ProjectionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProjectionError::Validation(_) => FailureKind::Validation,
            ProjectionError::Business(_) => FailureKind::Business,
            ProjectionError::Corruption(_) => FailureKind::Corruption,
            ProjectionError::Serialization(_) | ProjectionError::Adapter(_) => {
                FailureKind::Serialization
            }
            ProjectionError::Storage(_) => FailureKind::Storage,
            ProjectionError::Journal(e) => e.kind(),
        }
    }
}

/// Control object handed to a projection with every projectable.
#[derive(Clone)]
pub struct ProjectionControl {
    confirmer: Arc<dyn Confirmer>,
}

impl core::fmt::Debug for ProjectionControl {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectionControl").finish_non_exhaustive()
    }
}

impl ProjectionControl {
    pub fn new(confirmer: Arc<dyn Confirmer>) -> Self {
        Self { confirmer }
    }

    /// Mark the projectable as projected: removes it from pending, adds it to confirmed.
    pub fn confirm_projected(&self, projectable: &Projectable) {
        self.confirmer.confirm(projectable);
    }

    pub fn confirmer(&self) -> &Arc<dyn Confirmer> {
        &self.confirmer
    }
}

/// A typed domain event that can be stored as a journal entry.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution, see [`crate::EntryAdapterRegistry`])
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "AccountOpened").
    fn event_type(&self) -> &'static str;

    /// Current schema version for this event type (>= 1).
    fn version(&self) -> u32;
}

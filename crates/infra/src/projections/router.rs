//! Pattern-based routing of projectables to projections.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

use super::matcher::PatternMatcher;
use super::projection::Projection;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("projection '{0}' registered without any routing pattern")]
    NoPatterns(String),

    #[error("projection registry lock poisoned")]
    Poisoned,
}

/// Binds one projection to the reasons it should receive.
#[derive(Clone)]
pub struct ProjectToDescription {
    projection: Arc<dyn Projection>,
    patterns: Vec<String>,
    matchers: Vec<PatternMatcher>,
    description: String,
}

impl core::fmt::Debug for ProjectToDescription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectToDescription")
            .field("projection", &self.projection.name())
            .field("patterns", &self.patterns)
            .field("description", &self.description)
            .finish()
    }
}

impl ProjectToDescription {
    pub fn new<I, S>(
        projection: Arc<dyn Projection>,
        patterns: I,
        description: impl Into<String>,
    ) -> Result<Self, RouterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        if patterns.is_empty() {
            return Err(RouterError::NoPatterns(projection.name().to_string()));
        }

        let matchers = patterns.iter().map(|p| PatternMatcher::compile(p)).collect();
        Ok(Self {
            projection,
            patterns,
            matchers,
            description: description.into(),
        })
    }

    /// True if any reason matches any pattern.
    pub fn matches(&self, reasons: &[String]) -> bool {
        reasons
            .iter()
            .any(|r| self.matchers.iter().any(|m| m.matches(r)))
    }

    pub fn projection(&self) -> &Arc<dyn Projection> {
        &self.projection
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

type Projections = Vec<Arc<dyn Projection>>;

/// Registry of `ProjectToDescription`s resolving reasons to projections.
///
/// Results are deduplicated by projection instance. Single exact-reason lookups
/// are cached until the registry changes.
///
/// Lock order is `descriptions` then `cache`. A lookup fills the cache while
/// still holding the registry read lock, and mutations clear it under the
/// write lock, so a cached result never predates the registry it was read from.
#[derive(Default)]
pub struct ProjectionRouter {
    descriptions: RwLock<Vec<ProjectToDescription>>,
    cache: Mutex<HashMap<String, Projections>>,
    #[cfg(test)]
    cache_hook: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl core::fmt::Debug for ProjectionRouter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProjectionRouter")
            .field("descriptions", &self.descriptions)
            .finish_non_exhaustive()
    }
}

fn is_cacheable(reasons: &[String]) -> bool {
    match reasons {
        [reason] => !reason.contains('*') && !reason.ends_with('.'),
        _ => false,
    }
}

fn same_projection(a: &Arc<dyn Projection>, b: &Arc<dyn Projection>) -> bool {
    Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}

impl ProjectionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, description: ProjectToDescription) -> Result<(), RouterError> {
        debug!(
            projection = description.projection.name(),
            patterns = ?description.patterns,
            description = %description.description,
            "registering projection"
        );

        let mut descriptions = self.descriptions.write().map_err(|_| RouterError::Poisoned)?;
        descriptions.push(description);
        self.invalidate();
        Ok(())
    }

    /// Convenience for `register(ProjectToDescription::new(..)?)`.
    pub fn register_projection<I, S>(
        &self,
        projection: Arc<dyn Projection>,
        patterns: I,
        description: impl Into<String>,
    ) -> Result<(), RouterError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register(ProjectToDescription::new(projection, patterns, description)?)
    }

    pub fn clear(&self) -> Result<(), RouterError> {
        let mut descriptions = self.descriptions.write().map_err(|_| RouterError::Poisoned)?;
        descriptions.clear();
        self.invalidate();
        Ok(())
    }

    fn invalidate(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Deduplicated projections whose descriptions match any of `reasons`.
    pub fn matching(&self, reasons: &[String]) -> Result<Projections, RouterError> {
        let cacheable = is_cacheable(reasons);
        if cacheable {
            let cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = cache.get(&reasons[0]) {
                return Ok(hit.clone());
            }
        }

        let descriptions = self.descriptions.read().map_err(|_| RouterError::Poisoned)?;
        let mut matched: Projections = Vec::new();
        for d in descriptions.iter().filter(|d| d.matches(reasons)) {
            if !matched.iter().any(|p| same_projection(p, &d.projection)) {
                matched.push(d.projection.clone());
            }
        }

        if cacheable {
            #[cfg(test)]
            self.run_cache_hook();
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(reasons[0].clone(), matched.clone());
        }

        drop(descriptions);
        Ok(matched)
    }

    /// First registered projection with the given name.
    pub fn projection_named(&self, name: &str) -> Option<Arc<dyn Projection>> {
        let descriptions = self.descriptions.read().ok()?;
        descriptions
            .iter()
            .find(|d| d.projection.name() == name)
            .map(|d| d.projection.clone())
    }

    pub fn len(&self) -> usize {
        self.descriptions.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `hook` once, the next time a lookup is about to fill the cache.
    #[cfg(test)]
    pub(crate) fn before_cache_insert(&self, hook: impl FnOnce() + Send + 'static) {
        *self.cache_hook.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(hook));
    }

    #[cfg(test)]
    fn run_cache_hook(&self) {
        let hook = self
            .cache_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(hook) = hook {
            hook();
        }
    }

    /// Poisons the registry lock the way a panicking writer would.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        std::thread::scope(|scope| {
            let _ = scope
                .spawn(|| {
                    let _guard = self.descriptions.write();
                    panic!("registry writer panicked");
                })
                .join();
        });
    }

    #[cfg(test)]
    pub(crate) fn cached_reasons(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

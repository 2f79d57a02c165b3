//! Ordered fallback: try sources in priority order, first success wins.
//!
//! Used for battery sources and for picking the log file location.

use tracing::trace;

type Attempt<'a, T> = Box<dyn FnOnce() -> Option<T> + Send + 'a>;

/// A value together with the label of the source that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub source: &'static str,
    pub value: T,
}

pub struct FallbackChain<'a, T> {
    steps: Vec<(&'static str, Attempt<'a, T>)>,
}

impl<'a, T> FallbackChain<'a, T> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Append a source.
    pub fn attempt<F>(mut self, label: &'static str, f: F) -> Self
    where
        F: FnOnce() -> Option<T> + Send + 'a,
    {
        self.steps.push((label, Box::new(f)));
        self
    }

    /// Append a source only when `enabled`; skipped sources are never run.
    pub fn attempt_if<F>(self, enabled: bool, label: &'static str, f: F) -> Self
    where
        F: FnOnce() -> Option<T> + Send + 'a,
    {
        if enabled {
            self.attempt(label, f)
        } else {
            self
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run sources in order until one yields a value. Later sources are not run.
    pub fn resolve(self) -> Option<Resolved<T>> {
        for (source, step) in self.steps {
            match step() {
                Some(value) => return Some(Resolved { source, value }),
                None => trace!("Fallback source '{}' yielded nothing", source),
            }
        }
        None
    }
}

impl<T> Default for FallbackChain<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}

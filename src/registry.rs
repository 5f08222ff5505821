//! Event subscriptions: glob patterns mapped to callbacks

use crate::{
    error::{AmiError, AmiResult, CallbackError},
    manager::Manager,
    message::Message,
};
use globset::{GlobBuilder, GlobMatcher};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Callback invoked for each matching event.
///
/// Runs synchronously on the connection task, so it should hand long work
/// off to a spawned task. Returning an error stops dispatch of that event.
pub trait EventCallback: Fn(&Message, &Manager) -> Result<(), CallbackError> + Send + Sync {}

impl<F> EventCallback for F where F: Fn(&Message, &Manager) -> Result<(), CallbackError> + Send + Sync {}

/// Compile a glob into a full-name matcher.
///
/// `*` matches any run of characters, `?` one character, `[...]` a class.
/// Matching is case-sensitive, like event names on the wire.
fn compile_pattern(pattern: &str) -> AmiResult<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| AmiError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

struct Entry {
    pattern: String,
    matcher: GlobMatcher,
    callback: Arc<dyn EventCallback>,
}

/// Ordered list of subscriptions.
///
/// Every registration appends its own entry, even when the pattern string
/// repeats, so [`dispatch`](Self::dispatch) reports a pattern once per
/// registration that matched.
#[derive(Default)]
pub struct EventRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("patterns", &self.patterns())
            .finish()
    }
}

impl EventRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a subscription; returns the stored callback.
    pub fn register<F>(&self, pattern: &str, callback: F) -> AmiResult<Arc<F>>
    where
        F: Fn(&Message, &Manager) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        let matcher = compile_pattern(pattern)?;
        let callback = Arc::new(callback);
        self.entries
            .write()
            .push(Entry {
                pattern: pattern.to_string(),
                matcher,
                callback: callback.clone(),
            });
        Ok(callback)
    }

    /// Registered patterns in order, one per registration.
    pub fn patterns(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|e| {
                e.pattern
                    .clone()
            })
            .collect()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .len()
    }

    /// `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback whose pattern fully matches the event name.
    ///
    /// Callbacks run in registration order with `(event, manager)`. Returns
    /// the matched patterns, or the first callback error, which aborts the
    /// rest of the dispatch. An event without a name matches nothing.
    pub fn dispatch(&self, event: &Message, manager: &Manager) -> AmiResult<Vec<String>> {
        let Some(name) = event.event_name() else {
            return Ok(Vec::new());
        };

        // Snapshot so callbacks may register more events.
        let matched: Vec<(String, Arc<dyn EventCallback>)> = self
            .entries
            .read()
            .iter()
            .filter(|e| {
                e.matcher
                    .is_match(name)
            })
            .map(|e| {
                (
                    e.pattern
                        .clone(),
                    e.callback
                        .clone(),
                )
            })
            .collect();

        let mut patterns = Vec::with_capacity(matched.len());
        for (pattern, callback) in matched {
            if let Err(source) = (*callback)(event, manager) {
                return Err(AmiError::Callback { pattern, source });
            }
            patterns.push(pattern);
        }
        Ok(patterns)
    }
}

/// Deferred registration, the counterpart of decorating a function.
///
/// Obtained from [`Manager::event_registrar`]; [`register`](Self::register)
/// performs the registration and hands the same callback back.
#[derive(Debug)]
pub struct Registrar {
    manager: Manager,
    pattern: String,
}

impl Registrar {
    pub(crate) fn new(manager: Manager, pattern: &str) -> Self {
        Self {
            manager,
            pattern: pattern.to_string(),
        }
    }

    /// Pattern this registrar will subscribe.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Register `callback` and return it.
    pub fn register<F>(self, callback: F) -> AmiResult<Arc<F>>
    where
        F: Fn(&Message, &Manager) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.manager
            .register_event(&self.pattern, callback)
    }
}

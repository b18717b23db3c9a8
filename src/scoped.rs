//! Save/restore stacks for process-wide conversion settings.
//!
//! The codec layer reads its substitute character and locale from shared
//! state, so callers bracket an operation with `start` / `end`. A
//! [`ScopedSetting`] owns one such stack behind a mutex; [`ScopeGuard`] pairs
//! the two calls so restoration also happens on early returns and panics.

use std::fmt::Debug;

use parking_lot::Mutex;
use tracing::debug;

use crate::{Error, Result};

#[derive(Debug)]
struct State<T> {
    current: T,
    saved: Vec<T>,
}

/// A value with a LIFO history of overrides.
#[derive(Debug)]
pub struct ScopedSetting<T> {
    name: &'static str,
    safe_default: T,
    state: Mutex<State<T>>,
}

impl<T: Clone + Debug> ScopedSetting<T> {
    /// Create a setting whose value is `initial` and whose bare `start()`
    /// installs `safe_default`.
    pub fn new(name: &'static str, initial: T, safe_default: T) -> Self {
        Self {
            name,
            safe_default,
            state: Mutex::new(State {
                current: initial,
                saved: Vec::new(),
            }),
        }
    }

    /// Name used in log lines and error messages.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The value in effect.
    pub fn current(&self) -> T {
        self.state.lock().current.clone()
    }

    /// Saved values, oldest first.
    pub fn stack(&self) -> Vec<T> {
        self.state.lock().saved.clone()
    }

    /// Number of saved values.
    pub fn depth(&self) -> usize {
        self.state.lock().saved.len()
    }

    /// Save the current value and install `value` (or the safe default).
    ///
    /// Returns the value that was in effect before the call.
    pub fn start(&self, value: Option<T>) -> T {
        let value = value.unwrap_or_else(|| self.safe_default.clone());
        let mut state = self.state.lock();
        let previous = std::mem::replace(&mut state.current, value);
        state.saved.push(previous.clone());
        debug!(
            setting = self.name,
            depth = state.saved.len(),
            current = ?state.current,
            "scoped setting pushed"
        );
        previous
    }

    /// Restore the most recently saved value, or the oldest one when
    /// `reset_all` is set, and return the value now in effect.
    pub fn end(&self, reset_all: bool) -> Result<T> {
        let mut state = self.state.lock();
        let restored = if reset_all {
            let mut drained = std::mem::take(&mut state.saved).into_iter();
            drained.next()
        } else {
            state.saved.pop()
        };
        let Some(restored) = restored else {
            return Err(Error::EmptyStack { setting: self.name });
        };
        state.current = restored.clone();
        debug!(
            setting = self.name,
            depth = state.saved.len(),
            current = ?state.current,
            reset_all,
            "scoped setting restored"
        );
        Ok(restored)
    }

    /// `start(value)` now, `end(false)` when the guard is dropped.
    pub fn scope(&self, value: Option<T>) -> ScopeGuard<'_, T> {
        let previous = self.start(value);
        ScopeGuard {
            setting: self,
            previous,
        }
    }
}

/// Restores a [`ScopedSetting`] when dropped.
#[derive(Debug)]
#[must_use = "the setting is restored as soon as the guard is dropped"]
pub struct ScopeGuard<'a, T: Clone + Debug> {
    setting: &'a ScopedSetting<T>,
    previous: T,
}

impl<T: Clone + Debug> ScopeGuard<'_, T> {
    /// The value that was in effect before this scope started.
    pub fn previous(&self) -> &T {
        &self.previous
    }
}

impl<T: Clone + Debug> Drop for ScopeGuard<'_, T> {
    fn drop(&mut self) {
        // Only fails if someone ended this scope by hand.
        if let Err(err) = self.setting.end(false) {
            tracing::warn!(setting = self.setting.name(), error = %err, "scope already ended");
        }
    }
}

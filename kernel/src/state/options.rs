// Store Configuration
//
// Options applied when a store is opened: the clock used to stamp
// committed events, and hooks that run once after the initial load.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::Store;

/// Source of commit timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<F> Clock for F
where
    F: Fn() -> DateTime<Utc> + Send + Sync,
{
    fn now(&self) -> DateTime<Utc> {
        self()
    }
}

pub(crate) type Hook<M, B> = Box<dyn FnOnce(&Store<M, B>)>;

/// Options for [`Store::open_with`].
pub struct Options<M, B> {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) hooks: Vec<Hook<M, B>>,
}

impl<M, B> Default for Options<M, B> {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            hooks: Vec::new(),
        }
    }
}

impl<M, B> fmt::Debug for Options<M, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("hooks", &self.hooks.len())
            .finish_non_exhaustive()
    }
}

impl<M, B> Options<M, B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `clock` instead of the wall clock to stamp events.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Run `hook` once the log has been replayed.
    ///
    /// Hooks run in the order they were added.
    pub fn hook(mut self, hook: impl FnOnce(&Store<M, B>) + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn closures_are_clocks() {
        let fixed = Utc.timestamp_opt(42, 0).single().unwrap();
        let options = Options::<(), ()>::new().clock(move || fixed);

        assert_eq!(options.clock.now(), fixed);
    }

    #[test]
    fn hooks_are_collected_in_order() {
        let options = Options::<(), ()>::new().hook(|_| {}).hook(|_| {});
        assert_eq!(options.hooks.len(), 2);
    }
}

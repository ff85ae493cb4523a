// Model Container
//
// Holds the current model behind a single reader/writer lock.
// Reads share the lock; writes hold it exclusively for the whole
// validate -> persist -> apply -> notify pipeline.

use std::io;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use crate::event::{BoxError, Event, Registry};
use crate::log::{CodecError, LogBackend, LogRecord};
use crate::notify::{CancelToken, Subscription, Topic};
use crate::replay::{load_model, LoadError};

pub mod options;

pub use options::{Clock, Options, SystemClock};

/// Returned when an event is rejected before anything is persisted.
#[derive(Debug, thiserror::Error)]
#[error("event `{event}` at position {position} rejected: {source}")]
pub struct ValidationError {
    pub event: String,
    /// Index of the rejected event within its batch.
    pub position: usize,
    #[source]
    pub source: BoxError,
}

/// Returned when persisting an already validated event fails.
///
/// Events committed earlier in the same batch stay committed.
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("encoding event `{event}` ({committed} already committed): {source}")]
    Encode {
        event: String,
        committed: usize,
        #[source]
        source: CodecError,
    },

    #[error("writing event to log `{record}` ({committed} already committed): {source}")]
    Append {
        event: String,
        record: String,
        committed: usize,
        #[source]
        source: io::Error,
    },
}

impl CommitError {
    /// Number of events from the batch that are durable and applied.
    pub fn committed(&self) -> usize {
        match self {
            CommitError::Encode { committed, .. } | CommitError::Append { committed, .. } => {
                *committed
            }
        }
    }

    /// Name of the event that failed.
    pub fn event(&self) -> &str {
        match self {
            CommitError::Encode { event, .. } | CommitError::Append { event, .. } => event,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("commit error: {0}")]
    Commit(#[from] CommitError),
}

impl WriteError {
    /// True if nothing was persisted and the batch can be retried as is.
    pub fn is_validation(&self) -> bool {
        matches!(self, WriteError::Validation(_))
    }

    /// Number of events from the batch that were committed anyway.
    pub fn committed(&self) -> usize {
        match self {
            WriteError::Validation(_) => 0,
            WriteError::Commit(err) => err.committed(),
        }
    }
}

struct Inner<M, B> {
    model: Arc<M>,
    backend: B,
}

/// Event-sourced state container.
///
/// The model is rebuilt from the log when the store is opened and is
/// replaced, never mutated, once per committed event.
pub struct Store<M, B> {
    state: RwLock<Inner<M, B>>,
    clock: Arc<dyn Clock>,
    topic: Topic<Vec<String>>,
}

impl<M, B: LogBackend> Store<M, B> {
    /// Replay `backend` on top of `empty` with default options.
    pub fn open(backend: B, empty: M, registry: &Registry<M>) -> Result<Self, LoadError> {
        Self::open_with(backend, empty, registry, Options::new())
    }

    /// Replay `backend` on top of `empty`, then apply `options`.
    ///
    /// Fails if any record cannot be read, decoded or resolved; no store is
    /// created from a partially readable log.
    pub fn open_with(
        mut backend: B,
        empty: M,
        registry: &Registry<M>,
        options: Options<M, B>,
    ) -> Result<Self, LoadError> {
        let replayed = {
            let reader = backend.reader().map_err(LoadError::Open)?;
            load_model(reader, registry, empty)?
        };
        info!(records = replayed.records, "event log replayed");

        let Options { clock, hooks } = options;
        let store = Self {
            state: RwLock::new(Inner {
                model: Arc::new(replayed.model),
                backend,
            }),
            clock,
            topic: Topic::new(),
        };

        for hook in hooks {
            hook(&store);
        }

        Ok(store)
    }

    /// Shared access to the model. Released when the guard is dropped.
    pub fn read_access(&self) -> ReadGuard<'_, M, B> {
        // The model is only ever swapped whole, so a panicking holder
        // cannot leave it half-written.
        ReadGuard {
            inner: self.state.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Exclusive access to the model. Released when the guard is dropped.
    pub fn write_access(&self) -> WriteGuard<'_, M, B> {
        WriteGuard {
            inner: self.state.write().unwrap_or_else(PoisonError::into_inner),
            clock: self.clock.as_ref(),
            topic: &self.topic,
        }
    }

    /// The current model, usable after the lock is released.
    ///
    /// Later writes never show through the returned value.
    pub fn snapshot(&self) -> Arc<M> {
        self.read_access().snapshot()
    }

    /// Call `f` with the current model under shared access.
    pub fn read<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        let guard = self.read_access();
        f(&guard)
    }

    /// Call `f` with the current model under exclusive access and commit
    /// the event it returns.
    pub fn write<E>(&self, f: impl FnOnce(&M) -> E) -> Result<(), WriteError>
    where
        E: Event<M>,
    {
        let mut guard = self.write_access();
        let event = f(&guard);
        guard.write(&[&event as &dyn Event<M>])
    }

    /// Names of committed events, one batch per write call, starting with
    /// the first write after this call.
    pub fn listen(&self, cancel: CancelToken) -> Subscription<Vec<String>> {
        self.topic.subscribe(cancel)
    }
}

/// Shared access to the model.
pub struct ReadGuard<'a, M, B> {
    inner: RwLockReadGuard<'a, Inner<M, B>>,
}

impl<M, B> ReadGuard<'_, M, B> {
    pub fn snapshot(&self) -> Arc<M> {
        Arc::clone(&self.inner.model)
    }
}

impl<M, B> Deref for ReadGuard<'_, M, B> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.inner.model
    }
}

/// Exclusive access to the model.
///
/// Derefs to the current model, which reflects every event committed
/// through this guard so far.
pub struct WriteGuard<'a, M, B> {
    inner: RwLockWriteGuard<'a, Inner<M, B>>,
    clock: &'a dyn Clock,
    topic: &'a Topic<Vec<String>>,
}

impl<M, B> Deref for WriteGuard<'_, M, B> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.inner.model
    }
}

impl<M, B: LogBackend> WriteGuard<'_, M, B> {
    pub fn snapshot(&self) -> Arc<M> {
        Arc::clone(&self.inner.model)
    }

    /// Validate and commit a batch of events.
    ///
    /// Every event is validated against the model as it was before the
    /// batch; one rejection aborts the batch with nothing persisted. Events
    /// are then persisted and applied one at a time. If persisting fails,
    /// the events before it remain committed and the rest are dropped.
    pub fn write(&mut self, events: &[&dyn Event<M>]) -> Result<(), WriteError> {
        for (position, event) in events.iter().enumerate() {
            if let Err(source) = event.validate(&self.inner.model) {
                warn!(event = event.name(), position, "batch rejected");
                return Err(ValidationError {
                    event: event.name().to_string(),
                    position,
                    source,
                }
                .into());
            }
        }

        let mut committed = Vec::with_capacity(events.len());
        let mut outcome = Ok(());
        for event in events {
            if let Err(err) = self.commit(*event, committed.len()) {
                warn!(
                    event = event.name(),
                    committed = committed.len(),
                    error = %err,
                    "commit failed, rest of batch dropped"
                );
                outcome = Err(err.into());
                break;
            }
            committed.push(event.name().to_string());
        }

        if !committed.is_empty() {
            self.topic.publish(committed);
            self.topic.prune_delivered();
        }
        outcome
    }

    fn commit(&mut self, event: &dyn Event<M>, committed: usize) -> Result<(), CommitError> {
        let name = event.name();
        let time = self.clock.now();

        let line = LogRecord::new(time, name, event)
            .and_then(|record| record.encode())
            .map_err(|source| CommitError::Encode {
                event: name.to_string(),
                committed,
                source,
            })?;

        self.inner
            .backend
            .append(&line)
            .map_err(|source| CommitError::Append {
                event: name.to_string(),
                record: String::from_utf8_lossy(&line).trim_end().to_string(),
                committed,
                source,
            })?;

        let next = event.execute(&self.inner.model, time);
        self.inner.model = Arc::new(next);
        debug!(event = name, index = committed, "event committed");

        Ok(())
    }
}

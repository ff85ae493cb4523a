// Journal Kernel
//
// Event-sourced state container: an in-memory model rebuilt from an
// append-only event log and kept in step with it on every write.

pub mod event;
pub mod log;
pub mod notify;
pub mod replay;
pub mod state;

pub use event::{BoxError, Event, Registry};
pub use log::{FileLog, LogBackend, MemoryLog};
pub use notify::{CancelToken, Cursor, Subscription};
pub use replay::LoadError;
pub use state::{
    Clock, CommitError, Options, ReadGuard, Store, SystemClock, ValidationError, WriteError,
    WriteGuard,
};

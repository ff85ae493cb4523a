// Log Storage Abstraction
//
// Defines the durability contract for the backing event log.
// Implementations may persist to disk, memory, object storage, etc.

use std::io::{self, BufRead};

/// Storage backend for the event log.
///
/// Properties required from implementations:
/// - Append-only
/// - Ordered (records come back in append order)
/// - Durable once `append` returns `Ok`
///
/// Implementations MUST NOT:
/// - Reorder records
/// - Mutate or drop existing records
///
/// The container only drives a backend while it holds exclusive access,
/// so methods take `&mut self`.
pub trait LogBackend: Send + Sync {
    /// Open the full log from the beginning.
    ///
    /// The stream is closed when the returned reader is dropped.
    fn reader(&mut self) -> io::Result<Box<dyn BufRead + '_>>;

    /// Durably append one encoded record.
    fn append(&mut self, record: &[u8]) -> io::Result<()>;
}

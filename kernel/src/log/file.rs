// File-backed event log
//
// Every append is followed by fsync. A record is acknowledged only
// once it is on disk; a failed append is cut back off the file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::store::LogBackend;

/// Event log stored in a single append-only file.
#[derive(Debug)]
pub struct FileLog {
    path: PathBuf,
    file: File,
}

impl FileLog {
    /// Open or create the log file at `path`.
    ///
    /// Missing parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogBackend for FileLog {
    fn reader(&mut self) -> io::Result<Box<dyn BufRead + '_>> {
        // Separate handle so reading never moves the append cursor.
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn append(&mut self, record: &[u8]) -> io::Result<()> {
        self.append_with(record, |file, record| {
            file.write_all(record)?;
            file.sync_data()
        })
    }
}

impl FileLog {
    /// Run `write`, truncating the file back to its previous length if it fails.
    fn append_with<F>(&mut self, record: &[u8], write: F) -> io::Result<()>
    where
        F: FnOnce(&mut File, &[u8]) -> io::Result<()>,
    {
        let len = self.file.metadata()?.len();

        if let Err(err) = write(&mut self.file, record) {
            if let Err(rollback) = self.file.set_len(len).and_then(|()| self.file.sync_data()) {
                warn!(
                    path = %self.path.display(),
                    len,
                    error = %rollback,
                    "failed to roll back partial append"
                );
            }
            return Err(err);
        }
        Ok(())
    }
}

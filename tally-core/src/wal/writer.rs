//! WAL writer implementation

use super::{WalRecord, SEPARATOR};
use crate::{Result, TallyError};
use bytes::{BufMut, BytesMut};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Append-only log backed by a single file.
///
/// Appends only touch the in-memory buffer; [`Wal::flush`] moves the
/// buffer to the end of the file and syncs it.
///
/// A failed write whose torn bytes cannot be cut off leaves the log
/// unusable: every later append or flush fails with `TornWrite`.
pub struct Wal {
    path: PathBuf,
    pub(super) file: Option<File>,
    buf: BytesMut,
    torn: bool,
}

impl Wal {
    /// Open or create the log file. `truncate` discards existing contents.
    pub fn open(path: impl AsRef<Path>, truncate: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| TallyError::io("open", e))?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(&path)
            .map_err(|e| TallyError::io("open", e))?;

        Ok(Self {
            path,
            file: Some(file),
            buf: BytesMut::new(),
            torn: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fails once a torn write is stuck at the end of the file
    pub fn writable(&self) -> Result<()> {
        if self.torn {
            return Err(TallyError::TornWrite(self.path.display().to_string()));
        }
        Ok(())
    }

    /// Encode a record into the buffer
    pub fn append(&mut self, record: &WalRecord) -> Result<()> {
        self.writable()?;
        let frame = record.encode()?;
        self.append_frame(&frame);
        Ok(())
    }

    /// Buffer an already encoded frame. Callers check [`Wal::writable`].
    pub(crate) fn append_frame(&mut self, frame: &[u8]) {
        self.buf.put_slice(frame);
        self.buf.put_u8(SEPARATOR);
    }

    /// Bytes waiting for the next flush
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Write the buffer to the end of the file and sync it
    pub fn flush(&mut self) -> Result<()> {
        self.writable()?;
        if self.buf.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or(TallyError::StorageClosed)?;

        let end = file
            .seek(SeekFrom::End(0))
            .map_err(|e| TallyError::io("seek", e))?;

        if let Err(e) = file.write_all(&self.buf) {
            // Cut torn bytes so a retry appends whole frames
            if let Err(trunc) = file.set_len(end) {
                let grown = file.metadata().map_or(true, |m| m.len() != end);
                if grown {
                    error!(path = %self.path.display(), error = %trunc, offset = end, "failed to drop partial WAL write");
                    self.torn = true;
                }
            }
            return Err(TallyError::io("write", e));
        }

        let written = self.buf.len();
        self.buf.clear();

        file.sync_all().map_err(|e| TallyError::io("sync", e))?;
        debug!(path = %self.path.display(), bytes = written, offset = end, "flushed WAL");

        Ok(())
    }

    /// Flush and release the file. Later flushes fail with `StorageClosed`.
    pub fn close(&mut self) -> Result<()> {
        let flushed = self.flush();
        self.file.take();
        flushed
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    #[cfg(test)]
    pub(crate) fn mark_torn(&mut self) {
        self.torn = true;
    }
}

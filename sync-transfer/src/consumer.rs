//! Receiver half of a chunked asset transfer.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use sync_types::{AssetChunk, AssetHeader, AssetId};

use crate::error::TransferError;

/// Appends incoming chunks to `<staging>/<id>.part`.
#[derive(Debug)]
pub struct AssetConsumer {
    header: AssetHeader,
    path: PathBuf,
    cursor: u64,
}

impl AssetConsumer {
    /// Prepare a staging file for `header`.
    ///
    /// Creates the staging directory if needed and removes any leftover
    /// partial file for the same asset.
    pub fn new(staging_dir: &Path, header: AssetHeader) -> Result<Self, TransferError> {
        let id = header.id;
        fs::create_dir_all(staging_dir).map_err(TransferError::io(id))?;

        let path = staging_dir.join(format!("{}.part", id.to_hex()));
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(TransferError::Io { id, source: e }),
        }
        // Zero-length assets still produce a file.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(TransferError::io(id))?;

        Ok(Self {
            header,
            path,
            cursor: 0,
        })
    }

    /// Append a chunk.
    ///
    /// Rejects chunks for another asset and chunks that would exceed the
    /// declared size; in both cases nothing is written.
    pub fn update(&mut self, chunk: &AssetChunk) -> Result<(), TransferError> {
        let id = self.header.id;
        if chunk.id != id {
            return Err(TransferError::UnexpectedChunk { id: chunk.id });
        }

        let received = self.cursor + chunk.data.len() as u64;
        if received > self.header.size {
            return Err(TransferError::Overflow {
                id,
                size: self.header.size,
                received,
            });
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(TransferError::io(id))?;
        file.write_all(&chunk.data).map_err(TransferError::io(id))?;

        self.cursor = received;
        Ok(())
    }

    /// Whether every declared byte has arrived.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.header.size
    }

    /// Fraction received, in `0.0..=1.0`.
    pub fn percent_complete(&self) -> f64 {
        if self.header.size == 0 {
            return 1.0;
        }
        self.cursor as f64 / self.header.size as f64
    }

    /// Asset being received.
    pub fn id(&self) -> AssetId {
        self.header.id
    }

    /// Header this consumer was created from.
    pub fn header(&self) -> &AssetHeader {
        &self.header
    }

    /// Bytes received so far.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Staging file. Holds the whole asset once complete.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the staging file.
    pub fn discard(self) {
        let _ = fs::remove_file(&self.path);
    }
}

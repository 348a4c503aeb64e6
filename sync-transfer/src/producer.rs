//! Sender half of a chunked asset transfer.

use std::io::Read;

use sync_types::{AssetChunk, AssetHeader, AssetId};

use crate::error::TransferError;
use crate::store::AssetStore;

/// Reads an asset one window at a time.
///
/// The cursor only moves forward and never passes the declared length.
pub struct AssetProducer {
    header: AssetHeader,
    source: Box<dyn Read + Send>,
    cursor: u64,
}

impl AssetProducer {
    /// Create a producer over `source`, which must yield exactly `header.size` bytes.
    pub fn new(header: AssetHeader, source: Box<dyn Read + Send>) -> Self {
        Self {
            header,
            source,
            cursor: 0,
        }
    }

    /// Open an asset from a store.
    pub fn from_store(store: &dyn AssetStore, id: &AssetId) -> Result<Self, TransferError> {
        let info = store.info(id)?;
        let source = store.open_for_read(id)?;
        Ok(Self::new(AssetHeader::from(info), source))
    }

    /// Asset being sent.
    pub fn id(&self) -> AssetId {
        self.header.id
    }

    /// Header to send before the first chunk.
    pub fn header(&self) -> &AssetHeader {
        &self.header
    }

    /// Bytes produced so far.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Produce the next chunk of at most `max_size` bytes.
    ///
    /// The final chunk is shorter when fewer bytes remain. On error the
    /// cursor does not move.
    pub fn next_chunk(&mut self, max_size: usize) -> Result<AssetChunk, TransferError> {
        let remaining = self.header.size.saturating_sub(self.cursor);
        let len = remaining.min(max_size.max(1) as u64) as usize;
        let mut data = vec![0u8; len];

        if let Err(e) = self.source.read_exact(&mut data) {
            return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransferError::SourceTruncated {
                    id: self.header.id,
                    expected: self.header.size,
                    read: self.cursor,
                }
            } else {
                TransferError::Io {
                    id: self.header.id,
                    source: e,
                }
            });
        }

        self.cursor += len as u64;
        Ok(AssetChunk {
            id: self.header.id,
            data,
        })
    }

    /// Whether every byte has been produced.
    pub fn is_complete(&self) -> bool {
        self.cursor >= self.header.size
    }
}

impl std::fmt::Debug for AssetProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetProducer")
            .field("id", &self.header.id)
            .field("size", &self.header.size)
            .field("cursor", &self.cursor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn producer(bytes: &[u8]) -> AssetProducer {
        let header = AssetHeader {
            id: AssetId::of(bytes),
            name: "test".into(),
            size: bytes.len() as u64,
        };
        AssetProducer::new(header, Box::new(Cursor::new(bytes.to_vec())))
    }

    #[test]
    fn final_chunk_is_clamped() {
        let mut p = producer(&[7u8; 10]);
        assert_eq!(p.next_chunk(4).unwrap().len(), 4);
        assert_eq!(p.next_chunk(4).unwrap().len(), 4);
        assert!(!p.is_complete());
        assert_eq!(p.next_chunk(4).unwrap().len(), 2);
        assert!(p.is_complete());
        assert_eq!(p.cursor(), 10);
    }

    #[test]
    fn empty_asset_is_complete_immediately() {
        let p = producer(&[]);
        assert!(p.is_complete());
    }

    #[test]
    fn short_source_reports_truncation() {
        let header = AssetHeader {
            id: AssetId::of(b"abc"),
            name: "short".into(),
            size: 100,
        };
        let mut p = AssetProducer::new(header, Box::new(Cursor::new(b"abc".to_vec())));
        let err = p.next_chunk(64).unwrap_err();
        assert!(matches!(err, TransferError::SourceTruncated { read: 0, .. }));
        assert_eq!(p.cursor(), 0);
    }
}

//! Asset transfer payloads.

use serde::{Deserialize, Serialize};

use crate::model::AssetInfo;
use crate::AssetId;

/// Announces an asset transfer. Sent once, before any chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHeader {
    /// Asset being transferred.
    pub id: AssetId,
    /// Display name.
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
}

impl AssetHeader {
    /// Metadata view of this header.
    pub fn info(&self) -> AssetInfo {
        AssetInfo {
            id: self.id,
            name: self.name.clone(),
            size: self.size,
        }
    }
}

impl From<AssetInfo> for AssetHeader {
    fn from(info: AssetInfo) -> Self {
        Self {
            id: info.id,
            name: info.name,
            size: info.size,
        }
    }
}

/// A contiguous slice of asset bytes. Chunks of one asset arrive in order.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetChunk {
    /// Asset the bytes belong to.
    pub id: AssetId,
    /// The bytes.
    #[serde(with = "serde_bytes_compat")]
    pub data: Vec<u8>,
}

impl AssetChunk {
    /// Number of bytes in this chunk.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether this chunk carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for AssetChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetChunk")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

// Encode chunk payloads as msgpack bin instead of an array of integers.
mod serde_bytes_compat {
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> serde::de::Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a byte buffer")
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: serde::de::SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
                while let Some(b) = seq.next_element::<u8>()? {
                    out.push(b);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_bytes_encode_compactly() {
        let chunk = AssetChunk {
            id: AssetId::of(b"a"),
            data: vec![0xAB; 1024],
        };
        let bytes = rmp_serde::to_vec(&chunk).unwrap();
        // bin16 header (3 bytes) instead of one msgpack int per byte
        assert!(bytes.len() < 1024 + 64);
        let restored: AssetChunk = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(restored, chunk);
    }

    #[test]
    fn header_info_roundtrip() {
        let info = AssetInfo {
            id: AssetId::of(b"map"),
            name: "map.png".into(),
            size: 3,
        };
        let header = AssetHeader::from(info.clone());
        assert_eq!(header.info(), info);
    }

    #[test]
    fn chunk_debug_hides_payload() {
        let chunk = AssetChunk {
            id: AssetId::of(b"a"),
            data: vec![1, 2, 3],
        };
        assert!(format!("{chunk:?}").contains("len: 3"));
    }
}

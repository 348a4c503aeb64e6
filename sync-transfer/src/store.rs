//! Content-addressed asset storage.
//!
//! Assets are addressed by the BLAKE3 hash of their bytes. Imports verify
//! the hash before anything becomes visible in the store, so a reader
//! never sees a corrupt asset under a valid id.

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sync_types::model::AssetInfo;
use sync_types::{AssetHeader, AssetId};

use crate::error::TransferError;
use crate::lock;

/// Storage backend for asset bytes.
///
/// Implementations perform blocking I/O; async callers should go through
/// `spawn_blocking`.
pub trait AssetStore: Send + Sync {
    /// Whether the asset is present.
    fn has(&self, id: &AssetId) -> bool;

    /// Metadata for a stored asset.
    fn info(&self, id: &AssetId) -> Result<AssetInfo, TransferError>;

    /// Open the asset bytes for streaming.
    fn open_for_read(&self, id: &AssetId) -> Result<Box<dyn Read + Send>, TransferError>;

    /// Store bytes under their content id.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<AssetInfo, TransferError>;

    /// Move a fully staged file into the store after checking its hash
    /// against `header.id`. The staged file is consumed either way.
    fn import(&self, header: &AssetHeader, staged: &Path) -> Result<AssetInfo, TransferError>;

    /// Delete an asset. Returns `Ok(false)` if it was not present.
    fn remove(&self, id: &AssetId) -> Result<bool, TransferError>;

    /// Metadata for every stored asset.
    fn list(&self) -> Vec<AssetInfo>;
}

/// Stream a file through BLAKE3.
pub fn hash_file(path: &Path) -> std::io::Result<AssetId> {
    let mut file = fs::File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(AssetId::from_hash(*hasher.finalize().as_bytes()))
}

fn verify_staged(header: &AssetHeader, staged: &Path) -> Result<(), TransferError> {
    let actual = hash_file(staged).map_err(TransferError::io(header.id))?;
    if actual != header.id {
        let _ = fs::remove_file(staged);
        return Err(TransferError::HashMismatch {
            expected: header.id,
            actual,
        });
    }
    Ok(())
}

/// Filesystem store: `<root>/<hex>` holds the bytes, `<root>/<hex>.json`
/// the metadata.
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    root: PathBuf,
}

impl FsAssetStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn data_path(&self, id: &AssetId) -> PathBuf {
        self.root.join(id.to_hex())
    }

    fn meta_path(&self, id: &AssetId) -> PathBuf {
        self.root.join(format!("{}.json", id.to_hex()))
    }

    fn write_meta(&self, info: &AssetInfo) -> Result<(), TransferError> {
        let json = serde_json::to_vec(info)
            .map_err(|e| TransferError::Store(std::io::Error::other(e)))?;
        fs::write(self.meta_path(&info.id), json).map_err(TransferError::io(info.id))
    }
}

impl AssetStore for FsAssetStore {
    fn has(&self, id: &AssetId) -> bool {
        self.data_path(id).is_file()
    }

    fn info(&self, id: &AssetId) -> Result<AssetInfo, TransferError> {
        let len = match fs::metadata(self.data_path(id)) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::NotFound { id: *id })
            }
            Err(e) => return Err(TransferError::Io { id: *id, source: e }),
        };
        // Metadata is advisory; the data file is the source of truth for size.
        let name = fs::read(self.meta_path(id))
            .ok()
            .and_then(|raw| serde_json::from_slice::<AssetInfo>(&raw).ok())
            .map(|info| info.name)
            .unwrap_or_else(|| id.to_hex());
        Ok(AssetInfo {
            id: *id,
            name,
            size: len,
        })
    }

    fn open_for_read(&self, id: &AssetId) -> Result<Box<dyn Read + Send>, TransferError> {
        match fs::File::open(self.data_path(id)) {
            Ok(file) => Ok(Box::new(std::io::BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransferError::NotFound { id: *id })
            }
            Err(e) => Err(TransferError::Io { id: *id, source: e }),
        }
    }

    fn put(&self, name: &str, bytes: &[u8]) -> Result<AssetInfo, TransferError> {
        let info = AssetInfo {
            id: AssetId::of(bytes),
            name: name.to_string(),
            size: bytes.len() as u64,
        };
        fs::write(self.data_path(&info.id), bytes).map_err(TransferError::io(info.id))?;
        self.write_meta(&info)?;
        Ok(info)
    }

    fn import(&self, header: &AssetHeader, staged: &Path) -> Result<AssetInfo, TransferError> {
        verify_staged(header, staged)?;

        let dest = self.data_path(&header.id);
        if fs::rename(staged, &dest).is_err() {
            // Staging may live on another filesystem.
            fs::copy(staged, &dest).map_err(TransferError::io(header.id))?;
            let _ = fs::remove_file(staged);
        }

        let info = header.info();
        self.write_meta(&info)?;
        Ok(info)
    }

    fn remove(&self, id: &AssetId) -> Result<bool, TransferError> {
        let _ = fs::remove_file(self.meta_path(id));
        match fs::remove_file(self.data_path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TransferError::Io { id: *id, source: e }),
        }
    }

    fn list(&self) -> Vec<AssetInfo> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str()?.parse::<AssetId>().ok())
            .filter_map(|id| self.info(&id).ok())
            .collect()
    }
}

/// In-memory asset store for testing.
///
/// Not persistent - all data is lost when the store is dropped.
#[derive(Default, Clone)]
pub struct MemoryAssetStore {
    assets: Arc<Mutex<HashMap<AssetId, (String, Arc<[u8]>)>>>,
}

impl MemoryAssetStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of assets stored.
    pub fn len(&self) -> usize {
        lock(&self.assets).len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        lock(&self.assets).is_empty()
    }

    /// Raw bytes of a stored asset.
    pub fn bytes(&self, id: &AssetId) -> Option<Vec<u8>> {
        lock(&self.assets).get(id).map(|(_, data)| data.to_vec())
    }
}

impl AssetStore for MemoryAssetStore {
    fn has(&self, id: &AssetId) -> bool {
        lock(&self.assets).contains_key(id)
    }

    fn info(&self, id: &AssetId) -> Result<AssetInfo, TransferError> {
        lock(&self.assets)
            .get(id)
            .map(|(name, data)| AssetInfo {
                id: *id,
                name: name.clone(),
                size: data.len() as u64,
            })
            .ok_or(TransferError::NotFound { id: *id })
    }

    fn open_for_read(&self, id: &AssetId) -> Result<Box<dyn Read + Send>, TransferError> {
        let data = lock(&self.assets)
            .get(id)
            .map(|(_, data)| Arc::clone(data))
            .ok_or(TransferError::NotFound { id: *id })?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn put(&self, name: &str, bytes: &[u8]) -> Result<AssetInfo, TransferError> {
        let id = AssetId::of(bytes);
        lock(&self.assets).insert(id, (name.to_string(), Arc::from(bytes)));
        Ok(AssetInfo {
            id,
            name: name.to_string(),
            size: bytes.len() as u64,
        })
    }

    fn import(&self, header: &AssetHeader, staged: &Path) -> Result<AssetInfo, TransferError> {
        verify_staged(header, staged)?;
        let bytes = fs::read(staged).map_err(TransferError::io(header.id))?;
        let _ = fs::remove_file(staged);
        lock(&self.assets).insert(header.id, (header.name.clone(), Arc::from(bytes)));
        Ok(header.info())
    }

    fn remove(&self, id: &AssetId) -> Result<bool, TransferError> {
        Ok(lock(&self.assets).remove(id).is_some())
    }

    fn list(&self) -> Vec<AssetInfo> {
        lock(&self.assets)
            .iter()
            .map(|(id, (name, data))| AssetInfo {
                id: *id,
                name: name.clone(),
                size: data.len() as u64,
            })
            .collect()
    }
}

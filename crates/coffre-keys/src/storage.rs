//! Wrapped-key blob persistence.
//!
//! Storage deals in opaque blobs at named locations; everything it holds is
//! already wrapped by a key pair before it arrives. Locations are flat names
//! (see [`crate::location`]), never paths.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use coffre_core::{CoffreError, CoffreResult};

/// Persistence for wrapped key blobs.
#[async_trait]
pub trait KeyStorage: Send + Sync {
    fn exists(&self, location: &str) -> CoffreResult<bool>;
    /// Fails with [`CoffreError::Storage`] if no blob exists at `location`.
    fn get(&self, location: &str) -> CoffreResult<Vec<u8>>;
    /// Creates or overwrites.
    fn put(&self, blob: &[u8], location: &str) -> CoffreResult<()>;
    /// Deleting an absent blob is not an error.
    fn delete(&self, location: &str) -> CoffreResult<()>;

    async fn exists_async(&self, location: &str) -> CoffreResult<bool>;
    async fn get_async(&self, location: &str) -> CoffreResult<Vec<u8>>;
    async fn put_async(&self, blob: &[u8], location: &str) -> CoffreResult<()>;
    async fn delete_async(&self, location: &str) -> CoffreResult<()>;
}

/// One file per blob under a base directory, owner-only permissions.
pub struct FileKeyStorage {
    dir: PathBuf,
}

impl FileKeyStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn resolve(&self, location: &str) -> CoffreResult<PathBuf> {
        validate_location(location)?;
        Ok(self.dir.join(location))
    }
}

/// Locations must be flat file names so a crafted seed cannot escape the
/// storage directory.
fn validate_location(location: &str) -> CoffreResult<()> {
    if location.is_empty() {
        return Err(CoffreError::invalid_argument("location", "empty"));
    }
    if location.contains(['/', '\\']) || location == "." || location == ".." {
        return Err(CoffreError::invalid_argument(
            "location",
            format!("`{location}` is not a flat file name"),
        ));
    }
    Ok(())
}

fn missing_blob(location: &str) -> CoffreError {
    CoffreError::storage(format!("no key blob at `{location}`"))
}

#[cfg(unix)]
fn owner_only_permissions() -> std::fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    std::fs::Permissions::from_mode(0o600)
}

#[async_trait]
impl KeyStorage for FileKeyStorage {
    fn exists(&self, location: &str) -> CoffreResult<bool> {
        Ok(self.resolve(location)?.exists())
    }

    fn get(&self, location: &str) -> CoffreResult<Vec<u8>> {
        let path = self.resolve(location)?;
        std::fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => missing_blob(location),
            _ => CoffreError::Io(e),
        })
    }

    fn put(&self, blob: &[u8], location: &str) -> CoffreResult<()> {
        let path = self.resolve(location)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(&path, blob)?;
        #[cfg(unix)]
        std::fs::set_permissions(&path, owner_only_permissions())?;
        tracing::debug!(location, bytes = blob.len(), "stored key blob");
        Ok(())
    }

    fn delete(&self, location: &str) -> CoffreResult<()> {
        let path = self.resolve(location)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoffreError::Io(e)),
        }
    }

    async fn exists_async(&self, location: &str) -> CoffreResult<bool> {
        let path = self.resolve(location)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get_async(&self, location: &str) -> CoffreResult<Vec<u8>> {
        let path = self.resolve(location)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => missing_blob(location),
            _ => CoffreError::Io(e),
        })
    }

    async fn put_async(&self, blob: &[u8], location: &str) -> CoffreResult<()> {
        let path = self.resolve(location)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&path, blob).await?;
        #[cfg(unix)]
        tokio::fs::set_permissions(&path, owner_only_permissions()).await?;
        tracing::debug!(location, bytes = blob.len(), "stored key blob");
        Ok(())
    }

    async fn delete_async(&self, location: &str) -> CoffreResult<()> {
        let path = self.resolve(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoffreError::Io(e)),
        }
    }
}

/// In-memory storage for tests and short-lived processes.
#[derive(Default)]
pub struct MemoryKeyStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryKeyStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> CoffreResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.blobs
            .lock()
            .map_err(|_| CoffreError::storage("memory key storage lock poisoned"))
    }
}

#[async_trait]
impl KeyStorage for MemoryKeyStorage {
    fn exists(&self, location: &str) -> CoffreResult<bool> {
        validate_location(location)?;
        Ok(self.lock()?.contains_key(location))
    }

    fn get(&self, location: &str) -> CoffreResult<Vec<u8>> {
        validate_location(location)?;
        self.lock()?
            .get(location)
            .cloned()
            .ok_or_else(|| missing_blob(location))
    }

    fn put(&self, blob: &[u8], location: &str) -> CoffreResult<()> {
        validate_location(location)?;
        self.lock()?.insert(location.to_string(), blob.to_vec());
        Ok(())
    }

    fn delete(&self, location: &str) -> CoffreResult<()> {
        validate_location(location)?;
        self.lock()?.remove(location);
        Ok(())
    }

    async fn exists_async(&self, location: &str) -> CoffreResult<bool> {
        self.exists(location)
    }

    async fn get_async(&self, location: &str) -> CoffreResult<Vec<u8>> {
        self.get(location)
    }

    async fn put_async(&self, blob: &[u8], location: &str) -> CoffreResult<()> {
        self.put(blob, location)
    }

    async fn delete_async(&self, location: &str) -> CoffreResult<()> {
        self.delete(location)
    }
}

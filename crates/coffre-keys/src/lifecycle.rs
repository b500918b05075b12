//! Symmetric-key lifecycle: generate or load once, wrapped at rest.
//!
//! A [`ManagedKey`] starts uninitialized. The first use asks storage whether a
//! wrapped blob exists at its location: if so the blob is unwrapped with the
//! key pair, otherwise a fresh key is generated, wrapped, and persisted. From
//! then on the clear key stays in memory and storage is never consulted again
//! by this instance; a key imported or created behind its back is picked up
//! only by a new instance.

use std::sync::Arc;

use coffre_core::{CoffreError, CoffreResult};

use crate::material::KeyMaterial;
use crate::provider::KeyPairProvider;
use crate::storage::KeyStorage;

pub struct ManagedKey {
    storage: Arc<dyn KeyStorage>,
    location: String,
    key_len: usize,
    key: Option<KeyMaterial>,
}

impl ManagedKey {
    pub fn new(storage: Arc<dyn KeyStorage>, location: impl Into<String>, key_len: usize) -> Self {
        Self {
            storage,
            location: location.into(),
            key_len,
            key: None,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_initialized(&self) -> bool {
        self.key.is_some()
    }

    /// Clear key material, if this instance has initialized yet.
    pub fn material(&self) -> Option<&KeyMaterial> {
        self.key.as_ref()
    }

    /// Initializes on first call (load-or-generate), then hands back the same
    /// key for the life of the instance.
    pub fn ensure(&mut self, pair: &KeyPairProvider) -> CoffreResult<&KeyMaterial> {
        let key = match self.key.take() {
            Some(key) => key,
            None => self.load_or_generate(pair)?,
        };
        Ok(self.key.insert(key))
    }

    pub async fn ensure_async(&mut self, pair: &KeyPairProvider) -> CoffreResult<&KeyMaterial> {
        let key = match self.key.take() {
            Some(key) => key,
            None => self.load_or_generate_async(pair).await?,
        };
        Ok(self.key.insert(key))
    }

    fn load_or_generate(&self, pair: &KeyPairProvider) -> CoffreResult<KeyMaterial> {
        if self.storage.exists(&self.location)? {
            let wrapped = self.storage.get(&self.location)?;
            let material = self.unwrap_blob(&wrapped, pair)?;
            tracing::debug!(location = %self.location, "loaded wrapped key");
            Ok(material)
        } else {
            let material = KeyMaterial::random(self.key_len);
            let wrapped = pair.wrap(material.as_bytes())?;
            self.storage.put(&wrapped, &self.location)?;
            tracing::debug!(location = %self.location, "generated and persisted key");
            Ok(material)
        }
    }

    async fn load_or_generate_async(&self, pair: &KeyPairProvider) -> CoffreResult<KeyMaterial> {
        if self.storage.exists_async(&self.location).await? {
            let wrapped = self.storage.get_async(&self.location).await?;
            let material = self.unwrap_blob(&wrapped, pair)?;
            tracing::debug!(location = %self.location, "loaded wrapped key");
            Ok(material)
        } else {
            let material = KeyMaterial::random(self.key_len);
            let wrapped = pair.wrap(material.as_bytes())?;
            self.storage.put_async(&wrapped, &self.location).await?;
            tracing::debug!(location = %self.location, "generated and persisted key");
            Ok(material)
        }
    }

    /// Replaces the key with caller-supplied material, wrapping and persisting
    /// it. Any blob already at the location is overwritten.
    pub fn import(&mut self, clear: &[u8], pair: &KeyPairProvider) -> CoffreResult<()> {
        let material = self.check_import(clear)?;
        let wrapped = pair.wrap(clear)?;
        self.storage.put(&wrapped, &self.location)?;
        self.key = Some(material);
        tracing::debug!(location = %self.location, "imported key");
        Ok(())
    }

    pub async fn import_async(&mut self, clear: &[u8], pair: &KeyPairProvider) -> CoffreResult<()> {
        let material = self.check_import(clear)?;
        let wrapped = pair.wrap(clear)?;
        self.storage.put_async(&wrapped, &self.location).await?;
        self.key = Some(material);
        tracing::debug!(location = %self.location, "imported key");
        Ok(())
    }

    /// Clear copy of the key, initializing first if needed.
    pub fn export(&mut self, pair: &KeyPairProvider) -> CoffreResult<KeyMaterial> {
        Ok(self.ensure(pair)?.clone())
    }

    pub async fn export_async(&mut self, pair: &KeyPairProvider) -> CoffreResult<KeyMaterial> {
        Ok(self.ensure_async(pair).await?.clone())
    }

    fn check_import(&self, clear: &[u8]) -> CoffreResult<KeyMaterial> {
        if clear.len() != self.key_len {
            return Err(CoffreError::invalid_argument(
                "key",
                format!("expected {} bytes, got {}", self.key_len, clear.len()),
            ));
        }
        Ok(KeyMaterial::from_bytes(clear.to_vec()))
    }

    fn unwrap_blob(&self, wrapped: &[u8], pair: &KeyPairProvider) -> CoffreResult<KeyMaterial> {
        // A wrapped blob is exactly one RSA block.
        if wrapped.len() != pair.key_size() {
            return Err(CoffreError::storage(format!(
                "blob at `{}` is {} bytes, expected {}",
                self.location,
                wrapped.len(),
                pair.key_size()
            )));
        }
        let clear = pair.unwrap(wrapped)?;
        if clear.len() != self.key_len {
            return Err(CoffreError::storage(format!(
                "blob at `{}` unwrapped to {} bytes, expected {}",
                self.location,
                clear.len(),
                self.key_len
            )));
        }
        Ok(KeyMaterial::from_bytes(clear.to_vec()))
    }
}

impl std::fmt::Debug for ManagedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedKey")
            .field("location", &self.location)
            .field("key_len", &self.key_len)
            .field("initialized", &self.key.is_some())
            .finish()
    }
}

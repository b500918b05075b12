//! Keyed hashing (HMAC) over a storage-managed key.
//!
//! Same package shape as [`Hasher`](crate::Hasher): `salt ‖ mac`, with the
//! MAC computed over `salt ‖ data`. The HMAC key goes through the identical
//! lifecycle as a cipher's symmetric key: generated on first use, wrapped to
//! the key pair, persisted, and reloadable by any instance pointed at the
//! same storage location.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384, Sha512};
use std::io::{self, Read};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

use coffre_core::{CoffreError, CoffreResult, HashAlgorithm};
use coffre_keys::{KeyLocationStrategy, KeyMaterial, KeyPairProvider, KeyStorage, ManagedKey};

use crate::hasher::{
    check_salt_len, constant_time_check, flatten_verify, random_salt, split_package,
};
use crate::MIN_SALT_LEN;

/// HMAC key size. One SHA-512 block, so no variant ever pads or re-hashes
/// the key.
pub const HMAC_KEY_LEN: usize = 64;

const COPY_BUF: usize = 8192;

#[derive(Debug)]
enum KeyedSource {
    Managed {
        managed: ManagedKey,
        provider: Arc<KeyPairProvider>,
    },
    Light {
        key: KeyMaterial,
    },
}

#[derive(Debug)]
pub struct KeyedHasher {
    algorithm: HashAlgorithm,
    salt_len: usize,
    source: KeyedSource,
}

impl KeyedHasher {
    pub fn managed(
        provider: Arc<KeyPairProvider>,
        storage: Arc<dyn KeyStorage>,
        location: impl Into<String>,
        algorithm: HashAlgorithm,
    ) -> Self {
        let managed = ManagedKey::new(storage, location, HMAC_KEY_LEN);
        Self {
            algorithm,
            salt_len: MIN_SALT_LEN,
            source: KeyedSource::Managed { managed, provider },
        }
    }

    /// [`managed`](Self::managed) with the location resolved from a seed name.
    pub fn managed_at(
        provider: Arc<KeyPairProvider>,
        storage: Arc<dyn KeyStorage>,
        strategy: &dyn KeyLocationStrategy,
        seed: &str,
        algorithm: HashAlgorithm,
    ) -> Self {
        let location = strategy.resolve(seed);
        Self::managed(provider, storage, location, algorithm)
    }

    pub fn with_salt_len(mut self, salt_len: usize) -> CoffreResult<Self> {
        check_salt_len(salt_len)?;
        self.salt_len = salt_len;
        Ok(self)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn is_light(&self) -> bool {
        matches!(self.source, KeyedSource::Light { .. })
    }

    pub fn key_location(&self) -> CoffreResult<&str> {
        match &self.source {
            KeyedSource::Managed { managed, .. } => Ok(managed.location()),
            KeyedSource::Light { .. } => Err(CoffreError::invalid_operation(
                "light hasher has shed its key storage",
            )),
        }
    }

    pub fn import_key(&mut self, clear: &[u8]) -> CoffreResult<()> {
        match &mut self.source {
            KeyedSource::Managed { managed, provider } => managed.import(clear, provider),
            KeyedSource::Light { .. } => Err(CoffreError::invalid_operation(
                "light hasher has shed its key storage",
            )),
        }
    }

    pub fn export_key(&mut self) -> CoffreResult<KeyMaterial> {
        match &mut self.source {
            KeyedSource::Managed { managed, provider } => managed.export(provider),
            KeyedSource::Light { .. } => Err(CoffreError::invalid_operation(
                "light hasher has shed its key storage",
            )),
        }
    }

    /// Drops the key pair and storage handle, keeping only the clear HMAC
    /// key. Requires an initialized key.
    pub fn release_key_pair(&mut self) -> CoffreResult<()> {
        let key = self.light_key()?;
        self.source = KeyedSource::Light { key };
        tracing::debug!("released key pair");
        Ok(())
    }

    pub fn light_clone(&self) -> CoffreResult<Self> {
        let key = self.light_key()?;
        Ok(Self {
            algorithm: self.algorithm,
            salt_len: self.salt_len,
            source: KeyedSource::Light { key },
        })
    }

    fn light_key(&self) -> CoffreResult<KeyMaterial> {
        match &self.source {
            KeyedSource::Managed { managed, .. } => match managed.material() {
                Some(key) => Ok(key.clone()),
                None => Err(CoffreError::invalid_operation(
                    "HMAC key is not initialized yet",
                )),
            },
            KeyedSource::Light { .. } => Err(CoffreError::invalid_operation(
                "key pair already released",
            )),
        }
    }

    fn resolve_key(&mut self) -> CoffreResult<KeyMaterial> {
        match &mut self.source {
            KeyedSource::Managed { managed, provider } => Ok(managed.ensure(provider)?.clone()),
            KeyedSource::Light { key } => Ok(key.clone()),
        }
    }

    async fn resolve_key_async(&mut self) -> CoffreResult<KeyMaterial> {
        match &mut self.source {
            KeyedSource::Managed { managed, provider } => {
                Ok(managed.ensure_async(provider).await?.clone())
            }
            KeyedSource::Light { key } => Ok(key.clone()),
        }
    }

    pub fn hash(&mut self, data: &[u8]) -> CoffreResult<Vec<u8>> {
        self.hash_stream(data)
    }

    pub fn hash_stream<R: Read>(&mut self, src: R) -> CoffreResult<Vec<u8>> {
        let key = self.resolve_key()?;
        let mut package = random_salt(self.salt_len);
        let mac = mac_stream(self.algorithm, &key, &package, src)?;
        package.extend_from_slice(&mac);
        Ok(package)
    }

    pub async fn hash_stream_async<R>(&mut self, src: R) -> CoffreResult<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let key = self.resolve_key_async().await?;
        let mut package = random_salt(self.salt_len);
        let mac = mac_stream_async(self.algorithm, &key, &package, src).await?;
        package.extend_from_slice(&mac);
        Ok(package)
    }

    pub fn verify(&mut self, data: &[u8], package: &[u8]) -> CoffreResult<()> {
        self.verify_stream(data, package)
    }

    pub fn verify_stream<R: Read>(&mut self, src: R, package: &[u8]) -> CoffreResult<()> {
        let key = self.resolve_key()?;
        let (salt, expected) = split_package(package, self.algorithm.digest_len(), "keyed hash")?;
        let mac = mac_stream(self.algorithm, &key, salt, src)?;
        constant_time_check(&mac, expected, "keyed hash mismatch")
    }

    pub async fn verify_stream_async<R>(&mut self, src: R, package: &[u8]) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let key = self.resolve_key_async().await?;
        let (salt, expected) = split_package(package, self.algorithm.digest_len(), "keyed hash")?;
        let mac = mac_stream_async(self.algorithm, &key, salt, src).await?;
        constant_time_check(&mac, expected, "keyed hash mismatch")
    }

    pub fn try_verify(&mut self, data: &[u8], package: &[u8]) -> CoffreResult<bool> {
        flatten_verify(self.verify(data, package))
    }

    pub fn try_verify_stream<R: Read>(&mut self, src: R, package: &[u8]) -> CoffreResult<bool> {
        flatten_verify(self.verify_stream(src, package))
    }

    pub async fn try_verify_stream_async<R>(
        &mut self,
        src: R,
        package: &[u8],
    ) -> CoffreResult<bool>
    where
        R: AsyncRead + Unpin,
    {
        flatten_verify(self.verify_stream_async(src, package).await)
    }
}

enum MacKind {
    Sha256(Hmac<Sha256>),
    Sha384(Hmac<Sha384>),
    Sha512(Hmac<Sha512>),
}

impl MacKind {
    fn new(algorithm: HashAlgorithm, key: &[u8]) -> CoffreResult<Self> {
        let init = |e| CoffreError::crypto(format!("hmac init: {e}"));
        Ok(match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Hmac::new_from_slice(key).map_err(init)?),
            HashAlgorithm::Sha384 => Self::Sha384(Hmac::new_from_slice(key).map_err(init)?),
            HashAlgorithm::Sha512 => Self::Sha512(Hmac::new_from_slice(key).map_err(init)?),
        })
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(mac) => mac.update(data),
            Self::Sha384(mac) => mac.update(data),
            Self::Sha512(mac) => mac.update(data),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(mac) => mac.finalize().into_bytes().to_vec(),
            Self::Sha384(mac) => mac.finalize().into_bytes().to_vec(),
            Self::Sha512(mac) => mac.finalize().into_bytes().to_vec(),
        }
    }
}

fn mac_stream<R: Read>(
    algorithm: HashAlgorithm,
    key: &KeyMaterial,
    salt: &[u8],
    mut src: R,
) -> CoffreResult<Vec<u8>> {
    let mut mac = MacKind::new(algorithm, key.as_bytes())?;
    mac.update(salt);
    let mut buf = [0u8; COPY_BUF];
    loop {
        let n = match src.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break;
        }
        mac.update(&buf[..n]);
    }
    Ok(mac.finalize())
}

async fn mac_stream_async<R>(
    algorithm: HashAlgorithm,
    key: &KeyMaterial,
    salt: &[u8],
    mut src: R,
) -> CoffreResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut mac = MacKind::new(algorithm, key.as_bytes())?;
    mac.update(salt);
    let mut buf = [0u8; COPY_BUF];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        mac.update(&buf[..n]);
    }
    Ok(mac.finalize())
}

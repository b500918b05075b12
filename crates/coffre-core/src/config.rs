use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoffreError, CoffreResult};
use crate::suite::{HashAlgorithm, SymmetricAlgorithm};

/// Top-level coffre configuration (loaded from coffre.toml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoffreConfig {
    pub cipher: CipherConfig,
    pub hash: HashConfig,
    pub password: PasswordConfig,
    pub keys: KeyConfig,
}

/// How the symmetric key travels with (or apart from) a package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyWrapMode {
    /// Key lives wrapped in key storage; packages carry only IV + ciphertext.
    #[default]
    Protected,
    /// A fresh key per package, wrapped and embedded in the package itself.
    Enclosed,
}

/// Integrity tag carried by enclosed-key packages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IntegrityKind {
    #[default]
    None,
    /// Plaintext digest stored in the clear.
    Hash,
    /// Plaintext digest wrapped with the recipient public key.
    EncryptedHash,
    /// Plaintext digest signed with a separate signing key pair.
    Signature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CipherConfig {
    /// Bulk cipher (default: aes256-cbc)
    pub algorithm: SymmetricAlgorithm,
    /// Key placement (default: protected)
    pub key_wrap: KeyWrapMode,
    /// Wrap the per-package IV with the key pair instead of storing it clear
    pub wrap_iv: bool,
    /// Integrity tag kind, enclosed mode only (default: none)
    pub integrity: IntegrityKind,
    /// Base64-armor whole packages
    pub armor: bool,
    /// Plaintext bytes per chunk in chunked streaming mode (default: 4096)
    pub chunk_block: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HashConfig {
    /// Digest algorithm (default: sha256)
    pub algorithm: HashAlgorithm,
    /// Salt length in bytes for salted hashing (default: 8)
    pub salt_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// PBKDF2 iteration count (default: 100000)
    pub iterations: u32,
    /// Derived hash length in bytes (default: 32)
    pub hash_len: usize,
    /// Salt length in bytes (default: 16)
    pub salt_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    /// Directory for wrapped key blobs
    pub dir: PathBuf,
    /// Seed name fed to the location strategy (default: "coffre")
    pub seed: String,
    /// Derive storage locations by hashing the seed instead of using it as-is
    pub hashed_locations: bool,
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            algorithm: SymmetricAlgorithm::Aes256Cbc,
            key_wrap: KeyWrapMode::Protected,
            wrap_iv: false,
            integrity: IntegrityKind::None,
            armor: false,
            chunk_block: 4096,
        }
    }
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Sha256,
            salt_len: 8,
        }
    }
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            iterations: 100_000,
            hash_len: 32,
            salt_len: 16,
        }
    }
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("~/.local/share/coffre/keys"),
            seed: "coffre".into(),
            hashed_locations: false,
        }
    }
}

impl CoffreConfig {
    pub fn from_toml_str(s: &str) -> CoffreResult<Self> {
        toml::from_str(s).map_err(|e| CoffreError::Config(e.to_string()))
    }

    /// Loads the file if it exists, falls back to defaults if it does not.
    pub fn load(path: &Path) -> CoffreResult<Self> {
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let config = Self::from_toml_str(&raw)?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }
}

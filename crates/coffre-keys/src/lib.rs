//! coffre-keys: Key machinery for crypto packages
//!
//! Layers, bottom to top:
//! ```text
//! KeyMaterial        clear bytes in memory, zeroized on drop
//! KeyStorage         wrapped blobs at flat locations (file / in-memory)
//! KeyLocationStrategy  seed name → location (verbatim or BLAKE3-hashed)
//! KeyPairProvider    RSA-OAEP wrap/unwrap, PKCS#1 v1.5 digest signatures, PEM
//! ManagedKey         load-or-generate lifecycle over all of the above
//! ```

pub mod lifecycle;
pub mod location;
pub mod material;
pub mod provider;
pub mod storage;

pub use lifecycle::ManagedKey;
pub use location::{DefaultKeyLocation, HashedKeyLocation, KeyLocationStrategy, DEFAULT_KEY_NAME};
pub use material::KeyMaterial;
pub use provider::{KeyPairProvider, DEFAULT_KEY_BITS};
pub use storage::{FileKeyStorage, KeyStorage, MemoryKeyStorage};

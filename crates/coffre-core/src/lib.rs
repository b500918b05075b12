//! coffre-core: Shared foundations for the coffre crypto-package crates
//!
//! Everything here is policy-free plumbing: the error taxonomy the whole
//! workspace reports through, the algorithm suite (AES-CBC variants and SHA-2
//! digests), the length-prefixed wire primitives packages are built from, and
//! the TOML config schema.

pub mod config;
pub mod error;
pub mod suite;
pub mod wire;

pub use config::{CoffreConfig, IntegrityKind, KeyWrapMode};
pub use error::{CoffreError, CoffreResult};
pub use suite::{Digester, HashAlgorithm, SymmetricAlgorithm};

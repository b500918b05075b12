//! coffre-hash: the hashing family
//!
//! Four hashers over one package convention (`salt ‖ tag`, tag over
//! `salt ‖ data`, salt length re-derived from the package on verify):
//!
//! - [`Hasher`]: salted SHA-2 digest
//! - [`KeyedHasher`]: HMAC with a wrapped, persisted key
//! - [`PasswordHasher`]: PBKDF2, fully self-describing package
//! - [`RsaSigner`]: digest signed instead of stored
//!
//! Each exposes `verify` (typed error) and `try_verify` (bool for a plain
//! mismatch, errors for anything structural). The content hashers also come
//! in streaming and async forms; [`PasswordHasher`] is byte-slice and sync
//! only, since the password is the PBKDF2 key and cannot be streamed.

pub mod hasher;
pub mod keyed;
pub mod password;
pub mod signer;

pub use hasher::Hasher;
pub use keyed::{KeyedHasher, HMAC_KEY_LEN};
pub use password::{PasswordHasher, DEFAULT_HASH_LEN, DEFAULT_ITERATIONS, DEFAULT_SALT_LEN};
pub use signer::RsaSigner;

/// Salting floor: zero disables salting, anything else must be at least this
/// many bytes.
pub const MIN_SALT_LEN: usize = 8;

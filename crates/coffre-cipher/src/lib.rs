//! coffre-cipher: the crypto-package cipher family
//!
//! Everything here produces or consumes *crypto packages*: self-describing
//! byte streams of length-prefixed preamble fields followed by ciphertext.
//!
//! ```text
//! PackageCipher (AES-CBC)
//!   protected:            [iv][ciphertext]           key persisted, wrapped
//!   enclosed:             [wrapped key][iv][ct]      fresh key per package
//!   enclosed + integrity: [tag][wrapped key][iv][ct] plaintext digest first
//!
//! ChunkedCipher (one-shot primitives, e.g. XChaCha20-Poly1305)
//!   [len][sealed chunk][len][sealed chunk]...        ends at first short chunk
//! ```
//!
//! Both support Base64 armor and come in sync and tokio-async forms.

pub mod armor;
pub mod chunked;
pub mod cipher;
pub mod engine;

pub use armor::{ArmorDecoder, ArmorEncoder, ArmorReader, AsyncArmorReader};
pub use chunked::{ChunkedCipher, SingleShotCipher, XChaChaSealer, DEFAULT_BLOCK, XCHACHA_KEY_LEN};
pub use cipher::{CipherOptions, IntegrityMode, IvPolicy, PackageCipher};
pub use engine::{CbcDecryptor, CbcEncryptor};

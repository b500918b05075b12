//! Streaming AES-CBC engines.
//!
//! The `cbc` crate's modes are one-block-at-a-time primitives. These engines
//! add the buffering needed to push arbitrarily sized slices through them:
//! partial blocks accumulate in `pending`, and the decryptor additionally
//! holds the last decrypted block back until end of stream so PKCS#7 padding
//! can be stripped from it.

use aes::cipher::block_padding::{Pkcs7, RawPadding};
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::{Aes128, Aes256};

use coffre_core::{CoffreError, CoffreResult, SymmetricAlgorithm};

const BLOCK: usize = 16;

enum EncryptorKind {
    Aes128(cbc::Encryptor<Aes128>),
    Aes256(cbc::Encryptor<Aes256>),
}

enum DecryptorKind {
    Aes128(cbc::Decryptor<Aes128>),
    Aes256(cbc::Decryptor<Aes256>),
}

pub struct CbcEncryptor {
    inner: EncryptorKind,
    pending: Vec<u8>,
}

impl CbcEncryptor {
    pub fn new(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> CoffreResult<Self> {
        let inner = match algorithm {
            SymmetricAlgorithm::Aes128Cbc => EncryptorKind::Aes128(
                cbc::Encryptor::new_from_slices(key, iv)
                    .map_err(|e| CoffreError::crypto(format!("cipher init: {e}")))?,
            ),
            SymmetricAlgorithm::Aes256Cbc => EncryptorKind::Aes256(
                cbc::Encryptor::new_from_slices(key, iv)
                    .map_err(|e| CoffreError::crypto(format!("cipher init: {e}")))?,
            ),
        };
        Ok(Self {
            inner,
            pending: Vec::with_capacity(BLOCK),
        })
    }

    /// Encrypts every full block available and appends the ciphertext to
    /// `out`; up to a block of trailing input is carried to the next call.
    pub fn update(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            let take = (BLOCK - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() == BLOCK {
                let mut block = [0u8; BLOCK];
                block.copy_from_slice(&self.pending);
                self.encrypt_block(&mut block);
                out.extend_from_slice(&block);
                self.pending.clear();
            }
        }
        let full = input.len() - input.len() % BLOCK;
        for chunk in input[..full].chunks_exact(BLOCK) {
            let mut block = [0u8; BLOCK];
            block.copy_from_slice(chunk);
            self.encrypt_block(&mut block);
            out.extend_from_slice(&block);
        }
        self.pending.extend_from_slice(&input[full..]);
    }

    /// Pads the tail and emits the final block. CBC with PKCS#7 always emits
    /// at least one block, even for empty input.
    pub fn finish(mut self, out: &mut Vec<u8>) {
        let mut block = [0u8; BLOCK];
        let pos = self.pending.len();
        block[..pos].copy_from_slice(&self.pending);
        Pkcs7::raw_pad(&mut block, pos);
        self.encrypt_block(&mut block);
        out.extend_from_slice(&block);
    }

    fn encrypt_block(&mut self, block: &mut [u8; BLOCK]) {
        let block = GenericArray::from_mut_slice(block);
        match &mut self.inner {
            EncryptorKind::Aes128(enc) => enc.encrypt_block_mut(block),
            EncryptorKind::Aes256(enc) => enc.encrypt_block_mut(block),
        }
    }
}

pub struct CbcDecryptor {
    inner: DecryptorKind,
    pending: Vec<u8>,
    held: Option<[u8; BLOCK]>,
}

impl CbcDecryptor {
    pub fn new(algorithm: SymmetricAlgorithm, key: &[u8], iv: &[u8]) -> CoffreResult<Self> {
        let inner = match algorithm {
            SymmetricAlgorithm::Aes128Cbc => DecryptorKind::Aes128(
                cbc::Decryptor::new_from_slices(key, iv)
                    .map_err(|e| CoffreError::crypto(format!("cipher init: {e}")))?,
            ),
            SymmetricAlgorithm::Aes256Cbc => DecryptorKind::Aes256(
                cbc::Decryptor::new_from_slices(key, iv)
                    .map_err(|e| CoffreError::crypto(format!("cipher init: {e}")))?,
            ),
        };
        Ok(Self {
            inner,
            pending: Vec::with_capacity(BLOCK),
            held: None,
        })
    }

    /// Decrypts every full block available, appending all but the most recent
    /// decrypted block to `out`.
    pub fn update(&mut self, mut input: &[u8], out: &mut Vec<u8>) {
        if !self.pending.is_empty() {
            let take = (BLOCK - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() == BLOCK {
                let mut block = [0u8; BLOCK];
                block.copy_from_slice(&self.pending);
                self.push_block(block, out);
                self.pending.clear();
            }
        }
        let full = input.len() - input.len() % BLOCK;
        for chunk in input[..full].chunks_exact(BLOCK) {
            let mut block = [0u8; BLOCK];
            block.copy_from_slice(chunk);
            self.push_block(block, out);
        }
        self.pending.extend_from_slice(&input[full..]);
    }

    /// Strips padding from the held final block and appends what remains.
    pub fn finish(self, out: &mut Vec<u8>) -> CoffreResult<()> {
        if !self.pending.is_empty() {
            return Err(CoffreError::invalid_package(
                "ciphertext",
                format!(
                    "length is not a multiple of the {BLOCK}-byte cipher block ({} spare)",
                    self.pending.len()
                ),
            ));
        }
        let Some(last) = self.held else {
            return Err(CoffreError::invalid_package("ciphertext", "no ciphertext blocks"));
        };
        let data = Pkcs7::raw_unpad(&last).map_err(|_| {
            CoffreError::invalid_package(
                "ciphertext",
                "final block is not valid padding (wrong key or corrupted package)",
            )
        })?;
        out.extend_from_slice(data);
        Ok(())
    }

    fn push_block(&mut self, mut block: [u8; BLOCK], out: &mut Vec<u8>) {
        self.decrypt_block(&mut block);
        if let Some(prev) = self.held.replace(block) {
            out.extend_from_slice(&prev);
        }
    }

    fn decrypt_block(&mut self, block: &mut [u8; BLOCK]) {
        let block = GenericArray::from_mut_slice(block);
        match &mut self.inner {
            DecryptorKind::Aes128(dec) => dec.decrypt_block_mut(block),
            DecryptorKind::Aes256(dec) => dec.decrypt_block_mut(block),
        }
    }
}

//! Chunked streaming over one-shot sealing primitives.
//!
//! Some primitives only seal whole buffers. [`ChunkedCipher`] turns any such
//! [`SingleShotCipher`] into an unbounded streaming cipher by splitting the
//! plaintext into fixed-size blocks and framing each sealed block with a
//! length prefix:
//!
//! ```text
//! [len: i32 LE][sealed chunk]  [len][sealed chunk]  ...
//! ```
//!
//! There is no trailer. The package ends at the first chunk whose plaintext
//! is shorter than the block size, so an exact-multiple plaintext closes with
//! one empty chunk and every package holds at least one chunk.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use rand::RngCore;
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use coffre_core::wire;
use coffre_core::{CoffreError, CoffreResult};
use coffre_keys::KeyMaterial;

use crate::armor::{ArmorEncoder, ArmorReader, AsyncArmorReader};

/// Default plaintext bytes per chunk.
pub const DEFAULT_BLOCK: usize = 4096;

pub const XCHACHA_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// A cipher that seals one buffer at a time.
pub trait SingleShotCipher: Send + Sync {
    fn protect(&self, plain: &[u8]) -> CoffreResult<Vec<u8>>;
    fn unprotect(&self, sealed: &[u8]) -> CoffreResult<Vec<u8>>;
    /// Fixed size a sealed chunk grows by; bounds the frame length a
    /// decrypting peer will accept.
    fn overhead(&self) -> usize;
}

/// XChaCha20-Poly1305 sealer. Chunk layout `[24-byte nonce][ciphertext][16-byte tag]`;
/// the extended nonce is drawn fresh per chunk, so one key can seal any
/// number of chunks.
#[derive(Debug, Clone)]
pub struct XChaChaSealer {
    key: KeyMaterial,
}

impl XChaChaSealer {
    pub fn new(key: KeyMaterial) -> CoffreResult<Self> {
        if key.len() != XCHACHA_KEY_LEN {
            return Err(CoffreError::invalid_argument(
                "key",
                format!("{} bytes, need {XCHACHA_KEY_LEN}", key.len()),
            ));
        }
        Ok(Self { key })
    }

    pub fn random() -> Self {
        Self {
            key: KeyMaterial::random(XCHACHA_KEY_LEN),
        }
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    fn cipher(&self) -> CoffreResult<XChaCha20Poly1305> {
        XChaCha20Poly1305::new_from_slice(self.key.as_bytes())
            .map_err(|e| CoffreError::crypto(format!("sealer init: {e}")))
    }
}

impl SingleShotCipher for XChaChaSealer {
    fn protect(&self, plain: &[u8]) -> CoffreResult<Vec<u8>> {
        let cipher = self.cipher()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plain)
            .map_err(|e| CoffreError::crypto(format!("chunk seal: {e}")))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn unprotect(&self, sealed: &[u8]) -> CoffreResult<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(CoffreError::invalid_package(
                "sealed chunk",
                format!("{} bytes, minimum {}", sealed.len(), NONCE_LEN + TAG_LEN),
            ));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher()?
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| CoffreError::IntegrityFailure("chunk authentication failed"))
    }

    fn overhead(&self) -> usize {
        NONCE_LEN + TAG_LEN
    }
}

#[derive(Debug, Clone)]
pub struct ChunkedCipher<C> {
    inner: C,
    block: usize,
    armor: bool,
}

impl<C: SingleShotCipher> ChunkedCipher<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            block: DEFAULT_BLOCK,
            armor: false,
        }
    }

    pub fn with_block(mut self, block: usize) -> CoffreResult<Self> {
        if block == 0 {
            return Err(CoffreError::invalid_argument("block", "must be non-zero"));
        }
        // A sealed chunk must still fit in one length-prefixed field.
        let max = wire::MAX_FIELD_LEN - self.inner.overhead();
        if block > max {
            return Err(CoffreError::invalid_argument(
                "block",
                format!("{block} exceeds the {max} byte frame capacity"),
            ));
        }
        self.block = block;
        Ok(self)
    }

    pub fn with_armor(mut self, armor: bool) -> Self {
        self.armor = armor;
        self
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn encrypt(&self, plain: &[u8]) -> CoffreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.encrypt_stream(plain, &mut out)?;
        Ok(out)
    }

    pub fn decrypt(&self, package: &[u8]) -> CoffreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.decrypt_stream(package, &mut out)?;
        Ok(out)
    }

    pub fn encrypt_stream<R: Read, W: Write>(&self, mut src: R, mut dst: W) -> CoffreResult<()> {
        let mut armor = self.armor.then(ArmorEncoder::new);
        let mut buf = vec![0u8; self.block];
        let mut frame = Vec::with_capacity(4 + self.block + self.inner.overhead());
        let mut staged = Vec::new();
        loop {
            let n = read_full(&mut src, &mut buf)?;
            let sealed = self.inner.protect(&buf[..n])?;
            frame.clear();
            wire::write_field(&mut frame, &sealed)?;
            match armor.as_mut() {
                Some(encoder) => {
                    staged.clear();
                    encoder.update(&frame, &mut staged);
                    dst.write_all(&staged)?;
                }
                None => dst.write_all(&frame)?,
            }
            if n < self.block {
                break;
            }
        }
        if let Some(encoder) = armor {
            staged.clear();
            encoder.finish(&mut staged);
            dst.write_all(&staged)?;
        }
        dst.flush()?;
        Ok(())
    }

    pub fn decrypt_stream<R: Read, W: Write>(&self, src: R, dst: W) -> CoffreResult<()> {
        if self.armor {
            self.decrypt_frames(ArmorReader::new(src), dst)
        } else {
            self.decrypt_frames(src, dst)
        }
    }

    fn decrypt_frames<R: Read, W: Write>(&self, mut src: R, mut dst: W) -> CoffreResult<()> {
        let limit = self.block + self.inner.overhead();
        loop {
            let len = wire::read_len(&mut src, "chunk header")?;
            if len > limit {
                return Err(CoffreError::invalid_package(
                    "chunk header",
                    format!("{len} byte chunk exceeds the {limit} byte frame limit"),
                ));
            }
            let mut sealed = vec![0u8; len];
            src.read_exact(&mut sealed)
                .map_err(|e| wire::read_error(e, "sealed chunk"))?;
            let plain = self.inner.unprotect(&sealed)?;
            dst.write_all(&plain)?;
            if plain.len() < self.block {
                break;
            }
        }
        dst.flush()?;
        Ok(())
    }

    pub async fn encrypt_async(&self, plain: &[u8]) -> CoffreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.encrypt_stream_async(plain, &mut out).await?;
        Ok(out)
    }

    pub async fn decrypt_async(&self, package: &[u8]) -> CoffreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.decrypt_stream_async(package, &mut out).await?;
        Ok(out)
    }

    pub async fn encrypt_stream_async<R, W>(&self, mut src: R, mut dst: W) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut armor = self.armor.then(ArmorEncoder::new);
        let mut buf = vec![0u8; self.block];
        let mut frame = Vec::with_capacity(4 + self.block + self.inner.overhead());
        let mut staged = Vec::new();
        loop {
            let n = read_full_async(&mut src, &mut buf).await?;
            let sealed = self.inner.protect(&buf[..n])?;
            frame.clear();
            wire::write_field(&mut frame, &sealed)?;
            match armor.as_mut() {
                Some(encoder) => {
                    staged.clear();
                    encoder.update(&frame, &mut staged);
                    dst.write_all(&staged).await?;
                }
                None => dst.write_all(&frame).await?,
            }
            if n < self.block {
                break;
            }
        }
        if let Some(encoder) = armor {
            staged.clear();
            encoder.finish(&mut staged);
            dst.write_all(&staged).await?;
        }
        dst.flush().await?;
        Ok(())
    }

    pub async fn decrypt_stream_async<R, W>(&self, src: R, dst: W) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.armor {
            self.decrypt_frames_async(AsyncArmorReader::new(src), dst)
                .await
        } else {
            self.decrypt_frames_async(src, dst).await
        }
    }

    async fn decrypt_frames_async<R, W>(&self, mut src: R, mut dst: W) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let limit = self.block + self.inner.overhead();
        loop {
            let len = wire::read_len_async(&mut src, "chunk header").await?;
            if len > limit {
                return Err(CoffreError::invalid_package(
                    "chunk header",
                    format!("{len} byte chunk exceeds the {limit} byte frame limit"),
                ));
            }
            let mut sealed = vec![0u8; len];
            src.read_exact(&mut sealed)
                .await
                .map_err(|e| wire::read_error(e, "sealed chunk"))?;
            let plain = self.inner.unprotect(&sealed)?;
            dst.write_all(&plain).await?;
            if plain.len() < self.block {
                break;
            }
        }
        dst.flush().await?;
        Ok(())
    }
}

/// Fills `buf` from `src`, stopping early only at end of stream.
fn read_full<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

async fn read_full_async<R>(src: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = src.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_OVERHEAD: usize = 4 + NONCE_LEN + TAG_LEN;

    fn test_cipher() -> ChunkedCipher<XChaChaSealer> {
        ChunkedCipher::new(XChaChaSealer::random())
    }

    #[test]
    fn test_roundtrip_single_chunk() {
        let cipher = test_cipher();
        let plain = b"fits in one chunk";
        let package = cipher.encrypt(plain).unwrap();
        assert_eq!(package.len(), FRAME_OVERHEAD + plain.len());
        assert_eq!(cipher.decrypt(&package).unwrap(), plain);
    }

    #[test]
    fn test_empty_input_is_one_empty_chunk() {
        let cipher = test_cipher();
        let package = cipher.encrypt(b"").unwrap();
        assert_eq!(package.len(), FRAME_OVERHEAD);
        assert_eq!(cipher.decrypt(&package).unwrap(), b"");
    }

    #[test]
    fn test_exact_multiple_gets_trailing_empty_chunk() {
        let cipher = test_cipher();
        let plain = vec![0x11u8; DEFAULT_BLOCK];
        let package = cipher.encrypt(&plain).unwrap();
        // One full chunk plus the empty terminator.
        assert_eq!(
            package.len(),
            FRAME_OVERHEAD + DEFAULT_BLOCK + FRAME_OVERHEAD
        );
        assert_eq!(cipher.decrypt(&package).unwrap(), plain);
    }

    #[test]
    fn test_roundtrip_across_block_sizes() {
        let cipher = test_cipher().with_block(64).unwrap();
        for len in [0, 1, 63, 64, 65, 128, 129, 1000] {
            let plain: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let package = cipher.encrypt(&plain).unwrap();
            assert_eq!(cipher.decrypt(&package).unwrap(), plain, "len {len}");
        }
    }

    #[test]
    fn test_zero_block_rejected() {
        let err = test_cipher().with_block(0).unwrap_err();
        assert!(matches!(err, CoffreError::InvalidArgument { .. }), "{err}");
    }

    #[test]
    fn test_wrong_key_rejected() {
        let alice = test_cipher();
        let mallory = test_cipher();
        let package = alice.encrypt(b"chunked secret").unwrap();
        let err = mallory.decrypt(&package).unwrap_err();
        assert!(matches!(err, CoffreError::IntegrityFailure(_)), "{err}");
    }

    #[test]
    fn test_tampered_chunk_rejected() {
        let cipher = test_cipher();
        let mut package = cipher.encrypt(b"authenticated").unwrap();
        let last = package.len() - 1;
        package[last] ^= 0x01;
        let err = cipher.decrypt(&package).unwrap_err();
        assert!(matches!(err, CoffreError::IntegrityFailure(_)), "{err}");
    }

    #[test]
    fn test_truncated_package_rejected() {
        let cipher = test_cipher();
        let package = cipher.encrypt(b"cut me short").unwrap();
        let err = cipher.decrypt(&package[..package.len() - 3]).unwrap_err();
        assert!(matches!(err, CoffreError::InvalidPackage { .. }), "{err}");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let cipher = test_cipher();
        // A frame claiming more than block + overhead bytes.
        let mut package = Vec::new();
        package.extend_from_slice(&(DEFAULT_BLOCK as i32 + 1000).to_le_bytes());
        package.resize(package.len() + DEFAULT_BLOCK + 1000, 0);
        let err = cipher.decrypt(&package).unwrap_err();
        assert!(matches!(err, CoffreError::InvalidPackage { .. }), "{err}");
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let cipher = test_cipher().with_block(8).unwrap();
        // Drop the final (empty) frame of an exact-multiple package: the
        // stream then ends where another header is required.
        let package = cipher.encrypt(&[0u8; 16]).unwrap();
        let cut = package.len() - FRAME_OVERHEAD;
        let err = cipher.decrypt(&package[..cut]).unwrap_err();
        assert!(matches!(err, CoffreError::InvalidPackage { .. }), "{err}");
    }

    #[test]
    fn test_armor_roundtrip() {
        let cipher = ChunkedCipher::new(XChaChaSealer::random()).with_armor(true);
        let plain: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let package = cipher.encrypt(&plain).unwrap();
        assert!(package
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'+' | b'/' | b'=')));
        assert_eq!(cipher.decrypt(&package).unwrap(), plain);
    }

    #[test]
    fn test_sealer_key_length_enforced() {
        let err = XChaChaSealer::new(KeyMaterial::from_bytes(vec![0u8; 16])).unwrap_err();
        assert!(matches!(err, CoffreError::InvalidArgument { .. }), "{err}");
    }

    #[test]
    fn test_sealer_shares_key() {
        let sealer = XChaChaSealer::random();
        let twin = XChaChaSealer::new(sealer.key().clone()).unwrap();
        let sealed = sealer.protect(b"between twins").unwrap();
        assert_eq!(twin.unprotect(&sealed).unwrap(), b"between twins");
    }

    #[test]
    fn test_short_sealed_chunk_rejected() {
        let sealer = XChaChaSealer::random();
        let err = sealer.unprotect(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, CoffreError::InvalidPackage { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_async_roundtrip() {
        let cipher = test_cipher().with_block(256).unwrap();
        let plain = vec![0xC3u8; 1000];
        let package = cipher.encrypt_async(&plain).await.unwrap();
        assert_eq!(cipher.decrypt_async(&package).await.unwrap(), plain);
    }

    #[tokio::test]
    async fn test_sync_and_async_packages_interchange() {
        let cipher = test_cipher();
        let from_sync = cipher.encrypt(b"sync frames").unwrap();
        assert_eq!(
            cipher.decrypt_async(&from_sync).await.unwrap(),
            b"sync frames"
        );
        let from_async = cipher.encrypt_async(b"async frames").await.unwrap();
        assert_eq!(cipher.decrypt(&from_async).unwrap(), b"async frames");
    }

    #[tokio::test]
    async fn test_async_armor_roundtrip() {
        let cipher = ChunkedCipher::new(XChaChaSealer::random())
            .with_block(100)
            .unwrap()
            .with_armor(true);
        let plain = vec![0x77u8; 450];
        let package = cipher.encrypt_async(&plain).await.unwrap();
        assert_eq!(cipher.decrypt_async(&package).await.unwrap(), plain);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_roundtrip(
                plain in proptest::collection::vec(any::<u8>(), 0..3000),
                block in 1usize..512,
            ) {
                let cipher = ChunkedCipher::new(XChaChaSealer::random())
                    .with_block(block)
                    .unwrap();
                let package = cipher.encrypt(&plain).unwrap();
                prop_assert_eq!(cipher.decrypt(&package).unwrap(), plain);
            }
        }
    }
}

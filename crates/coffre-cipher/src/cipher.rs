//! The crypto-package cipher.
//!
//! A package is a self-describing byte stream: zero or more length-prefixed
//! preamble fields followed by the ciphertext, which runs to end of stream.
//! Which fields appear is fixed by the cipher's configuration, and both sides
//! must agree on it; nothing in the bytes says which variant produced them.
//!
//! ```text
//! protected:            [iv][ciphertext]
//! enclosed:             [wrapped key][iv][ciphertext]
//! enclosed + integrity: [tag][wrapped key][iv][ciphertext]
//! ```
//!
//! Every bracketed field is `[len: i32 LE][payload]`. The IV slot holds the
//! clear IV or, under [`IvPolicy::Wrapped`], the IV encrypted to the key
//! pair. Integrity tags are written as zeros first and patched in once the
//! plaintext digest is known, which is why encryption sinks must seek;
//! Base64 armor removes the seek requirement but excludes integrity.

use rand::RngCore;
use std::io::{self, Read, Seek, Write};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use coffre_core::wire::{self, TagSlot};
use coffre_core::{CoffreError, CoffreResult, Digester, HashAlgorithm, SymmetricAlgorithm};
use coffre_keys::{KeyLocationStrategy, KeyMaterial, KeyPairProvider, KeyStorage, ManagedKey};

use crate::armor::{ArmorEncoder, ArmorReader, AsyncArmorReader};
use crate::engine::{CbcDecryptor, CbcEncryptor};

const COPY_BUF: usize = 8192;

/// How the per-package IV is stored in the preamble.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IvPolicy {
    #[default]
    Clear,
    /// IV encrypted to the key pair. Binds every package to the pair, so a
    /// cipher with this policy can never shed it.
    Wrapped,
}

/// Plaintext integrity tag placed ahead of everything else in the package.
/// Only enclosed-key packages carry one.
#[derive(Debug, Clone, Default)]
pub enum IntegrityMode {
    #[default]
    None,
    /// Digest of the plaintext; clear, or wrapped with the encryption pair.
    Hash { encrypt_tag: bool },
    /// Digest signed by a separate signing pair. Verification needs only its
    /// public half.
    Signature { signer: Arc<KeyPairProvider> },
}

#[derive(Debug, Clone, Default)]
pub struct CipherOptions {
    pub algorithm: SymmetricAlgorithm,
    pub iv_policy: IvPolicy,
    pub integrity: IntegrityMode,
    pub armor: bool,
}

#[derive(Debug)]
enum KeySource {
    /// Key lives in storage, wrapped; packages do not carry it.
    Protected {
        managed: ManagedKey,
        provider: Arc<KeyPairProvider>,
    },
    /// Fresh key per package, wrapped into the package.
    Enclosed { provider: Arc<KeyPairProvider> },
    /// Clear key only; no pair, no storage. Result of shedding.
    Light { key: KeyMaterial },
}

#[derive(Debug)]
pub struct PackageCipher {
    algorithm: SymmetricAlgorithm,
    iv_policy: IvPolicy,
    integrity: IntegrityMode,
    armor: bool,
    source: KeySource,
}

struct EncryptPlan {
    key: KeyMaterial,
    iv: Vec<u8>,
    preamble: Vec<u8>,
    tag: Option<TagPlan>,
}

/// A pending integrity tag: where its zeros sit in the preamble, and the
/// running digest that will fill them.
struct TagPlan {
    /// Offset of the zeros within the preamble.
    rel: usize,
    len: usize,
    digester: Digester,
}

impl PackageCipher {
    /// Cipher over a storage-managed key at an explicit location.
    pub fn protected(
        provider: Arc<KeyPairProvider>,
        storage: Arc<dyn KeyStorage>,
        location: impl Into<String>,
        options: CipherOptions,
    ) -> CoffreResult<Self> {
        if !matches!(options.integrity, IntegrityMode::None) {
            return Err(CoffreError::invalid_operation(
                "integrity tags are only defined for enclosed-key packages",
            ));
        }
        check_options(&options)?;
        let managed = ManagedKey::new(storage, location, options.algorithm.key_len());
        Ok(Self {
            algorithm: options.algorithm,
            iv_policy: options.iv_policy,
            integrity: IntegrityMode::None,
            armor: options.armor,
            source: KeySource::Protected { managed, provider },
        })
    }

    /// [`protected`](Self::protected) with the location resolved from a seed
    /// name by a strategy.
    pub fn protected_at(
        provider: Arc<KeyPairProvider>,
        storage: Arc<dyn KeyStorage>,
        strategy: &dyn KeyLocationStrategy,
        seed: &str,
        options: CipherOptions,
    ) -> CoffreResult<Self> {
        let location = strategy.resolve(seed);
        Self::protected(provider, storage, location, options)
    }

    /// Cipher that mints a fresh key per package and embeds it, wrapped.
    /// Decryption needs the private half; without it the cipher is
    /// encrypt-only.
    pub fn enclosed(provider: Arc<KeyPairProvider>, options: CipherOptions) -> CoffreResult<Self> {
        check_options(&options)?;
        Ok(Self {
            algorithm: options.algorithm,
            iv_policy: options.iv_policy,
            integrity: options.integrity,
            armor: options.armor,
            source: KeySource::Enclosed { provider },
        })
    }

    pub fn algorithm(&self) -> SymmetricAlgorithm {
        self.algorithm
    }

    pub fn is_light(&self) -> bool {
        matches!(self.source, KeySource::Light { .. })
    }

    /// Storage location of the managed key. Only protected ciphers have one.
    pub fn key_location(&self) -> CoffreResult<&str> {
        match &self.source {
            KeySource::Protected { managed, .. } => Ok(managed.location()),
            KeySource::Enclosed { .. } => Err(CoffreError::NotSupported(
                "enclosed-key ciphers keep no stored key",
            )),
            KeySource::Light { .. } => Err(CoffreError::invalid_operation(
                "light cipher has shed its key storage",
            )),
        }
    }

    /// Replaces the managed key with caller-supplied material.
    pub fn import_key(&mut self, clear: &[u8]) -> CoffreResult<()> {
        match &mut self.source {
            KeySource::Protected { managed, provider } => managed.import(clear, provider),
            KeySource::Enclosed { .. } => Err(CoffreError::NotSupported(
                "enclosed-key ciphers mint a fresh key per package",
            )),
            KeySource::Light { .. } => Err(CoffreError::invalid_operation(
                "light cipher has shed its key storage",
            )),
        }
    }

    /// Clear copy of the managed key, initializing it first if needed.
    pub fn export_key(&mut self) -> CoffreResult<KeyMaterial> {
        match &mut self.source {
            KeySource::Protected { managed, provider } => managed.export(provider),
            KeySource::Enclosed { .. } => Err(CoffreError::NotSupported(
                "enclosed-key ciphers keep no stored key",
            )),
            KeySource::Light { .. } => Err(CoffreError::invalid_operation(
                "light cipher has shed its key storage",
            )),
        }
    }

    /// Drops the key pair and storage handle, keeping only the clear
    /// symmetric key. Allowed once the key is initialized, and only when no
    /// package needs the pair again (clear IVs, no integrity).
    pub fn release_key_pair(&mut self) -> CoffreResult<()> {
        let key = self.light_key()?;
        self.source = KeySource::Light { key };
        tracing::debug!("released key pair");
        Ok(())
    }

    /// A cipher sharing this one's symmetric key but holding nothing else.
    /// Suitable for handing bulk encryption to less trusted code.
    pub fn light_clone(&self) -> CoffreResult<Self> {
        let key = self.light_key()?;
        Ok(Self {
            algorithm: self.algorithm,
            iv_policy: IvPolicy::Clear,
            integrity: IntegrityMode::None,
            armor: self.armor,
            source: KeySource::Light { key },
        })
    }

    fn light_key(&self) -> CoffreResult<KeyMaterial> {
        match &self.source {
            KeySource::Protected { managed, .. } => {
                if self.iv_policy == IvPolicy::Wrapped {
                    return Err(CoffreError::invalid_operation(
                        "wrapped-IV packages need the key pair every time",
                    ));
                }
                match managed.material() {
                    Some(key) => Ok(key.clone()),
                    None => Err(CoffreError::invalid_operation(
                        "symmetric key is not initialized yet",
                    )),
                }
            }
            KeySource::Enclosed { .. } => Err(CoffreError::invalid_operation(
                "enclosed-key ciphers have no reusable symmetric key",
            )),
            KeySource::Light { .. } => Err(CoffreError::invalid_operation(
                "key pair already released",
            )),
        }
    }

    // ---- encryption ----

    pub fn encrypt(&mut self, plain: &[u8]) -> CoffreResult<Vec<u8>> {
        let mut out = io::Cursor::new(Vec::new());
        self.encrypt_stream(plain, &mut out)?;
        Ok(out.into_inner())
    }

    pub fn encrypt_stream<R: Read, W: Write + Seek>(
        &mut self,
        mut src: R,
        mut dst: W,
    ) -> CoffreResult<()> {
        let key = self.resolve_encrypt_key()?;
        let plan = self.build_plan(key)?;
        if self.armor {
            self.encrypt_armored(&mut src, &mut dst, plan)
        } else {
            self.encrypt_plain(&mut src, &mut dst, plan)
        }
    }

    pub async fn encrypt_async(&mut self, plain: &[u8]) -> CoffreResult<Vec<u8>> {
        let mut out = io::Cursor::new(Vec::new());
        self.encrypt_stream_async(plain, &mut out).await?;
        Ok(out.into_inner())
    }

    pub async fn encrypt_stream_async<R, W>(&mut self, mut src: R, mut dst: W) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + AsyncSeek + Unpin,
    {
        let key = self.resolve_encrypt_key_async().await?;
        let plan = self.build_plan(key)?;
        if self.armor {
            self.encrypt_armored_async(&mut src, &mut dst, plan).await
        } else {
            self.encrypt_plain_async(&mut src, &mut dst, plan).await
        }
    }

    // ---- decryption ----

    pub fn decrypt(&mut self, package: &[u8]) -> CoffreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.decrypt_stream(package, &mut out)?;
        Ok(out)
    }

    pub fn decrypt_stream<R: Read, W: Write>(&mut self, src: R, dst: W) -> CoffreResult<()> {
        if self.armor {
            self.decrypt_inner(ArmorReader::new(src), dst)
        } else {
            self.decrypt_inner(src, dst)
        }
    }

    pub async fn decrypt_async(&mut self, package: &[u8]) -> CoffreResult<Vec<u8>> {
        let mut out = Vec::new();
        self.decrypt_stream_async(package, &mut out).await?;
        Ok(out)
    }

    pub async fn decrypt_stream_async<R, W>(&mut self, src: R, dst: W) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.armor {
            self.decrypt_inner_async(AsyncArmorReader::new(src), dst)
                .await
        } else {
            self.decrypt_inner_async(src, dst).await
        }
    }

    // ---- key resolution and planning ----

    fn resolve_encrypt_key(&mut self) -> CoffreResult<KeyMaterial> {
        match &mut self.source {
            KeySource::Protected { managed, provider } => Ok(managed.ensure(provider)?.clone()),
            KeySource::Enclosed { .. } => Ok(KeyMaterial::random(self.algorithm.key_len())),
            KeySource::Light { key } => Ok(key.clone()),
        }
    }

    async fn resolve_encrypt_key_async(&mut self) -> CoffreResult<KeyMaterial> {
        match &mut self.source {
            KeySource::Protected { managed, provider } => {
                Ok(managed.ensure_async(provider).await?.clone())
            }
            KeySource::Enclosed { .. } => Ok(KeyMaterial::random(self.algorithm.key_len())),
            KeySource::Light { key } => Ok(key.clone()),
        }
    }

    /// Draws the IV and lays out the preamble. Pure once the key is resolved,
    /// so the sync and async pipelines share it.
    fn build_plan(&self, key: KeyMaterial) -> CoffreResult<EncryptPlan> {
        let mut iv = vec![0u8; self.algorithm.iv_len()];
        rand::thread_rng().fill_bytes(&mut iv);

        let mut preamble = Vec::new();
        let tag = match self.tag_len()? {
            Some(len) => Some(TagPlan {
                rel: wire::reserve_field_buf(&mut preamble, len),
                len,
                digester: Digester::new(self.tag_hash()),
            }),
            None => None,
        };
        if let KeySource::Enclosed { provider } = &self.source {
            wire::write_field(&mut preamble, &provider.wrap(key.as_bytes())?)?;
        }
        match self.iv_policy {
            IvPolicy::Clear => wire::write_field(&mut preamble, &iv)?,
            IvPolicy::Wrapped => {
                let provider = self.require_provider()?;
                wire::write_field(&mut preamble, &provider.wrap(&iv)?)?;
            }
        }
        Ok(EncryptPlan {
            key,
            iv,
            preamble,
            tag,
        })
    }

    fn provider(&self) -> Option<&Arc<KeyPairProvider>> {
        match &self.source {
            KeySource::Protected { provider, .. } | KeySource::Enclosed { provider } => {
                Some(provider)
            }
            KeySource::Light { .. } => None,
        }
    }

    fn require_provider(&self) -> CoffreResult<&Arc<KeyPairProvider>> {
        self.provider().ok_or_else(|| {
            CoffreError::invalid_operation("this operation needs the key pair")
        })
    }

    /// Byte length of the integrity tag field, if one is configured.
    fn tag_len(&self) -> CoffreResult<Option<usize>> {
        match &self.integrity {
            IntegrityMode::None => Ok(None),
            IntegrityMode::Hash { encrypt_tag: false } => {
                Ok(Some(self.tag_hash().digest_len()))
            }
            IntegrityMode::Hash { encrypt_tag: true } => {
                Ok(Some(self.require_provider()?.key_size()))
            }
            IntegrityMode::Signature { signer } => Ok(Some(signer.key_size())),
        }
    }

    fn tag_hash(&self) -> HashAlgorithm {
        match &self.integrity {
            IntegrityMode::Signature { signer } => signer.hash_algorithm(),
            _ => self
                .provider()
                .map(|p| p.hash_algorithm())
                .unwrap_or_default(),
        }
    }

    fn make_tag(&self, digest: &[u8]) -> CoffreResult<Vec<u8>> {
        match &self.integrity {
            IntegrityMode::None => Ok(Vec::new()),
            IntegrityMode::Hash { encrypt_tag: false } => Ok(digest.to_vec()),
            IntegrityMode::Hash { encrypt_tag: true } => self.require_provider()?.wrap(digest),
            IntegrityMode::Signature { signer } => signer.sign_digest(digest),
        }
    }

    fn verify_tag(&self, digest: &[u8], tag: &[u8]) -> CoffreResult<()> {
        match &self.integrity {
            IntegrityMode::None => Ok(()),
            IntegrityMode::Hash { encrypt_tag: false } => constant_time_check(digest, tag),
            IntegrityMode::Hash { encrypt_tag: true } => {
                let expected = match self.require_provider()?.unwrap(tag) {
                    Ok(clear) => clear,
                    Err(e @ CoffreError::KeyUnavailable(_)) => return Err(e),
                    Err(_) => {
                        return Err(CoffreError::IntegrityFailure("encrypted hash tag rejected"))
                    }
                };
                constant_time_check(digest, &expected)
            }
            IntegrityMode::Signature { signer } => signer.verify_digest(digest, tag),
        }
    }

    // ---- sync pipelines ----

    fn encrypt_plain<R: Read, W: Write + Seek>(
        &self,
        src: &mut R,
        dst: &mut W,
        plan: EncryptPlan,
    ) -> CoffreResult<()> {
        let EncryptPlan {
            key,
            iv,
            preamble,
            mut tag,
        } = plan;
        let start = dst.stream_position()?;
        dst.write_all(&preamble)?;

        let mut engine = CbcEncryptor::new(self.algorithm, key.as_bytes(), &iv)?;
        let mut inbuf = [0u8; COPY_BUF];
        let mut ctbuf = Vec::with_capacity(COPY_BUF + 16);
        loop {
            let n = read_step(src, &mut inbuf)?;
            if n == 0 {
                break;
            }
            if let Some(t) = tag.as_mut() {
                t.digester.update(&inbuf[..n]);
            }
            ctbuf.clear();
            engine.update(&inbuf[..n], &mut ctbuf);
            dst.write_all(&ctbuf)?;
        }
        ctbuf.clear();
        engine.finish(&mut ctbuf);
        dst.write_all(&ctbuf)?;

        if let Some(t) = tag {
            let slot = TagSlot {
                offset: start + t.rel as u64,
                len: t.len,
            };
            let bytes = self.make_tag(&t.digester.finalize())?;
            wire::patch_field(dst, slot, &bytes)?;
        }
        dst.flush()?;
        Ok(())
    }

    fn encrypt_armored<R: Read, W: Write>(
        &self,
        src: &mut R,
        dst: &mut W,
        plan: EncryptPlan,
    ) -> CoffreResult<()> {
        // Armor and integrity are mutually exclusive, so no pending tag here.
        debug_assert!(plan.tag.is_none());
        let mut armor = ArmorEncoder::new();
        let mut outbuf = Vec::with_capacity(COPY_BUF * 2);
        armor.update(&plan.preamble, &mut outbuf);
        dst.write_all(&outbuf)?;

        let mut engine = CbcEncryptor::new(self.algorithm, plan.key.as_bytes(), &plan.iv)?;
        let mut inbuf = [0u8; COPY_BUF];
        let mut ctbuf = Vec::with_capacity(COPY_BUF + 16);
        loop {
            let n = read_step(src, &mut inbuf)?;
            if n == 0 {
                break;
            }
            ctbuf.clear();
            engine.update(&inbuf[..n], &mut ctbuf);
            outbuf.clear();
            armor.update(&ctbuf, &mut outbuf);
            dst.write_all(&outbuf)?;
        }
        ctbuf.clear();
        engine.finish(&mut ctbuf);
        outbuf.clear();
        armor.update(&ctbuf, &mut outbuf);
        armor.finish(&mut outbuf);
        dst.write_all(&outbuf)?;
        dst.flush()?;
        Ok(())
    }

    fn decrypt_inner<R: Read, W: Write>(&mut self, mut src: R, mut dst: W) -> CoffreResult<()> {
        let mut checker = match &self.integrity {
            IntegrityMode::None => None,
            _ => {
                let tag = self.read_tag_field(wire::read_field(&mut src, "integrity tag")?)?;
                Some((tag, Digester::new(self.tag_hash())))
            }
        };
        let key = self.resolve_decrypt_key(&mut src)?;
        let iv = self.read_iv_field(wire::read_field(&mut src, "initialization vector")?)?;

        let mut engine = CbcDecryptor::new(self.algorithm, key.as_bytes(), &iv)?;
        let mut inbuf = [0u8; COPY_BUF];
        let mut plainbuf = Vec::with_capacity(COPY_BUF + 16);
        loop {
            let n = read_step(&mut src, &mut inbuf)
                .map_err(|e| wire::read_error(e, "ciphertext"))?;
            if n == 0 {
                break;
            }
            plainbuf.clear();
            engine.update(&inbuf[..n], &mut plainbuf);
            if let Some((_, d)) = checker.as_mut() {
                d.update(&plainbuf);
            }
            dst.write_all(&plainbuf)?;
        }
        plainbuf.clear();
        engine.finish(&mut plainbuf)?;
        if let Some((_, d)) = checker.as_mut() {
            d.update(&plainbuf);
        }
        dst.write_all(&plainbuf)?;

        if let Some((tag, digester)) = checker {
            self.verify_tag(&digester.finalize(), &tag)?;
        }
        dst.flush()?;
        Ok(())
    }

    fn resolve_decrypt_key<R: Read>(&mut self, src: &mut R) -> CoffreResult<KeyMaterial> {
        match &mut self.source {
            KeySource::Protected { managed, provider } => Ok(managed.ensure(provider)?.clone()),
            KeySource::Light { key } => Ok(key.clone()),
            KeySource::Enclosed { provider } => {
                let wrapped = wire::read_field(src, "wrapped symmetric key")?;
                let clear = provider.unwrap(&wrapped)?;
                check_unwrapped_key_len(clear.len(), self.algorithm)?;
                Ok(KeyMaterial::from_bytes(clear.to_vec()))
            }
        }
    }

    fn read_tag_field(&self, tag: Vec<u8>) -> CoffreResult<Vec<u8>> {
        let expected = self.tag_len()?.unwrap_or(0);
        if tag.len() != expected {
            return Err(CoffreError::invalid_package(
                "integrity tag",
                format!("{} bytes, expected {expected}", tag.len()),
            ));
        }
        Ok(tag)
    }

    fn read_iv_field(&self, field: Vec<u8>) -> CoffreResult<Vec<u8>> {
        let iv = match self.iv_policy {
            IvPolicy::Clear => field,
            IvPolicy::Wrapped => self.require_provider()?.unwrap(&field)?.to_vec(),
        };
        if iv.len() != self.algorithm.iv_len() {
            return Err(CoffreError::invalid_package(
                "initialization vector",
                format!("{} bytes, expected {}", iv.len(), self.algorithm.iv_len()),
            ));
        }
        Ok(iv)
    }

    // ---- async pipelines ----

    async fn encrypt_plain_async<R, W>(
        &self,
        src: &mut R,
        dst: &mut W,
        plan: EncryptPlan,
    ) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + AsyncSeek + Unpin,
    {
        let EncryptPlan {
            key,
            iv,
            preamble,
            mut tag,
        } = plan;
        let start = dst.stream_position().await?;
        dst.write_all(&preamble).await?;

        let mut engine = CbcEncryptor::new(self.algorithm, key.as_bytes(), &iv)?;
        let mut inbuf = [0u8; COPY_BUF];
        let mut ctbuf = Vec::with_capacity(COPY_BUF + 16);
        loop {
            let n = src.read(&mut inbuf).await?;
            if n == 0 {
                break;
            }
            if let Some(t) = tag.as_mut() {
                t.digester.update(&inbuf[..n]);
            }
            ctbuf.clear();
            engine.update(&inbuf[..n], &mut ctbuf);
            dst.write_all(&ctbuf).await?;
        }
        ctbuf.clear();
        engine.finish(&mut ctbuf);
        dst.write_all(&ctbuf).await?;

        if let Some(t) = tag {
            let slot = TagSlot {
                offset: start + t.rel as u64,
                len: t.len,
            };
            let bytes = self.make_tag(&t.digester.finalize())?;
            wire::patch_field_async(dst, slot, &bytes).await?;
        }
        dst.flush().await?;
        Ok(())
    }

    async fn encrypt_armored_async<R, W>(
        &self,
        src: &mut R,
        dst: &mut W,
        plan: EncryptPlan,
    ) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        debug_assert!(plan.tag.is_none());
        let mut armor = ArmorEncoder::new();
        let mut outbuf = Vec::with_capacity(COPY_BUF * 2);
        armor.update(&plan.preamble, &mut outbuf);
        dst.write_all(&outbuf).await?;

        let mut engine = CbcEncryptor::new(self.algorithm, plan.key.as_bytes(), &plan.iv)?;
        let mut inbuf = [0u8; COPY_BUF];
        let mut ctbuf = Vec::with_capacity(COPY_BUF + 16);
        loop {
            let n = src.read(&mut inbuf).await?;
            if n == 0 {
                break;
            }
            ctbuf.clear();
            engine.update(&inbuf[..n], &mut ctbuf);
            outbuf.clear();
            armor.update(&ctbuf, &mut outbuf);
            dst.write_all(&outbuf).await?;
        }
        ctbuf.clear();
        engine.finish(&mut ctbuf);
        outbuf.clear();
        armor.update(&ctbuf, &mut outbuf);
        armor.finish(&mut outbuf);
        dst.write_all(&outbuf).await?;
        dst.flush().await?;
        Ok(())
    }

    async fn decrypt_inner_async<R, W>(&mut self, mut src: R, mut dst: W) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut checker = match &self.integrity {
            IntegrityMode::None => None,
            _ => {
                let raw = wire::read_field_async(&mut src, "integrity tag").await?;
                let tag = self.read_tag_field(raw)?;
                Some((tag, Digester::new(self.tag_hash())))
            }
        };
        let key = self.resolve_decrypt_key_async(&mut src).await?;
        let raw_iv = wire::read_field_async(&mut src, "initialization vector").await?;
        let iv = self.read_iv_field(raw_iv)?;

        let mut engine = CbcDecryptor::new(self.algorithm, key.as_bytes(), &iv)?;
        let mut inbuf = [0u8; COPY_BUF];
        let mut plainbuf = Vec::with_capacity(COPY_BUF + 16);
        loop {
            let n = src
                .read(&mut inbuf)
                .await
                .map_err(|e| wire::read_error(e, "ciphertext"))?;
            if n == 0 {
                break;
            }
            plainbuf.clear();
            engine.update(&inbuf[..n], &mut plainbuf);
            if let Some((_, d)) = checker.as_mut() {
                d.update(&plainbuf);
            }
            dst.write_all(&plainbuf).await?;
        }
        plainbuf.clear();
        engine.finish(&mut plainbuf)?;
        if let Some((_, d)) = checker.as_mut() {
            d.update(&plainbuf);
        }
        dst.write_all(&plainbuf).await?;

        if let Some((tag, digester)) = checker {
            self.verify_tag(&digester.finalize(), &tag)?;
        }
        dst.flush().await?;
        Ok(())
    }

    async fn resolve_decrypt_key_async<R>(&mut self, src: &mut R) -> CoffreResult<KeyMaterial>
    where
        R: AsyncRead + Unpin,
    {
        match &mut self.source {
            KeySource::Protected { managed, provider } => {
                Ok(managed.ensure_async(provider).await?.clone())
            }
            KeySource::Light { key } => Ok(key.clone()),
            KeySource::Enclosed { provider } => {
                let wrapped = wire::read_field_async(src, "wrapped symmetric key").await?;
                let clear = provider.unwrap(&wrapped)?;
                check_unwrapped_key_len(clear.len(), self.algorithm)?;
                Ok(KeyMaterial::from_bytes(clear.to_vec()))
            }
        }
    }
}

fn check_options(options: &CipherOptions) -> CoffreResult<()> {
    if options.armor && !matches!(options.integrity, IntegrityMode::None) {
        return Err(CoffreError::invalid_operation(
            "base64 armor cannot seek back over the tag; drop armor or the integrity mode",
        ));
    }
    Ok(())
}

fn check_unwrapped_key_len(len: usize, algorithm: SymmetricAlgorithm) -> CoffreResult<()> {
    if len != algorithm.key_len() {
        return Err(CoffreError::invalid_package(
            "wrapped symmetric key",
            format!("unwrapped to {len} bytes, expected {}", algorithm.key_len()),
        ));
    }
    Ok(())
}

fn constant_time_check(digest: &[u8], tag: &[u8]) -> CoffreResult<()> {
    if bool::from(digest.ct_eq(tag)) {
        Ok(())
    } else {
        Err(CoffreError::IntegrityFailure("plaintext hash mismatch"))
    }
}

/// `Read::read` with the conventional retry on `Interrupted`.
fn read_step<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match src.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

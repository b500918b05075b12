//! RSA key pairs: wrapping symmetric keys, signing digests, PEM import/export.
//!
//! Key wrapping uses RSA-OAEP with SHA-256. Signing uses PKCS#1 v1.5 over an
//! externally computed digest; the provider's hash hint says which digest the
//! signature binds, so signer and verifier agree without negotiation.
//!
//! A provider built from a public key alone can wrap and verify but not
//! unwrap or sign; those fail with [`CoffreError::KeyUnavailable`].

use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use rsa::signature::SignatureEncoding;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use coffre_core::{CoffreError, CoffreResult, HashAlgorithm};

/// Default modulus size for generated key pairs.
pub const DEFAULT_KEY_BITS: usize = 2048;

pub struct KeyPairProvider {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
    hash: HashAlgorithm,
}

impl KeyPairProvider {
    /// Generates a fresh key pair. Expensive; do it once and keep the
    /// provider shared.
    pub fn generate(bits: usize, hash: HashAlgorithm) -> CoffreResult<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| CoffreError::crypto(format!("RSA key generation: {e}")))?;
        Ok(Self::from_private(private, hash))
    }

    pub fn from_private(private: RsaPrivateKey, hash: HashAlgorithm) -> Self {
        Self {
            public: private.to_public_key(),
            private: Some(private),
            hash,
        }
    }

    pub fn from_public(public: RsaPublicKey, hash: HashAlgorithm) -> Self {
        Self {
            public,
            private: None,
            hash,
        }
    }

    pub fn private_from_pem(pem: &str, hash: HashAlgorithm) -> CoffreResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CoffreError::crypto(format!("PEM private key parse: {e}")))?;
        Ok(Self::from_private(private, hash))
    }

    pub fn public_from_pem(pem: &str, hash: HashAlgorithm) -> CoffreResult<Self> {
        let public = RsaPublicKey::from_public_key_pem(pem)
            .map_err(|e| CoffreError::crypto(format!("PEM public key parse: {e}")))?;
        Ok(Self::from_public(public, hash))
    }

    pub fn private_to_pem(&self) -> CoffreResult<Zeroizing<String>> {
        match &self.private {
            Some(private) => private
                .to_pkcs8_pem(LineEnding::LF)
                .map_err(|e| CoffreError::crypto(format!("PEM private key encode: {e}"))),
            None => Err(CoffreError::KeyUnavailable("private key export")),
        }
    }

    pub fn public_to_pem(&self) -> CoffreResult<String> {
        self.public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CoffreError::crypto(format!("PEM public key encode: {e}")))
    }

    pub fn has_private(&self) -> bool {
        self.private.is_some()
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    /// Modulus size in bytes. Wrapped values and signatures are exactly this
    /// long.
    pub fn key_size(&self) -> usize {
        self.public.size()
    }

    /// Encrypts a small secret (a symmetric key, an IV, a digest) to this key
    /// pair. Needs only the public half.
    pub fn wrap(&self, clear: &[u8]) -> CoffreResult<Vec<u8>> {
        self.public
            .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), clear)
            .map_err(|e| CoffreError::crypto(format!("key wrap: {e}")))
    }

    pub fn unwrap(&self, wrapped: &[u8]) -> CoffreResult<Zeroizing<Vec<u8>>> {
        let private = self
            .private
            .as_ref()
            .ok_or(CoffreError::KeyUnavailable("unwrapping"))?;
        private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map(Zeroizing::new)
            .map_err(|_| {
                CoffreError::crypto("key unwrap failed (wrong key pair or corrupted blob)")
            })
    }

    /// Signs a digest computed with this provider's hash hint.
    pub fn sign_digest(&self, digest: &[u8]) -> CoffreResult<Vec<u8>> {
        let private = self
            .private
            .as_ref()
            .ok_or(CoffreError::KeyUnavailable("signing"))?;
        let signature = match self.hash {
            HashAlgorithm::Sha256 => SigningKey::<Sha256>::new(private.clone()).sign_prehash(digest),
            HashAlgorithm::Sha384 => SigningKey::<Sha384>::new(private.clone()).sign_prehash(digest),
            HashAlgorithm::Sha512 => SigningKey::<Sha512>::new(private.clone()).sign_prehash(digest),
        }
        .map_err(|e| CoffreError::crypto(format!("digest signing: {e}")))?;
        Ok(signature.to_vec())
    }

    /// Verifies a signature produced by [`Self::sign_digest`]. Needs only the
    /// public half.
    pub fn verify_digest(&self, digest: &[u8], signature: &[u8]) -> CoffreResult<()> {
        let signature = Signature::try_from(signature)
            .map_err(|_| CoffreError::IntegrityFailure("signature is malformed"))?;
        let result = match self.hash {
            HashAlgorithm::Sha256 => {
                VerifyingKey::<Sha256>::new(self.public.clone()).verify_prehash(digest, &signature)
            }
            HashAlgorithm::Sha384 => {
                VerifyingKey::<Sha384>::new(self.public.clone()).verify_prehash(digest, &signature)
            }
            HashAlgorithm::Sha512 => {
                VerifyingKey::<Sha512>::new(self.public.clone()).verify_prehash(digest, &signature)
            }
        };
        result.map_err(|_| CoffreError::IntegrityFailure("signature does not match digest"))
    }
}

impl std::fmt::Debug for KeyPairProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairProvider")
            .field("bits", &(self.public.size() * 8))
            .field("private", &self.private.is_some())
            .field("hash", &self.hash)
            .finish()
    }
}

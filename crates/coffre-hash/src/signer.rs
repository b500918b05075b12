//! RSA signing over the salted-digest scheme.
//!
//! Package layout `salt ‖ signature`: the digest of `salt ‖ data` is signed
//! (PKCS#1 v1.5) instead of stored. Signing needs the private half of the
//! pair; verification runs against the public half alone, so the package is
//! checkable by parties who could never have produced it.

use std::io::Read;
use std::sync::Arc;
use tokio::io::AsyncRead;

use coffre_core::{CoffreError, CoffreResult};
use coffre_keys::KeyPairProvider;

use crate::hasher::{check_salt_len, digest_stream, digest_stream_async, flatten_verify, random_salt};
use crate::MIN_SALT_LEN;

#[derive(Debug, Clone)]
pub struct RsaSigner {
    provider: Arc<KeyPairProvider>,
    salt_len: usize,
}

impl RsaSigner {
    /// The pair's hash-algorithm hint picks the digest.
    pub fn new(provider: Arc<KeyPairProvider>) -> Self {
        Self {
            provider,
            salt_len: MIN_SALT_LEN,
        }
    }

    pub fn with_salt_len(mut self, salt_len: usize) -> CoffreResult<Self> {
        check_salt_len(salt_len)?;
        self.salt_len = salt_len;
        Ok(self)
    }

    /// Signature length in bytes (the RSA modulus size).
    pub fn signature_len(&self) -> usize {
        self.provider.key_size()
    }

    /// Signing and verification exercise the pair on every call, so a signer
    /// can never shed it.
    pub fn release_key_pair(&mut self) -> CoffreResult<()> {
        Err(CoffreError::invalid_operation(
            "signing needs the key pair at use-time",
        ))
    }

    pub fn light_clone(&self) -> CoffreResult<Self> {
        Err(CoffreError::invalid_operation(
            "signing needs the key pair at use-time",
        ))
    }

    pub fn sign(&self, data: &[u8]) -> CoffreResult<Vec<u8>> {
        self.sign_stream(data)
    }

    pub fn sign_stream<R: Read>(&self, src: R) -> CoffreResult<Vec<u8>> {
        let mut package = random_salt(self.salt_len);
        let digest = digest_stream(self.provider.hash_algorithm(), &package, src)?;
        let signature = self.provider.sign_digest(&digest)?;
        package.extend_from_slice(&signature);
        Ok(package)
    }

    pub async fn sign_stream_async<R>(&self, src: R) -> CoffreResult<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let mut package = random_salt(self.salt_len);
        let digest = digest_stream_async(self.provider.hash_algorithm(), &package, src).await?;
        let signature = self.provider.sign_digest(&digest)?;
        package.extend_from_slice(&signature);
        Ok(package)
    }

    pub fn verify(&self, data: &[u8], package: &[u8]) -> CoffreResult<()> {
        self.verify_stream(data, package)
    }

    pub fn verify_stream<R: Read>(&self, src: R, package: &[u8]) -> CoffreResult<()> {
        let (salt, signature) = self.split_package(package)?;
        let digest = digest_stream(self.provider.hash_algorithm(), salt, src)?;
        self.provider.verify_digest(&digest, signature)
    }

    pub async fn verify_stream_async<R>(&self, src: R, package: &[u8]) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let (salt, signature) = self.split_package(package)?;
        let digest = digest_stream_async(self.provider.hash_algorithm(), salt, src).await?;
        self.provider.verify_digest(&digest, signature)
    }

    pub fn try_verify(&self, data: &[u8], package: &[u8]) -> CoffreResult<bool> {
        flatten_verify(self.verify(data, package))
    }

    pub fn try_verify_stream<R: Read>(&self, src: R, package: &[u8]) -> CoffreResult<bool> {
        flatten_verify(self.verify_stream(src, package))
    }

    pub async fn try_verify_stream_async<R>(&self, src: R, package: &[u8]) -> CoffreResult<bool>
    where
        R: AsyncRead + Unpin,
    {
        flatten_verify(self.verify_stream_async(src, package).await)
    }

    fn split_package<'a>(&self, package: &'a [u8]) -> CoffreResult<(&'a [u8], &'a [u8])> {
        let signature_len = self.signature_len();
        if package.len() < signature_len {
            return Err(CoffreError::invalid_package(
                "signature package",
                format!(
                    "{} bytes cannot hold a {signature_len} byte signature",
                    package.len()
                ),
            ));
        }
        Ok(package.split_at(package.len() - signature_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coffre_core::HashAlgorithm;

    fn test_pair() -> Arc<KeyPairProvider> {
        Arc::new(KeyPairProvider::generate(1024, HashAlgorithm::Sha256).unwrap())
    }

    #[test]
    fn test_sign_layout_and_verify() {
        let pair = test_pair();
        let signer = RsaSigner::new(pair.clone());
        let package = signer.sign(b"signed data").unwrap();
        assert_eq!(package.len(), 8 + pair.key_size());
        signer.verify(b"signed data", &package).unwrap();
        assert!(!signer.try_verify(b"other data", &package).unwrap());
    }

    #[test]
    fn test_verification_needs_only_public_half() {
        let pair = test_pair();
        let signer = RsaSigner::new(pair.clone());
        let package = signer.sign(b"public check").unwrap();

        let public_only = Arc::new(
            KeyPairProvider::public_from_pem(&pair.public_to_pem().unwrap(), HashAlgorithm::Sha256)
                .unwrap(),
        );
        let verifier = RsaSigner::new(public_only);
        verifier.verify(b"public check", &package).unwrap();

        // But the public half cannot sign.
        let err = verifier.sign(b"no can do").unwrap_err();
        assert!(matches!(err, CoffreError::KeyUnavailable(_)), "{err}");
    }

    #[test]
    fn test_wrong_signer_rejected() {
        let signer = RsaSigner::new(test_pair());
        let impostor = RsaSigner::new(test_pair());
        let package = impostor.sign(b"claimed authentic").unwrap();
        let err = signer.verify(b"claimed authentic", &package).unwrap_err();
        assert!(matches!(err, CoffreError::IntegrityFailure(_)), "{err}");
        assert!(!signer.try_verify(b"claimed authentic", &package).unwrap());
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let signer = RsaSigner::new(test_pair());
        let mut package = signer.sign(b"immutable").unwrap();
        let last = package.len() - 1;
        package[last] ^= 0x01;
        assert!(!signer.try_verify(b"immutable", &package).unwrap());
    }

    #[test]
    fn test_undersized_package_rejected() {
        let signer = RsaSigner::new(test_pair());
        let err = signer.verify(b"x", &[0u8; 32]).unwrap_err();
        assert!(matches!(err, CoffreError::InvalidPackage { .. }), "{err}");
    }

    #[test]
    fn test_signer_cannot_go_light() {
        let mut signer = RsaSigner::new(test_pair());
        assert!(matches!(
            signer.release_key_pair().unwrap_err(),
            CoffreError::InvalidOperation(_)
        ));
        assert!(matches!(
            signer.light_clone().unwrap_err(),
            CoffreError::InvalidOperation(_)
        ));
    }

    #[test]
    fn test_unsalted_signing() {
        let pair = test_pair();
        let signer = RsaSigner::new(pair.clone()).with_salt_len(0).unwrap();
        let package = signer.sign(b"bare").unwrap();
        assert_eq!(package.len(), pair.key_size());
        signer.verify(b"bare", &package).unwrap();
    }

    #[test]
    fn test_salt_length_portability() {
        let pair = test_pair();
        let fat = RsaSigner::new(pair.clone()).with_salt_len(32).unwrap();
        let package = fat.sign(b"any salt verifies").unwrap();
        RsaSigner::new(pair).verify(b"any salt verifies", &package).unwrap();
    }

    #[tokio::test]
    async fn test_async_matches_sync() {
        let signer = RsaSigner::new(test_pair());
        let data = vec![0x44u8; 12_000];
        let package = signer.sign_stream_async(&data[..]).await.unwrap();
        signer.verify(&data, &package).unwrap();
        signer
            .verify_stream_async(&data[..], &package)
            .await
            .unwrap();
        assert!(!signer
            .try_verify_stream_async(&b"changed"[..], &package)
            .await
            .unwrap());
    }
}

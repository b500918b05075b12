//! Salted digests.
//!
//! A hash package is `salt ‖ digest`. The digest covers `salt ‖ data`, so
//! equal inputs hash differently run to run. Verification never consults the
//! verifier's own salt length: it is re-derived from the package length,
//! which keeps packages portable across differently configured hashers.

use rand::RngCore;
use std::io::{self, Read};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt};

use coffre_core::{CoffreError, CoffreResult, Digester, HashAlgorithm};

use crate::MIN_SALT_LEN;

const COPY_BUF: usize = 8192;

#[derive(Debug, Clone)]
pub struct Hasher {
    algorithm: HashAlgorithm,
    salt_len: usize,
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}

impl Hasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            algorithm,
            salt_len: MIN_SALT_LEN,
        }
    }

    /// Zero disables salting; anything else must be at least
    /// [`MIN_SALT_LEN`] bytes.
    pub fn with_salt_len(mut self, salt_len: usize) -> CoffreResult<Self> {
        check_salt_len(salt_len)?;
        self.salt_len = salt_len;
        Ok(self)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn hash(&self, data: &[u8]) -> CoffreResult<Vec<u8>> {
        self.hash_stream(data)
    }

    pub fn hash_stream<R: Read>(&self, src: R) -> CoffreResult<Vec<u8>> {
        let mut package = random_salt(self.salt_len);
        let digest = digest_stream(self.algorithm, &package, src)?;
        package.extend_from_slice(&digest);
        Ok(package)
    }

    pub async fn hash_stream_async<R>(&self, src: R) -> CoffreResult<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let mut package = random_salt(self.salt_len);
        let digest = digest_stream_async(self.algorithm, &package, src).await?;
        package.extend_from_slice(&digest);
        Ok(package)
    }

    pub fn verify(&self, data: &[u8], package: &[u8]) -> CoffreResult<()> {
        self.verify_stream(data, package)
    }

    pub fn verify_stream<R: Read>(&self, src: R, package: &[u8]) -> CoffreResult<()> {
        let (salt, expected) = split_package(package, self.algorithm.digest_len(), "hash")?;
        let digest = digest_stream(self.algorithm, salt, src)?;
        constant_time_check(&digest, expected, "hash mismatch")
    }

    pub async fn verify_stream_async<R>(&self, src: R, package: &[u8]) -> CoffreResult<()>
    where
        R: AsyncRead + Unpin,
    {
        let (salt, expected) = split_package(package, self.algorithm.digest_len(), "hash")?;
        let digest = digest_stream_async(self.algorithm, salt, src).await?;
        constant_time_check(&digest, expected, "hash mismatch")
    }

    /// `verify` flattened to a bool; malformed packages still error.
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
}

pub(crate) fn check_salt_len(salt_len: usize) -> CoffreResult<()> {
    if salt_len != 0 && salt_len < MIN_SALT_LEN {
        return Err(CoffreError::invalid_argument(
            "salt_len",
            format!("{salt_len} is below the {MIN_SALT_LEN} byte minimum (0 disables salting)"),
        ));
    }
    Ok(())
}

pub(crate) fn random_salt(len: usize) -> Vec<u8> {
    let mut salt = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Splits `salt ‖ tag` on the fixed tag length at the end.
pub(crate) fn split_package<'a>(
    package: &'a [u8],
    tag_len: usize,
    kind: &'static str,
) -> CoffreResult<(&'a [u8], &'a [u8])> {
    if package.len() < tag_len {
        return Err(CoffreError::invalid_package(
            "hash package",
            format!(
                "{} bytes cannot hold a {tag_len} byte {kind} tag",
                package.len()
            ),
        ));
    }
    Ok(package.split_at(package.len() - tag_len))
}

pub(crate) fn constant_time_check(
    computed: &[u8],
    expected: &[u8],
    what: &'static str,
) -> CoffreResult<()> {
    if bool::from(computed.ct_eq(expected)) {
        Ok(())
    } else {
        Err(CoffreError::IntegrityFailure(what))
    }
}

pub(crate) fn flatten_verify(outcome: CoffreResult<()>) -> CoffreResult<bool> {
    match outcome {
        Ok(()) => Ok(true),
        Err(CoffreError::IntegrityFailure(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

pub(crate) fn digest_stream<R: Read>(
    algorithm: HashAlgorithm,
    salt: &[u8],
    mut src: R,
) -> CoffreResult<Vec<u8>> {
    let mut digester = Digester::new(algorithm);
    digester.update(salt);
    let mut buf = [0u8; COPY_BUF];
    loop {
        let n = match src.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break;
        }
        digester.update(&buf[..n]);
    }
    Ok(digester.finalize())
}

pub(crate) async fn digest_stream_async<R>(
    algorithm: HashAlgorithm,
    salt: &[u8],
    mut src: R,
) -> CoffreResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut digester = Digester::new(algorithm);
    digester.update(salt);
    let mut buf = [0u8; COPY_BUF];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        digester.update(&buf[..n]);
    }
    Ok(digester.finalize())
}

//! Password hashing (PBKDF2-HMAC-SHA256).
//!
//! The package records everything verification needs:
//!
//! ```text
//! [iterations: i32][salt len: i32][salt][hash len: i32][hash]
//! ```
//!
//! All integers little-endian. A verifier recomputes with the *parsed*
//! parameters and ignores its own settings, so packages survive any later
//! retuning of defaults. Password packages always carry a salt.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use coffre_core::{CoffreError, CoffreResult};

use crate::hasher::random_salt;
use crate::MIN_SALT_LEN;

pub const DEFAULT_ITERATIONS: u32 = 100_000;
pub const DEFAULT_HASH_LEN: usize = 32;
pub const DEFAULT_SALT_LEN: usize = 16;

/// Parsed-length sanity cap; a real package is tens of bytes.
const MAX_PART_LEN: usize = 1 << 20;

#[derive(Debug, Clone)]
pub struct PasswordHasher {
    iterations: u32,
    hash_len: usize,
    salt_len: usize,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            hash_len: DEFAULT_HASH_LEN,
            salt_len: DEFAULT_SALT_LEN,
        }
    }
}

impl PasswordHasher {
    pub fn new(iterations: u32, hash_len: usize, salt_len: usize) -> CoffreResult<Self> {
        if iterations == 0 {
            return Err(CoffreError::invalid_argument(
                "iterations",
                "must be positive",
            ));
        }
        if iterations > i32::MAX as u32 {
            return Err(CoffreError::invalid_argument(
                "iterations",
                format!("{iterations} does not fit the package's signed counter"),
            ));
        }
        if hash_len == 0 {
            return Err(CoffreError::invalid_argument("hash_len", "must be positive"));
        }
        if salt_len < MIN_SALT_LEN {
            return Err(CoffreError::invalid_argument(
                "salt_len",
                format!("{salt_len} is below the {MIN_SALT_LEN} byte minimum"),
            ));
        }
        Ok(Self {
            iterations,
            hash_len,
            salt_len,
        })
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn hash(&self, password: &[u8]) -> CoffreResult<Vec<u8>> {
        let salt = random_salt(self.salt_len);
        let mut derived = vec![0u8; self.hash_len];
        pbkdf2_hmac::<Sha256>(password, &salt, self.iterations, &mut derived);

        let mut package =
            Vec::with_capacity(4 + 4 + self.salt_len + 4 + self.hash_len);
        package.extend_from_slice(&(self.iterations as i32).to_le_bytes());
        package.extend_from_slice(&(self.salt_len as i32).to_le_bytes());
        package.extend_from_slice(&salt);
        package.extend_from_slice(&(self.hash_len as i32).to_le_bytes());
        package.extend_from_slice(&derived);
        Ok(package)
    }

    pub fn verify(&self, password: &[u8], package: &[u8]) -> CoffreResult<()> {
        let parsed = parse_package(package)?;
        let mut derived = vec![0u8; parsed.hash.len()];
        pbkdf2_hmac::<Sha256>(password, parsed.salt, parsed.iterations, &mut derived);
        if bool::from(derived.ct_eq(parsed.hash)) {
            Ok(())
        } else {
            Err(CoffreError::IntegrityFailure("password hash mismatch"))
        }
    }

    pub fn try_verify(&self, password: &[u8], package: &[u8]) -> CoffreResult<bool> {
        match self.verify(password, package) {
            Ok(()) => Ok(true),
            Err(CoffreError::IntegrityFailure(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

struct ParsedPackage<'a> {
    iterations: u32,
    salt: &'a [u8],
    hash: &'a [u8],
}

fn parse_package(package: &[u8]) -> CoffreResult<ParsedPackage<'_>> {
    let mut rest = package;
    let iterations = take_int(&mut rest)?;
    if iterations <= 0 {
        return Err(CoffreError::invalid_package(
            "password package",
            format!("non-positive iteration count {iterations}"),
        ));
    }
    let salt_len = take_len(&mut rest, "salt")?;
    let salt = take_bytes(&mut rest, salt_len)?;
    let hash_len = take_len(&mut rest, "hash")?;
    if hash_len == 0 {
        return Err(CoffreError::invalid_package(
            "password package",
            "zero-length hash",
        ));
    }
    let hash = take_bytes(&mut rest, hash_len)?;
    if !rest.is_empty() {
        return Err(CoffreError::invalid_package(
            "password package",
            format!("{} trailing bytes", rest.len()),
        ));
    }
    Ok(ParsedPackage {
        iterations: iterations as u32,
        salt,
        hash,
    })
}

fn take_int(rest: &mut &[u8]) -> CoffreResult<i32> {
    if rest.len() < 4 {
        return Err(CoffreError::invalid_package(
            "password package",
            "stream ended mid-field",
        ));
    }
    let (head, tail) = rest.split_at(4);
    *rest = tail;
    let mut raw = [0u8; 4];
    raw.copy_from_slice(head);
    Ok(i32::from_le_bytes(raw))
}

fn take_len(rest: &mut &[u8], what: &str) -> CoffreResult<usize> {
    let value = take_int(rest)?;
    if value < 0 || value as usize > MAX_PART_LEN {
        return Err(CoffreError::invalid_package(
            "password package",
            format!("{what} length {value} out of range"),
        ));
    }
    Ok(value as usize)
}

fn take_bytes<'a>(rest: &mut &'a [u8], len: usize) -> CoffreResult<&'a [u8]> {
    if rest.len() < len {
        return Err(CoffreError::invalid_package(
            "password package",
            "stream ended mid-field",
        ));
    }
    let (head, tail) = rest.split_at(len);
    *rest = tail;
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_shape() {
        let hasher = PasswordHasher::new(10_000, 32, 16).unwrap();
        let package = hasher.hash(b"hunter2").unwrap();
        assert_eq!(package.len(), 60);
        assert_eq!(&package[..4], &10_000i32.to_le_bytes());
        assert_eq!(&package[4..8], &16i32.to_le_bytes());
        assert_eq!(&package[24..28], &32i32.to_le_bytes());
    }

    #[test]
    fn test_verify_right_and_wrong_password() {
        let hasher = PasswordHasher::new(10_000, 32, 16).unwrap();
        let package = hasher.hash(b"hunter2").unwrap();
        assert!(hasher.try_verify(b"hunter2", &package).unwrap());
        assert!(!hasher.try_verify(b"hunter3", &package).unwrap());
        let err = hasher.verify(b"hunter3", &package).unwrap_err();
        assert!(matches!(err, CoffreError::IntegrityFailure(_)), "{err}");
    }

    #[test]
    fn test_salting_differs_per_hash() {
        let hasher = PasswordHasher::default();
        let a = hasher.hash(b"same password").unwrap();
        let b = hasher.hash(b"same password").unwrap();
        assert_ne!(a, b);
        hasher.verify(b"same password", &a).unwrap();
        hasher.verify(b"same password", &b).unwrap();
    }

    #[test]
    fn test_verification_uses_parsed_parameters() {
        // Hash with one configuration, verify with a totally different one.
        let strong = PasswordHasher::new(20_000, 48, 24).unwrap();
        let package = strong.hash(b"portable").unwrap();
        assert_eq!(package.len(), 4 + 4 + 24 + 4 + 48);

        let weak = PasswordHasher::new(1, 1, MIN_SALT_LEN).unwrap();
        weak.verify(b"portable", &package).unwrap();
        assert!(!weak.try_verify(b"not it", &package).unwrap());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(PasswordHasher::new(0, 32, 16).is_err());
        assert!(PasswordHasher::new(10_000, 0, 16).is_err());
        assert!(PasswordHasher::new(10_000, 32, 4).is_err());
        assert!(PasswordHasher::new(i32::MAX as u32 + 1, 32, 16).is_err());
        // Boundary values are fine.
        PasswordHasher::new(1, 1, MIN_SALT_LEN).unwrap();
        PasswordHasher::new(i32::MAX as u32, 32, 16).unwrap();
    }

    #[test]
    fn test_malformed_packages_rejected() {
        let hasher = PasswordHasher::default();
        let package = hasher.hash(b"secret").unwrap();

        // Truncated anywhere.
        for cut in [0, 3, 7, 20, package.len() - 1] {
            let err = hasher.verify(b"secret", &package[..cut]).unwrap_err();
            assert!(matches!(err, CoffreError::InvalidPackage { .. }), "cut {cut}: {err}");
        }

        // Trailing junk.
        let mut padded = package.clone();
        padded.push(0);
        assert!(matches!(
            hasher.verify(b"secret", &padded).unwrap_err(),
            CoffreError::InvalidPackage { .. }
        ));

        // Negative iteration count.
        let mut negative = package.clone();
        negative[..4].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(matches!(
            hasher.verify(b"secret", &negative).unwrap_err(),
            CoffreError::InvalidPackage { .. }
        ));

        // Absurd salt length.
        let mut oversized = package;
        oversized[4..8].copy_from_slice(&(i32::MAX).to_le_bytes());
        assert!(matches!(
            hasher.verify(b"secret", &oversized).unwrap_err(),
            CoffreError::InvalidPackage { .. }
        ));
    }

    #[test]
    fn test_binary_passwords() {
        let hasher = PasswordHasher::new(1_000, 32, 16).unwrap();
        let password: Vec<u8> = (0u8..=255).collect();
        let package = hasher.hash(&password).unwrap();
        assert!(hasher.try_verify(&password, &package).unwrap());
        assert!(!hasher.try_verify(&password[..255], &package).unwrap());
    }
}

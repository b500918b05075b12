//! Seed-name to storage-location strategies.

/// Location used when no seed name is given.
pub const DEFAULT_KEY_NAME: &str = "coffre.key";

const KEY_SUFFIX: &str = ".key";

/// Maps a caller-chosen seed name to the flat location a wrapped key blob is
/// stored under.
pub trait KeyLocationStrategy: Send + Sync {
    fn resolve(&self, seed: &str) -> String;
}

/// Uses the seed as the location, normalizing the `.key` suffix. An empty
/// seed means the shared default key.
pub struct DefaultKeyLocation;

impl KeyLocationStrategy for DefaultKeyLocation {
    fn resolve(&self, seed: &str) -> String {
        if seed.is_empty() {
            return DEFAULT_KEY_NAME.to_string();
        }
        if seed.ends_with(KEY_SUFFIX) {
            seed.to_string()
        } else {
            format!("{seed}{KEY_SUFFIX}")
        }
    }
}

/// Obscures seed names by storing under a truncated BLAKE3 hash. Arbitrary
/// labels (paths, user ids) become uniform flat names.
pub struct HashedKeyLocation;

impl KeyLocationStrategy for HashedKeyLocation {
    fn resolve(&self, seed: &str) -> String {
        let hash = blake3::hash(seed.as_bytes());
        let hex = hash.to_hex();
        format!("{}{KEY_SUFFIX}", &hex.as_str()[..32])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_location() {
        let strategy = DefaultKeyLocation;
        assert_eq!(strategy.resolve(""), "coffre.key");
        assert_eq!(strategy.resolve("backups"), "backups.key");
        assert_eq!(strategy.resolve("backups.key"), "backups.key");
    }

    #[test]
    fn test_hashed_location_is_deterministic() {
        let strategy = HashedKeyLocation;
        let a = strategy.resolve("some/label with spaces");
        let b = strategy.resolve("some/label with spaces");
        assert_eq!(a, b);
        assert_ne!(a, strategy.resolve("other label"));
    }

    #[test]
    fn test_hashed_location_is_flat() {
        let strategy = HashedKeyLocation;
        let loc = strategy.resolve("../../etc/passwd");
        assert!(loc.ends_with(".key"));
        assert!(!loc.contains('/'));
        assert_eq!(loc.len(), 32 + 4);
    }

    #[test]
    fn test_strategies_disagree_on_purpose() {
        let seed = "backups";
        assert_ne!(
            DefaultKeyLocation.resolve(seed),
            HashedKeyLocation.resolve(seed)
        );
    }
}

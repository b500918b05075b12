//! coffre: crypto-package toolkit CLI
//!
//! Commands:
//!   keygen                  - generate an RSA key pair (PKCS#8 PEM)
//!   encrypt <in> <out>      - seal a file into a crypto package
//!   decrypt <in> <out>      - open a crypto package back into plaintext
//!   hash <file>             - produce a hash package (hex on stdout)
//!   verify <file> <tag>     - check a file against a hash package
//!   password hash           - derive a PBKDF2 password package (base64)
//!   password verify <pkg>   - check a prompted password against a package
//!
//! Settings come from coffre.toml (see `CoffreConfig`); every flag below
//! overrides its config counterpart for the one invocation.

use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::{Args, Parser, Subcommand, ValueEnum};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use coffre_cipher::{
    ChunkedCipher, CipherOptions, IntegrityMode, IvPolicy, PackageCipher, XChaChaSealer,
    XCHACHA_KEY_LEN,
};
use coffre_core::{CoffreConfig, HashAlgorithm, IntegrityKind, KeyWrapMode, SymmetricAlgorithm};
use coffre_hash::{Hasher, KeyedHasher, PasswordHasher, RsaSigner};
use coffre_keys::{
    DefaultKeyLocation, FileKeyStorage, HashedKeyLocation, KeyLocationStrategy, KeyPairProvider,
    KeyStorage, ManagedKey, DEFAULT_KEY_BITS,
};

// ── CLI structure ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "coffre",
    version,
    about = "crypto-package toolkit",
    long_about = "coffre: encrypt, hash, and verify crypto packages with managed keys"
)]
struct Cli {
    /// Path to coffre.toml (a missing file means defaults)
    #[arg(
        long,
        short = 'c',
        env = "COFFRE_CONFIG",
        default_value = "~/.config/coffre/coffre.toml"
    )]
    config: PathBuf,

    /// Log more (-v info, -vv debug); RUST_LOG wins when set
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate an RSA key pair as PKCS#8 PEM files
    Keygen {
        /// Modulus size in bits
        #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
        bits: usize,

        /// Digest hint carried by the pair: sha256 | sha384 | sha512
        #[arg(long, value_parser = parse_hash, default_value = "sha256")]
        hash: HashAlgorithm,

        /// Private key destination
        #[arg(long, short = 'o', default_value = "coffre.pem")]
        out: PathBuf,

        /// Public key destination (default: <out> with a .pub.pem suffix)
        #[arg(long)]
        public_out: Option<PathBuf>,

        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Encrypt a file into a crypto package
    Encrypt {
        /// Plaintext input
        input: PathBuf,
        /// Package output
        output: PathBuf,
        #[command(flatten)]
        cipher: CipherArgs,
    },

    /// Decrypt a crypto package
    Decrypt {
        /// Package input
        input: PathBuf,
        /// Plaintext output
        output: PathBuf,
        #[command(flatten)]
        cipher: CipherArgs,
    },

    /// Hash a file into a hash package, printed as hex
    Hash {
        /// File to hash
        input: PathBuf,
        #[command(flatten)]
        hasher: HashArgs,
    },

    /// Verify a file against a hex hash package
    Verify {
        /// File to check
        input: PathBuf,
        /// Hash package as produced by `coffre hash`
        tag: String,
        #[command(flatten)]
        hasher: HashArgs,
    },

    /// Password hashing and verification (PBKDF2-HMAC-SHA256)
    Password {
        #[command(subcommand)]
        action: PasswordAction,
    },
}

#[derive(Args, Debug)]
struct CipherArgs {
    /// Key handling: protected | enclosed | chunked
    #[arg(long, short = 'm', value_enum)]
    mode: Option<CipherMode>,

    /// RSA key pair PEM (the public half suffices for enclosed encryption)
    #[arg(long, short = 'k', env = "COFFRE_KEY_PAIR")]
    key_pair: Option<PathBuf>,

    /// Directory for wrapped key blobs
    #[arg(long, env = "COFFRE_KEYS_DIR")]
    keys_dir: Option<PathBuf>,

    /// Name fed to the key-location strategy
    #[arg(long, short = 's')]
    seed: Option<String>,

    /// Integrity tag: none | hash | encrypted-hash | signature (enclosed mode)
    #[arg(long, value_enum)]
    integrity: Option<IntegrityArg>,

    /// Signing key pair PEM for `--integrity signature`
    #[arg(long)]
    signer: Option<PathBuf>,

    /// Wrap the per-package IV with the key pair
    #[arg(long)]
    wrap_iv: bool,

    /// Base64-armor the package
    #[arg(long, short = 'a')]
    armor: bool,

    /// Bulk cipher: aes128-cbc | aes256-cbc
    #[arg(long, value_parser = parse_symmetric)]
    algorithm: Option<SymmetricAlgorithm>,
}

#[derive(Args, Debug)]
struct HashArgs {
    /// Hash family: plain | keyed | signature
    #[arg(long, short = 'm', value_enum)]
    mode: Option<HashMode>,

    /// Digest: sha256 | sha384 | sha512
    #[arg(long, value_parser = parse_hash)]
    algorithm: Option<HashAlgorithm>,

    /// Salt bytes (0 disables salting)
    #[arg(long)]
    salt_len: Option<usize>,

    /// RSA key pair PEM (keyed and signature modes)
    #[arg(long, short = 'k', env = "COFFRE_KEY_PAIR")]
    key_pair: Option<PathBuf>,

    /// Directory for wrapped key blobs (keyed mode)
    #[arg(long, env = "COFFRE_KEYS_DIR")]
    keys_dir: Option<PathBuf>,

    /// Name fed to the key-location strategy (keyed mode)
    #[arg(long, short = 's')]
    seed: Option<String>,
}

#[derive(Subcommand, Debug)]
enum PasswordAction {
    /// Prompt for a password and print its package as base64
    Hash {
        /// PBKDF2 iteration count
        #[arg(long)]
        iterations: Option<u32>,
        /// Derived hash length in bytes
        #[arg(long)]
        hash_len: Option<usize>,
        /// Salt length in bytes
        #[arg(long)]
        salt_len: Option<usize>,
    },
    /// Prompt for a password and check it against a base64 package
    Verify {
        /// Package as produced by `coffre password hash`
        package: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum CipherMode {
    Protected,
    Enclosed,
    Chunked,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum IntegrityArg {
    None,
    Hash,
    EncryptedHash,
    Signature,
}

impl IntegrityArg {
    fn into_kind(self) -> IntegrityKind {
        match self {
            Self::None => IntegrityKind::None,
            Self::Hash => IntegrityKind::Hash,
            Self::EncryptedHash => IntegrityKind::EncryptedHash,
            Self::Signature => IntegrityKind::Signature,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum HashMode {
    Plain,
    Keyed,
    Signature,
}

fn parse_symmetric(s: &str) -> Result<SymmetricAlgorithm, String> {
    match s {
        "aes128-cbc" => Ok(SymmetricAlgorithm::Aes128Cbc),
        "aes256-cbc" => Ok(SymmetricAlgorithm::Aes256Cbc),
        other => Err(format!(
            "unknown cipher `{other}` (expected aes128-cbc or aes256-cbc)"
        )),
    }
}

fn parse_hash(s: &str) -> Result<HashAlgorithm, String> {
    match s {
        "sha256" => Ok(HashAlgorithm::Sha256),
        "sha384" => Ok(HashAlgorithm::Sha384),
        "sha512" => Ok(HashAlgorithm::Sha512),
        other => Err(format!(
            "unknown digest `{other}` (expected sha256, sha384, or sha512)"
        )),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = CoffreConfig::load(&expand_tilde(&cli.config))?;

    match cli.command {
        Commands::Keygen {
            bits,
            hash,
            out,
            public_out,
            force,
        } => cmd_keygen(bits, hash, &out, public_out.as_deref(), force),
        Commands::Encrypt {
            input,
            output,
            cipher,
        } => cmd_encrypt(&config, &cipher, &input, &output).await,
        Commands::Decrypt {
            input,
            output,
            cipher,
        } => cmd_decrypt(&config, &cipher, &input, &output).await,
        Commands::Hash { input, hasher } => cmd_hash(&config, &hasher, &input).await,
        Commands::Verify { input, tag, hasher } => {
            cmd_verify(&config, &hasher, &input, &tag).await
        }
        Commands::Password { action } => match action {
            PasswordAction::Hash {
                iterations,
                hash_len,
                salt_len,
            } => cmd_password_hash(&config, iterations, hash_len, salt_len),
            PasswordAction::Verify { package } => cmd_password_verify(&package),
        },
    }
}

fn init_logging(verbose: u8) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// ── Key generation ────────────────────────────────────────────────────────────

fn cmd_keygen(
    bits: usize,
    hash: HashAlgorithm,
    out: &Path,
    public_out: Option<&Path>,
    force: bool,
) -> Result<()> {
    let out = expand_tilde(out);
    let public_out = match public_out {
        Some(p) => expand_tilde(p),
        None => out.with_extension("pub.pem"),
    };

    tracing::info!(bits, "generating RSA key pair");
    let pair = KeyPairProvider::generate(bits, hash)?;

    let private_pem = pair.private_to_pem()?;
    write_new_file(&out, private_pem.as_bytes(), force)?;
    restrict_permissions(&out)?;
    write_new_file(&public_out, pair.public_to_pem()?.as_bytes(), force)?;

    println!("wrote {} and {}", out.display(), public_out.display());
    Ok(())
}

fn write_new_file(path: &Path, contents: &[u8], force: bool) -> Result<()> {
    if !force && path.exists() {
        bail!("refusing to overwrite {} (pass --force)", path.display());
    }
    std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("restricting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

// ── Encrypt / decrypt ─────────────────────────────────────────────────────────

async fn cmd_encrypt(
    config: &CoffreConfig,
    args: &CipherArgs,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let mut src = open_input(input).await?;
    let mut dst = create_output(output).await?;

    match effective_mode(args, config) {
        CipherMode::Chunked => {
            let cipher = build_chunked(args, config)?;
            cipher.encrypt_stream_async(&mut src, &mut dst).await?;
        }
        CipherMode::Protected => {
            let mut cipher = build_package_cipher(KeyWrapMode::Protected, args, config)?;
            cipher.encrypt_stream_async(&mut src, &mut dst).await?;
        }
        CipherMode::Enclosed => {
            let mut cipher = build_package_cipher(KeyWrapMode::Enclosed, args, config)?;
            cipher.encrypt_stream_async(&mut src, &mut dst).await?;
        }
    }

    println!("encrypted {} -> {}", input.display(), output.display());
    Ok(())
}

async fn cmd_decrypt(
    config: &CoffreConfig,
    args: &CipherArgs,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let mut src = open_input(input).await?;
    let mut dst = create_output(output).await?;

    match effective_mode(args, config) {
        CipherMode::Chunked => {
            let cipher = build_chunked(args, config)?;
            cipher.decrypt_stream_async(&mut src, &mut dst).await?;
        }
        CipherMode::Protected => {
            let mut cipher = build_package_cipher(KeyWrapMode::Protected, args, config)?;
            cipher.decrypt_stream_async(&mut src, &mut dst).await?;
        }
        CipherMode::Enclosed => {
            let mut cipher = build_package_cipher(KeyWrapMode::Enclosed, args, config)?;
            cipher.decrypt_stream_async(&mut src, &mut dst).await?;
        }
    }

    println!("decrypted {} -> {}", input.display(), output.display());
    Ok(())
}

fn effective_mode(args: &CipherArgs, config: &CoffreConfig) -> CipherMode {
    args.mode.unwrap_or(match config.cipher.key_wrap {
        KeyWrapMode::Protected => CipherMode::Protected,
        KeyWrapMode::Enclosed => CipherMode::Enclosed,
    })
}

fn build_package_cipher(
    mode: KeyWrapMode,
    args: &CipherArgs,
    config: &CoffreConfig,
) -> Result<PackageCipher> {
    let options = CipherOptions {
        algorithm: args.algorithm.unwrap_or(config.cipher.algorithm),
        iv_policy: if args.wrap_iv || config.cipher.wrap_iv {
            IvPolicy::Wrapped
        } else {
            IvPolicy::Clear
        },
        integrity: build_integrity(args, config)?,
        armor: args.armor || config.cipher.armor,
    };
    let provider = Arc::new(load_key_pair(args.key_pair.as_deref(), config.hash.algorithm)?);

    let cipher = match mode {
        KeyWrapMode::Protected => {
            let storage = key_storage(args.keys_dir.as_deref(), config);
            let strategy = location_strategy(config);
            let seed = effective_seed(args.seed.as_deref(), config);
            PackageCipher::protected_at(provider, storage, strategy.as_ref(), &seed, options)?
        }
        KeyWrapMode::Enclosed => PackageCipher::enclosed(provider, options)?,
    };
    Ok(cipher)
}

fn build_integrity(args: &CipherArgs, config: &CoffreConfig) -> Result<IntegrityMode> {
    let kind = args
        .integrity
        .map(IntegrityArg::into_kind)
        .unwrap_or(config.cipher.integrity);
    Ok(match kind {
        IntegrityKind::None => IntegrityMode::None,
        IntegrityKind::Hash => IntegrityMode::Hash { encrypt_tag: false },
        IntegrityKind::EncryptedHash => IntegrityMode::Hash { encrypt_tag: true },
        IntegrityKind::Signature => {
            let Some(signer_path) = args.signer.as_deref() else {
                bail!("--integrity signature needs --signer <PEM>");
            };
            let signer = load_key_pair_file(signer_path, config.hash.algorithm)?;
            IntegrityMode::Signature {
                signer: Arc::new(signer),
            }
        }
    })
}

fn build_chunked(args: &CipherArgs, config: &CoffreConfig) -> Result<ChunkedCipher<XChaChaSealer>> {
    let provider = load_key_pair(args.key_pair.as_deref(), config.hash.algorithm)?;
    let storage = key_storage(args.keys_dir.as_deref(), config);
    let strategy = location_strategy(config);
    let seed = effective_seed(args.seed.as_deref(), config);

    // The chunk key lives beside the cipher key under its own name.
    let location = strategy.resolve(&format!("{seed}-chunk"));
    let mut managed = ManagedKey::new(storage, location, XCHACHA_KEY_LEN);
    let key = managed.ensure(&provider)?.clone();

    let cipher = ChunkedCipher::new(XChaChaSealer::new(key)?)
        .with_block(config.cipher.chunk_block)?
        .with_armor(args.armor || config.cipher.armor);
    Ok(cipher)
}

// ── Hash / verify ─────────────────────────────────────────────────────────────

async fn cmd_hash(config: &CoffreConfig, args: &HashArgs, input: &Path) -> Result<()> {
    let mut src = open_input(input).await?;
    let package = match args.mode.unwrap_or(HashMode::Plain) {
        HashMode::Plain => build_hasher(args, config)?.hash_stream_async(&mut src).await?,
        HashMode::Keyed => {
            build_keyed(args, config)?
                .hash_stream_async(&mut src)
                .await?
        }
        HashMode::Signature => build_signer(args, config)?.sign_stream_async(&mut src).await?,
    };
    println!("{}", hex::encode(&package));
    Ok(())
}

async fn cmd_verify(
    config: &CoffreConfig,
    args: &HashArgs,
    input: &Path,
    tag: &str,
) -> Result<()> {
    let package = hex::decode(tag).map_err(|e| anyhow::anyhow!("bad tag: {e}"))?;
    let mut src = open_input(input).await?;
    match args.mode.unwrap_or(HashMode::Plain) {
        HashMode::Plain => {
            build_hasher(args, config)?
                .verify_stream_async(&mut src, &package)
                .await?
        }
        HashMode::Keyed => {
            build_keyed(args, config)?
                .verify_stream_async(&mut src, &package)
                .await?
        }
        HashMode::Signature => {
            build_signer(args, config)?
                .verify_stream_async(&mut src, &package)
                .await?
        }
    }
    println!("{}: verified", input.display());
    Ok(())
}

fn build_hasher(args: &HashArgs, config: &CoffreConfig) -> Result<Hasher> {
    let algorithm = args.algorithm.unwrap_or(config.hash.algorithm);
    let salt_len = args.salt_len.unwrap_or(config.hash.salt_len);
    Ok(Hasher::new(algorithm).with_salt_len(salt_len)?)
}

fn build_keyed(args: &HashArgs, config: &CoffreConfig) -> Result<KeyedHasher> {
    let provider = Arc::new(load_key_pair(args.key_pair.as_deref(), config.hash.algorithm)?);
    let storage = key_storage(args.keys_dir.as_deref(), config);
    let strategy = location_strategy(config);
    let seed = effective_seed(args.seed.as_deref(), config);
    let algorithm = args.algorithm.unwrap_or(config.hash.algorithm);

    let hasher = KeyedHasher::managed_at(
        provider,
        storage,
        strategy.as_ref(),
        &format!("{seed}-hmac"),
        algorithm,
    )
    .with_salt_len(args.salt_len.unwrap_or(config.hash.salt_len))?;
    Ok(hasher)
}

fn build_signer(args: &HashArgs, config: &CoffreConfig) -> Result<RsaSigner> {
    let provider = Arc::new(load_key_pair(
        args.key_pair.as_deref(),
        args.algorithm.unwrap_or(config.hash.algorithm),
    )?);
    Ok(RsaSigner::new(provider).with_salt_len(args.salt_len.unwrap_or(config.hash.salt_len))?)
}

// ── Password packages ─────────────────────────────────────────────────────────

fn cmd_password_hash(
    config: &CoffreConfig,
    iterations: Option<u32>,
    hash_len: Option<usize>,
    salt_len: Option<usize>,
) -> Result<()> {
    let hasher = PasswordHasher::new(
        iterations.unwrap_or(config.password.iterations),
        hash_len.unwrap_or(config.password.hash_len),
        salt_len.unwrap_or(config.password.salt_len),
    )?;

    let password = prompt_password("password: ")?;
    let confirm = prompt_password("confirm: ")?;
    if password.expose_secret() != confirm.expose_secret() {
        bail!("passwords do not match");
    }

    let package = hasher.hash(password.expose_secret().as_bytes())?;
    println!(
        "{}",
        base64::engine::general_purpose::STANDARD.encode(&package)
    );
    Ok(())
}

fn cmd_password_verify(package: &str) -> Result<()> {
    let package = base64::engine::general_purpose::STANDARD
        .decode(package)
        .context("package is not valid base64")?;
    let password = prompt_password("password: ")?;

    // Verification reads every parameter from the package itself.
    if PasswordHasher::default().try_verify(password.expose_secret().as_bytes(), &package)? {
        println!("password verified");
        Ok(())
    } else {
        bail!("password does not match");
    }
}

fn prompt_password(prompt: &str) -> Result<SecretString> {
    let raw = rpassword::prompt_password(prompt).context("reading password")?;
    Ok(SecretString::from(raw))
}

// ── Shared plumbing ───────────────────────────────────────────────────────────

async fn open_input(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))
}

async fn create_output(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))
}

fn load_key_pair(path: Option<&Path>, hash: HashAlgorithm) -> Result<KeyPairProvider> {
    let Some(path) = path else {
        bail!("--key-pair <PEM> is required for this operation");
    };
    load_key_pair_file(path, hash)
}

fn load_key_pair_file(path: &Path, hash: HashAlgorithm) -> Result<KeyPairProvider> {
    let path = expand_tilde(path);
    let pem = std::fs::read_to_string(&path)
        .with_context(|| format!("reading key pair: {}", path.display()))?;
    let pair = if pem.contains("PRIVATE KEY") {
        KeyPairProvider::private_from_pem(&pem, hash)?
    } else {
        KeyPairProvider::public_from_pem(&pem, hash)?
    };
    Ok(pair)
}

fn key_storage(dir: Option<&Path>, config: &CoffreConfig) -> Arc<dyn KeyStorage> {
    let dir = expand_tilde(dir.unwrap_or(&config.keys.dir));
    Arc::new(FileKeyStorage::new(dir))
}

fn location_strategy(config: &CoffreConfig) -> Box<dyn KeyLocationStrategy> {
    if config.keys.hashed_locations {
        Box::new(HashedKeyLocation)
    } else {
        Box::new(DefaultKeyLocation)
    }
}

fn effective_seed(flag: Option<&str>, config: &CoffreConfig) -> String {
    flag.unwrap_or(&config.keys.seed).to_string()
}

/// Expand `~` in path to the user's home directory
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(format!("{}/{}", home, &s[2..]))
    } else {
        path.to_path_buf()
    }
}

/// Hex encoding/decoding helpers (no external dep needed, just a small impl)
mod hex {
    pub fn encode(data: &[u8]) -> String {
        let mut s = String::with_capacity(data.len() * 2);
        for byte in data {
            s.push_str(&format!("{byte:02x}"));
        }
        s
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, String> {
        if s.len() % 2 != 0 {
            return Err("odd-length hex string".to_string());
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| format!("invalid hex: {e}")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let data = [0x00u8, 0x0f, 0xf0, 0xff, 0x12];
        let encoded = hex::encode(&data);
        assert_eq!(encoded, "000ff0ff12");
        assert_eq!(hex::decode(&encoded).unwrap(), data);
        assert!(hex::decode("abc").is_err());
        assert!(hex::decode("zz").is_err());
    }

    #[test]
    fn test_expand_tilde() {
        std::env::set_var("HOME", "/home/tester");
        assert_eq!(
            expand_tilde(Path::new("~/keys")),
            PathBuf::from("/home/tester/keys")
        );
        assert_eq!(expand_tilde(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_mode_and_integrity_flags() {
        let cli = Cli::parse_from([
            "coffre", "encrypt", "in.txt", "out.pkg", "--mode", "enclosed", "--integrity",
            "encrypted-hash", "--key-pair", "pair.pem",
        ]);
        let Commands::Encrypt { cipher, .. } = cli.command else {
            panic!("expected encrypt");
        };
        assert_eq!(cipher.mode, Some(CipherMode::Enclosed));
        assert!(matches!(cipher.integrity, Some(IntegrityArg::EncryptedHash)));
        assert_eq!(cipher.key_pair.as_deref(), Some(Path::new("pair.pem")));
    }

    #[test]
    fn test_config_flag_defaults() {
        let cli = Cli::parse_from(["coffre", "hash", "file.txt"]);
        assert_eq!(
            cli.config,
            PathBuf::from("~/.config/coffre/coffre.toml")
        );
        let Commands::Hash { hasher, .. } = cli.command else {
            panic!("expected hash");
        };
        assert!(hasher.mode.is_none());
    }

    #[tokio::test]
    async fn test_encrypt_decrypt_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pem = dir.path().join("pair.pem");
        let pair = KeyPairProvider::generate(1024, HashAlgorithm::Sha256).unwrap();
        std::fs::write(&pem, pair.private_to_pem().unwrap().as_bytes()).unwrap();

        let keys_dir = dir.path().join("keys");
        let input = dir.path().join("plain.bin");
        let package = dir.path().join("plain.pkg");
        let plain: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&input, &plain).unwrap();

        let config = CoffreConfig::default();
        let cli = Cli::parse_from([
            "coffre",
            "encrypt",
            input.to_str().unwrap(),
            package.to_str().unwrap(),
            "--mode",
            "protected",
            "--integrity",
            "hash",
            "--key-pair",
            pem.to_str().unwrap(),
            "--keys-dir",
            keys_dir.to_str().unwrap(),
            "--seed",
            "roundtrip",
        ]);
        let Commands::Encrypt {
            input: src,
            output: dst,
            cipher,
        } = cli.command
        else {
            panic!("expected encrypt");
        };
        cmd_encrypt(&config, &cipher, &src, &dst).await.unwrap();
        assert_ne!(std::fs::read(&package).unwrap(), plain);

        let output = dir.path().join("plain.out");
        let cli = Cli::parse_from([
            "coffre",
            "decrypt",
            package.to_str().unwrap(),
            output.to_str().unwrap(),
            "--mode",
            "protected",
            "--integrity",
            "hash",
            "--key-pair",
            pem.to_str().unwrap(),
            "--keys-dir",
            keys_dir.to_str().unwrap(),
            "--seed",
            "roundtrip",
        ]);
        let Commands::Decrypt {
            input: src,
            output: dst,
            cipher,
        } = cli.command
        else {
            panic!("expected decrypt");
        };
        cmd_decrypt(&config, &cipher, &src, &dst).await.unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), plain);
    }
}

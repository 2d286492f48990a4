//! Extension contract
//!
//! An extension is a script bundle addressed by URL. The executor only
//! needs a path to an entry script; how the bundle gets onto disk is the
//! resolver's business. [`LocalExtensionResolver`] handles `file://` URLs
//! and plain paths, verifies an optional checksum, and memoizes results
//! in a bounded LRU cache.

use super::cache::LruCache;
use crate::pipeline::ExtensionError;
use parking_lot::Mutex;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

/// Entry script looked up inside an extension directory
pub const ENTRY_SCRIPT: &str = "execute.sh";

/// Expected digest of an extension; the algorithm follows from its length
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Checksum {
    /// 40 hex characters
    Sha1(String),
    /// 64 hex characters
    Sha256(String),
    /// 128 hex characters
    Sha512(String),
}

impl Checksum {
    /// Parses a hex digest
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::InvalidChecksum`] unless `value` is 40, 64
    /// or 128 hex characters.
    pub fn parse(value: &str) -> Result<Self, ExtensionError> {
        let invalid = || ExtensionError::InvalidChecksum {
            checksum: value.to_string(),
        };
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let digest = value.to_ascii_lowercase();
        match digest.len() {
            40 => Ok(Self::Sha1(digest)),
            64 => Ok(Self::Sha256(digest)),
            128 => Ok(Self::Sha512(digest)),
            _ => Err(invalid()),
        }
    }

    /// Algorithm name
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Sha1(_) => "SHA-1",
            Self::Sha256(_) => "SHA-256",
            Self::Sha512(_) => "SHA-512",
        }
    }

    /// Expected digest, lowercase hex
    #[must_use]
    pub fn expected(&self) -> &str {
        match self {
            Self::Sha1(d) | Self::Sha256(d) | Self::Sha512(d) => d,
        }
    }

    /// Digest of `bytes` with this checksum's algorithm
    #[must_use]
    pub fn digest(&self, bytes: &[u8]) -> String {
        match self {
            Self::Sha1(_) => hex::encode(Sha1::digest(bytes)),
            Self::Sha256(_) => hex::encode(Sha256::digest(bytes)),
            Self::Sha512(_) => hex::encode(Sha512::digest(bytes)),
        }
    }

    /// Checks `bytes` against the expected digest
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError::ChecksumMismatch`] on mismatch.
    pub fn verify(&self, url: &str, bytes: &[u8]) -> Result<(), ExtensionError> {
        let actual = self.digest(bytes);
        if actual == self.expected() {
            Ok(())
        } else {
            Err(ExtensionError::ChecksumMismatch {
                url: url.to_string(),
                expected: self.expected().to_string(),
                actual,
            })
        }
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm(), self.expected())
    }
}

/// Splits resolved `--extension` arguments into URL and optional checksum
///
/// # Errors
///
/// Returns [`ExtensionError::InvalidDirective`] unless there are one or two
/// arguments, and [`ExtensionError::InvalidChecksum`] for a bad checksum.
pub fn parse_extension_arguments(
    arguments: &str,
) -> Result<(String, Option<Checksum>), ExtensionError> {
    let words = shell_words::split(arguments)
        .map_err(|e| ExtensionError::InvalidDirective(e.to_string()))?;
    match words.as_slice() {
        [url] => Ok((url.clone(), None)),
        [url, checksum] => Ok((url.clone(), Some(Checksum::parse(checksum)?))),
        _ => Err(ExtensionError::InvalidDirective(format!(
            "expected <url> [checksum], got '{arguments}'"
        ))),
    }
}

/// Turns an extension URL into an entry script path
pub trait ExtensionResolver: Send + Sync + fmt::Debug {
    /// Resolves `url`, relative paths against `base`
    ///
    /// # Errors
    ///
    /// Returns [`ExtensionError`] if the extension cannot be located or
    /// fails verification.
    fn resolve(
        &self,
        url: &str,
        checksum: Option<&Checksum>,
        base: &Path,
    ) -> Result<PathBuf, ExtensionError>;
}

/// Resolver for extensions already on the local filesystem
#[derive(Debug)]
pub struct LocalExtensionResolver {
    cache: Mutex<LruCache<String, PathBuf>>,
}

impl LocalExtensionResolver {
    /// Creates a resolver remembering at most `capacity` extensions
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Number of cached extensions
    #[must_use]
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    fn locate(url: &str, base: &Path) -> Result<PathBuf, ExtensionError> {
        match Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "file" => parsed
                .to_file_path()
                .map_err(|()| ExtensionError::InvalidDirective(format!("bad file URL '{url}'"))),
            Ok(parsed) => Err(ExtensionError::UnsupportedScheme {
                scheme: parsed.scheme().to_string(),
            }),
            Err(_) => Ok(base.join(url)),
        }
    }
}

impl Default for LocalExtensionResolver {
    fn default() -> Self {
        Self::new(32)
    }
}

impl ExtensionResolver for LocalExtensionResolver {
    fn resolve(
        &self,
        url: &str,
        checksum: Option<&Checksum>,
        base: &Path,
    ) -> Result<PathBuf, ExtensionError> {
        let key = format!(
            "{}|{url}|{}",
            base.display(),
            checksum.map(Checksum::expected).unwrap_or_default()
        );

        let cached = self.cache.lock().get(&key).filter(|s| s.is_file()).cloned();
        let script = if let Some(script) = cached {
            tracing::trace!(url = %url, script = %script.display(), "extension cache hit");
            script
        } else {
            let location = Self::locate(url, base)?;
            let script = if location.is_dir() {
                location.join(ENTRY_SCRIPT)
            } else {
                location
            };
            if !script.is_file() {
                return Err(ExtensionError::NotFound {
                    path: script.display().to_string(),
                });
            }
            script
        };

        // The file may have changed since it was cached.
        if let Some(checksum) = checksum {
            checksum.verify(url, &fs::read(&script)?)?;
            tracing::debug!(url = %url, algorithm = checksum.algorithm(), "extension checksum verified");
        }

        self.cache.lock().put(key, script.clone());
        Ok(script)
    }
}

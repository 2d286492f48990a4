//! IPC channel files
//!
//! Every command gets two fresh files in the temp directory and their
//! paths in its environment:
//!
//! - `PIPELINER_IPC_IN` holds the step's properties, for the command to read
//! - `PIPELINER_IPC_OUT` starts empty; whatever the command writes there is
//!   imported into the run-time properties once it exits with status 0
//!
//! ## Format
//!
//! One `KEY=BASE64(VALUE)` entry per line, keys sorted. Readers skip blank
//! lines and lines starting with `#`; a line without `=` is a key with an
//! empty value. Base64 keeps multi-line values on one line.
//!
//! ```text
//! # written by pipeliner
//! greeting=aGVsbG8gd29ybGQ=
//! step.flag=
//! ```
//!
//! ## Lifetime
//!
//! Files are created with mode `0600` and removed when their
//! [`ChannelFile`] is dropped. A [`ChannelRegistry`] remembers every file
//! still alive so a run can sweep them up on the way out.

use crate::pipeline::IpcError;
use crate::resolver::{PropertyMap, is_valid_property_key};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Variable naming the file the executor writes for the command
pub const ENV_IPC_IN: &str = "PIPELINER_IPC_IN";
/// Variable naming the file the command writes back
pub const ENV_IPC_OUT: &str = "PIPELINER_IPC_OUT";

const IN_PREFIX: &str = "pipeliner-ipc-in-";
const OUT_PREFIX: &str = "pipeliner-ipc-out-";

fn io_error(path: &Path, err: &std::io::Error) -> IpcError {
    IpcError::Io {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Channel files that have not been removed yet
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    paths: Mutex<HashSet<PathBuf>>,
}

impl ChannelRegistry {
    /// Creates an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live channel files
    #[must_use]
    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    /// Returns true if no channel file is alive
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    /// Deletes every registered file, returning how many were removed
    pub fn cleanup(&self) -> usize {
        let paths: Vec<PathBuf> = self.paths.lock().drain().collect();
        let removed = paths.iter().filter(|p| fs::remove_file(p).is_ok()).count();
        if removed > 0 {
            tracing::debug!(removed, "removed leftover IPC channel files");
        }
        removed
    }

    fn register(&self, path: &Path) {
        self.paths.lock().insert(path.to_path_buf());
    }

    fn forget(&self, path: &Path) {
        self.paths.lock().remove(path);
    }
}

impl Drop for ChannelRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// A channel file, deleted on drop
#[derive(Debug)]
pub struct ChannelFile {
    path: PathBuf,
    registry: Option<Arc<ChannelRegistry>>,
}

impl ChannelFile {
    /// Creates an empty, uniquely named file in `directory`
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::Io`] if the file cannot be created.
    pub fn create(
        directory: &Path,
        prefix: &str,
        registry: Option<&Arc<ChannelRegistry>>,
    ) -> Result<Self, IpcError> {
        let path = directory.join(format!("{prefix}{}", Uuid::new_v4()));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(&path).map_err(|e| io_error(&path, &e))?;

        if let Some(registry) = registry {
            registry.register(&path);
        }
        tracing::trace!(path = %path.display(), "created IPC channel file");
        Ok(Self {
            path,
            registry: registry.cloned(),
        })
    }

    /// Path of the file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file's contents with `properties`
    ///
    /// # Errors
    ///
    /// See [`write_file`].
    pub fn write(&self, properties: &PropertyMap) -> Result<(), IpcError> {
        write_file(&self.path, properties)
    }

    /// Reads the file's entries
    ///
    /// # Errors
    ///
    /// See [`read_file`].
    pub fn read(&self) -> Result<PropertyMap, IpcError> {
        read_file(&self.path)
    }
}

impl Drop for ChannelFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove IPC channel file");
        }
        if let Some(registry) = &self.registry {
            registry.forget(&self.path);
        }
    }
}

/// Creates an unregistered channel file in the system temp directory
///
/// # Errors
///
/// Returns [`IpcError::Io`] if the file cannot be created.
pub fn create_channel_file(prefix: &str) -> Result<ChannelFile, IpcError> {
    ChannelFile::create(&std::env::temp_dir(), prefix, None)
}

/// Serializes `properties` into `path`, keys sorted
///
/// # Errors
///
/// Returns [`IpcError::InvalidKey`] for a key outside the property key
/// grammar and [`IpcError::Io`] when writing fails.
pub fn write_file(path: &Path, properties: &PropertyMap) -> Result<(), IpcError> {
    let mut entries: Vec<(&String, &String)> = properties.iter().collect();
    entries.sort();

    let mut content = String::new();
    for (key, value) in entries {
        if !is_valid_property_key(key) {
            return Err(IpcError::InvalidKey { key: key.clone() });
        }
        content.push_str(key);
        content.push('=');
        content.push_str(&STANDARD.encode(value));
        content.push('\n');
    }

    fs::write(path, content).map_err(|e| io_error(path, &e))?;
    tracing::trace!(path = %path.display(), entries = properties.len(), "wrote IPC channel");
    Ok(())
}

/// Parses the entries in `path`
///
/// # Errors
///
/// Returns [`IpcError::InvalidKey`], [`IpcError::InvalidValue`] for bad
/// Base64 or non-UTF-8 values, and [`IpcError::Io`] when reading fails.
pub fn read_file(path: &Path) -> Result<PropertyMap, IpcError> {
    let content = fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
    let properties = parse(&content)?;
    tracing::trace!(path = %path.display(), entries = properties.len(), "read IPC channel");
    Ok(properties)
}

fn parse(content: &str) -> Result<PropertyMap, IpcError> {
    let mut properties = PropertyMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, encoded) = line.split_once('=').unwrap_or((line, ""));
        let key = key.trim();
        if !is_valid_property_key(key) {
            return Err(IpcError::InvalidKey {
                key: key.to_string(),
            });
        }

        let invalid = |reason: String| IpcError::InvalidValue {
            key: key.to_string(),
            reason,
        };
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| invalid(e.to_string()))?;
        let value = String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
        properties.insert(key.to_string(), value);
    }

    Ok(properties)
}

/// The pair of channel files handed to one command
#[derive(Debug)]
pub struct IpcChannel {
    /// Executor to command
    pub outbound: ChannelFile,
    /// Command to executor
    pub inbound: ChannelFile,
}

impl IpcChannel {
    /// Creates both files in `directory`
    ///
    /// # Errors
    ///
    /// Returns [`IpcError::Io`] if either file cannot be created.
    pub fn open(directory: &Path, registry: &Arc<ChannelRegistry>) -> Result<Self, IpcError> {
        Ok(Self {
            outbound: ChannelFile::create(directory, IN_PREFIX, Some(registry))?,
            inbound: ChannelFile::create(directory, OUT_PREFIX, Some(registry))?,
        })
    }

    /// Variables pointing the command at the channel files
    #[must_use]
    pub fn environment(&self) -> [(String, String); 2] {
        [
            (
                ENV_IPC_IN.to_string(),
                self.outbound.path().display().to_string(),
            ),
            (
                ENV_IPC_OUT.to_string(),
                self.inbound.path().display().to_string(),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_read_preserves_newlines() {
        let dir = TempDir::new().unwrap();
        let file = ChannelFile::create(dir.path(), IN_PREFIX, None).unwrap();
        let properties = PropertyMap::from([
            ("b".to_string(), "line one\nline two".to_string()),
            ("a.b".to_string(), String::new()),
        ]);

        file.write(&properties).unwrap();
        let content = fs::read_to_string(file.path()).unwrap();
        assert!(content.starts_with("a.b=\n"));
        assert_eq!(file.read().unwrap(), properties);
    }

    #[test]
    fn test_parse_skips_comments_and_accepts_bare_keys() {
        let parsed = parse("# header\n\nflag\nname=dmFsdWU=\r\n").unwrap();
        assert_eq!(parsed.get("flag").map(String::as_str), Some(""));
        assert_eq!(parsed.get("name").map(String::as_str), Some("value"));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert_eq!(
            parse("bad key=").unwrap_err(),
            IpcError::InvalidKey {
                key: "bad key".to_string()
            }
        );
        assert!(matches!(parse("k=@@@"), Err(IpcError::InvalidValue { .. })));
        assert!(matches!(
            write_file(Path::new("/unused"), &PropertyMap::from([("1x".to_string(), String::new())])),
            Err(IpcError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_file_removed_on_drop_and_registry_tracks() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ChannelRegistry::new());

        let channel = IpcChannel::open(dir.path(), &registry).unwrap();
        let paths = [channel.outbound.path().to_path_buf(), channel.inbound.path().to_path_buf()];
        assert_eq!(registry.len(), 2);
        assert!(paths.iter().all(|p| p.exists()));

        let environment = channel.environment();
        assert_eq!(environment[0].0, ENV_IPC_IN);
        assert!(environment[1].1.contains(OUT_PREFIX));

        drop(channel);
        assert!(registry.is_empty());
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_registry_cleanup_removes_leaked_files() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(ChannelRegistry::new());
        let file = ChannelFile::create(dir.path(), OUT_PREFIX, Some(&registry)).unwrap();
        let path = file.path().to_path_buf();
        std::mem::forget(file);

        assert_eq!(registry.cleanup(), 1);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_mode_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let file = create_channel_file(IN_PREFIX).unwrap();
        let mode = fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

//! Directory-backed store
//!
//! Layout below the working directory:
//!
//! ```text
//! registry/<repo>/<repo>.<name>.xml.sha256   fingerprint ("<hex>  -\n")
//! data/<repo>/<repo>.<name>.xml<stamp>       content snapshot
//! ```
//!
//! The fingerprint file mimics `sha256sum` output for piped input, so it
//! can be checked by hand against a dump.
//!
//! Both kinds of file are written to a uniquely named `.partial` file in the
//! same directory and renamed into place once complete. A failed or
//! concurrent write never leaves a torn file under the final name.

use crate::config::BackupConfig;
use crate::error::{StoreError, StoreResult};
use crate::fingerprint::{Fingerprint, FINGERPRINT_HEX_LEN};
use crate::node::Node;
use crate::store::{ContentSink, ContentStore, FingerprintStore};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

/// Extension of content snapshots (before the stamp)
const CONTENT_EXT: &str = ".xml";

/// Extension of fingerprint files
const FINGERPRINT_EXT: &str = ".xml.sha256";

/// Write buffer for content snapshots
const SINK_BUFFER_SIZE: usize = 256 * 1024;

/// Suffix of files being written, before they are renamed into place
const PARTIAL_SUFFIX: &str = ".partial";

/// Fingerprints and content in plain files
#[derive(Debug, Clone)]
pub struct FsStore {
    registry_dir: PathBuf,
    data_dir: PathBuf,
    stamp: String,
}

impl FsStore {
    /// Create a store over the given directories
    ///
    /// `stamp` is appended verbatim to every content file name.
    pub fn new(registry_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>, stamp: &str) -> Self {
        Self {
            registry_dir: registry_dir.into(),
            data_dir: data_dir.into(),
            stamp: stamp.to_string(),
        }
    }

    /// Create a store for the configured working directory
    pub fn from_config(config: &BackupConfig) -> Self {
        Self::new(config.registry_dir(), config.data_dir(), &config.stamp)
    }

    /// Where the node's content snapshot goes
    pub fn content_path(&self, node: &Node) -> StoreResult<PathBuf> {
        node_path(&self.data_dir, node, &format!("{}{}", CONTENT_EXT, self.stamp))
    }

    /// Where the node's fingerprint goes
    pub fn fingerprint_path(&self, node: &Node) -> StoreResult<PathBuf> {
        node_path(&self.registry_dir, node, FINGERPRINT_EXT)
    }
}

/// `<base>/<repo>/<repo>.<name><ext>`
fn node_path(base: &Path, node: &Node, ext: &str) -> StoreResult<PathBuf> {
    let unsafe_part = |s: &str| s.contains(&['/', '\\', '\0'][..]) || s == "..";
    if unsafe_part(node.repo()) || unsafe_part(node.name()) {
        return Err(StoreError::Other(format!(
            "node '{}' cannot be mapped to a file name",
            node
        )));
    }
    Ok(base
        .join(node.repo())
        .join(format!("{}{}", node.identity_key(), ext)))
}

fn ensure_parent(path: &Path) -> StoreResult<&Path> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    Ok(parent)
}

/// Uniquely named file next to `path`, removed unless persisted
fn staging_file(path: &Path) -> StoreResult<NamedTempFile> {
    let parent = ensure_parent(path)?;
    let prefix = match path.file_name() {
        Some(name) => format!(".{}.", name.to_string_lossy()),
        None => ".".to_string(),
    };
    Builder::new()
        .prefix(&prefix)
        .suffix(PARTIAL_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| StoreError::io(parent, e))
}

/// Flush the staging file to disk and move it over `path`
fn publish(staging: NamedTempFile, path: &Path) -> StoreResult<()> {
    staging
        .as_file()
        .sync_all()
        .map_err(|e| StoreError::io(staging.path(), e))?;
    staging
        .persist(path)
        .map(|_| ())
        .map_err(|e| StoreError::io(path, e.error))
}

impl FingerprintStore for FsStore {
    fn read_fingerprint(&self, node: &Node) -> StoreResult<Fingerprint> {
        let path = self.fingerprint_path(node)?;
        let not_found = || StoreError::NotFound {
            node: node.identity_key(),
        };

        let mut file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        // Only the leading digest matters; a short or garbled file counts as missing.
        let mut digest = [0u8; FINGERPRINT_HEX_LEN];
        match file.read_exact(&mut digest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(not_found()),
            Err(e) => return Err(StoreError::io(&path, e)),
        }

        std::str::from_utf8(&digest)
            .ok()
            .and_then(|hex| Fingerprint::from_hex(hex).ok())
            .ok_or_else(not_found)
    }

    fn write_fingerprint(&self, node: &Node, fingerprint: &Fingerprint) -> StoreResult<()> {
        let path = self.fingerprint_path(node)?;

        // Write aside and rename so a crash never leaves a torn digest behind.
        let mut staging = staging_file(&path)?;
        staging
            .write_all(format!("{}  -\n", fingerprint).as_bytes())
            .map_err(|e| StoreError::io(staging.path(), e))?;
        publish(staging, &path)
    }
}

impl ContentStore for FsStore {
    fn open_content_sink(&self, node: &Node) -> StoreResult<Box<dyn ContentSink>> {
        let path = self.content_path(node)?;
        let staging = staging_file(&path)?;

        Ok(Box::new(FileSink {
            writer: BufWriter::with_capacity(SINK_BUFFER_SIZE, staging),
            path,
        }))
    }
}

/// Buffered content file, written aside and renamed into place on close
struct FileSink {
    writer: BufWriter<NamedTempFile>,
    path: PathBuf,
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl ContentSink for FileSink {
    fn close(self: Box<Self>) -> StoreResult<()> {
        let FileSink { writer, path } = *self;
        let staging = writer
            .into_inner()
            .map_err(|e| StoreError::io(&path, e.into_error()))?;
        publish(staging, &path)
    }

    fn abandon(self: Box<Self>) -> StoreResult<()> {
        let FileSink { writer, .. } = *self;
        let (staging, _unflushed) = writer.into_parts();
        let partial = staging.path().to_path_buf();
        staging.close().map_err(|e| StoreError::io(partial, e))
    }
}

//! Standalone restartable data files
//!
//! Writes one or more maps into a self-contained file outside of the
//! checkpoint cycle (e.g. a trained model reused by another run). The file
//! carries the header block, the body block and a CRC32 footer:
//!
//! ```text
//! magic "RD" | preamble | per-thread counts | header block | body block | crc32 (4)
//! ```
//!
//! The CRC covers every byte after the magic. Files are read back with
//! [`RestartableDataIo::read_restartable_data`](crate::RestartableDataIo::read_restartable_data).
//!
//! # Crash Safety
//!
//! [`RestartableDataWriter::write_file`] writes to `<path>.tmp`, fsyncs it
//! and renames it over `path`, so a crash never leaves a partial file at the
//! final path.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use restartable_core::RestartableDataMap;
use tracing::{debug, info, warn};

use crate::config::DataIoConfig;
use crate::error::{RestartError, RestartResult};
use crate::header::{DataHeader, Preamble, MAGIC};
use crate::serialize::serialize_map;

/// Writer for standalone restartable data files
#[derive(Debug, Clone)]
pub struct RestartableDataWriter {
    config: DataIoConfig,
}

/// Information about a written file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteInfo {
    /// Final path of the file
    pub path: PathBuf,
    /// File size in bytes
    pub bytes: u64,
    /// Number of values written
    pub entries: usize,
    /// CRC32 footer
    pub crc: u32,
}

impl RestartableDataWriter {
    /// Create a writer recording the rank layout of `config`
    pub fn new(config: DataIoConfig) -> Self {
        RestartableDataWriter { config }
    }

    /// Writer configuration
    pub fn config(&self) -> &DataIoConfig {
        &self.config
    }

    /// Encode `maps` into a complete file image
    ///
    /// Map `i` is written as thread `i`.
    pub fn encode(&self, maps: &[&RestartableDataMap]) -> RestartResult<Vec<u8>> {
        let mut headers = Vec::with_capacity(maps.len());
        let mut bodies = Vec::with_capacity(maps.len());
        for map in maps {
            let serialized = serialize_map(map)?;
            headers.push(serialized.header);
            bodies.push(serialized.body);
        }

        let header = DataHeader {
            preamble: Preamble::new(
                self.config.reference_hash,
                self.config.n_procs,
                maps.len() as u32,
            ),
            threads: headers,
        };

        let mut out = Vec::new();
        header.write(&mut out)?;
        for body in &bodies {
            out.extend_from_slice(body);
        }
        let crc = crc32fast::hash(&out[MAGIC.len()..]);
        out.extend_from_slice(&crc.to_le_bytes());
        Ok(out)
    }

    /// Write `maps` to a stream, returning the number of bytes written
    pub fn write(&self, w: &mut dyn Write, maps: &[&RestartableDataMap]) -> RestartResult<usize> {
        let bytes = self.encode(maps)?;
        w.write_all(&bytes)?;
        Ok(bytes.len())
    }

    /// Write `maps` to `path` atomically
    pub fn write_file(
        &self,
        path: impl AsRef<Path>,
        maps: &[&RestartableDataMap],
    ) -> RestartResult<WriteInfo> {
        let path = path.as_ref();
        let bytes = self.encode(maps)?;
        let temp_path = temp_path_for(path);

        debug!(
            target: "restartable::io",
            final_path = %path.display(),
            temp_path = %temp_path.display(),
            "Starting atomic restartable data write"
        );

        if temp_path.exists() {
            warn!(
                target: "restartable::io",
                path = %temp_path.display(),
                "Removing stale temp file"
            );
            let _ = fs::remove_file(&temp_path);
        }

        if let Err(e) = write_synced(&temp_path, &bytes) {
            warn!(
                target: "restartable::io",
                temp_path = %temp_path.display(),
                error = %e,
                "Write failed, cleaning up temp file"
            );
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, path) {
            warn!(
                target: "restartable::io",
                temp_path = %temp_path.display(),
                error = %e,
                "Rename failed, cleaning up temp file"
            );
            let _ = fs::remove_file(&temp_path);
            return Err(RestartError::io(path, e));
        }
        sync_parent_dir(path)?;

        let info = WriteInfo {
            path: path.to_path_buf(),
            bytes: bytes.len() as u64,
            entries: maps.iter().map(|m| m.len()).sum(),
            crc: crc_footer(&bytes),
        };
        info!(
            target: "restartable::io",
            path = %info.path.display(),
            bytes = info.bytes,
            entries = info.entries,
            "Wrote restartable data file"
        );
        Ok(info)
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> RestartResult<()> {
    let mut file = File::create(path).map_err(|e| RestartError::io(path, e))?;
    file.write_all(bytes).map_err(|e| RestartError::io(path, e))?;
    file.sync_all().map_err(|e| RestartError::io(path, e))?;
    Ok(())
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> RestartResult<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| RestartError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> RestartResult<()> {
    Ok(())
}

fn crc_footer(bytes: &[u8]) -> u32 {
    let mut footer = [0u8; 4];
    footer.copy_from_slice(&bytes[bytes.len() - 4..]);
    u32::from_le_bytes(footer)
}

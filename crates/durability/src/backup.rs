//! In-memory checkpoint
//!
//! A [`Backup`] is a plain holder of byte streams: one system stream and one
//! stream per thread. It does no validation of its own; the
//! [`RestartableDataIo`](crate::RestartableDataIo) that produced it is also
//! what checks it on restore.
//!
//! A backup can be framed into a single blob with [`Backup::write_to`] to
//! hand it to another process:
//!
//! ```text
//! magic "RB" | u32 thread stream count | system stream (u64 len + bytes)
//!     | thread streams (u64 len + bytes each)
//! ```

use std::io::{Read, Write};

use restartable_core::store::{read_bytes, read_u32, write_bytes, write_u32};

use crate::error::{RestartError, RestartResult};

/// Magic bytes of a framed backup blob
pub const BACKUP_MAGIC: [u8; 2] = *b"RB";

/// Serialized restartable state of one rank
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backup {
    system: Vec<u8>,
    threads: Vec<Vec<u8>>,
}

impl Backup {
    /// Backup with empty system and thread streams
    pub fn new(n_threads: usize) -> Self {
        Backup {
            system: Vec::new(),
            threads: vec![Vec::new(); n_threads],
        }
    }

    /// Backup holding already serialized streams
    pub fn from_streams(system: Vec<u8>, threads: Vec<Vec<u8>>) -> Self {
        Backup { system, threads }
    }

    /// Whether every stream is empty
    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.threads.iter().all(Vec::is_empty)
    }

    /// Number of thread streams
    pub fn n_threads(&self) -> usize {
        self.threads.len()
    }

    /// System stream (preamble and meta-data maps)
    pub fn system(&self) -> &[u8] {
        &self.system
    }

    /// Mutable system stream
    pub fn system_mut(&mut self) -> &mut Vec<u8> {
        &mut self.system
    }

    /// Stream of thread `tid`
    pub fn thread(&self, tid: usize) -> Option<&[u8]> {
        self.threads.get(tid).map(Vec::as_slice)
    }

    /// Mutable stream of thread `tid`
    pub fn thread_mut(&mut self, tid: usize) -> Option<&mut Vec<u8>> {
        self.threads.get_mut(tid)
    }

    /// Combined size of every stream
    pub fn total_bytes(&self) -> usize {
        self.system.len() + self.threads.iter().map(Vec::len).sum::<usize>()
    }

    /// Frame the backup into `w`
    pub fn write_to(&self, w: &mut dyn Write) -> RestartResult<()> {
        w.write_all(&BACKUP_MAGIC)?;
        write_u32(w, self.threads.len() as u32)?;
        write_bytes(w, &self.system)?;
        for thread in &self.threads {
            write_bytes(w, thread)?;
        }
        Ok(())
    }

    /// Read a backup framed by [`Backup::write_to`]
    pub fn read_from(r: &mut dyn Read) -> RestartResult<Self> {
        let mut magic = [0u8; 2];
        r.read_exact(&mut magic)
            .map_err(|_| RestartError::Corruption("backup blob is too short".into()))?;
        if magic != BACKUP_MAGIC {
            return Err(RestartError::InvalidMagic {
                expected: BACKUP_MAGIC,
                found: magic.to_vec(),
            });
        }

        let n_threads = read_u32(r, "backup thread count")?;
        let system = read_bytes(r, "backup system stream")?;
        let mut threads = Vec::new();
        for _ in 0..n_threads {
            threads.push(read_bytes(r, "backup thread stream")?);
        }
        Ok(Backup { system, threads })
    }
}

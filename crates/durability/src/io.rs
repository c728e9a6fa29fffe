//! Serialization engine for restartable data
//!
//! [`RestartableDataIo`] turns a [`RestartableRegistry`] into a [`Backup`]
//! and back, and reads/writes standalone restartable data files.
//!
//! # Backup Layout
//!
//! ```text
//! system stream: magic "RD" | preamble | u64 meta-data map count
//!                | per map: name (u64 len + utf8) | item count | header block | body block
//! thread stream: item count | header block | body block
//! ```
//!
//! # Restore Order
//!
//! 1. Preamble: magic, version, reference type hash, rank and thread counts
//! 2. All headers are parsed
//! 3. Every value is matched against the headers and its type hash checked
//! 4. Missing values are reported (an error when strict)
//! 5. Bodies are decoded
//!
//! Nothing is mutated before step 5, so a rejected stream leaves the
//! registry as it was.
//!
//! When thread checks are suppressed and the thread counts differ, thread
//! `tid` of the registry is loaded from thread `tid` of the stream if the
//! stream has it and from thread 0 otherwise.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use restartable_core::store::{read_string, read_u64, write_str, write_u64};
use restartable_core::{RestartableDataMap, RestartableRegistry};
use tracing::{debug, info, warn};

use crate::backup::Backup;
use crate::config::DataIoConfig;
use crate::error::{RestartError, RestartResult};
use crate::header::{DataHeader, MapHeader, Preamble, MAGIC};
use crate::serialize::{
    check_type, load_entry, serialize_map, skip_rule, take_body, LoadPlan, RestoreReport, Section,
};
use crate::writer::{RestartableDataWriter, WriteInfo};

/// Backup binding state of a [`RestartableDataIo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupState {
    /// No backup bound
    Unbound,
    /// A backup is bound and can be restored
    Bound,
    /// A restore is running
    Restoring,
}

/// Serialization engine for one rank
#[derive(Debug)]
pub struct RestartableDataIo {
    config: DataIoConfig,
    backup: Option<Arc<Backup>>,
    state: BackupState,
    last_restore_for_restart: bool,
}

/// Parsed backup streams
struct ParsedBackup<'a> {
    preamble: Preamble,
    meta: Vec<(String, Section<'a>)>,
    threads: Vec<Section<'a>>,
}

impl<'a> ParsedBackup<'a> {
    fn parse(backup: &'a Backup) -> RestartResult<Self> {
        let mut system = backup.system();
        let preamble = Preamble::read(&mut system)?;

        let n_meta = read_u64(&mut system, "meta-data map count")?;
        let mut meta = Vec::new();
        for _ in 0..n_meta {
            let name = read_string(&mut system, "meta-data map name")?;
            meta.push((name, Section::read(&mut system)?));
        }
        expect_consumed(system, "system stream")?;

        if preamble.n_threads as usize != backup.n_threads() {
            return Err(RestartError::Corruption(format!(
                "preamble records {} threads but the backup holds {} thread streams",
                preamble.n_threads,
                backup.n_threads()
            )));
        }

        let mut threads = Vec::with_capacity(backup.n_threads());
        for tid in 0..backup.n_threads() {
            let mut stream = backup.thread(tid).unwrap_or_default();
            threads.push(Section::read(&mut stream)?);
            expect_consumed(stream, "thread stream")?;
        }

        Ok(ParsedBackup {
            preamble,
            meta,
            threads,
        })
    }

    fn meta_section(&self, name: &str) -> Option<&Section<'a>> {
        self.meta.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }
}

/// Checksum-verified contents of a standalone file
struct FileImage {
    header: DataHeader,
    /// Everything after the magic, without the footer
    content: Vec<u8>,
    body_start: usize,
}

impl FileImage {
    /// Per-thread bodies, indexed like `header.threads`
    fn bodies(&self) -> RestartResult<Vec<&[u8]>> {
        let mut cursor = &self.content[self.body_start..];
        let mut bodies = Vec::with_capacity(self.header.n_threads());
        for thread in &self.header.threads {
            bodies.push(take_body(&mut cursor, thread.body_size())?);
        }
        expect_consumed(cursor, "body block")?;
        Ok(bodies)
    }
}

fn expect_consumed(rest: &[u8], what: &str) -> RestartResult<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(RestartError::Corruption(format!(
            "{} trailing bytes after the {}",
            rest.len(),
            what
        )))
    }
}

/// Thread of the stream that feeds registry thread `tid`
fn source_thread(tid: usize, n_stream_threads: usize) -> usize {
    if tid < n_stream_threads {
        tid
    } else {
        0
    }
}

impl RestartableDataIo {
    /// Create an engine, validating `config`
    pub fn new(config: DataIoConfig) -> RestartResult<Self> {
        config.validate()?;
        Ok(RestartableDataIo {
            config,
            backup: None,
            state: BackupState::Unbound,
            last_restore_for_restart: false,
        })
    }

    /// Engine configuration
    pub fn config(&self) -> &DataIoConfig {
        &self.config
    }

    /// Whether loading data written with another rank count is an error
    pub fn set_error_on_load_with_different_number_of_processors(&mut self, error: bool) {
        self.config.error_on_different_procs = error;
    }

    /// Whether loading data written with another thread count is an error
    pub fn set_error_on_load_with_different_number_of_threads(&mut self, error: bool) {
        self.config.error_on_different_threads = error;
    }

    /// Current binding state
    pub fn backup_state(&self) -> BackupState {
        self.state
    }

    /// Whether a backup is bound
    pub fn has_backup(&self) -> bool {
        self.backup.is_some()
    }

    /// The bound backup
    pub fn backup(&self) -> Option<&Arc<Backup>> {
        self.backup.as_ref()
    }

    // ========================================================================
    // Backup
    // ========================================================================

    /// Serialize the whole registry into a new backup and bind it
    pub fn create_backup(&mut self, registry: &RestartableRegistry) -> RestartResult<Arc<Backup>> {
        let mut system = Vec::new();
        let preamble = Preamble::new(
            self.config.reference_hash,
            self.config.n_procs,
            registry.n_threads() as u32,
        );
        preamble.write(&mut system)?;

        let meta_maps: Vec<(&str, &RestartableDataMap)> = registry.meta_data_maps().collect();
        write_u64(&mut system, meta_maps.len() as u64)?;
        for (name, map) in meta_maps {
            debug!(target: "restartable::io", map = name, "Backing up meta-data map");
            write_str(&mut system, name)?;
            serialize_map(map)?.write_section(&mut system)?;
        }

        let mut threads = Vec::with_capacity(registry.n_threads());
        for (tid, map) in registry.thread_maps().iter().enumerate() {
            debug!(target: "restartable::io", tid, entries = map.len(), "Backing up thread map");
            let mut stream = Vec::new();
            serialize_map(map)?.write_section(&mut stream)?;
            threads.push(stream);
        }

        let backup = Arc::new(Backup::from_streams(system, threads));
        info!(
            target: "restartable::io",
            rank = self.config.rank,
            threads = backup.n_threads(),
            bytes = backup.total_bytes(),
            "Created restartable data backup"
        );
        self.set_backup(Arc::clone(&backup));
        Ok(backup)
    }

    /// Bind an existing backup for later restoration
    pub fn set_backup(&mut self, backup: Arc<Backup>) {
        self.backup = Some(backup);
        self.state = BackupState::Bound;
    }

    /// Drop the bound backup
    pub fn clear_backup(&mut self) {
        self.backup = None;
        self.state = BackupState::Unbound;
    }

    fn bound_backup(&self) -> RestartResult<Arc<Backup>> {
        self.backup.clone().ok_or(RestartError::NoBackup)
    }

    /// Restore every thread map and meta-data map from the bound backup
    ///
    /// With `for_restart` set, values declared recoverable keep their
    /// current (default) contents; otherwise they are loaded too. Values of
    /// a meta-data map absent from the backup count as missing.
    pub fn restore_backup(
        &mut self,
        registry: &mut RestartableRegistry,
        for_restart: bool,
    ) -> RestartResult<RestoreReport> {
        let backup = self.bound_backup()?;
        self.state = BackupState::Restoring;
        let result = self.restore_from(&backup, registry, for_restart);
        self.state = BackupState::Bound;

        let report = result?;
        self.last_restore_for_restart = for_restart;
        info!(
            target: "restartable::io",
            rank = self.config.rank,
            for_restart,
            loaded = report.loaded,
            skipped = report.skipped_recoverable.len(),
            missing = report.missing.len(),
            "Restored restartable data backup"
        );
        Ok(report)
    }

    fn restore_from(
        &self,
        backup: &Backup,
        registry: &mut RestartableRegistry,
        for_restart: bool,
    ) -> RestartResult<RestoreReport> {
        let parsed = ParsedBackup::parse(backup)?;
        self.check_layout(&parsed.preamble, registry.n_threads())?;

        let n_stream_threads = parsed.threads.len();
        let no_filter = HashSet::new();
        let (thread_plans, meta_plans) = {
            let recoverable = for_restart.then(|| registry.recoverable_names());
            let skip = skip_rule(&no_filter, recoverable);

            let mut thread_plans = Vec::with_capacity(registry.n_threads());
            for (tid, map) in registry.thread_maps().iter().enumerate() {
                let source = parsed.threads.get(source_thread(tid, n_stream_threads));
                thread_plans.push(LoadPlan::build(map, source.map(|s| &s.header), &skip)?);
            }

            let mut meta_plans = Vec::new();
            for (name, map) in registry.meta_data_maps() {
                let section = parsed.meta_section(name);
                if section.is_none() {
                    debug!(target: "restartable::io", map = name, "Meta-data map not in backup");
                }
                let plan = LoadPlan::build(map, section.map(|s| &s.header), &skip)?;
                meta_plans.push((name.to_string(), plan));
            }
            (thread_plans, meta_plans)
        };

        let missing: Vec<String> = thread_plans
            .iter()
            .chain(meta_plans.iter().map(|(_, p)| p))
            .flat_map(|p| p.missing().iter().cloned())
            .collect();
        self.check_missing(&missing)?;

        let mut report = RestoreReport::default();
        for (tid, plan) in thread_plans.into_iter().enumerate() {
            let map = registry.thread_map_mut(tid)?;
            report.merge(match parsed.threads.get(source_thread(tid, n_stream_threads)) {
                Some(section) => plan.apply(map, &section.header, section.body)?,
                None => plan.apply(map, &MapHeader::new(), &[])?,
            });
        }
        for (name, plan) in meta_plans {
            let map = registry.meta_data_map_mut(&name)?;
            report.merge(match parsed.meta_section(&name) {
                Some(section) => plan.apply(map, &section.header, section.body)?,
                None => plan.apply(map, &MapHeader::new(), &[])?,
            });
        }
        Ok(report)
    }

    /// Restore the single value `name` of thread `tid` from the bound backup
    ///
    /// Used for data declared after the bulk restore. Returns `false` when
    /// the backup has no such entry, or when the last restore was a restart
    /// and the value is recoverable.
    pub fn restore_data(
        &mut self,
        registry: &mut RestartableRegistry,
        name: &str,
        tid: usize,
    ) -> RestartResult<bool> {
        let backup = self.bound_backup()?;
        let parsed = ParsedBackup::parse(&backup)?;
        self.check_layout(&parsed.preamble, registry.n_threads())?;
        registry.thread_map(tid)?;

        if self.last_restore_for_restart && registry.is_recoverable(name) {
            debug!(
                target: "restartable::io",
                data = name,
                tid,
                "Skipping recoverable data on restart"
            );
            return Ok(false);
        }

        let section = match parsed.threads.get(source_thread(tid, parsed.threads.len())) {
            Some(section) => section,
            None => return Ok(false),
        };
        let entry = match section.header.find(name) {
            Some(entry) => entry,
            None => return Ok(false),
        };

        let value = registry.thread_map_mut(tid)?.data_mut(name)?;
        check_type(value, entry)?;
        load_entry(value, entry, section.header.body_of(entry, section.body)?)?;
        debug!(target: "restartable::io", data = name, tid, "Restored restartable data");
        Ok(true)
    }

    /// Restore one named meta-data map from the bound backup
    pub fn restore_meta_data(
        &mut self,
        registry: &mut RestartableRegistry,
        map_name: &str,
    ) -> RestartResult<RestoreReport> {
        let backup = self.bound_backup()?;
        let parsed = ParsedBackup::parse(&backup)?;
        self.check_layout(&parsed.preamble, registry.n_threads())?;

        let section = parsed.meta_section(map_name);
        let no_filter = HashSet::new();
        let plan = {
            let recoverable = self
                .last_restore_for_restart
                .then(|| registry.recoverable_names());
            let map = registry.meta_data_map(map_name)?;
            LoadPlan::build(map, section.map(|s| &s.header), skip_rule(&no_filter, recoverable))?
        };
        self.check_missing(plan.missing())?;

        let map = registry.meta_data_map_mut(map_name)?;
        let report = match section {
            Some(section) => plan.apply(map, &section.header, section.body)?,
            None => plan.apply(map, &MapHeader::new(), &[])?,
        };
        info!(
            target: "restartable::io",
            map = map_name,
            loaded = report.loaded,
            "Restored meta-data map"
        );
        Ok(report)
    }

    // ========================================================================
    // Standalone files
    // ========================================================================

    /// Write `maps` to a standalone file; map `i` becomes thread `i`
    pub fn write_restartable_data(
        &self,
        path: impl AsRef<Path>,
        maps: &[&RestartableDataMap],
    ) -> RestartResult<WriteInfo> {
        RestartableDataWriter::new(self.config.clone()).write_file(path, maps)
    }

    /// Read a standalone file into `maps`
    ///
    /// Names in `filter` are skipped without decoding their bodies and keep
    /// their current contents. The checksum covers the whole file, so every
    /// body is still read from disk.
    pub fn read_restartable_data(
        &self,
        path: impl AsRef<Path>,
        maps: &mut [&mut RestartableDataMap],
        filter: &HashSet<String>,
    ) -> RestartResult<RestoreReport> {
        self.read_file_into(path.as_ref(), maps, filter, None)
    }

    /// Read a standalone file, also skipping `recoverable` names
    ///
    /// Skipped recoverable values are reported apart from filtered ones.
    pub(crate) fn read_file_into(
        &self,
        path: &Path,
        maps: &mut [&mut RestartableDataMap],
        filter: &HashSet<String>,
        recoverable: Option<&HashSet<String>>,
    ) -> RestartResult<RestoreReport> {
        let image = self.decode_file(path, maps.len())?;
        let header = &image.header;
        let bodies = image.bodies()?;

        let n_file_threads = header.n_threads();
        let skip = skip_rule(filter, recoverable);
        let mut plans = Vec::with_capacity(maps.len());
        for (tid, map) in maps.iter().enumerate() {
            let source = header.thread(source_thread(tid, n_file_threads));
            plans.push(LoadPlan::build(map, source, &skip)?);
        }

        let missing: Vec<String> = plans
            .iter()
            .flat_map(|p| p.missing().iter().cloned())
            .collect();
        self.check_missing(&missing)?;

        let mut report = RestoreReport::default();
        for (tid, (map, plan)) in maps.iter_mut().zip(plans).enumerate() {
            let source = source_thread(tid, n_file_threads);
            report.merge(match (header.thread(source), bodies.get(source)) {
                (Some(thread), Some(body)) => plan.apply(map, thread, body)?,
                _ => plan.apply(map, &MapHeader::new(), &[])?,
            });
        }

        info!(
            target: "restartable::io",
            path = %path.display(),
            loaded = report.loaded,
            filtered = report.filtered.len(),
            skipped = report.skipped_recoverable.len(),
            missing = report.missing.len(),
            "Read restartable data file"
        );
        Ok(report)
    }

    /// Read only the header of a standalone file
    ///
    /// Stops at the start of the body block; the checksum is not verified.
    pub fn read_header(&self, path: impl AsRef<Path>) -> RestartResult<DataHeader> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| RestartError::io(path, e))?;
        let mut reader = BufReader::new(file);
        DataHeader::read(&mut reader)
    }

    /// Open a standalone file, validate it and parse its header
    ///
    /// The preamble is read and checked before anything else, so an
    /// incompatible file is rejected without reading its bodies. Only then
    /// is the rest of the file read and the checksum verified.
    fn decode_file(&self, path: &Path, current_threads: usize) -> RestartResult<FileImage> {
        let file = File::open(path).map_err(|e| RestartError::io(path, e))?;
        let mut reader = BufReader::new(file);
        let preamble = Preamble::read(&mut reader)?;
        self.check_layout(&preamble, current_threads)?;

        let mut content = Vec::new();
        preamble.write(&mut content)?;
        content.drain(..MAGIC.len());
        let preamble_len = content.len();
        reader
            .read_to_end(&mut content)
            .map_err(|e| RestartError::io(path, e))?;

        if content.len() < preamble_len + 4 {
            return Err(RestartError::Corruption(format!(
                "{} is too short to hold a checksum",
                path.display()
            )));
        }
        let mut footer = [0u8; 4];
        footer.copy_from_slice(&content[content.len() - 4..]);
        content.truncate(content.len() - 4);
        let expected = u32::from_le_bytes(footer);
        let actual = crc32fast::hash(&content);
        if expected != actual {
            return Err(RestartError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected,
                actual,
            });
        }

        let mut cursor = &content[preamble_len..];
        let header = DataHeader::read_after_preamble(preamble, &mut cursor)?;
        let body_start = content.len() - cursor.len();
        Ok(FileImage {
            header,
            content,
            body_start,
        })
    }

    // ========================================================================
    // Validation
    // ========================================================================

    /// Check a stream's preamble against this run
    fn check_layout(&self, preamble: &Preamble, current_threads: usize) -> RestartResult<()> {
        if preamble.reference_hash != self.config.reference_hash {
            return Err(RestartError::ReferenceHashMismatch {
                found: preamble.reference_hash,
                expected: self.config.reference_hash,
            });
        }

        if preamble.n_procs != self.config.n_procs {
            if self.config.error_on_different_procs {
                return Err(RestartError::ProcessorMismatch {
                    written: preamble.n_procs,
                    current: self.config.n_procs,
                });
            }
            warn!(
                target: "restartable::io",
                written = preamble.n_procs,
                current = self.config.n_procs,
                "Loading restartable data written with a different number of processors"
            );
        }

        let current_threads = current_threads as u32;
        if preamble.n_threads != current_threads {
            if self.config.error_on_different_threads {
                return Err(RestartError::ThreadMismatch {
                    written: preamble.n_threads,
                    current: current_threads,
                });
            }
            warn!(
                target: "restartable::io",
                written = preamble.n_threads,
                current = current_threads,
                "Loading restartable data written with a different number of threads"
            );
        }
        Ok(())
    }

    fn check_missing(&self, missing: &[String]) -> RestartResult<()> {
        if missing.is_empty() {
            return Ok(());
        }
        if self.config.error_on_missing_data {
            return Err(RestartError::MissingData {
                names: missing.to_vec(),
            });
        }
        for name in missing {
            warn!(
                target: "restartable::io",
                data = name.as_str(),
                "Restartable data not found in stored data, keeping its current value"
            );
        }
        Ok(())
    }
}

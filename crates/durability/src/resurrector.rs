//! Restart file coordination
//!
//! A [`Resurrector`] knows where a checkpoint lives on disk and drives the
//! two restore paths of a restart:
//!
//! 1. The equation systems (mesh and solution vectors) are handed to an
//!    external [`SystemRestorer`]; this crate only supplies the file name.
//! 2. The restartable data of this rank is read into the registry through
//!    a [`RestartableDataIo`].
//!
//! # File Names
//!
//! ```text
//! {base}-{rank}.rd          per-rank restartable data
//! {base}_meta_{map}.rd      rank agnostic meta-data map, written by rank 0
//! {base}.xdr / {base}.xda   equation systems (binary / ascii)
//! ```

use std::collections::HashSet;
use std::error::Error as StdError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use restartable_core::{RestartableDataMap, RestartableRegistry};
use tracing::{debug, info};

use crate::error::{RestartError, RestartResult};
use crate::io::RestartableDataIo;
use crate::serialize::RestoreReport;
use crate::writer::WriteInfo;

/// Encoding of the equation system file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartFormat {
    /// Binary (`.xdr`)
    Binary,
    /// Text (`.xda`)
    Ascii,
}

impl RestartFormat {
    /// File extension of the equation system file
    pub fn extension(&self) -> &'static str {
        match self {
            RestartFormat::Binary => "xdr",
            RestartFormat::Ascii => "xda",
        }
    }
}

/// External restore of mesh and solution state
pub trait SystemRestorer {
    /// Read the equation systems from `path`
    fn restore_systems(
        &mut self,
        path: &Path,
        format: RestartFormat,
    ) -> Result<(), Box<dyn StdError + Send + Sync>>;
}

/// Coordinates reading and writing of one checkpoint's files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resurrector {
    file_base: PathBuf,
    format: RestartFormat,
}

impl Resurrector {
    /// Coordinator for the checkpoint at `file_base`
    pub fn new(file_base: impl Into<PathBuf>, format: RestartFormat) -> Self {
        Resurrector {
            file_base: file_base.into(),
            format,
        }
    }

    /// Base path of every checkpoint file
    pub fn file_base(&self) -> &Path {
        &self.file_base
    }

    /// Equation system file format
    pub fn format(&self) -> RestartFormat {
        self.format
    }

    fn with_suffix(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self.file_base.clone().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Restartable data file of `rank`
    pub fn restart_file(&self, rank: u32) -> PathBuf {
        self.with_suffix(&format!("-{}.rd", rank))
    }

    /// Equation system file
    pub fn system_file(&self) -> PathBuf {
        self.with_suffix(&format!(".{}", self.format.extension()))
    }

    /// File of the meta-data map `map_name`
    pub fn meta_data_file(&self, map_name: &str) -> PathBuf {
        self.with_suffix(&format!("_meta_{}.rd", map_name))
    }

    /// Restore a run from this checkpoint
    ///
    /// On restart, recoverable values are skipped, keep their defaults and
    /// are reported as `skipped_recoverable`. Meta-data maps are read from
    /// their own files when those exist, with the rank check relaxed.
    pub fn restart_from_file(
        &self,
        io: &RestartableDataIo,
        registry: &mut RestartableRegistry,
        systems: Option<&mut dyn SystemRestorer>,
        for_restart: bool,
    ) -> RestartResult<RestoreReport> {
        if let Some(systems) = systems {
            let path = self.system_file();
            debug!(
                target: "restartable::resurrector",
                path = %path.display(),
                "Restoring equation systems"
            );
            systems
                .restore_systems(&path, self.format)
                .map_err(|e| RestartError::SystemRestore {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
        }

        let no_filter = HashSet::new();
        let recoverable = for_restart.then(|| registry.recoverable_names().clone());

        let rank = io.config().rank;
        let path = self.restart_file(rank);
        let mut report = {
            let mut maps: Vec<&mut RestartableDataMap> =
                registry.thread_maps_mut().iter_mut().collect();
            io.read_file_into(&path, &mut maps, &no_filter, recoverable.as_ref())?
        };

        let meta_io = RestartableDataIo::new(
            io.config()
                .clone()
                .with_error_on_different_procs(false),
        )?;
        let names: Vec<String> = registry.meta_data_map_names().map(str::to_string).collect();
        for name in names {
            let path = self.meta_data_file(&name);
            if !path.exists() {
                debug!(
                    target: "restartable::resurrector",
                    map = name.as_str(),
                    "No meta-data file, skipping"
                );
                continue;
            }
            let map = registry.meta_data_map_mut(&name)?;
            report.merge(meta_io.read_file_into(
                &path,
                &mut [map],
                &no_filter,
                recoverable.as_ref(),
            )?);
        }

        info!(
            target: "restartable::resurrector",
            file_base = %self.file_base.display(),
            rank,
            for_restart,
            loaded = report.loaded,
            "Restored from restart files"
        );
        Ok(report)
    }

    /// Write this rank's restart files
    ///
    /// Every rank writes its restartable data file; rank 0 also writes one
    /// file per meta-data map.
    pub fn write_restart_files(
        &self,
        io: &RestartableDataIo,
        registry: &RestartableRegistry,
    ) -> RestartResult<Vec<WriteInfo>> {
        let rank = io.config().rank;
        let maps: Vec<&RestartableDataMap> = registry.thread_maps().iter().collect();
        let mut written = vec![io.write_restartable_data(self.restart_file(rank), &maps)?];

        if rank == 0 {
            for (name, map) in registry.meta_data_maps() {
                written.push(io.write_restartable_data(self.meta_data_file(name), &[map])?);
            }
        }

        info!(
            target: "restartable::resurrector",
            file_base = %self.file_base.display(),
            rank,
            files = written.len(),
            "Wrote restart files"
        );
        Ok(written)
    }
}

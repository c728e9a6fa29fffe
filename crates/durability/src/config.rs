//! Serialization engine configuration
//!
//! Controls the parallel layout recorded in written data and how strictly
//! loaded data is checked against the current run.

use restartable_core::reference_type_hash;

/// Configuration for [`RestartableDataIo`](crate::RestartableDataIo) and
/// [`RestartableDataWriter`](crate::RestartableDataWriter)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataIoConfig {
    /// Rank of this process
    pub rank: u32,
    /// Number of ranks in the run
    pub n_procs: u32,
    /// Fail when loading data written with a different number of ranks
    pub error_on_different_procs: bool,
    /// Fail when loading data written with a different number of threads
    pub error_on_different_threads: bool,
    /// Fail (rather than warn) when declared data is absent from the stream
    pub error_on_missing_data: bool,
    /// Reference type hash written to, and expected in, every stream
    pub reference_hash: u64,
}

impl Default for DataIoConfig {
    fn default() -> Self {
        DataIoConfig {
            rank: 0,
            n_procs: 1,
            error_on_different_procs: true,
            error_on_different_threads: true,
            error_on_missing_data: true,
            reference_hash: reference_type_hash(),
        }
    }
}

impl DataIoConfig {
    /// Config for one rank of a parallel run
    pub fn parallel(rank: u32, n_procs: u32) -> Self {
        DataIoConfig {
            rank,
            n_procs,
            ..Default::default()
        }
    }

    /// Config for rank/thread agnostic data (e.g. trained models)
    ///
    /// Layout checks are off and missing data only warns.
    pub fn layout_agnostic() -> Self {
        DataIoConfig {
            error_on_different_procs: false,
            error_on_different_threads: false,
            error_on_missing_data: false,
            ..Default::default()
        }
    }

    /// Config for testing
    pub fn for_testing() -> Self {
        Self::default()
    }

    /// Set rank and rank count
    pub fn with_parallel(mut self, rank: u32, n_procs: u32) -> Self {
        self.rank = rank;
        self.n_procs = n_procs;
        self
    }

    /// Set whether differing rank counts are an error
    pub fn with_error_on_different_procs(mut self, error: bool) -> Self {
        self.error_on_different_procs = error;
        self
    }

    /// Set whether differing thread counts are an error
    pub fn with_error_on_different_threads(mut self, error: bool) -> Self {
        self.error_on_different_threads = error;
        self
    }

    /// Set whether missing data is an error
    pub fn with_error_on_missing_data(mut self, error: bool) -> Self {
        self.error_on_missing_data = error;
        self
    }

    /// Override the reference type hash
    pub fn with_reference_hash(mut self, hash: u64) -> Self {
        self.reference_hash = hash;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_procs == 0 {
            return Err(ConfigError::NoProcessors);
        }
        if self.rank >= self.n_procs {
            return Err(ConfigError::InvalidRank {
                rank: self.rank,
                n_procs: self.n_procs,
            });
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Rank count is zero
    #[error("Number of processors must be at least 1")]
    NoProcessors,

    /// Rank outside of the rank range
    #[error("Rank {rank} is out of range for {n_procs} processors")]
    InvalidRank {
        /// Configured rank
        rank: u32,
        /// Configured rank count
        n_procs: u32,
    },
}

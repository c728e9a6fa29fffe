//! Shared test utilities for the integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use std::sync::Once;

use restartable::{DataIoConfig, Restartable, RestartableDataIo, RestartableRegistry};

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test harness (set `RUST_LOG` to see it)
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Engine with the default (strict) configuration
pub fn strict_engine() -> RestartableDataIo {
    init_tracing();
    RestartableDataIo::new(DataIoConfig::for_testing()).unwrap()
}

/// Declaration handle of one simulated object
pub fn object(system: &str, name: &str, tid: usize) -> Restartable {
    Restartable::new(system, name, tid)
}

/// Registry with `n_threads` thread maps
pub fn registry(n_threads: usize) -> RestartableRegistry {
    RestartableRegistry::new(n_threads)
}

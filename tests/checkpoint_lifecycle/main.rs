//! End-to-end checkpoint lifecycle tests.
//!
//! These tests drive the public facade the way an application does: objects
//! declare state during setup, the time loop backs up and rolls back, and a
//! later run restarts from the files written at a checkpoint.

#[path = "../common/mod.rs"]
mod common;

mod custom_codecs;
mod model_export;
mod time_loop;

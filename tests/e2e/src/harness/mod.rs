//! Test Harness

mod engine_manager;

pub use engine_manager::TestEngine;

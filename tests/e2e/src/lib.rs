//! End-to-end test support for the Alexandria engine:
//! isolated databases and scripted capability mocks.

pub mod harness;
pub mod mocks;

//! Scripted Capability Mocks

mod fixtures;

pub use fixtures::{DownModel, HashEmbedder, ScriptedModel, ScriptedTruth};

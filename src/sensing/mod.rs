mod controller;
mod loop_worker;
mod source;

pub use controller::SamplerController;
pub use source::{JsonFileSource, SnapshotSource};

mod controller;
mod snapshot;
mod state;

pub use controller::{RegisterOutcome, Tracker, TrackerResult, DEBUG_ENABLED_KEY, VERSUS_MODE_KEY};
pub use snapshot::ActiveSet;
pub(crate) use state::TrackerCounters;
pub use state::{
    Pairing, SnapshotState, TrackerStats, VersusMode, MAX_VERSUS_MODE, MIN_VERSUS_MODE,
};

//! The reader's side of the map: what a fuzzing harness does with it between
//! runs. Everything in here allocates and logs, so none of it may be called
//! from inside the hooks.

mod feedback;
mod snapshot;

pub use feedback::SizeFeedback;
pub use snapshot::{Anomaly, AnomalyPolicy, MapSnapshot, SlotSize, SnapshotFromFileError};

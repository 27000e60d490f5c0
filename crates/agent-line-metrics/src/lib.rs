//! Line edit metrics for AI coding agent sessions.
//!
//! An [EditTracker] observes the agent's edit events, computes how many lines each edited file
//! gained and lost, and emits one [LineEditRecord] per changed file, either to a metrics endpoint
//! discovered through the content-exclusion policy service or to a local JSON file.

pub mod cli;
pub mod consts;
pub mod delta;
pub mod diff;
pub mod document;
pub mod emitter;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod record;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod telemetry;
pub mod tracker;

pub use delta::{
    DeltaComputer,
    FileDelta,
    LineDelta,
};
pub use document::{
    DocumentSource,
    EditEvent,
    FileId,
};
pub use emitter::{
    EmitOutcome,
    RecordEmitter,
};
pub use endpoint::{
    EndpointCache,
    EndpointResolver,
};
pub use record::{
    LineEditRecord,
    RecordContext,
};
pub use session::{
    SessionAccumulator,
    SessionTotals,
};
pub use snapshot::{
    SnapshotCapturer,
    Stabilizer,
};
pub use tracker::EditTracker;

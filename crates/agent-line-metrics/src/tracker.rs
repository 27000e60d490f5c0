//! Ties the pieces together for one agent session.
//!
//! [EditTracker] observes the edit-event stream, captures each file's original text on first
//! sight, and runs the per-file pipeline (stabilize, diff, accumulate, emit) once the file is
//! done. Anything still outstanding is flushed by [EditTracker::finalize].

use std::collections::{
    HashMap,
    HashSet,
};
use std::sync::Arc;

use chrono::Utc;
use futures::{
    Stream,
    StreamExt,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{
    debug,
    warn,
};

use crate::delta::DeltaComputer;
use crate::document::{
    EditEvent,
    FileId,
};
use crate::emitter::{
    EmitOutcome,
    RecordEmitter,
};
use crate::record::{
    LineEditRecord,
    RecordContext,
};
use crate::session::{
    SessionAccumulator,
    SessionTotals,
};
use crate::snapshot::SnapshotCapturer;
use crate::telemetry::{
    TelemetryEvent,
    TelemetrySink,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEditState {
    /// Original text is being read.
    Capturing,
    Edited,
    Stabilizing,
    DeltaComputed,
    Emitted,
    /// Pipeline ran and found nothing to report.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionPhase {
    #[default]
    Idle,
    Active,
    Finalizing,
    Done,
}

#[derive(Default)]
struct SessionState {
    phase: SessionPhase,
    files: HashMap<FileId, FileEditState>,
    /// Files in the order they were first seen.
    touched: Vec<FileId>,
    /// Files whose pipeline has been scheduled. Never shrinks.
    emitted: HashSet<FileId>,
    accumulator: SessionAccumulator,
    records: Vec<LineEditRecord>,
    deferred: Vec<JoinHandle<()>>,
}

struct TrackerInner {
    context: RecordContext,
    capturer: SnapshotCapturer,
    computer: DeltaComputer,
    emitter: Arc<RecordEmitter>,
    telemetry: Arc<dyn TelemetrySink>,
    state: Mutex<SessionState>,
}

/// Session-scoped line edit tracking. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct EditTracker {
    inner: Arc<TrackerInner>,
}

impl EditTracker {
    pub fn new(
        context: RecordContext,
        capturer: SnapshotCapturer,
        computer: DeltaComputer,
        emitter: Arc<RecordEmitter>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                context,
                capturer,
                computer,
                emitter,
                telemetry,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn context(&self) -> &RecordContext {
        &self.inner.context
    }

    /// Handles one edit event. Never blocks and never fails; must be called from within a tokio
    /// runtime.
    pub fn observe(&self, event: &EditEvent) {
        let mut state = self.inner.state.lock();
        match state.phase {
            SessionPhase::Finalizing | SessionPhase::Done => {
                debug!(file = %event.file, "ignoring edit event after finalize");
                return;
            },
            SessionPhase::Idle => state.phase = SessionPhase::Active,
            SessionPhase::Active => {},
        }

        let file = &event.file;
        match state.files.get(file).copied() {
            None => {
                state.files.insert(file.clone(), FileEditState::Capturing);
                state.touched.push(file.clone());
                self.inner.capturer.capture_original(file);
            },
            Some(FileEditState::Capturing) => {
                state.files.insert(file.clone(), FileEditState::Edited);
            },
            Some(_) => {},
        }

        if event.is_done && state.emitted.insert(file.clone()) {
            let inner = Arc::clone(&self.inner);
            let file = file.clone();
            state
                .deferred
                .push(tokio::spawn(async move { inner.run_pipeline(file).await }));
        }
    }

    /// Passes `stream` through unchanged, observing every event on the way.
    pub fn wrap_stream<S>(&self, stream: S) -> impl Stream<Item = EditEvent> + use<S>
    where
        S: Stream<Item = EditEvent>,
    {
        let tracker = self.clone();
        stream.inspect(move |event| tracker.observe(event))
    }

    /// Consumes `stream` and finalizes the session.
    pub async fn track<S>(&self, stream: S) -> Vec<LineEditRecord>
    where
        S: Stream<Item = EditEvent>,
    {
        self.wrap_stream(stream).for_each(|_| async {}).await;
        self.finalize().await
    }

    /// Waits for scheduled pipelines, runs the pipeline for every touched file that never
    /// reported "done", and returns every record of the session.
    ///
    /// Only the first call does any work; later calls return an empty list.
    pub async fn finalize(&self) -> Vec<LineEditRecord> {
        let deferred = {
            let mut state = self.inner.state.lock();
            if matches!(state.phase, SessionPhase::Finalizing | SessionPhase::Done) {
                return Vec::new();
            }
            state.phase = SessionPhase::Finalizing;
            std::mem::take(&mut state.deferred)
        };

        for handle in deferred {
            if let Err(err) = handle.await {
                warn!(%err, "line edit pipeline task failed");
            }
        }

        let pending: Vec<FileId> = {
            let mut state = self.inner.state.lock();
            let touched = state.touched.clone();
            touched
                .into_iter()
                .filter(|file| state.emitted.insert(file.clone()))
                .collect()
        };
        for file in pending {
            debug!(%file, "file was never reported done, computing its delta now");
            Arc::clone(&self.inner).run_pipeline(file).await;
        }

        let (totals, records) = {
            let mut state = self.inner.state.lock();
            state.phase = SessionPhase::Done;
            (state.accumulator.totals(), std::mem::take(&mut state.records))
        };
        self.inner
            .telemetry
            .send_event(TelemetryEvent::session_ended(&self.inner.context.session_id, totals));
        records
    }

    /// Original text captured for `file`, waiting for the read if it is still in flight.
    pub async fn captured_original(&self, file: &FileId) -> Arc<str> {
        self.inner.capturer.original(file).await
    }

    pub fn file_state(&self, file: &FileId) -> Option<FileEditState> {
        self.inner.state.lock().files.get(file).copied()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase
    }

    pub fn totals(&self) -> SessionTotals {
        self.inner.state.lock().accumulator.totals()
    }
}

impl TrackerInner {
    fn set_file_state(&self, file: &FileId, to: FileEditState) {
        self.state.lock().files.insert(file.clone(), to);
    }

    async fn run_pipeline(self: Arc<Self>, file: FileId) {
        let original = self.capturer.original(&file).await;
        self.set_file_state(&file, FileEditState::Stabilizing);

        let Some(delta) = self.computer.compute_file_delta(&file, &original).await else {
            debug!(%file, "no line changes");
            self.set_file_state(&file, FileEditState::Unchanged);
            return;
        };

        let record = LineEditRecord::new(&self.context, delta.clone(), Utc::now());
        {
            let mut state = self.state.lock();
            state.files.insert(file.clone(), FileEditState::DeltaComputed);
            state.accumulator.record_file_edit(file.as_str(), delta);
            state.records.push(record.clone());
        }
        self.telemetry
            .send_event(TelemetryEvent::file_changed(&self.context.session_id, &record.delta));

        match self.emitter.emit(&record).await {
            EmitOutcome::Remote { url, status } => debug!(%file, %url, ?status, "line edit record posted"),
            EmitOutcome::Local { path } => debug!(%file, path = %path.display(), "line edit record written"),
            EmitOutcome::Skipped => debug!(%file, "line edit record not emitted"),
        }
        self.set_file_state(&file, FileEditState::Emitted);
    }
}

// session.rs — Session controller: per-document sequencing and cancellation
//
// A single actor task owns every document's tracker. Saves issue a new
// sequence number and abort the document's in-flight request; completions
// are presented only when they carry the document's pending sequence number.
//
// Preconditions: the runner and presenter outlive the actor (held by `Arc`).
// Postconditions: for each document, the presenter only ever receives the
//   diagnostics of the most recently issued request that ran to completion,
//   or an empty list after close.
// Failure modes: none escape; request failures are presented as one
//   document-level tool diagnostic.
// Side effects: spawns one task per request; aborting it drops the pipeline
//   future, which kills its child process and removes its temp directory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::pipeline::{
    DocumentId, NormalizedDiagnostic, NormalizedDiagnostics, PipelineError, PipelineRequest,
    RequestRunner,
};

// ── Presentation boundary ──────────────────────────────────────────────────

/// Receives the complete, ordered diagnostic list for a document; each call
/// replaces the previous list.
#[async_trait]
pub trait Presenter: Send + Sync {
    async fn present(&self, document: &DocumentId, diagnostics: Vec<NormalizedDiagnostic>);
}

// ── Per-document state machine ─────────────────────────────────────────────

/// `Idle -> Pending(seq) -> Idle`. A request leaves `Pending` either by
/// completing (presented) or by being cancelled (superseded or closed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Idle,
    Pending(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Present,
    Discard,
}

/// Request state for one document. Sequence numbers come from the session,
/// which never reuses one, so a tracker can be dropped on close without a
/// late result from before the close being mistaken for a fresh one.
#[derive(Debug, Clone)]
pub struct DocumentTracker {
    state: RequestState,
}

impl Default for DocumentTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentTracker {
    pub fn new() -> Self {
        Self {
            state: RequestState::Idle,
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Make `sequence` the pending request. Returns the pending request it
    /// supersedes, which the caller must cancel.
    pub fn issue(&mut self, sequence: u64) -> Option<u64> {
        let superseded = match self.state {
            RequestState::Pending(seq) => Some(seq),
            RequestState::Idle => None,
        };
        self.state = RequestState::Pending(sequence);
        superseded
    }

    /// Record a finished request; only the pending (newest) one is presented.
    pub fn complete(&mut self, seq: u64) -> Verdict {
        match self.state {
            RequestState::Pending(pending) if pending == seq => {
                self.state = RequestState::Idle;
                Verdict::Present
            }
            _ => Verdict::Discard,
        }
    }

    /// Cancel the pending request, if any, and return its sequence number.
    pub fn close(&mut self) -> Option<u64> {
        match std::mem::replace(&mut self.state, RequestState::Idle) {
            RequestState::Pending(seq) => Some(seq),
            RequestState::Idle => None,
        }
    }
}

// ── Actor ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Event {
    Saved { document: DocumentId, text: String },
    Closed { document: DocumentId },
    Shutdown,
}

struct Completion {
    document: DocumentId,
    sequence: u64,
    result: Result<NormalizedDiagnostics, PipelineError>,
}

#[derive(Debug, thiserror::Error)]
#[error("the session controller has stopped")]
pub struct SessionClosed;

/// Cheap, cloneable handle for feeding editor events to the session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<Event>,
}

impl SessionHandle {
    pub fn save(&self, document: DocumentId, text: String) -> Result<(), SessionClosed> {
        self.events
            .send(Event::Saved { document, text })
            .map_err(|_| SessionClosed)
    }

    pub fn close(&self, document: DocumentId) -> Result<(), SessionClosed> {
        self.events
            .send(Event::Closed { document })
            .map_err(|_| SessionClosed)
    }

    /// Stop the actor, aborting every in-flight request.
    pub fn shutdown(&self) -> Result<(), SessionClosed> {
        self.events.send(Event::Shutdown).map_err(|_| SessionClosed)
    }
}

#[derive(Default)]
struct DocumentSlot {
    tracker: DocumentTracker,
    in_flight: Option<JoinHandle<()>>,
}

pub struct Session {
    runner: Arc<dyn RequestRunner>,
    presenter: Arc<dyn Presenter>,
    documents: HashMap<DocumentId, DocumentSlot>,
    last_issued: u64,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl Session {
    /// Start the actor. It runs until `shutdown` or until every handle drops.
    pub fn spawn(
        runner: Arc<dyn RequestRunner>,
        presenter: Arc<dyn Presenter>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let session = Session {
            runner,
            presenter,
            documents: HashMap::new(),
            last_issued: 0,
            completions_tx,
            completions_rx,
        };
        let join = tokio::spawn(session.run(events_rx));
        (SessionHandle { events: events_tx }, join)
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<Event>) {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(Event::Saved { document, text }) => self.on_saved(document, text),
                    Some(Event::Closed { document }) => self.on_closed(document).await,
                    Some(Event::Shutdown) | None => break,
                },
                Some(done) = self.completions_rx.recv() => self.on_completed(done).await,
            }
        }

        for slot in self.documents.values_mut() {
            if let Some(handle) = slot.in_flight.take() {
                handle.abort();
            }
        }
        debug!("session controller stopped");
    }

    fn on_saved(&mut self, document: DocumentId, text: String) {
        self.last_issued += 1;
        let sequence = self.last_issued;
        let slot = self.documents.entry(document.clone()).or_default();
        let superseded = slot.tracker.issue(sequence);
        if let Some(handle) = slot.in_flight.take() {
            handle.abort();
            if let Some(old) = superseded {
                debug!(%document, cancelled = old, by = sequence, "superseded request cancelled");
            }
        }

        let request = PipelineRequest {
            document_id: document,
            source_text: text,
            sequence,
        };
        let runner = Arc::clone(&self.runner);
        let completions = self.completions_tx.clone();
        slot.in_flight = Some(tokio::spawn(async move {
            let result = runner.run(&request).await;
            // The actor may already be gone; nothing is waiting for the result then.
            let _ = completions.send(Completion {
                document: request.document_id,
                sequence: request.sequence,
                result,
            });
        }));
    }

    async fn on_closed(&mut self, document: DocumentId) {
        if let Some(mut slot) = self.documents.remove(&document) {
            if let Some(seq) = slot.tracker.close() {
                debug!(%document, cancelled = seq, "request cancelled by close");
            }
            if let Some(handle) = slot.in_flight.take() {
                handle.abort();
            }
        }
        self.presenter.present(&document, Vec::new()).await;
    }

    async fn on_completed(&mut self, done: Completion) {
        let Some(slot) = self.documents.get_mut(&done.document) else {
            return;
        };
        match slot.tracker.complete(done.sequence) {
            Verdict::Discard => {
                debug!(document = %done.document, sequence = done.sequence, "stale result discarded");
            }
            Verdict::Present => {
                slot.in_flight = None;
                let diagnostics = match done.result {
                    Ok(diagnostics) => diagnostics.into_vec(),
                    Err(err) => {
                        warn!(document = %done.document, error = %err, "request failed");
                        vec![err.to_diagnostic()]
                    }
                };
                self.presenter.present(&done.document, diagnostics).await;
            }
        }
    }
}

// engine.rs — Validation engine: runs checking passes under the continuation policy
//
// Passes run in declaration order against one shared `ValidationState`.
// A structural failure stops the run only when a later pass depends on it;
// semantic passes always run once their structural prerequisites held, so a
// single run reports every independent finding.
//
// Preconditions: the pass list satisfies `pass::check_order`.
// Postconditions: `ValidationRun::overall_ok()` is true iff no diagnostic was
//   emitted; diagnostics appear in pass order, then in each pass's own order.
// Failure modes: none escape; a pass that errors or panics becomes an `E0002`
//   diagnostic attributed to that pass.
// Side effects: none.

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, trace};

use crate::checks;
use crate::diag::{codes, Diagnostic, DiagnosticSequence, DiagnosticSink, Position, SequenceSink};
use crate::module::{Header, IdTable, Instruction, Module};
use crate::pass::{self, has_dependents, PassDescriptor, PassId, PassOrderError};

// ── Validation state ───────────────────────────────────────────────────────

/// Artifacts built by structural passes, read by everything after them.
pub struct ValidationState<'m> {
    pub module: &'m Module,
    pub header: Option<Header>,
    pub instructions: Option<Vec<Instruction>>,
    pub ids: Option<IdTable>,
}

impl<'m> ValidationState<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            header: None,
            instructions: None,
            ids: None,
        }
    }

    pub fn header(&self) -> Result<&Header, PassFault> {
        self.header.as_ref().ok_or(PassFault::MissingArtifact("header"))
    }

    pub fn instructions(&self) -> Result<&[Instruction], PassFault> {
        self.instructions
            .as_deref()
            .ok_or(PassFault::MissingArtifact("instructions"))
    }

    pub fn ids(&self) -> Result<&IdTable, PassFault> {
        self.ids.as_ref().ok_or(PassFault::MissingArtifact("id table"))
    }
}

/// An internal failure inside a pass, as opposed to a finding about the module.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PassFault {
    #[error("{0} was not built by an earlier pass")]
    MissingArtifact(&'static str),
    #[error("{0}")]
    Internal(String),
}

// ── Check capability ───────────────────────────────────────────────────────

/// One checking pass. The rule set behind a pass is opaque to the engine.
pub trait Check: Send + Sync {
    fn descriptor(&self) -> PassDescriptor;

    /// Report findings into `out`. Returning `Err` means the pass itself broke.
    fn run(&self, state: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault>;
}

// ── Per-pass buffer ────────────────────────────────────────────────────────

/// Collects one pass's diagnostics and hands them to the run's sink when
/// dropped, whichever way the pass exits.
pub struct DiagBuffer<'s> {
    sink: &'s mut dyn DiagnosticSink,
    pending: Vec<Diagnostic>,
}

impl<'s> DiagBuffer<'s> {
    pub fn new(sink: &'s mut dyn DiagnosticSink) -> Self {
        Self {
            sink,
            pending: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Report an error-severity finding with a stable code.
    pub fn report(&mut self, code: crate::diag::DiagCode, position: Position, message: String) {
        self.pending
            .push(Diagnostic::error(position, message).with_code(code));
    }
}

impl DiagnosticSink for DiagBuffer<'_> {
    fn accept(&mut self, diagnostic: Diagnostic) {
        self.pending.push(diagnostic);
    }
}

impl Drop for DiagBuffer<'_> {
    fn drop(&mut self) {
        for diagnostic in self.pending.drain(..) {
            self.sink.accept(diagnostic);
        }
    }
}

// ── Run result ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Passed,
    Failed,
    /// Not run: a prerequisite did not pass.
    Skipped,
}

/// The frozen result of one `Engine::validate` call.
#[derive(Debug)]
pub struct ValidationRun {
    overall_ok: bool,
    diagnostics: Option<DiagnosticSequence>,
    aborted_at: Option<PassId>,
    outcomes: Vec<(PassId, PassOutcome)>,
    id_origins: BTreeMap<u32, u32>,
}

impl ValidationRun {
    pub fn overall_ok(&self) -> bool {
        self.overall_ok
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        match &self.diagnostics {
            Some(sequence) => sequence.as_slice(),
            None => &[],
        }
    }

    /// Move the sequence out; `None` for a clean run.
    pub fn into_sequence(self) -> Option<DiagnosticSequence> {
        self.diagnostics
    }

    /// The pass at which the run stopped early, if it did.
    pub fn aborted_at(&self) -> Option<PassId> {
        self.aborted_at
    }

    pub fn outcome(&self, id: PassId) -> Option<PassOutcome> {
        self.outcomes
            .iter()
            .find(|(pass, _)| *pass == id)
            .map(|(_, outcome)| *outcome)
    }

    pub fn outcomes(&self) -> &[(PassId, PassOutcome)] {
        &self.outcomes
    }

    /// Instruction that defines `id`, when the id table was built.
    pub fn id_origin(&self, id: u32) -> Option<u32> {
        self.id_origins.get(&id).copied()
    }

    /// Rewrite an `Id` position to the defining instruction where known.
    pub fn resolve(&self, position: Position) -> Position {
        match position {
            Position::Id(id) => self
                .id_origin(id)
                .map_or(position, Position::Instruction),
            other => other,
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────────────

pub struct Engine {
    checks: Vec<Box<dyn Check>>,
    descriptors: Vec<PassDescriptor>,
}

impl Engine {
    /// Build an engine over a caller-supplied pass list.
    pub fn new(checks: Vec<Box<dyn Check>>) -> Result<Self, PassOrderError> {
        let descriptors: Vec<PassDescriptor> = checks.iter().map(|c| c.descriptor()).collect();
        pass::check_order(&descriptors)?;
        Ok(Self {
            checks,
            descriptors,
        })
    }

    /// Engine with every built-in pass.
    pub fn builtin() -> Self {
        Self::from_ordered(checks::builtin(&pass::ALL_PASSES))
    }

    // The built-in list is `ALL_PASSES`, whose order is unit-tested.
    fn from_ordered(checks: Vec<Box<dyn Check>>) -> Self {
        let descriptors: Vec<PassDescriptor> = checks.iter().map(|c| c.descriptor()).collect();
        debug_assert_eq!(pass::check_order(&descriptors), Ok(()));
        Self {
            checks,
            descriptors,
        }
    }

    pub fn passes(&self) -> &[PassDescriptor] {
        &self.descriptors
    }

    /// Run every eligible pass over `module`.
    pub fn validate(&self, module: &Module) -> ValidationRun {
        let started = Instant::now();
        let mut sink = SequenceSink::new();
        let mut state = ValidationState::new(module);
        let mut outcomes: Vec<(PassId, PassOutcome)> = Vec::with_capacity(self.checks.len());
        let mut aborted_at = None;

        for (i, (check, desc)) in self.checks.iter().zip(&self.descriptors).enumerate() {
            let unmet = desc.inputs.iter().copied().find(|input| {
                !outcomes
                    .iter()
                    .any(|(id, outcome)| id == input && *outcome == PassOutcome::Passed)
            });

            if let Some(input) = unmet {
                if desc.structural {
                    debug!(pass = %desc.id, prerequisite = %input, "aborting: structural prerequisite unmet");
                    sink.accept(
                        Diagnostic::error(
                            Position::Unknown,
                            format!(
                                "validation aborted: pass `{}` requires `{}`, which did not succeed",
                                desc.id, input
                            ),
                        )
                        .with_code(codes::E0001),
                    );
                    aborted_at = Some(desc.id);
                    break;
                }
                trace!(pass = %desc.id, prerequisite = %input, "skipping semantic pass");
                outcomes.push((desc.id, PassOutcome::Skipped));
                continue;
            }

            let failed = run_check(check.as_ref(), desc, &mut state, &mut sink);
            outcomes.push((
                desc.id,
                if failed {
                    PassOutcome::Failed
                } else {
                    PassOutcome::Passed
                },
            ));

            if failed && desc.structural && has_dependents(&self.descriptors[i + 1..], desc.id) {
                debug!(pass = %desc.id, "structural pass failed with dependents; stopping");
                aborted_at = Some(desc.id);
                break;
            }
        }

        let id_origins = state.ids.as_ref().map(IdTable::origins).unwrap_or_default();
        let overall_ok = sink.is_empty();
        debug!(
            ok = overall_ok,
            diagnostics = sink.emitted(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "validation finished"
        );

        ValidationRun {
            overall_ok,
            diagnostics: sink.finish(),
            aborted_at,
            outcomes,
            id_origins,
        }
    }
}

/// Run one pass with its own buffer. Returns whether the pass emitted anything.
fn run_check(
    check: &dyn Check,
    desc: &PassDescriptor,
    state: &mut ValidationState<'_>,
    sink: &mut dyn DiagnosticSink,
) -> bool {
    let t = Instant::now();
    let mut buf = DiagBuffer::new(sink);

    let result = panic::catch_unwind(AssertUnwindSafe(|| check.run(state, &mut buf)));
    let fault = match result {
        Ok(Ok(())) => None,
        Ok(Err(fault)) => Some(fault.to_string()),
        Err(payload) => Some(panic_message(payload.as_ref())),
    };
    if let Some(detail) = fault {
        buf.accept(
            Diagnostic::error(
                Position::Unknown,
                format!("internal fault in pass `{}`: {}", desc.id, detail),
            )
            .with_code(codes::E0002),
        );
    }

    let emitted = buf.len();
    drop(buf);
    debug!(
        pass = %desc.id,
        emitted,
        elapsed_ms = t.elapsed().as_secs_f64() * 1000.0,
        "pass complete"
    );
    emitted > 0
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::Severity;

    /// Scripted pass: emits `emit` diagnostics, optionally faults or panics.
    struct Scripted {
        desc: PassDescriptor,
        emit: usize,
        fault: bool,
        panic: bool,
    }

    impl Check for Scripted {
        fn descriptor(&self) -> PassDescriptor {
            self.desc
        }

        fn run(&self, _: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault> {
            for n in 0..self.emit {
                out.report(
                    codes::V0200,
                    Position::Instruction(n as u32),
                    format!("{} finding {}", self.desc.id, n),
                );
            }
            if self.panic {
                panic!("boom in {}", self.desc.id);
            }
            if self.fault {
                return Err(PassFault::Internal("scripted fault".into()));
            }
            Ok(())
        }
    }

    fn scripted(id: &'static str, inputs: &'static [PassId], structural: bool, emit: usize) -> Box<dyn Check> {
        misbehaving(id, inputs, structural, emit, false, false)
    }

    fn misbehaving(
        id: &'static str,
        inputs: &'static [PassId],
        structural: bool,
        emit: usize,
        fault: bool,
        panic: bool,
    ) -> Box<dyn Check> {
        Box::new(Scripted {
            desc: PassDescriptor {
                id: PassId(id),
                inputs,
                structural,
            },
            emit,
            fault,
            panic,
        })
    }

    fn messages(run: &ValidationRun) -> Vec<String> {
        run.diagnostics().iter().map(|d| d.message().to_string()).collect()
    }

    const S1: PassId = PassId("s1");
    const S2: PassId = PassId("s2");

    #[test]
    fn clean_run_is_ok_and_empty() {
        let engine = Engine::new(vec![
            scripted("s1", &[], true, 0),
            scripted("a", &[S1], false, 0),
        ])
        .unwrap();
        let run = engine.validate(&Module::from_words(vec![]));
        assert!(run.overall_ok());
        assert!(run.diagnostics().is_empty());
        assert!(run.into_sequence().is_none());
    }

    #[test]
    fn semantic_failures_do_not_stop_siblings() {
        let engine = Engine::new(vec![
            scripted("s1", &[], true, 0),
            scripted("a", &[S1], false, 1),
            scripted("b", &[S1], false, 2),
            scripted("c", &[S1], false, 0),
        ])
        .unwrap();
        let run = engine.validate(&Module::from_words(vec![]));
        assert!(!run.overall_ok());
        assert_eq!(
            messages(&run),
            vec!["a finding 0", "b finding 0", "b finding 1"]
        );
        assert_eq!(run.outcome(PassId("c")), Some(PassOutcome::Passed));
        assert_eq!(run.aborted_at(), None);
    }

    #[test]
    fn structural_failure_with_dependents_stops_the_run() {
        let engine = Engine::new(vec![
            scripted("s1", &[], true, 1),
            scripted("a", &[S1], false, 1),
        ])
        .unwrap();
        let run = engine.validate(&Module::from_words(vec![]));
        assert_eq!(messages(&run), vec!["s1 finding 0"]);
        assert_eq!(run.aborted_at(), Some(S1));
        assert_eq!(run.outcome(PassId("a")), None);
    }

    #[test]
    fn structural_failure_without_dependents_continues() {
        let engine = Engine::new(vec![
            scripted("s1", &[], true, 0),
            scripted("s2", &[], true, 1),
            scripted("a", &[S1], false, 1),
        ])
        .unwrap();
        let run = engine.validate(&Module::from_words(vec![]));
        assert_eq!(messages(&run), vec!["s2 finding 0", "a finding 0"]);
        assert_eq!(run.aborted_at(), None);
        assert_eq!(run.outcome(S2), Some(PassOutcome::Failed));
    }

    #[test]
    fn structural_pass_with_missing_prerequisite_aborts_with_note() {
        let engine = Engine::new(vec![
            scripted("s1", &[], true, 0),
            scripted("s3", &[S2], true, 0),
            scripted("a", &[S1], false, 1),
        ])
        .unwrap();
        let run = engine.validate(&Module::from_words(vec![]));
        assert_eq!(run.diagnostics().len(), 1);
        let note = &run.diagnostics()[0];
        assert_eq!(note.code(), Some(codes::E0001));
        assert_eq!(note.position(), Position::Unknown);
        assert!(note.message().contains("`s3` requires `s2`"));
        assert_eq!(run.aborted_at(), Some(PassId("s3")));
    }

    #[test]
    fn semantic_pass_with_missing_prerequisite_is_skipped() {
        let engine = Engine::new(vec![
            scripted("s1", &[], true, 0),
            scripted("a", &[S2], false, 1),
            scripted("b", &[S1], false, 1),
        ])
        .unwrap();
        let run = engine.validate(&Module::from_words(vec![]));
        assert_eq!(messages(&run), vec!["b finding 0"]);
        assert_eq!(run.outcome(PassId("a")), Some(PassOutcome::Skipped));
    }

    #[test]
    fn fault_becomes_diagnostic_and_keeps_earlier_output() {
        let engine = Engine::new(vec![
            scripted("s1", &[], true, 0),
            misbehaving("faulty", &[S1], false, 1, true, false),
            scripted("b", &[S1], false, 1),
        ])
        .unwrap();
        let run = engine.validate(&Module::from_words(vec![]));
        let diags = run.diagnostics();
        assert_eq!(diags.len(), 3);
        assert_eq!(diags[0].message(), "faulty finding 0");
        assert_eq!(diags[1].code(), Some(codes::E0002));
        assert_eq!(diags[1].severity(), Severity::Error);
        assert!(diags[1].message().contains("scripted fault"));
        assert_eq!(diags[2].message(), "b finding 0");
    }

    #[test]
    fn panic_is_caught_at_the_pass_boundary() {
        let engine = Engine::new(vec![
            scripted("s1", &[], true, 0),
            misbehaving("panicky", &[S1], false, 2, false, true),
            scripted("b", &[S1], false, 0),
        ])
        .unwrap();
        let run = engine.validate(&Module::from_words(vec![]));
        let diags = run.diagnostics();
        // Findings buffered before the panic are still flushed, then the fault.
        assert_eq!(diags.len(), 3);
        assert!(diags[2].message().contains("boom in panicky"));
        assert_eq!(run.outcome(PassId("b")), Some(PassOutcome::Passed));
    }

    #[test]
    fn misordered_pass_list_is_rejected() {
        let result = Engine::new(vec![
            scripted("a", &[S1], false, 0),
            scripted("s1", &[], true, 0),
        ]);
        assert!(matches!(result, Err(PassOrderError::InputAfter { .. })));
    }

    #[test]
    fn buffer_flushes_on_drop() {
        let mut sink = SequenceSink::new();
        {
            let mut buf = DiagBuffer::new(&mut sink);
            buf.report(codes::V0200, Position::Id(7), "undefined id %7".into());
            assert_eq!(buf.len(), 1);
        }
        assert_eq!(sink.emitted(), 1);
    }
}

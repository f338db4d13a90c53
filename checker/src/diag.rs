// diag.rs — Diagnostic records, the append-only sequence, and the sink contract
//
// Every validation pass reports through a `DiagnosticSink`. The sink the engine
// hands to passes (`SequenceSink`) creates a `DiagnosticSequence` on the first
// emission and appends on every later one, so no finding is ever overwritten.
//
// Preconditions: none (types only).
// Postconditions: a sequence preserves emission order; records never change.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `S0003`, `V0200`).
///
/// The leading letter names the origin: `S` structural passes, `V` semantic
/// passes, `E` diagnostics synthesized by the engine itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl DiagCode {
    /// Structural findings, plus the engine's abort note that stands in for one.
    pub fn is_structural(&self) -> bool {
        self.0.starts_with('S') || *self == codes::E0001
    }
}

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable diagnostic codes. Once assigned, a code keeps its meaning.
pub mod codes {
    use super::DiagCode;

    // header
    pub const S0001: DiagCode = DiagCode("S0001"); // byte stream not word aligned
    pub const S0002: DiagCode = DiagCode("S0002"); // header truncated
    pub const S0003: DiagCode = DiagCode("S0003"); // bad magic number
    pub const S0004: DiagCode = DiagCode("S0004"); // unsupported version word
    pub const S0005: DiagCode = DiagCode("S0005"); // zero id bound
    pub const S0006: DiagCode = DiagCode("S0006"); // non-zero schema

    // layout
    pub const S0100: DiagCode = DiagCode("S0100"); // zero word count
    pub const S0101: DiagCode = DiagCode("S0101"); // instruction overruns stream

    // ids
    pub const S0200: DiagCode = DiagCode("S0200"); // operands do not match opcode shape
    pub const S0202: DiagCode = DiagCode("S0202"); // result id zero or out of bound
    pub const S0203: DiagCode = DiagCode("S0203"); // id defined twice

    // logical_layout
    pub const V0100: DiagCode = DiagCode("V0100"); // section order
    pub const V0101: DiagCode = DiagCode("V0101"); // memory model count
    pub const V0102: DiagCode = DiagCode("V0102"); // no capability

    // id_refs
    pub const V0200: DiagCode = DiagCode("V0200"); // undefined id
    pub const V0201: DiagCode = DiagCode("V0201"); // opcode not recognised

    // types
    pub const V0300: DiagCode = DiagCode("V0300"); // result type is not a type
    pub const V0301: DiagCode = DiagCode("V0301"); // operand type mismatch
    pub const V0302: DiagCode = DiagCode("V0302"); // pointer operand is not a pointer

    // entry_points
    pub const V0400: DiagCode = DiagCode("V0400"); // target is not a function
    pub const V0401: DiagCode = DiagCode("V0401"); // duplicate entry point

    // control_flow
    pub const V0500: DiagCode = DiagCode("V0500"); // function never closed
    pub const V0501: DiagCode = DiagCode("V0501"); // instruction outside a block
    pub const V0502: DiagCode = DiagCode("V0502"); // block not terminated
    pub const V0503: DiagCode = DiagCode("V0503"); // nested function
    pub const V0504: DiagCode = DiagCode("V0504"); // OpFunctionEnd without OpFunction

    // engine
    pub const E0001: DiagCode = DiagCode("E0001"); // aborted on unmet structural prerequisite
    pub const E0002: DiagCode = DiagCode("E0002"); // internal fault inside a pass
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Position ─────────────────────────────────────────────────────────────

/// Where a diagnostic points.
///
/// Validation reports module-relative positions (`Instruction`, `Id`); the
/// request pipeline translates those into `Source` positions. Lines and
/// columns are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Position {
    Unknown,
    Instruction(u32),
    Id(u32),
    Source { line: u32, column: u32 },
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::Unknown => write!(f, "module"),
            Position::Instruction(index) => write!(f, "instruction {index}"),
            Position::Id(id) => write!(f, "id %{id}"),
            Position::Source { line, column } => write!(f, "{line}:{column}"),
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// One reported issue. Immutable once emitted: fields are only readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Diagnostic {
    severity: Severity,
    position: Position,
    message: String,
    code: Option<DiagCode>,
}

impl Diagnostic {
    pub fn new(severity: Severity, position: Position, message: impl Into<String>) -> Self {
        Self {
            severity,
            position,
            message: message.into(),
            code: None,
        }
    }

    pub fn error(position: Position, message: impl Into<String>) -> Self {
        Self::new(Severity::Error, position, message)
    }

    pub fn warning(position: Position, message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, position, message)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn code(&self) -> Option<DiagCode> {
        self.code
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{}[{}]: ", self.severity, code)?,
            None => write!(f, "{}: ", self.severity)?,
        }
        write!(f, "{}: {}", self.position, self.message)
    }
}

// ── Sequence ─────────────────────────────────────────────────────────────

/// Ordered, append-only collection of diagnostics owned by one validation run.
///
/// A sequence always holds at least one record: it is created from the first
/// emission. Dropping the sequence releases every record it owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticSequence {
    records: Vec<Diagnostic>,
}

impl DiagnosticSequence {
    pub fn create(first: Diagnostic) -> Self {
        Self {
            records: vec![first],
        }
    }

    /// Append a record after every record already held.
    pub fn append(&mut self, next: Diagnostic) {
        self.records.push(next);
    }

    /// Copy of the records in emission order; the sequence is left intact.
    pub fn to_ordered_list(&self) -> Vec<Diagnostic> {
        self.records.clone()
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Diagnostic> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.records
    }
}

impl<'a> IntoIterator for &'a DiagnosticSequence {
    type Item = &'a Diagnostic;
    type IntoIter = std::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

// ── Sink ─────────────────────────────────────────────────────────────────

/// Write side of diagnostic collection.
///
/// Implementations must accept any number of calls; every call adds a record.
pub trait DiagnosticSink {
    fn accept(&mut self, diagnostic: Diagnostic);

    fn emit(&mut self, severity: Severity, position: Position, message: String) {
        self.accept(Diagnostic::new(severity, position, message));
    }
}

impl DiagnosticSink for Vec<Diagnostic> {
    fn accept(&mut self, diagnostic: Diagnostic) {
        self.push(diagnostic);
    }
}

/// The engine's sink: first call constructs the sequence, later calls append.
#[derive(Debug, Default)]
pub struct SequenceSink {
    sequence: Option<DiagnosticSequence>,
}

impl SequenceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emitted(&self) -> usize {
        self.sequence.as_ref().map_or(0, DiagnosticSequence::len)
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_none()
    }

    /// Freeze the collected records. `None` when nothing was emitted.
    pub fn finish(self) -> Option<DiagnosticSequence> {
        self.sequence
    }
}

impl DiagnosticSink for SequenceSink {
    fn accept(&mut self, diagnostic: Diagnostic) {
        match &mut self.sequence {
            Some(sequence) => sequence.append(diagnostic),
            None => self.sequence = Some(DiagnosticSequence::create(diagnostic)),
        }
    }
}

// pipeline.rs — Request pipeline: assemble, gate, validate, source-map, dedupe
//
// One `run` turns a document's source text into the ordered list of
// diagnostics to present. Findings are data; only tool-level failures are
// `PipelineError`s.
//
// Preconditions: none.
// Postconditions: on success, diagnostics are in emission order (syntax
//   errors, or validator order) with exact duplicates collapsed.
// Failure modes: `PipelineError` when a tool is missing, crashes, times out
//   or speaks an unreadable protocol, or the temp directory cannot be made.
// Side effects: creates one private temp directory per request and removes
//   it on every exit path, including the future being dropped mid-run.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ConfigError, PipelineConfig};
use crate::diag::Severity;
use crate::report::{ReportedDiagnostic, ValidationReport};
use crate::srcmap::{Location, SourceMap};
use crate::tool::{
    AssembleOutcome, Assembler, ProcessAssembler, ProcessValidator, SyntaxDiagnostic, ToolError,
    Validator,
};

// ── Requests and results ───────────────────────────────────────────────────

/// Identifies an open document (a URI in the language server).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub document_id: DocumentId,
    pub source_text: String,
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Syntax,
    Structural,
    Semantic,
    /// The tool broke, not the code.
    Tool,
}

/// A diagnostic in source coordinates, ready for presentation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedDiagnostic {
    pub severity: Severity,
    /// `None` for document-level diagnostics.
    pub location: Option<Location>,
    pub message: String,
    pub kind: DiagnosticKind,
    pub code: Option<String>,
}

impl NormalizedDiagnostic {
    pub fn line(&self) -> Option<u32> {
        self.location.map(|l| l.line)
    }
}

impl fmt::Display for NormalizedDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = self.location {
            write!(f, "{location}: ")?;
        }
        write!(f, "{}", self.severity)?;
        if let Some(code) = &self.code {
            write!(f, "[{code}]")?;
        }
        write!(f, ": {}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedDiagnostics {
    pub document_id: DocumentId,
    pub sequence: u64,
    diagnostics: Vec<NormalizedDiagnostic>,
}

impl NormalizedDiagnostics {
    pub fn new(document_id: DocumentId, sequence: u64, diagnostics: Vec<NormalizedDiagnostic>) -> Self {
        Self {
            document_id,
            sequence,
            diagnostics,
        }
    }

    pub fn as_slice(&self) -> &[NormalizedDiagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn into_vec(self) -> Vec<NormalizedDiagnostic> {
        self.diagnostics
    }
}

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error("cannot create a temporary directory: {0}")]
    TempDir(#[source] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// The single document-level diagnostic a failed request presents.
    pub fn to_diagnostic(&self) -> NormalizedDiagnostic {
        NormalizedDiagnostic {
            severity: Severity::Error,
            location: None,
            message: format!("spvcheck could not check this document: {self}"),
            kind: DiagnosticKind::Tool,
            code: None,
        }
    }
}

// ── Pipeline ───────────────────────────────────────────────────────────────

/// Runs one request end to end. Implemented by `Pipeline`; the session
/// controller only needs this seam.
#[async_trait]
pub trait RequestRunner: Send + Sync {
    async fn run(&self, request: &PipelineRequest) -> Result<NormalizedDiagnostics, PipelineError>;
}

pub struct Pipeline {
    assembler: Arc<dyn Assembler>,
    validator: Arc<dyn Validator>,
    temp_root: Option<PathBuf>,
}

impl Pipeline {
    pub fn new(assembler: Arc<dyn Assembler>, validator: Arc<dyn Validator>) -> Self {
        Self {
            assembler,
            validator,
            temp_root: None,
        }
    }

    /// Create per-request directories under `root` instead of system temp.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Process-backed pipeline. Tool presence is checked per request, so a
    /// missing tool surfaces as a diagnostic rather than failing here.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let assembler = ProcessAssembler::new(&config.assembler, config.timeout());
        let validator = ProcessValidator::from_config(config)?;
        let mut pipeline = Self::new(Arc::new(assembler), Arc::new(validator));
        pipeline.temp_root = config.temp_dir.clone();
        Ok(pipeline)
    }

    pub async fn run(&self, request: &PipelineRequest) -> Result<NormalizedDiagnostics, PipelineError> {
        let started = Instant::now();
        let workdir = match &self.temp_root {
            Some(root) => tempfile::Builder::new().prefix("spvcheck-").tempdir_in(root),
            None => tempfile::Builder::new().prefix("spvcheck-").tempdir(),
        }
        .map_err(PipelineError::TempDir)?;

        debug!(
            document = %request.document_id,
            sequence = request.sequence,
            workdir = %workdir.path().display(),
            "assembling"
        );
        let diagnostics = match self
            .assembler
            .assemble(&request.source_text, workdir.path())
            .await?
        {
            AssembleOutcome::Rejected(syntax) => {
                debug!(errors = syntax.len(), "assembly rejected; validation skipped");
                syntax.into_iter().map(from_syntax).collect()
            }
            AssembleOutcome::Assembled { artifact } => {
                let report = self.validator.validate(&artifact).await?;
                let map = SourceMap::build(&request.source_text);
                map_report(&report, &map)
            }
        };

        let diagnostics = dedupe(diagnostics);
        info!(
            document = %request.document_id,
            sequence = request.sequence,
            diagnostics = diagnostics.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "request complete"
        );
        Ok(NormalizedDiagnostics {
            document_id: request.document_id.clone(),
            sequence: request.sequence,
            diagnostics,
        })
    }
}

#[async_trait]
impl RequestRunner for Pipeline {
    async fn run(&self, request: &PipelineRequest) -> Result<NormalizedDiagnostics, PipelineError> {
        Pipeline::run(self, request).await
    }
}

// ── Stages ─────────────────────────────────────────────────────────────────

fn from_syntax(syntax: SyntaxDiagnostic) -> NormalizedDiagnostic {
    NormalizedDiagnostic {
        severity: Severity::Error,
        location: Some(Location {
            line: syntax.line,
            column: syntax.column,
        }),
        message: syntax.message,
        kind: DiagnosticKind::Syntax,
        code: None,
    }
}

/// Translate report positions into source coordinates.
///
/// The reported instruction maps to that instruction's start; without one, a
/// quoted id maps to its definition; otherwise the diagnostic is
/// document-level.
pub fn map_report(report: &ValidationReport, map: &SourceMap) -> Vec<NormalizedDiagnostic> {
    report
        .diagnostics
        .iter()
        .map(|d| NormalizedDiagnostic {
            severity: d.severity,
            location: locate(d, map),
            message: d.message.clone(),
            kind: if d.structural {
                DiagnosticKind::Structural
            } else {
                DiagnosticKind::Semantic
            },
            code: d.code.clone(),
        })
        .collect()
}

fn locate(d: &ReportedDiagnostic, map: &SourceMap) -> Option<Location> {
    d.instruction
        .and_then(|index| map.instruction(index))
        .or_else(|| d.name.as_deref().and_then(|name| map.definition(name)))
}

/// Collapse exact duplicates (severity, location, message), keeping the first.
pub fn dedupe(diagnostics: Vec<NormalizedDiagnostic>) -> Vec<NormalizedDiagnostic> {
    let mut seen = HashSet::new();
    diagnostics
        .into_iter()
        .filter(|d| seen.insert((d.severity, d.location, d.message.clone())))
        .collect()
}

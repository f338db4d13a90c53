// report.rs — Validator report: the wire form of one validation run
//
// `spvcheck validate --format json` prints a `ValidationReport`; the pipeline
// reads it back from the validating process. `parse_spirv_val` builds the
// same report from `spirv-val`'s text output.
//
// Preconditions: none.
// Postconditions: report diagnostics keep the run's emission order; `Id`
//   positions are resolved to their defining instruction where known.
// Failure modes: none; unparseable text lines are ignored.
// Side effects: none.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::diag::{Position, Severity};
use crate::engine::ValidationRun;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    #[serde(default)]
    pub aborted_at: Option<String>,
    #[serde(default)]
    pub diagnostics: Vec<ReportedDiagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedDiagnostic {
    pub severity: Severity,
    #[serde(default)]
    pub code: Option<String>,
    /// Found by a structural pass (or the engine aborting on one).
    #[serde(default)]
    pub structural: bool,
    /// Instruction index, 0 = first instruction after the header.
    #[serde(default)]
    pub instruction: Option<u32>,
    /// Id the finding is about, when it names one.
    #[serde(default)]
    pub id: Option<u32>,
    /// Source-level name of that id (`%main`), when the validator knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub message: String,
}

impl ValidationReport {
    pub fn valid() -> Self {
        Self {
            ok: true,
            aborted_at: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn from_run(run: &ValidationRun) -> Self {
        let diagnostics = run
            .diagnostics()
            .iter()
            .map(|d| {
                let id = match d.position() {
                    Position::Id(id) => Some(id),
                    _ => None,
                };
                let instruction = match run.resolve(d.position()) {
                    Position::Instruction(index) => Some(index),
                    _ => None,
                };
                ReportedDiagnostic {
                    severity: d.severity(),
                    code: d.code().map(|c| c.to_string()),
                    structural: d.code().is_some_and(|c| c.is_structural()),
                    instruction,
                    id,
                    name: None,
                    message: d.message().to_string(),
                }
            })
            .collect();
        Self {
            ok: run.overall_ok(),
            aborted_at: run.aborted_at().map(|p| p.to_string()),
            diagnostics,
        }
    }

    /// Human-readable form, one line per diagnostic plus a summary.
    pub fn render_text(&self, path: &str) -> String {
        let mut out = String::new();
        for d in &self.diagnostics {
            let _ = write!(out, "{}: {}", path, d.severity);
            if let Some(code) = &d.code {
                let _ = write!(out, "[{code}]");
            }
            match (d.instruction, d.id) {
                (Some(index), _) => {
                    let _ = write!(out, ": instruction {index}");
                }
                (None, Some(id)) => {
                    let _ = write!(out, ": id %{id}");
                }
                (None, None) => {}
            }
            let _ = writeln!(out, ": {}", d.message);
        }
        if self.ok {
            let _ = writeln!(out, "{path}: module is valid");
        } else {
            let noun = if self.diagnostics.len() == 1 { "diagnostic" } else { "diagnostics" };
            let _ = write!(out, "{path}: {} {noun}", self.diagnostics.len());
            if let Some(pass) = &self.aborted_at {
                let _ = write!(out, "; validation stopped after pass `{pass}`");
            }
            out.push('\n');
        }
        out
    }
}

// ── spirv-val text protocol ────────────────────────────────────────────────

/// `error: line N: message`; the line number is optional.
static MESSAGE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:internal )?(error|warning|info)(?::\s*line\s+(\d+))?:\s*(.*)$")
        .expect("spirv-val message pattern is valid")
});

/// `'7[%name]'` id references inside a message.
static ID_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(\d+)\[(%[^\]]+)\]'").expect("id reference pattern is valid"));

/// Build a report from `spirv-val` output.
///
/// `line N` counts instructions from 1; 0 (or no line at all) means the
/// finding has no instruction. The first `'N[%name]'` reference in a message
/// supplies `id` and `name`. Indented follow-up lines (the disassembled
/// instruction) are skipped.
pub fn parse_spirv_val(output: &str) -> ValidationReport {
    let mut diagnostics = Vec::new();
    for line in output.lines() {
        let Some(caps) = MESSAGE_LINE.captures(line) else {
            continue;
        };
        let severity = match &caps[1] {
            "warning" => Severity::Warning,
            "info" => Severity::Info,
            _ => Severity::Error,
        };
        let instruction = caps
            .get(2)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .and_then(|n| n.checked_sub(1));
        let message = caps[3].trim().to_string();
        let (id, name) = match ID_REFERENCE.captures(&message) {
            Some(r) => (r[1].parse().ok(), Some(r[2].to_string())),
            None => (None, None),
        };
        diagnostics.push(ReportedDiagnostic {
            severity,
            code: None,
            structural: false,
            instruction,
            id,
            name,
            message,
        });
    }
    ValidationReport {
        ok: diagnostics.is_empty(),
        aborted_at: None,
        diagnostics,
    }
}

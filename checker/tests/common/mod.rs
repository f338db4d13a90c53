//
// common/mod.rs — Shared fixtures for the integration tests
//
// A miniature assembler built on the crate's own lexer and opcode table, so
// pipeline tests run without `spirv-as` installed, plus in-memory doubles for
// the assembling and validating capabilities, the request runner and the
// presenter.
//
// Id numbering: `%<digits>` keeps its number; every other name gets the next
// free id above the largest numeric one, in order of first appearance.
//

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spvcheck::diag::Severity;
use spvcheck::lexer::{self, LineIndex, Span, Token};
use spvcheck::module::{Module, ModuleBuilder};
use spvcheck::opcode;
use spvcheck::pipeline::{
    DiagnosticKind, DocumentId, NormalizedDiagnostic, NormalizedDiagnostics, Pipeline,
    PipelineError, PipelineRequest, RequestRunner,
};
use spvcheck::report::ValidationReport;
use spvcheck::session::Presenter;
use spvcheck::tool::{
    AssembleOutcome, Assembler, InProcessValidator, SyntaxDiagnostic, ToolError, Validator,
    ARTIFACT_FILE,
};

// ── Sources ────────────────────────────────────────────────────────────────

/// A small compute shader that validates cleanly.
pub const VALID: &str = "\
OpCapability Shader
OpMemoryModel Logical GLSL450
OpEntryPoint GLCompute %main \"main\"
%void = OpTypeVoid
%fn = OpTypeFunction %void
%int = OpTypeInt 32 1
%one = OpConstant %int 1
%main = OpFunction %void None %fn
%entry = OpLabel
%two = OpIAdd %int %one %one
OpReturn
OpFunctionEnd
";

/// Two independent semantic faults: `%7` is never defined (line 12) and
/// `%9` adds an int to a float (line 13).
pub const TWO_FAULTS: &str = "\
OpCapability Shader
OpMemoryModel Logical GLSL450
OpEntryPoint GLCompute %1 \"main\"
%2 = OpTypeVoid
%3 = OpTypeFunction %2
%4 = OpTypeInt 32 1
%5 = OpTypeFloat 32
%6 = OpConstant %4 1
%8 = OpConstant %5 2.5
%1 = OpFunction %2 None %3
%10 = OpLabel
%11 = OpIAdd %4 %6 %7
%9 = OpIAdd %4 %6 %8
OpReturn
OpFunctionEnd
";

// ── Mini assembler ─────────────────────────────────────────────────────────

const ENUMERANTS: &[(&str, u32)] = &[
    ("Shader", 1),
    ("Kernel", 6),
    ("Logical", 0),
    ("Physical32", 1),
    ("Physical64", 2),
    ("OpenCL", 2),
    ("OpenCL_C", 3),
    ("Simple", 0),
    ("GLSL450", 1),
    ("Vertex", 0),
    ("Fragment", 4),
    ("GLCompute", 5),
    ("None", 0),
    ("Inline", 1),
    ("DontInline", 2),
    ("Pure", 4),
    ("Const", 8),
    ("UniformConstant", 0),
    ("Input", 1),
    ("Uniform", 2),
    ("Output", 3),
    ("Private", 6),
    ("Function", 7),
    ("OriginUpperLeft", 7),
    ("LocalSize", 17),
];

struct Ids {
    named: HashMap<String, u32>,
    next: u32,
}

impl Ids {
    fn new(source: &str, tokens: &[(Token, Span)]) -> Self {
        let max_numeric = tokens
            .iter()
            .filter(|(t, _)| *t == Token::Id)
            .filter_map(|(_, s)| source[s.start + 1..s.end].parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        Self {
            named: HashMap::new(),
            next: max_numeric + 1,
        }
    }

    fn get(&mut self, name: &str) -> u32 {
        if let Ok(n) = name[1..].parse::<u32>() {
            return n;
        }
        if let Some(&id) = self.named.get(name) {
            return id;
        }
        let id = self.next;
        self.next += 1;
        self.named.insert(name.to_string(), id);
        id
    }
}

fn number(text: &str) -> Option<u32> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        return u32::from_str_radix(hex, 16).ok();
    }
    if text.contains(|c| matches!(c, '.' | 'e' | 'E')) {
        return text.parse::<f32>().ok().map(f32::to_bits);
    }
    text.parse::<i64>().ok().map(|v| v as u32)
}

fn slice<'a>(source: &'a str, span: &Span) -> &'a str {
    &source[span.start..span.end]
}

fn starts_statement(source: &str, tokens: &[(Token, Span)], i: usize) -> bool {
    match &tokens[i] {
        (Token::Id, _) => matches!(tokens.get(i + 1), Some((Token::Equals, _))),
        (token, span) => token.is_opcode(&source[span.start..span.end]),
    }
}

/// Assemble SPIR-V assembly text, stopping at the first error the way
/// `spirv-as` does.
pub fn assemble(source: &str) -> Result<Module, SyntaxDiagnostic> {
    let index = LineIndex::new(source);
    let error = |offset: usize, message: String| {
        let (line, column) = index.line_col(offset);
        SyntaxDiagnostic {
            line,
            column,
            message,
        }
    };

    let lexed = lexer::lex(source);
    if let Some(err) = lexed.errors.first() {
        return Err(error(err.span.start, err.message.clone()));
    }
    let tokens = lexed.tokens;
    let text = |span: &Span| slice(source, span);
    let mut ids = Ids::new(source, &tokens);
    let mut builder = ModuleBuilder::new();

    let mut i = 0;
    while i < tokens.len() {
        let start = tokens[i].1;
        let mut result = None;
        if tokens[i].0 == Token::Id {
            if !matches!(tokens.get(i + 1), Some((Token::Equals, _))) {
                return Err(error(start.start, format!("Expected <opcode> or <result-id> at the beginning of an instruction, found '{}'.", text(&start))));
            }
            result = Some(ids.get(text(&start)));
            i += 2;
        }

        let Some((token, op_span)) = tokens.get(i) else {
            return Err(error(source.len(), "Expected opcode, found end of stream.".into()));
        };
        let name = text(op_span);
        if !token.is_opcode(name) {
            return Err(error(op_span.start, format!("Invalid Opcode prefix '{name}'.")));
        }
        let Some(info) = opcode::by_name(name) else {
            return Err(error(op_span.start, format!("Invalid Opcode name '{name}'")));
        };
        i += 1;

        let mut words = Vec::new();
        let mut or_next = false;
        while i < tokens.len() && !starts_statement(source, &tokens, i) {
            let (token, span) = &tokens[i];
            i += 1;
            let operand = text(span);
            let value = match token {
                Token::Id => vec![ids.get(operand)],
                Token::Number => vec![number(operand)
                    .ok_or_else(|| error(span.start, format!("Invalid number '{operand}'")))?],
                Token::Immediate => vec![number(&operand[1..])
                    .ok_or_else(|| error(span.start, format!("Invalid immediate '{operand}'")))?],
                Token::Word => {
                    let Some(&(_, value)) = ENUMERANTS.iter().find(|(n, _)| *n == operand) else {
                        return Err(error(span.start, format!("Invalid operand '{operand}'")));
                    };
                    vec![value]
                }
                Token::StringLit(s) => opcode::encode_string(s),
                Token::Pipe => {
                    or_next = true;
                    continue;
                }
                Token::Equals => {
                    return Err(error(span.start, "Unexpected '='.".into()));
                }
            };
            if or_next {
                if let Some(last) = words.last_mut() {
                    *last |= value[0];
                }
            } else {
                words.extend(value);
            }
            or_next = false;
        }

        let operands = match (info.has_result, result) {
            (true, None) => {
                return Err(error(
                    op_span.start,
                    format!("Expected <result-id> at the beginning of an instruction, found '{name}'."),
                ))
            }
            (false, Some(_)) => {
                return Err(error(
                    start.start,
                    format!("Cannot set ID {} because {name} does not produce a result ID.", text(&start)),
                ))
            }
            (true, Some(result)) if info.has_result_type => {
                if words.is_empty() {
                    return Err(error(op_span.start, format!("Expected operand for {name} instruction, but found the next instruction instead.")));
                }
                let mut all = vec![words[0], result];
                all.extend_from_slice(&words[1..]);
                all
            }
            (true, Some(result)) => {
                let mut all = vec![result];
                all.extend(words);
                all
            }
            (false, None) => words,
        };
        builder = builder.inst(info.opcode, &operands);
    }

    Ok(builder.bound(ids.next).build())
}

// ── Tool doubles ───────────────────────────────────────────────────────────

/// `Assembler` backed by `assemble`; records every workdir it was handed.
#[derive(Default)]
pub struct FakeAssembler {
    calls: AtomicUsize,
    workdirs: Mutex<Vec<PathBuf>>,
    delay: Option<Duration>,
}

impl FakeAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn workdirs(&self) -> Vec<PathBuf> {
        self.workdirs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Assembler for FakeAssembler {
    async fn assemble(&self, source: &str, workdir: &Path) -> Result<AssembleOutcome, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.workdirs.lock().unwrap().push(workdir.to_path_buf());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match assemble(source) {
            Err(syntax) => Ok(AssembleOutcome::Rejected(vec![syntax])),
            Ok(module) => {
                let artifact = workdir.join(ARTIFACT_FILE);
                tokio::fs::write(&artifact, module.to_bytes())
                    .await
                    .map_err(|source| ToolError::Io {
                        tool: "assembler",
                        source,
                    })?;
                Ok(AssembleOutcome::Assembled { artifact })
            }
        }
    }
}

/// The in-process validator, counting how often it is asked.
#[derive(Default)]
pub struct CountingValidator {
    inner: InProcessValidator,
    calls: AtomicUsize,
}

impl CountingValidator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Validator for CountingValidator {
    async fn validate(&self, artifact: &Path) -> Result<ValidationReport, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.validate(artifact).await
    }
}

/// Returns the same report (or failure) for every module.
pub enum FixedValidator {
    Report(ValidationReport),
    Fail,
}

#[async_trait]
impl Validator for FixedValidator {
    async fn validate(&self, _artifact: &Path) -> Result<ValidationReport, ToolError> {
        match self {
            FixedValidator::Report(report) => Ok(report.clone()),
            FixedValidator::Fail => Err(ToolError::Failed {
                tool: "validator",
                status: "exit status: 134".into(),
                detail: "Aborted".into(),
            }),
        }
    }
}

pub fn fake_pipeline(temp_root: &Path) -> (Pipeline, Arc<FakeAssembler>, Arc<CountingValidator>) {
    let assembler = Arc::new(FakeAssembler::new());
    let validator = Arc::new(CountingValidator::default());
    let pipeline = Pipeline::new(assembler.clone(), validator.clone()).with_temp_root(temp_root);
    (pipeline, assembler, validator)
}

pub fn request(source: &str) -> PipelineRequest {
    PipelineRequest {
        document_id: DocumentId::from("file:///shader.spvasm"),
        source_text: source.to_string(),
        sequence: 1,
    }
}

/// Entries left under a temp root.
pub fn leftovers(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

// ── Session doubles ────────────────────────────────────────────────────────

/// Request runner driven by the document text.
///
/// `sleep <ms>` on the first line delays completion; a line reading `fail`
/// makes the request fail as a tool error. On success the result is a single
/// diagnostic whose message is the text's last line.
#[derive(Default)]
pub struct ScriptedRunner {
    started: Mutex<Vec<(DocumentId, u64)>>,
    finished: AtomicUsize,
}

impl ScriptedRunner {
    pub fn started(&self) -> Vec<(DocumentId, u64)> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestRunner for ScriptedRunner {
    async fn run(&self, request: &PipelineRequest) -> Result<NormalizedDiagnostics, PipelineError> {
        self.started
            .lock()
            .unwrap()
            .push((request.document_id.clone(), request.sequence));
        let text = &request.source_text;
        let delay = text
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("sleep "))
            .and_then(|ms| ms.trim().parse().ok())
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.finished.fetch_add(1, Ordering::SeqCst);

        if text.lines().any(|l| l.trim() == "fail") {
            return Err(PipelineError::Tool(ToolError::Timeout {
                tool: "assembler",
                after: Duration::from_millis(delay),
            }));
        }
        Ok(NormalizedDiagnostics::new(
            request.document_id.clone(),
            request.sequence,
            vec![NormalizedDiagnostic {
                severity: Severity::Error,
                location: None,
                message: text.lines().last().unwrap_or_default().to_string(),
                kind: DiagnosticKind::Semantic,
                code: None,
            }],
        ))
    }
}

/// Records every presentation in order.
#[derive(Default)]
pub struct RecordingPresenter {
    presented: Mutex<Vec<(DocumentId, Vec<NormalizedDiagnostic>)>>,
}

impl RecordingPresenter {
    pub fn presented(&self) -> Vec<(DocumentId, Vec<NormalizedDiagnostic>)> {
        self.presented.lock().unwrap().clone()
    }

    /// Messages presented for `document`, one entry per presentation.
    pub fn messages_for(&self, document: &str) -> Vec<Vec<String>> {
        self.presented()
            .into_iter()
            .filter(|(d, _)| d.0 == document)
            .map(|(_, list)| list.into_iter().map(|d| d.message).collect())
            .collect()
    }
}

#[async_trait]
impl Presenter for RecordingPresenter {
    async fn present(&self, document: &DocumentId, diagnostics: Vec<NormalizedDiagnostic>) {
        self.presented
            .lock()
            .unwrap()
            .push((document.clone(), diagnostics));
    }
}

// ── Scripts ────────────────────────────────────────────────────────────────

/// Write an executable `/bin/sh` script into `dir`.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Assemble `source` with the mini assembler and write the binary to `path`.
pub fn write_module(source: &str, path: &Path) {
    let module = assemble(source).unwrap();
    std::fs::write(path, module.to_bytes()).unwrap();
}

// tool.rs — Assembling and validating capabilities
//
// The pipeline talks to both tools through async traits. Process-backed
// implementations run one child per call with `kill_on_drop`, so dropping a
// request future terminates its child; every call is bounded by a timeout.
//
// Preconditions: `workdir` exists and is private to the calling request.
// Postconditions: `assemble` returns either a module artifact inside
//   `workdir` or the assembler's syntax diagnostics.
// Failure modes: `ToolError` for missing/crashed/timed-out tools and
//   unreadable output; findings are never errors.
// Side effects: writes into `workdir`, spawns child processes.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{PipelineConfig, ValidatorProtocol};
use crate::engine::Engine;
use crate::module::Module;
use crate::report::{self, ValidationReport};

pub const SOURCE_FILE: &str = "module.spvasm";
pub const ARTIFACT_FILE: &str = "module.spv";

// ── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{tool} `{}` was not found", program.display())]
    Missing { tool: &'static str, program: PathBuf },
    #[error("failed to start {tool} `{}`: {source}", program.display())]
    Spawn {
        tool: &'static str,
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} timed out after {} ms", after.as_millis())]
    Timeout { tool: &'static str, after: Duration },
    #[error("{tool} failed ({status}): {detail}")]
    Failed {
        tool: &'static str,
        status: String,
        detail: String,
    },
    #[error("{tool} produced unreadable output: {detail}")]
    Protocol { tool: &'static str, detail: String },
    #[error("{tool}: {source}")]
    Io {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn tool(&self) -> &'static str {
        match self {
            ToolError::Missing { tool, .. }
            | ToolError::Spawn { tool, .. }
            | ToolError::Timeout { tool, .. }
            | ToolError::Failed { tool, .. }
            | ToolError::Protocol { tool, .. }
            | ToolError::Io { tool, .. } => tool,
        }
    }
}

// ── Capabilities ───────────────────────────────────────────────────────────

/// A syntax error reported by the assembler, already in source coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxDiagnostic {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssembleOutcome {
    Assembled { artifact: PathBuf },
    /// The assembler stops at the first syntax error, so this usually holds one.
    Rejected(Vec<SyntaxDiagnostic>),
}

#[async_trait]
pub trait Assembler: Send + Sync {
    async fn assemble(&self, source: &str, workdir: &Path) -> Result<AssembleOutcome, ToolError>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, artifact: &Path) -> Result<ValidationReport, ToolError>;
}

// ── Process invocation ─────────────────────────────────────────────────────

/// Run `command` to completion, killing it if `timeout` elapses first.
async fn run_tool(
    tool: &'static str,
    program: &Path,
    mut command: Command,
    timeout: Duration,
) -> Result<Output, ToolError> {
    command
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let started = Instant::now();
    let child = command.spawn().map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            ToolError::Missing {
                tool,
                program: program.to_path_buf(),
            }
        } else {
            ToolError::Spawn {
                tool,
                program: program.to_path_buf(),
                source,
            }
        }
    })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output.map_err(|source| ToolError::Io { tool, source })?,
        Err(_) => {
            warn!(tool, timeout_ms = timeout.as_millis() as u64, "tool timed out; killed");
            return Err(ToolError::Timeout {
                tool,
                after: timeout,
            });
        }
    };
    debug!(
        tool,
        status = %output.status,
        elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
        "tool finished"
    );
    Ok(output)
}

fn failure(tool: &'static str, output: &Output) -> ToolError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no output")
        .trim()
        .to_string();
    ToolError::Failed {
        tool,
        status: output.status.to_string(),
        detail,
    }
}

/// `error: LINE: COL: message`.
static SYNTAX_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^error:\s*(\d+):\s*(\d+):\s*(.*)$").expect("assembler error pattern is valid")
});

/// Parse `error: LINE: COL: message` lines from assembler output.
pub fn parse_syntax_errors(stderr: &str) -> Vec<SyntaxDiagnostic> {
    stderr
        .lines()
        .filter_map(|line| SYNTAX_LINE.captures(line.trim_end()))
        .filter_map(|caps| {
            Some(SyntaxDiagnostic {
                line: caps[1].parse().ok()?,
                column: caps[2].parse().ok()?,
                message: caps[3].trim().to_string(),
            })
        })
        .collect()
}

/// `spirv-as <input> -o <output>`.
#[derive(Debug, Clone)]
pub struct ProcessAssembler {
    program: PathBuf,
    timeout: Duration,
}

impl ProcessAssembler {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Assembler for ProcessAssembler {
    async fn assemble(&self, source: &str, workdir: &Path) -> Result<AssembleOutcome, ToolError> {
        const TOOL: &str = "assembler";
        let input = workdir.join(SOURCE_FILE);
        let artifact = workdir.join(ARTIFACT_FILE);
        tokio::fs::write(&input, source)
            .await
            .map_err(|source| ToolError::Io { tool: TOOL, source })?;

        let mut command = Command::new(&self.program);
        command.arg(&input).arg("-o").arg(&artifact);
        let output = run_tool(TOOL, &self.program, command, self.timeout).await?;

        if output.status.success() && artifact.is_file() {
            return Ok(AssembleOutcome::Assembled { artifact });
        }
        let syntax = parse_syntax_errors(&String::from_utf8_lossy(&output.stderr));
        if syntax.is_empty() {
            return Err(failure(TOOL, &output));
        }
        Ok(AssembleOutcome::Rejected(syntax))
    }
}

/// A validating executable speaking one of the `ValidatorProtocol`s.
#[derive(Debug, Clone)]
pub struct ProcessValidator {
    program: PathBuf,
    protocol: ValidatorProtocol,
    timeout: Duration,
}

impl ProcessValidator {
    pub fn new(program: impl Into<PathBuf>, protocol: ValidatorProtocol, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            protocol,
            timeout,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, crate::config::ConfigError> {
        Ok(Self::new(
            config.validator_program()?,
            config.validator_protocol,
            config.timeout(),
        ))
    }
}

#[async_trait]
impl Validator for ProcessValidator {
    async fn validate(&self, artifact: &Path) -> Result<ValidationReport, ToolError> {
        const TOOL: &str = "validator";
        let mut command = Command::new(&self.program);
        match self.protocol {
            ValidatorProtocol::Json => {
                command.arg("validate").arg(artifact).args(["--format", "json"]);
            }
            ValidatorProtocol::SpirvVal => {
                command.arg(artifact);
            }
        }
        let output = run_tool(TOOL, &self.program, command, self.timeout).await?;

        match self.protocol {
            // 0 = valid, 1 = findings; anything else is the tool itself failing.
            ValidatorProtocol::Json => match output.status.code() {
                Some(0) | Some(1) => serde_json::from_slice(&output.stdout).map_err(|e| {
                    ToolError::Protocol {
                        tool: TOOL,
                        detail: e.to_string(),
                    }
                }),
                _ => Err(failure(TOOL, &output)),
            },
            ValidatorProtocol::SpirvVal => {
                if output.status.success() {
                    return Ok(ValidationReport::valid());
                }
                let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stdout));
                let report = report::parse_spirv_val(&text);
                if report.ok {
                    return Err(failure(TOOL, &output));
                }
                Ok(report)
            }
        }
    }
}

/// Runs the engine on a blocking worker instead of spawning a process.
#[derive(Clone)]
pub struct InProcessValidator {
    engine: Arc<Engine>,
}

impl InProcessValidator {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

impl Default for InProcessValidator {
    fn default() -> Self {
        Self::new(Arc::new(Engine::builtin()))
    }
}

#[async_trait]
impl Validator for InProcessValidator {
    async fn validate(&self, artifact: &Path) -> Result<ValidationReport, ToolError> {
        const TOOL: &str = "validator";
        let bytes = tokio::fs::read(artifact)
            .await
            .map_err(|source| ToolError::Io { tool: TOOL, source })?;
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || {
            let module = Module::from_bytes(&bytes);
            ValidationReport::from_run(&engine.validate(&module))
        })
        .await
        .map_err(|e| ToolError::Failed {
            tool: TOOL,
            status: "in-process".into(),
            detail: e.to_string(),
        })
    }
}

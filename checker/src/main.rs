use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use spvcheck::config::{PipelineConfig, ValidatorProtocol, DEFAULT_ASSEMBLER, DEFAULT_TIMEOUT_MS};
use spvcheck::engine::Engine;
use spvcheck::module::Module;
use spvcheck::pipeline::{DocumentId, Pipeline, PipelineRequest};
use spvcheck::report::ValidationReport;
use spvcheck::tool::{InProcessValidator, ProcessAssembler};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "spvcheck",
    version,
    about = "Exhaustive SPIR-V validation — every independent error in one run"
)]
struct Cli {
    /// Log pass and request activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a binary module and print a report (exit 0 valid, 1 invalid)
    Validate {
        /// Input .spv module
        module: PathBuf,

        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
    /// Assemble and validate an assembly file, as the editor would on save
    Check {
        /// Input .spvasm source file
        source: PathBuf,

        /// Validate in this process instead of spawning the validator
        #[arg(long)]
        in_process: bool,

        #[command(flatten)]
        tools: ToolArgs,
    },
    /// Serve the language server protocol on stdio
    Lsp {
        #[command(flatten)]
        tools: ToolArgs,
    },
}

#[derive(Args, Debug)]
struct ToolArgs {
    /// Assembler executable (`<asm> <in> -o <out>`)
    #[arg(long, env = "SPVCHECK_ASSEMBLER", default_value = DEFAULT_ASSEMBLER)]
    assembler: PathBuf,

    /// Validator executable (default: this binary)
    #[arg(long, env = "SPVCHECK_VALIDATOR")]
    validator: Option<PathBuf>,

    /// How to drive the validator
    #[arg(long, value_enum, default_value_t = ValidatorProtocol::Json)]
    validator_protocol: ValidatorProtocol,

    /// Directory for per-request temporary files
    #[arg(long, env = "SPVCHECK_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Per-tool timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
}

impl ToolArgs {
    fn into_config(self) -> PipelineConfig {
        PipelineConfig {
            assembler: self.assembler,
            validator: self.validator,
            validator_protocol: self.validator_protocol,
            temp_dir: self.temp_dir,
            timeout_ms: self.timeout_ms,
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("SPVCHECK_LOG")
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // stdout carries reports and the LSP stream.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match cli.command {
        Command::Validate { module, format } => validate(&module, format),
        Command::Check {
            source,
            in_process,
            tools,
        } => check(&source, in_process, tools.into_config()).await,
        Command::Lsp { tools } => {
            spvcheck::lsp::serve(tools.into_config()).await;
            0
        }
    };
    std::process::exit(code);
}

fn validate(path: &Path, format: Format) -> i32 {
    let module = match Module::read(path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("spvcheck: error: {}", e);
            return 2;
        }
    };

    let run = Engine::builtin().validate(&module);
    let report = ValidationReport::from_run(&run);
    match format {
        Format::Text => print!("{}", report.render_text(&path.display().to_string())),
        Format::Json => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("spvcheck: error: cannot encode report: {}", e);
                return 2;
            }
        },
    }
    if report.ok {
        0
    } else {
        1
    }
}

async fn check(path: &Path, in_process: bool, config: PipelineConfig) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("spvcheck: error: {}: {}", path.display(), e);
            return 2;
        }
    };

    let pipeline = if in_process {
        let assembler = ProcessAssembler::new(&config.assembler, config.timeout());
        Pipeline::new(Arc::new(assembler), Arc::new(InProcessValidator::default()))
    } else {
        if let Err(e) = config.check_environment() {
            eprintln!("spvcheck: error: {}", e);
            return 2;
        }
        match Pipeline::from_config(&config) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("spvcheck: error: {}", e);
                return 2;
            }
        }
    };
    let pipeline = match &config.temp_dir {
        Some(dir) => pipeline.with_temp_root(dir),
        None => pipeline,
    };

    let request = PipelineRequest {
        document_id: DocumentId(path.display().to_string()),
        source_text: source,
        sequence: 1,
    };
    match pipeline.run(&request).await {
        Ok(diagnostics) => {
            for d in diagnostics.as_slice() {
                match d.location {
                    Some(_) => println!("{}:{}", request.document_id, d),
                    None => println!("{}: {}", request.document_id, d),
                }
            }
            if diagnostics.is_empty() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("spvcheck: error: {}", e);
            2
        }
    }
}

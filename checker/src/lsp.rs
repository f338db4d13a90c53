// lsp.rs — Language server: editor events in, published diagnostics out
//
// Full text sync. Open and save trigger validation through the session
// controller; change only tracks text; close clears the document's list.
//
// Preconditions: runs inside a tokio runtime (`serve`).
// Postconditions: diagnostics are published with 0-based positions in UTF-16
//   code units, measured against the text that was validated; a
//   document-level diagnostic sits at the start of the first line.
// Failure modes: a bad `initializationOptions` object is reported to the
//   client and the CLI configuration is used instead.
// Side effects: stdio transport; spawns the session actor on initialize.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;
use tower_lsp::jsonrpc::{Error as RpcError, Result};
use tower_lsp::lsp_types::*;
use tower_lsp::{Client, LanguageServer, LspService, Server};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::diag::Severity;
use crate::pipeline::{DocumentId, NormalizedDiagnostic, Pipeline};
use crate::session::{Presenter, Session, SessionHandle};

const SOURCE: &str = "spvcheck";

/// Serve LSP over stdin/stdout until the client disconnects.
pub async fn serve(config: PipelineConfig) {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(|client| Backend::new(client, config));
    Server::new(stdin, stdout, socket).serve(service).await;
}

// ── Presenter ──────────────────────────────────────────────────────────────

pub struct LspPresenter {
    client: Client,
    /// Text most recently sent for validation, per document. Only the newest
    /// request is ever presented, so this is the text its positions refer to.
    submitted: Arc<DashMap<Url, String>>,
}

#[async_trait]
impl Presenter for LspPresenter {
    async fn present(&self, document: &DocumentId, diagnostics: Vec<NormalizedDiagnostic>) {
        let uri = match Url::parse(&document.0) {
            Ok(uri) => uri,
            Err(err) => {
                warn!(%document, error = %err, "not a URI; diagnostics dropped");
                return;
            }
        };
        let text = self.submitted.get(&uri).map(|t| t.value().clone());
        let items = diagnostics
            .iter()
            .map(|d| to_lsp(d, text.as_deref()))
            .collect();
        self.client.publish_diagnostics(uri, items, None).await;
    }
}

/// Convert one diagnostic; the range runs to the end of its source line.
///
/// Locations count chars; LSP positions count UTF-16 code units.
pub fn to_lsp(d: &NormalizedDiagnostic, text: Option<&str>) -> Diagnostic {
    let (line, chars) = match d.location {
        Some(loc) => (loc.line.saturating_sub(1), loc.column.saturating_sub(1)),
        None => (0, 0),
    };
    let (character, line_len) = match text.and_then(|t| t.lines().nth(line as usize)) {
        Some(source_line) => (
            utf16_len(source_line.chars().take(chars as usize)),
            utf16_len(source_line.chars()),
        ),
        None => (chars, chars),
    };
    let start = Position::new(line, character);
    let end = Position::new(line, line_len.max(character));

    Diagnostic {
        range: Range::new(start, end),
        severity: Some(match d.severity {
            Severity::Error => DiagnosticSeverity::ERROR,
            Severity::Warning => DiagnosticSeverity::WARNING,
            Severity::Info => DiagnosticSeverity::INFORMATION,
        }),
        code: d.code.clone().map(NumberOrString::String),
        source: Some(SOURCE.to_string()),
        message: d.message.clone(),
        ..Default::default()
    }
}

fn utf16_len(chars: impl Iterator<Item = char>) -> u32 {
    chars.map(|c| c.len_utf16() as u32).sum()
}

// ── Backend ────────────────────────────────────────────────────────────────

pub struct Backend {
    client: Client,
    texts: DashMap<Url, String>,
    submitted: Arc<DashMap<Url, String>>,
    base_config: PipelineConfig,
    config: OnceLock<PipelineConfig>,
    session: OnceLock<SessionHandle>,
}

impl Backend {
    pub fn new(client: Client, base_config: PipelineConfig) -> Self {
        Self {
            client,
            texts: DashMap::new(),
            submitted: Arc::new(DashMap::new()),
            base_config,
            config: OnceLock::new(),
            session: OnceLock::new(),
        }
    }

    fn save(&self, uri: &Url, text: String) {
        let Some(session) = self.session.get() else {
            warn!(%uri, "document event before initialize; ignored");
            return;
        };
        self.submitted.insert(uri.clone(), text.clone());
        if session.save(DocumentId(uri.to_string()), text).is_err() {
            warn!(%uri, "session controller stopped; document not checked");
        }
    }
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let config = match &params.initialization_options {
            Some(options) => self.base_config.merge_json(options).unwrap_or_else(|err| {
                warn!(error = %err, "ignoring initializationOptions");
                self.base_config.clone()
            }),
            None => self.base_config.clone(),
        };
        let pipeline = Pipeline::from_config(&config)
            .map_err(|err| RpcError::invalid_params(err.to_string()))?;
        let presenter = LspPresenter {
            client: self.client.clone(),
            submitted: Arc::clone(&self.submitted),
        };
        let (handle, _join) = Session::spawn(Arc::new(pipeline), Arc::new(presenter));
        let _ = self.session.set(handle);
        let _ = self.config.set(config);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        save: Some(TextDocumentSyncSaveOptions::SaveOptions(SaveOptions {
                            include_text: Some(true),
                        })),
                        ..Default::default()
                    },
                )),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: SOURCE.to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        if let Some(Err(err)) = self.config.get().map(PipelineConfig::check_environment) {
            self.client
                .show_message(MessageType::ERROR, format!("spvcheck: {err}"))
                .await;
        }
        info!("language server initialized");
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(session) = self.session.get() {
            let _ = session.shutdown();
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = params.text_document.text;
        self.texts.insert(uri.clone(), text.clone());
        self.save(&uri, text);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        if let Some(change) = params.content_changes.into_iter().last() {
            self.texts.insert(params.text_document.uri, change.text);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        let text = match params.text {
            Some(text) => {
                self.texts.insert(uri.clone(), text.clone());
                Some(text)
            }
            None => self.texts.get(&uri).map(|t| t.value().clone()),
        };
        match text {
            Some(text) => self.save(&uri, text),
            None => warn!(%uri, "save for an unknown document"),
        }
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        self.texts.remove(&uri);
        self.submitted.remove(&uri);
        if let Some(session) = self.session.get() {
            let _ = session.close(DocumentId(uri.to_string()));
        }
    }
}

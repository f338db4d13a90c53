// spvcheck — exhaustive SPIR-V validation and editor diagnostics pipeline
//
// Library root. Leaf-first: diagnostics, module model, passes and engine,
// then the request pipeline, session controller and language server.

pub mod checks;
pub mod config;
pub mod diag;
pub mod engine;
pub mod lexer;
pub mod lsp;
pub mod module;
pub mod opcode;
pub mod pass;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod srcmap;
pub mod tool;

// srcmap.rs — Instruction-index to source-position mapping for assembly text
//
// The binary module numbers instructions in source order, so the n-th
// instruction start found in the text is instruction n of the module.
//
// Preconditions: `source` is the exact text handed to the assembler.
// Postconditions: `instruction(i)` is the line/column of the i-th instruction
//   start; `definition(name)` is the start of the instruction defining `%name`.
// Failure modes: none; unmappable queries return `None`.
// Side effects: none.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lexer::{self, LineIndex, Token};

/// 1-based line and column in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    instructions: Vec<Location>,
    definitions: HashMap<String, Location>,
}

impl SourceMap {
    pub fn build(source: &str) -> Self {
        let lexed = lexer::lex(source);
        let index = LineIndex::new(source);
        let mut map = SourceMap::default();

        for (i, (token, span)) in lexed.tokens.iter().enumerate() {
            if !token.is_opcode(&source[span.start..span.end]) {
                continue;
            }
            // `%name = OpXxx` starts at the result id.
            let result = match i.checked_sub(2).map(|j| &lexed.tokens[j..i]) {
                Some([(Token::Id, id_span), (Token::Equals, _)]) => Some(*id_span),
                _ => None,
            };
            let start = result.unwrap_or(*span);
            let (line, column) = index.line_col(start.start);
            let location = Location { line, column };

            if let Some(id_span) = result {
                map.definitions
                    .entry(source[id_span.start..id_span.end].to_string())
                    .or_insert(location);
            }
            map.instructions.push(location);
        }
        map
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction(&self, index: u32) -> Option<Location> {
        self.instructions.get(index as usize).copied()
    }

    /// Location of the instruction defining `name` (with or without `%`).
    pub fn definition(&self, name: &str) -> Option<Location> {
        if name.starts_with('%') {
            self.definitions.get(name).copied()
        } else {
            self.definitions.get(&format!("%{name}")).copied()
        }
    }
}

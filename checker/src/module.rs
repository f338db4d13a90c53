// module.rs — SPIR-V binary module handle and the artifacts passes build from it
//
// A `Module` is the raw word stream. Structural passes turn it into a
// `Header`, a list of `Instruction`s, and an `IdTable`; nothing here rejects a
// malformed stream, that is the passes' job.
//
// Preconditions: none.
// Postconditions: `Module::from_bytes` never fails; stray trailing bytes are
//   remembered for the header pass to report.
// Failure modes: `Module::read` surfaces I/O errors.
// Side effects: `read` touches the filesystem.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::opcode::{self, DecodedInstruction};

pub const MAGIC: u32 = 0x0723_0203;
pub const HEADER_WORDS: usize = 5;
/// Version word for SPIR-V 1.0 (`0x00MMmm00`).
pub const VERSION_1_0: u32 = 0x0001_0000;

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ── Module ──────────────────────────────────────────────────────────────────

/// The parsed-module handle the engine validates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    words: Vec<u32>,
    trailing_bytes: usize,
}

impl Module {
    pub fn from_words(words: Vec<u32>) -> Self {
        Self {
            words,
            trailing_bytes: 0,
        }
    }

    /// Interpret bytes as 32-bit words. Big-endian streams are recognised by
    /// their byte-swapped magic number; everything else is read little-endian.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let chunks = bytes.chunks_exact(4);
        let trailing_bytes = chunks.remainder().len();
        let big_endian = bytes.len() >= 4
            && u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == MAGIC;
        let words = chunks
            .map(|c| {
                let b = [c[0], c[1], c[2], c[3]];
                if big_endian {
                    u32::from_be_bytes(b)
                } else {
                    u32::from_le_bytes(b)
                }
            })
            .collect();
        Self {
            words,
            trailing_bytes,
        }
    }

    pub fn read(path: &Path) -> Result<Self, ModuleError> {
        let bytes = std::fs::read(path).map_err(|source| ModuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Bytes left over after the last whole word.
    pub fn trailing_bytes(&self) -> usize {
        self.trailing_bytes
    }

    /// Little-endian encoding, as written by assemblers.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

// ── Artifacts ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub major: u8,
    pub minor: u8,
    pub generator: u32,
    pub bound: u32,
}

/// One instruction as laid out in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Position among instructions (0 = first after the header).
    pub index: u32,
    /// Word offset of the instruction's first word.
    pub offset: usize,
    pub opcode: u16,
    pub operands: Vec<u32>,
}

impl Instruction {
    pub fn info(&self) -> Option<&'static opcode::OpcodeInfo> {
        opcode::lookup(self.opcode)
    }

    pub fn mnemonic(&self) -> String {
        opcode::mnemonic(self.opcode)
    }
}

/// Where an id is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub index: u32,
    pub opcode: u16,
    pub result_type: Option<u32>,
}

/// Result-id table plus the decoded form of every instruction.
///
/// `decoded[i]` is `None` for instruction `i` when its opcode is outside the
/// table (or, in a failed build, when its operands could not be decoded).
#[derive(Debug, Clone, Default)]
pub struct IdTable {
    pub decoded: Vec<Option<DecodedInstruction>>,
    pub definitions: BTreeMap<u32, Definition>,
}

impl IdTable {
    pub fn definition(&self, id: u32) -> Option<&Definition> {
        self.definitions.get(&id)
    }

    pub fn is_defined(&self, id: u32) -> bool {
        self.definitions.contains_key(&id)
    }

    /// Decoded instruction that defines `id`.
    pub fn defining(&self, id: u32) -> Option<&DecodedInstruction> {
        let def = self.definitions.get(&id)?;
        self.decoded.get(def.index as usize)?.as_ref()
    }

    /// Type of the value `id`, when `id` names a typed value.
    pub fn type_of(&self, id: u32) -> Option<u32> {
        self.definitions.get(&id)?.result_type
    }

    /// Whether `id` is defined by an `OpType*` instruction.
    pub fn is_type(&self, id: u32) -> bool {
        self.definitions
            .get(&id)
            .and_then(|def| opcode::lookup(def.opcode))
            .is_some_and(|info| info.is_type_declaration())
    }

    /// Instruction index defining each id, for position resolution.
    pub fn origins(&self) -> BTreeMap<u32, u32> {
        self.definitions
            .iter()
            .map(|(id, def)| (*id, def.index))
            .collect()
    }
}

// ── Builder ─────────────────────────────────────────────────────────────────

/// Word-level module encoder for fixtures, tests and benches.
///
/// The id bound defaults to one past the largest result id the opcode table
/// can see; `bound` overrides it, e.g. to produce an invalid header.
#[derive(Debug, Clone)]
pub struct ModuleBuilder {
    magic: u32,
    version: u32,
    bound: Option<u32>,
    schema: u32,
    body: Vec<u32>,
    max_result: u32,
}

impl Default for ModuleBuilder {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            version: VERSION_1_0,
            bound: None,
            schema: 0,
            body: Vec::new(),
            max_result: 0,
        }
    }
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn bound(mut self, bound: u32) -> Self {
        self.bound = Some(bound);
        self
    }

    pub fn schema(mut self, schema: u32) -> Self {
        self.schema = schema;
        self
    }

    /// Append one instruction; the word count is computed.
    pub fn inst(mut self, opcode: u16, operands: &[u32]) -> Self {
        self.push(opcode, operands.to_vec());
        self
    }

    /// Append an instruction whose operands contain a literal string.
    pub fn inst_str(mut self, opcode: u16, before: &[u32], s: &str, after: &[u32]) -> Self {
        let mut operands = before.to_vec();
        operands.extend(opcode::encode_string(s));
        operands.extend_from_slice(after);
        self.push(opcode, operands);
        self
    }

    /// Append a raw word, bypassing instruction framing.
    pub fn raw(mut self, word: u32) -> Self {
        self.body.push(word);
        self
    }

    fn push(&mut self, opcode: u16, operands: Vec<u32>) {
        if let Some(info) = opcode::lookup(opcode) {
            if info.has_result {
                let at = usize::from(info.has_result_type);
                if let Some(&result) = operands.get(at) {
                    self.max_result = self.max_result.max(result);
                }
            }
        }
        let count = operands.len() as u32 + 1;
        self.body.push((count << 16) | u32::from(opcode));
        self.body.extend(operands);
    }

    pub fn build(self) -> Module {
        let bound = self.bound.unwrap_or(self.max_result + 1);
        let mut words = vec![self.magic, self.version, 0, bound, self.schema];
        words.extend(self.body);
        Module::from_words(words)
    }
}

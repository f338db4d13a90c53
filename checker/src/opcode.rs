// opcode.rs — Core SPIR-V opcode table and operand decoding
//
// Describes the opcodes the built-in passes understand: result type/result id
// presence, operand layout, and the logical-layout section each belongs to.
// Opcodes outside the table are carried opaquely by the engine.
//
// Preconditions: none.
// Postconditions: `decode` either returns a fully classified operand list or
//   a `DecodeError` naming the first shape violation.
// Failure modes: operand words that do not fit the declared layout.
// Side effects: none.

use std::fmt;

use crate::module::Instruction;

/// Opcode numbers, named after their assembly mnemonics.
pub mod op {
    pub const NOP: u16 = 0;
    pub const UNDEF: u16 = 1;
    pub const SOURCE: u16 = 3;
    pub const SOURCE_EXTENSION: u16 = 4;
    pub const NAME: u16 = 5;
    pub const MEMBER_NAME: u16 = 6;
    pub const STRING: u16 = 7;
    pub const LINE: u16 = 8;
    pub const EXTENSION: u16 = 10;
    pub const EXT_INST_IMPORT: u16 = 11;
    pub const EXT_INST: u16 = 12;
    pub const MEMORY_MODEL: u16 = 14;
    pub const ENTRY_POINT: u16 = 15;
    pub const EXECUTION_MODE: u16 = 16;
    pub const CAPABILITY: u16 = 17;
    pub const TYPE_VOID: u16 = 19;
    pub const TYPE_BOOL: u16 = 20;
    pub const TYPE_INT: u16 = 21;
    pub const TYPE_FLOAT: u16 = 22;
    pub const TYPE_VECTOR: u16 = 23;
    pub const TYPE_MATRIX: u16 = 24;
    pub const TYPE_ARRAY: u16 = 28;
    pub const TYPE_RUNTIME_ARRAY: u16 = 29;
    pub const TYPE_STRUCT: u16 = 30;
    pub const TYPE_POINTER: u16 = 32;
    pub const TYPE_FUNCTION: u16 = 33;
    pub const CONSTANT_TRUE: u16 = 41;
    pub const CONSTANT_FALSE: u16 = 42;
    pub const CONSTANT: u16 = 43;
    pub const CONSTANT_COMPOSITE: u16 = 44;
    pub const CONSTANT_NULL: u16 = 46;
    pub const FUNCTION: u16 = 54;
    pub const FUNCTION_PARAMETER: u16 = 55;
    pub const FUNCTION_END: u16 = 56;
    pub const FUNCTION_CALL: u16 = 57;
    pub const VARIABLE: u16 = 59;
    pub const LOAD: u16 = 61;
    pub const STORE: u16 = 62;
    pub const ACCESS_CHAIN: u16 = 65;
    pub const DECORATE: u16 = 71;
    pub const MEMBER_DECORATE: u16 = 72;
    pub const COMPOSITE_CONSTRUCT: u16 = 80;
    pub const COMPOSITE_EXTRACT: u16 = 81;
    pub const CONVERT_F_TO_U: u16 = 109;
    pub const CONVERT_F_TO_S: u16 = 110;
    pub const CONVERT_S_TO_F: u16 = 111;
    pub const CONVERT_U_TO_F: u16 = 112;
    pub const BITCAST: u16 = 124;
    pub const S_NEGATE: u16 = 126;
    pub const F_NEGATE: u16 = 127;
    pub const I_ADD: u16 = 128;
    pub const F_ADD: u16 = 129;
    pub const I_SUB: u16 = 130;
    pub const F_SUB: u16 = 131;
    pub const I_MUL: u16 = 132;
    pub const F_MUL: u16 = 133;
    pub const U_DIV: u16 = 134;
    pub const S_DIV: u16 = 135;
    pub const F_DIV: u16 = 136;
    pub const LOGICAL_OR: u16 = 166;
    pub const LOGICAL_AND: u16 = 167;
    pub const LOGICAL_NOT: u16 = 168;
    pub const SELECT: u16 = 169;
    pub const I_EQUAL: u16 = 170;
    pub const S_LESS_THAN: u16 = 177;
    pub const F_ORD_LESS_THAN: u16 = 184;
    pub const PHI: u16 = 245;
    pub const LOOP_MERGE: u16 = 246;
    pub const SELECTION_MERGE: u16 = 247;
    pub const LABEL: u16 = 248;
    pub const BRANCH: u16 = 249;
    pub const BRANCH_CONDITIONAL: u16 = 250;
    pub const SWITCH: u16 = 251;
    pub const KILL: u16 = 252;
    pub const RETURN: u16 = 253;
    pub const RETURN_VALUE: u16 = 254;
    pub const UNREACHABLE: u16 = 255;
}

// ── Operand layout ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// A reference to an id defined elsewhere in the module.
    IdRef,
    /// One literal word (enumerant, integer, or one word of a number).
    Literal,
    /// A nul-terminated UTF-8 string packed little-endian into words.
    LiteralString,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    One,
    Optional,
    Variadic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandSpec(pub OperandKind, pub Quantifier);

const ID: OperandSpec = OperandSpec(OperandKind::IdRef, Quantifier::One);
const ID_OPT: OperandSpec = OperandSpec(OperandKind::IdRef, Quantifier::Optional);
const IDS: OperandSpec = OperandSpec(OperandKind::IdRef, Quantifier::Variadic);
const LIT: OperandSpec = OperandSpec(OperandKind::Literal, Quantifier::One);
const LITS: OperandSpec = OperandSpec(OperandKind::Literal, Quantifier::Variadic);
const STR: OperandSpec = OperandSpec(OperandKind::LiteralString, Quantifier::One);
const STR_OPT: OperandSpec = OperandSpec(OperandKind::LiteralString, Quantifier::Optional);

/// Logical-layout section of a module-level instruction, in required order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Section {
    Capability,
    Extension,
    ExtInstImport,
    MemoryModel,
    EntryPoint,
    ExecutionMode,
    Debug,
    Annotation,
    Declaration,
    Function,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Capability => "capability",
            Section::Extension => "extension",
            Section::ExtInstImport => "extended instruction import",
            Section::MemoryModel => "memory model",
            Section::EntryPoint => "entry point",
            Section::ExecutionMode => "execution mode",
            Section::Debug => "debug",
            Section::Annotation => "annotation",
            Section::Declaration => "type and global declaration",
            Section::Function => "function definition",
        };
        f.write_str(name)
    }
}

/// Static metadata about one opcode.
#[derive(Debug)]
pub struct OpcodeInfo {
    pub opcode: u16,
    pub name: &'static str,
    pub has_result_type: bool,
    pub has_result: bool,
    /// Operands following the result type and result id.
    pub operands: &'static [OperandSpec],
    /// `None` for instructions allowed anywhere (OpNop, OpLine, OpUndef).
    pub section: Option<Section>,
}

impl OpcodeInfo {
    pub fn is_type_declaration(&self) -> bool {
        self.name.starts_with("OpType")
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self.opcode,
            op::BRANCH
                | op::BRANCH_CONDITIONAL
                | op::SWITCH
                | op::KILL
                | op::RETURN
                | op::RETURN_VALUE
                | op::UNREACHABLE
        )
    }

    /// Arithmetic whose operands must share the result type.
    pub fn is_same_type_arithmetic(&self) -> bool {
        matches!(
            self.opcode,
            op::I_ADD
                | op::F_ADD
                | op::I_SUB
                | op::F_SUB
                | op::I_MUL
                | op::F_MUL
                | op::U_DIV
                | op::S_DIV
                | op::F_DIV
                | op::S_NEGATE
                | op::F_NEGATE
        )
    }
}

macro_rules! opcode {
    ($opcode:expr, $name:literal, $rt:literal, $res:literal, [$($spec:expr),*], $section:expr) => {
        OpcodeInfo {
            opcode: $opcode,
            name: $name,
            has_result_type: $rt,
            has_result: $res,
            operands: &[$($spec),*],
            section: $section,
        }
    };
}

use Section as S;

/// Sorted by opcode number.
static OPCODES: &[OpcodeInfo] = &[
    opcode!(op::NOP, "OpNop", false, false, [], None),
    opcode!(op::UNDEF, "OpUndef", true, true, [], None),
    opcode!(op::SOURCE, "OpSource", false, false, [LIT, LIT, ID_OPT, STR_OPT], Some(S::Debug)),
    opcode!(op::SOURCE_EXTENSION, "OpSourceExtension", false, false, [STR], Some(S::Debug)),
    opcode!(op::NAME, "OpName", false, false, [ID, STR], Some(S::Debug)),
    opcode!(op::MEMBER_NAME, "OpMemberName", false, false, [ID, LIT, STR], Some(S::Debug)),
    opcode!(op::STRING, "OpString", false, true, [STR], Some(S::Debug)),
    opcode!(op::LINE, "OpLine", false, false, [ID, LIT, LIT], None),
    opcode!(op::EXTENSION, "OpExtension", false, false, [STR], Some(S::Extension)),
    opcode!(op::EXT_INST_IMPORT, "OpExtInstImport", false, true, [STR], Some(S::ExtInstImport)),
    opcode!(op::EXT_INST, "OpExtInst", true, true, [ID, LIT, IDS], Some(S::Function)),
    opcode!(op::MEMORY_MODEL, "OpMemoryModel", false, false, [LIT, LIT], Some(S::MemoryModel)),
    opcode!(op::ENTRY_POINT, "OpEntryPoint", false, false, [LIT, ID, STR, IDS], Some(S::EntryPoint)),
    opcode!(op::EXECUTION_MODE, "OpExecutionMode", false, false, [ID, LIT, LITS], Some(S::ExecutionMode)),
    opcode!(op::CAPABILITY, "OpCapability", false, false, [LIT], Some(S::Capability)),
    opcode!(op::TYPE_VOID, "OpTypeVoid", false, true, [], Some(S::Declaration)),
    opcode!(op::TYPE_BOOL, "OpTypeBool", false, true, [], Some(S::Declaration)),
    opcode!(op::TYPE_INT, "OpTypeInt", false, true, [LIT, LIT], Some(S::Declaration)),
    opcode!(op::TYPE_FLOAT, "OpTypeFloat", false, true, [LIT], Some(S::Declaration)),
    opcode!(op::TYPE_VECTOR, "OpTypeVector", false, true, [ID, LIT], Some(S::Declaration)),
    opcode!(op::TYPE_MATRIX, "OpTypeMatrix", false, true, [ID, LIT], Some(S::Declaration)),
    opcode!(op::TYPE_ARRAY, "OpTypeArray", false, true, [ID, ID], Some(S::Declaration)),
    opcode!(op::TYPE_RUNTIME_ARRAY, "OpTypeRuntimeArray", false, true, [ID], Some(S::Declaration)),
    opcode!(op::TYPE_STRUCT, "OpTypeStruct", false, true, [IDS], Some(S::Declaration)),
    opcode!(op::TYPE_POINTER, "OpTypePointer", false, true, [LIT, ID], Some(S::Declaration)),
    opcode!(op::TYPE_FUNCTION, "OpTypeFunction", false, true, [ID, IDS], Some(S::Declaration)),
    opcode!(op::CONSTANT_TRUE, "OpConstantTrue", true, true, [], Some(S::Declaration)),
    opcode!(op::CONSTANT_FALSE, "OpConstantFalse", true, true, [], Some(S::Declaration)),
    opcode!(op::CONSTANT, "OpConstant", true, true, [LIT, LITS], Some(S::Declaration)),
    opcode!(op::CONSTANT_COMPOSITE, "OpConstantComposite", true, true, [IDS], Some(S::Declaration)),
    opcode!(op::CONSTANT_NULL, "OpConstantNull", true, true, [], Some(S::Declaration)),
    opcode!(op::FUNCTION, "OpFunction", true, true, [LIT, ID], Some(S::Function)),
    opcode!(op::FUNCTION_PARAMETER, "OpFunctionParameter", true, true, [], Some(S::Function)),
    opcode!(op::FUNCTION_END, "OpFunctionEnd", false, false, [], Some(S::Function)),
    opcode!(op::FUNCTION_CALL, "OpFunctionCall", true, true, [ID, IDS], Some(S::Function)),
    opcode!(op::VARIABLE, "OpVariable", true, true, [LIT, ID_OPT], Some(S::Declaration)),
    opcode!(op::LOAD, "OpLoad", true, true, [ID, LITS], Some(S::Function)),
    opcode!(op::STORE, "OpStore", false, false, [ID, ID, LITS], Some(S::Function)),
    opcode!(op::ACCESS_CHAIN, "OpAccessChain", true, true, [ID, IDS], Some(S::Function)),
    opcode!(op::DECORATE, "OpDecorate", false, false, [ID, LIT, LITS], Some(S::Annotation)),
    opcode!(op::MEMBER_DECORATE, "OpMemberDecorate", false, false, [ID, LIT, LIT, LITS], Some(S::Annotation)),
    opcode!(op::COMPOSITE_CONSTRUCT, "OpCompositeConstruct", true, true, [IDS], Some(S::Function)),
    opcode!(op::COMPOSITE_EXTRACT, "OpCompositeExtract", true, true, [ID, LITS], Some(S::Function)),
    opcode!(op::CONVERT_F_TO_U, "OpConvertFToU", true, true, [ID], Some(S::Function)),
    opcode!(op::CONVERT_F_TO_S, "OpConvertFToS", true, true, [ID], Some(S::Function)),
    opcode!(op::CONVERT_S_TO_F, "OpConvertSToF", true, true, [ID], Some(S::Function)),
    opcode!(op::CONVERT_U_TO_F, "OpConvertUToF", true, true, [ID], Some(S::Function)),
    opcode!(op::BITCAST, "OpBitcast", true, true, [ID], Some(S::Function)),
    opcode!(op::S_NEGATE, "OpSNegate", true, true, [ID], Some(S::Function)),
    opcode!(op::F_NEGATE, "OpFNegate", true, true, [ID], Some(S::Function)),
    opcode!(op::I_ADD, "OpIAdd", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::F_ADD, "OpFAdd", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::I_SUB, "OpISub", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::F_SUB, "OpFSub", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::I_MUL, "OpIMul", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::F_MUL, "OpFMul", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::U_DIV, "OpUDiv", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::S_DIV, "OpSDiv", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::F_DIV, "OpFDiv", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::LOGICAL_OR, "OpLogicalOr", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::LOGICAL_AND, "OpLogicalAnd", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::LOGICAL_NOT, "OpLogicalNot", true, true, [ID], Some(S::Function)),
    opcode!(op::SELECT, "OpSelect", true, true, [ID, ID, ID], Some(S::Function)),
    opcode!(op::I_EQUAL, "OpIEqual", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::S_LESS_THAN, "OpSLessThan", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::F_ORD_LESS_THAN, "OpFOrdLessThan", true, true, [ID, ID], Some(S::Function)),
    opcode!(op::PHI, "OpPhi", true, true, [IDS], Some(S::Function)),
    opcode!(op::LOOP_MERGE, "OpLoopMerge", false, false, [ID, ID, LIT, LITS], Some(S::Function)),
    opcode!(op::SELECTION_MERGE, "OpSelectionMerge", false, false, [ID, LIT], Some(S::Function)),
    opcode!(op::LABEL, "OpLabel", false, true, [], Some(S::Function)),
    opcode!(op::BRANCH, "OpBranch", false, false, [ID], Some(S::Function)),
    opcode!(op::BRANCH_CONDITIONAL, "OpBranchConditional", false, false, [ID, ID, ID, LITS], Some(S::Function)),
    opcode!(op::SWITCH, "OpSwitch", false, false, [ID, ID, LITS], Some(S::Function)),
    opcode!(op::KILL, "OpKill", false, false, [], Some(S::Function)),
    opcode!(op::RETURN, "OpReturn", false, false, [], Some(S::Function)),
    opcode!(op::RETURN_VALUE, "OpReturnValue", false, false, [ID], Some(S::Function)),
    opcode!(op::UNREACHABLE, "OpUnreachable", false, false, [], Some(S::Function)),
];

/// Look up an opcode by number.
pub fn lookup(opcode: u16) -> Option<&'static OpcodeInfo> {
    OPCODES
        .binary_search_by_key(&opcode, |info| info.opcode)
        .ok()
        .map(|i| &OPCODES[i])
}

/// Look up an opcode by its assembly mnemonic (`OpIAdd`).
pub fn by_name(name: &str) -> Option<&'static OpcodeInfo> {
    OPCODES.iter().find(|info| info.name == name)
}

/// Mnemonic for diagnostics; falls back to `Op#<n>` for unknown opcodes.
pub fn mnemonic(opcode: u16) -> String {
    match lookup(opcode) {
        Some(info) => info.name.to_string(),
        None => format!("Op#{opcode}"),
    }
}

// ── Decoding ───────────────────────────────────────────────────────────────

/// A classified operand word (or run of words, for strings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Id(u32),
    Literal(u32),
    String(String),
}

/// An instruction with its operands classified per the opcode table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub opcode: u16,
    pub result_type: Option<u32>,
    pub result: Option<u32>,
    pub operands: Vec<Operand>,
}

impl DecodedInstruction {
    /// Every id this instruction reads, result type first.
    pub fn id_refs(&self) -> impl Iterator<Item = u32> + '_ {
        self.result_type
            .into_iter()
            .chain(self.operands.iter().filter_map(|operand| match operand {
                Operand::Id(id) => Some(*id),
                _ => None,
            }))
    }

    pub fn id_operand(&self, n: usize) -> Option<u32> {
        self.operands
            .iter()
            .filter_map(|operand| match operand {
                Operand::Id(id) => Some(*id),
                _ => None,
            })
            .nth(n)
    }

    pub fn string_operand(&self) -> Option<&str> {
        self.operands.iter().find_map(|operand| match operand {
            Operand::String(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    MissingOperand { kind: OperandKind, found: usize },
    UnterminatedString,
    InvalidUtf8,
    TrailingWords(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::MissingOperand { kind, found } => write!(
                f,
                "expected another {} operand after {} operand word(s)",
                match kind {
                    OperandKind::IdRef => "id",
                    OperandKind::Literal => "literal",
                    OperandKind::LiteralString => "string",
                },
                found
            ),
            DecodeError::UnterminatedString => write!(f, "literal string is not nul-terminated"),
            DecodeError::InvalidUtf8 => write!(f, "literal string is not valid UTF-8"),
            DecodeError::TrailingWords(n) => {
                write!(f, "{n} operand word(s) beyond the opcode's layout")
            }
        }
    }
}

/// Decode an instruction's operands. `Ok(None)` for opcodes outside the table.
pub fn decode(inst: &Instruction) -> Result<Option<DecodedInstruction>, DecodeError> {
    let Some(info) = lookup(inst.opcode) else {
        return Ok(None);
    };
    let words = &inst.operands;
    let mut cursor = 0usize;

    let take_word = |kind: OperandKind, cursor: &mut usize| -> Result<u32, DecodeError> {
        let word = words
            .get(*cursor)
            .copied()
            .ok_or(DecodeError::MissingOperand {
                kind,
                found: *cursor,
            })?;
        *cursor += 1;
        Ok(word)
    };

    let result_type = if info.has_result_type {
        Some(take_word(OperandKind::IdRef, &mut cursor)?)
    } else {
        None
    };
    let result = if info.has_result {
        Some(take_word(OperandKind::IdRef, &mut cursor)?)
    } else {
        None
    };

    let mut operands = Vec::new();
    for OperandSpec(kind, quantifier) in info.operands {
        let present = cursor < words.len();
        match quantifier {
            Quantifier::One => {
                operands.push(decode_one(*kind, words, &mut cursor)?);
            }
            Quantifier::Optional => {
                if present {
                    operands.push(decode_one(*kind, words, &mut cursor)?);
                }
            }
            Quantifier::Variadic => {
                while cursor < words.len() {
                    operands.push(decode_one(*kind, words, &mut cursor)?);
                }
            }
        }
    }

    if cursor < words.len() {
        return Err(DecodeError::TrailingWords(words.len() - cursor));
    }

    Ok(Some(DecodedInstruction {
        opcode: inst.opcode,
        result_type,
        result,
        operands,
    }))
}

fn decode_one(kind: OperandKind, words: &[u32], cursor: &mut usize) -> Result<Operand, DecodeError> {
    let Some(&word) = words.get(*cursor) else {
        return Err(DecodeError::MissingOperand {
            kind,
            found: *cursor,
        });
    };
    match kind {
        OperandKind::IdRef => {
            *cursor += 1;
            Ok(Operand::Id(word))
        }
        OperandKind::Literal => {
            *cursor += 1;
            Ok(Operand::Literal(word))
        }
        OperandKind::LiteralString => {
            let (s, used) = decode_string(&words[*cursor..])?;
            *cursor += used;
            Ok(Operand::String(s))
        }
    }
}

/// Decode a nul-terminated string; returns the string and words consumed.
pub fn decode_string(words: &[u32]) -> Result<(String, usize), DecodeError> {
    let mut bytes = Vec::new();
    for (i, word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                let s = String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;
                return Ok((s, i + 1));
            }
            bytes.push(byte);
        }
    }
    Err(DecodeError::UnterminatedString)
}

/// Pack a string into nul-terminated, zero-padded words.
pub fn encode_string(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

// checks.rs — Built-in checking passes
//
// Three structural passes (header, layout, ids) build the artifacts in
// `ValidationState`; five semantic passes read them. Each pass reports every
// finding it sees rather than stopping at the first.
//
// Preconditions: passes run in `pass::ALL_PASSES` order under the engine.
// Postconditions: structural passes leave their artifact in the state even
//   when they report, so a pass without dependents never starves later ones.
// Failure modes: `PassFault::MissingArtifact` if run outside the engine order.
// Side effects: none.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::diag::{codes, Diagnostic, DiagnosticSink, Position};
use crate::engine::{Check, DiagBuffer, PassFault, ValidationState};
use crate::module::{Definition, Header, IdTable, Instruction, HEADER_WORDS, MAGIC};
use crate::opcode::{self, op, Operand, Section};
use crate::pass::{self, PassDescriptor, PassId};

/// Highest minor version accepted for SPIR-V 1.x.
const MAX_MINOR: u8 = 6;

/// Instantiate the built-in passes for `ids`, in the order given.
pub fn builtin(ids: &[PassId]) -> Vec<Box<dyn Check>> {
    ids.iter()
        .filter_map(|id| {
            let check: Box<dyn Check> = match *id {
                PassId::HEADER => Box::new(HeaderCheck),
                PassId::LAYOUT => Box::new(LayoutCheck),
                PassId::IDS => Box::new(IdsCheck),
                PassId::LOGICAL_LAYOUT => Box::new(LogicalLayoutCheck),
                PassId::ID_REFS => Box::new(IdRefsCheck),
                PassId::TYPES => Box::new(TypesCheck),
                PassId::ENTRY_POINTS => Box::new(EntryPointsCheck),
                PassId::CONTROL_FLOW => Box::new(ControlFlowCheck),
                _ => return None,
            };
            Some(check)
        })
        .collect()
}

fn builtin_descriptor(id: PassId) -> PassDescriptor {
    // Every id used below has a descriptor; see `pass::tests`.
    pass::descriptor(id).unwrap_or(PassDescriptor {
        id,
        inputs: &[],
        structural: false,
    })
}

// ── header ─────────────────────────────────────────────────────────────────

struct HeaderCheck;

impl Check for HeaderCheck {
    fn descriptor(&self) -> PassDescriptor {
        builtin_descriptor(PassId::HEADER)
    }

    fn run(&self, state: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault> {
        let module = state.module;
        if module.trailing_bytes() != 0 {
            out.report(
                codes::S0001,
                Position::Unknown,
                format!(
                    "module size is not a multiple of 4 bytes ({} trailing bytes)",
                    module.trailing_bytes()
                ),
            );
        }

        let words = module.words();
        if words.len() < HEADER_WORDS {
            out.report(
                codes::S0002,
                Position::Unknown,
                format!(
                    "module is {} words long; the header alone needs {}",
                    words.len(),
                    HEADER_WORDS
                ),
            );
            return Ok(());
        }

        if words[0] != MAGIC {
            out.report(
                codes::S0003,
                Position::Unknown,
                format!("invalid magic number {:#010x}", words[0]),
            );
        }

        let version = words[1];
        let major = ((version >> 16) & 0xff) as u8;
        let minor = ((version >> 8) & 0xff) as u8;
        if version & 0xff00_00ff != 0 || major != 1 || minor > MAX_MINOR {
            out.report(
                codes::S0004,
                Position::Unknown,
                format!("unsupported version word {version:#010x}"),
            );
        }

        let bound = words[3];
        if bound == 0 {
            out.report(codes::S0005, Position::Unknown, "id bound is zero".into());
        }

        let schema = words[4];
        if schema != 0 {
            out.report(
                codes::S0006,
                Position::Unknown,
                format!("reserved schema word is {schema}, expected 0"),
            );
        }

        state.header = Some(Header {
            major,
            minor,
            generator: words[2],
            bound,
        });
        Ok(())
    }
}

// ── layout ─────────────────────────────────────────────────────────────────

struct LayoutCheck;

impl Check for LayoutCheck {
    fn descriptor(&self) -> PassDescriptor {
        builtin_descriptor(PassId::LAYOUT)
    }

    fn run(&self, state: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault> {
        let words = state.module.words();
        let mut instructions = Vec::new();
        let mut offset = HEADER_WORDS;
        let mut index = 0u32;

        while offset < words.len() {
            let first = words[offset];
            let count = (first >> 16) as usize;
            let opcode = (first & 0xffff) as u16;
            if count == 0 {
                out.report(
                    codes::S0100,
                    Position::Instruction(index),
                    format!(
                        "{} at word {offset} has a word count of zero",
                        opcode::mnemonic(opcode)
                    ),
                );
                break;
            }
            if offset + count > words.len() {
                out.report(
                    codes::S0101,
                    Position::Instruction(index),
                    format!(
                        "{} at word {offset} claims {count} words but only {} remain",
                        opcode::mnemonic(opcode),
                        words.len() - offset
                    ),
                );
                break;
            }
            instructions.push(Instruction {
                index,
                offset,
                opcode,
                operands: words[offset + 1..offset + count].to_vec(),
            });
            offset += count;
            index += 1;
        }

        state.instructions = Some(instructions);
        Ok(())
    }
}

// ── ids ────────────────────────────────────────────────────────────────────

struct IdsCheck;

impl Check for IdsCheck {
    fn descriptor(&self) -> PassDescriptor {
        builtin_descriptor(PassId::IDS)
    }

    fn run(&self, state: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault> {
        let bound = state.header()?.bound;
        let instructions = state.instructions()?;
        let mut table = IdTable::default();

        for inst in instructions {
            let decoded = match opcode::decode(inst) {
                Ok(decoded) => decoded,
                Err(err) => {
                    out.report(
                        codes::S0200,
                        Position::Instruction(inst.index),
                        format!("{}: {}", inst.mnemonic(), err),
                    );
                    table.decoded.push(None);
                    continue;
                }
            };

            if let Some(result) = decoded.as_ref().and_then(|d| d.result) {
                if result == 0 || result >= bound {
                    out.report(
                        codes::S0202,
                        Position::Instruction(inst.index),
                        format!(
                            "{} defines %{result}, outside the id bound {bound}",
                            inst.mnemonic()
                        ),
                    );
                } else if let Some(previous) = table.definitions.get(&result) {
                    out.report(
                        codes::S0203,
                        Position::Instruction(inst.index),
                        format!(
                            "id %{result} is already defined by instruction {}",
                            previous.index
                        ),
                    );
                } else {
                    table.definitions.insert(
                        result,
                        Definition {
                            index: inst.index,
                            opcode: inst.opcode,
                            result_type: decoded.as_ref().and_then(|d| d.result_type),
                        },
                    );
                }
            }
            table.decoded.push(decoded);
        }

        state.ids = Some(table);
        Ok(())
    }
}

// ── logical_layout ─────────────────────────────────────────────────────────

struct LogicalLayoutCheck;

impl Check for LogicalLayoutCheck {
    fn descriptor(&self) -> PassDescriptor {
        builtin_descriptor(PassId::LOGICAL_LAYOUT)
    }

    fn run(&self, state: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault> {
        let instructions = state.instructions()?;
        let mut current = Section::Capability;
        let mut capabilities = 0usize;
        let mut memory_models = 0usize;

        for inst in instructions {
            match inst.opcode {
                op::CAPABILITY => capabilities += 1,
                op::MEMORY_MODEL => {
                    memory_models += 1;
                    if memory_models > 1 {
                        out.report(
                            codes::V0101,
                            Position::Instruction(inst.index),
                            "module declares more than one OpMemoryModel".into(),
                        );
                    }
                }
                _ => {}
            }

            let Some(section) = inst.info().and_then(|info| info.section) else {
                continue;
            };
            // Function-local variables live inside function bodies.
            if current == Section::Function && inst.opcode == op::VARIABLE {
                continue;
            }
            if section < current {
                out.report(
                    codes::V0100,
                    Position::Instruction(inst.index),
                    format!(
                        "{} belongs in the {} section, which must precede the {} section",
                        inst.mnemonic(),
                        section,
                        current
                    ),
                );
            } else {
                current = section;
            }
        }

        if capabilities == 0 {
            out.report(
                codes::V0102,
                Position::Unknown,
                "module declares no OpCapability".into(),
            );
        }
        if memory_models == 0 {
            out.report(
                codes::V0101,
                Position::Unknown,
                "module has no OpMemoryModel".into(),
            );
        }
        Ok(())
    }
}

// ── id_refs ────────────────────────────────────────────────────────────────

struct IdRefsCheck;

impl Check for IdRefsCheck {
    fn descriptor(&self) -> PassDescriptor {
        builtin_descriptor(PassId::ID_REFS)
    }

    fn run(&self, state: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault> {
        let instructions = state.instructions()?;
        let table = state.ids()?;
        let mut unknown_opcodes = BTreeSet::new();

        for (inst, decoded) in instructions.iter().zip(&table.decoded) {
            let Some(decoded) = decoded else {
                if inst.info().is_none() && unknown_opcodes.insert(inst.opcode) {
                    out.accept(
                        Diagnostic::warning(
                            Position::Instruction(inst.index),
                            format!(
                                "opcode {} is not recognised; its operands are not checked",
                                inst.opcode
                            ),
                        )
                        .with_code(codes::V0201),
                    );
                }
                continue;
            };
            let mut reported = HashSet::new();
            for id in decoded.id_refs() {
                if !table.is_defined(id) && reported.insert(id) {
                    out.report(
                        codes::V0200,
                        Position::Instruction(inst.index),
                        format!("undefined id %{id} used by {}", inst.mnemonic()),
                    );
                }
            }
        }
        Ok(())
    }
}

// ── types ──────────────────────────────────────────────────────────────────

struct TypesCheck;

impl Check for TypesCheck {
    fn descriptor(&self) -> PassDescriptor {
        builtin_descriptor(PassId::TYPES)
    }

    fn run(&self, state: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault> {
        let instructions = state.instructions()?;
        let table = state.ids()?;

        for (inst, decoded) in instructions.iter().zip(&table.decoded) {
            let Some(decoded) = decoded else { continue };

            if let Some(result_type) = decoded.result_type {
                if table.is_defined(result_type) && !table.is_type(result_type) {
                    out.report(
                        codes::V0300,
                        Position::Instruction(inst.index),
                        format!(
                            "result type %{result_type} of {} is not a type declaration",
                            inst.mnemonic()
                        ),
                    );
                    continue;
                }
            }

            let is_arithmetic = inst.info().is_some_and(|info| info.is_same_type_arithmetic());
            if is_arithmetic {
                check_arithmetic(decoded, inst, table, out);
            }

            match inst.opcode {
                op::LOAD => {
                    if let (Some(pointer), Some(result_type)) = (decoded.id_operand(0), decoded.result_type) {
                        if let Some(pointee) = pointee_of(table, pointer, inst, out) {
                            if pointee != result_type {
                                out.report(
                                    codes::V0301,
                                    Position::Instruction(inst.index),
                                    format!(
                                        "type mismatch: OpLoad yields %{result_type} but %{pointer} points to %{pointee}"
                                    ),
                                );
                            }
                        }
                    }
                }
                op::STORE => {
                    if let (Some(pointer), Some(object)) = (decoded.id_operand(0), decoded.id_operand(1)) {
                        if let Some(pointee) = pointee_of(table, pointer, inst, out) {
                            if let Some(object_type) = table.type_of(object) {
                                if object_type != pointee {
                                    out.report(
                                        codes::V0301,
                                        Position::Instruction(inst.index),
                                        format!(
                                            "type mismatch: OpStore writes %{object} of type %{object_type} through a pointer to %{pointee}"
                                        ),
                                    );
                                }
                            }
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn check_arithmetic(
    decoded: &opcode::DecodedInstruction,
    inst: &Instruction,
    table: &IdTable,
    out: &mut DiagBuffer<'_>,
) {
    let (Some(result_type), Some(result)) = (decoded.result_type, decoded.result) else {
        return;
    };
    let mismatch = decoded.operands.iter().find_map(|operand| match operand {
        Operand::Id(id) => table
            .type_of(*id)
            .filter(|ty| *ty != result_type)
            .map(|ty| (*id, ty)),
        _ => None,
    });
    if let Some((operand, operand_type)) = mismatch {
        out.report(
            codes::V0301,
            Position::Id(result),
            format!(
                "type mismatch at id %{result}: {} operand %{operand} has type %{operand_type}, expected %{result_type}",
                inst.mnemonic()
            ),
        );
    }
}

/// Pointee type of the pointer value `pointer`; reports when it is not a pointer.
fn pointee_of(table: &IdTable, pointer: u32, inst: &Instruction, out: &mut DiagBuffer<'_>) -> Option<u32> {
    let pointer_type = table.type_of(pointer)?;
    let type_inst = table.defining(pointer_type)?;
    if type_inst.opcode != op::TYPE_POINTER {
        out.report(
            codes::V0302,
            Position::Instruction(inst.index),
            format!(
                "{} operand %{pointer} has type %{pointer_type}, which is not a pointer type",
                inst.mnemonic()
            ),
        );
        return None;
    }
    type_inst.id_operand(0)
}

// ── entry_points ───────────────────────────────────────────────────────────

struct EntryPointsCheck;

impl Check for EntryPointsCheck {
    fn descriptor(&self) -> PassDescriptor {
        builtin_descriptor(PassId::ENTRY_POINTS)
    }

    fn run(&self, state: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault> {
        let instructions = state.instructions()?;
        let table = state.ids()?;
        let mut seen: BTreeMap<(u32, String), u32> = BTreeMap::new();

        for (inst, decoded) in instructions.iter().zip(&table.decoded) {
            let Some(decoded) = decoded.as_ref().filter(|d| d.opcode == op::ENTRY_POINT) else {
                continue;
            };
            let model = match decoded.operands.first() {
                Some(Operand::Literal(model)) => *model,
                _ => continue,
            };
            let name = decoded.string_operand().unwrap_or_default().to_string();

            if let Some(target) = decoded.id_operand(0) {
                if let Some(def) = table.definition(target) {
                    if def.opcode != op::FUNCTION {
                        out.report(
                            codes::V0400,
                            Position::Instruction(inst.index),
                            format!(
                                "entry point \"{name}\" targets %{target}, which is {} rather than OpFunction",
                                opcode::mnemonic(def.opcode)
                            ),
                        );
                    }
                }
            }

            match seen.entry((model, name)) {
                Entry::Occupied(first) => {
                    let (_, name) = first.key();
                    out.report(
                        codes::V0401,
                        Position::Instruction(inst.index),
                        format!(
                            "entry point \"{name}\" is declared twice for execution model {model} (first at instruction {})",
                            first.get()
                        ),
                    );
                }
                Entry::Vacant(slot) => {
                    slot.insert(inst.index);
                }
            }
        }
        Ok(())
    }
}

// ── control_flow ───────────────────────────────────────────────────────────

struct ControlFlowCheck;

impl Check for ControlFlowCheck {
    fn descriptor(&self) -> PassDescriptor {
        builtin_descriptor(PassId::CONTROL_FLOW)
    }

    fn run(&self, state: &mut ValidationState<'_>, out: &mut DiagBuffer<'_>) -> Result<(), PassFault> {
        let instructions = state.instructions()?;
        let mut function: Option<u32> = None;
        let mut block: Option<u32> = None;

        for inst in instructions {
            let at = Position::Instruction(inst.index);
            match inst.opcode {
                op::FUNCTION => {
                    if let Some(open) = function {
                        out.report(
                            codes::V0503,
                            at,
                            format!("OpFunction begins before the function at instruction {open} ends"),
                        );
                    }
                    function = Some(inst.index);
                    block = None;
                }
                op::FUNCTION_PARAMETER => {
                    if function.is_none() || block.is_some() {
                        out.report(codes::V0501, at, "OpFunctionParameter outside a function header".into());
                    }
                }
                op::FUNCTION_END => {
                    if function.is_none() {
                        out.report(codes::V0504, at, "OpFunctionEnd without a matching OpFunction".into());
                    }
                    if let Some(label) = block {
                        out.report(
                            codes::V0502,
                            at,
                            format!("block opened at instruction {label} has no terminator before OpFunctionEnd"),
                        );
                    }
                    function = None;
                    block = None;
                }
                op::LABEL => {
                    if function.is_none() {
                        out.report(codes::V0501, at, "OpLabel outside a function".into());
                    } else if let Some(label) = block {
                        out.report(
                            codes::V0502,
                            at,
                            format!("block opened at instruction {label} has no terminator before the next OpLabel"),
                        );
                    }
                    block = Some(inst.index);
                }
                op::NOP | op::LINE => {}
                _ => {
                    let terminator = inst.info().is_some_and(|info| info.is_terminator());
                    if function.is_some() && block.is_none() {
                        out.report(
                            codes::V0501,
                            at,
                            format!("{} appears outside a block", inst.mnemonic()),
                        );
                    } else if function.is_none() && terminator {
                        out.report(
                            codes::V0501,
                            at,
                            format!("{} appears outside a function", inst.mnemonic()),
                        );
                    }
                    if terminator {
                        block = None;
                    }
                }
            }
        }

        if let Some(open) = function {
            out.report(
                codes::V0500,
                Position::Instruction(open),
                "function is never closed by OpFunctionEnd".into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diag::DiagCode;
    use crate::engine::Engine;
    use crate::module::{Module, ModuleBuilder};

    // Ids used by `base()`.
    const VOID: u32 = 1;
    const FN_TY: u32 = 2;
    const INT: u32 = 3;
    const FLOAT: u32 = 4;
    const ONE: u32 = 5;
    const TWO: u32 = 6;
    const HALF: u32 = 7;
    const MAIN: u32 = 8;
    const ENTRY: u32 = 9;
    const SUM: u32 = 10;
    const PTR: u32 = 11;
    const VAR: u32 = 12;

    fn header() -> ModuleBuilder {
        ModuleBuilder::new()
            .inst(op::CAPABILITY, &[1])
            .inst(op::MEMORY_MODEL, &[0, 1])
            .inst_str(op::ENTRY_POINT, &[5, MAIN], "main", &[])
    }

    fn types(b: ModuleBuilder) -> ModuleBuilder {
        b.inst(op::TYPE_VOID, &[VOID])
            .inst(op::TYPE_FUNCTION, &[FN_TY, VOID])
            .inst(op::TYPE_INT, &[INT, 32, 1])
            .inst(op::TYPE_FLOAT, &[FLOAT, 32])
            .inst(op::TYPE_POINTER, &[PTR, 7, INT])
            .inst(op::CONSTANT, &[INT, ONE, 1])
            .inst(op::CONSTANT, &[INT, TWO, 2])
            .inst(op::CONSTANT, &[FLOAT, HALF, 0x3f00_0000])
    }

    fn body(b: ModuleBuilder) -> ModuleBuilder {
        b.inst(op::FUNCTION, &[VOID, MAIN, 0, FN_TY])
            .inst(op::LABEL, &[ENTRY])
            .inst(op::VARIABLE, &[PTR, VAR, 7])
            .inst(op::I_ADD, &[INT, SUM, ONE, TWO])
            .inst(op::STORE, &[VAR, SUM])
            .inst(op::RETURN, &[])
            .inst(op::FUNCTION_END, &[])
    }

    fn base() -> Module {
        body(types(header())).build()
    }

    fn codes_of(module: &Module) -> Vec<DiagCode> {
        Engine::builtin()
            .validate(module)
            .diagnostics()
            .iter()
            .filter_map(|d| d.code())
            .collect()
    }

    #[test]
    fn base_module_is_valid() {
        let run = Engine::builtin().validate(&base());
        assert!(run.overall_ok(), "{:?}", run.diagnostics());
    }

    #[test]
    fn header_reports_every_bad_word() {
        let module = ModuleBuilder::new()
            .magic(0xdead_beef)
            .version(0x0002_0000)
            .bound(0)
            .schema(3)
            .build();
        assert_eq!(
            codes_of(&module),
            vec![codes::S0003, codes::S0004, codes::S0005, codes::S0006]
        );
    }

    #[test]
    fn truncated_header() {
        assert_eq!(
            codes_of(&Module::from_words(vec![MAGIC, 0x0001_0000])),
            vec![codes::S0002]
        );
    }

    #[test]
    fn zero_word_count_stops_layout() {
        let module = header().raw(u32::from(op::NOP)).build();
        assert_eq!(codes_of(&module), vec![codes::S0100]);
    }

    #[test]
    fn overrunning_instruction() {
        let module = header().raw((9 << 16) | u32::from(op::NAME)).raw(1).build();
        assert_eq!(codes_of(&module), vec![codes::S0101]);
    }

    #[test]
    fn duplicate_and_out_of_bound_ids_are_both_reported() {
        let module = types(header())
            .inst(op::TYPE_BOOL, &[INT])
            .inst(op::TYPE_BOOL, &[40])
            .bound(20)
            .build();
        assert_eq!(codes_of(&module), vec![codes::S0203, codes::S0202]);
    }

    #[test]
    fn operand_shape_mismatch() {
        let module = types(header()).inst(op::I_ADD, &[INT, 13, ONE]).build();
        assert_eq!(codes_of(&module), vec![codes::S0200]);
    }

    #[test]
    fn section_order_and_missing_memory_model() {
        let module = ModuleBuilder::new()
            .inst(op::CAPABILITY, &[1])
            .inst(op::TYPE_VOID, &[VOID])
            .inst(op::CAPABILITY, &[2])
            .build();
        assert_eq!(codes_of(&module), vec![codes::V0100, codes::V0101]);
    }

    #[test]
    fn function_local_variable_is_in_order() {
        assert!(Engine::builtin().validate(&base()).overall_ok());
    }

    #[test]
    fn undefined_id_reported_once_per_instruction() {
        let module = body(types(header()).inst(op::I_ADD, &[INT, 13, 99, 99])).build();
        let run = Engine::builtin().validate(&module);
        let undefined: Vec<_> = run
            .diagnostics()
            .iter()
            .filter(|d| d.code() == Some(codes::V0200))
            .collect();
        assert_eq!(undefined.len(), 1);
        assert!(undefined[0].message().contains("undefined id %99"));
    }

    #[test]
    fn unknown_opcode_warns_once() {
        let module = body(types(header()))
            .inst(4242, &[1])
            .inst(4242, &[2])
            .build();
        let run = Engine::builtin().validate(&module);
        let warnings: Vec<_> = run
            .diagnostics()
            .iter()
            .filter(|d| d.code() == Some(codes::V0201))
            .collect();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn arithmetic_type_mismatch_points_at_result_id() {
        let module = types(header())
            .inst(op::FUNCTION, &[VOID, MAIN, 0, FN_TY])
            .inst(op::LABEL, &[ENTRY])
            .inst(op::I_ADD, &[INT, 13, ONE, HALF])
            .inst(op::RETURN, &[])
            .inst(op::FUNCTION_END, &[])
            .build();
        let run = Engine::builtin().validate(&module);
        assert_eq!(run.diagnostics().len(), 1);
        let d = &run.diagnostics()[0];
        assert_eq!(d.code(), Some(codes::V0301));
        assert_eq!(d.position(), Position::Id(13));
        assert!(d.message().starts_with("type mismatch at id %13"));
        // 3 preamble + 8 declarations + OpFunction + OpLabel precede the add.
        assert_eq!(run.resolve(d.position()), Position::Instruction(13));
    }

    #[test]
    fn store_through_non_pointer() {
        let module = types(header())
            .inst(op::FUNCTION, &[VOID, MAIN, 0, FN_TY])
            .inst(op::LABEL, &[ENTRY])
            .inst(op::STORE, &[ONE, TWO])
            .inst(op::RETURN, &[])
            .inst(op::FUNCTION_END, &[])
            .build();
        assert_eq!(codes_of(&module), vec![codes::V0302]);
    }

    #[test]
    fn result_type_must_be_a_type() {
        let module = types(header()).inst(op::CONSTANT, &[ONE, 13, 4]).build();
        let found = codes_of(&module);
        assert!(found.contains(&codes::V0300), "{found:?}");
    }

    #[test]
    fn entry_point_must_target_function() {
        let module = body(
            types(header().inst_str(op::ENTRY_POINT, &[5, INT], "bogus", &[])),
        )
        .build();
        assert_eq!(codes_of(&module), vec![codes::V0400]);
    }

    #[test]
    fn duplicate_entry_point_name() {
        let module = body(types(header().inst_str(op::ENTRY_POINT, &[5, MAIN], "main", &[]))).build();
        assert_eq!(codes_of(&module), vec![codes::V0401]);
    }

    #[test]
    fn unterminated_block_and_unclosed_function() {
        let module = types(header())
            .inst(op::FUNCTION, &[VOID, MAIN, 0, FN_TY])
            .inst(op::LABEL, &[ENTRY])
            .inst(op::LABEL, &[13])
            .build();
        assert_eq!(codes_of(&module), vec![codes::V0502, codes::V0500]);
    }

    #[test]
    fn instruction_after_terminator_is_outside_block() {
        let module = types(header())
            .inst(op::FUNCTION, &[VOID, MAIN, 0, FN_TY])
            .inst(op::LABEL, &[ENTRY])
            .inst(op::RETURN, &[])
            .inst(op::RETURN, &[])
            .inst(op::FUNCTION_END, &[])
            .build();
        assert_eq!(codes_of(&module), vec![codes::V0501]);
    }

    #[test]
    fn builtin_skips_unknown_pass_ids() {
        let checks = builtin(&[PassId::HEADER, PassId("custom")]);
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].descriptor().id, PassId::HEADER);
    }
}

//! Top-level assembler pipeline.
//!
//! This module wires the phases together:
//!
//! 1. **Scan and parse**: tokens, includes, macros, EQUs ([`crate::parser`])
//! 2. **Normalize**: operand alignment, label addresses, resolution
//!    ([`crate::normalizer`], [`crate::symbols`])
//! 3. **Encode**: bit-exact words ([`crate::encoder`])
//!
//! The entry points are [`assemble_file`] and [`assemble_source`].

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use log::debug;
use sim_core::{default_punctuation, Equ, LoadRecord, Machine, MachineDefinition, MachineInstruction, PunctChar};

use crate::encoder::{encode_statement, AssembledInstruction};
use crate::errors::{AssemblyError, AssemblyErrorKind};
use crate::normalizer::normalize;
use crate::parser::Parser;

/// Cell size used when a machine has no code store.
const DEFAULT_CELL_SIZE: u32 = 8;

/// Assembler settings taken from the target machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblerConfig {
    /// Punctuation table, including the label, comment, and pseudo characters.
    pub punctuation: Vec<PunctChar>,
    /// Cell address of the first assembled word.
    pub load_address: u64,
    /// Bits per code store cell.
    pub cell_size: u32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            punctuation: default_punctuation(),
            load_address: 0,
            cell_size: DEFAULT_CELL_SIZE,
        }
    }
}

/// The instructions, EQUs, and settings a program is assembled against.
#[derive(Debug, Clone)]
pub struct InstructionSet<'a> {
    instructions: &'a [MachineInstruction],
    equs: &'a [Equ],
    config: AssemblerConfig,
}

impl<'a> InstructionSet<'a> {
    /// Creates an instruction set from its parts.
    #[must_use]
    pub const fn new(
        instructions: &'a [MachineInstruction],
        equs: &'a [Equ],
        config: AssemblerConfig,
    ) -> Self {
        Self {
            instructions,
            equs,
            config,
        }
    }

    /// Uses a running machine's instructions, EQUs, and code store layout.
    #[must_use]
    pub fn of_machine(machine: &'a Machine) -> Self {
        let cell_size = machine
            .config()
            .code_store
            .map_or(DEFAULT_CELL_SIZE, |ram| machine.modules()[ram].cell_size());
        Self::new(
            machine.instructions(),
            machine.equs(),
            AssemblerConfig {
                punctuation: machine.punctuation().to_vec(),
                load_address: machine.config().load_address,
                cell_size,
            },
        )
    }

    /// Uses a machine definition's instructions, EQUs, and code store layout.
    #[must_use]
    pub fn of_definition(definition: &'a MachineDefinition) -> Self {
        let cell_size = definition
            .config
            .code_store
            .map_or(DEFAULT_CELL_SIZE, |ram| definition.modules[ram].cell_size());
        Self::new(
            &definition.instructions,
            &definition.equs,
            AssemblerConfig {
                punctuation: definition.punctuation.clone(),
                load_address: definition.config.load_address,
                cell_size,
            },
        )
    }

    /// Looks up an instruction by mnemonic.
    #[must_use]
    pub fn instruction(&self, name: &str) -> Option<&'a MachineInstruction> {
        self.instructions
            .iter()
            .find(|instruction| instruction.name() == name)
    }

    /// Machine-level EQUs.
    #[must_use]
    pub const fn equs(&self) -> &'a [Equ] {
        self.equs
    }

    /// Assembler settings.
    #[must_use]
    pub const fn config(&self) -> &AssemblerConfig {
        &self.config
    }
}

/// The words of an assembled program, in address order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledProgram {
    /// Emitted words.
    pub words: Vec<AssembledInstruction>,
}

impl AssembledProgram {
    /// Records for [`Machine::load_program`].
    pub fn load_records(&self) -> impl Iterator<Item = LoadRecord> + '_ {
        self.words.iter().map(AssembledInstruction::load_record)
    }

    /// One line per word: `address: value ; source`.
    #[must_use]
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for word in &self.words {
            let digits = word.num_bits.div_ceil(4) as usize;
            let _ = writeln!(
                out,
                "{:04X}: {:0digits$X} ; {}",
                word.address,
                word.bits(),
                word.source
            );
        }
        out
    }

    /// Number of words.
    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Returns `true` if nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Assembles the file at `path`.
///
/// # Errors
///
/// Returns [`AssemblyErrorKind::Io`] if the file cannot be read, otherwise
/// the first error any phase reports.
pub fn assemble_file(path: &Path, isa: &InstructionSet<'_>) -> Result<AssembledProgram, AssemblyError> {
    let text = fs::read_to_string(path).map_err(|err| {
        AssemblyError::new(AssemblyErrorKind::Io(format!(
            "cannot read `{}`: {err}",
            path.display()
        )))
    })?;
    assemble_source(path, &text, isa)
}

/// Assembles `text` as if read from `path`; includes resolve relative to it.
///
/// # Errors
///
/// Returns the first error any phase reports.
pub fn assemble_source(
    path: &Path,
    text: &str,
    isa: &InstructionSet<'_>,
) -> Result<AssembledProgram, AssemblyError> {
    let program = Parser::new(isa).parse(path, text)?;
    let normalized = normalize(program, isa)?;

    let cell_size = isa.config().cell_size;
    let mut words = Vec::new();
    for statement in &normalized {
        words.extend(encode_statement(statement, cell_size)?);
    }
    debug!("assembled `{}` into {} words", path.display(), words.len());
    Ok(AssembledProgram { words })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::{accumulator_machine, ExecutionState, RunMode};
    use std::path::PathBuf;

    fn create_temp_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn assemble_sample(text: &str) -> Result<AssembledProgram, AssemblyError> {
        let definition = accumulator_machine();
        let isa = InstructionSet::of_definition(&definition);
        assemble_source(Path::new("main.asm"), text, &isa)
    }

    #[test]
    fn assemble_empty_source() {
        let program = assemble_sample("").unwrap();
        assert!(program.is_empty());
        assert_eq!(program.listing(), "");
    }

    #[test]
    fn assemble_single_instruction() {
        let program = assemble_sample("load 0x14 ; first\n").unwrap();
        assert_eq!(program.len(), 1);
        let word = &program.words[0];
        assert_eq!((word.address, word.value, word.num_bits), (0, 0x1014, 16));
        assert_eq!(word.comment, "first");
        assert_eq!(program.listing(), "0000: 1014 ; load 0x14 ; first\n");
    }

    #[test]
    fn config_follows_the_code_store() {
        let definition = accumulator_machine();
        let isa = InstructionSet::of_definition(&definition);
        assert_eq!(isa.config().cell_size, 8);
        assert_eq!(isa.config().load_address, 0);
        assert!(isa.instruction("br").is_some());
        assert!(isa.instruction("nop").is_none());

        let machine = Machine::new(accumulator_machine()).unwrap();
        let from_machine = InstructionSet::of_machine(&machine);
        assert_eq!(from_machine.config(), isa.config());
    }

    #[test]
    fn missing_root_file_is_io_error() {
        let definition = accumulator_machine();
        let isa = InstructionSet::of_definition(&definition);
        let err = assemble_file(Path::new("/nonexistent/prog.asm"), &isa).unwrap_err();
        assert!(matches!(err.kind, AssemblyErrorKind::Io(_)));
        assert!(err.location.is_none());
    }

    #[test]
    fn include_error_points_into_the_included_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        create_temp_file(temp_dir.path(), "lib.asm", "halt\nload missing\n");
        let main = create_temp_file(temp_dir.path(), "main.asm", "\n.include \"lib.asm\"\nhalt\n");
        let definition = accumulator_machine();
        let isa = InstructionSet::of_definition(&definition);

        let err = assemble_file(&main, &isa).unwrap_err();
        assert!(matches!(err.kind, AssemblyErrorKind::UndefinedOperand(_)));
        let location = err.location.unwrap();
        assert!(location.file.ends_with("lib.asm"));
        assert_eq!(location.line, 2);
        assert_eq!(location.include_chain.len(), 1);
        assert_eq!(location.include_chain[0].line, 2);
    }

    #[test]
    fn assembled_program_runs() {
        let text = "\
start:  load count
        sub one
        store count
        jmpz done
        jmp start
done:   halt
count:  .data 2 3
one:    .data 2 1
";
        let program = assemble_sample(text).unwrap();
        let mut machine = Machine::new(accumulator_machine()).unwrap();
        machine.load_program(program.load_records()).unwrap();
        assert_eq!(machine.execute(RunMode::CommandLine), ExecutionState::ExecutionHalted);
        let acc = machine.modules().register_named("acc").unwrap();
        assert_eq!(machine.modules()[acc].value(), 0);
        let pc = machine.modules().register_named("pc").unwrap();
        assert_eq!(machine.modules()[pc].value(), 12);
    }
}

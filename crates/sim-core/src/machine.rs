//! Machine definitions and the micro-step run loop.
//!
//! A [`MachineDefinition`] is plain data: what a machine-file loader produces
//! and what the assembler reads. [`Machine::new`] validates it and adds the
//! runtime pieces: the control unit, the shared run-mode flag, attached I/O
//! channels, and state-change subscribers.
//!
//! # Ownership while running
//!
//! [`Machine::execute`] runs on the calling thread. [`Machine::spawn`] moves
//! the machine onto an execution thread and hands back an
//! [`ExecutionHandle`]; the caller can only touch registers or memory again
//! after [`ExecutionHandle::join`] returns the machine.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::SystemTime;

use log::{debug, info, trace, warn};

use crate::bits::unsigned_bits;
use crate::channel::{Channels, IoChannel};
use crate::control::{
    ControlUnit, CurrentInstruction, ExecutionState, RunMode, RunModeHandle, StateSnapshot,
};
use crate::instruction::{InstructionId, MachineInstruction};
use crate::micro::{ExecContext, MicroId, Microinstruction};
use crate::module::{Modules, RamId, RegisterId};
use crate::{ExecutionError, ValidationError};

/// Machine-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineConfig {
    /// Bit 0 is the least-significant bit when set; otherwise the most significant.
    pub index_from_right: bool,
    /// RAM that holds programs and carries breakpoints.
    pub code_store: Option<RamId>,
    /// Register whose value addresses the next instruction.
    pub program_counter: Option<RegisterId>,
    /// Cell address where assembled code starts.
    pub load_address: u64,
    /// Program counter value after a program is loaded.
    pub start_address: u64,
}

/// A global assembly-time constant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Equ {
    /// Symbol name.
    pub name: String,
    /// Substituted value.
    pub value: i64,
}

impl Equ {
    /// Creates a constant.
    #[must_use]
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Role of a punctuation character in assembly text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum PunctUse {
    /// May appear inside symbol names.
    Symbol,
    /// Forms a token on its own.
    Token,
    /// Terminates a label definition.
    Label,
    /// Starts a comment running to the end of the line.
    Comment,
    /// Prefixes pseudo-instructions such as `.data`.
    Pseudo,
    /// Rejected wherever it appears.
    Illegal,
}

/// One entry of the punctuation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct PunctChar {
    /// The character.
    pub ch: char,
    /// Its role.
    pub usage: PunctUse,
}

impl PunctChar {
    /// Creates a table entry.
    #[must_use]
    pub const fn new(ch: char, usage: PunctUse) -> Self {
        Self { ch, usage }
    }
}

/// The punctuation table new machines start with.
#[must_use]
pub fn default_punctuation() -> Vec<PunctChar> {
    let mut table = vec![
        PunctChar::new(':', PunctUse::Label),
        PunctChar::new(';', PunctUse::Comment),
        PunctChar::new('.', PunctUse::Pseudo),
    ];
    table.extend("_$@?!".chars().map(|ch| PunctChar::new(ch, PunctUse::Symbol)));
    table.extend(
        "()[]{},+-*/#<>=&|^~%`\\"
            .chars()
            .map(|ch| PunctChar::new(ch, PunctUse::Token)),
    );
    table
}

/// Everything that defines a simulated instruction set.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct MachineDefinition {
    /// Machine name.
    pub name: String,
    /// Registers, arrays, RAMs, and condition bits.
    pub modules: Modules,
    /// Every micro, addressed by [`MicroId`].
    pub micros: Vec<Microinstruction>,
    /// Decodable instructions, addressed by [`InstructionId`].
    pub instructions: Vec<MachineInstruction>,
    /// Micros run before every instruction.
    pub fetch_sequence: MachineInstruction,
    /// Global assembly-time constants.
    pub equs: Vec<Equ>,
    /// Punctuation table used by the assembler.
    pub punctuation: Vec<PunctChar>,
    /// Machine-wide settings.
    pub config: MachineConfig,
}

impl MachineDefinition {
    /// Creates an empty definition with the default punctuation table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            modules: Modules::new(),
            micros: Vec::new(),
            instructions: Vec::new(),
            fetch_sequence: MachineInstruction::fetch_sequence(Vec::new()),
            equs: Vec::new(),
            punctuation: default_punctuation(),
            config: MachineConfig::default(),
        }
    }

    /// Adds a micro and returns its handle.
    pub fn add_micro(&mut self, micro: Microinstruction) -> MicroId {
        self.micros.push(micro);
        MicroId(self.micros.len() - 1)
    }

    /// Adds an instruction and returns its handle.
    pub fn add_instruction(&mut self, instruction: MachineInstruction) -> InstructionId {
        self.instructions.push(instruction);
        InstructionId(self.instructions.len() - 1)
    }

    /// Looks up an instruction by mnemonic.
    #[must_use]
    pub fn instruction_named(&self, name: &str) -> Option<&MachineInstruction> {
        self.instructions
            .iter()
            .find(|instruction| instruction.name() == name)
    }

    /// Character playing `usage`, if any.
    #[must_use]
    pub fn punct_char(&self, usage: PunctUse) -> Option<char> {
        self.punctuation
            .iter()
            .find(|entry| entry.usage == usage)
            .map(|entry| entry.ch)
    }

    /// Checks every part of the definition and their cross references.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::Machine("machine name cannot be blank".into()));
        }
        self.modules.validate()?;
        for micro in &self.micros {
            micro.validate(&self.modules)?;
        }
        self.validate_micro_refs(&self.fetch_sequence)?;

        let code_store = match self.config.code_store {
            Some(id) => Some(self.modules.ram(id).ok_or_else(|| {
                ValidationError::Machine(format!("code store {} does not exist", id.0))
            })?),
            None => None,
        };
        if let Some(pc) = self.config.program_counter {
            if self.modules.register(pc).is_none() {
                return Err(ValidationError::Machine(format!(
                    "program counter {} does not exist",
                    pc.0
                )));
            }
        }
        if let Some(ram) = code_store {
            for (what, address) in [
                ("load", self.config.load_address),
                ("start", self.config.start_address),
            ] {
                if usize::try_from(address).map_or(true, |address| address >= ram.len()) {
                    return Err(ValidationError::Machine(format!(
                        "{what} address {address} is outside code store `{}`",
                        ram.name()
                    )));
                }
            }
        }

        let mut names = HashSet::new();
        let mut opcodes: Vec<(u32, u64, &str)> = Vec::new();
        for instruction in &self.instructions {
            instruction.validate()?;
            self.validate_micro_refs(instruction)?;
            if !names.insert(instruction.name()) {
                return Err(ValidationError::instruction(
                    instruction.name(),
                    "another instruction has the same name",
                ));
            }
            let width = instruction.opcode_width();
            let opcode = instruction.opcode();
            if let Some(&(_, _, taken_by)) = opcodes.iter().find(|&&(other_width, other, _)| {
                opcode_prefixes_overlap(width, opcode, other_width, other)
            }) {
                return Err(ValidationError::instruction(
                    instruction.name(),
                    format!("opcode {opcode:#x} overlaps the opcode of `{taken_by}`"),
                ));
            }
            opcodes.push((width, opcode, instruction.name()));
            if let Some(ram) = code_store {
                if instruction.num_bits() % ram.cell_size() != 0 {
                    return Err(ValidationError::instruction(
                        instruction.name(),
                        format!(
                            "length {} is not a multiple of the {}-bit cell size",
                            instruction.num_bits(),
                            ram.cell_size()
                        ),
                    ));
                }
            }
        }

        let mut equ_names = HashSet::new();
        for equ in &self.equs {
            if equ.name.trim().is_empty() || !equ_names.insert(equ.name.as_str()) {
                return Err(ValidationError::Machine(format!(
                    "EQU `{}` is blank or defined twice",
                    equ.name
                )));
            }
        }

        let mut chars = HashSet::new();
        for entry in &self.punctuation {
            if !chars.insert(entry.ch) || entry.ch.is_alphanumeric() || entry.ch.is_whitespace() {
                return Err(ValidationError::Machine(format!(
                    "punctuation character `{}` is repeated or not punctuation",
                    entry.ch
                )));
            }
        }
        for usage in [PunctUse::Label, PunctUse::Comment, PunctUse::Pseudo] {
            let count = self
                .punctuation
                .iter()
                .filter(|entry| entry.usage == usage)
                .count();
            if count != 1 {
                return Err(ValidationError::Machine(format!(
                    "punctuation table needs exactly one {usage:?} character, found {count}"
                )));
            }
        }
        Ok(())
    }

    fn validate_micro_refs(&self, instruction: &MachineInstruction) -> Result<(), ValidationError> {
        match instruction
            .micros()
            .iter()
            .find(|id| id.0 >= self.micros.len())
        {
            Some(id) => Err(ValidationError::instruction(
                instruction.name(),
                format!("refers to missing micro {}", id.0),
            )),
            None => Ok(()),
        }
    }
}

/// One assembled word to place in the code store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRecord {
    /// First cell address.
    pub address: u64,
    /// Encoded value, sign-extended from `num_bits`.
    pub value: i64,
    /// Encoded length in bits; a multiple of the cell size.
    pub num_bits: u32,
}

enum Outcome {
    State(ExecutionState),
    Break(u64),
    Exception(ExecutionError),
}

/// A validated machine with its execution state.
pub struct Machine {
    name: String,
    modules: Modules,
    micros: Vec<Microinstruction>,
    instructions: Vec<MachineInstruction>,
    fetch_sequence: MachineInstruction,
    equs: Vec<Equ>,
    punctuation: Vec<PunctChar>,
    config: MachineConfig,
    control: ControlUnit,
    run_mode: RunModeHandle,
    state: ExecutionState,
    acknowledged_break: Option<u64>,
    channels: Channels,
    subscribers: Vec<Sender<StateSnapshot>>,
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("name", &self.name)
            .field("control", &self.control)
            .field("state", &self.state)
            .field("run_mode", &self.run_mode.get())
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// Validates `definition` and builds a machine at `(fetch sequence, 0)`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] in the definition.
    pub fn new(definition: MachineDefinition) -> Result<Self, ValidationError> {
        definition.validate()?;
        debug!(
            "machine `{}`: {} instructions, {} micros",
            definition.name,
            definition.instructions.len(),
            definition.micros.len()
        );
        Ok(Self {
            name: definition.name,
            modules: definition.modules,
            micros: definition.micros,
            instructions: definition.instructions,
            fetch_sequence: definition.fetch_sequence,
            equs: definition.equs,
            punctuation: definition.punctuation,
            config: definition.config,
            control: ControlUnit::new(),
            run_mode: RunModeHandle::default(),
            state: ExecutionState::NeverRun,
            acknowledged_break: None,
            channels: Channels::new(),
            subscribers: Vec::new(),
        })
    }

    /// Copies the definition back out, with current module contents.
    #[must_use]
    pub fn to_definition(&self) -> MachineDefinition {
        MachineDefinition {
            name: self.name.clone(),
            modules: self.modules.clone(),
            micros: self.micros.clone(),
            instructions: self.instructions.clone(),
            fetch_sequence: self.fetch_sequence.clone(),
            equs: self.equs.clone(),
            punctuation: self.punctuation.clone(),
            config: self.config,
        }
    }

    /// Machine name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hardware state.
    #[must_use]
    pub const fn modules(&self) -> &Modules {
        &self.modules
    }

    /// Mutable hardware state; only reachable while no run owns the machine.
    pub fn modules_mut(&mut self) -> &mut Modules {
        &mut self.modules
    }

    /// Every micro.
    #[must_use]
    pub fn micros(&self) -> &[Microinstruction] {
        &self.micros
    }

    /// Decodable instructions.
    #[must_use]
    pub fn instructions(&self) -> &[MachineInstruction] {
        &self.instructions
    }

    /// Looks up an instruction by mnemonic.
    #[must_use]
    pub fn instruction_named(&self, name: &str) -> Option<&MachineInstruction> {
        self.instructions
            .iter()
            .find(|instruction| instruction.name() == name)
    }

    /// The fetch sequence.
    #[must_use]
    pub const fn fetch_sequence(&self) -> &MachineInstruction {
        &self.fetch_sequence
    }

    /// Global assembly-time constants.
    #[must_use]
    pub fn equs(&self) -> &[Equ] {
        &self.equs
    }

    /// Punctuation table.
    #[must_use]
    pub fn punctuation(&self) -> &[PunctChar] {
        &self.punctuation
    }

    /// Character playing `usage`, if any.
    #[must_use]
    pub fn punct_char(&self, usage: PunctUse) -> Option<char> {
        self.punctuation
            .iter()
            .find(|entry| entry.usage == usage)
            .map(|entry| entry.ch)
    }

    /// Machine-wide settings.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Execution cursor.
    #[must_use]
    pub const fn control(&self) -> &ControlUnit {
        &self.control
    }

    /// Last published execution state.
    #[must_use]
    pub const fn state(&self) -> ExecutionState {
        self.state
    }

    /// A handle to the run-mode flag that stays valid while the machine runs.
    #[must_use]
    pub fn run_mode(&self) -> RunModeHandle {
        self.run_mode.clone()
    }

    /// Receives every state change published from now on.
    pub fn subscribe(&mut self) -> Receiver<StateSnapshot> {
        let (sender, receiver) = mpsc::channel();
        self.subscribers.push(sender);
        receiver
    }

    /// Attaches an I/O channel under `name`, replacing any previous one.
    pub fn attach_channel(&mut self, name: impl Into<String>, channel: Box<dyn IoChannel>) {
        self.channels.insert(name.into(), channel);
    }

    /// Detaches and returns the channel named `name`.
    pub fn detach_channel(&mut self, name: &str) -> Option<Box<dyn IoChannel>> {
        self.channels.remove(name)
    }

    /// Channel names referenced by `Io` micros.
    #[must_use]
    pub fn channel_names(&self) -> BTreeSet<String> {
        self.micros
            .iter()
            .filter_map(Microinstruction::channel)
            .map(str::to_string)
            .collect()
    }

    /// Writes assembled words into the code store, points the program counter
    /// at the start address, and resets the control unit.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::NoCodeStore`] without a code store, or
    /// [`ExecutionError::AddressOutOfRange`] when a word does not fit.
    pub fn load_program(
        &mut self,
        records: impl IntoIterator<Item = LoadRecord>,
    ) -> Result<(), ExecutionError> {
        let ram_id = self.config.code_store.ok_or(ExecutionError::NoCodeStore)?;
        let ram = &mut self.modules[ram_id];
        let cell_size = ram.cell_size();
        let mut words = 0_usize;
        for record in records {
            let cells = (record.num_bits / cell_size) as usize;
            ram.write(record.address, cells, unsigned_bits(record.value, record.num_bits))?;
            words += 1;
        }
        if let Some(pc) = self.config.program_counter {
            self.modules[pc].store(i128::from(self.config.start_address));
        }
        debug!("loaded {words} words into `{}`", self.modules[ram_id].name());
        self.reset_execution();
        Ok(())
    }

    /// Returns the cursor to `(fetch sequence, 0)`, clears halt bits and
    /// breakpoint acknowledgement, and forgets the last state.
    pub fn reset_execution(&mut self) {
        self.control.reset();
        self.acknowledged_break = None;
        self.modules.clear_halt_bits(self.config.index_from_right);
        self.state = ExecutionState::NeverRun;
    }

    /// Runs on the calling thread in `mode` until the run ends.
    pub fn execute(&mut self, mode: RunMode) -> ExecutionState {
        self.run_mode.set(mode);
        self.run()
    }

    /// Moves the machine onto an execution thread running in `mode`.
    #[must_use = "the machine is only returned by joining the handle"]
    pub fn spawn(self, mode: RunMode) -> ExecutionHandle {
        let run_mode = self.run_mode.clone();
        run_mode.set(mode);
        let thread = thread::spawn(move || {
            let mut machine = self;
            machine.run();
            machine
        });
        ExecutionHandle { run_mode, thread }
    }

    fn run(&mut self) -> ExecutionState {
        self.publish(ExecutionState::StartOfExecuteThread, None, None);
        let from_right = self.config.index_from_right;
        let outcome = if self.modules.any_halt_bit_set(from_right) {
            Outcome::State(ExecutionState::ExecutionHalted)
        } else {
            loop {
                let mode = self.run_mode.get();
                match mode {
                    RunMode::Stop => break Outcome::State(ExecutionState::ExecutionHalted),
                    RunMode::Abort => break Outcome::State(ExecutionState::ExecutionAborted),
                    _ => {}
                }
                if let Some(outcome) = self.step(mode) {
                    break outcome;
                }
            }
        };
        self.finish(outcome)
    }

    fn step(&mut self, mode: RunMode) -> Option<Outcome> {
        let index = self.control.micro_index();
        let micros = match self.control.current() {
            CurrentInstruction::Fetch => self.fetch_sequence.micros(),
            CurrentInstruction::Instruction(id) => self
                .instructions
                .get(id.0)
                .map_or(&[][..], MachineInstruction::micros),
        };
        let Some(micro_id) = usize::try_from(index)
            .ok()
            .and_then(|slot| micros.get(slot))
            .copied()
        else {
            return Some(Outcome::Exception(ExecutionError::MicroIndexOutOfRange {
                instruction: self.current_name().to_string(),
                index,
            }));
        };

        if self.control.at_machine_cycle_start() {
            if mode.is_interactive() {
                self.publish(ExecutionState::StartOfMachineCycle, None, None);
            }
            if let Some(address) = self.unacknowledged_breakpoint() {
                return Some(Outcome::Break(address));
            }
        }
        if mode.is_interactive() {
            self.publish(ExecutionState::StartOfMicroinstruction, None, None);
        }

        let saved = self.control;
        self.control.offset_micro_index(1);
        let micro = &self.micros[micro_id.0];
        let is_end = micro.is_end();
        let mut ctx = ExecContext {
            modules: &mut self.modules,
            control: &mut self.control,
            channels: &mut self.channels,
            instructions: &self.instructions,
            index_from_right: self.config.index_from_right,
        };
        if let Err(err) = micro.execute(&mut ctx) {
            self.control = saved;
            return Some(Outcome::Exception(err));
        }

        if self.modules.any_halt_bit_set(self.config.index_from_right) {
            return Some(Outcome::State(ExecutionState::ExecutionHalted));
        }
        match mode {
            RunMode::StepByMicro => Some(Outcome::State(ExecutionState::HaltedStepByMicro)),
            RunMode::StepByInstr if is_end => Some(Outcome::State(ExecutionState::ExecutionHalted)),
            _ => None,
        }
    }

    fn unacknowledged_breakpoint(&mut self) -> Option<u64> {
        let (Some(ram), Some(pc)) = (self.config.code_store, self.config.program_counter) else {
            return None;
        };
        let address = self.modules[pc].unsigned_value();
        if !self.modules[ram].has_breakpoint(address) || self.acknowledged_break == Some(address) {
            self.acknowledged_break = None;
            return None;
        }
        self.acknowledged_break = Some(address);
        Some(address)
    }

    fn finish(&mut self, outcome: Outcome) -> ExecutionState {
        let (state, address, message) = match outcome {
            Outcome::State(state) => (state, None, None),
            Outcome::Break(address) => {
                info!("break at address {address}");
                (ExecutionState::Break, Some(address), None)
            }
            Outcome::Exception(err) => {
                warn!("execution stopped: {err}");
                (ExecutionState::ExceptionThrown, None, Some(err.to_string()))
            }
        };
        if state == ExecutionState::ExecutionHalted {
            info!("`{}` halted", self.name);
        }
        if state != ExecutionState::ExecutionAborted {
            self.run_mode.set(RunMode::Stop);
        }
        for (name, channel) in &mut self.channels {
            if let Err(err) = channel.flush() {
                warn!("flushing channel `{name}` failed: {err}");
            }
        }
        self.publish(state, address, message);
        state
    }

    fn current_name(&self) -> &str {
        match self.control.current() {
            CurrentInstruction::Fetch => self.fetch_sequence.name(),
            CurrentInstruction::Instruction(id) => self
                .instructions
                .get(id.0)
                .map_or("?", MachineInstruction::name),
        }
    }

    fn publish(&mut self, state: ExecutionState, address: Option<u64>, message: Option<String>) {
        if state == ExecutionState::StartOfMicroinstruction {
            trace!("{state:?} at `{}`[{}]", self.current_name(), self.control.micro_index());
        } else {
            debug!("{state:?} at `{}`[{}]", self.current_name(), self.control.micro_index());
        }
        self.state = state;
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = StateSnapshot {
            state,
            at: SystemTime::now(),
            instruction: self.current_name().to_string(),
            micro_index: self.control.micro_index(),
            address,
            message,
        };
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
    }
}

/// A machine running on its own thread.
#[derive(Debug)]
pub struct ExecutionHandle {
    run_mode: RunModeHandle,
    thread: JoinHandle<Machine>,
}

impl ExecutionHandle {
    /// The running machine's run-mode flag.
    #[must_use]
    pub const fn run_mode(&self) -> &RunModeHandle {
        &self.run_mode
    }

    /// Requests a stop at the next micro boundary.
    pub fn stop(&self) {
        self.run_mode.stop();
    }

    /// Requests an abort at the next micro boundary.
    pub fn abort(&self) {
        self.run_mode.abort();
    }

    /// Returns `true` once the execution thread has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the run to end and returns the machine.
    ///
    /// # Errors
    ///
    /// Returns the panic payload if the execution thread panicked.
    pub fn join(self) -> thread::Result<Machine> {
        self.thread.join()
    }
}

/// Two opcodes overlap when the narrower one equals the top bits of the
/// wider one, since decoding could then never reach one of them.
fn opcode_prefixes_overlap(width: u32, opcode: u64, other_width: u32, other: u64) -> bool {
    let common = width.min(other_width);
    if common == 0 {
        return false;
    }
    opcode >> (width - common) == other >> (other_width - common)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::field::Field;
    use crate::module::{Ram, Register};

    fn minimal() -> MachineDefinition {
        let mut definition = MachineDefinition::new("tiny");
        let ram = definition.modules.add_ram(Ram::new("main", 16, 8));
        let pc = definition.modules.add_register(Register::new("pc", 4));
        definition.config.code_store = Some(ram);
        definition.config.program_counter = Some(pc);
        let end = definition.add_micro(Microinstruction::end());
        definition.add_instruction(
            MachineInstruction::new("nop", 0, vec![Field::new("op", 8)]).with_micros(vec![end]),
        );
        definition
    }

    #[test]
    fn valid_definition_builds() {
        let machine = Machine::new(minimal()).unwrap();
        assert_eq!(machine.state(), ExecutionState::NeverRun);
        assert!(machine.control().at_machine_cycle_start());
        assert_eq!(machine.to_definition(), minimal());
    }

    #[test]
    fn duplicate_instruction_names_are_rejected() {
        let mut definition = minimal();
        definition.add_instruction(MachineInstruction::new("nop", 1, vec![Field::new("op", 8)]));
        assert!(matches!(
            definition.validate(),
            Err(ValidationError::Instruction { .. })
        ));
    }

    #[test]
    fn duplicate_opcodes_are_rejected() {
        let mut definition = minimal();
        definition.add_instruction(MachineInstruction::new("other", 0, vec![Field::new("op", 8)]));
        assert!(definition.validate().is_err());
    }

    #[rstest]
    #[case::short_prefix_of_long(0x1, 0x12, false, false)]
    #[case::long_listed_first(0x1, 0x12, true, false)]
    #[case::different_top_bits(0x2, 0x12, false, true)]
    #[case::same_low_bits(0x1, 0x21, true, true)]
    fn opcodes_of_different_widths_must_not_overlap(
        #[case] short_op: u64,
        #[case] long_op: u64,
        #[case] long_first: bool,
        #[case] valid: bool,
    ) {
        let mut definition = minimal();
        let end = definition.add_micro(Microinstruction::end());
        let short = MachineInstruction::new(
            "short",
            short_op,
            vec![Field::new("op", 4), Field::new("x", 4)],
        )
        .with_micros(vec![end]);
        let long = MachineInstruction::new(
            "long",
            long_op,
            vec![Field::new("op", 8), Field::new("x", 8)],
        )
        .with_micros(vec![end]);
        if long_first {
            definition.add_instruction(long);
            definition.add_instruction(short);
        } else {
            definition.add_instruction(short);
            definition.add_instruction(long);
        }
        assert_eq!(definition.validate().is_ok(), valid);
    }

    #[test]
    fn instruction_length_must_be_whole_cells() {
        let mut definition = minimal();
        definition.add_instruction(MachineInstruction::new("odd", 1, vec![Field::new("op", 4)]));
        assert!(definition.validate().is_err());
    }

    #[test]
    fn missing_micro_is_rejected() {
        let mut definition = minimal();
        definition.fetch_sequence = MachineInstruction::fetch_sequence(vec![MicroId(9)]);
        assert!(definition.validate().is_err());
    }

    #[test]
    fn punctuation_needs_label_comment_and_pseudo() {
        let mut definition = minimal();
        definition
            .punctuation
            .retain(|entry| entry.usage != PunctUse::Comment);
        assert!(matches!(
            definition.validate(),
            Err(ValidationError::Machine(_))
        ));
        assert_eq!(minimal().punct_char(PunctUse::Label), Some(':'));
    }

    #[test]
    fn load_program_writes_code_store_and_sets_pc() {
        let mut definition = minimal();
        definition.config.start_address = 2;
        let mut machine = Machine::new(definition).unwrap();
        machine
            .load_program([
                LoadRecord {
                    address: 0,
                    value: 0x1234,
                    num_bits: 16,
                },
                LoadRecord {
                    address: 2,
                    value: -1,
                    num_bits: 8,
                },
            ])
            .unwrap();
        let ram = machine.modules().ram_named("main").unwrap();
        let pc = machine.modules().register_named("pc").unwrap();
        assert_eq!(machine.modules()[ram].cell(0), Some(0x12));
        assert_eq!(machine.modules()[ram].cell(1), Some(0x34));
        assert_eq!(machine.modules()[ram].cell(2), Some(-1));
        assert_eq!(machine.modules()[pc].value(), 2);
    }

    #[test]
    fn empty_fetch_sequence_throws() {
        let mut machine = Machine::new(minimal()).unwrap();
        let events = machine.subscribe();
        assert_eq!(machine.execute(RunMode::Run), ExecutionState::ExceptionThrown);
        let states: Vec<ExecutionState> = events.try_iter().map(|snapshot| snapshot.state).collect();
        assert_eq!(
            states,
            vec![ExecutionState::StartOfExecuteThread, ExecutionState::ExceptionThrown]
        );
        assert_eq!(machine.run_mode().get(), RunMode::Stop);
    }

    #[test]
    fn channel_names_come_from_io_micros() {
        let mut definition = minimal();
        let pc = definition.modules.register_named("pc").unwrap();
        definition.add_micro(Microinstruction::new(
            "out",
            crate::micro::Micro::Io {
                kind: crate::micro::IoKind::Integer,
                direction: crate::micro::IoDirection::Output,
                buffer: pc,
                channel: "console".into(),
            },
        ));
        let machine = Machine::new(definition).unwrap();
        assert_eq!(
            machine.channel_names().into_iter().collect::<Vec<_>>(),
            vec!["console".to_string()]
        );
    }
}

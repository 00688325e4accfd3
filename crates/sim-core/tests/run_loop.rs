//! Run-loop coverage against the built-in accumulator machine.

use log as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use serde_json as _;
use sim_core::{
    accumulator_machine, BufferChannel, CurrentInstruction, ExecutionState, LoadRecord, Machine,
    RunMode, SharedOutput, StateSnapshot, CONSOLE_CHANNEL,
};
use thiserror as _;

/// Counts down from 3, printing each value, then halts.
const COUNTDOWN: &[(u64, u16)] = &[
    (0, 0x1014),  // load count
    (2, 0x7000),  // out
    (4, 0x4016),  // sub one
    (6, 0x2014),  // store count
    (8, 0x600C),  // jmpz 12
    (10, 0x5000), // jmp 0
    (12, 0x0000), // halt
    (20, 0x0003), // count
    (22, 0x0001), // one
];

fn records(program: &[(u64, u16)]) -> Vec<LoadRecord> {
    program
        .iter()
        .map(|&(address, word)| LoadRecord {
            address,
            value: i64::from(word),
            num_bits: 16,
        })
        .collect()
}

fn machine_with(program: &[(u64, u16)], input: &str) -> (Machine, SharedOutput) {
    let mut machine = Machine::new(accumulator_machine()).unwrap();
    machine.load_program(records(program)).unwrap();
    let channel = BufferChannel::new(input);
    let output = channel.output();
    machine.attach_channel(CONSOLE_CHANNEL, Box::new(channel));
    (machine, output)
}

fn register(machine: &Machine, name: &str) -> i64 {
    let id = machine.modules().register_named(name).unwrap();
    machine.modules()[id].value()
}

fn states(events: &std::sync::mpsc::Receiver<StateSnapshot>) -> Vec<ExecutionState> {
    events.try_iter().map(|snapshot| snapshot.state).collect()
}

#[test]
fn countdown_prints_and_halts() {
    let (mut machine, output) = machine_with(COUNTDOWN, "");
    let events = machine.subscribe();

    assert_eq!(machine.execute(RunMode::CommandLine), ExecutionState::ExecutionHalted);
    assert_eq!(output.lock().unwrap().as_str(), "3\n2\n1\n");
    assert_eq!(register(&machine, "acc"), 0);
    assert_eq!(register(&machine, "pc"), 14);
    assert_eq!(machine.run_mode().get(), RunMode::Stop);
    assert_eq!(
        states(&events),
        vec![
            ExecutionState::StartOfExecuteThread,
            ExecutionState::ExecutionHalted
        ]
    );
}

#[test]
fn step_by_micro_runs_exactly_one_micro() {
    let (mut machine, _) = machine_with(COUNTDOWN, "");
    let events = machine.subscribe();

    assert_eq!(machine.execute(RunMode::StepByMicro), ExecutionState::HaltedStepByMicro);
    assert_eq!(machine.control().current(), CurrentInstruction::Fetch);
    assert_eq!(machine.control().micro_index(), 1);
    assert_eq!(register(&machine, "ir"), 0);
    assert_eq!(machine.run_mode().get(), RunMode::Stop);
    assert_eq!(
        states(&events),
        vec![
            ExecutionState::StartOfExecuteThread,
            ExecutionState::StartOfMachineCycle,
            ExecutionState::StartOfMicroinstruction,
            ExecutionState::HaltedStepByMicro,
        ]
    );

    assert_eq!(machine.execute(RunMode::StepByMicro), ExecutionState::HaltedStepByMicro);
    assert_eq!(machine.control().micro_index(), 2);
    assert_eq!(register(&machine, "ir"), 0x1014);
}

#[test]
fn step_by_instruction_stops_after_end() {
    let (mut machine, output) = machine_with(COUNTDOWN, "");

    assert_eq!(machine.execute(RunMode::StepByInstr), ExecutionState::ExecutionHalted);
    assert_eq!(register(&machine, "acc"), 3);
    assert_eq!(register(&machine, "pc"), 2);
    assert!(machine.control().at_machine_cycle_start());

    assert_eq!(machine.execute(RunMode::StepByInstr), ExecutionState::ExecutionHalted);
    assert_eq!(output.lock().unwrap().as_str(), "3\n");
    assert_eq!(register(&machine, "pc"), 4);
}

#[test]
fn breakpoint_halts_once_per_arrival() {
    let (mut machine, output) = machine_with(COUNTDOWN, "");
    let main = machine.modules().ram_named("main").unwrap();
    machine.modules_mut()[main].set_breakpoint(4, true);
    let events = machine.subscribe();

    assert_eq!(machine.execute(RunMode::Run), ExecutionState::Break);
    assert_eq!(register(&machine, "pc"), 4);
    assert_eq!(output.lock().unwrap().as_str(), "3\n");
    let last = events.try_iter().last().unwrap();
    assert_eq!(last.state, ExecutionState::Break);
    assert_eq!(last.address, Some(4));

    // Resuming passes the acknowledged breakpoint and stops on the next arrival.
    assert_eq!(machine.execute(RunMode::Run), ExecutionState::Break);
    assert_eq!(output.lock().unwrap().as_str(), "3\n2\n");

    machine.modules_mut()[main].set_breakpoint(4, false);
    assert_eq!(machine.execute(RunMode::Run), ExecutionState::ExecutionHalted);
    assert_eq!(output.lock().unwrap().as_str(), "3\n2\n1\n");
}

#[test]
fn failed_micro_leaves_index_at_the_failing_step() {
    let (mut machine, _) = machine_with(&[(0, 0xF000)], "");
    let events = machine.subscribe();

    assert_eq!(machine.execute(RunMode::Run), ExecutionState::ExceptionThrown);
    assert_eq!(machine.control().current(), CurrentInstruction::Fetch);
    assert_eq!(machine.control().micro_index(), 3);
    let last = events.try_iter().last().unwrap();
    assert_eq!(last.state, ExecutionState::ExceptionThrown);
    assert!(last.message.unwrap().contains("opcode"));
}

#[test]
fn unattached_channel_is_an_exception() {
    let mut machine = Machine::new(accumulator_machine()).unwrap();
    machine.load_program(records(&[(0, 0x7000)])).unwrap();

    assert_eq!(machine.execute(RunMode::Run), ExecutionState::ExceptionThrown);
    let CurrentInstruction::Instruction(id) = machine.control().current() else {
        panic!("expected to stop inside an instruction");
    };
    assert_eq!(machine.instructions()[id.0].name(), "out");
    assert_eq!(machine.control().micro_index(), 0);
}

#[test]
fn input_flows_through_the_accumulator() {
    let (mut machine, output) = machine_with(&[(0, 0x8000), (2, 0x7000), (4, 0x0000)], "42\n");

    assert_eq!(machine.execute(RunMode::CommandLine), ExecutionState::ExecutionHalted);
    assert_eq!(output.lock().unwrap().as_str(), "42\n");
}

#[test]
fn relative_branch_skips_forward() {
    let (mut machine, output) = machine_with(&[(0, 0x9002), (2, 0x7000), (4, 0x0000)], "");

    assert_eq!(machine.execute(RunMode::Run), ExecutionState::ExecutionHalted);
    assert_eq!(output.lock().unwrap().as_str(), "");
    assert_eq!(register(&machine, "pc"), 6);
}

#[test]
fn set_halt_bit_stops_before_any_micro() {
    let (mut machine, output) = machine_with(COUNTDOWN, "");
    assert_eq!(machine.execute(RunMode::Run), ExecutionState::ExecutionHalted);
    let pc = register(&machine, "pc");

    assert_eq!(machine.execute(RunMode::Run), ExecutionState::ExecutionHalted);
    assert_eq!(register(&machine, "pc"), pc);
    assert_eq!(output.lock().unwrap().as_str(), "3\n2\n1\n");

    machine.reset_execution();
    assert_eq!(machine.state(), ExecutionState::NeverRun);
    assert_eq!(machine.execute(RunMode::StepByMicro), ExecutionState::HaltedStepByMicro);
}

#[test]
fn spawned_run_stops_on_request_and_returns_the_machine() {
    let (mut machine, _) = machine_with(&[(0, 0x5000)], "");
    let events = machine.subscribe();

    let handle = machine.spawn(RunMode::Run);
    assert_eq!(
        events.recv().unwrap().state,
        ExecutionState::StartOfExecuteThread
    );
    handle.stop();
    let machine = handle.join().unwrap();

    assert_eq!(machine.state(), ExecutionState::ExecutionHalted);
    assert_eq!(machine.run_mode().get(), RunMode::Stop);
}

#[test]
fn abort_keeps_the_abort_mode() {
    let (machine, _) = machine_with(&[(0, 0x5000)], "");

    let handle = machine.spawn(RunMode::Run);
    handle.abort();
    let machine = handle.join().unwrap();

    assert_eq!(machine.state(), ExecutionState::ExecutionAborted);
    assert_eq!(machine.run_mode().get(), RunMode::Abort);
}

#[test]
fn spawned_program_runs_to_completion() {
    let (machine, output) = machine_with(COUNTDOWN, "");

    let machine = machine.spawn(RunMode::Run).join().unwrap();

    assert_eq!(machine.state(), ExecutionState::ExecutionHalted);
    assert_eq!(output.lock().unwrap().as_str(), "3\n2\n1\n");
}

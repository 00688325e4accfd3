//! CLI entry point for the microsim assembler and simulator.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use assembler::assembler::{assemble_file, AssembledProgram, InstructionSet};
use assembler::errors::AssemblyError;
use log::{debug, LevelFilter};
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
use sim_core::{accumulator_machine, ExecutionState, Machine, MachineDefinition, RunMode, StreamChannel};
#[cfg(test)]
use tempfile as _;
use thiserror as _;

const USAGE_TEXT: &str = "\
Usage: microsim <command> [options]

Commands:
  build <input> [--machine <file>] [-o <output>] [-v]  Assemble source to a listing
  run   <input> [--machine <file>] [-v]                Assemble, load, and execute

Options:
  -m, --machine <file>  Machine definition in JSON (default: built-in accumulator machine)
  -o, --output <file>   Listing path (default: input stem + .lst)
  -v, --verbose         Log to stderr; repeat for more detail
  -h, --help            Show this help message

Examples:
  microsim build countdown.asm
  microsim build countdown.asm --machine cpu.json -o countdown.lst
  microsim run countdown.asm -vv
";

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Build(BuildArgs),
    Run(RunArgs),
}

#[derive(Debug, PartialEq, Eq)]
struct BuildArgs {
    input: PathBuf,
    machine: Option<PathBuf>,
    output: Option<PathBuf>,
    verbosity: u8,
}

#[derive(Debug, PartialEq, Eq)]
struct RunArgs {
    input: PathBuf,
    machine: Option<PathBuf>,
    verbosity: u8,
}

#[derive(Debug)]
enum ParseResult {
    Command(Command),
    Help,
}

fn parse_args(mut args: impl Iterator<Item = OsString>) -> Result<ParseResult, String> {
    let first = args.next().ok_or_else(|| "missing command".to_string())?;

    if first == "--help" || first == "-h" {
        return Ok(ParseResult::Help);
    }

    let command_str = first.to_string_lossy().to_string();

    match command_str.as_str() {
        "build" => parse_build_args(args)
            .map(Command::Build)
            .map(ParseResult::Command),
        "run" => parse_run_args(args)
            .map(Command::Run)
            .map(ParseResult::Command),
        other => Err(format!("unknown command: {other}")),
    }
}

#[derive(Debug, Default)]
struct CommonArgs {
    input: Option<PathBuf>,
    machine: Option<PathBuf>,
    output: Option<PathBuf>,
    verbosity: u8,
}

#[allow(clippy::while_let_on_iterator)]
fn parse_common_args(
    mut args: impl Iterator<Item = OsString>,
    accepts_output: bool,
) -> Result<CommonArgs, String> {
    let mut parsed = CommonArgs::default();

    while let Some(arg) = args.next() {
        if arg == "--help" || arg == "-h" {
            return Err(USAGE_TEXT.to_string());
        }

        if arg == "--verbose" || arg == "-v" || arg == "-vv" {
            parsed.verbosity = parsed
                .verbosity
                .saturating_add(if arg == "-vv" { 2 } else { 1 });
            continue;
        }

        if arg == "-m" || arg == "--machine" {
            let value = args
                .next()
                .ok_or_else(|| "missing value for --machine".to_string())?;
            parsed.machine = Some(PathBuf::from(value));
            continue;
        }

        if accepts_output && (arg == "-o" || arg == "--output") {
            let value = args
                .next()
                .ok_or_else(|| "missing value for -o".to_string())?;
            parsed.output = Some(PathBuf::from(value));
            continue;
        }

        if arg.to_string_lossy().starts_with('-') {
            return Err(format!("unknown option: {}", arg.to_string_lossy()));
        }

        if parsed.input.is_some() {
            return Err("multiple input paths provided".to_string());
        }
        parsed.input = Some(PathBuf::from(arg));
    }

    Ok(parsed)
}

fn parse_build_args(args: impl Iterator<Item = OsString>) -> Result<BuildArgs, String> {
    let parsed = parse_common_args(args, true)?;
    let input = parsed.input.ok_or_else(|| "missing input path".to_string())?;
    Ok(BuildArgs {
        input,
        machine: parsed.machine,
        output: parsed.output,
        verbosity: parsed.verbosity,
    })
}

fn parse_run_args(args: impl Iterator<Item = OsString>) -> Result<RunArgs, String> {
    let parsed = parse_common_args(args, false)?;
    let input = parsed.input.ok_or_else(|| "missing input path".to_string())?;
    Ok(RunArgs {
        input,
        machine: parsed.machine,
        verbosity: parsed.verbosity,
    })
}

fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("out");

    let parent = input.parent().unwrap_or_else(|| Path::new(""));

    parent.join(format!("{stem}.lst"))
}

const fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn setup_logging(verbosity: u8) -> Result<(), fern::InitError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                record.level(),
                record.target(),
                message
            ));
        })
        .level(level_for(verbosity))
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn load_machine(path: Option<&Path>) -> Result<MachineDefinition, i32> {
    let Some(path) = path else {
        return Ok(accumulator_machine());
    };
    let text = fs::read_to_string(path).map_err(|e| {
        eprintln!("error: failed to read machine {}: {e}", path.display());
        1
    })?;
    let definition = serde_json::from_str(&text).map_err(|e| {
        eprintln!("error: invalid machine {}: {e}", path.display());
        1
    })?;
    debug!("loaded machine definition from `{}`", path.display());
    Ok(definition)
}

fn report_assembly_error(e: &AssemblyError) {
    eprintln!("{}", e.format_for_stderr());
}

fn assemble(input: &Path, machine: &Machine) -> Result<AssembledProgram, i32> {
    let isa = InstructionSet::of_machine(machine);
    assemble_file(input, &isa).map_err(|e| {
        report_assembly_error(&e);
        1
    })
}

fn build_machine(path: Option<&Path>) -> Result<Machine, i32> {
    let definition = load_machine(path)?;
    Machine::new(definition).map_err(|e| {
        eprintln!("error: invalid machine: {e}");
        1
    })
}

fn run_build(args: BuildArgs) -> Result<(), i32> {
    let machine = build_machine(args.machine.as_deref())?;
    let program = assemble(&args.input, &machine)?;

    let output_path = args
        .output
        .unwrap_or_else(|| default_output_path(&args.input));

    if let Err(e) = fs::write(&output_path, program.listing()) {
        eprintln!("error: failed to write output: {e}");
        return Err(1);
    }

    println!(
        "Assembled {} ({} words) -> {}",
        args.input.display(),
        program.len(),
        output_path.display()
    );

    Ok(())
}

fn run_program(args: &RunArgs) -> Result<(), i32> {
    let mut machine = build_machine(args.machine.as_deref())?;
    let program = assemble(&args.input, &machine)?;

    if let Err(e) = machine.load_program(program.load_records()) {
        eprintln!("error: failed to load program: {e}");
        return Err(1);
    }
    for name in machine.channel_names() {
        machine.attach_channel(name, Box::new(StreamChannel::console()));
    }

    let snapshots = machine.subscribe();
    let state = machine.execute(RunMode::CommandLine);
    if state == ExecutionState::ExecutionHalted {
        return Ok(());
    }

    let message = snapshots
        .try_iter()
        .filter_map(|snapshot| snapshot.message)
        .last()
        .unwrap_or_else(|| format!("{state:?}"));
    eprintln!("error: execution stopped: {message}");
    Err(1)
}

fn main() {
    let exit_code = match parse_args(env::args_os().skip(1)) {
        Ok(ParseResult::Help) => {
            println!("{USAGE_TEXT}");
            0
        }
        Ok(ParseResult::Command(command)) => {
            let verbosity = match &command {
                Command::Build(args) => args.verbosity,
                Command::Run(args) => args.verbosity,
            };
            if let Err(e) = setup_logging(verbosity) {
                eprintln!("warning: logging unavailable: {e}");
            }
            let result = match command {
                Command::Build(args) => run_build(args),
                Command::Run(args) => run_program(&args),
            };
            match result {
                Ok(()) => 0,
                Err(code) => code,
            }
        }
        Err(error) => {
            if error.starts_with("Usage:") {
                println!("{error}");
            } else {
                eprintln!("error: {error}");
                eprintln!("{USAGE_TEXT}");
            }
            1
        }
    };

    std::process::exit(exit_code);
}

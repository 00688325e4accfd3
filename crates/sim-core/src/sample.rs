//! A small accumulator machine used by the CLI default and by tests.
//!
//! Layout: 8-bit cells in a 4096-cell RAM `main`, 16-bit instructions with a
//! 4-bit opcode followed by a 12-bit operand.
//!
//! | Mnemonic | Opcode | Operand | Effect |
//! |---|---|---|---|
//! | `halt` | 0 | ignored | sets the halt bit |
//! | `load` | 1 | address | `acc = main[addr]` |
//! | `store` | 2 | address | `main[addr] = acc` |
//! | `add` | 3 | address | `acc += main[addr]` |
//! | `sub` | 4 | address | `acc -= main[addr]` |
//! | `jmp` | 5 | address | `pc = addr` |
//! | `jmpz` | 6 | address | `pc = addr` when `acc == 0` |
//! | `out` | 7 | ignored | writes `acc` to `console` |
//! | `in` | 8 | ignored | reads `acc` from `console` |
//! | `br` | 9 | signed offset | `pc += offset`, relative to the next instruction |

use crate::field::{Field, FieldType, Relativity};
use crate::instruction::MachineInstruction;
use crate::machine::MachineDefinition;
use crate::micro::{
    ArithmeticOp, Comparison, IoDirection, IoKind, MemoryDirection, Micro, Microinstruction,
};
use crate::module::{ConditionBit, Ram, Register};

/// Channel the sample machine's `in` and `out` instructions use.
pub const CONSOLE_CHANNEL: &str = "console";

/// Builds the accumulator machine described in the module docs.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn accumulator_machine() -> MachineDefinition {
    let mut def = MachineDefinition::new("accumulator");

    let main = def.modules.add_ram(Ram::new("main", 4096, 8));
    let pc = def.modules.add_register(Register::new("pc", 12));
    let ir = def.modules.add_register(Register::new("ir", 16));
    let mar = def.modules.add_register(Register::new("mar", 12));
    let mdr = def.modules.add_register(Register::new("mdr", 16));
    let acc = def.modules.add_register(Register::new("acc", 16));
    let status = def.modules.add_register(Register::new("status", 3));
    let halt = def
        .modules
        .add_condition_bit(ConditionBit::new("halt-bit", status, 0).halting(true));
    let overflow = def
        .modules
        .add_condition_bit(ConditionBit::new("overflow-bit", status, 1));
    let carry = def
        .modules
        .add_condition_bit(ConditionBit::new("carry-bit", status, 2));

    def.config.code_store = Some(main);
    def.config.program_counter = Some(pc);

    let transfer = |source, source_start, destination, num_bits| Micro::TransferRtoR {
        source,
        source_start,
        destination,
        destination_start: 0,
        num_bits,
    };
    let memory = |direction, data| Micro::MemoryAccess {
        direction,
        ram: main,
        data,
        address: mar,
    };
    let accumulate = |op| Micro::Arithmetic {
        op,
        source1: acc,
        source2: mdr,
        destination: acc,
        overflow_bit: Some(overflow),
        carry_bit: Some(carry),
    };
    let console = |direction| Micro::Io {
        kind: IoKind::Integer,
        direction,
        buffer: acc,
        channel: CONSOLE_CHANNEL.to_string(),
    };

    let mut micro = |name: &str, micro: Micro| def.add_micro(Microinstruction::new(name, micro));
    let pc_to_mar = micro("pc->mar", transfer(pc, 0, mar, 12));
    let read_ir = micro("read-ir", memory(MemoryDirection::Read, ir));
    let pc_plus_2 = micro(
        "pc+2",
        Micro::Increment {
            register: pc,
            delta: 2,
            overflow_bit: None,
            carry_bit: None,
        },
    );
    let decode = micro("decode-ir", Micro::Decode { ir });
    let ir_to_mar = micro("ir(4-15)->mar", transfer(ir, 4, mar, 12));
    let read_mdr = micro("read-mdr", memory(MemoryDirection::Read, mdr));
    let write_mdr = micro("write-mdr", memory(MemoryDirection::Write, mdr));
    let acc_to_mdr = micro("acc->mdr", transfer(acc, 0, mdr, 16));
    let mdr_to_acc = micro("mdr->acc", transfer(mdr, 0, acc, 16));
    let add = micro("acc+mdr->acc", accumulate(ArithmeticOp::Add));
    let sub = micro("acc-mdr->acc", accumulate(ArithmeticOp::Subtract));
    let mar_to_pc = micro("mar->pc", transfer(mar, 0, pc, 12));
    let skip_unless_zero = micro(
        "if(acc!=0)skip-2",
        Micro::Test {
            register: acc,
            start: 0,
            num_bits: 16,
            comparison: Comparison::NotEqual,
            value: 0,
            omission: 2,
        },
    );
    let output = micro("output-acc", console(IoDirection::Output));
    let input = micro("input-acc", console(IoDirection::Input));
    let set_halt = micro(
        "set-halt-bit",
        Micro::SetCondBit {
            bit: halt,
            value: true,
        },
    );
    let pc_plus_mar = micro(
        "pc+mar->pc",
        Micro::Arithmetic {
            op: ArithmeticOp::Add,
            source1: pc,
            source2: mar,
            destination: pc,
            overflow_bit: None,
            carry_bit: None,
        },
    );
    let end = micro("end", Micro::End);

    def.fetch_sequence =
        MachineInstruction::fetch_sequence(vec![pc_to_mar, read_ir, pc_plus_2, decode]);

    let op = || Field::new("op", 4);
    let addr = || Field::new("addr", 12);
    let unused = || Field::new("unused", 12).with_type(FieldType::Ignored);
    let offset = || {
        Field::new("offset", 12)
            .signed(true)
            .with_relativity(Relativity::PcRelativePostIncr)
    };

    let instructions = [
        ("halt", 0, unused(), vec![set_halt, end]),
        ("load", 1, addr(), vec![ir_to_mar, read_mdr, mdr_to_acc, end]),
        ("store", 2, addr(), vec![ir_to_mar, acc_to_mdr, write_mdr, end]),
        ("add", 3, addr(), vec![ir_to_mar, read_mdr, add, end]),
        ("sub", 4, addr(), vec![ir_to_mar, read_mdr, sub, end]),
        ("jmp", 5, addr(), vec![ir_to_mar, mar_to_pc, end]),
        (
            "jmpz",
            6,
            addr(),
            vec![skip_unless_zero, ir_to_mar, mar_to_pc, end],
        ),
        ("out", 7, unused(), vec![output, end]),
        ("in", 8, unused(), vec![input, end]),
        ("br", 9, offset(), vec![ir_to_mar, pc_plus_mar, end]),
    ];
    for (name, opcode, operand, micros) in instructions {
        def.add_instruction(
            MachineInstruction::new(name, opcode, vec![op(), operand]).with_micros(micros),
        );
    }
    def
}

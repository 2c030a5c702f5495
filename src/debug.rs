//! Debugging utilities. Principally, this provides a [Chunk] disassembler.
//!
//! The listing format follows the conventional `OP_*` spelling:
//!
//! ```text
//! == code ==
//! 0000    1 OP_CONSTANT         0 '1'
//! 0002    | OP_PRINT
//! 0003    | OP_RETURN
//! ```

use crate::heap::Heap;
use crate::prelude::*;

/// Prints a listing of the entire chunk to standard output.
pub fn disassemble_chunk(chunk: &Chunk, heap: &Heap, name: &str) {
    println!("== {name} ==");

    let mut offset = 0;
    while offset < chunk.len() {
        offset = disassemble_instruction(chunk, heap, offset);
    }
}

/// Prints the instruction at the given offset, and returns the offset of the
/// next instruction.
pub fn disassemble_instruction(chunk: &Chunk, heap: &Heap, offset: usize) -> usize {
    print!("{offset:04} ");

    // The line number, or a pipe for subsequent instructions from the same line.
    if offset > 0 && chunk.line_number_for(offset) == chunk.line_number_for(offset - 1) {
        print!("   | ");
    } else {
        match chunk.line_number_for(offset) {
            Some(line) => print!("{line:4} "),
            None => print!("   ? "),
        }
    }

    let byte = match chunk.get(offset) {
        Some(entry) => entry.as_byte(),
        None => {
            println!("(no instruction at {offset:04})");
            return offset + 1;
        }
    };

    let Ok(opcode) = OpCode::try_from(byte) else {
        println!("Unknown opcode {byte}");
        return offset + 1;
    };

    use OpCode::*;
    match opcode {
        Constant => constant_instruction("OP_CONSTANT", chunk, heap, offset),
        ConstantLong => long_constant_instruction("OP_CONSTANT_LONG", chunk, heap, offset),
        Nil => simple_instruction("OP_NIL", offset),
        True => simple_instruction("OP_TRUE", offset),
        False => simple_instruction("OP_FALSE", offset),
        Equal => simple_instruction("OP_EQUAL", offset),
        Greater => simple_instruction("OP_GREATER", offset),
        Less => simple_instruction("OP_LESS", offset),
        Add => simple_instruction("OP_ADD", offset),
        Subtract => simple_instruction("OP_SUBTRACT", offset),
        Multiply => simple_instruction("OP_MULTIPLY", offset),
        Divide => simple_instruction("OP_DIVIDE", offset),
        Not => simple_instruction("OP_NOT", offset),
        Negate => simple_instruction("OP_NEGATE", offset),
        Conditional => simple_instruction("OP_CONDITIONAL", offset),
        Print => simple_instruction("OP_PRINT", offset),
        Pop => simple_instruction("OP_POP", offset),
        DefineGlobal => constant_instruction("OP_DEFINE_GLOBAL", chunk, heap, offset),
        DefineGlobalLong => long_constant_instruction("OP_DEFINE_GLOBAL_LONG", chunk, heap, offset),
        GetGlobal => constant_instruction("OP_GET_GLOBAL", chunk, heap, offset),
        GetGlobalLong => long_constant_instruction("OP_GET_GLOBAL_LONG", chunk, heap, offset),
        SetGlobal => constant_instruction("OP_SET_GLOBAL", chunk, heap, offset),
        SetGlobalLong => long_constant_instruction("OP_SET_GLOBAL_LONG", chunk, heap, offset),
        Return => simple_instruction("OP_RETURN", offset),
    }
}

fn simple_instruction(name: &str, offset: usize) -> usize {
    println!("{name}");
    offset + 1
}

/// An instruction with a 1-byte constant-pool operand.
fn constant_instruction(name: &str, chunk: &Chunk, heap: &Heap, offset: usize) -> usize {
    let index = match chunk.get(offset + 1) {
        Some(entry) => entry.as_constant_index(),
        None => {
            println!("{name} (truncated)");
            return offset + 2;
        }
    };

    print_with_constant(name, chunk, heap, index);
    offset + 2
}

/// An instruction with a 3-byte little-endian constant-pool operand.
fn long_constant_instruction(name: &str, chunk: &Chunk, heap: &Heap, offset: usize) -> usize {
    let operand: Option<Vec<u8>> = (1..=3)
        .map(|i| chunk.get(offset + i).map(|entry| entry.as_byte()))
        .collect();

    match operand {
        Some(bytes) => {
            let index =
                bytes[0] as usize | (bytes[1] as usize) << 8 | (bytes[2] as usize) << 16;
            print_with_constant(name, chunk, heap, index);
        }
        None => println!("{name} (truncated)"),
    }
    offset + 4
}

fn print_with_constant(name: &str, chunk: &Chunk, heap: &Heap, index: usize) {
    print!("{name:<16} {index:4} '");
    match chunk.constant_at(index) {
        Some(value) => print!("{}", value.show(heap)),
        None => print!("<invalid constant>"),
    }
    println!("'");
}

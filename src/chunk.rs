//! Contains a [Chunk] of [OpCode].

use crate::value::{Value, ValueArray};

crate::with_try_from_u8! {
    /// A one-byte operation code for Lox.
    ///
    /// Some opcodes take trailing operand bytes: constant-style instructions
    /// come in a short form (one operand byte) and a long form (a three-byte
    /// little-endian constant-pool index).
    #[repr(u8)]
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub enum OpCode {
        /// Push the constant at a 1-byte pool index.
        Constant,
        /// Push the constant at a 3-byte little-endian pool index.
        ConstantLong,
        Nil,
        True,
        False,
        Equal,
        Greater,
        Less,
        Add,
        Subtract,
        Multiply,
        Divide,
        Not,
        Negate,
        /// Pop else-branch, then-branch, and condition; push one branch.
        Conditional,
        Print,
        Pop,
        DefineGlobal,
        DefineGlobalLong,
        GetGlobal,
        GetGlobalLong,
        SetGlobal,
        SetGlobalLong,
        Return,
    }
}

/// A chunk of code, with metadata: the instruction byte stream, its constant
/// pool, and a compressed source-line table.
///
/// A chunk is append-only while the compiler owns it; once compilation
/// finishes, the VM only ever reads it.
#[derive(Default)]
pub struct Chunk {
    code: Vec<u8>,
    constants: ValueArray,
    lines: Vec<LineStart>,
}

/// A valid byte from a chunk. This byte can then be interpreted as required.
#[derive(Clone, Copy)]
pub struct BytecodeEntry<'a> {
    byte: u8,
    provenance: &'a Chunk,
}

/// An [OpCode] that has already been written to the bytestream.
///
/// This opcode can be augmented with additional operand bytes.
pub struct WrittenOpcode<'a> {
    line: usize,
    provenance: &'a mut Chunk,
}

/// One record of the run-length encoded line table: the byte at `offset` and
/// every following byte up to the next record's offset came from `line`.
/// Offsets are strictly increasing, and the records cover the whole byte
/// stream.
#[derive(Debug, Clone)]
struct LineStart {
    offset: usize,
    line: usize,
}

///////////////////////////////////////// Implementation //////////////////////////////////////////

impl Chunk {
    /// Constant-pool indices must fit in the 3-byte long operand form.
    pub const MAX_CONSTANTS: usize = 1 << 24;

    /// Return a new, empty [Chunk].
    pub fn new() -> Self {
        Chunk::default()
    }

    /// Get an entry from the bytecode stream.
    ///
    /// Returns `Some(entry)` when the offset is in [0, self.len()).
    pub fn get(&self, offset: usize) -> Option<BytecodeEntry> {
        self.code.get(offset).copied().map(|byte| BytecodeEntry {
            byte,
            provenance: self,
        })
    }

    /// Append a single [OpCode] to the chunk.
    pub fn write_opcode(&mut self, opcode: OpCode, line: usize) -> WrittenOpcode {
        self.write(opcode as u8, line);

        WrittenOpcode {
            line,
            provenance: self,
        }
    }

    /// Adds a constant to the constant pool, and returns its index.
    ///
    /// The pool is append-only, so indices are stable and strictly
    /// increasing. The compiler is responsible for refusing to emit more than
    /// [Chunk::MAX_CONSTANTS] of them.
    pub fn add_constant(&mut self, value: Value) -> usize {
        self.constants.write(value)
    }

    /// Adds a constant and emits the instruction that loads it, choosing the
    /// short or long encoding based on the index. Returns the index.
    pub fn write_constant(&mut self, value: Value, line: usize) -> usize {
        let index = self.add_constant(value);

        if let Ok(short) = u8::try_from(index) {
            self.write_opcode(OpCode::Constant, line).with_operand(short);
        } else {
            self.write_opcode(OpCode::ConstantLong, line)
                .with_long_operand(index as u32);
        }

        index
    }

    /// Returns the constant-pool value at the given index.
    pub fn constant_at(&self, index: usize) -> Option<Value> {
        self.constants.get(index)
    }

    /// Returns the source line for whatever is at the given offset.
    ///
    /// Binary search over the run starts; the lookup is strictly bounded by
    /// the table, so asking about the last byte is fine.
    pub fn line_number_for(&self, offset: usize) -> Option<usize> {
        if offset >= self.code.len() {
            return None;
        }

        // Index of the first run starting *after* offset; the run owning
        // offset is the one just before it.
        let next_run = self.lines.partition_point(|run| run.offset <= offset);
        Some(self.lines[next_run - 1].line)
    }

    /// Returns the length of the byte stream.
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Returns true if nothing has been appended to the byte stream.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Actually writes to the byte stream.
    fn write(&mut self, payload: u8, line_number: usize) {
        self.code.push(payload);

        // A new line record is appended only when the line changes, not per
        // byte; consecutive bytes from one line share a record.
        match self.lines.last() {
            Some(run) if run.line == line_number => {}
            _ => self.lines.push(LineStart {
                offset: self.code.len() - 1,
                line: line_number,
            }),
        }
    }
}

impl<'a> BytecodeEntry<'a> {
    /// Returns the raw byte. Used to assemble multi-byte operands.
    #[inline(always)]
    pub fn as_byte(self) -> u8 {
        self.byte
    }

    /// Returns the byte as a short-form index into the constant pool.
    #[inline(always)]
    pub fn as_constant_index(self) -> usize {
        self.byte as usize
    }

    /// Returns the byte decoded as an [OpCode].
    /// Returns `None` if the byte is not a valid opcode.
    #[inline]
    pub fn as_opcode(self) -> Option<OpCode> {
        self.byte.try_into().ok()
    }

    /// Yanks out a constant from the constant pool, treating this byte as a
    /// short-form index.
    #[inline]
    pub fn resolve_constant(self) -> Option<Value> {
        self.provenance.constant_at(self.as_constant_index())
    }
}

impl<'a> WrittenOpcode<'a> {
    /// Consumes `self` and appends the 1-byte operand for the last written
    /// instruction.
    #[inline]
    pub fn with_operand(self, index: u8) {
        self.provenance.write(index, self.line);
    }

    /// Consumes `self` and appends a 3-byte little-endian operand for the
    /// last written instruction.
    #[inline]
    pub fn with_long_operand(self, index: u32) {
        debug_assert!((index as usize) < Chunk::MAX_CONSTANTS);
        let [lo, mid, hi, _] = index.to_le_bytes();
        self.provenance.write(lo, self.line);
        self.provenance.write(mid, self.line);
        self.provenance.write(hi, self.line);
    }
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn boring_test_of_chunk() {
        let c = Chunk::default();
        assert!(c.is_empty());
        assert_eq!(None, c.line_number_for(0));
    }

    #[test]
    fn mess_around_with_bytecode() {
        let mut c = Chunk::new();
        let i = c.add_constant(1.0.into());
        c.write_opcode(OpCode::Constant, 123).with_operand(i as u8);
        c.write_opcode(OpCode::Return, 123);

        assert_eq!(3, c.len());

        // Constant
        assert_eq!(Some(OpCode::Constant), c.get(0).unwrap().as_opcode());
        assert_eq!(Some(0), c.get(1).map(|b| b.as_constant_index()));
        assert_eq!(Some(Value::Number(1.0)), c.get(1).and_then(|b| b.resolve_constant()));

        // Return
        assert_eq!(Some(OpCode::Return), c.get(2).unwrap().as_opcode());
    }

    #[test]
    fn constant_indices_are_strictly_increasing() {
        let mut c = Chunk::new();
        for i in 0..300 {
            assert_eq!(i, c.add_constant((i as f64).into()));
        }
        assert_eq!(Some(Value::Number(299.0)), c.constant_at(299));
    }

    #[test]
    fn write_constant_picks_short_form_below_256() {
        let mut c = Chunk::new();
        for i in 0..=255 {
            assert_eq!(i, c.write_constant((i as f64).into(), 1));
        }

        // 256 short-form instructions, 2 bytes each.
        assert_eq!(512, c.len());
        assert_eq!(Some(OpCode::Constant), c.get(510).unwrap().as_opcode());
        assert_eq!(255, c.get(511).unwrap().as_constant_index());
    }

    #[test]
    fn write_constant_picks_long_form_at_256() {
        let mut c = Chunk::new();
        for i in 0..256 {
            c.add_constant((i as f64).into());
        }

        // The 257th constant needs the 3-byte little-endian encoding.
        let index = c.write_constant(9000.0.into(), 7);
        assert_eq!(256, index);

        assert_eq!(Some(OpCode::ConstantLong), c.get(0).unwrap().as_opcode());
        let lo = c.get(1).unwrap().as_byte() as usize;
        let mid = c.get(2).unwrap().as_byte() as usize;
        let hi = c.get(3).unwrap().as_byte() as usize;
        assert_eq!(256, lo | (mid << 8) | (hi << 16));
        assert_eq!(Some(Value::Number(9000.0)), c.constant_at(256));
    }

    #[test]
    fn line_numbers() {
        let mut c = Chunk::new();

        let idx = c.add_constant(1.2.into()) as u8;

        // Write a bunch of opcodes on the same line.
        c.write_opcode(OpCode::Constant, 1).with_operand(idx);
        c.write_opcode(OpCode::Constant, 1).with_operand(idx);
        c.write_opcode(OpCode::Constant, 1).with_operand(idx);
        assert_eq!(6, c.len());

        // Write a bunch of opcodes on a different line.
        c.write_opcode(OpCode::Constant, 2).with_operand(idx);
        c.write_opcode(OpCode::Constant, 2).with_operand(idx);
        assert_eq!(10, c.len());

        // Write an opcode on yet a different line.
        c.write_opcode(OpCode::Return, 4);
        assert_eq!(11, c.len());

        // Many bytes, but only three line runs.
        assert_eq!(3, c.lines.len());

        // Every offset maps back to the line it was written with.
        for offset in 0..6 {
            assert_eq!(Some(1), c.line_number_for(offset));
        }
        for offset in 6..10 {
            assert_eq!(Some(2), c.line_number_for(offset));
        }
        // The very last byte is in bounds; one past it is not.
        assert_eq!(Some(4), c.line_number_for(10));
        assert_eq!(None, c.line_number_for(11));
    }

    #[test]
    fn every_opcode_round_trips_through_u8() {
        use OpCode::*;
        let all = [
            Constant, ConstantLong, Nil, True, False, Equal, Greater, Less, Add, Subtract,
            Multiply, Divide, Not, Negate, Conditional, Print, Pop, DefineGlobal,
            DefineGlobalLong, GetGlobal, GetGlobalLong, SetGlobal, SetGlobalLong, Return,
        ];
        for opcode in all {
            assert_eq!(Ok(opcode), OpCode::try_from(opcode as u8));
        }
        assert_eq!(Err(()), OpCode::try_from(255));
    }
}

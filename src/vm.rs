//! The [VM] interprets bytecode, one [Chunk] at a time.

use std::io::{self, Write};

use crate::compiler::compile;
use crate::heap::Heap;
use crate::prelude::*;
use crate::table::Table;

/// The Lox virtual machine. Each [VM] is a self-contained instance: it owns
/// its heap, its globals, and its value stack, so several can coexist.
///
/// `Out` receives the output of `print` statements; `Diag` receives compile
/// and runtime error reports. The two are always distinct so that a program's
/// output can be consumed without diagnostics mixed in.
pub struct VM<Out: Write, Diag: Write> {
    /// Owns every dynamically-allocated object, including interned strings.
    heap: Heap,
    /// The value stack. Cleared on a runtime error, but never shrunk.
    stack: Vec<Value>,
    /// Global variable bindings, keyed by interned name.
    globals: Table<StrRef>,
    out: Out,
    diag: Diag,
}

//////////////////////////////////////// Implementation ///////////////////////////////////////////

impl Default for VM<io::Stdout, io::Stderr> {
    /// A VM that prints to standard output and reports errors on standard
    /// error.
    fn default() -> Self {
        VM::new(io::stdout(), io::stderr())
    }
}

impl<Out: Write, Diag: Write> VM<Out, Diag> {
    /// Creates a VM with explicit output and diagnostic sinks.
    pub fn new(out: Out, diag: Diag) -> Self {
        VM {
            heap: Heap::new(),
            stack: Vec::with_capacity(256),
            globals: Table::new(),
            out,
            diag,
        }
    }

    /// Compiles and runs the given Lox source code.
    ///
    /// Globals and interned strings persist across calls, which is what makes
    /// a REPL session work. After a runtime error the stack is empty and the
    /// VM is ready for the next call.
    pub fn interpret(&mut self, source: &str) -> crate::Result<()> {
        let chunk = compile(source, &mut self.heap, &mut self.diag)?;

        self.stack.clear();
        self.run(&chunk)
    }

    /// The main bytecode interpreter loop.
    fn run(&mut self, chunk: &Chunk) -> crate::Result<()> {
        let mut ip = 0;

        macro_rules! next_bytecode {
            () => {{
                let entry = chunk.get(ip).expect("ran past the end of the chunk");
                ip += 1;
                entry
            }};
        }

        // Decodes a 3-byte little-endian operand.
        macro_rules! next_long_index {
            () => {{
                let lo = next_bytecode!().as_byte() as usize;
                let mid = next_bytecode!().as_byte() as usize;
                let hi = next_bytecode!().as_byte() as usize;
                lo | (mid << 8) | (hi << 16)
            }};
        }

        macro_rules! arithmetic_op {
            ($op:tt, $offset:expr) => {{
                let b = self.pop();
                let a = self.pop();
                match (a, b) {
                    (Value::Number(x), Value::Number(y)) => self.push((x $op y).into()),
                    _ => {
                        return Err(self.runtime_error(chunk, $offset, "Operands must be numbers."))
                    }
                }
            }};
        }

        loop {
            // The offset of the instruction being executed, for attributing
            // runtime errors to a line.
            let offset = ip;

            if cfg!(feature = "trace_execution") {
                print!("          ");
                for value in &self.stack {
                    print!("[ {} ]", value.show(&self.heap));
                }
                println!();
                crate::debug::disassemble_instruction(chunk, &self.heap, offset);
            }

            let opcode = next_bytecode!()
                .as_opcode()
                .expect("encountered an invalid opcode");

            use OpCode::*;
            match opcode {
                Constant => {
                    let value = next_bytecode!()
                        .resolve_constant()
                        .expect("constant index out of range");
                    self.push(value);
                }
                ConstantLong => {
                    let index = next_long_index!();
                    let value = chunk
                        .constant_at(index)
                        .expect("constant index out of range");
                    self.push(value);
                }
                Nil => self.push(Value::Nil),
                True => self.push(Value::Boolean(true)),
                False => self.push(Value::Boolean(false)),
                Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push((a == b).into());
                }
                Greater => arithmetic_op!(>, offset),
                Less => arithmetic_op!(<, offset),
                Add => {
                    let b = self.pop();
                    let a = self.pop();
                    match (a, b) {
                        (Value::Number(x), Value::Number(y)) => self.push((x + y).into()),
                        (Value::Str(x), Value::Str(y)) => {
                            let mut chars = String::from(self.heap.get_str(x));
                            chars.push_str(self.heap.get_str(y));
                            let handle = self.heap.intern_take(chars);
                            self.push(handle.into());
                        }
                        _ => {
                            return Err(self.runtime_error(
                                chunk,
                                offset,
                                "Operands must be two numbers or two strings.",
                            ))
                        }
                    }
                }
                Subtract => arithmetic_op!(-, offset),
                Multiply => arithmetic_op!(*, offset),
                Divide => arithmetic_op!(/, offset),
                Not => {
                    let value = self.pop();
                    self.push(value.is_falsy().into());
                }
                Negate => match self.pop() {
                    Value::Number(number) => self.push((-number).into()),
                    _ => {
                        return Err(self.runtime_error(chunk, offset, "Operand must be a number."))
                    }
                },
                Conditional => {
                    // Both branch values were computed; pick one by the
                    // condition's truthiness.
                    let otherwise = self.pop();
                    let consequent = self.pop();
                    let condition = self.pop();
                    self.push(if condition.is_falsy() {
                        otherwise
                    } else {
                        consequent
                    });
                }
                Print => {
                    let value = self.pop();
                    let _ = writeln!(self.out, "{}", value.show(&self.heap));
                }
                Pop => {
                    self.pop();
                }
                op @ (DefineGlobal | DefineGlobalLong) => {
                    let index = if op == DefineGlobal {
                        next_bytecode!().as_constant_index()
                    } else {
                        next_long_index!()
                    };
                    let name = as_variable_name(chunk.constant_at(index));
                    let value = self.pop();
                    // Redefinition is allowed; this just overwrites.
                    self.globals.set(name, value);
                }
                op @ (GetGlobal | GetGlobalLong) => {
                    let index = if op == GetGlobal {
                        next_bytecode!().as_constant_index()
                    } else {
                        next_long_index!()
                    };
                    let name = as_variable_name(chunk.constant_at(index));
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            let message =
                                format!("Undefined variable '{}'.", self.heap.get_str(name));
                            return Err(self.runtime_error(chunk, offset, &message));
                        }
                    }
                }
                op @ (SetGlobal | SetGlobalLong) => {
                    let index = if op == SetGlobal {
                        next_bytecode!().as_constant_index()
                    } else {
                        next_long_index!()
                    };
                    let name = as_variable_name(chunk.constant_at(index));
                    // Assignment is an expression, so the value stays on the
                    // stack.
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        // set() returning true means the name was new, but
                        // assignment must never create a variable. Undo the
                        // zombie binding before reporting.
                        self.globals.delete(name);
                        let message = format!("Undefined variable '{}'.", self.heap.get_str(name));
                        return Err(self.runtime_error(chunk, offset, &message));
                    }
                }
                Return => return Ok(()),
            }
        }
    }

    /// Reports a runtime error against the instruction at `offset`, resets
    /// the stack, and returns the error for the caller to propagate.
    fn runtime_error(
        &mut self,
        chunk: &Chunk,
        offset: usize,
        message: &str,
    ) -> InterpretationError {
        let _ = writeln!(self.diag, "{message}");
        let line = chunk.line_number_for(offset).unwrap_or(0);
        let _ = writeln!(self.diag, "[line {line}] in script");

        self.stack.clear();
        InterpretationError::RuntimeError
    }

    #[inline(always)]
    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline(always)]
    fn pop(&mut self) -> Value {
        self.stack
            .pop()
            .expect("popped a value from an empty stack")
    }

    /// Peeks at a value `depth` slots down from the top of the stack.
    #[inline(always)]
    fn peek(&self, depth: usize) -> Value {
        self.stack[self.stack.len() - 1 - depth]
    }
}

/// Unwraps a constant that the compiler guarantees is a variable's name.
fn as_variable_name(value: Option<Value>) -> StrRef {
    match value {
        Some(Value::Str(handle)) => handle,
        _ => panic!("variable name must be an interned string constant"),
    }
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    /// Runs the source on a fresh VM; returns the result, the printed
    /// output, and the diagnostics.
    fn interpret(source: &str) -> (crate::Result<()>, String, String) {
        let mut out = Vec::new();
        let mut diag = Vec::new();
        let result = {
            let mut vm = VM::new(&mut out, &mut diag);
            vm.interpret(source)
        };
        (
            result,
            String::from_utf8(out).unwrap(),
            String::from_utf8(diag).unwrap(),
        )
    }

    /// Runs source that must succeed; returns the printed output.
    fn output_of(source: &str) -> String {
        let (result, out, diag) = interpret(source);
        assert!(result.is_ok(), "diag was: {diag}");
        assert_eq!("", diag);
        out
    }

    #[test]
    fn arithmetic() {
        assert_eq!("7\n", output_of("print 1 + 2 * 3;"));
        assert_eq!("9\n", output_of("print (1 + 2) * 3;"));
        assert_eq!("0.5\n", output_of("print 1 / 2;"));
        assert_eq!("-5\n", output_of("print -(2 + 3);"));
    }

    #[test]
    fn number_formatting_is_minimal() {
        assert_eq!("100\n", output_of("print 100.0;"));
        assert_eq!("2.5\n", output_of("print 2.5;"));
    }

    #[test]
    fn comparisons_and_equality() {
        assert_eq!("true\n", output_of("print 1 < 2;"));
        assert_eq!("false\n", output_of("print 1 > 2;"));
        assert_eq!("true\n", output_of("print 2 >= 2;"));
        assert_eq!("true\n", output_of("print 1 == 1;"));
        assert_eq!("true\n", output_of("print nil == nil;"));
        // Equality applies to a comparison's boolean result, too: comparison
        // binds tighter than equality, so this is (1 < 2) == true.
        assert_eq!("true\n", output_of("print 1 < 2 == true;"));
        assert_eq!("false\n", output_of("print 1 > 2 == true;"));
        // Values of different types are never equal.
        assert_eq!("false\n", output_of("print 1 == \"1\";"));
        assert_eq!("false\n", output_of("print nil == false;"));
    }

    #[test]
    fn not_follows_falsiness() {
        assert_eq!("true\n", output_of("print !nil;"));
        assert_eq!("true\n", output_of("print !false;"));
        // Everything else is truthy, including zero and the empty string.
        assert_eq!("false\n", output_of("print !0;"));
        assert_eq!("false\n", output_of("print !\"\";"));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!("beignet\n", output_of("print \"beig\" + \"net\";"));
        assert_eq!("abc\n", output_of("print \"a\" + \"b\" + \"c\";"));
    }

    #[test]
    fn concatenation_results_are_interned() {
        assert_eq!("true\n", output_of("print \"con\" + \"cat\" == \"concat\";"));
    }

    #[test]
    fn conditional_expression() {
        assert_eq!("yes\n", output_of("print true ? \"yes\" : \"no\";"));
        assert_eq!("2\n", output_of("print false ? 1 : 2;"));
        // Only nil and false select the else branch.
        assert_eq!("1\n", output_of("print 0 ? 1 : 2;"));
        // Right-associative nesting.
        assert_eq!("3\n", output_of("print false ? 1 : false ? 2 : 3;"));
    }

    #[test]
    fn conditional_evaluates_both_branches() {
        // There are no jumps, so the unchosen branch still runs.
        let source = "var a = 1;\nprint true ? (a = 2) : (a = 3);\nprint a;";
        assert_eq!("2\n3\n", output_of(source));
    }

    #[test]
    fn global_variables() {
        assert_eq!("1\n2\n", output_of("var x = 1; print x; x = 2; print x;"));
        assert_eq!("nil\n", output_of("var x; print x;"));
        // Assignment is an expression that yields the assigned value.
        assert_eq!("5\n", output_of("var a = 1; print a = 5;"));
        // Redeclaring a global is allowed.
        assert_eq!("2\n", output_of("var x = 1; var x = 2; print x;"));
    }

    #[test]
    fn globals_persist_across_interpret_calls() {
        let mut out = Vec::new();
        let mut diag = Vec::new();
        let mut vm = VM::new(&mut out, &mut diag);

        vm.interpret("var session = \"repl\";").unwrap();
        vm.interpret("print session;").unwrap();
        drop(vm);

        assert_eq!("repl\n", String::from_utf8(out).unwrap());
    }

    #[test]
    fn reading_an_undefined_variable_fails() {
        let (result, out, diag) = interpret("print mystery;");

        assert!(matches!(result, Err(InterpretationError::RuntimeError)));
        assert_eq!("", out);
        assert!(diag.contains("Undefined variable 'mystery'."), "diag was: {diag}");
        assert!(diag.contains("[line 1] in script"), "diag was: {diag}");
    }

    #[test]
    fn assigning_an_undefined_variable_does_not_create_it() {
        let mut out = Vec::new();
        let mut diag = Vec::new();
        let mut vm = VM::new(&mut out, &mut diag);

        assert!(vm.interpret("ghost = 1;").is_err());
        // If the failed assignment had left a binding behind, this would
        // succeed.
        assert!(vm.interpret("print ghost;").is_err());
        drop(vm);

        assert_eq!(
            2,
            String::from_utf8(diag)
                .unwrap()
                .matches("Undefined variable 'ghost'.")
                .count()
        );
    }

    #[test]
    fn type_errors_at_runtime() {
        let (result, _, diag) = interpret("print -\"muffin\";");
        assert!(result.is_err());
        assert!(diag.contains("Operand must be a number."), "diag was: {diag}");

        let (result, _, diag) = interpret("print 1 + \"a\";");
        assert!(result.is_err());
        assert!(
            diag.contains("Operands must be two numbers or two strings."),
            "diag was: {diag}"
        );

        let (result, _, diag) = interpret("print true > false;");
        assert!(result.is_err());
        assert!(diag.contains("Operands must be numbers."), "diag was: {diag}");
    }

    #[test]
    fn runtime_errors_name_the_right_line() {
        let (result, _, diag) = interpret("var a = 1;\nvar b = true;\nprint a + b;");

        assert!(result.is_err());
        assert!(diag.contains("[line 3] in script"), "diag was: {diag}");
    }

    #[test]
    fn vm_recovers_after_a_runtime_error() {
        let mut out = Vec::new();
        let mut diag = Vec::new();
        let mut vm = VM::new(&mut out, &mut diag);

        assert!(vm.interpret("print nil - 1;").is_err());
        assert!(vm.interpret("print \"still alive\";").is_ok());
        drop(vm);

        assert_eq!("still alive\n", String::from_utf8(out).unwrap());
    }

    #[test]
    fn compile_errors_prevent_execution() {
        let (result, out, diag) = interpret("print 1 print 2;");

        assert!(matches!(result, Err(InterpretationError::CompileError)));
        assert_eq!("", out);
        assert!(diag.contains("Error at 'print'"), "diag was: {diag}");
    }

    #[test]
    fn output_before_a_runtime_error_is_kept() {
        let (result, out, _) = interpret("print \"before\"; print 1 + nil;");

        assert!(result.is_err());
        assert_eq!("before\n", out);
    }

    #[test]
    fn long_constant_programs_run() {
        // Push the pool past 256 entries so the long-operand opcodes are the
        // ones actually executed.
        let mut source = String::new();
        for i in 0..300 {
            source.push_str(&format!("var v{i} = {i};\n"));
        }
        source.push_str("print v0 + v299;");

        assert_eq!("299\n", output_of(&source));
    }
}

//! Contains the Lox parser and bytecode compiler.
//!
//! Parsing and code generation are fused: there is no AST. The Pratt parser
//! walks the token stream once and emits bytecode into a [Chunk] as it goes.

use std::io::Write;

use crate::chunk::WrittenOpcode;
use crate::heap::Heap;
use crate::prelude::*;

/////////////////////////////////////////// Public API ////////////////////////////////////////////

/// Compiles the given Lox source code and, if successful, returns one bytecode [Chunk].
///
/// String literals and identifier names are interned through `heap`. Compile
/// errors are written to `diag` as they are found; if any occurred, the whole
/// compilation fails and the chunk is discarded.
pub fn compile(source: &str, heap: &mut Heap, diag: &mut dyn Write) -> crate::Result<Chunk> {
    let parser = Parser::new(source, diag);
    let compiler = Compiler::new(parser, heap);
    compiler.compile()
}

///////////////////////////////////// Implementation details //////////////////////////////////////

/// Precedence rules for [TokenKind]s in Lox.
///
/// Precedence rules have a well-defined partial ordering ([PartialOrd]), which is required for use
/// in the Pratt parsing algorithm.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq)]
enum Precedence {
    None,
    /// `=`
    Assignment,
    /// `?:`
    Conditional,
    /// `or`
    Or,
    /// `and`
    And,
    /// `==` `!=`
    Equality,
    /// `<` `>` `<=` `>=`
    Comparison,
    /// `+` `-`
    Term,
    /// `*` `/`
    Factor,
    /// `!` `-`
    Unary,
    /// `.` `()`
    Call,
    /// Literals, and groupings
    Primary,
}

/// A rule in the Pratt parser table. See [Compiler::parse_precedence()] for usage.
#[derive(Copy, Clone)]
struct ParserRule {
    prefix: Option<ParserFn>,
    infix: Option<ParserFn>,
    precedence: Precedence,
}

/// Any possible action taken from the parsing table. Actions take the entire compiler state, and
/// convert it, usually emitting bytecode.
type ParserFn = fn(&mut Compiler<'_, '_, '_>, bool);

/// Contains the parser state, including error status and the diagnostic sink
/// that compile errors are written to.
struct Parser<'src, 'd> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    /// Sticky: once set, the compilation as a whole fails.
    had_error: bool,
    /// While set, further errors are swallowed until the parser
    /// resynchronizes at a statement boundary.
    panic_mode: bool,
    diag: &'d mut dyn Write,
}

/// Contains the compiler state: the [Parser], the heap that literals are
/// interned into, and the chunk being produced.
struct Compiler<'src, 'd, 'h> {
    parser: Parser<'src, 'd>,
    heap: &'h mut Heap,
    compiling_chunk: Chunk,
}

impl Precedence {
    /// Returns the next higher level of precedence.
    ///
    /// # Panics
    ///
    /// Panics if trying to obtain a higher level of precedence than the maximum,
    /// [Precedence::Primary], which is the precedence of literals and l-values.
    #[inline]
    fn higher_precedence(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Conditional,
            Conditional => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call => Primary,
            Primary => panic!("Tried to get higher precedence than primary"),
        }
    }
}

impl ParserRule {
    /// Returns one level of precedence higher than the rule's precedence.
    /// See [Precedence::higher_precedence()].
    #[inline(always)]
    fn higher_precedence(&self) -> Precedence {
        self.precedence.higher_precedence()
    }
}

impl<'src, 'd> Parser<'src, 'd> {
    /// Creates a new parser for the given source code. No tokens are scanned
    /// until the first [Parser::advance()].
    fn new(source: &'src str, diag: &'d mut dyn Write) -> Parser<'src, 'd> {
        let scanner = Scanner::new(source);
        let sentinel = scanner.make_sentinel("<before first token>");

        Parser {
            scanner,
            previous: sentinel,
            current: sentinel,
            had_error: false,
            panic_mode: false,
            diag,
        }
    }

    /// Update self.previous and self.current such that they move one token further in the token
    /// stream. Lexical errors are reported here, immediately, and their
    /// tokens never reach the rest of the parser.
    fn advance(&mut self) {
        self.previous = self.current;

        // Get tokens until we get a non-error token.
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind() != TokenKind::Error {
                break;
            }

            self.error_at_current(self.current.text())
        }
    }

    /// Advance past the next token. If the token is not of the desired kind, an error message is
    /// reported instead.
    fn consume(&mut self, desired: TokenKind, message: &'static str) {
        if self.current.kind() == desired {
            return self.advance();
        }

        self.error_at_current(message);
    }

    /// Return true if the current token matches the given kind.
    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind() == kind
    }

    /// Advances if the lookahead matches `desired`. Returns whether it matched.
    fn match_and_advance(&mut self, desired: TokenKind) -> bool {
        if self.check(desired) {
            self.advance();
            return true;
        }
        false
    }

    /// Report a compile error, located at the previous [Token]. In Pratt parsing, this is the
    /// handler you usually want to call, because the previous token decided which [ParserRule]
    /// was accepted.
    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message)
    }

    /// Report a compile error, located at the current [Token].
    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message)
    }

    /// Report a compile error, located at the given [Token].
    ///
    /// While in panic mode, reports are suppressed entirely; the first error
    /// in a malformed region is the only one the user sees.
    fn error_at(&mut self, token: Token, message: &str) {
        if self.panic_mode {
            return;
        }

        self.panic_mode = true;
        self.had_error = true;

        let _ = write!(self.diag, "[line {}] Error", token.line());
        match token.kind() {
            TokenKind::Eof => {
                let _ = write!(self.diag, " at end");
            }
            // The token *is* the error; there is no lexeme to point at.
            TokenKind::Error => {}
            _ => {
                let _ = write!(self.diag, " at '{}'", token.text());
            }
        }
        let _ = writeln!(self.diag, ": {message}");
    }

    /// Synchronize after being in panic mode.
    ///
    /// Gobble up and discard tokens until we **think** we're at a point that makes sense in the
    /// grammar: just after a semicolon, or just before a token that begins a new declaration or
    /// statement. This bounds the cascade to one reported error per genuine fault.
    fn synchronize(&mut self) {
        self.panic_mode = false;

        while self.current.kind() != TokenKind::Eof {
            if self.previous.kind() == TokenKind::Semicolon {
                return;
            }

            match self.current.kind() {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => (), // keep discarding
            }

            self.advance();
        }
    }
}

impl<'src, 'd, 'h> Compiler<'src, 'd, 'h> {
    /// Creates a new compiler with the given [Parser].
    fn new(parser: Parser<'src, 'd>, heap: &'h mut Heap) -> Compiler<'src, 'd, 'h> {
        Compiler {
            parser,
            heap,
            compiling_chunk: Chunk::new(),
        }
    }

    /// Takes ownership of the compiler, and returns the chunk.
    fn compile(mut self) -> crate::Result<Chunk> {
        // Prime the lookahead.
        self.advance();

        while !self.match_and_advance(TokenKind::Eof) {
            self.declaration();
        }
        self.end_compiler();

        if self.parser.had_error {
            return Err(InterpretationError::CompileError);
        }

        Ok(self.compiling_chunk)
    }

    /// Signal the end of compilation.
    fn end_compiler(&mut self) {
        self.emit_return();

        // Print a listing of the bytecode to manually inspect compiled output.
        if cfg!(feature = "print_code") && !self.parser.had_error {
            crate::debug::disassemble_chunk(&self.compiling_chunk, self.heap, "code");
        }
    }

    /// The core of the Pratt parsing algorithm.
    ///
    /// See: <https://en.wikipedia.org/wiki/Operator-precedence_parser#Pratt_parsing>
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();

        // Assignment targets are only valid near the bottom of the ladder;
        // handlers get told so they don't parse `a * b = c` as an assignment.
        let can_assign = precedence <= Precedence::Assignment;

        // First, figure out how to parse the prefix.
        if let Some(parse_prefix) = self.rule_from_previous().prefix {
            parse_prefix(self, can_assign);
        } else {
            self.parser.error("Expected expression.");
            return;
        }

        while precedence <= self.rule_from_current().precedence {
            // current is now previous:
            self.advance();
            let parse_infix = self
                .rule_from_previous()
                .infix
                .expect("a rule with a defined precedence must always have an infix rule");

            parse_infix(self, can_assign);
        }

        // Don't silently ignore a rogue '='.
        if can_assign && self.match_and_advance(TokenKind::Equal) {
            self.parser.error("Invalid assignment target.");
            // Parse the right-hand side anyway to stay synchronized.
            self.expression();
        }
    }

    /// Interns the identifier's name and adds it to the constant pool.
    /// Returns the constant's index.
    fn identifier_constant(&mut self, name: Token) -> usize {
        let interned = self.heap.intern_copy(name.text());
        self.make_constant(Value::Str(interned))
    }

    /// Consume the next identifier and interpret it as a variable.
    /// Returns the constant index for the identifier's name.
    fn parse_variable(&mut self, error_message: &'static str) -> usize {
        self.parser.consume(TokenKind::Identifier, error_message);
        let name = self.parser.previous;
        self.identifier_constant(name)
    }

    /// Define a new global variable whose name lives at the given constant index.
    fn define_variable(&mut self, global: usize) {
        self.emit_indexed(OpCode::DefineGlobal, OpCode::DefineGlobalLong, global);
    }

    /// Parse a variable. This could either be a variable access or an assignment, depending on
    /// `can_assign` and the syntactic context.
    fn named_variable(&mut self, name: Token, can_assign: bool) {
        let arg = self.identifier_constant(name);

        // Peek ahead and look if we're assigning.
        // This only works if we're parsing at a lower or equal precedence to assignment.
        if can_assign && self.match_and_advance(TokenKind::Equal) {
            // We're in an assignment expression!
            // Parse the right-hand side:
            self.expression();
            self.emit_indexed(OpCode::SetGlobal, OpCode::SetGlobalLong, arg);
        } else {
            // A reference to a variable.
            self.emit_indexed(OpCode::GetGlobal, OpCode::GetGlobalLong, arg);
        }
    }

    /// Parse a declaration.
    fn declaration(&mut self) {
        if self.match_and_advance(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.parser.panic_mode {
            self.parser.synchronize();
        }
    }

    /// Parse a statement.
    fn statement(&mut self) {
        if self.match_and_advance(TokenKind::Print) {
            self.print_statement();
        } else {
            self.expression_statement();
        }
    }

    /// Parse an expression.
    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    /// Parse a variable declaration. Assumes `var` has already been consumed.
    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expected variable name.");

        if self.match_and_advance(TokenKind::Equal) {
            self.expression();
        } else {
            // The declared-but-uninitialized variable gets nil.
            self.emit_instruction(OpCode::Nil);
        }

        self.parser
            .consume(TokenKind::Semicolon, "Expected ';' after variable declaration.");

        self.define_variable(global);
    }

    /// Parse an expression statement (e.g., assignments, bare expressions).
    fn expression_statement(&mut self) {
        self.expression();
        self.parser
            .consume(TokenKind::Semicolon, "Expected ';' after expression.");
        // Every expression leaves exactly one value on the stack, and a
        // statement must have zero stack effect: get rid of it.
        self.emit_instruction(OpCode::Pop);
    }

    /// Parse a print statement. Assumes `print` has already been consumed.
    fn print_statement(&mut self) {
        self.expression();
        self.parser
            .consume(TokenKind::Semicolon, "Expected ';' after value.");
        self.emit_instruction(OpCode::Print);
    }

    /// Appends [OpCode::Return] to the current [Chunk].
    fn emit_return(&mut self) {
        self.emit_instruction(OpCode::Return);
    }

    /// Appends the given constant to the pool and emits the instruction that
    /// loads it, in the short or long form as the index requires.
    fn emit_constant(&mut self, value: Value) {
        let line = self.line_number_of_prefix();
        let index = self.current_chunk().write_constant(value, line);
        if index >= Chunk::MAX_CONSTANTS {
            self.parser.error("Too many constants in one chunk.");
        }
    }

    /// Appends a new constant to the current [Chunk]'s pool (without emitting
    /// an instruction for it).
    ///
    /// # Error
    ///
    /// When the constant index can no longer be represented in the 3-byte
    /// long operand form, this signals a compile error and returns `0`. The
    /// chunk can still be appended to, but it is invalid, and will never be
    /// executed.
    fn make_constant(&mut self, value: Value) -> usize {
        let index = self.current_chunk().add_constant(value);
        if index >= Chunk::MAX_CONSTANTS {
            self.parser.error("Too many constants in one chunk.");
            return 0;
        }
        index
    }

    /// Writes an [OpCode] to the current [Chunk].
    /// Returns a [WrittenOpcode], with which you can write an operand.
    fn emit_instruction(&mut self, opcode: OpCode) -> WrittenOpcode {
        let line = self.line_number_of_prefix();
        self.current_chunk().write_opcode(opcode, line)
    }

    /// Writes two [OpCode]s to the current [Chunk].
    fn emit_instructions(&mut self, op1: OpCode, op2: OpCode) -> WrittenOpcode {
        let line = self.line_number_of_prefix();
        self.current_chunk().write_opcode(op1, line);
        self.current_chunk().write_opcode(op2, line)
    }

    /// Writes an instruction that takes a constant-pool index, choosing
    /// between the 1-byte form and the 3-byte little-endian form.
    fn emit_indexed(&mut self, short: OpCode, long: OpCode, index: usize) {
        if let Ok(byte) = u8::try_from(index) {
            self.emit_instruction(short).with_operand(byte);
        } else {
            self.emit_instruction(long).with_long_operand(index as u32);
        }
    }

    ///////////////////////////////////////// Aliases /////////////////////////////////////////////

    /// Returns the current [Chunk].
    #[inline(always)]
    fn current_chunk(&mut self) -> &mut Chunk {
        &mut self.compiling_chunk
    }

    /// Advance one token in the scanner, such that:
    /// ```text
    /// (previous, current) = (current, scanner.next_token())
    /// ```
    #[inline(always)]
    fn advance(&mut self) {
        self.parser.advance()
    }

    /// Returns the line number of the prefix token, a.k.a. `self.parser.previous`.
    #[inline(always)]
    fn line_number_of_prefix(&self) -> usize {
        self.parser.previous.line()
    }

    /// Delegates to [Parser::match_and_advance]. Returns true if the token was matched.
    #[inline(always)]
    fn match_and_advance(&mut self, desired: TokenKind) -> bool {
        self.parser.match_and_advance(desired)
    }

    /// Returns the rule for the prefix in the process of being parsed.
    #[inline(always)]
    fn rule_from_previous(&self) -> ParserRule {
        get_rule(self.previous_kind())
    }

    /// Returns the rule for the lookahead token.
    #[inline(always)]
    fn rule_from_current(&self) -> ParserRule {
        get_rule(self.parser.current.kind())
    }

    /// Return the kind of the previous token. This is useful in prefix parser functions.
    #[inline(always)]
    fn previous_kind(&self) -> TokenKind {
        self.parser.previous.kind()
    }
}

////////////////////////////////////////// Parser rules ///////////////////////////////////////////

/// Makes defining [ParserRule]s a bit cleaner looking.
macro_rules! rule {
    ($prefix:expr, $infix:expr, $precedence:expr) => {
        ParserRule {
            prefix: $prefix,
            infix: $infix,
            precedence: $precedence,
        }
    };
}

#[rustfmt::skip]
fn get_rule(kind: TokenKind) -> ParserRule {
    use TokenKind::*;
    match kind {
        //                     Prefix          Infix              Precedence
        LeftParen    => rule!{ Some(grouping), None,              Precedence::None },
        RightParen   => rule!{ None,           None,              Precedence::None },
        LeftBrace    => rule!{ None,           None,              Precedence::None },
        RightBrace   => rule!{ None,           None,              Precedence::None },
        Comma        => rule!{ None,           None,              Precedence::None },
        Dot          => rule!{ None,           None,              Precedence::None },
        Minus        => rule!{ Some(unary),    Some(binary),      Precedence::Term },
        Plus         => rule!{ None,           Some(binary),      Precedence::Term },
        Question     => rule!{ None,           Some(conditional), Precedence::Conditional },
        Colon        => rule!{ None,           None,              Precedence::None },
        Semicolon    => rule!{ None,           None,              Precedence::None },
        Slash        => rule!{ None,           Some(binary),      Precedence::Factor },
        Star         => rule!{ None,           Some(binary),      Precedence::Factor },
        Bang         => rule!{ Some(unary),    None,              Precedence::None },
        BangEqual    => rule!{ None,           Some(binary),      Precedence::Equality },
        Equal        => rule!{ None,           None,              Precedence::None },
        EqualEqual   => rule!{ None,           Some(binary),      Precedence::Equality },
        Greater      => rule!{ None,           Some(binary),      Precedence::Comparison },
        GreaterEqual => rule!{ None,           Some(binary),      Precedence::Comparison },
        Less         => rule!{ None,           Some(binary),      Precedence::Comparison },
        LessEqual    => rule!{ None,           Some(binary),      Precedence::Comparison },
        Identifier   => rule!{ Some(variable), None,              Precedence::None },
        StrLiteral   => rule!{ Some(string),   None,              Precedence::None },
        Number       => rule!{ Some(number),   None,              Precedence::None },
        And          => rule!{ None,           None,              Precedence::None },
        Class        => rule!{ None,           None,              Precedence::None },
        Else         => rule!{ None,           None,              Precedence::None },
        False        => rule!{ Some(literal),  None,              Precedence::None },
        For          => rule!{ None,           None,              Precedence::None },
        Fun          => rule!{ None,           None,              Precedence::None },
        If           => rule!{ None,           None,              Precedence::None },
        Nil          => rule!{ Some(literal),  None,              Precedence::None },
        Or           => rule!{ None,           None,              Precedence::None },
        Print        => rule!{ None,           None,              Precedence::None },
        Return       => rule!{ None,           None,              Precedence::None },
        Super        => rule!{ None,           None,              Precedence::None },
        This         => rule!{ None,           None,              Precedence::None },
        True         => rule!{ Some(literal),  None,              Precedence::None },
        Var          => rule!{ None,           None,              Precedence::None },
        While        => rule!{ None,           None,              Precedence::None },
        Error        => rule!{ None,           None,              Precedence::None },
        Eof          => rule!{ None,           None,              Precedence::None },
    }
}

/// Parse '(' as a prefix. Assumes '(' has been consumed.
fn grouping(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(TokenKind::LeftParen, compiler.previous_kind());
    compiler.expression();
    compiler
        .parser
        .consume(TokenKind::RightParen, "Expected ')' after expression.");
}

/// Parse a number literal as a prefix. Assumes the number has been consumed.
fn number(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(TokenKind::Number, compiler.previous_kind());
    let value = compiler
        .parser
        .previous
        .text()
        .parse::<f64>()
        .expect("Internal error: TokenKind::Number MUST parse as a float, but didn't?");
    compiler.emit_constant(value.into());
}

/// Parse a unary operator as a prefix. Assumes the operator has been consumed.
fn unary(compiler: &mut Compiler, _can_assign: bool) {
    let operator = compiler.previous_kind();

    // Compile the operand, so that it's placed on the stack.
    compiler.parse_precedence(Precedence::Unary);

    match operator {
        TokenKind::Bang => compiler.emit_instruction(OpCode::Not),
        TokenKind::Minus => compiler.emit_instruction(OpCode::Negate),
        _ => unreachable!(),
    };
}

/// Parse a binary operator as an infix. Assumes the operator has been consumed.
fn binary(compiler: &mut Compiler, _can_assign: bool) {
    let operator = compiler.previous_kind();
    let rule = get_rule(operator);

    // One level higher makes the operator left-associative.
    compiler.parse_precedence(rule.higher_precedence());
    match operator {
        // There are no dedicated opcodes for the inverted comparisons.
        TokenKind::BangEqual => compiler.emit_instructions(OpCode::Equal, OpCode::Not),
        TokenKind::EqualEqual => compiler.emit_instruction(OpCode::Equal),
        TokenKind::Greater => compiler.emit_instruction(OpCode::Greater),
        TokenKind::GreaterEqual => compiler.emit_instructions(OpCode::Less, OpCode::Not),
        TokenKind::Less => compiler.emit_instruction(OpCode::Less),
        TokenKind::LessEqual => compiler.emit_instructions(OpCode::Greater, OpCode::Not),
        TokenKind::Plus => compiler.emit_instruction(OpCode::Add),
        TokenKind::Minus => compiler.emit_instruction(OpCode::Subtract),
        TokenKind::Star => compiler.emit_instruction(OpCode::Multiply),
        TokenKind::Slash => compiler.emit_instruction(OpCode::Divide),
        _ => unreachable!(),
    };
}

/// Parse the `?:` conditional operator as an infix. Assumes `?` has been
/// consumed and the condition is already on the stack.
///
/// Code generation is linear: both branches are emitted unconditionally, and
/// [OpCode::Conditional] selects one of the two values at runtime.
fn conditional(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(TokenKind::Question, compiler.previous_kind());

    // The then-branch stops before any `:`.
    compiler.parse_precedence(Precedence::Conditional);
    compiler.parser.consume(
        TokenKind::Colon,
        "Expected ':' after then branch of conditional expression.",
    );
    // Parsing the else-branch at assignment precedence makes `?:`
    // right-associative: `a ? b : c ? d : e` is `a ? b : (c ? d : e)`.
    compiler.parse_precedence(Precedence::Assignment);

    compiler.emit_instruction(OpCode::Conditional);
}

/// Parse a keyword literal as a prefix. Assumes the keyword has been consumed.
fn literal(compiler: &mut Compiler, _can_assign: bool) {
    match compiler.previous_kind() {
        TokenKind::False => compiler.emit_instruction(OpCode::False),
        TokenKind::Nil => compiler.emit_instruction(OpCode::Nil),
        TokenKind::True => compiler.emit_instruction(OpCode::True),
        _ => unreachable!(),
    };
}

/// Parse a string literal: intern its contents and add them to the constant pool.
fn string(compiler: &mut Compiler, _can_assign: bool) {
    debug_assert_eq!(TokenKind::StrLiteral, compiler.previous_kind());

    // Access the string contents (without the quotes).
    let literal = compiler.parser.previous.text();
    debug_assert!(literal.len() >= 2);
    debug_assert!(literal.starts_with('"'));
    debug_assert!(literal.ends_with('"'));

    let contents = &literal[1..literal.len() - 1];
    let interned = compiler.heap.intern_copy(contents);
    compiler.emit_constant(Value::Str(interned));
}

/// Parse a variable. It can be either a variable access or assignment, which is why `can_assign`
/// is required by all callbacks!
fn variable(compiler: &mut Compiler, can_assign: bool) {
    let name = compiler.parser.previous;
    compiler.named_variable(name, can_assign);
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

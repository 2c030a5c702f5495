//! Handles Lox's lexical analysis.
//!
//! Contains the [Scanner], which yields [Token]s on demand (it also
//! implements [Iterator]). A token is a [TokenKind] plus the source slice it
//! came from and its line number.
//!
//! # Example
//!
//! ```
//! use rilox::scanner::{Scanner, TokenKind};
//! let scanner = Scanner::new("print 1 + 2;");
//! let kinds: Vec<_> = scanner
//!     .map(|token| token.kind())
//!     .take_while(|&kind| kind != TokenKind::Eof) // scanner yields Eof forever...
//!     .collect();
//!
//! use TokenKind::*;
//! assert_eq!(vec![Print, Number, Plus, Number, Semicolon], kinds);
//! ```

use enum_map::Enum;

/// One contiguous slice of Lox source code, classified.
///
/// Lexical errors are represented in-band: a token whose kind is
/// [TokenKind::Error] carries the error message as its text instead of a
/// source slice.
#[derive(Clone, Copy, Debug)]
pub struct Token<'a> {
    kind: TokenKind,
    /// The actual text from the source code (or the message, for errors).
    text: &'a str,
    /// The line this token came from.
    line: usize,
}

/// What _kind_ of [Token] you have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
#[rustfmt::skip]
pub enum TokenKind {
    // Single-character tokens.
    LeftParen, RightParen,
    LeftBrace, RightBrace,
    Comma, Dot, Minus, Plus,
    Semicolon, Star, Slash,
    Question, Colon,
    // One or two character tokens.
    Bang, BangEqual,
    Equal, EqualEqual,
    Greater, GreaterEqual,
    Less, LessEqual,
    // Literals
    Identifier, StrLiteral, Number,
    // Keywords
    And, Class, Else, False,
    For, Fun, If, Nil, Or,
    Print, Return, Super, This,
    True, Var, While,

    // Others
    Error, Eof
}

/// Scans Lox source code and iteratively yields [Token]s.
///
/// The scanner is stateful and single-pass: once the whole source has been
/// scanned, it will forever yield [TokenKind::Eof]. There is no backtracking;
/// the compiler keeps the one token of lookahead it needs itself.
#[derive(Debug)]
pub struct Scanner<'a> {
    start: &'a str,
    current: &'a str,
    line: usize,
}

impl<'a> Scanner<'a> {
    /// Start scanning the given string of source code.
    pub fn new(source: &'a str) -> Self {
        Scanner {
            start: source,
            current: source,
            line: 1,
        }
    }

    /// Yield the next [Token] from the source. At the end of the source, this
    /// always returns an end-of-file token.
    pub fn scan_token(&mut self) -> Token<'a> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        match self.advance() {
            c if is_id_start(c) => self.identifier(),
            c if c.is_ascii_digit() => self.number(),
            '(' => self.make_token(TokenKind::LeftParen),
            ')' => self.make_token(TokenKind::RightParen),
            '{' => self.make_token(TokenKind::LeftBrace),
            '}' => self.make_token(TokenKind::RightBrace),
            ';' => self.make_token(TokenKind::Semicolon),
            ',' => self.make_token(TokenKind::Comma),
            '.' => self.make_token(TokenKind::Dot),
            '-' => self.make_token(TokenKind::Minus),
            '+' => self.make_token(TokenKind::Plus),
            '/' => self.make_token(TokenKind::Slash),
            '*' => self.make_token(TokenKind::Star),
            '?' => self.make_token(TokenKind::Question),
            ':' => self.make_token(TokenKind::Colon),
            '!' => self.one_or_two(TokenKind::Bang, TokenKind::BangEqual),
            '=' => self.one_or_two(TokenKind::Equal, TokenKind::EqualEqual),
            '<' => self.one_or_two(TokenKind::Less, TokenKind::LessEqual),
            '>' => self.one_or_two(TokenKind::Greater, TokenKind::GreaterEqual),
            '"' => self.string(),
            _ => self.error_token("Unexpected character."),
        }
    }

    /// Returns `true` if we've reached the end of the source code.
    pub fn is_at_end(&self) -> bool {
        self.current.is_empty()
    }

    /// Returns a placeholder token for "before the first real token". The
    /// compiler uses this to initialize its `previous` slot.
    pub fn make_sentinel(&self, message: &'static str) -> Token<'a> {
        Token {
            kind: TokenKind::Error,
            text: message,
            line: 0,
        }
    }

    /// Scans either a one-character token or its `=`-suffixed variant.
    fn one_or_two(&mut self, short: TokenKind, long: TokenKind) -> Token<'a> {
        let followed_by_equal = self.match_and_advance('=');
        self.make_token(if followed_by_equal { long } else { short })
    }

    /// Advances self.current, s.t. self.start <= self.current reference the
    /// same str. Returns the char just consumed.
    ///
    /// # Panics
    ///
    /// If this is called at the end of the source.
    fn advance(&mut self) -> char {
        let c = match self.current.chars().next() {
            Some(c) => c,
            None => panic!("called advance() at end of file"),
        };

        self.current = &self.current[c.len_utf8()..];
        c
    }

    /// Peek at the first char in self.current.
    fn peek(&self) -> char {
        self.current.chars().next().unwrap_or('\0')
    }

    /// Peek at the second char in self.current.
    fn peek_next(&self) -> char {
        let mut chars = self.current.chars();
        chars.next();
        chars.next().unwrap_or('\0')
    }

    /// If the next character matches `expected`, consume it and return true.
    fn match_and_advance(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.peek() != expected {
            return false;
        }

        self.current = &self.current[expected.len_utf8()..];
        true
    }

    /// Skips whitespace and comments.
    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                ' ' | '\r' | '\t' => {
                    self.advance();
                }
                '\n' => {
                    self.line += 1;
                    self.advance();
                }
                // Comments are "whitespace" too.
                '/' => {
                    if self.peek_next() == '/' {
                        while self.peek() != '\n' && !self.is_at_end() {
                            self.advance();
                        }
                    } else {
                        return;
                    }
                }
                _ => return,
            };
        }
    }

    /// Scan an identifier or keyword.
    fn identifier(&mut self) -> Token<'a> {
        while is_id_continue(self.peek()) {
            self.advance();
        }

        self.make_token(self.identifier_kind())
    }

    /// Scan a string literal. Expects the starting quote to have been consumed.
    fn string(&mut self) -> Token<'a> {
        while self.peek() != '"' && !self.is_at_end() {
            if self.peek() == '\n' {
                self.line += 1;
            }
            self.advance();
        }

        if self.is_at_end() {
            return self.error_token("Unterminated string.");
        }

        // The closing quote.
        self.advance();
        self.make_token(TokenKind::StrLiteral)
    }

    /// Scan a number literal. Expects the first digit to have been consumed.
    fn number(&mut self) -> Token<'a> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            // Consume the decimal point.
            self.advance();

            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        self.make_token(TokenKind::Number)
    }

    /// Decide whether the identifier just scanned is a keyword.
    fn identifier_kind(&self) -> TokenKind {
        let mut chars = self.start.chars();

        match chars.next().unwrap_or('\0') {
            'a' => self.check_keyword("and", TokenKind::And),
            'c' => self.check_keyword("class", TokenKind::Class),
            'e' => self.check_keyword("else", TokenKind::Else),
            'f' => match chars.next().unwrap_or('\0') {
                'a' => self.check_keyword("false", TokenKind::False),
                'o' => self.check_keyword("for", TokenKind::For),
                'u' => self.check_keyword("fun", TokenKind::Fun),
                _ => TokenKind::Identifier,
            },
            'i' => self.check_keyword("if", TokenKind::If),
            'n' => self.check_keyword("nil", TokenKind::Nil),
            'o' => self.check_keyword("or", TokenKind::Or),
            'p' => self.check_keyword("print", TokenKind::Print),
            'r' => self.check_keyword("return", TokenKind::Return),
            's' => self.check_keyword("super", TokenKind::Super),
            't' => match chars.next().unwrap_or('\0') {
                'h' => self.check_keyword("this", TokenKind::This),
                'r' => self.check_keyword("true", TokenKind::True),
                _ => TokenKind::Identifier,
            },
            'v' => self.check_keyword("var", TokenKind::Var),
            'w' => self.check_keyword("while", TokenKind::While),
            _ => TokenKind::Identifier,
        }
    }

    /// Confirms that the current token's text is exactly the keyword.
    fn check_keyword(&self, keyword_text: &'static str, keyword: TokenKind) -> TokenKind {
        let token_length = self.start.len() - self.current.len();
        if &self.start[..token_length] == keyword_text {
            keyword
        } else {
            TokenKind::Identifier
        }
    }

    /// Returns a token with [TokenKind::Error] carrying the message.
    fn error_token(&self, message: &'a str) -> Token<'a> {
        Token {
            kind: TokenKind::Error,
            text: message,
            line: self.line,
        }
    }

    /// Returns a [Token] for the span between self.start and self.current.
    fn make_token(&self, kind: TokenKind) -> Token<'a> {
        let extent = self.start.len() - self.current.len();

        Token {
            kind,
            text: &self.start[..extent],
            line: self.line,
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        Some(self.scan_token())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        // This iterator is infinite.
        (usize::MAX, None)
    }
}

impl<'a> Token<'a> {
    /// Return the line number this token was found on.
    pub fn line(&self) -> usize {
        self.line
    }

    /// Return the literal text of this token. For string literals, this
    /// always includes the quotes. For error tokens, this is the message.
    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Return the [TokenKind] of this token.
    pub fn kind(&self) -> TokenKind {
        self.kind
    }
}

///////////////////////////////////////////// Helpers /////////////////////////////////////////////

/// Returns true if this char can start an identifier or keyword.
fn is_id_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Returns true if this char can continue an identifier or keyword.
fn is_id_continue(c: char) -> bool {
    is_id_start(c) || c.is_ascii_digit()
}

////////////////////////////////////////////// Tests //////////////////////////////////////////////

#[cfg(test)]
mod test {
    use super::*;

    fn kinds_of(source: &str) -> Vec<TokenKind> {
        Scanner::new(source)
            .map(|token| token.kind())
            .take_while(|&kind| kind != TokenKind::Eof)
            .collect()
    }

    #[test]
    fn scanning_every_keyword() {
        use TokenKind::*;

        let source_code = "class classic {
            fun fund() {
                if (ifree and anders or orvile) {
                    print printer;
                } else {
                    for (former = 0; former < 10; former = former + 1) {
                    nill = nil;
                    }
                    super.falseFlag = truede;
                    this.thistle = true;
                    superMario = false or true;
                    return returned;
                }
                var varied;
                while (whileLoop) {
                    0;
                }
            }
        }";

        // I copied the indentation of the code above.
        #[rustfmt::skip]
        let expected = vec![
            Class, Identifier, LeftBrace,
                Fun, Identifier, LeftParen, RightParen, LeftBrace,
                    If, LeftParen, Identifier, And, Identifier, Or, Identifier, RightParen, LeftBrace,
                        Print, Identifier, Semicolon,
                    RightBrace, Else, LeftBrace,
                        For, LeftParen, Identifier, Equal, Number, Semicolon, Identifier, Less, Number, Semicolon, Identifier, Equal, Identifier, Plus, Number, RightParen, LeftBrace,
                            Identifier, Equal, Nil, Semicolon,
                        RightBrace,
                        Super, Dot, Identifier, Equal, Identifier, Semicolon,
                        This, Dot, Identifier, Equal,
                        True, Semicolon, Identifier, Equal, False, Or, True, Semicolon,
                        Return, Identifier, Semicolon,
                    RightBrace,
                    Var, Identifier, Semicolon,
                    While, LeftParen, Identifier, RightParen, LeftBrace,
                        Number, Semicolon,
                    RightBrace,
                RightBrace,
            RightBrace,
        ];

        assert_eq!(expected, kinds_of(source_code));
    }

    #[test]
    fn scanning_conditional_operators() {
        use TokenKind::*;
        assert_eq!(
            vec![True, Question, Number, Colon, Number, Semicolon],
            kinds_of("true ? 1 : 2;")
        );
    }

    #[test]
    fn string_literals_keep_their_quotes() {
        let mut scanner = Scanner::new("\"hello\"");
        let token = scanner.scan_token();
        assert_eq!(TokenKind::StrLiteral, token.kind());
        assert_eq!("\"hello\"", token.text());
    }

    #[test]
    fn unterminated_string_is_a_lexical_error() {
        let mut scanner = Scanner::new("\"oops");
        let token = scanner.scan_token();
        assert_eq!(TokenKind::Error, token.kind());
        assert_eq!("Unterminated string.", token.text());
    }

    #[test]
    fn line_numbers_count_newlines() {
        let mut scanner = Scanner::new("1\n2\n\n3");
        assert_eq!(1, scanner.scan_token().line());
        assert_eq!(2, scanner.scan_token().line());
        assert_eq!(4, scanner.scan_token().line());
    }
}

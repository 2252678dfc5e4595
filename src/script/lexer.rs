//! Lexer for the test script language
//!
//! Produces a flat token stream. Each token remembers whether a line break
//! preceded it so the parser can apply automatic semicolon insertion.

use super::SyntaxError;

/// Source position of a token (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

/// Reserved words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Let,
    Const,
    Var,
    Function,
    Await,
    Return,
    If,
    Else,
    While,
    For,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    New,
    Typeof,
    True,
    False,
    Null,
    Undefined,
}

impl Keyword {
    /// Source spelling, used when a keyword appears as a property name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Let => "let",
            Self::Const => "const",
            Self::Var => "var",
            Self::Function => "function",
            Self::Await => "await",
            Self::Return => "return",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::For => "for",
            Self::Break => "break",
            Self::Continue => "continue",
            Self::Throw => "throw",
            Self::Try => "try",
            Self::Catch => "catch",
            Self::Finally => "finally",
            Self::New => "new",
            Self::Typeof => "typeof",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Undefined => "undefined",
        }
    }

    fn from_ident(ident: &str) -> Option<Self> {
        let kw = match ident {
            "let" => Self::Let,
            "const" => Self::Const,
            "var" => Self::Var,
            "function" => Self::Function,
            "await" => Self::Await,
            "return" => Self::Return,
            "if" => Self::If,
            "else" => Self::Else,
            "while" => Self::While,
            "for" => Self::For,
            "break" => Self::Break,
            "continue" => Self::Continue,
            "throw" => Self::Throw,
            "try" => Self::Try,
            "catch" => Self::Catch,
            "finally" => Self::Finally,
            "new" => Self::New,
            "typeof" => Self::Typeof,
            "true" => Self::True,
            "false" => Self::False,
            "null" => Self::Null,
            "undefined" => Self::Undefined,
            _ => return None,
        };
        Some(kw)
    }
}

/// Punctuation and operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punct {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Colon,
    Dot,
    Question,
    QuestionQuestion,
    Arrow,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    PlusPlus,
    MinusMinus,
    Bang,
    EqEq,
    EqEqEq,
    NotEq,
    NotEqEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
}

/// Kind of token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

/// A token with its kind and position
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// A line break appeared between the previous token and this one
    pub newline_before: bool,
}

/// Lexer over script source text
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
    newline_before: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
            newline_before: false,
        }
    }

    /// Tokenize the whole source. The stream always ends with `Eof`.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let span = self.span();
            let newline_before = std::mem::take(&mut self.newline_before);
            let Some(c) = self.advance() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    span,
                    newline_before,
                });
                return Ok(tokens);
            };

            let kind = match c {
                '0'..='9' => self.number(c, span)?,
                '.' if self.peek().is_some_and(|n| n.is_ascii_digit()) => self.number(c, span)?,
                '\'' | '"' => TokenKind::Str(self.string(c, span)?),
                '`' => {
                    return Err(SyntaxError::new(
                        "template literals are not supported; use quoted strings",
                        span,
                    ))
                }
                c if is_ident_start(c) => {
                    let mut ident = String::from(c);
                    while let Some(n) = self.peek().filter(|n| is_ident_part(*n)) {
                        ident.push(n);
                        self.advance();
                    }
                    match Keyword::from_ident(&ident) {
                        Some(kw) => TokenKind::Keyword(kw),
                        None => TokenKind::Ident(ident),
                    }
                }
                c => TokenKind::Punct(self.punct(c, span)?),
            };

            tokens.push(Token {
                kind,
                span,
                newline_before,
            });
        }
    }

    // ========================================================================
    // Core character handling
    // ========================================================================

    fn span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Skip whitespace and comments, noting line breaks
    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            match self.peek() {
                Some('\n') => {
                    self.newline_before = true;
                    self.advance();
                }
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('/') => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some('/') => {
                            while let Some(c) = self.peek() {
                                if c == '\n' {
                                    break;
                                }
                                self.advance();
                            }
                        }
                        Some('*') => {
                            let start = self.span();
                            self.advance();
                            self.advance();
                            loop {
                                match self.advance() {
                                    Some('*') if self.peek() == Some('/') => {
                                        self.advance();
                                        break;
                                    }
                                    Some('\n') => self.newline_before = true,
                                    Some(_) => {}
                                    None => {
                                        return Err(SyntaxError::new(
                                            "unterminated block comment",
                                            start,
                                        ))
                                    }
                                }
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    // ========================================================================
    // Literals
    // ========================================================================

    fn number(&mut self, first: char, span: Span) -> Result<TokenKind, SyntaxError> {
        if first == '0' && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            let mut digits = String::new();
            while let Some(c) = self.peek().filter(|c| c.is_ascii_hexdigit() || *c == '_') {
                if c != '_' {
                    digits.push(c);
                }
                self.advance();
            }
            return u64::from_str_radix(&digits, 16)
                .map(|n| TokenKind::Number(n as f64))
                .map_err(|_| SyntaxError::new("invalid hexadecimal literal", span));
        }

        let mut text = String::from(first);
        let mut seen_dot = first == '.';
        let mut seen_exp = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' => text.push(c),
                '_' => {}
                '.' if !seen_dot && !seen_exp => {
                    seen_dot = true;
                    text.push(c);
                }
                'e' | 'E' if !seen_exp => {
                    seen_exp = true;
                    text.push(c);
                    self.advance();
                    if let Some(sign) = self.peek().filter(|s| *s == '+' || *s == '-') {
                        text.push(sign);
                        self.advance();
                    }
                    continue;
                }
                _ => break,
            }
            self.advance();
        }

        text.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| SyntaxError::new(format!("invalid number literal '{}'", text), span))
    }

    fn string(&mut self, quote: char, span: Span) -> Result<String, SyntaxError> {
        let mut value = String::new();
        loop {
            let Some(c) = self.advance() else {
                return Err(SyntaxError::new("unterminated string literal", span));
            };
            match c {
                c if c == quote => return Ok(value),
                '\n' => return Err(SyntaxError::new("unterminated string literal", span)),
                '\\' => {
                    let Some(escaped) = self.advance() else {
                        return Err(SyntaxError::new("unterminated string literal", span));
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        '0' => value.push('\0'),
                        'b' => value.push('\u{8}'),
                        'f' => value.push('\u{c}'),
                        'v' => value.push('\u{b}'),
                        'x' => value.push(self.hex_escape(2, span)?),
                        'u' => value.push(self.hex_escape(4, span)?),
                        '\n' => {}
                        other => value.push(other),
                    }
                }
                c => value.push(c),
            }
        }
    }

    fn hex_escape(&mut self, len: usize, span: Span) -> Result<char, SyntaxError> {
        let mut digits = String::with_capacity(len);
        for _ in 0..len {
            match self.advance() {
                Some(c) if c.is_ascii_hexdigit() => digits.push(c),
                _ => return Err(SyntaxError::new("invalid escape sequence", span)),
            }
        }
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| SyntaxError::new("invalid escape sequence", span))
    }

    // ========================================================================
    // Operators
    // ========================================================================

    fn punct(&mut self, c: char, span: Span) -> Result<Punct, SyntaxError> {
        let p = match c {
            '(' => Punct::LParen,
            ')' => Punct::RParen,
            '{' => Punct::LBrace,
            '}' => Punct::RBrace,
            '[' => Punct::LBracket,
            ']' => Punct::RBracket,
            ',' => Punct::Comma,
            ';' => Punct::Semi,
            ':' => Punct::Colon,
            '.' => Punct::Dot,
            '%' => Punct::Percent,
            '?' => {
                if self.eat('?') {
                    Punct::QuestionQuestion
                } else {
                    Punct::Question
                }
            }
            '=' => {
                if self.eat('>') {
                    Punct::Arrow
                } else if self.eat('=') {
                    if self.eat('=') {
                        Punct::EqEqEq
                    } else {
                        Punct::EqEq
                    }
                } else {
                    Punct::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Punct::NotEqEq
                    } else {
                        Punct::NotEq
                    }
                } else {
                    Punct::Bang
                }
            }
            '+' => {
                if self.eat('+') {
                    Punct::PlusPlus
                } else if self.eat('=') {
                    Punct::PlusAssign
                } else {
                    Punct::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    Punct::MinusMinus
                } else if self.eat('=') {
                    Punct::MinusAssign
                } else {
                    Punct::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    Punct::StarAssign
                } else {
                    Punct::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    Punct::SlashAssign
                } else {
                    Punct::Slash
                }
            }
            '<' => {
                if self.eat('=') {
                    Punct::LtEq
                } else {
                    Punct::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Punct::GtEq
                } else {
                    Punct::Gt
                }
            }
            '&' if self.eat('&') => Punct::AndAnd,
            '|' if self.eat('|') => Punct::OrOr,
            other => {
                return Err(SyntaxError::new(
                    format!("unexpected character '{}'", other),
                    span,
                ))
            }
        };
        Ok(p)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_call_with_arrow() {
        assert_eq!(
            kinds("test('adds', () => 1)"),
            vec![
                TokenKind::Ident("test".into()),
                TokenKind::Punct(Punct::LParen),
                TokenKind::Str("adds".into()),
                TokenKind::Punct(Punct::Comma),
                TokenKind::Punct(Punct::LParen),
                TokenKind::Punct(Punct::RParen),
                TokenKind::Punct(Punct::Arrow),
                TokenKind::Number(1.0),
                TokenKind::Punct(Punct::RParen),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            kinds("1.5 2e3 0xff .25"),
            vec![
                TokenKind::Number(1.5),
                TokenKind::Number(2000.0),
                TokenKind::Number(255.0),
                TokenKind::Number(0.25),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#"'it\'s' "a\nb" 'A'"#),
            vec![
                TokenKind::Str("it's".into()),
                TokenKind::Str("a\nb".into()),
                TokenKind::Str("A".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_and_newlines() {
        let tokens = Lexer::new("a // note\n/* block\n */ b").tokenize().unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("a".into()));
        assert!(!tokens[0].newline_before);
        assert_eq!(tokens[1].kind, TokenKind::Ident("b".into()));
        assert!(tokens[1].newline_before);
        assert_eq!(tokens[1].span.line, 3);
    }

    #[test]
    fn test_strict_equality_operators() {
        assert_eq!(
            kinds("a === b !== c"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct(Punct::EqEqEq),
                TokenKind::Ident("b".into()),
                TokenKind::Punct(Punct::NotEqEq),
                TokenKind::Ident("c".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::new("'abc").tokenize().unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_template_literal_rejected() {
        let err = Lexer::new("`x`").tokenize().unwrap_err();
        assert!(err.message.contains("template"));
    }
}

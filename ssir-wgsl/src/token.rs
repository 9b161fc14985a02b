//! WGSL tokenizer.
//!
//! A hand-written scanner that walks the source one character at a time,
//! tracking line and column for every token it produces. The scanner never
//! fails hard: unexpected characters become [`SyntaxError`]s and scanning
//! continues, so the parser always receives a complete token stream.
use std::iter::Peekable;
use std::str::Chars;

/// A recoverable front-end diagnostic with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    // Reserved words.
    KwStruct,
    KwFn,
    KwVar,
    KwLet,
    KwConst,
    KwOverride,
    KwReturn,
    KwIf,
    KwElse,
    KwWhile,
    KwFor,
    // Delimiters.
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    At,
    Question,
    // Operators.
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Bang,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    Ne,
    Shl,
    Shr,
    AmpAmp,
    PipePipe,
    Assign,
    PlusEq,
    MinusEq,
    StarEq,
    SlashEq,
    PercentEq,
    AmpEq,
    PipeEq,
    CaretEq,
    Arrow,
    PlusPlus,
    MinusMinus,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: u32,
    pub col: u32,
    /// Set for number tokens that carry a fraction, an exponent or a float
    /// suffix.
    pub is_float: bool,
}

fn keyword(ident: &str) -> Option<TokenKind> {
    let kind = match ident {
        "struct" => TokenKind::KwStruct,
        "fn" => TokenKind::KwFn,
        "var" => TokenKind::KwVar,
        "let" => TokenKind::KwLet,
        "const" => TokenKind::KwConst,
        "override" => TokenKind::KwOverride,
        "return" => TokenKind::KwReturn,
        "if" => TokenKind::KwIf,
        "else" => TokenKind::KwElse,
        "while" => TokenKind::KwWhile,
        "for" => TokenKind::KwFor,
        _ => return None,
    };
    Some(kind)
}

pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    line: u32,
    col: u32,
    tokens: Vec<Token>,
    errors: Vec<SyntaxError>,
}
impl<'a> Tokenizer<'a> {
    pub fn new(code: &'a str) -> Self {
        Tokenizer {
            chars: code.chars().peekable(),
            line: 1,
            col: 1,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn push(&mut self, kind: TokenKind, lexeme: String, line: u32, col: u32, is_float: bool) {
        self.tokens.push(Token {
            kind,
            lexeme,
            line,
            col,
            is_float,
        });
    }

    fn tokenize_line_comment(&mut self) {
        while let Some(c) = self.chars.peek() {
            if *c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn tokenize_block_comment(&mut self) {
        // Non-nesting; runs to `*/` or end of input.
        loop {
            match self.bump() {
                None => break,
                Some('*') => {
                    if self.chars.peek() == Some(&'/') {
                        self.bump();
                        break;
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn tokenize_ident(&mut self, first: char, line: u32, col: u32) {
        let mut ident = String::new();
        ident.push(first);
        while let Some(c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || *c == '_' {
                ident.push(*c);
                self.bump();
            } else {
                break;
            }
        }
        let kind = keyword(&ident).unwrap_or(TokenKind::Ident);
        self.push(kind, ident, line, col, false);
    }

    fn tokenize_number(&mut self, first: char, line: u32, col: u32) {
        let mut buf = String::new();
        buf.push(first);
        let mut is_float = false;

        if first == '0' && matches!(self.chars.peek().copied(), Some('x') | Some('X')) {
            // Hexadecimal integer with an optional sign suffix.
            buf.push(self.bump().unwrap());
            while let Some(c) = self.chars.peek() {
                if c.is_ascii_hexdigit() || *c == '_' {
                    buf.push(*c);
                    self.bump();
                } else {
                    break;
                }
            }
            if matches!(
                self.chars.peek().copied(),
                Some('u') | Some('U') | Some('i') | Some('I')
            ) {
                buf.push(self.bump().unwrap());
            }
            self.push(TokenKind::Number, buf, line, col, false);
            return;
        }

        while let Some(c) = self.chars.peek() {
            if c.is_ascii_digit() || *c == '_' {
                buf.push(*c);
                self.bump();
            } else {
                break;
            }
        }
        if self.chars.peek() == Some(&'.') {
            is_float = true;
            buf.push('.');
            self.bump();
            while let Some(c) = self.chars.peek() {
                if c.is_ascii_digit() || *c == '_' {
                    buf.push(*c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.chars.peek().copied(), Some('e') | Some('E')) {
            is_float = true;
            buf.push(self.bump().unwrap());
            if matches!(self.chars.peek().copied(), Some('+') | Some('-')) {
                buf.push(self.bump().unwrap());
            }
            while let Some(c) = self.chars.peek() {
                if c.is_ascii_digit() || *c == '_' {
                    buf.push(*c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        match self.chars.peek().copied() {
            Some('f') | Some('F') | Some('h') | Some('H') => {
                is_float = true;
                buf.push(self.bump().unwrap());
            }
            Some('i') | Some('I') | Some('u') | Some('U') if !is_float => {
                buf.push(self.bump().unwrap());
            }
            _ => {}
        }
        self.push(TokenKind::Number, buf, line, col, is_float);
    }

    /// Match a one-to-three character operator starting at `first`.
    fn tokenize_operator(&mut self, first: char, line: u32, col: u32) {
        use TokenKind::*;
        let peek = self.chars.peek().copied();
        let (kind, len) = match (first, peek) {
            ('-', Some('>')) => (Arrow, 2),
            ('+', Some('+')) => (PlusPlus, 2),
            ('-', Some('-')) => (MinusMinus, 2),
            ('+', Some('=')) => (PlusEq, 2),
            ('-', Some('=')) => (MinusEq, 2),
            ('*', Some('=')) => (StarEq, 2),
            ('/', Some('=')) => (SlashEq, 2),
            ('%', Some('=')) => (PercentEq, 2),
            ('&', Some('=')) => (AmpEq, 2),
            ('|', Some('=')) => (PipeEq, 2),
            ('^', Some('=')) => (CaretEq, 2),
            ('&', Some('&')) => (AmpAmp, 2),
            ('|', Some('|')) => (PipePipe, 2),
            ('<', Some('<')) => (Shl, 2),
            ('>', Some('>')) => (Shr, 2),
            ('<', Some('=')) => (Le, 2),
            ('>', Some('=')) => (Ge, 2),
            ('=', Some('=')) => (EqEq, 2),
            ('!', Some('=')) => (Ne, 2),
            ('+', _) => (Plus, 1),
            ('-', _) => (Minus, 1),
            ('*', _) => (Star, 1),
            ('/', _) => (Slash, 1),
            ('%', _) => (Percent, 1),
            ('&', _) => (Amp, 1),
            ('|', _) => (Pipe, 1),
            ('^', _) => (Caret, 1),
            ('~', _) => (Tilde, 1),
            ('!', _) => (Bang, 1),
            ('<', _) => (Lt, 1),
            ('>', _) => (Gt, 1),
            ('=', _) => (Assign, 1),
            ('(', _) => (LParen, 1),
            (')', _) => (RParen, 1),
            ('{', _) => (LBrace, 1),
            ('}', _) => (RBrace, 1),
            ('[', _) => (LBracket, 1),
            (']', _) => (RBracket, 1),
            (',', _) => (Comma, 1),
            (';', _) => (Semicolon, 1),
            (':', _) => (Colon, 1),
            ('.', _) => (Dot, 1),
            ('@', _) => (At, 1),
            ('?', _) => (Question, 1),
            _ => {
                self.errors.push(SyntaxError {
                    message: format!("unexpected character: {:?}", first),
                    line,
                    col,
                });
                return;
            }
        };
        let mut lexeme = String::new();
        lexeme.push(first);
        if len == 2 {
            lexeme.push(self.bump().unwrap());
        }
        self.push(kind, lexeme, line, col, false);
    }

    pub fn tokenize(mut self) -> (Vec<Token>, Vec<SyntaxError>) {
        loop {
            let line = self.line;
            let col = self.col;
            let c = match self.bump() {
                Some(c) => c,
                None => break,
            };
            if c.is_ascii_whitespace() {
                continue;
            }
            if c == '/' {
                match self.chars.peek() {
                    Some('/') => {
                        self.tokenize_line_comment();
                        continue;
                    }
                    Some('*') => {
                        self.bump();
                        self.tokenize_block_comment();
                        continue;
                    }
                    _ => {}
                }
            }
            if c.is_ascii_alphabetic() || c == '_' {
                self.tokenize_ident(c, line, col);
            } else if c.is_ascii_digit() {
                self.tokenize_number(c, line, col);
            } else {
                self.tokenize_operator(c, line, col);
            }
        }
        (self.tokens, self.errors)
    }
}

/// Scan a whole source string.
pub fn tokenize(code: &str) -> (Vec<Token>, Vec<SyntaxError>) {
    Tokenizer::new(code).tokenize()
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(code: &str) -> Vec<TokenKind> {
        let (tokens, errors) = tokenize(code);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors);
        tokens.into_iter().map(|x| x.kind).collect()
    }

    #[test]
    fn test_tokenize_nothing() {
        let (tokens, errors) = tokenize("");
        assert!(tokens.is_empty());
        assert!(errors.is_empty());
    }

    #[test]
    fn test_tokenize_idents_and_keywords() {
        assert_eq!(
            kinds("fn main vertex"),
            vec![TokenKind::KwFn, TokenKind::Ident, TokenKind::Ident]
        );
    }

    #[test]
    fn test_tokenize_integers() {
        let (tokens, _) = tokenize("0 42 7u 9i 1_000 0x1F 0xffu");
        assert_eq!(tokens.len(), 7);
        for token in tokens.iter() {
            assert_eq!(token.kind, TokenKind::Number);
            assert!(!token.is_float);
        }
        assert_eq!(tokens[5].lexeme, "0x1F");
        assert_eq!(tokens[6].lexeme, "0xffu");
    }

    #[test]
    fn test_tokenize_floats() {
        let (tokens, _) = tokenize("1.0 2. 3.5e2 4e-1 5f 6.25h 1e+9");
        assert_eq!(tokens.len(), 7);
        for token in tokens.iter() {
            assert_eq!(token.kind, TokenKind::Number);
            assert!(token.is_float, "expected float: {}", token.lexeme);
        }
    }

    #[test]
    fn test_int_suffix_rejected_after_fraction() {
        // `1.0i` scans as the float `1.0` followed by the identifier `i`.
        let (tokens, _) = tokenize("1.0i");
        assert_eq!(tokens.len(), 2);
        assert!(tokens[0].is_float);
        assert_eq!(tokens[1].kind, TokenKind::Ident);
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            kinds("-> ++ -- << >> <= >= == != && || += ^ ~"),
            vec![
                TokenKind::Arrow,
                TokenKind::PlusPlus,
                TokenKind::MinusMinus,
                TokenKind::Shl,
                TokenKind::Shr,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::EqEq,
                TokenKind::Ne,
                TokenKind::AmpAmp,
                TokenKind::PipePipe,
                TokenKind::PlusEq,
                TokenKind::Caret,
                TokenKind::Tilde,
            ]
        );
    }

    #[test]
    fn test_tokenize_comments() {
        let (tokens, errors) = tokenize("a // comment\nb /* block\ncomment */ c");
        assert!(errors.is_empty());
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
        assert_eq!(tokens[2].line, 3);
    }

    #[test]
    fn test_line_and_column_tracking() {
        let (tokens, _) = tokenize("a\n  bc\nd");
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].col), (2, 3));
        assert_eq!((tokens[2].line, tokens[2].col), (3, 1));
    }

    #[test]
    fn test_unexpected_character_recovers() {
        let (tokens, errors) = tokenize("a # b");
        assert_eq!(tokens.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[0].col, 3);
    }

    #[test]
    fn test_attribute_stream() {
        assert_eq!(
            kinds("@group(0) @binding(1)"),
            vec![
                TokenKind::At,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Number,
                TokenKind::RParen,
                TokenKind::At,
                TokenKind::Ident,
                TokenKind::LParen,
                TokenKind::Number,
                TokenKind::RParen,
            ]
        );
    }
}

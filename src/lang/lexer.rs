use crate::compile::location::{SourcePos, SourceRange};
use crate::lang::token::{keyword, Token, TokenKind};

/// Hand-written lexer producing position-tagged tokens.
///
/// Lines and columns are 1-based so token ranges line up with what DAP
/// clients display.
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            chars: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn ch(&self) -> char {
        self.chars.get(self.pos).copied().unwrap_or('\0')
    }

    fn peek(&self) -> char {
        self.chars.get(self.pos + 1).copied().unwrap_or('\0')
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn advance(&mut self) {
        if self.ch() == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
    }

    fn here(&self) -> SourcePos {
        SourcePos {
            line: self.line,
            col: self.col,
        }
    }

    fn skip_whitespace(&mut self) {
        while !self.at_end() && self.ch().is_ascii_whitespace() {
            self.advance();
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let start = self.here();
        if self.at_end() {
            return Token::eof(SourceRange::new(start, start));
        }

        let ch = self.ch();
        let (kind, literal) = match ch {
            '=' if self.peek() == '=' => {
                self.advance();
                self.advance();
                (TokenKind::Eq, "==".to_string())
            }
            '=' => self.single(TokenKind::Assign),
            '!' if self.peek() == '=' => {
                self.advance();
                self.advance();
                (TokenKind::NotEq, "!=".to_string())
            }
            '!' => self.single(TokenKind::Bang),
            '+' => self.single(TokenKind::Plus),
            '-' => self.single(TokenKind::Minus),
            '*' => self.single(TokenKind::Asterisk),
            '/' => self.single(TokenKind::Slash),
            '<' => self.single(TokenKind::Lt),
            '>' => self.single(TokenKind::Gt),
            ',' => self.single(TokenKind::Comma),
            ';' => self.single(TokenKind::Semicolon),
            '(' => self.single(TokenKind::Lparen),
            ')' => self.single(TokenKind::Rparen),
            '{' => self.single(TokenKind::Lbrace),
            '}' => self.single(TokenKind::Rbrace),
            '[' => self.single(TokenKind::Lbracket),
            ']' => self.single(TokenKind::Rbracket),
            '"' => self.read_string(),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let ident = self.read_while(|c| c.is_ascii_alphanumeric() || c == '_');
                (keyword(&ident).unwrap_or(TokenKind::Ident), ident)
            }
            c if c.is_ascii_digit() => {
                let digits = self.read_while(|c| c.is_ascii_digit());
                (TokenKind::Int, digits)
            }
            c => {
                self.advance();
                (TokenKind::Illegal, c.to_string())
            }
        };

        Token {
            kind,
            literal,
            range: SourceRange::new(start, self.here()),
        }
    }

    fn single(&mut self, kind: TokenKind) -> (TokenKind, String) {
        let literal = self.ch().to_string();
        self.advance();
        (kind, literal)
    }

    fn read_while(&mut self, pred: fn(char) -> bool) -> String {
        let mut out = String::new();
        while !self.at_end() && pred(self.ch()) {
            out.push(self.ch());
            self.advance();
        }
        out
    }

    fn read_string(&mut self) -> (TokenKind, String) {
        self.advance(); // opening quote
        let mut out = String::new();
        while !self.at_end() && self.ch() != '"' {
            out.push(self.ch());
            self.advance();
        }
        if self.at_end() {
            return (TokenKind::Illegal, out);
        }
        self.advance(); // closing quote
        (TokenKind::Str, out)
    }
}

use crate::compile::location::SourceRange;
use crate::lang::ast::{Block, Expression, Ident, InfixOp, PrefixOp, Program, Statement};
use crate::lang::lexer::Lexer;
use crate::lang::token::{Token, TokenKind};

/// A parse error with 1-based source coordinates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{line}:{col}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl ParseError {
    fn at(range: SourceRange, message: String) -> Self {
        ParseError {
            line: range.start.line,
            col: range.start.col,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    Lowest,
    Equals,
    LessGreater,
    Sum,
    Product,
    Prefix,
    Call,
    Index,
}

fn precedence(kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Eq | TokenKind::NotEq => Precedence::Equals,
        TokenKind::Lt | TokenKind::Gt => Precedence::LessGreater,
        TokenKind::Plus | TokenKind::Minus => Precedence::Sum,
        TokenKind::Asterisk | TokenKind::Slash => Precedence::Product,
        TokenKind::Lparen => Precedence::Call,
        TokenKind::Lbracket => Precedence::Index,
        _ => Precedence::Lowest,
    }
}

/// Recursive-descent Pratt parser.
///
/// Collects every error instead of bailing on the first one; a failed
/// statement is skipped up to the next statement boundary so later
/// diagnostics still surface.
pub struct Parser {
    lexer: Lexer,
    cur: Token,
    peek: Token,
    errors: Vec<ParseError>,
}

/// Parse a whole source file, returning the program together with all
/// collected parse errors. The program is usable only when the error list
/// is empty.
pub fn parse(source: &str) -> (Program, Vec<ParseError>) {
    let mut parser = Parser::new(source);
    let program = parser.parse_program();
    (program, parser.errors)
}

impl Parser {
    fn new(source: &str) -> Self {
        let mut lexer = Lexer::new(source);
        let cur = lexer.next_token();
        let peek = lexer.next_token();
        Parser {
            lexer,
            cur,
            peek,
            errors: Vec::new(),
        }
    }

    fn bump(&mut self) {
        self.cur = std::mem::replace(&mut self.peek, self.lexer.next_token());
    }

    fn expect_peek(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.peek.kind == kind {
            self.bump();
            Ok(())
        } else {
            Err(ParseError::at(
                self.peek.range,
                format!("expected {}, found {}", kind, self.peek.kind),
            ))
        }
    }

    fn parse_program(&mut self) -> Program {
        let mut program = Program::default();
        while self.cur.kind != TokenKind::Eof {
            match self.parse_statement() {
                Ok(stmt) => program.statements.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
            self.bump();
        }
        program
    }

    /// After an error, skip to the next statement boundary.
    fn synchronize(&mut self) {
        while self.cur.kind != TokenKind::Eof
            && self.cur.kind != TokenKind::Semicolon
            && self.peek.kind != TokenKind::Let
            && self.peek.kind != TokenKind::Return
        {
            self.bump();
        }
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        match self.cur.kind {
            TokenKind::Let => self.parse_let(),
            TokenKind::Return => self.parse_return(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let(&mut self) -> Result<Statement, ParseError> {
        let start = self.cur.range;
        self.expect_peek(TokenKind::Ident)?;
        let name = Ident {
            name: self.cur.literal.clone(),
            range: self.cur.range,
        };
        self.expect_peek(TokenKind::Assign)?;
        self.bump();
        let value = self.parse_expression(Precedence::Lowest)?;
        let mut range = SourceRange::new(start.start, value.range().end);
        if self.peek.kind == TokenKind::Semicolon {
            self.bump();
            range.end = self.cur.range.end;
        }
        Ok(Statement::Let { name, value, range })
    }

    fn parse_return(&mut self) -> Result<Statement, ParseError> {
        let start = self.cur.range;
        self.bump();
        let value = self.parse_expression(Precedence::Lowest)?;
        let mut range = SourceRange::new(start.start, value.range().end);
        if self.peek.kind == TokenKind::Semicolon {
            self.bump();
            range.end = self.cur.range.end;
        }
        Ok(Statement::Return { value, range })
    }

    fn parse_expression_statement(&mut self) -> Result<Statement, ParseError> {
        let value = self.parse_expression(Precedence::Lowest)?;
        let mut range = value.range();
        if self.peek.kind == TokenKind::Semicolon {
            self.bump();
            range.end = self.cur.range.end;
        }
        Ok(Statement::Expression { value, range })
    }

    fn parse_expression(&mut self, min: Precedence) -> Result<Expression, ParseError> {
        let mut left = self.parse_prefix()?;
        while self.peek.kind != TokenKind::Semicolon && min < precedence(self.peek.kind) {
            left = match self.peek.kind {
                TokenKind::Lparen => {
                    self.bump();
                    self.parse_call(left)?
                }
                TokenKind::Lbracket => {
                    self.bump();
                    self.parse_index(left)?
                }
                _ => {
                    self.bump();
                    self.parse_infix(left)?
                }
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Expression, ParseError> {
        match self.cur.kind {
            TokenKind::Ident => Ok(Expression::Ident(Ident {
                name: self.cur.literal.clone(),
                range: self.cur.range,
            })),
            TokenKind::Int => {
                let value = self.cur.literal.parse::<i64>().map_err(|_| {
                    ParseError::at(
                        self.cur.range,
                        format!("could not parse `{}` as an integer", self.cur.literal),
                    )
                })?;
                Ok(Expression::Integer {
                    value,
                    range: self.cur.range,
                })
            }
            TokenKind::Str => Ok(Expression::Str {
                value: self.cur.literal.clone(),
                range: self.cur.range,
            }),
            TokenKind::True | TokenKind::False => Ok(Expression::Boolean {
                value: self.cur.kind == TokenKind::True,
                range: self.cur.range,
            }),
            TokenKind::Bang | TokenKind::Minus => {
                let op = if self.cur.kind == TokenKind::Bang {
                    PrefixOp::Bang
                } else {
                    PrefixOp::Minus
                };
                let start = self.cur.range;
                self.bump();
                let right = self.parse_expression(Precedence::Prefix)?;
                let range = SourceRange::new(start.start, right.range().end);
                Ok(Expression::Prefix {
                    op,
                    right: Box::new(right),
                    range,
                })
            }
            TokenKind::Lparen => {
                self.bump();
                let expr = self.parse_expression(Precedence::Lowest)?;
                self.expect_peek(TokenKind::Rparen)?;
                Ok(expr)
            }
            TokenKind::Lbracket => self.parse_array(),
            TokenKind::If => self.parse_if(),
            TokenKind::Fn => self.parse_function(),
            kind => Err(ParseError::at(
                self.cur.range,
                format!("unexpected {kind} in expression position"),
            )),
        }
    }

    fn parse_infix(&mut self, left: Expression) -> Result<Expression, ParseError> {
        let op = match self.cur.kind {
            TokenKind::Plus => InfixOp::Add,
            TokenKind::Minus => InfixOp::Sub,
            TokenKind::Asterisk => InfixOp::Mul,
            TokenKind::Slash => InfixOp::Div,
            TokenKind::Lt => InfixOp::Lt,
            TokenKind::Gt => InfixOp::Gt,
            TokenKind::Eq => InfixOp::Eq,
            TokenKind::NotEq => InfixOp::NotEq,
            kind => {
                return Err(ParseError::at(
                    self.cur.range,
                    format!("{kind} is not an infix operator"),
                ))
            }
        };
        let prec = precedence(self.cur.kind);
        self.bump();
        let right = self.parse_expression(prec)?;
        let range = SourceRange::new(left.range().start, right.range().end);
        Ok(Expression::Infix {
            op,
            left: Box::new(left),
            right: Box::new(right),
            range,
        })
    }

    fn parse_array(&mut self) -> Result<Expression, ParseError> {
        let start = self.cur.range;
        let elements = self.parse_expression_list(TokenKind::Rbracket)?;
        Ok(Expression::Array {
            elements,
            range: SourceRange::new(start.start, self.cur.range.end),
        })
    }

    fn parse_call(&mut self, callee: Expression) -> Result<Expression, ParseError> {
        let args = self.parse_expression_list(TokenKind::Rparen)?;
        let range = SourceRange::new(callee.range().start, self.cur.range.end);
        Ok(Expression::Call {
            callee: Box::new(callee),
            args,
            range,
        })
    }

    fn parse_index(&mut self, left: Expression) -> Result<Expression, ParseError> {
        self.bump();
        let index = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::Rbracket)?;
        let range = SourceRange::new(left.range().start, self.cur.range.end);
        Ok(Expression::Index {
            left: Box::new(left),
            index: Box::new(index),
            range,
        })
    }

    /// Parses a comma-separated expression list; `cur` ends on the closer.
    fn parse_expression_list(&mut self, closer: TokenKind) -> Result<Vec<Expression>, ParseError> {
        let mut out = Vec::new();
        if self.peek.kind == closer {
            self.bump();
            return Ok(out);
        }
        self.bump();
        out.push(self.parse_expression(Precedence::Lowest)?);
        while self.peek.kind == TokenKind::Comma {
            self.bump();
            self.bump();
            out.push(self.parse_expression(Precedence::Lowest)?);
        }
        self.expect_peek(closer)?;
        Ok(out)
    }

    fn parse_if(&mut self) -> Result<Expression, ParseError> {
        let start = self.cur.range;
        self.expect_peek(TokenKind::Lparen)?;
        self.bump();
        let condition = self.parse_expression(Precedence::Lowest)?;
        self.expect_peek(TokenKind::Rparen)?;
        self.expect_peek(TokenKind::Lbrace)?;
        let consequence = self.parse_block()?;
        let alternative = if self.peek.kind == TokenKind::Else {
            self.bump();
            self.expect_peek(TokenKind::Lbrace)?;
            Some(self.parse_block()?)
        } else {
            None
        };
        let end = alternative
            .as_ref()
            .map(|b| b.range.end)
            .unwrap_or(consequence.range.end);
        Ok(Expression::If {
            condition: Box::new(condition),
            consequence,
            alternative,
            range: SourceRange::new(start.start, end),
        })
    }

    fn parse_function(&mut self) -> Result<Expression, ParseError> {
        let start = self.cur.range;
        self.expect_peek(TokenKind::Lparen)?;
        let mut params = Vec::new();
        if self.peek.kind != TokenKind::Rparen {
            self.expect_peek(TokenKind::Ident)?;
            params.push(Ident {
                name: self.cur.literal.clone(),
                range: self.cur.range,
            });
            while self.peek.kind == TokenKind::Comma {
                self.bump();
                self.expect_peek(TokenKind::Ident)?;
                params.push(Ident {
                    name: self.cur.literal.clone(),
                    range: self.cur.range,
                });
            }
        }
        self.expect_peek(TokenKind::Rparen)?;
        self.expect_peek(TokenKind::Lbrace)?;
        let body = self.parse_block()?;
        let range = SourceRange::new(start.start, body.range.end);
        Ok(Expression::Function {
            params,
            body,
            range,
        })
    }

    /// Parses `{ ... }`; `cur` is the opening brace on entry and the closing
    /// brace on exit.
    fn parse_block(&mut self) -> Result<Block, ParseError> {
        let start = self.cur.range;
        let mut statements = Vec::new();
        self.bump();
        while self.cur.kind != TokenKind::Rbrace {
            if self.cur.kind == TokenKind::Eof {
                return Err(ParseError::at(
                    self.cur.range,
                    "unclosed block, expected `}`".to_string(),
                ));
            }
            statements.push(self.parse_statement()?);
            self.bump();
        }
        Ok(Block {
            statements,
            range: SourceRange::new(start.start, self.cur.range.end),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_let_and_call() {
        let (program, errors) = parse("let add = fn(a, b) { a + b }\nlet r = add(1, 2)");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(program.statements.len(), 2);
        let Statement::Let { name, value, .. } = &program.statements[0] else {
            panic!("expected let statement");
        };
        assert_eq!(name.name, "add");
        assert!(matches!(value, Expression::Function { params, .. } if params.len() == 2));
    }

    #[test]
    fn statement_ranges_track_lines() {
        let (program, errors) = parse("\nlet x = 2\nx");
        assert!(errors.is_empty());
        assert_eq!(program.statements[0].range().start.line, 2);
        assert_eq!(program.statements[1].range().start.line, 3);
    }

    #[test]
    fn collects_multiple_errors() {
        let (_, errors) = parse("let = 1;\nlet y 2;");
        assert!(errors.len() >= 2, "expected two errors, got {errors:?}");
        assert_eq!(errors[0].line, 1);
        assert_eq!(errors[1].line, 2);
    }

    #[test]
    fn precedence_nests_products_under_sums() {
        let (program, errors) = parse("1 + 2 * 3");
        assert!(errors.is_empty());
        let Statement::Expression { value, .. } = &program.statements[0] else {
            panic!("expected expression statement");
        };
        let Expression::Infix { op, right, .. } = value else {
            panic!("expected infix");
        };
        assert_eq!(*op, InfixOp::Add);
        assert!(matches!(**right, Expression::Infix { op: InfixOp::Mul, .. }));
    }

    #[test]
    fn statements_without_separators() {
        let (program, errors) = parse("let b = square(a) * 2 return b");
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(program.statements.len(), 2);
        assert!(matches!(program.statements[1], Statement::Return { .. }));
    }
}

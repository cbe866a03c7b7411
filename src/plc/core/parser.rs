//! Recursive descent parser for the supported Structured Text subset.
//!
//! Grammar:
//! ```text
//! program      := "PROGRAM" name declBlock* statement+ "END_PROGRAM"
//! declBlock    := ("VAR" | "VAR_INPUT" | "VAR_OUTPUT") decl+ "END_VAR"
//! decl         := name ":" type [":=" literal] ";"
//! statement    := assignment | ifStmt | functionCall ";"
//! ifStmt       := "IF" expr "THEN" statement+ ("ELSIF" expr "THEN" statement+)* ("ELSE" statement+)? "END_IF" ";"
//! ```
//! Precedence (low → high): OR, AND, comparison, additive, multiplicative, unary, primary.
//!
//! A failed parse never yields a partial `Program`.

use std::collections::BTreeMap;

use log::{debug, info};
use thiserror::Error;

use super::ast::{
    ArithOp, CompareOp, DataType, ElsifClause, Expr, LogicOp, Program, Statement, UnaryOp,
    VarClass, Variable,
};
use super::lexer::{tokenize, Keyword, Pos, SpannedToken, Token};
use super::value::Value;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("{line}:{column}: unexpected character '{ch}'")]
    UnexpectedChar { ch: char, line: u32, column: u32 },

    #[error("{line}:{column}: invalid number '{text}'")]
    InvalidNumber { text: String, line: u32, column: u32 },

    #[error("{line}:{column}: invalid duration literal 'T#{text}'")]
    InvalidDuration { text: String, line: u32, column: u32 },

    #[error("{line}:{column}: expected {expected}, found {found}")]
    UnexpectedToken {
        expected: String,
        found: String,
        line: u32,
        column: u32,
    },

    #[error("{line}:{column}: duplicate variable declaration '{name}'")]
    DuplicateVariable { name: String, line: u32, column: u32 },

    #[error("{line}:{column}: nesting deeper than {limit} levels")]
    TooDeep { limit: usize, line: u32, column: u32 },
}

/// Bound on nested parentheses, unary operators, call arguments and IF blocks.
pub const MAX_NESTING: usize = 64;

pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source)?;
    let program = Parser::new(tokens).parse_program()?;
    info!(
        "[plc][parser] parsed program={} variables={} statements={}",
        program.name,
        program.variables.len(),
        program.statements.len()
    );
    Ok(program)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    // ---------------------------------------------------------------------
    // Token management
    // ---------------------------------------------------------------------

    fn current(&self) -> &SpannedToken {
        // The lexer always terminates the stream with `Eof`.
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[(self.pos + offset).min(last)].token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check_keyword(&self, keyword: Keyword) -> bool {
        matches!(self.peek(), Token::Keyword(k) if *k == keyword)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, expected: &str) -> ParseError {
        let current = self.current();
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: current.token.to_string(),
            line: current.pos.line,
            column: current.pos.column,
        }
    }

    /// Runs `parse` one nesting level deeper.
    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_NESTING {
            let pos = self.current().pos;
            return Err(ParseError::TooDeep {
                limit: MAX_NESTING,
                line: pos.line,
                column: pos.column,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(self.error(&expected.to_string()))
        }
    }

    fn expect_keyword(&mut self, keyword: Keyword) -> Result<(), ParseError> {
        if self.check_keyword(keyword) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("'{}'", keyword.as_str())))
        }
    }

    fn expect_identifier(&mut self) -> Result<(String, Pos), ParseError> {
        let pos = self.current().pos;
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok((name, pos))
            }
            _ => Err(self.error("identifier")),
        }
    }

    // ---------------------------------------------------------------------
    // Program structure
    // ---------------------------------------------------------------------

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        self.expect_keyword(Keyword::Program)?;
        let (name, _) = self.expect_identifier()?;

        let mut variables: BTreeMap<String, Variable> = BTreeMap::new();
        while let Some(class) = self.decl_block_start() {
            self.advance();
            self.parse_decl_block(class, &mut variables)?;
        }

        let statements = self.parse_block(&[Keyword::EndProgram])?;
        self.expect_keyword(Keyword::EndProgram)?;
        self.expect(Token::Eof)?;

        debug!("[plc][parser] program={name} variables={variables:?}");
        Ok(Program {
            name,
            variables,
            statements,
        })
    }

    fn decl_block_start(&self) -> Option<VarClass> {
        match self.peek() {
            Token::Keyword(Keyword::Var) => Some(VarClass::Internal),
            Token::Keyword(Keyword::VarInput) => Some(VarClass::Input),
            Token::Keyword(Keyword::VarOutput) => Some(VarClass::Output),
            _ => None,
        }
    }

    fn parse_decl_block(
        &mut self,
        class: VarClass,
        variables: &mut BTreeMap<String, Variable>,
    ) -> Result<(), ParseError> {
        // decl+
        loop {
            let (name, pos) = self.expect_identifier()?;
            self.expect(Token::Colon)?;
            let data_type = self.parse_type()?;
            let initial_value = if self.eat(&Token::Assign) {
                Some(self.parse_literal()?)
            } else {
                None
            };
            self.expect(Token::Semicolon)?;

            if variables.contains_key(&name) {
                return Err(ParseError::DuplicateVariable {
                    name,
                    line: pos.line,
                    column: pos.column,
                });
            }
            variables.insert(
                name.clone(),
                Variable {
                    name,
                    data_type,
                    initial_value,
                    class,
                },
            );

            if self.check_keyword(Keyword::EndVar) {
                self.advance();
                return Ok(());
            }
        }
    }

    fn parse_type(&mut self) -> Result<DataType, ParseError> {
        let data_type = match self.peek() {
            Token::Keyword(Keyword::Bool) => DataType::Bool,
            Token::Keyword(Keyword::Int) => DataType::Int,
            Token::Keyword(Keyword::Real) => DataType::Real,
            Token::Keyword(Keyword::Time) => DataType::Time,
            _ => return Err(self.error("type (BOOL, INT, REAL, TIME)")),
        };
        self.advance();
        Ok(data_type)
    }

    /// Declaration initialiser: number (optionally negated), TRUE/FALSE or a duration.
    fn parse_literal(&mut self) -> Result<Value, ParseError> {
        let negative = self.eat(&Token::Minus);
        let value = match self.peek() {
            Token::Number(value) => Value::Real(*value),
            Token::Duration(ms) => Value::Duration(*ms),
            Token::Keyword(Keyword::True) if !negative => Value::Bool(true),
            Token::Keyword(Keyword::False) if !negative => Value::Bool(false),
            _ => return Err(self.error("literal")),
        };
        self.advance();
        Ok(match (negative, value) {
            (true, Value::Real(value)) => Value::Real(-value),
            (true, Value::Duration(ms)) => Value::Duration(-ms),
            (_, value) => value,
        })
    }

    /// `statement+` up to (not including) one of the terminators.
    fn parse_block(&mut self, terminators: &[Keyword]) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        loop {
            let at_end = match self.peek() {
                Token::Keyword(k) => terminators.contains(k),
                Token::Eof => true,
                _ => false,
            };
            if at_end {
                break;
            }
            statements.push(self.parse_statement()?);
        }

        if statements.is_empty() {
            return Err(self.error("statement"));
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        if self.check_keyword(Keyword::If) {
            return self.nested(Self::parse_if);
        }

        let (name, _) = self.expect_identifier()?;
        match self.peek() {
            Token::Assign => {
                self.advance();
                let value = self.parse_expr()?;
                self.expect(Token::Semicolon)?;
                Ok(Statement::Assignment {
                    target: name,
                    value,
                })
            }
            Token::LParen => {
                let args = self.parse_call_args()?;
                self.expect(Token::Semicolon)?;
                Ok(Statement::Call { name, args })
            }
            _ => Err(self.error("':=' or '('")),
        }
    }

    fn parse_if(&mut self) -> Result<Statement, ParseError> {
        self.expect_keyword(Keyword::If)?;
        let condition = self.parse_expr()?;
        self.expect_keyword(Keyword::Then)?;
        let then_block = self.parse_block(&[Keyword::Elsif, Keyword::Else, Keyword::EndIf])?;

        let mut elsif_clauses = Vec::new();
        while self.check_keyword(Keyword::Elsif) {
            self.advance();
            let condition = self.parse_expr()?;
            self.expect_keyword(Keyword::Then)?;
            let block = self.parse_block(&[Keyword::Elsif, Keyword::Else, Keyword::EndIf])?;
            elsif_clauses.push(ElsifClause { condition, block });
        }

        let else_block = if self.check_keyword(Keyword::Else) {
            self.advance();
            Some(self.parse_block(&[Keyword::EndIf])?)
        } else {
            None
        };

        self.expect_keyword(Keyword::EndIf)?;
        self.expect(Token::Semicolon)?;

        Ok(Statement::If {
            condition,
            then_block,
            elsif_clauses,
            else_block,
        })
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(Token::RParen)?;
            return Ok(args);
        }
    }

    // ---------------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_and()?;
        while self.check_keyword(Keyword::Or) {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Logical {
                op: LogicOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_comparison()?;
        while self.check_keyword(Keyword::And) {
            self.advance();
            let right = self.parse_comparison()?;
            left = Expr::Logical {
                op: LogicOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Gt => CompareOp::Gt,
                Token::Lt => CompareOp::Lt,
                Token::Ge => CompareOp::Ge,
                Token::Le => CompareOp::Le,
                Token::Eq => CompareOp::Eq,
                Token::Ne => CompareOp::Ne,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Comparison {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => ArithOp::Add,
                Token::Minus => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => ArithOp::Mul,
                Token::Slash => ArithOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Token::Keyword(Keyword::Not) => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.parse_primary(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Token::Number(value) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Value::Real(value),
                })
            }
            Token::Duration(ms) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Value::Duration(ms),
                })
            }
            Token::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Value::Bool(true),
                })
            }
            Token::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Literal {
                    value: Value::Bool(false),
                })
            }
            Token::Ident(name) => {
                if self.peek_at(1) == &Token::LParen {
                    self.advance();
                    let args = self.nested(Self::parse_call_args)?;
                    return Ok(Expr::Call { name, args });
                }
                self.advance();
                Ok(Expr::Variable { name })
            }
            Token::LParen => {
                self.advance();
                let inner = self.nested(Self::parse_expr)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => Err(self.error("expression")),
        }
    }
}

// src/expression.rs
use std::fmt;

use crate::parser::{ParseError, Parser};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Expression inside `{{ ... }}`.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    /// `$`, the value under assertion
    Actual,
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `name <-`, only valid as a map key
    LeftArrow(String),
}

impl Expr {
    /// `Some("a.b.c")` for identifier chains.
    pub fn dotted_name(&self) -> Option<String> {
        match self {
            Expr::Ident(name) => Some(name.clone()),
            Expr::Member(base, name) => Some(format!("{}.{name}", base.dotted_name()?)),
            _ => None,
        }
    }
}

pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let mut p = EParser::new(input);
    let expr = p.parse_or()?;
    p.skip_ws();
    if p.parser.consume_str("<-") {
        p.skip_ws();
        if !p.eof() {
            return Err(ParseError::InvalidSyntax(
                "unexpected input after \"<-\"".into(),
            ));
        }
        let name = expr.dotted_name().ok_or_else(|| {
            ParseError::InvalidSyntax(format!("\"{expr}\" is not a function name"))
        })?;
        return Ok(Expr::LeftArrow(name));
    }
    if !p.eof() {
        return Err(ParseError::InvalidSyntax(format!(
            "unexpected {:?} in expression",
            p.parser.peek_char().unwrap_or_default()
        )));
    }
    Ok(expr)
}

struct EParser<'a> {
    parser: Parser<'a>,
}

impl<'a> EParser<'a> {
    fn new(s: &'a str) -> Self {
        Self {
            parser: Parser::new(s),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.op("||") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_equality()?;
        while self.op("&&") {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = if self.op("==") {
                BinaryOp::Eq
            } else if self.op("!=") {
                BinaryOp::Ne
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        loop {
            self.skip_ws();
            // `<-` closes a left-arrow key, it is not `< -x`
            if self.parser.peek_str("<-") {
                return Ok(lhs);
            }
            let op = if self.op("<=") {
                BinaryOp::Le
            } else if self.op(">=") {
                BinaryOp::Ge
            } else if self.op("<") {
                BinaryOp::Lt
            } else if self.op(">") {
                BinaryOp::Gt
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.op("+") {
                BinaryOp::Add
            } else if self.op("-") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.op("*") {
                BinaryOp::Mul
            } else if self.op("/") {
                BinaryOp::Div
            } else if self.op("%") {
                BinaryOp::Rem
            } else {
                return Ok(lhs);
            };
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        if self.parser.peek_str("!") && !self.parser.peek_str("!=") {
            self.parser.bump();
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.parser.consume_char('-') {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.parser.consume_char('.') {
                let name = self.parser.parse_identifier()?;
                expr = Expr::Member(Box::new(expr), name);
            } else if self.parser.consume_char('[') {
                let index = self.parse_or()?;
                self.skip_ws();
                self.parser.expect(']')?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.parser.peek_char() == Some('(') {
                let name = expr.dotted_name().ok_or_else(|| {
                    ParseError::InvalidSyntax(format!("\"{expr}\" is not callable"))
                })?;
                self.parser.bump();
                let args = self.parse_args()?;
                expr = Expr::Call(name, args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_ws();
        match self.parser.peek_char() {
            Some('(') => {
                self.parser.bump();
                let expr = self.parse_or()?;
                self.skip_ws();
                self.parser.expect(')')?;
                Ok(expr)
            }
            Some('"') | Some('\'') => Ok(Expr::Literal(Value::String(
                self.parser.parse_quoted_string()?,
            ))),
            Some('$') => {
                self.parser.bump();
                Ok(Expr::Actual)
            }
            Some(c) if c.is_ascii_digit() => Ok(Expr::Literal(self.parser.parse_number_literal()?)),
            Some(_) => {
                let name = self.parser.parse_identifier()?;
                Ok(match name.as_str() {
                    "true" => Expr::Literal(Value::Bool(true)),
                    "false" => Expr::Literal(Value::Bool(false)),
                    "null" => Expr::Literal(Value::Null),
                    _ => Expr::Ident(name),
                })
            }
            None => Err(ParseError::InvalidSyntax("expression expected".into())),
        }
    }

    /// Arguments after the opening parenthesis, through the closing one.
    fn parse_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut out = Vec::new();
        self.skip_ws();
        if self.parser.consume_char(')') {
            return Ok(out);
        }
        loop {
            out.push(self.parse_or()?);
            self.skip_ws();
            if self.parser.consume_char(',') {
                continue;
            }
            self.parser.expect(')')?;
            return Ok(out);
        }
    }

    /// Consume operator `lit` after optional whitespace.
    fn op(&mut self, lit: &str) -> bool {
        self.skip_ws();
        self.parser.consume_str(lit)
    }

    fn skip_ws(&mut self) {
        self.parser.skip_ws();
    }

    fn eof(&self) -> bool {
        self.parser.eof()
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::Ident(name) => write!(f, "{name}"),
            Expr::Actual => write!(f, "$"),
            Expr::Member(base, name) => write!(f, "{base}.{name}"),
            Expr::Index(base, idx) => write!(f, "{base}[{idx}]"),
            Expr::Call(name, args) => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::Unary(UnaryOp::Not, e) => write!(f, "!{e}"),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "-{e}"),
            Expr::Binary(op, l, r) => write!(f, "({l} {} {r})", op.symbol()),
            Expr::LeftArrow(name) => write!(f, "{name} <-"),
        }
    }
}

//! Expression tree and canonical text rendering.

use std::fmt;

use crate::error::ParseError;
use crate::value::Value;

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
}

/// Binary operators, ordered loosely by binding strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    MetaEq,
    MetaNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 2,
            BinaryOp::And => 3,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::MetaEq | BinaryOp::MetaNe => 4,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 5,
            BinaryOp::Add | BinaryOp::Sub => 6,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 7,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::MetaEq => "=?=",
            BinaryOp::MetaNe => "=!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

const TERNARY_PRECEDENCE: u8 = 1;
const UNARY_PRECEDENCE: u8 = 8;
const PRIMARY_PRECEDENCE: u8 = 9;

/// An attribute expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Attribute reference, possibly scoped (`MY.Foo`, `TARGET.Bar`).
    Attr(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Parse expression text.
    pub fn parse(text: &str) -> Result<Expr, ParseError> {
        crate::parser::parse(text)
    }

    pub fn literal(value: impl Into<Value>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn attr(name: impl Into<String>) -> Expr {
        Expr::Attr(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// The literal value, if this expression is a plain literal.
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Expr::Literal(v) => Some(v),
            _ => None,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Literal(Value::Int(i)) if *i < 0 => UNARY_PRECEDENCE,
            Expr::Literal(Value::Real(r)) if *r < 0.0 => UNARY_PRECEDENCE,
            Expr::Literal(_) | Expr::Attr(_) => PRIMARY_PRECEDENCE,
            Expr::Unary(..) => UNARY_PRECEDENCE,
            Expr::Binary(op, ..) => op.precedence(),
            Expr::Cond(..) => TERNARY_PRECEDENCE,
        }
    }

    fn fmt_prec(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        let wrap = self.precedence() < min;
        if wrap {
            f.write_str("(")?;
        }
        match self {
            Expr::Literal(v) => write!(f, "{}", v)?,
            Expr::Attr(name) => f.write_str(name)?,
            Expr::Unary(op, operand) => {
                f.write_str(match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                })?;
                let min = match op {
                    UnaryOp::Not => UNARY_PRECEDENCE,
                    UnaryOp::Neg | UnaryOp::Plus => PRIMARY_PRECEDENCE,
                };
                operand.fmt_prec(f, min)?;
            }
            Expr::Binary(op, lhs, rhs) => {
                let prec = op.precedence();
                lhs.fmt_prec(f, prec)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_prec(f, prec + 1)?;
            }
            Expr::Cond(cond, then, otherwise) => {
                cond.fmt_prec(f, TERNARY_PRECEDENCE + 1)?;
                f.write_str(" ? ")?;
                then.fmt_prec(f, TERNARY_PRECEDENCE)?;
                f.write_str(" : ")?;
                otherwise.fmt_prec(f, TERNARY_PRECEDENCE)?;
            }
        }
        if wrap {
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_prec(f, 0)
    }
}

impl From<Value> for Expr {
    fn from(v: Value) -> Self {
        Expr::Literal(v)
    }
}

//! Expression lexer and precedence-climbing parser.

use crate::error::ParseError;
use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Real(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

/// Punctuation, longest first so that prefixes never shadow longer operators.
const PUNCTUATION: &[&str] = &[
    "=?=", "=!=", "||", "&&", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!",
    "(", ")", "?", ":",
];

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    fn next_token(&mut self) -> Result<(usize, Token), ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let rest = self.rest();
        let Some(ch) = rest.chars().next() else {
            return Ok((start, Token::Eof));
        };

        if ch.is_ascii_digit() || (ch == '.' && rest[1..].starts_with(|c: char| c.is_ascii_digit())) {
            return self.lex_number(start).map(|t| (start, t));
        }
        if ch == '"' {
            return self.lex_string(start).map(|t| (start, t));
        }
        if ch.is_ascii_alphabetic() || ch == '_' {
            let len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '.'))
                .unwrap_or(rest.len());
            self.pos += len;
            return Ok((start, Token::Ident(rest[..len].to_string())));
        }
        for punct in PUNCTUATION {
            if rest.starts_with(punct) {
                self.pos += punct.len();
                return Ok((start, Token::Punct(*punct)));
            }
        }
        Err(ParseError::new(start, format!("unexpected character '{}'", ch)))
    }

    fn lex_number(&mut self, start: usize) -> Result<Token, ParseError> {
        let src = self.src;
        let bytes = src.as_bytes();
        let mut end = self.pos;
        let mut is_real = false;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end < bytes.len() && bytes[end] == b'.' {
            is_real = true;
            end += 1;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
        }
        if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
            let mut exp_end = end + 1;
            if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
                exp_end += 1;
            }
            if exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
                is_real = true;
                end = exp_end;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
            }
        }
        let text = &src[self.pos..end];
        self.pos = end;
        if is_real {
            text.parse::<f64>()
                .map(Token::Real)
                .map_err(|_| ParseError::new(start, format!("invalid real literal '{}'", text)))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| ParseError::new(start, format!("integer literal '{}' out of range", text)))
        }
    }

    fn lex_string(&mut self, start: usize) -> Result<Token, ParseError> {
        let src = self.src;
        let mut out = String::new();
        let mut chars = src[self.pos + 1..].char_indices();
        while let Some((i, ch)) = chars.next() {
            match ch {
                '"' => {
                    self.pos += 1 + i + 1;
                    return Ok(Token::Str(out));
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    Some((_, other)) => out.push(other),
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(ParseError::new(start, "unterminated string literal"))
    }
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    current_pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(src);
        let (current_pos, current) = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            current_pos,
        })
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let (pos, next) = self.lexer.next_token()?;
        self.current_pos = pos;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn eat(&mut self, punct: &str) -> Result<bool, ParseError> {
        if matches!(self.current, Token::Punct(p) if p == punct) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), ParseError> {
        if self.eat(punct)? {
            Ok(())
        } else {
            Err(ParseError::new(
                self.current_pos,
                format!("expected '{}'", punct),
            ))
        }
    }

    fn peek_binary(&self) -> Option<BinaryOp> {
        match &self.current {
            Token::Punct(p) => Some(match *p {
                "||" => BinaryOp::Or,
                "&&" => BinaryOp::And,
                "==" => BinaryOp::Eq,
                "!=" => BinaryOp::Ne,
                "=?=" => BinaryOp::MetaEq,
                "=!=" => BinaryOp::MetaNe,
                "<" => BinaryOp::Lt,
                "<=" => BinaryOp::Le,
                ">" => BinaryOp::Gt,
                ">=" => BinaryOp::Ge,
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                "*" => BinaryOp::Mul,
                "/" => BinaryOp::Div,
                "%" => BinaryOp::Mod,
                _ => return None,
            }),
            Token::Ident(word) if word.eq_ignore_ascii_case("is") => Some(BinaryOp::MetaEq),
            Token::Ident(word) if word.eq_ignore_ascii_case("isnt") => Some(BinaryOp::MetaNe),
            _ => None,
        }
    }

    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_binary(2)?;
        if self.eat("?")? {
            let then = self.parse_ternary()?;
            self.expect(":")?;
            let otherwise = self.parse_ternary()?;
            return Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)));
        }
        Ok(cond)
    }

    fn parse_binary(&mut self, min: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.peek_binary() {
            let prec = op.precedence();
            if prec < min {
                break;
            }
            self.advance()?;
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat("!")? {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        if self.eat("-")? {
            let operand = self.parse_unary()?;
            return Ok(match operand {
                Expr::Literal(Value::Int(i)) => Expr::Literal(Value::Int(-i)),
                Expr::Literal(Value::Real(r)) => Expr::Literal(Value::Real(-r)),
                other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
            });
        }
        if self.eat("+")? {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Plus, Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let pos = self.current_pos;
        match self.advance()? {
            Token::Int(i) => Ok(Expr::Literal(Value::Int(i))),
            Token::Real(r) => Ok(Expr::Literal(Value::Real(r))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Ident(word) => Ok(match word.to_ascii_lowercase().as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "undefined" => Expr::Literal(Value::Undefined),
                "error" => Expr::Literal(Value::Error),
                _ => Expr::Attr(word),
            }),
            Token::Punct("(") => {
                let inner = self.parse_ternary()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct(p) => Err(ParseError::new(pos, format!("unexpected '{}'", p))),
            Token::Eof => Err(ParseError::new(pos, "unexpected end of expression")),
        }
    }
}

/// Parse a complete expression; trailing text is an error.
pub(crate) fn parse(text: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(text)?;
    let expr = parser.parse_ternary()?;
    if parser.current != Token::Eof {
        return Err(ParseError::new(parser.current_pos, "unexpected trailing text"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literals() {
        assert_eq!(parse("42").unwrap(), Expr::literal(42i64));
        assert_eq!(parse("2.5").unwrap(), Expr::literal(2.5));
        assert_eq!(parse("1e3").unwrap(), Expr::literal(1000.0));
        assert_eq!(parse("\"a\\\"b\"").unwrap(), Expr::literal("a\"b"));
        assert_eq!(parse("TRUE").unwrap(), Expr::literal(true));
        assert_eq!(parse("-7").unwrap(), Expr::literal(-7i64));
    }

    #[test]
    fn test_precedence() {
        let e = parse("a || b && c").unwrap();
        assert_eq!(
            e,
            Expr::binary(
                BinaryOp::Or,
                Expr::attr("a"),
                Expr::binary(BinaryOp::And, Expr::attr("b"), Expr::attr("c"))
            )
        );
    }

    #[test]
    fn test_left_associative() {
        let e = parse("10 - 4 - 3").unwrap();
        assert_eq!(
            e,
            Expr::binary(
                BinaryOp::Sub,
                Expr::binary(BinaryOp::Sub, Expr::literal(10i64), Expr::literal(4i64)),
                Expr::literal(3i64)
            )
        );
    }

    #[test]
    fn test_scoped_attribute() {
        assert_eq!(parse("MY.RequestCpus").unwrap(), Expr::attr("MY.RequestCpus"));
    }

    #[test]
    fn test_is_keyword() {
        let e = parse("x is undefined").unwrap();
        assert_eq!(
            e,
            Expr::binary(BinaryOp::MetaEq, Expr::attr("x"), Expr::Literal(Value::Undefined))
        );
    }

    #[test]
    fn test_errors() {
        assert!(parse("").is_err());
        assert!(parse("(1 + 2").is_err());
        assert!(parse("\"open").is_err());
        assert!(parse("1 2").is_err());
        assert!(parse("a ? b").is_err());
        let err = parse("1 + $").unwrap_err();
        assert_eq!(err.offset, 4);
    }
}

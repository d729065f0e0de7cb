//! Tokenizer and recursive-descent parser for condition expressions.
//!
//! Grammar (precedence low to high):
//!
//! ```text
//! expr       := or
//! or         := and ( '||' and )*
//! and        := unary ( '&&' unary )*
//! unary      := '!' unary | '(' expr ')' | comparison
//! comparison := operand ( cmp_op operand )?
//! operand    := number | string | 'true' | 'false'
//!             | 'tier' '(' ident ')' | 'flags' '.' ident
//!             | 'time_of_day' | 'intimacy' | 'input' | ident
//! cmp_op     := '==' | '!=' | '>=' | '<=' | '>' | '<'
//! ```

use crate::error::DomainError;

use super::{CmpOp, Expr, Operand};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Text(String),
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Dot,
    Cmp(CmpOp),
}

fn tokenize(source: &str) -> Result<Vec<Token>, DomainError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(DomainError::parse("expected '&&'"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(DomainError::parse("expected '||'"));
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err(DomainError::parse("expected '==' (assignment is not allowed)"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Ne));
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Gt));
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Cmp(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Cmp(CmpOp::Lt));
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(DomainError::parse("unterminated string literal"));
                }
                tokens.push(Token::Text(chars[start..end].iter().collect()));
                i = end + 1;
            }
            '-' | '0'..='9' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| DomainError::parse(format!("invalid number '{}'", text)))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(DomainError::parse(format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, context: &str) -> Result<(), DomainError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(DomainError::parse(format!(
                "expected {:?} {} but found {:?}",
                expected, context, other
            ))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, DomainError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, DomainError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, DomainError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, DomainError> {
        match self.peek() {
            Some(Token::Bang) => {
                self.next();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Token::LParen) => {
                self.next();
                let inner = self.parse_expr()?;
                self.expect(Token::RParen, "to close group")?;
                Ok(inner)
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, DomainError> {
        let lhs = self.parse_operand()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.next();
            let rhs = self.parse_operand()?;
            Ok(Expr::Compare { lhs, op, rhs })
        } else {
            Ok(Expr::Test(lhs))
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, DomainError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Operand::Number(n)),
            Some(Token::Text(s)) => Ok(Operand::Literal(s)),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Operand::Bool(true)),
                "false" => Ok(Operand::Bool(false)),
                "time_of_day" => Ok(Operand::TimeOfDay),
                "intimacy" => Ok(Operand::Intimacy),
                "input" => Ok(Operand::PlayerInput),
                "tier" => {
                    self.expect(Token::LParen, "after 'tier'")?;
                    let metric = match self.next() {
                        Some(Token::Ident(metric)) => metric,
                        other => {
                            return Err(DomainError::parse(format!(
                                "expected metric name inside tier(...) but found {:?}",
                                other
                            )))
                        }
                    };
                    self.expect(Token::RParen, "to close tier(...)")?;
                    Ok(Operand::Tier(metric))
                }
                "flags" => {
                    self.expect(Token::Dot, "after 'flags'")?;
                    match self.next() {
                        Some(Token::Ident(flag)) => Ok(Operand::Flag(flag)),
                        other => Err(DomainError::parse(format!(
                            "expected flag name after 'flags.' but found {:?}",
                            other
                        ))),
                    }
                }
                _ => Ok(Operand::Metric(name)),
            },
            other => Err(DomainError::parse(format!(
                "expected an operand but found {:?}",
                other
            ))),
        }
    }
}

/// Parse a condition source string into its AST.
pub fn parse(source: &str) -> Result<Expr, DomainError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(DomainError::parse("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(DomainError::parse(format!(
            "trailing tokens after expression: {:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(expr)
}

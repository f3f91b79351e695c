//! Arithmetic evaluator for the `calculate` tool.
//!
//! Grammar (nothing else is accepted: no names, no calls, no attribute access):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := NUMBER | '(' expr ')'
//! ```
//!
//! Power binds tighter than unary minus and is right-associative, so `-2^2 = -4`
//! and `2^3^2 = 512`.

use crate::error::{ToolError, ToolResult};

const MAX_EXPRESSION_LEN: usize = 256;
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Pow,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> ToolResult<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Pow);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ToolError::Calculation(format!("invalid number '{literal}'")))?;
                tokens.push(Token::Num(value));
            }
            other => {
                return Err(ToolError::Calculation(format!("unsupported character '{other}'")));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn enter(&mut self) -> ToolResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ToolError::Calculation("expression nested too deeply".into()));
        }
        Ok(())
    }

    fn expr(&mut self) -> ToolResult<f64> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> ToolResult<f64> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = if op == Token::Star {
                value * rhs
            } else {
                if rhs == 0.0 {
                    return Err(ToolError::Calculation("division by zero".into()));
                }
                value / rhs
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> ToolResult<f64> {
        self.enter()?;
        let value = match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                -self.unary()?
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()?
            }
            _ => self.power()?,
        };
        self.depth -= 1;
        Ok(value)
    }

    fn power(&mut self) -> ToolResult<f64> {
        let base = self.primary()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> ToolResult<f64> {
        match self.bump() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                self.enter()?;
                let value = self.expr()?;
                if self.bump() != Some(Token::RParen) {
                    return Err(ToolError::Calculation("missing closing parenthesis".into()));
                }
                self.depth -= 1;
                Ok(value)
            }
            Some(t) => Err(ToolError::Calculation(format!("unexpected token {t:?}"))),
            None => Err(ToolError::Calculation("unexpected end of expression".into())),
        }
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> ToolResult<f64> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(ToolError::InvalidArguments("empty expression".into()));
    }
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(ToolError::InvalidArguments("expression too long".into()));
    }
    let mut parser = Parser {
        tokens: tokenize(expression)?,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(ToolError::Calculation("trailing input after expression".into()));
    }
    if !value.is_finite() {
        return Err(ToolError::Calculation("result is not a finite number".into()));
    }
    Ok(value)
}

/// Render a result the way it should be read aloud: integers without decimals.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let s = format!("{value:.10}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(s: &str) -> f64 {
        evaluate(s).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("10 / 4"), 2.5);
        assert_eq!(eval("7 - 2 - 1"), 4.0);
    }

    #[test]
    fn test_power_and_unary() {
        assert_eq!(eval("2^10"), 1024.0);
        assert_eq!(eval("2**3**2"), 512.0);
        assert_eq!(eval("-2^2"), -4.0);
        assert_eq!(eval("2^-1"), 0.5);
        assert_eq!(eval("--3"), 3.0);
    }

    #[test]
    fn test_rejects_anything_but_arithmetic() {
        assert!(evaluate("__import__('os')").is_err());
        assert!(evaluate("abs(3)").is_err());
        assert!(evaluate("2 + ").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 2").is_err());
        assert!(evaluate("").is_err());
    }

    #[test]
    fn test_division_by_zero() {
        assert!(matches!(evaluate("1/0"), Err(ToolError::Calculation(_))));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let expr = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert!(evaluate(&expr).is_err());
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(42.0), "42");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(1.0 / 3.0), "0.3333333333");
    }
}

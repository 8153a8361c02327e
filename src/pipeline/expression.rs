//! Expression grammar for `derive-column`
//!
//! ```text
//! expr  := term (('+' | '-' | '&') term)*
//! term  := unary (('*' | '/') unary)*
//! unary := '-' unary | atom
//! atom  := number | 'text' | "text" | identifier | [column name] | '(' expr ')'
//! ```
//!
//! `&` concatenates rendered values; the arithmetic operators work on decimals.
//! Nothing else is evaluable, which keeps every derived column a pure function
//! of the row it is computed from.

use bigdecimal::BigDecimal;
use std::str::FromStr;

use crate::table::Table;
use crate::types::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(BigDecimal),
    Text(String),
    Column(String),
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(String),
    Text(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Amp,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' | '-' | '*' | '/' | '&' | '(' | ')' => {
                chars.next();
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '&' => Token::Amp,
                    '(' => Token::LParen,
                    _ => Token::RParen,
                });
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(q) if q == c => break,
                        Some(other) => text.push(other),
                        None => return Err(format!("unterminated string literal '{}'", text)),
                    }
                }
                tokens.push(Token::Text(text));
            }
            '[' => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(other) => name.push(other),
                        None => return Err(format!("unterminated column reference '[{}'", name)),
                    }
                }
                if name.trim().is_empty() {
                    return Err("empty column reference '[]'".to_string());
                }
                tokens.push(Token::Ident(name));
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(literal));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(name));
            }
            other => return Err(format!("unexpected character '{}'", other)),
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
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Expr, String> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Subtract,
                Some(Token::Amp) => BinaryOp::Concat,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.term()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Multiply,
                Some(Token::Slash) => BinaryOp::Divide,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Minus) {
            self.pos += 1;
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(literal)) => BigDecimal::from_str(&literal)
                .map(Expr::Number)
                .map_err(|_| format!("invalid number literal '{}'", literal)),
            Some(Token::Text(text)) => Ok(Expr::Text(text)),
            Some(Token::Ident(name)) => Ok(Expr::Column(name)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Parse an expression, rejecting anything outside the grammar
pub fn parse(source: &str) -> Result<Expr, String> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err("expression cannot be empty".to_string());
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(format!("unexpected trailing token {:?}", extra));
    }
    Ok(expr)
}

impl Expr {
    /// Column names referenced anywhere in the expression, in first-use order
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Column(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Negate(inner) => inner.collect_columns(out),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Number(_) | Expr::Text(_) => {}
        }
    }

    /// Evaluate against one row of `table`
    pub fn evaluate(&self, table: &Table, row: usize) -> StepResult<Value> {
        match self {
            Expr::Number(n) => Ok(Value::Number(n.clone())),
            Expr::Text(s) => Ok(Value::Text(s.clone())),
            Expr::Column(name) => Ok(table.value(row, name).cloned().unwrap_or(Value::Null)),
            Expr::Negate(inner) => {
                let value = inner.evaluate(table, row)?;
                if value.is_null() {
                    return Ok(Value::Null);
                }
                Ok(Value::Number(-numeric(&value, row)?))
            }
            Expr::Binary { op, left, right } => {
                let l = left.evaluate(table, row)?;
                let r = right.evaluate(table, row)?;

                match op {
                    BinaryOp::Concat => Ok(Value::Text(format!("{}{}", l.render(), r.render()))),
                    _ if l.is_null() || r.is_null() => Ok(Value::Null),
                    BinaryOp::Add => Ok(Value::Number(&numeric(&l, row)? + &numeric(&r, row)?)),
                    BinaryOp::Subtract => {
                        Ok(Value::Number(&numeric(&l, row)? - &numeric(&r, row)?))
                    }
                    BinaryOp::Multiply => {
                        Ok(Value::Number(&numeric(&l, row)? * &numeric(&r, row)?))
                    }
                    BinaryOp::Divide => {
                        let a = numeric(&l, row)?;
                        let b = numeric(&r, row)?;
                        if b == BigDecimal::from(0) {
                            return Err(StepError::Execution(format!(
                                "row {}: division by zero",
                                row
                            )));
                        }
                        Ok(Value::Number(&a / &b))
                    }
                }
            }
        }
    }
}

fn numeric(value: &Value, row: usize) -> StepResult<BigDecimal> {
    value.to_number().ok_or_else(|| {
        StepError::Type(format!(
            "row {}: cannot use {} value '{}' in arithmetic",
            row,
            value.type_name(),
            value
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::new(
            vec!["gross".to_string(), "fee".to_string(), "Ref No".to_string()],
            vec![
                vec![Value::number("127.50"), Value::number("3.18"), Value::text("A1")],
                vec![Value::text("oops"), Value::Null, Value::Null],
            ],
        )
        .unwrap()
    }

    fn dec(s: &str) -> Value {
        Value::number(s)
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(expr.evaluate(&table(), 0).unwrap(), dec("7"));
        let expr = parse("(1 + 2) * 3").unwrap();
        assert_eq!(expr.evaluate(&table(), 0).unwrap(), dec("9"));
        let expr = parse("-gross + 1").unwrap();
        assert_eq!(expr.evaluate(&table(), 0).unwrap(), dec("-126.5"));
    }

    #[test]
    fn test_column_arithmetic() {
        let expr = parse("gross - fee").unwrap();
        assert_eq!(expr.columns(), vec!["gross", "fee"]);
        assert_eq!(expr.evaluate(&table(), 0).unwrap(), dec("124.32"));
    }

    #[test]
    fn test_concat_and_bracketed_names() {
        let expr = parse("[Ref No] & '-' & gross").unwrap();
        assert_eq!(expr.columns(), vec!["Ref No", "gross"]);
        assert_eq!(expr.evaluate(&table(), 0).unwrap(), Value::text("A1-127.5"));
        assert_eq!(expr.evaluate(&table(), 1).unwrap(), Value::text("-oops"));
    }

    #[test]
    fn test_null_propagates_through_arithmetic() {
        let expr = parse("fee * 2").unwrap();
        assert_eq!(expr.evaluate(&table(), 1).unwrap(), Value::Null);
    }

    #[test]
    fn test_text_in_arithmetic_is_type_error() {
        let expr = parse("gross + 1").unwrap();
        assert!(matches!(expr.evaluate(&table(), 1), Err(StepError::Type(_))));
    }

    #[test]
    fn test_division_by_zero() {
        let expr = parse("gross / 0").unwrap();
        assert!(matches!(
            expr.evaluate(&table(), 0),
            Err(StepError::Execution(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("gross +").is_err());
        assert!(parse("(gross").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("gross fee").is_err());
        assert!(parse("gross % 2").is_err());
        assert!(parse("1.2.3").is_err());
    }
}

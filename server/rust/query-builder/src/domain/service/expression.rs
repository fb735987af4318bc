//! 計算フィールド用の算術式評価器。
//!
//! 行の値 (alias -> JSON 値) を変数として参照できる。任意コードは実行しない。
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('-' | '+') unary | primary
//! primary := NUMBER | IDENT | IDENT '(' expr (',' expr)* ')' | '(' expr ')'
//! ```

use serde_json::Value;

use crate::domain::repository::Row;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),
    #[error("invalid number literal: {0}")]
    InvalidNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),
    #[error("value of '{0}' is not numeric")]
    NonNumeric(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("wrong number of arguments for {0}")]
    ArgumentCount(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Ident(s) => s.clone(),
            Token::Plus => "+".to_string(),
            Token::Minus => "-".to_string(),
            Token::Star => "*".to_string(),
            Token::Slash => "/".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Comma => ",".to_string(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
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
            ',' => {
                tokens.push(Token::Comma);
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
                    .map_err(|_| ExpressionError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(ExpressionError::UnexpectedChar(other, i)),
        }
    }
    Ok(tokens)
}

struct Evaluator<'a> {
    tokens: Vec<Token>,
    pos: usize,
    row: &'a Row,
}

impl Evaluator<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            Some(t) => Err(ExpressionError::UnexpectedToken(t.describe())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn expr(&mut self) -> Result<f64, ExpressionError> {
        let mut acc = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.pos += 1;
                    acc += self.term()?;
                }
                Some(Token::Minus) => {
                    self.pos += 1;
                    acc -= self.term()?;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn term(&mut self) -> Result<f64, ExpressionError> {
        let mut acc = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    acc *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    acc /= divisor;
                }
                _ => return Ok(acc),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, ExpressionError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.pos += 1;
                    let args = self.arguments()?;
                    call_function(&name, &args)
                } else {
                    self.lookup(&name)
                }
            }
            Some(t) => Err(ExpressionError::UnexpectedToken(t.describe())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn arguments(&mut self) -> Result<Vec<f64>, ExpressionError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(t) => return Err(ExpressionError::UnexpectedToken(t.describe())),
                None => return Err(ExpressionError::UnexpectedEnd),
            }
        }
    }

    fn lookup(&self, name: &str) -> Result<f64, ExpressionError> {
        match self.row.get(name) {
            None => Err(ExpressionError::UnknownIdentifier(name.to_string())),
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| ExpressionError::NonNumeric(name.to_string())),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| ExpressionError::NonNumeric(name.to_string())),
            Some(_) => Err(ExpressionError::NonNumeric(name.to_string())),
        }
    }
}

fn call_function(name: &str, args: &[f64]) -> Result<f64, ExpressionError> {
    let arity_error = || ExpressionError::ArgumentCount(name.to_string());
    match name.to_ascii_lowercase().as_str() {
        "abs" => match args {
            [x] => Ok(x.abs()),
            _ => Err(arity_error()),
        },
        "floor" => match args {
            [x] => Ok(x.floor()),
            _ => Err(arity_error()),
        },
        "ceil" => match args {
            [x] => Ok(x.ceil()),
            _ => Err(arity_error()),
        },
        "round" => match args {
            [x] => Ok(x.round()),
            [x, digits] => {
                let factor = 10f64.powi(digits.trunc().clamp(0.0, 15.0) as i32);
                Ok((x * factor).round() / factor)
            }
            _ => Err(arity_error()),
        },
        "min" => args
            .iter()
            .copied()
            .reduce(f64::min)
            .ok_or_else(arity_error),
        "max" => args
            .iter()
            .copied()
            .reduce(f64::max)
            .ok_or_else(arity_error),
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}

/// 式を行の値に対して評価する。
pub fn evaluate(expression: &str, row: &Row) -> Result<f64, ExpressionError> {
    let tokens = tokenize(expression)?;
    let mut evaluator = Evaluator {
        tokens,
        pos: 0,
        row,
    };
    let value = evaluator.expr()?;
    if let Some(t) = evaluator.peek() {
        return Err(ExpressionError::UnexpectedToken(t.describe()));
    }
    if !value.is_finite() {
        return Err(ExpressionError::NonFinite);
    }
    Ok(value)
}

/// 評価結果を JSON 値に変換する。評価に失敗した場合は null。
pub fn evaluate_to_json(expression: &str, row: &Row) -> Value {
    evaluate(expression, row)
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("row must be an object"),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        let r = row(json!({}));
        assert_eq!(evaluate("1 + 2 * 3", &r).unwrap(), 7.0);
        assert_eq!(evaluate("(1 + 2) * 3", &r).unwrap(), 9.0);
        assert_eq!(evaluate("-4 + 10 / 4", &r).unwrap(), -1.5);
        assert_eq!(evaluate("2 - -3", &r).unwrap(), 5.0);
    }

    #[test]
    fn test_identifiers_from_row() {
        let r = row(json!({"total": 250, "qty": "4", "unit_price": 12.5}));
        assert_eq!(evaluate("total * 0.2", &r).unwrap(), 50.0);
        assert_eq!(evaluate("qty * unit_price", &r).unwrap(), 50.0);
    }

    #[test]
    fn test_functions() {
        let r = row(json!({"a": -3.7, "b": 2}));
        assert_eq!(evaluate("abs(a)", &r).unwrap(), 3.7);
        assert_eq!(evaluate("floor(a)", &r).unwrap(), -4.0);
        assert_eq!(evaluate("ceil(a)", &r).unwrap(), -3.0);
        assert_eq!(evaluate("round(a)", &r).unwrap(), -4.0);
        assert_eq!(evaluate("round(10 / 3, 2)", &r).unwrap(), 3.33);
        assert_eq!(evaluate("min(a, b, 0)", &r).unwrap(), -3.7);
        assert_eq!(evaluate("MAX(a, b)", &r).unwrap(), 2.0);
    }

    #[test]
    fn test_errors() {
        let r = row(json!({"name": "steel", "flag": true, "empty": null}));
        assert_eq!(
            evaluate("missing + 1", &r),
            Err(ExpressionError::UnknownIdentifier("missing".to_string()))
        );
        assert_eq!(
            evaluate("name * 2", &r),
            Err(ExpressionError::NonNumeric("name".to_string()))
        );
        assert!(evaluate("flag + 1", &r).is_err());
        assert!(evaluate("empty + 1", &r).is_err());
        assert_eq!(evaluate("1 / 0", &r), Err(ExpressionError::DivisionByZero));
        assert_eq!(
            evaluate("sqrt(4)", &r),
            Err(ExpressionError::UnknownFunction("sqrt".to_string()))
        );
        assert_eq!(
            evaluate("abs(1, 2)", &r),
            Err(ExpressionError::ArgumentCount("abs".to_string()))
        );
        assert!(evaluate("max()", &r).is_err());
        assert!(evaluate("1 +", &r).is_err());
        assert!(evaluate("(1 + 2", &r).is_err());
        assert!(evaluate("1 2", &r).is_err());
        assert!(evaluate("1.2.3", &r).is_err());
        assert!(evaluate("'abc'", &r).is_err());
        assert!(evaluate("", &r).is_err());
    }

    #[test]
    fn test_evaluate_to_json() {
        let r = row(json!({"total": 250}));
        assert_eq!(evaluate_to_json("total * 0.2", &r), json!(50.0));
        assert_eq!(evaluate_to_json("total / 0", &r), Value::Null);
        assert_eq!(evaluate_to_json("unknown", &r), Value::Null);
    }
}

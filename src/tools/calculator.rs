//! Arithmetic evaluation tool.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::Tool;

/// Evaluates `+ - * /` expressions with parentheses and unary minus.
pub struct Calculator;

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Calculate the value of an arithmetic expression with + - * / and parentheses, e.g. '6*7'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The arithmetic expression to evaluate"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, inputs: Value) -> anyhow::Result<Value> {
        let expression = match &inputs["expression"] {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => anyhow::bail!("Missing 'expression' argument"),
        };

        let value = evaluate(&expression)?;
        Ok(json!({ "result": number_value(value) }))
    }
}

/// Integral results are reported as integers so `6*7` yields `42`, not `42.0`.
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

fn evaluate(expression: &str) -> anyhow::Result<f64> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        anyhow::bail!("Unexpected trailing input in expression '{}'", expression);
    }
    if !value.is_finite() {
        anyhow::bail!("Expression '{}' does not have a finite value", expression);
    }
    Ok(value)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Op(char),
    Open,
    Close,
}

fn tokenize(expression: &str) -> anyhow::Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = expression.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = literal
                    .parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("Invalid number '{}'", literal))?;
                tokens.push(Token::Num(n));
            }
            '+' | '-' | '*' | '/' | 'x' | '×' => {
                let op = if matches!(c, 'x' | '×') { '*' } else { c };
                tokens.push(Token::Op(op));
                chars.next();
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            other => anyhow::bail!("Unexpected character '{}' in expression", other),
        }
    }
    Ok(tokens)
}

/// Deepest allowed nesting of parentheses and unary minus.
const MAX_NESTING: usize = 256;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Current `factor` recursion depth
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn expr(&mut self) -> anyhow::Result<f64> {
        let mut value = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> anyhow::Result<f64> {
        let mut value = self.factor()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            self.pos += 1;
            let rhs = self.factor()?;
            if op == '/' && rhs == 0.0 {
                anyhow::bail!("Division by zero");
            }
            value = if op == '*' { value * rhs } else { value / rhs };
        }
        Ok(value)
    }

    fn factor(&mut self) -> anyhow::Result<f64> {
        if self.depth >= MAX_NESTING {
            anyhow::bail!("Expression nested too deeply (limit {})", MAX_NESTING);
        }
        self.depth += 1;
        let value = self.primary();
        self.depth -= 1;
        value
    }

    fn primary(&mut self) -> anyhow::Result<f64> {
        match self.peek() {
            Some(Token::Num(n)) => {
                self.pos += 1;
                Ok(n)
            }
            Some(Token::Op('-')) => {
                self.pos += 1;
                Ok(-self.factor()?)
            }
            Some(Token::Open) => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(Token::Close) {
                    anyhow::bail!("Missing closing parenthesis");
                }
                self.pos += 1;
                Ok(value)
            }
            _ => anyhow::bail!("Expected a number or '('"),
        }
    }
}

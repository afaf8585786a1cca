use async_trait::async_trait;

use supervisor_core::tools::{Tool, ToolContext, ToolError, ToolResult};

const MAX_EXPRESSION_BYTES: usize = 1024;
const MAX_DEPTH: usize = 64;

/// Evaluates arithmetic expressions.
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses, \
         sqrt, abs, ln, sin, cos and the constants pi and e."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["expression"],
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. \"2 * (3 + 4)\""
                }
            }
        })
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let expression = args["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("expression is required".into()))?;

        match evaluate(expression) {
            Ok(value) => Ok(ToolResult::ok(format_number(value))),
            Err(e) => Ok(ToolResult::error(format!("Cannot evaluate expression: {e}"))),
        }
    }
}

/// Evaluate `input` to a finite number.
pub fn evaluate(input: &str) -> Result<f64, String> {
    if input.len() > MAX_EXPRESSION_BYTES {
        return Err(format!(
            "expression longer than {MAX_EXPRESSION_BYTES} bytes"
        ));
    }
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected {token:?}"));
    }
    if !value.is_finite() {
        return Err("result is not a finite number".into());
    }
    Ok(value)
}

/// Integers print without a fractional part.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

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
                    .map_err(|_| format!("bad number {literal:?}"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident.to_ascii_lowercase()));
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }

    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    Ok(tokens)
}

// expr  := term (('+' | '-') term)*
// term  := unary (('*' | '/' | '%') unary)*
// unary := ('-' | '+') unary | power
// power := atom ('^' unary)?
// atom  := number | const | func '(' expr ')' | '(' expr ')'
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
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

    fn eat_op(&mut self, ops: &[char]) -> Option<char> {
        match self.peek() {
            Some(Token::Op(c)) if ops.contains(c) => {
                let c = *c;
                self.pos += 1;
                Some(c)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(format!("expected {expected:?}, found {t:?}")),
            None => Err(format!("expected {expected:?}, found end of input")),
        }
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.eat_op(&['+', '-']) {
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.unary()?;
        while let Some(op) = self.eat_op(&['*', '/', '%']) {
            let rhs = self.unary()?;
            value = match op {
                '*' => value * rhs,
                _ if rhs == 0.0 => return Err("division by zero".into()),
                '/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    // Every recursive path passes through here, so the depth bound lives here.
    fn unary(&mut self) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression nested too deeply".into());
        }
        self.depth += 1;
        let value = match self.eat_op(&['-', '+']) {
            Some('-') => self.unary().map(|v| -v),
            Some(_) => self.unary(),
            None => self.power(),
        };
        self.depth -= 1;
        value
    }

    fn power(&mut self) -> Result<f64, String> {
        let base = self.atom()?;
        if self.eat_op(&['^']).is_some() {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "pi" => Ok(std::f64::consts::PI),
                "e" => Ok(std::f64::consts::E),
                "sqrt" | "abs" | "ln" | "sin" | "cos" => {
                    self.expect(Token::LParen)?;
                    let arg = self.expr()?;
                    self.expect(Token::RParen)?;
                    apply(&name, arg)
                }
                _ => Err(format!("unknown identifier {name:?}")),
            },
            Some(t) => Err(format!("unexpected {t:?}")),
            None => Err("unexpected end of input".into()),
        }
    }
}

fn apply(func: &str, arg: f64) -> Result<f64, String> {
    match func {
        "sqrt" if arg < 0.0 => Err("square root of a negative number".into()),
        "sqrt" => Ok(arg.sqrt()),
        "abs" => Ok(arg.abs()),
        "ln" if arg <= 0.0 => Err("logarithm of a non-positive number".into()),
        "ln" => Ok(arg.ln()),
        "sin" => Ok(arg.sin()),
        "cos" => Ok(arg.cos()),
        _ => Err(format!("unknown function {func:?}")),
    }
}

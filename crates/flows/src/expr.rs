//! Restricted boolean expression evaluator for decision states.
//!
//! Flow authors are operators, not developers; expressions come from
//! database rows and YAML files, so the grammar is closed: literals,
//! context paths (with optional chaining), equality and numeric
//! comparison, `&& || !`, `in` membership, and `.includes(...)`. No
//! globals, no calls, no assignment.
//!
//! The evaluator is total: any lex, parse, or evaluation problem yields
//! `false` and a log line, never an error. String matching (`includes`,
//! `in` against a string) is case-insensitive because user text drives
//! these expressions.

use serde_json::Value;

use crate::template::lookup;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tokens
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Dot,
    QDot,
    In,
    True,
    False,
    Null,
}

fn lex(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
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
            '?' => {
                if chars.get(i + 1) == Some(&'.') {
                    tokens.push(Token::QDot);
                    i += 2;
                } else {
                    return Err(format!("stray '?' at {i}"));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(format!("single '=' at {i} (use '==')"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    i += 2;
                } else {
                    return Err(format!("single '&' at {i}"));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    i += 2;
                } else {
                    return Err(format!("single '|' at {i}"));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string".into()),
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some(&e) if e == quote || e == '\\' => {
                                    s.push(e);
                                    i += 2;
                                }
                                _ => return Err("bad escape in string".into()),
                            }
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '-' | '0'..='9' => {
                let start = i;
                if c == '-' {
                    i += 1;
                    if !matches!(chars.get(i), Some('0'..='9')) {
                        return Err(format!("stray '-' at {start}"));
                    }
                }
                while matches!(chars.get(i), Some('0'..='9')) {
                    i += 1;
                }
                if chars.get(i) == Some(&'.') && matches!(chars.get(i + 1), Some('0'..='9')) {
                    i += 1;
                    while matches!(chars.get(i), Some('0'..='9')) {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| format!("bad number '{text}'"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while matches!(chars.get(i), Some(ch) if ch.is_ascii_alphanumeric() || *ch == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "in" => Token::In,
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AST + parser
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Path(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    In(Box<Expr>, Box<Expr>),
    Includes(Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        match self.bump() {
            Some(t) if t == token => Ok(()),
            other => Err(format!("expected {token:?}, found {other:?}")),
        }
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::OrOr) {
            self.bump();
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.equality()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.bump();
            let right = self.equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, String> {
        let left = self.comparison()?;
        let op = match self.peek() {
            Some(Token::EqEq) => CmpOp::Eq,
            Some(Token::NotEq) => CmpOp::Ne,
            _ => return Ok(left),
        };
        self.bump();
        let right = self.comparison()?;
        Ok(Expr::Cmp(op, Box::new(left), Box::new(right)))
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let left = self.membership()?;
        let op = match self.peek() {
            Some(Token::Lt) => CmpOp::Lt,
            Some(Token::Le) => CmpOp::Le,
            Some(Token::Gt) => CmpOp::Gt,
            Some(Token::Ge) => CmpOp::Ge,
            _ => return Ok(left),
        };
        self.bump();
        let right = self.membership()?;
        Ok(Expr::Cmp(op, Box::new(left), Box::new(right)))
    }

    fn membership(&mut self) -> Result<Expr, String> {
        let left = self.unary()?;
        if self.peek() == Some(&Token::In) {
            self.bump();
            let right = self.unary()?;
            return Ok(Expr::In(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Bang) {
            self.bump();
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                self.expect(Token::RParen)?;
                self.postfix(inner)
            }
            Some(Token::Str(s)) => self.postfix(Expr::Literal(Value::String(s))),
            Some(Token::Number(n)) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(first)) => {
                let mut segments = vec![first];
                loop {
                    match self.peek() {
                        Some(Token::Dot) | Some(Token::QDot) => {
                            self.bump();
                            match self.bump() {
                                Some(Token::Ident(word)) => {
                                    // `.includes(arg)` terminates the path.
                                    if word == "includes" && self.peek() == Some(&Token::LParen) {
                                        self.bump();
                                        let arg = self.or_expr()?;
                                        self.expect(Token::RParen)?;
                                        let receiver = Expr::Path(segments.join("."));
                                        return Ok(Expr::Includes(
                                            Box::new(receiver),
                                            Box::new(arg),
                                        ));
                                    }
                                    segments.push(word);
                                }
                                Some(Token::Number(n)) if n >= 0.0 && n.fract() == 0.0 => {
                                    segments.push((n as u64).to_string());
                                }
                                other => {
                                    return Err(format!("bad path segment: {other:?}"));
                                }
                            }
                        }
                        _ => break,
                    }
                }
                Ok(Expr::Path(segments.join(".")))
            }
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    /// Allow `.includes(...)` after a parenthesized or string receiver.
    fn postfix(&mut self, receiver: Expr) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Dot) {
            if let Some(Token::Ident(word)) = self.tokens.get(self.pos + 1) {
                if word == "includes" && self.tokens.get(self.pos + 2) == Some(&Token::LParen) {
                    self.pos += 3;
                    let arg = self.or_expr()?;
                    self.expect(Token::RParen)?;
                    return Ok(Expr::Includes(Box::new(receiver), Box::new(arg)));
                }
            }
        }
        Ok(receiver)
    }
}

/// Parse an expression into an AST. Used at flow-registration time to
/// reject out-of-grammar expressions before they ever run.
pub fn parse_expression(input: &str) -> Result<Expr, String> {
    let tokens = lex(input)?;
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "trailing tokens after expression: {:?}",
            &parser.tokens[parser.pos..]
        ));
    }
    Ok(expr)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Evaluation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn eval_value(expr: &Expr, ctx: &Value) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Path(path) => lookup(ctx, path).cloned().unwrap_or(Value::Null),
        Expr::Not(inner) => Value::Bool(!truthy(&eval_value(inner, ctx))),
        Expr::And(l, r) => {
            Value::Bool(truthy(&eval_value(l, ctx)) && truthy(&eval_value(r, ctx)))
        }
        Expr::Or(l, r) => {
            Value::Bool(truthy(&eval_value(l, ctx)) || truthy(&eval_value(r, ctx)))
        }
        Expr::Cmp(op, l, r) => {
            let lv = eval_value(l, ctx);
            let rv = eval_value(r, ctx);
            let result = match op {
                CmpOp::Eq => loose_eq(&lv, &rv),
                CmpOp::Ne => !loose_eq(&lv, &rv),
                CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
                    match (lv.as_f64(), rv.as_f64()) {
                        (Some(x), Some(y)) => match op {
                            CmpOp::Lt => x < y,
                            CmpOp::Le => x <= y,
                            CmpOp::Gt => x > y,
                            CmpOp::Ge => x >= y,
                            _ => unreachable!(),
                        },
                        // Ordering is numeric-only; anything else is false.
                        _ => false,
                    }
                }
            };
            Value::Bool(result)
        }
        Expr::In(needle, haystack) => {
            let n = eval_value(needle, ctx);
            let h = eval_value(haystack, ctx);
            Value::Bool(contains(&h, &n))
        }
        Expr::Includes(receiver, arg) => {
            let r = eval_value(receiver, ctx);
            let a = eval_value(arg, ctx);
            Value::Bool(contains(&r, &a))
        }
    }
}

fn contains(container: &Value, item: &Value) -> bool {
    match container {
        Value::Array(items) => items.iter().any(|v| loose_eq(v, item)),
        Value::String(s) => match item {
            Value::String(sub) => s.to_lowercase().contains(&sub.to_lowercase()),
            _ => false,
        },
        _ => false,
    }
}

/// Evaluate an expression string against a context. Total: any problem
/// yields `false` plus a log entry.
pub fn evaluate(input: &str, ctx: &Value) -> bool {
    match parse_expression(input) {
        Ok(expr) => truthy(&eval_value(&expr, ctx)),
        Err(reason) => {
            tracing::warn!(expression = input, %reason, "expression rejected, evaluating to false");
            false
        }
    }
}

/// Evaluate an already-parsed expression.
pub fn evaluate_parsed(expr: &Expr, ctx: &Value) -> bool {
    truthy(&eval_value(expr, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "_last_user_message": "Yes please",
            "nlu": { "intent": "order_food", "confidence": 0.82 },
            "search_results": { "items": [1, 2, 3], "total": 3 },
            "session": { "authenticated": true, "module_name": "food" },
            "payment": { "item": "COD" },
        })
    }

    #[test]
    fn equality_and_comparison() {
        assert!(evaluate("nlu.intent == 'order_food'", &ctx()));
        assert!(evaluate("nlu.confidence >= 0.65", &ctx()));
        assert!(evaluate("search_results.total > 0", &ctx()));
        assert!(!evaluate("search_results.total > 5", &ctx()));
        assert!(evaluate("nlu.intent != 'send_parcel'", &ctx()));
    }

    #[test]
    fn logical_operators() {
        assert!(evaluate(
            "session.authenticated && nlu.confidence > 0.5",
            &ctx()
        ));
        assert!(evaluate("false || search_results.total == 3", &ctx()));
        assert!(evaluate("!(nlu.intent == 'greeting')", &ctx()));
    }

    #[test]
    fn includes_is_case_insensitive() {
        assert!(evaluate("_last_user_message.includes('yes')", &ctx()));
        assert!(evaluate("_last_user_message.includes('YES')", &ctx()));
        assert!(!evaluate("_last_user_message.includes('no way')", &ctx()));
    }

    #[test]
    fn membership() {
        assert!(evaluate("2 in search_results.items", &ctx()));
        assert!(!evaluate("9 in search_results.items", &ctx()));
        assert!(evaluate("'cod' in payment.item", &ctx()));
        assert!(evaluate(
            "session.module_name in 'food and groceries'",
            &ctx()
        ));
    }

    #[test]
    fn optional_chaining_on_missing_links() {
        assert!(!evaluate("cart?.items?.0 == 'x'", &ctx()));
        assert!(evaluate("cart?.items == null", &ctx()));
    }

    #[test]
    fn bare_path_truthiness() {
        assert!(evaluate("session.authenticated", &ctx()));
        assert!(!evaluate("session.missing_flag", &ctx()));
        assert!(evaluate("true", &ctx()));
        assert!(!evaluate("false", &ctx()));
    }

    #[test]
    fn out_of_grammar_inputs_evaluate_false() {
        let hostile = [
            "",
            "=",
            "a = b",
            "a &",
            "| b",
            "((a)",
            "a.b.",
            "'unterminated",
            "system(`rm -rf /`)",
            "a + b",
            "{} == {}",
            "a in",
            "in a",
            "?.a",
            "a..b",
            "function(){}",
            "0x41",
            "- ",
            "!",
        ];
        for input in hostile {
            assert!(
                !evaluate(input, &ctx()),
                "'{input}' must evaluate to false"
            );
        }
    }

    #[test]
    fn totality_over_token_soup() {
        // Cross product of grammar fragments; every combination must
        // return a bool without panicking.
        let fragments = [
            "a", "a.b", "'s'", "1", "true", "null", "!", "==", "&&", "||", "in", "<", "(", ")",
            ">=", "a?.b", "_x.includes('y')", "-2.5",
        ];
        for a in fragments {
            for b in fragments {
                for c in fragments {
                    let input = format!("{a} {b} {c}");
                    let _ = evaluate(&input, &ctx());
                }
            }
        }
    }

    #[test]
    fn parse_is_strict_about_trailing_tokens() {
        assert!(parse_expression("a == 1 b").is_err());
        assert!(parse_expression("a == 1").is_ok());
    }

    #[test]
    fn parenthesized_receiver_supports_includes() {
        let ctx = json!({ "a": "hello world" });
        assert!(evaluate("(a).includes('WORLD')", &ctx));
        assert!(evaluate("'abcdef'.includes('cde')", &ctx));
    }
}

//! Tag expression language: lexer, recursive-descent parser and evaluator.
//!
//! Precedence, lowest first: `||`, `&&`, equality, comparison, `+`, unary `!`/`-`, then
//! property access on primaries.

use super::TemplateError;
use super::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Bare identifier, resolved through the scope chain.
    Var(String),
    /// `def.NAME`: defines only.
    Define(String),
    Prop(Box<Expr>, String),
    List(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
}

/// Name lookup used while evaluating.
pub trait Scope {
    /// Full chain lookup (locals, defines, run-time variables).
    fn lookup(&self, name: &str) -> Value;
    /// Defines only.
    fn define(&self, name: &str) -> Value;
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

/// Deepest expression tree the parser accepts. Parentheses, unary operators, chained binary
/// operators and property accesses each add one level.
pub const MAX_NESTING: usize = 128;

const PUNCTS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "(", ")", "[", "]", ",", ".", "!", "-",
    "+", "<", ">",
];

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Longest expression text quoted in an error.
const QUOTE_LIMIT: usize = 60;

fn syntax(src: &str, message: impl Into<String>) -> TemplateError {
    let src = src.trim();
    let expr = match src.char_indices().nth(QUOTE_LIMIT) {
        Some((cut, _)) => format!("{}...", &src[..cut]),
        None => src.to_string(),
    };
    TemplateError::Syntax {
        expr,
        message: message.into(),
    }
}

fn lex(src: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    'outer: while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| syntax(src, format!("bad number `{text}`")))?;
            tokens.push(Token::Num(n));
            continue;
        }
        if c == '"' || c == '\'' {
            let quote = c;
            let mut out = String::new();
            i += 1;
            while i < chars.len() {
                match chars[i] {
                    ch if ch == quote => {
                        i += 1;
                        tokens.push(Token::Str(out));
                        continue 'outer;
                    }
                    '\\' if i + 1 < chars.len() => {
                        out.push(match chars[i + 1] {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                        i += 2;
                    }
                    ch => {
                        out.push(ch);
                        i += 1;
                    }
                }
            }
            return Err(syntax(src, "unterminated string"));
        }
        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match PUNCTS.iter().find(|p| rest.starts_with(**p)) {
            Some(p) => {
                tokens.push(Token::Punct(*p));
                i += p.len();
            }
            None => return Err(syntax(src, format!("unexpected character `{c}`"))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    src: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek_punct(&self, p: &str) -> bool {
        matches!(self.tokens.get(self.pos), Some(Token::Punct(q)) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), TemplateError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(syntax(self.src, format!("expected `{p}`")))
        }
    }

    /// Enter one more level of the expression tree.
    fn nest(&mut self) -> Result<(), TemplateError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(syntax(
                self.src,
                format!("expression nested deeper than {MAX_NESTING} levels"),
            ));
        }
        Ok(())
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> Result<Expr, TemplateError>,
    ) -> Result<Expr, TemplateError> {
        let base = self.depth;
        let mut lhs = next(self)?;
        'scan: loop {
            for (p, op) in ops {
                if self.eat_punct(p) {
                    self.nest()?;
                    let rhs = next(self)?;
                    lhs = Expr::Binary(*op, Box::new(lhs), Box::new(rhs));
                    continue 'scan;
                }
            }
            self.depth = base;
            return Ok(lhs);
        }
    }

    fn or(&mut self) -> Result<Expr, TemplateError> {
        self.binary_level(&[("||", BinOp::Or)], Self::and)
    }

    fn and(&mut self) -> Result<Expr, TemplateError> {
        self.binary_level(&[("&&", BinOp::And)], Self::equality)
    }

    fn equality(&mut self) -> Result<Expr, TemplateError> {
        self.binary_level(
            &[
                ("===", BinOp::StrictEq),
                ("!==", BinOp::StrictNe),
                ("==", BinOp::Eq),
                ("!=", BinOp::Ne),
            ],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, TemplateError> {
        self.binary_level(
            &[
                ("<=", BinOp::Le),
                (">=", BinOp::Ge),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, TemplateError> {
        self.binary_level(&[("+", BinOp::Add)], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, TemplateError> {
        let base = self.depth;
        self.nest()?;
        let expr = if self.eat_punct("!") {
            Expr::Not(Box::new(self.unary()?))
        } else if self.eat_punct("-") {
            Expr::Neg(Box::new(self.unary()?))
        } else {
            self.postfix()?
        };
        self.depth = base;
        Ok(expr)
    }

    fn postfix(&mut self) -> Result<Expr, TemplateError> {
        let base = self.depth;
        let mut expr = self.primary()?;
        while self.eat_punct(".") {
            self.nest()?;
            match self.tokens.get(self.pos).cloned() {
                Some(Token::Ident(name)) => {
                    self.pos += 1;
                    expr = match expr {
                        Expr::Var(ref root) if root == "def" => Expr::Define(name),
                        other => Expr::Prop(Box::new(other), name),
                    };
                }
                _ => return Err(syntax(self.src, "expected a name after `.`")),
            }
        }
        self.depth = base;
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, TemplateError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| syntax(self.src, "unexpected end of expression"))?;
        self.pos += 1;
        match token {
            Token::Num(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::Str(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Var(name),
            }),
            Token::Punct("(") => {
                let inner = self.or()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                if !self.eat_punct("]") {
                    loop {
                        items.push(self.or()?);
                        if self.eat_punct("]") {
                            break;
                        }
                        self.expect_punct(",")?;
                    }
                }
                Ok(Expr::List(items))
            }
            Token::Punct(p) => Err(syntax(self.src, format!("unexpected `{p}`"))),
        }
    }
}

/// Parse a complete expression.
pub fn parse(src: &str) -> Result<Expr, TemplateError> {
    let tokens = lex(src)?;
    if tokens.is_empty() {
        return Err(syntax(src, "empty expression"));
    }
    let mut parser = Parser {
        src,
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.or()?;
    if parser.pos != parser.tokens.len() {
        return Err(syntax(src, "trailing input"));
    }
    Ok(expr)
}

/// True when `s` is a plain identifier (used for iteration variable names and define names).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if is_ident_start(c)) && chars.all(is_ident_char)
}

fn compare(op: BinOp, a: &Value, b: &Value) -> bool {
    let ord = match (a, b) {
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        _ => a.as_number().partial_cmp(&b.as_number()),
    };
    match ord {
        None => false,
        Some(o) => match op {
            BinOp::Lt => o.is_lt(),
            BinOp::Le => o.is_le(),
            BinOp::Gt => o.is_gt(),
            BinOp::Ge => o.is_ge(),
            _ => false,
        },
    }
}

fn add(a: Value, b: Value) -> Value {
    match (&a, &b) {
        (Value::Number(x), Value::Number(y)) => Value::Number(x + y),
        (Value::Str(_), _) | (_, Value::Str(_)) | (Value::List(_), _) | (_, Value::List(_)) => {
            Value::Str(format!("{a}{b}"))
        }
        _ => Value::Number(a.as_number() + b.as_number()),
    }
}

/// Evaluate `expr` against `scope`. Evaluation itself cannot fail; unknown names are null.
pub fn eval(expr: &Expr, scope: &dyn Scope) -> Value {
    match expr {
        Expr::Literal(v) => v.clone(),
        Expr::Var(name) => scope.lookup(name),
        Expr::Define(name) => scope.define(name),
        Expr::Prop(base, name) => eval(base, scope).property(name),
        Expr::List(items) => Value::List(items.iter().map(|e| eval(e, scope)).collect()),
        Expr::Not(inner) => Value::Bool(!eval(inner, scope).truthy()),
        Expr::Neg(inner) => Value::Number(-eval(inner, scope).as_number()),
        Expr::Binary(op, lhs, rhs) => match op {
            BinOp::Or => {
                let l = eval(lhs, scope);
                if l.truthy() { l } else { eval(rhs, scope) }
            }
            BinOp::And => {
                let l = eval(lhs, scope);
                if l.truthy() { eval(rhs, scope) } else { l }
            }
            BinOp::Eq => Value::Bool(eval(lhs, scope).loose_eq(&eval(rhs, scope))),
            BinOp::Ne => Value::Bool(!eval(lhs, scope).loose_eq(&eval(rhs, scope))),
            BinOp::StrictEq => Value::Bool(eval(lhs, scope).strict_eq(&eval(rhs, scope))),
            BinOp::StrictNe => Value::Bool(!eval(lhs, scope).strict_eq(&eval(rhs, scope))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                Value::Bool(compare(*op, &eval(lhs, scope), &eval(rhs, scope)))
            }
            BinOp::Add => add(eval(lhs, scope), eval(rhs, scope)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapScope(HashMap<&'static str, Value>);

    impl Scope for MapScope {
        fn lookup(&self, name: &str) -> Value {
            self.0.get(name).cloned().unwrap_or(Value::Null)
        }
        fn define(&self, name: &str) -> Value {
            self.lookup(name)
        }
    }

    fn run(src: &str) -> Value {
        let scope = MapScope(HashMap::from([
            ("a", Value::Number(2.0)),
            ("s", Value::Str("hi".into())),
            ("xs", Value::from(vec!["x", "y"])),
        ]));
        eval(&parse(src).unwrap(), &scope)
    }

    #[test]
    fn precedence() {
        assert_eq!(run("1 + 2 < 4 && !false"), Value::Bool(true));
        assert_eq!(run("a + 1 == 3 || missing"), Value::Bool(true));
        assert_eq!(run("-(a + 1)"), Value::Number(-3.0));
    }

    #[test]
    fn strings_and_lists() {
        assert_eq!(run("s + ' there'"), Value::Str("hi there".into()));
        assert_eq!(run("xs.length"), Value::Number(2.0));
        assert_eq!(run("[1, 'b'].length"), Value::Number(2.0));
        assert_eq!(run("def.s"), Value::Str("hi".into()));
    }

    #[test]
    fn unknown_names_are_null() {
        assert_eq!(run("nope"), Value::Null);
        assert_eq!(run("nope.deeper"), Value::Null);
    }

    #[test]
    fn syntax_errors() {
        assert!(parse("1 +").is_err());
        assert!(parse("(a").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("").is_err());
        assert!(parse("a @ b").is_err());
    }

    #[test]
    fn nesting_is_bounded() {
        let ok = format!("{}1{}", "(".repeat(40), ")".repeat(40));
        assert_eq!(run(&ok), Value::Number(1.0));
        assert!(parse(&"(".repeat(50_000)).is_err());
        assert!(parse(&"!".repeat(10_000)).is_err());
        assert!(parse(&vec!["1"; 5_000].join(" + ")).is_err());
        assert!(parse(&format!("a{}", ".b".repeat(5_000))).is_err());
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("NAME_1"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("a.b"));
    }
}

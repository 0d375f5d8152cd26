//! Template expression language.
//!
//! Expressions are parsed once at compile time into [`Expr`] trees and
//! evaluated by the render interpreter. The grammar is the script subset
//! templates actually use: literals, paths, calls, operators, arrays and
//! objects, arrow functions and statement sequences for inline handlers.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Words that cannot start an expression or name a variable.
pub const PROHIBITED_KEYWORDS: [&str; 31] = [
    "do", "if", "for", "let", "new", "try", "var", "case", "else", "with", "await", "break",
    "catch", "class", "const", "super", "throw", "while", "yield", "delete", "export", "import",
    "return", "switch", "default", "extends", "finally", "continue", "debugger", "function",
    "arguments",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct ExprError {
    pub message: String,
    pub offset: usize,
}

impl ExprError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

type ParseResult<T> = Result<T, ExprError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignOp {
    Assign,
    AddAssign,
    SubAssign,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplatePart {
    Str(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropKey {
    Static(String),
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Template(Vec<TemplatePart>),
    Ident(String),
    Member {
        object: Box<Expr>,
        property: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(PropKey, Expr)>),
    Arrow {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Function {
        params: Vec<String>,
        body: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    /// Comma expressions and `;`-separated statements.
    Sequence(Vec<Expr>),
    /// A braced function body.
    Block(Vec<Expr>),
    Return(Option<Box<Expr>>),
    /// Looks up a registered filter by name (`_f("name")`).
    ResolveFilter(String),
    /// Text that failed to parse, kept for diagnostics. Evaluates to an
    /// error.
    Invalid {
        source: String,
        reason: String,
    },
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Ident(name.into())
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    pub fn member(object: Expr, property: impl Into<String>) -> Expr {
        Expr::Member {
            object: Box::new(object),
            property: property.into(),
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Expr {
        Expr::Assign {
            op: AssignOp::Assign,
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    /// A dotted or bracketed path with literal or identifier indices, such
    /// as `handlers.save` or `list[0]`.
    pub fn is_member_path(&self) -> bool {
        match self {
            Expr::Ident(_) => true,
            Expr::Member { object, .. } => object.is_member_path(),
            Expr::Index { object, index } => {
                matches!(**index, Expr::String(_) | Expr::Number(_) | Expr::Ident(_))
                    && object.is_member_path()
            }
            _ => false,
        }
    }

    pub fn is_function_literal(&self) -> bool {
        matches!(self, Expr::Arrow { .. } | Expr::Function { .. })
    }

    /// Valid left-hand side of an assignment.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Expr::Invalid { .. })
    }

    /// No identifiers, calls or filters anywhere inside.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Null | Expr::Undefined | Expr::Bool(_) | Expr::Number(_) | Expr::String(_) => true,
            Expr::Template(parts) => parts.iter().all(|part| match part {
                TemplatePart::Str(_) => true,
                TemplatePart::Expr(expr) => expr.is_constant(),
            }),
            Expr::Unary { operand, .. } => operand.is_constant(),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                left.is_constant() && right.is_constant()
            }
            Expr::Array(items) => items.iter().all(Expr::is_constant),
            Expr::Object(props) => props.iter().all(|(key, value)| {
                matches!(key, PropKey::Static(_)) && value.is_constant()
            }),
            _ => false,
        }
    }

    fn is_atomic(&self) -> bool {
        matches!(
            self,
            Expr::Null
                | Expr::Undefined
                | Expr::Bool(_)
                | Expr::Number(_)
                | Expr::String(_)
                | Expr::Template(_)
                | Expr::Ident(_)
                | Expr::Member { .. }
                | Expr::Index { .. }
                | Expr::Call { .. }
                | Expr::Array(_)
                | Expr::Object(_)
                | Expr::ResolveFilter(_)
        )
    }
}

/// Parse a single expression (comma sequences allowed).
pub fn parse_expression(source: &str) -> ParseResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.parse_sequence()?;
    parser.expect_end()?;
    Ok(expr)
}

/// Parse `;`-separated statements, as written in inline event handlers.
pub fn parse_statements(source: &str) -> ParseResult<Expr> {
    let tokens = tokenize(source)?;
    let mut parser = ExprParser { tokens, pos: 0 };
    let mut statements = parser.parse_statement_list(false)?;
    parser.expect_end()?;
    Ok(if statements.len() == 1 {
        statements.remove(0)
    } else {
        Expr::Sequence(statements)
    })
}

/// Parse `source`, or wrap the failure in [`Expr::Invalid`].
pub fn parse_or_invalid(source: &str) -> Expr {
    parse_expression(source).unwrap_or_else(|err| Expr::Invalid {
        source: source.to_string(),
        reason: err.to_string(),
    })
}

/// Whether `name` can be declared as a variable.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !PROHIBITED_KEYWORDS.contains(&name)
        && !matches!(name, "true" | "false" | "null" | "this" | "typeof" | "void" | "in" | "instanceof")
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Str(String),
    Template(Vec<TemplateChunk>),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
enum TemplateChunk {
    Str(String),
    Code(String, usize),
}

const PUNCTUATORS: [&str; 41] = [
    "===", "!==", "**", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "+=", "-=", "*=", "/=",
    "++", "--", "(", ")", "[", "]", "{", "}", ",", ".", ";", ":", "?", "<", ">", "+", "-", "*",
    "/", "%", "!", "=", "|", "&", "~", "^",
];

fn tokenize(source: &str) -> ParseResult<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let Some(c) = rest.chars().next() else { break };

        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }

        let start = pos;
        let next_is_digit = bytes.get(pos + 1).is_some_and(u8::is_ascii_digit);
        if c.is_ascii_digit() || (c == '.' && next_is_digit) {
            let (value, len) = lex_number(rest).ok_or_else(|| ExprError::new("invalid number", start))?;
            tokens.push((Token::Num(value), start));
            pos += len;
            continue;
        }

        if c == '"' || c == '\'' {
            let (value, len) = lex_string(rest, c).ok_or_else(|| ExprError::new("unterminated string", start))?;
            tokens.push((Token::Str(value), start));
            pos += len;
            continue;
        }

        if c == '`' {
            let (chunks, len) = lex_template(rest, start)?;
            tokens.push((Token::Template(chunks), start));
            pos += len;
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let len = rest
                .find(|ch: char| !(ch.is_alphanumeric() || ch == '_' || ch == '$'))
                .unwrap_or(rest.len());
            tokens.push((Token::Ident(rest[..len].to_string()), start));
            pos += len;
            continue;
        }

        match PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) {
            Some(&punct) => {
                tokens.push((Token::Punct(punct), start));
                pos += punct.len();
            }
            None => return Err(ExprError::new(format!("unexpected character `{c}`"), start)),
        }
    }

    tokens.push((Token::Eof, source.len()));
    Ok(tokens)
}

fn lex_number(rest: &str) -> Option<(f64, usize)> {
    if let Some(hex) = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X")) {
        let len = hex.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(hex.len());
        let value = u64::from_str_radix(&hex[..len], 16).ok()?;
        return Some((value as f64, len + 2));
    }
    let bytes = rest.as_bytes();
    let mut len = 0;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while len < bytes.len() {
        let b = bytes[len];
        match b {
            b'0'..=b'9' => len += 1,
            b'.' if !seen_dot && !seen_exp => {
                seen_dot = true;
                len += 1;
            }
            b'e' | b'E' if !seen_exp && len > 0 => {
                seen_exp = true;
                len += 1;
                if matches!(bytes.get(len), Some(b'+' | b'-')) {
                    len += 1;
                }
            }
            _ => break,
        }
    }
    rest[..len].parse().ok().map(|value| (value, len))
}

/// Lex a quoted string starting at `rest[0]`; returns the value and the
/// consumed byte length.
fn lex_string(rest: &str, quote: char) -> Option<(String, usize)> {
    let mut out = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            c if c == quote => return Some((out, i + 1)),
            '\\' => {
                let (_, escaped) = chars.next()?;
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'v' => out.push('\u{b}'),
                    '0' => out.push('\0'),
                    'u' | 'x' => {
                        let width = if escaped == 'u' { 4 } else { 2 };
                        let mut digits = String::new();
                        for _ in 0..width {
                            digits.push(chars.next()?.1);
                        }
                        let code = u32::from_str_radix(&digits, 16).ok()?;
                        out.push(char::from_u32(code)?);
                    }
                    '\n' => {}
                    other => out.push(other),
                }
            }
            c => out.push(c),
        }
    }
    None
}

fn lex_template(rest: &str, base: usize) -> ParseResult<(Vec<TemplateChunk>, usize)> {
    let mut chunks = Vec::new();
    let mut text = String::new();
    let bytes = rest.as_bytes();
    let mut i = 1;
    while i < rest.len() {
        let Some(c) = rest[i..].chars().next() else { break };
        match c {
            '`' => {
                if !text.is_empty() {
                    chunks.push(TemplateChunk::Str(text));
                }
                return Ok((chunks, i + 1));
            }
            '\\' => {
                let escaped = rest[i + 1..].chars().next();
                match escaped {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some(other) => text.push(other),
                    None => break,
                }
                i += 1 + escaped.map_or(0, char::len_utf8);
            }
            '$' if bytes.get(i + 1) == Some(&b'{') => {
                if !text.is_empty() {
                    chunks.push(TemplateChunk::Str(std::mem::take(&mut text)));
                }
                let code_start = i + 2;
                let code_len = matching_brace(&rest[code_start..])
                    .ok_or_else(|| ExprError::new("unterminated template substitution", base + i))?;
                chunks.push(TemplateChunk::Code(
                    rest[code_start..code_start + code_len].to_string(),
                    base + code_start,
                ));
                i = code_start + code_len + 1;
            }
            c => {
                text.push(c);
                i += c.len_utf8();
            }
        }
    }
    Err(ExprError::new("unterminated template literal", base))
}

/// Byte length up to the `}` that closes an already-opened brace.
fn matching_brace(source: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in source.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

struct ExprParser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

fn binary_power(token: &Token) -> Option<(u8, u8)> {
    let op = match token {
        Token::Punct(p) => *p,
        Token::Ident(word) if word == "in" || word == "instanceof" => "in",
        _ => return None,
    };
    Some(match op {
        "??" | "||" => (3, 4),
        "&&" => (5, 6),
        "==" | "!=" | "===" | "!==" => (7, 8),
        "<" | ">" | "<=" | ">=" | "in" => (9, 10),
        "+" | "-" => (11, 12),
        "*" | "/" | "%" => (13, 14),
        "**" => (16, 15),
        _ => return None,
    })
}

fn combine(op: &str, left: Expr, right: Expr) -> Expr {
    let (left, right) = (Box::new(left), Box::new(right));
    let logical = |op| Expr::Logical {
        op,
        left: left.clone(),
        right: right.clone(),
    };
    let binary = |op| Expr::Binary {
        op,
        left: left.clone(),
        right: right.clone(),
    };
    match op {
        "&&" => logical(LogicalOp::And),
        "||" => logical(LogicalOp::Or),
        "??" => logical(LogicalOp::Nullish),
        "+" => binary(BinaryOp::Add),
        "-" => binary(BinaryOp::Sub),
        "*" => binary(BinaryOp::Mul),
        "/" => binary(BinaryOp::Div),
        "%" => binary(BinaryOp::Rem),
        "**" => binary(BinaryOp::Pow),
        "==" => binary(BinaryOp::Eq),
        "!=" => binary(BinaryOp::NotEq),
        "===" => binary(BinaryOp::StrictEq),
        "!==" => binary(BinaryOp::StrictNotEq),
        "<" => binary(BinaryOp::Lt),
        "<=" => binary(BinaryOp::LtEq),
        ">" => binary(BinaryOp::Gt),
        ">=" => binary(BinaryOp::GtEq),
        _ => binary(BinaryOp::In),
    }
}

impl ExprParser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        let index = (self.pos + ahead).min(self.tokens.len() - 1);
        &self.tokens[index].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, punct: &str) -> bool {
        matches!(self.peek(), Token::Punct(p) if *p == punct)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> ParseResult<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected `{punct}`")))
        }
    }

    fn expect_end(&self) -> ParseResult<()> {
        match self.peek() {
            Token::Eof => Ok(()),
            _ => Err(self.unexpected("expected end of expression")),
        }
    }

    fn unexpected(&self, context: &str) -> ExprError {
        let found = match self.peek() {
            Token::Num(n) => n.to_string(),
            Token::Str(s) => format!("'{s}'"),
            Token::Template(_) => "template literal".to_string(),
            Token::Ident(word) => word.clone(),
            Token::Punct(p) => p.to_string(),
            Token::Eof => "end of input".to_string(),
        };
        ExprError::new(format!("unexpected token `{found}`, {context}"), self.offset())
    }

    fn parse_sequence(&mut self) -> ParseResult<Expr> {
        let first = self.parse_assign()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(",") {
            items.push(self.parse_assign()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn parse_statement_list(&mut self, in_block: bool) -> ParseResult<Vec<Expr>> {
        let mut statements = Vec::new();
        loop {
            while self.eat(";") {}
            match self.peek() {
                Token::Eof => break,
                Token::Punct("}") if in_block => break,
                Token::Ident(word) if word == "return" => {
                    self.advance();
                    let ends = matches!(self.peek(), Token::Eof | Token::Punct(";") | Token::Punct("}"));
                    let value = if ends {
                        None
                    } else {
                        Some(Box::new(self.parse_sequence()?))
                    };
                    statements.push(Expr::Return(value));
                }
                _ => statements.push(self.parse_sequence()?),
            }
            if !matches!(self.peek(), Token::Punct(";") | Token::Punct("}") | Token::Eof) {
                return Err(self.unexpected("expected `;`"));
            }
        }
        Ok(statements)
    }

    fn parse_assign(&mut self) -> ParseResult<Expr> {
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }

        let start = self.offset();
        let left = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Punct("=") => AssignOp::Assign,
            Token::Punct("+=") => AssignOp::AddAssign,
            Token::Punct("-=") => AssignOp::SubAssign,
            _ => return Ok(left),
        };
        if !left.is_assignable() {
            return Err(ExprError::new("invalid assignment target", start));
        }
        self.advance();
        let value = self.parse_assign()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(left),
            value: Box::new(value),
        })
    }

    fn try_parse_arrow(&mut self) -> ParseResult<Option<Expr>> {
        let params = match (self.peek(), self.peek_at(1)) {
            (Token::Ident(name), Token::Punct("=>")) if is_valid_identifier(name) => {
                let name = name.clone();
                self.advance();
                self.advance();
                vec![name]
            }
            (Token::Punct("("), _) => {
                let Some(close) = self.matching_paren(self.pos) else {
                    return Ok(None);
                };
                if !matches!(self.tokens.get(close + 1), Some((Token::Punct("=>"), _))) {
                    return Ok(None);
                }
                self.advance();
                let params = self.parse_params()?;
                self.expect("=>")?;
                params
            }
            _ => return Ok(None),
        };
        let body = self.parse_function_body(true)?;
        Ok(Some(Expr::Arrow {
            params,
            body: Box::new(body),
        }))
    }

    /// Index of the `)` matching the `(` at `open`.
    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (i, (token, _)) in self.tokens.iter().enumerate().skip(open) {
            match token {
                Token::Punct("(") => depth += 1,
                Token::Punct(")") => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                Token::Eof => return None,
                _ => {}
            }
        }
        None
    }

    /// Parameter names up to and including `)`.
    fn parse_params(&mut self) -> ParseResult<Vec<String>> {
        let mut params = Vec::new();
        while !self.eat(")") {
            match self.advance() {
                Token::Ident(name) if is_valid_identifier(&name) => params.push(name),
                _ => return Err(ExprError::new("invalid parameter", self.offset())),
            }
            if !self.is_punct(")") {
                self.expect(",")?;
            }
        }
        Ok(params)
    }

    fn parse_function_body(&mut self, arrow: bool) -> ParseResult<Expr> {
        if self.eat("{") {
            let statements = self.parse_statement_list(true)?;
            self.expect("}")?;
            return Ok(Expr::Block(statements));
        }
        if arrow {
            self.parse_assign()
        } else {
            Err(self.unexpected("expected `{`"))
        }
    }

    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        let test = self.parse_binary(0)?;
        if !self.eat("?") {
            return Ok(test);
        }
        let consequent = self.parse_assign()?;
        self.expect(":")?;
        let alternate = self.parse_assign()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_binary(&mut self, min_power: u8) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let Some((left_power, right_power)) = binary_power(self.peek()) else {
                break;
            };
            if left_power < min_power {
                break;
            }
            let op = match self.advance() {
                Token::Punct(p) => p,
                _ => "in",
            };
            let right = self.parse_binary(right_power)?;
            left = combine(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let op = match self.peek() {
            Token::Punct("!") => Some(UnaryOp::Not),
            Token::Punct("-") => Some(UnaryOp::Neg),
            Token::Punct("+") => Some(UnaryOp::Plus),
            Token::Ident(word) if word == "typeof" => Some(UnaryOp::TypeOf),
            Token::Ident(word) if word == "void" => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            let start = self.offset();
            self.advance();
            let target = self.parse_unary()?;
            if !target.is_assignable() {
                return Err(ExprError::new("invalid update target", start));
            }
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }

        let start = self.offset();
        let expr = self.parse_call_member()?;
        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            if !expr.is_assignable() {
                return Err(ExprError::new("invalid update target", start));
            }
            self.advance();
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn parse_call_member(&mut self) -> ParseResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(".") {
                match self.advance() {
                    Token::Ident(name) => expr = Expr::member(expr, name),
                    _ => return Err(self.unexpected("expected property name")),
                }
            } else if self.eat("[") {
                let index = self.parse_sequence()?;
                self.expect("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat("(") {
                let mut args = Vec::new();
                while !self.eat(")") {
                    args.push(self.parse_assign()?);
                    if !self.is_punct(")") {
                        self.expect(",")?;
                    }
                }
                expr = Expr::call(expr, args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let offset = self.offset();
        match self.advance() {
            Token::Num(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::String(s)),
            Token::Template(chunks) => {
                let mut parts = Vec::with_capacity(chunks.len());
                for chunk in chunks {
                    parts.push(match chunk {
                        TemplateChunk::Str(text) => TemplatePart::Str(text),
                        TemplateChunk::Code(code, at) => TemplatePart::Expr(
                            parse_expression(&code).map_err(|err| ExprError::new(err.message, at + err.offset))?,
                        ),
                    });
                }
                Ok(Expr::Template(parts))
            }
            Token::Ident(word) => match word.as_str() {
                "true" => Ok(Expr::Bool(true)),
                "false" => Ok(Expr::Bool(false)),
                "null" => Ok(Expr::Null),
                "undefined" => Ok(Expr::Undefined),
                "function" => {
                    if let Token::Ident(_) = self.peek() {
                        self.advance();
                    }
                    self.expect("(")?;
                    let params = self.parse_params()?;
                    let body = self.parse_function_body(false)?;
                    Ok(Expr::Function {
                        params,
                        body: Box::new(body),
                    })
                }
                keyword if PROHIBITED_KEYWORDS.contains(&keyword) => Err(ExprError::new(
                    format!("unexpected keyword `{keyword}`"),
                    offset,
                )),
                _ => Ok(Expr::Ident(word)),
            },
            Token::Punct("(") => {
                let inner = self.parse_sequence()?;
                self.expect(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                let mut items = Vec::new();
                while !self.eat("]") {
                    items.push(self.parse_assign()?);
                    if !self.is_punct("]") {
                        self.expect(",")?;
                    }
                }
                Ok(Expr::Array(items))
            }
            Token::Punct("{") => self.parse_object(),
            Token::Punct("/") => Err(ExprError::new("regular expressions are not supported", offset)),
            Token::Eof => Err(ExprError::new("unexpected end of input", offset)),
            other => {
                let shown = match other {
                    Token::Punct(p) => p.to_string(),
                    _ => "token".to_string(),
                };
                Err(ExprError::new(format!("unexpected `{shown}`"), offset))
            }
        }
    }

    fn parse_object(&mut self) -> ParseResult<Expr> {
        let mut props = Vec::new();
        while !self.eat("}") {
            let key = match self.advance() {
                Token::Ident(name) => PropKey::Static(name),
                Token::Str(s) => PropKey::Static(s),
                Token::Num(n) => PropKey::Static(crate::value::format_number(n)),
                Token::Punct("[") => {
                    let key = self.parse_assign()?;
                    self.expect("]")?;
                    PropKey::Computed(key)
                }
                _ => return Err(self.unexpected("expected property key")),
            };
            let value = if self.eat(":") {
                self.parse_assign()?
            } else {
                match &key {
                    PropKey::Static(name) if is_valid_identifier(name) => Expr::Ident(name.clone()),
                    _ => return Err(self.unexpected("expected `:`")),
                }
            };
            props.push((key, value));
            if !self.is_punct("}") {
                self.expect(",")?;
            }
        }
        Ok(Expr::Object(props))
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    if expr.is_atomic() {
        write!(f, "{expr}")
    } else {
        write!(f, "({expr})")
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    write!(f, "{}", serde_json::Value::String(s.to_string()))
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::TypeOf => "typeof ",
            UnaryOp::Void => "void ",
        })
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNotEq => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::In => " in ",
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Null => f.write_str("null"),
            Expr::Undefined => f.write_str("undefined"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Number(n) => f.write_str(&crate::value::format_number(*n)),
            Expr::String(s) => write_quoted(f, s),
            Expr::Template(parts) => {
                f.write_str("`")?;
                for part in parts {
                    match part {
                        TemplatePart::Str(text) => f.write_str(&text.replace('`', "\\`"))?,
                        TemplatePart::Expr(expr) => write!(f, "${{{expr}}}")?,
                    }
                }
                f.write_str("`")
            }
            Expr::Ident(name) => f.write_str(name),
            Expr::Member { object, property } => {
                write_operand(f, object)?;
                write!(f, ".{property}")
            }
            Expr::Index { object, index } => {
                write_operand(f, object)?;
                write!(f, "[{index}]")
            }
            Expr::Call { callee, args } => {
                write_operand(f, callee)?;
                f.write_str("(")?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Unary { op, operand } => {
                write!(f, "{op}")?;
                write_operand(f, operand)
            }
            Expr::Binary { op, left, right } => {
                write_operand(f, left)?;
                write!(f, "{op}")?;
                write_operand(f, right)
            }
            Expr::Logical { op, left, right } => {
                write_operand(f, left)?;
                f.write_str(match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                    LogicalOp::Nullish => "??",
                })?;
                write_operand(f, right)
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                write_operand(f, test)?;
                f.write_str("?")?;
                write_operand(f, consequent)?;
                f.write_str(":")?;
                write_operand(f, alternate)
            }
            Expr::Array(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Object(props) => {
                f.write_str("{")?;
                for (i, (key, value)) in props.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    match key {
                        PropKey::Static(name) => write_quoted(f, name)?,
                        PropKey::Computed(expr) => write!(f, "[{expr}]")?,
                    }
                    write!(f, ":{value}")?;
                }
                f.write_str("}")
            }
            Expr::Arrow { params, body } => {
                write!(f, "({})=>", params.join(","))?;
                match **body {
                    Expr::Object(_) => write!(f, "({body})"),
                    _ => write!(f, "{body}"),
                }
            }
            Expr::Function { params, body } => {
                write!(f, "function({})", params.join(","))?;
                match **body {
                    Expr::Block(_) => write!(f, "{body}"),
                    _ => write!(f, "{{return {body}}}"),
                }
            }
            Expr::Assign { op, target, value } => {
                let op = match op {
                    AssignOp::Assign => "=",
                    AssignOp::AddAssign => "+=",
                    AssignOp::SubAssign => "-=",
                };
                write!(f, "{target}{op}{value}")
            }
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let op = if *increment { "++" } else { "--" };
                if *prefix {
                    write!(f, "{op}{target}")
                } else {
                    write!(f, "{target}{op}")
                }
            }
            Expr::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(";")?;
                    }
                    write!(f, "{item}")?;
                }
                Ok(())
            }
            Expr::Block(statements) => {
                f.write_str("{")?;
                for statement in statements {
                    write!(f, "{statement};")?;
                }
                f.write_str("}")
            }
            Expr::Return(value) => match value {
                Some(value) => write!(f, "return {value}"),
                None => f.write_str("return"),
            },
            Expr::ResolveFilter(name) => {
                f.write_str("_f(")?;
                write_quoted(f, name)?;
                f.write_str(")")
            }
            Expr::Invalid { source, .. } => f.write_str(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Expr {
        parse_expression(source).unwrap()
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(parse("1 + 2 * 3").to_string(), "1+(2*3)");
        assert_eq!(parse("a - b - c").to_string(), "(a-b)-c");
        assert_eq!(parse("2 ** 3 ** 2").to_string(), "2**(3**2)");
        assert_eq!(parse("a || b && c").to_string(), "a||(b&&c)");
        assert_eq!(parse("!a === b").to_string(), "(!a)===b");
    }

    #[test]
    fn member_index_and_calls() {
        let expr = parse("user.items[0].format('x', 2)");
        assert_eq!(expr.to_string(), "user.items[0].format(\"x\",2)");
        assert!(parse("user.items[0]").is_member_path());
        assert!(parse("a['b'].c").is_member_path());
        assert!(!parse("a.b()").is_member_path());
    }

    #[test]
    fn keywords_are_valid_property_names() {
        assert!(parse_expression("item.delete").is_ok());
        assert!(parse_expression("delete").is_err());
        assert!(parse_expression("new Date()").is_err());
    }

    #[test]
    fn conditional_and_assignment() {
        let expr = parse("ok ? 'yes' : 'no'");
        assert!(matches!(expr, Expr::Conditional { .. }));

        let expr = parse("count += 2");
        assert!(matches!(expr, Expr::Assign { op: AssignOp::AddAssign, .. }));
        assert!(parse_expression("1 = 2").is_err());
    }

    #[test]
    fn arrows_and_functions() {
        let arrow = parse("(a, b) => a + b");
        assert!(matches!(&arrow, Expr::Arrow { params, .. } if params == &["a", "b"]));
        let single = parse("x => ({ v: x })");
        assert!(matches!(&single, Expr::Arrow { body, .. } if matches!(**body, Expr::Object(_))));
        let function = parse("function (e) { count++; return e }");
        assert!(function.is_function_literal());
        assert!(matches!(&function, Expr::Function { body, .. } if matches!(&**body, Expr::Block(s) if s.len() == 2)));
        assert_eq!(parse("(a)").to_string(), "a");
    }

    #[test]
    fn statements_for_handlers() {
        let expr = parse_statements("a = 1; b++;").unwrap();
        assert!(matches!(&expr, Expr::Sequence(items) if items.len() == 2));
        assert!(parse_statements("a = 1 b = 2").is_err());
    }

    #[test]
    fn template_literals() {
        let expr = parse("`hi ${name}!`");
        match &expr {
            Expr::Template(parts) => {
                assert_eq!(parts[0], TemplatePart::Str("hi ".into()));
                assert_eq!(parts[1], TemplatePart::Expr(Expr::ident("name")));
                assert_eq!(parts[2], TemplatePart::Str("!".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn literals() {
        assert_eq!(parse("0x1F"), Expr::Number(31.0));
        assert_eq!(parse(".5e1"), Expr::Number(5.0));
        assert_eq!(parse(r#""a\"bA""#), Expr::String("a\"bA".into()));
        assert_eq!(parse("{ a, 'b': 1, [k]: 2 }").to_string(), "{\"a\":a,\"b\":1,[k]:2}");
        assert!(parse("[1, 2, 3]").is_constant());
        assert!(!parse("[1, a]").is_constant());
    }

    #[test]
    fn invalid_input() {
        assert!(parse_expression("a +").is_err());
        assert!(parse_expression("(a").is_err());
        assert!(parse_expression("/re/.test(a)").is_err());
        assert!(parse_or_invalid("a +").is_invalid());
    }

    #[test]
    fn identifiers() {
        assert!(is_valid_identifier("item"));
        assert!(is_valid_identifier("$index"));
        assert!(!is_valid_identifier("1item"));
        assert!(!is_valid_identifier("for"));
        assert!(!is_valid_identifier("a-b"));
    }
}

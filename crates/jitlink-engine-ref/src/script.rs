//! Parser and type checker for the reference engine's script language.
//!
//! ```text
//! def sum(a, b):
//!     return a + b
//!
//! def swap(pair: Tuple[Tensor, Tensor]):
//!     first = pair[0]
//!     return (pair[1], first)
//! ```
//!
//! Parameters default to `Tensor`. Bodies are `name = expr` lines followed by a single
//! `return expr`. Expressions combine names, `+ - *`, tuple literals, `t[i]` and
//! parentheses; every expression's type is checked when the script is compiled.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

use crate::tensor::BinaryOp;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("{0}")]
    Message(String),
}

impl ScriptError {
    fn new(msg: impl Into<String>) -> Self {
        ScriptError::Message(msg.into())
    }

    fn at(line: usize, msg: impl fmt::Display) -> Self {
        ScriptError::Message(format!("line {line}: {msg}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptType {
    Tensor,
    Tuple(Vec<ScriptType>),
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptType::Tensor => f.write_str("Tensor"),
            ScriptType::Tuple(elements) if elements.is_empty() => f.write_str("Tuple[()]"),
            ScriptType::Tuple(elements) => {
                f.write_str("Tuple[")?;
                for (index, element) in elements.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Var(String),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Tuple(Vec<Expr>),
    Index(Box<Expr>, usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: ScriptType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptMethod {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<(String, Expr)>,
    pub ret: Expr,
    pub ret_ty: ScriptType,
}

impl ScriptMethod {
    /// Signature in the form `sum(Tensor a, Tensor b) -> Tensor`.
    pub fn declaration(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|param| format!("{} {}", param.ty, param.name))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({}) -> {}", self.name, params, self.ret_ty)
    }
}

#[derive(Debug, Clone)]
pub struct ScriptModule {
    pub source: String,
    pub methods: Vec<ScriptMethod>,
}

impl ScriptModule {
    pub fn method(&self, name: &str) -> Option<&ScriptMethod> {
        self.methods.iter().find(|method| method.name == name)
    }
}

/// Parses and type-checks every `def` in `source`.
pub fn compile(source: &str) -> Result<ScriptModule, ScriptError> {
    let mut methods: Vec<ScriptMethod> = Vec::new();
    let mut current: Option<(usize, String, Vec<Param>, Vec<(usize, String)>)> = None;

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let content = strip_comment(line);
        if content.trim().is_empty() {
            continue;
        }
        let indented = content.starts_with(' ') || content.starts_with('\t');
        if !indented {
            if let Some((start, name, params, body)) = current.take() {
                methods.push(build_method(start, name, params, body)?);
            }
            let (name, params) = parse_header(content.trim()).map_err(|msg| ScriptError::at(line_no, msg))?;
            current = Some((line_no, name, params, Vec::new()));
        } else {
            let (_, _, _, body) = current
                .as_mut()
                .ok_or_else(|| ScriptError::at(line_no, "statement outside of a `def`"))?;
            body.push((line_no, content.trim().to_string()));
        }
    }
    if let Some((start, name, params, body)) = current.take() {
        methods.push(build_method(start, name, params, body)?);
    }
    if methods.is_empty() {
        return Err(ScriptError::new("script defines no methods"));
    }
    for (index, method) in methods.iter().enumerate() {
        if methods[..index].iter().any(|earlier| earlier.name == method.name) {
            return Err(ScriptError::new(format!(
                "method '{}' is defined more than once",
                method.name
            )));
        }
    }
    Ok(ScriptModule {
        source: source.to_string(),
        methods,
    })
}

fn strip_comment(line: &str) -> &str {
    let code = match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    };
    code.trim_end()
}

fn parse_header(header: &str) -> Result<(String, Vec<Param>), String> {
    let rest = header
        .strip_prefix("def ")
        .ok_or("expected `def name(params):`")?
        .trim();
    let rest = rest
        .strip_suffix(':')
        .ok_or("method header must end with `:`")?
        .trim_end();
    let open = rest.find('(').ok_or("missing `(` in method header")?;
    let params_src = rest[open + 1..]
        .strip_suffix(')')
        .ok_or("missing `)` to close parameter list")?;
    let name = rest[..open].trim();
    if !is_identifier(name) {
        return Err(format!("invalid method name `{name}`"));
    }
    let mut params: Vec<Param> = Vec::new();
    for decl in split_top_level(params_src) {
        let (param_name, ty) = match decl.split_once(':') {
            Some((param_name, ty)) => (param_name.trim(), parse_type(ty.trim())?),
            None => (decl, ScriptType::Tensor),
        };
        if !is_identifier(param_name) {
            return Err(format!("invalid parameter name `{param_name}`"));
        }
        if params.iter().any(|param| param.name == param_name) {
            return Err(format!("duplicate parameter `{param_name}`"));
        }
        params.push(Param {
            name: param_name.to_string(),
            ty,
        });
    }
    Ok((name.to_string(), params))
}

pub(crate) fn parse_type(src: &str) -> Result<ScriptType, String> {
    let src = src.trim();
    if src == "Tensor" {
        return Ok(ScriptType::Tensor);
    }
    let inner = src
        .strip_prefix("Tuple[")
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| format!("unknown type `{src}`"))?;
    if inner.trim() == "()" {
        return Ok(ScriptType::Tuple(Vec::new()));
    }
    split_top_level(inner)
        .into_iter()
        .map(parse_type)
        .collect::<Result<Vec<_>, _>>()
        .map(ScriptType::Tuple)
}

fn split_top_level(input: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in input.char_indices() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                pieces.push(input[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    let tail = input[start..].trim();
    if !tail.is_empty() {
        pieces.push(tail);
    }
    pieces
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn build_method(
    start: usize,
    name: String,
    params: Vec<Param>,
    body: Vec<(usize, String)>,
) -> Result<ScriptMethod, ScriptError> {
    let mut scope: HashMap<String, ScriptType> = params
        .iter()
        .map(|param| (param.name.clone(), param.ty.clone()))
        .collect();
    let mut statements = Vec::new();
    let mut ret: Option<(Expr, ScriptType)> = None;

    for (line_no, statement) in body {
        if ret.is_some() {
            return Err(ScriptError::at(line_no, "statement after `return`"));
        }
        if let Some(expr_src) = return_expr(&statement) {
            let expr = parse_expr(expr_src).map_err(|msg| ScriptError::at(line_no, msg))?;
            let ty = type_of(&expr, &scope).map_err(|msg| ScriptError::at(line_no, msg))?;
            ret = Some((expr, ty));
            continue;
        }
        let (target, expr_src) = statement
            .split_once('=')
            .ok_or_else(|| ScriptError::at(line_no, "statements must be `name = expr` or `return expr`"))?;
        let target = target.trim();
        if !is_identifier(target) {
            return Err(ScriptError::at(line_no, format!("invalid assignment target `{target}`")));
        }
        let expr = parse_expr(expr_src).map_err(|msg| ScriptError::at(line_no, msg))?;
        let ty = type_of(&expr, &scope).map_err(|msg| ScriptError::at(line_no, msg))?;
        scope.insert(target.to_string(), ty);
        statements.push((target.to_string(), expr));
    }

    let (ret, ret_ty) = ret.ok_or_else(|| {
        ScriptError::at(start, format!("method '{name}' has no `return` statement"))
    })?;
    Ok(ScriptMethod {
        name,
        params,
        body: statements,
        ret,
        ret_ty,
    })
}

fn return_expr(statement: &str) -> Option<&str> {
    let rest = statement.strip_prefix("return")?;
    (rest.is_empty() || rest.starts_with([' ', '('])).then_some(rest)
}

fn type_of(expr: &Expr, scope: &HashMap<String, ScriptType>) -> Result<ScriptType, String> {
    match expr {
        Expr::Var(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| format!("undefined value {name}")),
        Expr::Binary(op, lhs, rhs) => {
            for operand in [lhs, rhs] {
                let ty = type_of(operand, scope)?;
                if ty != ScriptType::Tensor {
                    return Err(format!(
                        "operator '{}' expects Tensor operands, found {ty}",
                        op.symbol()
                    ));
                }
            }
            Ok(ScriptType::Tensor)
        }
        Expr::Tuple(items) => items
            .iter()
            .map(|item| type_of(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(ScriptType::Tuple),
        Expr::Index(base, index) => match type_of(base, scope)? {
            ScriptType::Tuple(mut elements) if *index < elements.len() => {
                Ok(elements.swap_remove(*index))
            }
            ScriptType::Tuple(elements) => Err(format!(
                "tuple index {index} out of range for {}",
                ScriptType::Tuple(elements)
            )),
            ScriptType::Tensor => Err("indexing is only supported on tuples".to_string()),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(usize),
    Op(BinaryOp),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
}

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(idx, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = idx + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(src[start..end].to_string()));
            }
            c if c.is_ascii_digit() => {
                let mut end = start;
                while let Some(&(idx, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        end = idx + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = src[start..end]
                    .parse()
                    .map_err(|_| format!("integer literal `{}` is too large", &src[start..end]))?;
                tokens.push(Token::Int(value));
            }
            _ => {
                let token = match ch {
                    '+' => Token::Op(BinaryOp::Add),
                    '-' => Token::Op(BinaryOp::Sub),
                    '*' => Token::Op(BinaryOp::Mul),
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    other => return Err(format!("unexpected character `{other}`")),
                };
                tokens.push(token);
                chars.next();
            }
        }
    }
    Ok(tokens)
}

fn parse_expr(src: &str) -> Result<Expr, String> {
    let tokens = tokenize(src)?;
    if tokens.is_empty() {
        return Err("expected an expression".to_string());
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let expr = parser.additive()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected token {token:?}")),
    }
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected:?}, found {token:?}")),
            None => Err(format!("expected {expected:?}, found end of expression")),
        }
    }

    fn additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.multiplicative()?;
        while let Some(Token::Op(op @ (BinaryOp::Add | BinaryOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.postfix()?;
        while let Some(Token::Op(BinaryOp::Mul)) = self.peek() {
            self.pos += 1;
            let rhs = self.postfix()?;
            lhs = Expr::Binary(BinaryOp::Mul, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        while let Some(Token::LBracket) = self.peek() {
            self.pos += 1;
            let index = match self.next() {
                Some(Token::Int(index)) => index,
                other => return Err(format!("expected a tuple index, found {other:?}")),
            };
            self.expect(Token::RBracket)?;
            expr = Expr::Index(Box::new(expr), index);
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                if let Some(Token::RParen) = self.peek() {
                    self.pos += 1;
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.additive()?;
                if let Some(Token::RParen) = self.peek() {
                    self.pos += 1;
                    return Ok(first);
                }
                let mut items = vec![first];
                while let Some(Token::Comma) = self.peek() {
                    self.pos += 1;
                    if let Some(Token::RParen) = self.peek() {
                        break;
                    }
                    items.push(self.additive()?);
                }
                self.expect(Token::RParen)?;
                Ok(Expr::Tuple(items))
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

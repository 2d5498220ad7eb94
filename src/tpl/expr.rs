use crate::error::TemplateError;
use crate::lexer::{ExprToken, ExprTokenKind, TokenCursor};
use crate::utils::{interpret_integer, interpret_number};
use crate::value::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
    Range,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::NotIn => "not in",
            BinaryOp::Range => "..",
            BinaryOp::Concat => "~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "**",
        }
    }
}

/// Expression node graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Filter {
        input: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Test {
        input: Box<Expr>,
        name: String,
        negated: bool,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

fn write_list(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// Renders a fully parenthesised expression with the same evaluation order.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::Str(s)) => write!(f, "{:?}", s),
            Expr::Literal(Value::Null) => f.write_str("null"),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Var(name) => f.write_str(name),
            Expr::List(items) => {
                f.write_str("[")?;
                write_list(f, items)?;
                f.write_str("]")
            }
            Expr::Map(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                f.write_str("}")
            }
            Expr::Attr(target, name) => write!(f, "{}.{}", target, name),
            Expr::Index(target, index) => write!(f, "{}[{}]", target, index),
            Expr::Call { callee, args } => {
                write!(f, "{}(", callee)?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Filter { input, name, args } => {
                write!(f, "{}|{}(", input, name)?;
                write_list(f, args)?;
                f.write_str(")")
            }
            Expr::Test {
                input,
                name,
                negated,
            } => {
                let not = if *negated { "not " } else { "" };
                write!(f, "({} is {}{})", input, not, name)
            }
            Expr::Unary(UnaryOp::Not, e) => write!(f, "(not {})", e),
            Expr::Unary(UnaryOp::Neg, e) => write!(f, "(-{})", e),
            Expr::Unary(UnaryOp::Pos, e) => write!(f, "(+{})", e),
            Expr::Binary(op, l, r) => write!(f, "({} {} {})", l, op.symbol(), r),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => write!(f, "({} ? {} : {})", cond, then, otherwise),
        }
    }
}

/// 表达式解析器（递归下降）
///
/// Parses as much of the cursor as forms one expression and leaves the rest
/// for the caller, so tag handlers can continue with `as`, `with`, `only`...
pub struct ExpressionParser<'a> {
    tokens: &'a mut TokenCursor<ExprToken>,
}

impl<'a> ExpressionParser<'a> {
    pub fn new(tokens: &'a mut TokenCursor<ExprToken>) -> Self {
        Self { tokens }
    }

    /// Parses one expression; trailing tokens are a parse failure.
    pub fn parse_complete(mut self) -> Result<Expr, TemplateError> {
        let expr = self.parse_expression()?;
        if let Some(t) = self.tokens.peek() {
            return Err(TemplateError::syntax(format!(
                "Unexpected token '{}' after expression '{}'",
                t.value, expr
            )));
        }
        Ok(expr)
    }

    pub fn parse_expression(&mut self) -> Result<Expr, TemplateError> {
        self.parse_ternary()
    }

    fn parse_ternary(&mut self) -> Result<Expr, TemplateError> {
        let cond = self.parse_or()?;
        if !self.tokens.try_operator("?") {
            return Ok(cond);
        }
        let then = self.parse_ternary()?;
        self.tokens.expect_operator(":")?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_and()?;
        while self.tokens.try_id("or") {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_not()?;
        while self.tokens.try_id("and") {
            let right = self.parse_not()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, TemplateError> {
        if self.tokens.try_id("not") {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn comparison_op(&self) -> Option<(BinaryOp, usize)> {
        let token = self.tokens.peek()?;
        let op = match (token.kind, token.value.as_str()) {
            (ExprTokenKind::Operator, "==") => BinaryOp::Eq,
            (ExprTokenKind::Operator, "!=") => BinaryOp::Ne,
            (ExprTokenKind::Operator, "<") => BinaryOp::Lt,
            (ExprTokenKind::Operator, ">") => BinaryOp::Gt,
            (ExprTokenKind::Operator, "<=") => BinaryOp::Le,
            (ExprTokenKind::Operator, ">=") => BinaryOp::Ge,
            (ExprTokenKind::Id, "in") => BinaryOp::In,
            (ExprTokenKind::Id, "not") if self.tokens.peek_at(1).is_some_and(|t| t.is_id("in")) => {
                return Some((BinaryOp::NotIn, 2));
            }
            _ => return None,
        };
        Some((op, 1))
    }

    fn parse_comparison(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_range()?;
        loop {
            if self.tokens.try_id("is") {
                let negated = self.tokens.try_id("not");
                let name = self.tokens.expect_id()?;
                left = Expr::Test {
                    input: Box::new(left),
                    name,
                    negated,
                };
                continue;
            }
            let Some((op, width)) = self.comparison_op() else {
                return Ok(left);
            };
            for _ in 0..width {
                self.tokens.read();
            }
            let right = self.parse_range()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_range(&mut self) -> Result<Expr, TemplateError> {
        let left = self.parse_concat()?;
        if self.tokens.try_operator("..") {
            let right = self.parse_concat()?;
            return Ok(Expr::Binary(BinaryOp::Range, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_additive()?;
        while self.tokens.try_operator("~") {
            let right = self.parse_additive()?;
            left = Expr::Binary(BinaryOp::Concat, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.tokens.try_operator("+") {
                BinaryOp::Add
            } else if self.tokens.try_operator("-") {
                BinaryOp::Sub
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, TemplateError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.tokens.try_operator("*") {
                BinaryOp::Mul
            } else if self.tokens.try_operator("//") {
                BinaryOp::FloorDiv
            } else if self.tokens.try_operator("/") {
                BinaryOp::Div
            } else if self.tokens.try_operator("%") {
                BinaryOp::Rem
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, TemplateError> {
        if self.tokens.try_operator("-") {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
        }
        if self.tokens.try_operator("+") {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnaryOp::Pos, Box::new(inner)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, TemplateError> {
        let base = self.parse_postfix()?;
        if self.tokens.try_operator("**") {
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.tokens.try_operator(".") {
                let name = match self.tokens.read() {
                    Some(t) if matches!(t.kind, ExprTokenKind::Id | ExprTokenKind::Number) => t.value,
                    Some(t) => {
                        return Err(TemplateError::syntax(format!(
                            "Expected an attribute name after '.' but found '{}'",
                            t.value
                        )));
                    }
                    None => {
                        return Err(TemplateError::syntax("Expected an attribute name after '.'"));
                    }
                };
                expr = Expr::Attr(Box::new(expr), name);
            } else if self.tokens.try_operator("[") {
                let index = self.parse_expression()?;
                self.tokens.expect_operator("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.tokens.try_operator("(") {
                let args = self.parse_arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.tokens.try_operator("|") {
                let name = self.tokens.expect_id()?;
                let args = if self.tokens.try_operator("(") {
                    self.parse_arguments()?
                } else {
                    Vec::new()
                };
                expr = Expr::Filter {
                    input: Box::new(expr),
                    name,
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Parses `a, b, c)` after the opening parenthesis.
    fn parse_arguments(&mut self) -> Result<Vec<Expr>, TemplateError> {
        self.parse_sequence_until(")")
    }

    fn parse_sequence_until(&mut self, close: &str) -> Result<Vec<Expr>, TemplateError> {
        let mut items = Vec::new();
        while !self.tokens.try_operator(close) {
            items.push(self.parse_expression()?);
            if !self.tokens.try_operator(",") {
                self.tokens.expect_operator(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn parse_primary(&mut self) -> Result<Expr, TemplateError> {
        let token = self
            .tokens
            .read()
            .ok_or_else(|| TemplateError::syntax("Unexpected end of expression"))?;
        match token.kind {
            ExprTokenKind::Number => parse_number(&token.value).map(Expr::Literal),
            ExprTokenKind::String => Ok(Expr::Literal(Value::Str(token.value))),
            ExprTokenKind::Id => Ok(match token.value.as_str() {
                "true" | "TRUE" => Expr::Literal(Value::Bool(true)),
                "false" | "FALSE" => Expr::Literal(Value::Bool(false)),
                "null" | "none" | "NULL" | "NONE" => Expr::Literal(Value::Null),
                _ => Expr::Var(token.value),
            }),
            ExprTokenKind::Operator => match token.value.as_str() {
                "(" => {
                    let inner = self.parse_expression()?;
                    self.tokens.expect_operator(")")?;
                    Ok(inner)
                }
                "[" => self.parse_sequence_until("]").map(Expr::List),
                "{" => self.parse_map(),
                other => Err(TemplateError::syntax(format!(
                    "Unexpected token '{}' in expression",
                    other
                ))),
            },
        }
    }

    fn parse_map(&mut self) -> Result<Expr, TemplateError> {
        let mut pairs = Vec::new();
        while !self.tokens.try_operator("}") {
            let key = match self.tokens.read() {
                Some(t) if matches!(t.kind, ExprTokenKind::Id | ExprTokenKind::String) => {
                    Expr::Literal(Value::Str(t.value))
                }
                Some(t) if t.kind == ExprTokenKind::Number => Expr::Literal(parse_number(&t.value)?),
                Some(t) if t.is_operator("(") => {
                    let key = self.parse_expression()?;
                    self.tokens.expect_operator(")")?;
                    key
                }
                Some(t) => {
                    return Err(TemplateError::syntax(format!(
                        "Invalid map key '{}'",
                        t.value
                    )));
                }
                None => return Err(TemplateError::syntax("Unterminated map literal")),
            };
            self.tokens.expect_operator(":")?;
            let value = self.parse_expression()?;
            pairs.push((key, value));
            if !self.tokens.try_operator(",") {
                self.tokens.expect_operator("}")?;
                break;
            }
        }
        Ok(Expr::Map(pairs))
    }
}

fn parse_number(text: &str) -> Result<Value, TemplateError> {
    let value = if text.contains('.') {
        interpret_number(text, None).map(Value::F64)
    } else {
        interpret_integer(text, None).map(Value::I64)
    };
    value.ok_or_else(|| TemplateError::syntax(format!("Invalid number literal '{}'", text)))
}

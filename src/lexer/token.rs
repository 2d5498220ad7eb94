#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprTokenKind {
    Id,
    Number,
    String,
    Operator,
}

/// A token from inside `{{ ... }}` or `{% ... %}`.
///
/// `value` holds the identifier, the raw number literal, the unescaped string
/// contents or the operator text. `offset` is the byte offset in the template.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprToken {
    pub kind: ExprTokenKind,
    pub value: String,
    pub offset: usize,
}

impl ExprToken {
    pub fn new(kind: ExprTokenKind, value: impl Into<String>, offset: usize) -> Self {
        Self {
            kind,
            value: value.into(),
            offset,
        }
    }

    pub fn is_id(&self, id: &str) -> bool {
        self.kind == ExprTokenKind::Id && self.value == id
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == ExprTokenKind::Operator && self.value == op
    }
}

/// Top-level template token. Nested sequences are fully tokenized.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateToken {
    Text(String),
    Expression(Vec<ExprToken>),
    Block(Vec<ExprToken>),
}

impl TemplateToken {
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateToken::Text(_) => "text",
            TemplateToken::Expression(_) => "expression",
            TemplateToken::Block(_) => "block",
        }
    }
}

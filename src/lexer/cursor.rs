use crate::error::TemplateError;
use crate::lexer::token::{ExprToken, ExprTokenKind};
use std::collections::VecDeque;

/// Positional read/peek cursor over a token sequence.
///
/// Tokens are consumed from the front; once the cursor is exhausted it stays
/// exhausted.
#[derive(Debug, Clone)]
pub struct TokenCursor<T> {
    tokens: VecDeque<T>,
}

impl<T> TokenCursor<T> {
    pub fn new(tokens: Vec<T>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }

    pub fn has_more(&self) -> bool {
        !self.tokens.is_empty()
    }

    pub fn peek(&self) -> Option<&T> {
        self.tokens.front()
    }

    /// Looks `n` tokens ahead without consuming.
    pub fn peek_at(&self, n: usize) -> Option<&T> {
        self.tokens.get(n)
    }

    pub fn read(&mut self) -> Option<T> {
        self.tokens.pop_front()
    }

    /// Drains the remaining tokens into a new cursor.
    pub fn take_rest(&mut self) -> TokenCursor<T> {
        TokenCursor {
            tokens: std::mem::take(&mut self.tokens),
        }
    }
}

impl TokenCursor<ExprToken> {
    pub fn peek_is_id(&self, id: &str) -> bool {
        self.peek().is_some_and(|t| t.is_id(id))
    }

    pub fn peek_is_operator(&self, op: &str) -> bool {
        self.peek().is_some_and(|t| t.is_operator(op))
    }

    /// Consumes the next token if it is the identifier `id`.
    pub fn try_id(&mut self, id: &str) -> bool {
        if self.peek_is_id(id) {
            self.read();
            true
        } else {
            false
        }
    }

    /// Consumes the next token if it is the operator `op`.
    pub fn try_operator(&mut self, op: &str) -> bool {
        if self.peek_is_operator(op) {
            self.read();
            true
        } else {
            false
        }
    }

    pub fn expect_id(&mut self) -> Result<String, TemplateError> {
        match self.read() {
            Some(t) if t.kind == ExprTokenKind::Id => Ok(t.value),
            Some(t) => Err(TemplateError::syntax(format!(
                "Expected an identifier but found '{}'",
                t.value
            ))),
            None => Err(TemplateError::syntax(
                "Expected an identifier but reached the end of the tag",
            )),
        }
    }

    pub fn expect_operator(&mut self, op: &str) -> Result<(), TemplateError> {
        match self.read() {
            Some(t) if t.is_operator(op) => Ok(()),
            Some(t) => Err(TemplateError::syntax(format!(
                "Expected '{}' but found '{}'",
                op, t.value
            ))),
            None => Err(TemplateError::syntax(format!(
                "Expected '{}' but reached the end of the tag",
                op
            ))),
        }
    }

    /// Fails when tokens are left over in a tag named `tag`.
    pub fn expect_end(&self, tag: &str) -> Result<(), TemplateError> {
        match self.peek() {
            None => Ok(()),
            Some(t) => Err(TemplateError::syntax(format!(
                "Unexpected token '{}' in tag '{}'",
                t.value, tag
            ))),
        }
    }
}

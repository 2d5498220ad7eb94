mod cursor;
mod token;
mod tokenizer;

pub use cursor::TokenCursor;
pub use token::{ExprToken, ExprTokenKind, TemplateToken};
pub use tokenizer::{tokenize, tokenize_expression};

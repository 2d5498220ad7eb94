use thiserror::Error;

/// Represents errors that can occur while compiling or rendering templates.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Tokenization error at line {line}, column {column}: {message}")]
    Tokenize {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("Syntax error: {0}")]
    Syntax(String),
    /// 生成的程序无法加载，附带完整的程序清单以便诊断
    #[error("Failed to load template program '{name}': {message}\n{text}")]
    Load {
        name: String,
        message: String,
        text: String,
    },
    #[error("Template not found: {0}")]
    NotFound(String),
    #[error("Failed to read template '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Render error: {0}")]
    Render(String),
    #[error("Value error: {0}")]
    Value(String),
}

impl TemplateError {
    pub(crate) fn syntax(msg: impl Into<String>) -> Self {
        TemplateError::Syntax(msg.into())
    }

    pub(crate) fn render(msg: impl Into<String>) -> Self {
        TemplateError::Render(msg.into())
    }
}

impl serde::ser::Error for TemplateError {
    fn custom<T: std::fmt::Display>(msg: T) -> Self {
        TemplateError::Value(msg.to_string())
    }
}

use crate::error::TemplateError;
use crate::lexer::{ExprToken, TemplateToken, TokenCursor};
use crate::tpl::builtin_tags;
use crate::tpl::engine::TemplateEngine;
use crate::tpl::segments::SegmentAccumulator;
use std::collections::HashMap;
use std::sync::Arc;

/// The tag that ended a nested body, with whatever followed its name
/// (`elseif cond`, `endblock name`...).
#[derive(Debug)]
pub struct Terminator {
    pub tag: String,
    pub args: TokenCursor<ExprToken>,
}

/// Result of the generic parse loop and of every tag handler.
///
/// `terminator` is set when the loop stopped on a tag it does not own; the
/// handler that issued the recursive call inspects it. `has_remaining`
/// records whether tokens were left in the enclosing cursor at that point.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    pub terminator: Option<Terminator>,
    pub has_remaining: bool,
}

impl ParseOutcome {
    /// The handler consumed its tag; the enclosing loop keeps going.
    pub fn proceed() -> Self {
        Self::default()
    }

    /// Ends the enclosing body on `tag`.
    pub fn terminate(tag: &str, args: TokenCursor<ExprToken>) -> Self {
        Self {
            terminator: Some(Terminator {
                tag: tag.to_string(),
                args,
            }),
            has_remaining: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator.is_some()
    }
}

/// 标签处理器：决定有多少 token 属于自己，以及自己的结束标签
pub trait TagHandler: Send + Sync {
    fn handle(
        &self,
        tag: &str,
        engine: &TemplateEngine,
        acc: &mut SegmentAccumulator,
        tokens: &mut TokenCursor<TemplateToken>,
        args: &mut TokenCursor<ExprToken>,
    ) -> Result<ParseOutcome, TemplateError>;
}

impl<F> TagHandler for F
where
    F: Fn(
            &str,
            &TemplateEngine,
            &mut SegmentAccumulator,
            &mut TokenCursor<TemplateToken>,
            &mut TokenCursor<ExprToken>,
        ) -> Result<ParseOutcome, TemplateError>
        + Send
        + Sync,
{
    fn handle(
        &self,
        tag: &str,
        engine: &TemplateEngine,
        acc: &mut SegmentAccumulator,
        tokens: &mut TokenCursor<TemplateToken>,
        args: &mut TokenCursor<ExprToken>,
    ) -> Result<ParseOutcome, TemplateError> {
        self(tag, engine, acc, tokens, args)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTag {
    If,
    For,
    Set,
    Block,
    Extends,
    Include,
    Macro,
    Import,
    From,
    /// Ends the enclosing body; see [`ParseOutcome::terminate`].
    Terminator,
}

impl TagHandler for BuiltinTag {
    fn handle(
        &self,
        tag: &str,
        engine: &TemplateEngine,
        acc: &mut SegmentAccumulator,
        tokens: &mut TokenCursor<TemplateToken>,
        args: &mut TokenCursor<ExprToken>,
    ) -> Result<ParseOutcome, TemplateError> {
        match self {
            BuiltinTag::If => builtin_tags::parse_if(engine, acc, tokens, args),
            BuiltinTag::For => builtin_tags::parse_for(engine, acc, tokens, args),
            BuiltinTag::Set => builtin_tags::parse_set(engine, acc, tokens, args),
            BuiltinTag::Block => builtin_tags::parse_block(engine, acc, tokens, args),
            BuiltinTag::Extends => builtin_tags::parse_extends(engine, acc, args),
            BuiltinTag::Include => builtin_tags::parse_include(engine, acc, args),
            BuiltinTag::Macro => builtin_tags::parse_macro(engine, acc, tokens, args),
            BuiltinTag::Import => builtin_tags::parse_import(engine, acc, args),
            BuiltinTag::From => builtin_tags::parse_from(engine, acc, args),
            BuiltinTag::Terminator => Ok(ParseOutcome::terminate(tag, args.take_rest())),
        }
    }
}

const BUILTIN_TAGS: [(&str, BuiltinTag); 17] = [
    ("if", BuiltinTag::If),
    ("for", BuiltinTag::For),
    ("set", BuiltinTag::Set),
    ("block", BuiltinTag::Block),
    ("extends", BuiltinTag::Extends),
    ("include", BuiltinTag::Include),
    ("macro", BuiltinTag::Macro),
    ("import", BuiltinTag::Import),
    ("from", BuiltinTag::From),
    ("elseif", BuiltinTag::Terminator),
    ("elif", BuiltinTag::Terminator),
    ("else", BuiltinTag::Terminator),
    ("endif", BuiltinTag::Terminator),
    ("endfor", BuiltinTag::Terminator),
    ("endset", BuiltinTag::Terminator),
    ("endblock", BuiltinTag::Terminator),
    ("endmacro", BuiltinTag::Terminator),
];

/// Tag identifier → handler. User extensions are looked up before built-ins,
/// so registering an existing name replaces it.
#[derive(Clone)]
pub struct TagRegistry {
    builtins: HashMap<&'static str, BuiltinTag>,
    custom: HashMap<String, Arc<dyn TagHandler>>,
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TagRegistry {
    pub fn new() -> Self {
        Self {
            builtins: BUILTIN_TAGS.into_iter().collect(),
            custom: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, handler: impl TagHandler + 'static) {
        self.custom.insert(name.to_string(), Arc::new(handler));
    }

    /// Registers `name` as a tag that only ends an enclosing body.
    pub fn register_terminator(&mut self, name: &str) {
        self.register(name, BuiltinTag::Terminator);
    }

    pub fn get(&self, name: &str) -> Option<&dyn TagHandler> {
        if let Some(handler) = self.custom.get(name) {
            return Some(handler.as_ref());
        }
        self.builtins
            .get(name)
            .map(|builtin| builtin as &dyn TagHandler)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.custom.contains_key(name) || self.builtins.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let mut registry = TagRegistry::new();
        assert!(registry.contains("if"));
        assert!(registry.contains("endmacro"));
        assert!(!registry.contains("bogus"));

        registry.register_terminator("endcache");
        assert!(registry.get("endcache").is_some());
    }

    #[test]
    fn test_outcome_constructors() {
        assert!(!ParseOutcome::proceed().is_terminated());
        let outcome = ParseOutcome::terminate("endif", TokenCursor::new(Vec::new()));
        assert_eq!(outcome.terminator.map(|t| t.tag), Some("endif".to_string()));
    }
}

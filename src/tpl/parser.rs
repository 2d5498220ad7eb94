use crate::error::TemplateError;
use crate::lexer::{ExprToken, TemplateToken, TokenCursor, tokenize};
use crate::tpl::engine::TemplateEngine;
use crate::tpl::expr::{Expr, ExpressionParser};
use crate::tpl::instr::Instr;
use crate::tpl::segments::SegmentAccumulator;
use crate::tpl::tags::{ParseOutcome, Terminator};
use crate::tpl::unit::Generated;
use tracing::{debug, trace};

impl TemplateEngine {
    /// Compiles template source into its segments and program listing.
    ///
    /// A terminator that reaches the root (`{% endif %}` with no open `if`)
    /// is a syntax error.
    pub fn compile_template_text(
        &self,
        source: &str,
        name: &str,
    ) -> Result<Generated, TemplateError> {
        let tokens = tokenize(source)?;
        trace!("Tokenized template '{}' into {} tokens", name, tokens.len());

        let mut tokens = TokenCursor::new(tokens);
        let mut acc = SegmentAccumulator::new();
        let outcome = self.parse_sequence(&mut acc, &mut tokens)?;
        if let Some(term) = outcome.terminator {
            return Err(TemplateError::syntax(format!(
                "Unexpected tag '{}' on template root",
                term.tag
            )));
        }

        let segments = acc.finish();
        let text = segments.listing(name);
        Ok(Generated {
            name: name.to_string(),
            text,
            segments,
        })
    }

    /// Drives the parse loop until the tokens run out or a handler reports a
    /// terminator, which is returned to the caller untouched.
    pub fn parse_sequence(
        &self,
        acc: &mut SegmentAccumulator,
        tokens: &mut TokenCursor<TemplateToken>,
    ) -> Result<ParseOutcome, TemplateError> {
        while let Some(token) = tokens.read() {
            match token {
                TemplateToken::Text(text) => acc.write(Instr::WriteText(text)),
                TemplateToken::Expression(expr_tokens) => {
                    self.parse_expression_token(acc, tokens, expr_tokens)?
                }
                TemplateToken::Block(block_tokens) => {
                    let mut outcome = self.parse_block_token(acc, tokens, block_tokens)?;
                    if outcome.is_terminated() {
                        outcome.has_remaining = tokens.has_more();
                        return Ok(outcome);
                    }
                }
            }
        }
        Ok(ParseOutcome::proceed())
    }

    /// `{{ expr }}`. Takes the enclosing stream like the other parse entry
    /// points, though an expression never consumes from it.
    pub fn parse_expression_token(
        &self,
        acc: &mut SegmentAccumulator,
        _tokens: &mut TokenCursor<TemplateToken>,
        expr_tokens: Vec<ExprToken>,
    ) -> Result<(), TemplateError> {
        let mut cursor = TokenCursor::new(expr_tokens);
        let expr = self.parse_expression(&mut cursor)?;
        acc.write(Instr::WriteExpr(expr));
        Ok(())
    }

    /// `{% tag args %}`: looks up the tag handler and hands it the rest of the
    /// stream.
    pub fn parse_block_token(
        &self,
        acc: &mut SegmentAccumulator,
        tokens: &mut TokenCursor<TemplateToken>,
        block_tokens: Vec<ExprToken>,
    ) -> Result<ParseOutcome, TemplateError> {
        let mut args = TokenCursor::new(block_tokens);
        let tag = match args.read() {
            Some(t) if t.kind == crate::lexer::ExprTokenKind::Id => t.value,
            Some(t) => {
                return Err(TemplateError::syntax(format!(
                    "Block expected a tag name as first token but found '{}'",
                    t.value
                )));
            }
            None => return Err(TemplateError::syntax("Empty block tag")),
        };

        let handler = self
            .tags
            .get(&tag)
            .ok_or_else(|| TemplateError::syntax(format!("Invalid block type '{}'", tag)))?;
        debug!("Parsing tag '{}'", tag);
        handler.handle(&tag, self, acc, tokens, &mut args)
    }

    /// Parses the whole of `args` as one expression.
    pub fn parse_expression(
        &self,
        args: &mut TokenCursor<ExprToken>,
    ) -> Result<Expr, TemplateError> {
        ExpressionParser::new(args).parse_complete()
    }

    /// Parses one expression from the front of `args`, leaving the rest.
    pub fn parse_expression_prefix(
        &self,
        args: &mut TokenCursor<ExprToken>,
    ) -> Result<Expr, TemplateError> {
        ExpressionParser::new(args).parse_expression()
    }

    /// Parses a nested body into a detached buffer and returns it together
    /// with the terminator that ended it, which must be one of `expected`.
    pub fn parse_body(
        &self,
        acc: &mut SegmentAccumulator,
        tokens: &mut TokenCursor<TemplateToken>,
        opener: &str,
        expected: &[&str],
    ) -> Result<(Vec<Instr>, Terminator), TemplateError> {
        let (body, outcome) = acc.capture(|acc| self.parse_sequence(acc, tokens))?;
        let term = expect_terminator(outcome, opener, expected)?;
        Ok((body, term))
    }

    /// Like [`parse_body`](Self::parse_body) but writes into the active
    /// segment.
    pub fn parse_until(
        &self,
        acc: &mut SegmentAccumulator,
        tokens: &mut TokenCursor<TemplateToken>,
        opener: &str,
        expected: &[&str],
    ) -> Result<Terminator, TemplateError> {
        let outcome = self.parse_sequence(acc, tokens)?;
        expect_terminator(outcome, opener, expected)
    }
}

fn expected_list(expected: &[&str]) -> String {
    expected
        .iter()
        .map(|tag| format!("'{}'", tag))
        .collect::<Vec<_>>()
        .join(" or ")
}

fn expect_terminator(
    outcome: ParseOutcome,
    opener: &str,
    expected: &[&str],
) -> Result<Terminator, TemplateError> {
    match outcome.terminator {
        Some(term) if expected.contains(&term.tag.as_str()) => Ok(term),
        Some(term) => Err(TemplateError::syntax(format!(
            "Unexpected tag '{}' inside '{}', expected {}",
            term.tag,
            opener,
            expected_list(expected)
        ))),
        None => Err(TemplateError::syntax(format!(
            "Unclosed tag '{}': expected {}",
            opener,
            expected_list(expected)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TemplateError;
    use crate::lexer::{TemplateToken, TokenCursor, tokenize, tokenize_expression};
    use crate::tpl::engine::TemplateEngine;
    use crate::tpl::segments::SegmentAccumulator;

    fn syntax_error(source: &str) -> String {
        match TemplateEngine::new().compile_template_text(source, "t") {
            Err(TemplateError::Syntax(msg)) => msg,
            other => panic!("Expected syntax error, got {:?}", other.map(|g| g.text)),
        }
    }

    #[test]
    fn test_plain_text_program() {
        let generated = TemplateEngine::new()
            .compile_template_text("Hello", "hello.html")
            .unwrap();
        assert_eq!(generated.name, "hello.html");
        assert!(generated.text.contains("template \"hello.html\""));
        assert!(generated.text.contains("write_text \"Hello\""));
        assert!(generated.text.contains("macros:"));
    }

    #[test]
    fn test_expression_program() {
        let generated = TemplateEngine::new()
            .compile_template_text("{{ 1 + 2 }}", "t")
            .unwrap();
        assert!(generated.text.contains("write_expr (1 + 2)"), "{}", generated.text);
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(syntax_error("{% bogus %}"), "Invalid block type 'bogus'");
    }

    #[test]
    fn test_terminator_on_root() {
        assert_eq!(
            syntax_error("{% endif %}"),
            "Unexpected tag 'endif' on template root"
        );
    }

    #[test]
    fn test_block_head_must_be_identifier() {
        assert!(syntax_error("{% 'x' %}").starts_with("Block expected a tag name"));
    }

    #[test]
    fn test_trailing_expression_tokens() {
        assert!(syntax_error("{{ a b }}").contains("Unexpected token 'b'"));
    }

    #[test]
    fn test_parse_sequence_reports_remaining() {
        let engine = TemplateEngine::new();
        let mut tokens = TokenCursor::new(tokenize("a{% endif %}b").unwrap());
        let mut acc = SegmentAccumulator::new();
        let outcome = engine.parse_sequence(&mut acc, &mut tokens).unwrap();
        assert_eq!(outcome.terminator.as_ref().map(|t| t.tag.as_str()), Some("endif"));
        assert!(outcome.has_remaining);

        let mut tokens = TokenCursor::new(tokenize("a{% endif %}").unwrap());
        let outcome = engine.parse_sequence(&mut acc, &mut tokens).unwrap();
        assert!(!outcome.has_remaining);
    }

    #[test]
    fn test_expression_token_leaves_enclosing_stream() {
        let engine = TemplateEngine::new();
        let mut tokens = TokenCursor::new(tokenize("after").unwrap());
        let mut acc = SegmentAccumulator::new();
        engine
            .parse_expression_token(&mut acc, &mut tokens, tokenize_expression("x ~ 1").unwrap())
            .unwrap();
        assert!(matches!(tokens.peek(), Some(TemplateToken::Text(t)) if t == "after"));
        assert_eq!(acc.main().len(), 1);
    }

    #[test]
    fn test_tokenize_error_passes_through() {
        assert!(matches!(
            TemplateEngine::new().compile_template_text("{{ a", "t"),
            Err(TemplateError::Tokenize { .. })
        ));
    }
}

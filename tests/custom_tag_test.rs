use stanza::lexer::{ExprToken, TemplateToken, TokenCursor};
use stanza::tpl::{CustomInstr, Instr, ParseOutcome, RenderContext, SegmentAccumulator};
use stanza::{MemoryTemplateProvider, TemplateEngine, TemplateError, Value};
use std::sync::Arc;

#[derive(Debug)]
struct UpperInstr {
    body: Vec<Instr>,
}

impl CustomInstr for UpperInstr {
    fn execute(&self, ctx: &mut RenderContext<'_>) -> Result<(), TemplateError> {
        let text = ctx.capture(|ctx| ctx.run(&self.body))?;
        ctx.write_literal(&text.to_uppercase());
        Ok(())
    }
}

/// `{% upper %}...{% endupper %}`
fn parse_upper(
    tag: &str,
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    tokens: &mut TokenCursor<TemplateToken>,
    args: &mut TokenCursor<ExprToken>,
) -> Result<ParseOutcome, TemplateError> {
    args.expect_end(tag)?;
    let (body, _) = engine.parse_body(acc, tokens, tag, &["endupper"])?;
    acc.write(Instr::Custom(Arc::new(UpperInstr { body })));
    Ok(ParseOutcome::proceed())
}

fn parse_stub_include(
    _tag: &str,
    _engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    _tokens: &mut TokenCursor<TemplateToken>,
    args: &mut TokenCursor<ExprToken>,
) -> Result<ParseOutcome, TemplateError> {
    let _ = args.take_rest();
    acc.write(Instr::WriteText("[include]".to_string()));
    Ok(ParseOutcome::proceed())
}

#[test]
fn test_extension_tag_with_body() {
    let engine = TemplateEngine::builder()
        .tag("upper", parse_upper)
        .terminator("endupper")
        .build();
    let out = engine
        .render_inline(
            "a {% upper %}b {{ name }}{% if x %}!{% endif %}{% endupper %} c",
            &serde_json::json!({ "name": "ann", "x": true }),
        )
        .unwrap();
    assert_eq!(out, "a B ANN! c");
}

#[test]
fn test_extension_tag_inside_block_of_child() {
    let provider = MemoryTemplateProvider::new()
        .with("base.html", "[{% block body %}{% endblock %}]")
        .with(
            "child.html",
            "{% extends 'base.html' %}{% block body %}{% upper %}loud{% endupper %}{% endblock %}",
        );
    let engine = TemplateEngine::builder()
        .provider(Arc::new(provider))
        .tag("upper", parse_upper)
        .terminator("endupper")
        .build();
    assert_eq!(
        engine.render_to_string("child.html", Value::Null).unwrap(),
        "[LOUD]"
    );
}

#[test]
fn test_unregistered_terminator_is_rejected() {
    let engine = TemplateEngine::builder().tag("upper", parse_upper).build();
    match engine.render_inline_to_string("{% upper %}x{% endupper %}", Value::Null) {
        Err(TemplateError::Syntax(msg)) => assert!(msg.contains("endupper"), "{}", msg),
        other => panic!("Expected syntax error, got {:?}", other),
    }
}

#[test]
fn test_unclosed_extension_tag() {
    let engine = TemplateEngine::builder()
        .tag("upper", parse_upper)
        .terminator("endupper")
        .build();
    assert!(matches!(
        engine.render_inline_to_string("{% upper %}x", Value::Null),
        Err(TemplateError::Syntax(_))
    ));
}

#[test]
fn test_extension_replaces_builtin() {
    let engine = TemplateEngine::builder()
        .tag("include", parse_stub_include)
        .build();
    assert_eq!(
        engine
            .render_inline_to_string("a{% include 'missing.html' %}b", Value::Null)
            .unwrap(),
        "a[include]b"
    );
}

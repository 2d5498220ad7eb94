//! Built-in tags. Each handler owns its slice of the token stream and learns
//! where its body ends from the terminator returned by the parse loop.

use crate::error::TemplateError;
use crate::lexer::{ExprToken, TemplateToken, TokenCursor};
use crate::tpl::engine::TemplateEngine;
use crate::tpl::instr::Instr;
use crate::tpl::segments::SegmentAccumulator;
use crate::tpl::tags::{ParseOutcome, Terminator};

type Tokens = TokenCursor<TemplateToken>;
type Args = TokenCursor<ExprToken>;

/// `{% endblock name %}` / `{% endmacro name %}` may repeat the opening name.
fn check_closing_name(mut term: Terminator, name: &str) -> Result<(), TemplateError> {
    if let Some(closing) = term.args.read() {
        if closing.value != name {
            return Err(TemplateError::syntax(format!(
                "Expected '{} {}' but found '{} {}'",
                term.tag, name, term.tag, closing.value
            )));
        }
    }
    term.args.expect_end(&term.tag)
}

pub(crate) fn parse_if(
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    tokens: &mut Tokens,
    args: &mut Args,
) -> Result<ParseOutcome, TemplateError> {
    let mut cond = engine.parse_expression(args)?;
    let mut branches = Vec::new();
    let mut otherwise = Vec::new();

    loop {
        let (body, mut term) =
            engine.parse_body(acc, tokens, "if", &["elseif", "elif", "else", "endif"])?;
        branches.push((cond, body));
        match term.tag.as_str() {
            "endif" => {
                term.args.expect_end("endif")?;
                break;
            }
            "else" => {
                term.args.expect_end("else")?;
                let (body, term) = engine.parse_body(acc, tokens, "if", &["endif"])?;
                term.args.expect_end("endif")?;
                otherwise = body;
                break;
            }
            _ => cond = engine.parse_expression(&mut term.args)?,
        }
    }

    acc.write(Instr::If {
        branches,
        otherwise,
    });
    Ok(ParseOutcome::proceed())
}

pub(crate) fn parse_for(
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    tokens: &mut Tokens,
    args: &mut Args,
) -> Result<ParseOutcome, TemplateError> {
    let first = args.expect_id()?;
    let (key, value) = if args.try_operator(",") {
        (Some(first), args.expect_id()?)
    } else {
        (None, first)
    };
    if !args.try_id("in") {
        return Err(TemplateError::syntax("Expected 'in' in 'for' tag"));
    }
    let iterable = engine.parse_expression(args)?;

    let (body, term) = engine.parse_body(acc, tokens, "for", &["else", "endfor"])?;
    term.args.expect_end(&term.tag)?;
    let otherwise = if term.tag == "else" {
        let (otherwise, term) = engine.parse_body(acc, tokens, "for", &["endfor"])?;
        term.args.expect_end("endfor")?;
        otherwise
    } else {
        Vec::new()
    };

    acc.write(Instr::For {
        key,
        value,
        iterable,
        body,
        otherwise,
    });
    Ok(ParseOutcome::proceed())
}

pub(crate) fn parse_set(
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    tokens: &mut Tokens,
    args: &mut Args,
) -> Result<ParseOutcome, TemplateError> {
    let name = args.expect_id()?;
    if args.try_operator("=") {
        let value = engine.parse_expression(args)?;
        acc.write(Instr::Set { name, value });
        return Ok(ParseOutcome::proceed());
    }

    args.expect_end("set")?;
    let (body, term) = engine.parse_body(acc, tokens, "set", &["endset"])?;
    term.args.expect_end("endset")?;
    acc.write(Instr::Capture { name, body });
    Ok(ParseOutcome::proceed())
}

/// `{% block name %}...{% endblock %}` writes a call into the active segment
/// and the body into the block segment of the same name.
pub(crate) fn parse_block(
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    tokens: &mut Tokens,
    args: &mut Args,
) -> Result<ParseOutcome, TemplateError> {
    let name = args.expect_id()?;
    acc.write(Instr::CallBlock(name.clone()));

    acc.with_block(&name, |acc| {
        if args.has_more() {
            let expr = engine.parse_expression(args)?;
            acc.write(Instr::WriteExpr(expr));
            return Ok(());
        }
        let term = engine.parse_until(acc, tokens, "block", &["endblock"])?;
        check_closing_name(term, &name)
    })?;
    Ok(ParseOutcome::proceed())
}

pub(crate) fn parse_extends(
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    args: &mut Args,
) -> Result<ParseOutcome, TemplateError> {
    let parent = engine.parse_expression(args)?;
    acc.write(Instr::Extends(parent));
    Ok(ParseOutcome::proceed())
}

pub(crate) fn parse_include(
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    args: &mut Args,
) -> Result<ParseOutcome, TemplateError> {
    let template = engine.parse_expression_prefix(args)?;
    let ignore_missing = args.try_id("ignore");
    if ignore_missing && !args.try_id("missing") {
        return Err(TemplateError::syntax("Expected 'missing' after 'ignore'"));
    }
    let with = if args.try_id("with") {
        Some(engine.parse_expression_prefix(args)?)
    } else {
        None
    };
    let only = args.try_id("only");
    args.expect_end("include")?;

    acc.write(Instr::Include {
        template,
        with,
        only,
        ignore_missing,
    });
    Ok(ParseOutcome::proceed())
}

pub(crate) fn parse_macro(
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    tokens: &mut Tokens,
    args: &mut Args,
) -> Result<ParseOutcome, TemplateError> {
    let name = args.expect_id()?;
    let mut params = Vec::new();
    if args.try_operator("(") {
        while !args.try_operator(")") {
            let param = args.expect_id()?;
            let default = if args.try_operator("=") {
                Some(engine.parse_expression_prefix(args)?)
            } else {
                None
            };
            params.push((param, default));
            if !args.try_operator(",") {
                args.expect_operator(")")?;
                break;
            }
        }
    }
    args.expect_end("macro")?;

    acc.set_macro_params(&name, params);
    acc.with_macro(&name, |acc| {
        let term = engine.parse_until(acc, tokens, "macro", &["endmacro"])?;
        check_closing_name(term, &name)
    })?;
    Ok(ParseOutcome::proceed())
}

pub(crate) fn parse_import(
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    args: &mut Args,
) -> Result<ParseOutcome, TemplateError> {
    let template = engine.parse_expression_prefix(args)?;
    if !args.try_id("as") {
        return Err(TemplateError::syntax("Expected 'as' in 'import' tag"));
    }
    let alias = args.expect_id()?;
    args.expect_end("import")?;

    acc.write(Instr::Import { template, alias });
    Ok(ParseOutcome::proceed())
}

pub(crate) fn parse_from(
    engine: &TemplateEngine,
    acc: &mut SegmentAccumulator,
    args: &mut Args,
) -> Result<ParseOutcome, TemplateError> {
    let template = engine.parse_expression_prefix(args)?;
    if !args.try_id("import") {
        return Err(TemplateError::syntax("Expected 'import' in 'from' tag"));
    }
    let mut names = Vec::new();
    loop {
        let name = args.expect_id()?;
        let alias = if args.try_id("as") {
            args.expect_id()?
        } else {
            name.clone()
        };
        names.push((name, alias));
        if !args.try_operator(",") {
            break;
        }
    }
    args.expect_end("from")?;

    acc.write(Instr::FromImport { template, names });
    Ok(ParseOutcome::proceed())
}

#[cfg(test)]
mod tests {
    use crate::error::TemplateError;
    use crate::tpl::engine::TemplateEngine;
    use crate::tpl::instr::Instr;

    fn compile_err(source: &str) -> String {
        match TemplateEngine::new().compile_template_text(source, "test") {
            Err(TemplateError::Syntax(msg)) => msg,
            other => panic!("Expected syntax error, got {:?}", other.map(|g| g.text)),
        }
    }

    #[test]
    fn test_if_branches() {
        let generated = TemplateEngine::new()
            .compile_template_text("{% if a %}1{% elseif b %}2{% else %}3{% endif %}", "t")
            .unwrap();
        match &generated.segments.main[0] {
            Instr::If {
                branches,
                otherwise,
            } => {
                assert_eq!(branches.len(), 2);
                assert_eq!(otherwise.len(), 1);
            }
            other => panic!("Expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_unclosed_tags() {
        assert!(compile_err("{% if a %}open").contains("Unclosed tag 'if'"));
        assert!(compile_err("{% for x in y %}open").contains("endfor"));
        assert!(compile_err("{% block a %}open").contains("endblock"));
    }

    #[test]
    fn test_mismatched_terminators() {
        let msg = compile_err("{% if a %}x{% endfor %}");
        assert!(msg.contains("endfor"), "{}", msg);
        let msg = compile_err("{% block a %}x{% endblock b %}");
        assert!(msg.contains("endblock a"), "{}", msg);
        let msg = compile_err("{% if a %}x{% else %}y{% elseif b %}z{% endif %}");
        assert!(msg.contains("elseif"), "{}", msg);
    }

    #[test]
    fn test_block_shorthand_and_nesting() {
        let generated = TemplateEngine::new()
            .compile_template_text(
                "{% block title 'Home' %}{% block body %}{% block inner %}i{% endblock %}{% endblock body %}",
                "t",
            )
            .unwrap();
        let segments = &generated.segments;
        assert_eq!(segments.main.len(), 2);
        assert_eq!(segments.blocks["title"].len(), 1);
        assert!(matches!(&segments.blocks["body"][0], Instr::CallBlock(name) if name == "inner"));
        assert_eq!(segments.blocks["inner"].len(), 1);
    }

    #[test]
    fn test_macro_signature() {
        let generated = TemplateEngine::new()
            .compile_template_text(
                "{% macro input(name, type = 'text') %}<input>{% endmacro input %}",
                "t",
            )
            .unwrap();
        let def = &generated.segments.macros["input"];
        assert_eq!(def.params.len(), 2);
        assert_eq!(def.signature(), "name, type = \"text\"");
        assert!(generated.segments.main.is_empty());
    }

    #[test]
    fn test_include_and_imports() {
        let generated = TemplateEngine::new()
            .compile_template_text(
                "{% include 'a.html' ignore missing with {x: 1} only %}{% import 'f.html' as f %}{% from _self import m as n, k %}",
                "t",
            )
            .unwrap();
        assert!(matches!(
            &generated.segments.main[0],
            Instr::Include { with: Some(_), only: true, ignore_missing: true, .. }
        ));
        assert!(matches!(&generated.segments.main[1], Instr::Import { alias, .. } if alias == "f"));
        match &generated.segments.main[2] {
            Instr::FromImport { names, .. } => assert_eq!(
                names,
                &vec![("m".to_string(), "n".to_string()), ("k".to_string(), "k".to_string())]
            ),
            other => panic!("Expected FromImport, got {:?}", other),
        }
    }
}

use crate::error::TemplateError;
use crate::tpl::cache::CacheEntry;
use crate::tpl::instr::{Instr, MacroDef};
use crate::tpl::render_context::RenderContext;
use crate::tpl::segments::Segments;
use crate::value::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};

/// Output of compilation: the program listing plus the segments it lists.
#[derive(Debug, Clone)]
pub struct Generated {
    pub name: String,
    pub text: String,
    pub segments: Segments,
}

impl Generated {
    /// Loads the program into an executable unit.
    ///
    /// A program that fails validation is reported with its full listing.
    pub fn load(self) -> Result<CacheEntry, TemplateError> {
        if let Err(message) = validate(&self.segments) {
            error!(
                "Failed to load template program '{}': {}\n{}",
                self.name, message, self.text
            );
            return Err(TemplateError::Load {
                name: self.name,
                message,
                text: self.text,
            });
        }

        info!("Loaded template '{}'", self.name);
        let unit = CompiledUnit {
            name: self.name,
            main: self.segments.main,
            blocks: self.segments.blocks,
            macros: self.segments.macros,
        };
        Ok(CacheEntry {
            text: self.text,
            unit: Arc::new(unit),
        })
    }
}

fn contains_extends(instrs: &[Instr]) -> bool {
    instrs.iter().any(|instr| match instr {
        Instr::Extends(_) => true,
        Instr::If {
            branches,
            otherwise,
        } => branches.iter().any(|(_, body)| contains_extends(body)) || contains_extends(otherwise),
        Instr::For {
            body, otherwise, ..
        } => contains_extends(body) || contains_extends(otherwise),
        Instr::Capture { body, .. } => contains_extends(body),
        _ => false,
    })
}

fn validate(segments: &Segments) -> Result<(), String> {
    for (name, body) in &segments.blocks {
        if contains_extends(body) {
            return Err(format!("'extends' is not allowed inside block '{}'", name));
        }
    }
    for (name, def) in &segments.macros {
        if contains_extends(&def.body) {
            return Err(format!("'extends' is not allowed inside macro '{}'", name));
        }
        let mut seen = HashSet::new();
        for (param, _) in &def.params {
            if !seen.insert(param.as_str()) {
                return Err(format!(
                    "Duplicate parameter '{}' in macro '{}'",
                    param, name
                ));
            }
        }
    }
    Ok(())
}

/// 已加载的模板：主程序、块与宏
#[derive(Debug)]
pub struct CompiledUnit {
    name: String,
    main: Vec<Instr>,
    blocks: BTreeMap<String, Vec<Instr>>,
    macros: BTreeMap<String, MacroDef>,
}

impl CompiledUnit {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn main(&self) -> &[Instr] {
        &self.main
    }

    pub fn has_block(&self, name: &str) -> bool {
        self.blocks.contains_key(name)
    }

    pub fn block(&self, name: &str) -> Option<&[Instr]> {
        self.blocks.get(name).map(Vec::as_slice)
    }

    pub fn get_macro(&self, name: &str) -> Option<&MacroDef> {
        self.macros.get(name)
    }

    pub fn macro_names(&self) -> impl Iterator<Item = &str> {
        self.macros.keys().map(String::as_str)
    }

    /// Entry point: makes this unit the current template, runs `main` and
    /// restores the caller's template chain afterwards.
    pub fn render(self: &Arc<Self>, ctx: &mut RenderContext<'_>) -> Result<(), TemplateError> {
        ctx.with_current_template(self.clone(), |ctx| {
            ctx.with_owner(self.clone(), |ctx| ctx.run(&self.main))
        })
    }

    /// Runs this unit's own definition of block `name` with it pushed as the
    /// current block. Each call counts towards the nesting depth.
    pub fn call_block(
        self: &Arc<Self>,
        ctx: &mut RenderContext<'_>,
        name: &str,
    ) -> Result<(), TemplateError> {
        let body = self.block(name).ok_or_else(|| {
            TemplateError::render(format!("Block '{}' not found in '{}'", name, self.name))
        })?;
        ctx.descend(|ctx| {
            ctx.with_current_block(self.clone(), name, |ctx| {
                ctx.with_owner(self.clone(), |ctx| ctx.run(body))
            })
        })
    }

    /// Invokes macro `name` in an isolated scope holding only its parameters
    /// and returns its output.
    pub fn call_macro(
        self: &Arc<Self>,
        ctx: &mut RenderContext<'_>,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Value, TemplateError> {
        let def = self.get_macro(name).ok_or_else(|| {
            TemplateError::render(format!("Macro '{}' not found in '{}'", name, self.name))
        })?;

        ctx.descend(|ctx| {
            ctx.with_isolated_scope(|ctx| {
                let mut args = args.into_iter();
                for (param, default) in &def.params {
                    let value = match (args.next(), default) {
                        (Some(arg), _) => arg,
                        (None, Some(default)) => ctx.eval(default)?,
                        (None, None) => Value::Null,
                    };
                    ctx.scope_mut().push(param, value);
                }
                let output =
                    ctx.capture(|ctx| ctx.with_owner(self.clone(), |ctx| ctx.run(&def.body)))?;
                Ok(Value::Str(output))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TemplateError;
    use crate::tpl::engine::TemplateEngine;

    fn load(source: &str) -> Result<(), TemplateError> {
        TemplateEngine::new()
            .compile_template_text(source, "t")?
            .load()
            .map(|_| ())
    }

    #[test]
    fn test_load_keeps_listing() {
        let engine = TemplateEngine::new();
        let entry = engine
            .compile_template_text("{% block a %}x{% endblock %}", "page.html")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(entry.unit.name(), "page.html");
        assert!(entry.unit.has_block("a"));
        assert!(entry.text.contains("block a:"));
    }

    #[test]
    fn test_extends_inside_block_fails_to_load() {
        match load("{% block a %}{% if x %}{% extends 'b' %}{% endif %}{% endblock %}") {
            Err(TemplateError::Load { message, text, .. }) => {
                assert!(message.contains("block 'a'"));
                assert!(text.contains("extends \"b\""));
            }
            other => panic!("Expected load error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_macro_param_fails_to_load() {
        assert!(matches!(
            load("{% macro m(a, a) %}{% endmacro %}"),
            Err(TemplateError::Load { .. })
        ));
    }
}

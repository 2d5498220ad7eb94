use crate::error::TemplateError;
use crate::tpl::expr::{BinaryOp, Expr, UnaryOp};
use crate::tpl::functions;
use crate::tpl::instr::Instr;
use crate::tpl::render_context::{RenderContext, Scope};
use crate::tpl::unit::CompiledUnit;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Whether the enclosing program keeps running after an instruction.
#[derive(Debug)]
enum Flow {
    Continue,
    /// `extends` named a parent; it renders once the remaining declarations
    /// of the current list have run.
    Extends(Arc<CompiledUnit>),
    /// The parent has rendered; the rest of the derived `main` is skipped.
    Halt,
}

/// Instructions that still run after `extends`: they bind names without
/// producing output.
fn is_declaration(instr: &Instr) -> bool {
    matches!(
        instr,
        Instr::Import { .. } | Instr::FromImport { .. } | Instr::Set { .. }
    )
}

fn loop_value(index0: usize, length: usize) -> Value {
    let mut map = BTreeMap::new();
    map.insert("index".to_string(), Value::from(index0 + 1));
    map.insert("index0".to_string(), Value::from(index0));
    map.insert("revindex".to_string(), Value::from(length - index0));
    map.insert("revindex0".to_string(), Value::from(length - index0 - 1));
    map.insert("first".to_string(), Value::Bool(index0 == 0));
    map.insert("last".to_string(), Value::Bool(index0 + 1 == length));
    map.insert("length".to_string(), Value::from(length));
    Value::Map(map)
}

/// Applies `op` to two evaluated operands.
fn apply_binary(op: BinaryOp, a: &Value, b: &Value) -> Result<Value, TemplateError> {
    let ordering = a.compare(b);
    match op {
        BinaryOp::Or => Ok(Value::Bool(a.is_truthy() || b.is_truthy())),
        BinaryOp::And => Ok(Value::Bool(a.is_truthy() && b.is_truthy())),
        BinaryOp::Eq => Ok(Value::Bool(a.loose_eq(b))),
        BinaryOp::Ne => Ok(Value::Bool(!a.loose_eq(b))),
        BinaryOp::Lt => Ok(Value::Bool(ordering == Some(Ordering::Less))),
        BinaryOp::Gt => Ok(Value::Bool(ordering == Some(Ordering::Greater))),
        BinaryOp::Le => Ok(Value::Bool(matches!(
            ordering,
            Some(Ordering::Less | Ordering::Equal)
        ))),
        BinaryOp::Ge => Ok(Value::Bool(matches!(
            ordering,
            Some(Ordering::Greater | Ordering::Equal)
        ))),
        BinaryOp::In => Ok(Value::Bool(b.contains(a))),
        BinaryOp::NotIn => Ok(Value::Bool(!b.contains(a))),
        BinaryOp::Range => functions::range(a, b, None),
        BinaryOp::Concat => Ok(Value::Str(format!("{}{}", a, b))),
        BinaryOp::Add => a.add(b),
        BinaryOp::Sub => a.sub(b),
        BinaryOp::Mul => a.mul(b),
        BinaryOp::Div => a.div(b),
        BinaryOp::FloorDiv => a.floor_div(b),
        BinaryOp::Rem => a.rem(b),
        BinaryOp::Pow => a.pow(b),
    }
}

impl RenderContext<'_> {
    /// Executes a list of instructions against this context.
    pub fn run(&mut self, instrs: &[Instr]) -> Result<(), TemplateError> {
        self.execute(instrs).map(|_| ())
    }

    fn execute(&mut self, instrs: &[Instr]) -> Result<Flow, TemplateError> {
        for (i, instr) in instrs.iter().enumerate() {
            match self.execute_one(instr)? {
                Flow::Continue => {}
                Flow::Halt => return Ok(Flow::Halt),
                Flow::Extends(parent) => {
                    for rest in instrs[i + 1..].iter().filter(|rest| is_declaration(rest)) {
                        self.execute_one(rest)?;
                    }
                    self.render_parent(parent)?;
                    return Ok(Flow::Halt);
                }
            }
        }
        Ok(Flow::Continue)
    }

    /// Appends `parent` to the inheritance chain and runs its `main`.
    fn render_parent(&mut self, parent: Arc<CompiledUnit>) -> Result<(), TemplateError> {
        debug!("Rendering parent template '{}'", parent.name());
        self.push_parent(parent.clone());
        self.descend(|ctx| ctx.with_owner(parent.clone(), |ctx| ctx.run(parent.main())))
    }

    fn execute_one(&mut self, instr: &Instr) -> Result<Flow, TemplateError> {
        match instr {
            Instr::WriteText(text) => self.write_literal(text),
            Instr::WriteExpr(expr) => {
                let value = self.eval(expr)?;
                self.write_expression(&value);
            }
            Instr::If {
                branches,
                otherwise,
            } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.is_truthy() {
                        return self.execute(body);
                    }
                }
                return self.execute(otherwise);
            }
            Instr::For {
                key,
                value,
                iterable,
                body,
                otherwise,
            } => {
                let pairs = self.eval(iterable)?.iter_pairs()?;
                if pairs.is_empty() {
                    return self.execute(otherwise);
                }
                let length = pairs.len();
                let mark = self.scope().mark();
                for (i, (k, v)) in pairs.into_iter().enumerate() {
                    if let Some(key) = key {
                        self.scope_mut().push(key, k);
                    }
                    self.scope_mut().push(value, v);
                    self.scope_mut().push("loop", loop_value(i, length));
                    let flow = self.execute(body);
                    self.scope_mut().truncate(mark);
                    if let Flow::Halt = flow? {
                        return Ok(Flow::Halt);
                    }
                }
            }
            Instr::Set { name, value } => {
                let value = self.eval(value)?;
                self.scope_mut().set(name, value);
            }
            Instr::Capture { name, body } => {
                let captured = self.capture(|ctx| ctx.run(body))?;
                self.scope_mut().set(name, Value::Str(captured));
            }
            Instr::CallBlock(name) => {
                let unit = self.resolve_block(name)?;
                trace!("Rendering block '{}' from '{}'", name, unit.name());
                unit.call_block(self, name)?;
            }
            Instr::Extends(parent) => {
                let path = self.eval(parent)?.to_string();
                let parent = self.engine().get_or_compile(&path)?.unit.clone();
                return Ok(Flow::Extends(parent));
            }
            Instr::Include {
                template,
                with,
                only,
                ignore_missing,
            } => self.include(template, with.as_ref(), *only, *ignore_missing)?,
            Instr::Import { template, alias } => {
                let unit = self.resolve_import(template)?;
                self.imports.insert(alias.clone(), unit);
            }
            Instr::FromImport { template, names } => {
                let unit = self.resolve_import(template)?;
                for (name, alias) in names {
                    if unit.get_macro(name).is_none() {
                        return Err(TemplateError::render(format!(
                            "Macro '{}' is not defined in '{}'",
                            name,
                            unit.name()
                        )));
                    }
                    self.imported_macros
                        .insert(alias.clone(), (unit.clone(), name.clone()));
                }
            }
            Instr::Custom(custom) => custom.execute(self)?,
        }
        Ok(Flow::Continue)
    }

    /// The most derived definition of block `name` in the current chain.
    fn resolve_block(&self, name: &str) -> Result<Arc<CompiledUnit>, TemplateError> {
        self.templates()
            .iter()
            .find(|unit| unit.has_block(name))
            .or_else(|| self.owner().filter(|unit| unit.has_block(name)))
            .cloned()
            .ok_or_else(|| TemplateError::render(format!("Block '{}' is not defined", name)))
    }

    /// `parent()`: renders the next definition of the current block below the
    /// unit that owns the running one.
    fn parent_block(&mut self) -> Result<Value, TemplateError> {
        let (owner, name) = self
            .current_block()
            .map(|(unit, name)| (unit.clone(), name.to_string()))
            .ok_or_else(|| TemplateError::render("parent() can only be called inside a block"))?;
        let chain = self.templates();
        let parent = chain
            .iter()
            .position(|unit| Arc::ptr_eq(unit, &owner))
            .and_then(|i| chain[i + 1..].iter().find(|unit| unit.has_block(&name)))
            .cloned()
            .ok_or_else(|| {
                TemplateError::render(format!("Block '{}' has no parent definition", name))
            })?;
        let output = self.capture(|ctx| parent.call_block(ctx, &name))?;
        Ok(Value::Str(output))
    }

    fn include(
        &mut self,
        template: &Expr,
        with: Option<&Expr>,
        only: bool,
        ignore_missing: bool,
    ) -> Result<(), TemplateError> {
        let path = self.eval(template)?.to_string();
        let entry = match self.engine().get_or_compile(&path) {
            Ok(entry) => entry,
            Err(TemplateError::NotFound(_)) if ignore_missing => {
                warn!("Skipping missing template '{}'", path);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let vars = match with {
            Some(expr) => match self.eval(expr)? {
                Value::Map(vars) => vars,
                Value::Null => BTreeMap::new(),
                other => {
                    return Err(TemplateError::render(format!(
                        "Variables passed to include must be a map, got {}",
                        other.type_name()
                    )));
                }
            },
            None => BTreeMap::new(),
        };
        debug!("Including template '{}'", path);

        let unit = entry.unit.clone();
        self.descend(|ctx| {
            ctx.with_fresh_imports(|ctx| {
                if only {
                    return ctx.with_scope(Scope::new(Value::Map(vars)), |ctx| unit.render(ctx));
                }
                let mark = ctx.scope().mark();
                for (k, v) in vars {
                    ctx.scope_mut().push(&k, v);
                }
                let result = unit.render(ctx);
                ctx.scope_mut().truncate(mark);
                result
            })
        })
    }

    fn resolve_import(&mut self, template: &Expr) -> Result<Arc<CompiledUnit>, TemplateError> {
        if matches!(template, Expr::Var(name) if name == "_self") {
            return self
                .owner()
                .cloned()
                .ok_or_else(|| TemplateError::render("'_self' used outside of a template"));
        }
        let path = self.eval(template)?.to_string();
        Ok(self.engine().get_or_compile(&path)?.unit.clone())
    }

    /// Resolves variable paths (`a`, `a.b`, `a[0]`) without failing on
    /// undefined names.
    fn lookup_path(&mut self, expr: &Expr) -> Result<Option<Value>, TemplateError> {
        match expr {
            Expr::Var(name) => Ok(self.scope().lookup(name).cloned()),
            Expr::Attr(target, name) => {
                Ok(self.lookup_path(target)?.and_then(|t| t.get_attr(name).cloned()))
            }
            Expr::Index(target, index) => {
                let target = self.lookup_path(target)?;
                let index = self.eval(index)?;
                Ok(target.and_then(|t| t.get_item(&index)))
            }
            other => self.eval(other).map(Some),
        }
    }

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, TemplateError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    /// 表达式求值
    pub fn eval(&mut self, expr: &Expr) -> Result<Value, TemplateError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(_) | Expr::Attr(..) | Expr::Index(..) => match self.lookup_path(expr)? {
                Some(value) => Ok(value),
                None if self.engine().config().strict_variables => Err(TemplateError::render(
                    format!("Variable '{}' does not exist", expr),
                )),
                None => Ok(Value::Null),
            },
            Expr::List(items) => self.eval_args(items).map(Value::List),
            Expr::Map(pairs) => {
                let mut map = BTreeMap::new();
                for (key, value) in pairs {
                    let key = self.eval(key)?.to_string();
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Map(map))
            }
            Expr::Call { callee, args } => self.eval_call(callee, args),
            Expr::Filter { input, name, args } => {
                let input = if name == "default" {
                    self.lookup_path(input)?.unwrap_or_default()
                } else {
                    self.eval(input)?
                };
                let args = self.eval_args(args)?;
                let filter = self
                    .engine()
                    .functions()
                    .filter(name)
                    .ok_or_else(|| TemplateError::render(format!("Unknown filter '{}'", name)))?;
                filter(&input, &args)
            }
            Expr::Test {
                input,
                name,
                negated,
            } => {
                let result = match name.as_str() {
                    "defined" => self.lookup_path(input)?.is_some(),
                    "null" | "none" => self.eval(input)?.is_null(),
                    "empty" => self.eval(input)?.is_empty(),
                    "even" => self.eval(input)?.as_i64().is_some_and(|n| n % 2 == 0),
                    "odd" => self.eval(input)?.as_i64().is_some_and(|n| n % 2 != 0),
                    "iterable" => self.eval(input)?.is_iterable(),
                    other => {
                        return Err(TemplateError::render(format!("Unknown test '{}'", other)));
                    }
                };
                Ok(Value::Bool(result != *negated))
            }
            Expr::Unary(op, inner) => {
                let value = self.eval(inner)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!value.is_truthy())),
                    UnaryOp::Neg => value.neg(),
                    UnaryOp::Pos => Value::I64(0).add(&value),
                }
            }
            Expr::Binary(op, left, right) => self.eval_binary(*op, left, right),
            Expr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.is_truthy() {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
        }
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<Value, TemplateError> {
        match op {
            BinaryOp::Or => {
                let result = self.eval(left)?.is_truthy() || self.eval(right)?.is_truthy();
                Ok(Value::Bool(result))
            }
            BinaryOp::And => {
                let result = self.eval(left)?.is_truthy() && self.eval(right)?.is_truthy();
                Ok(Value::Bool(result))
            }
            _ => {
                let a = self.eval(left)?;
                let b = self.eval(right)?;
                apply_binary(op, &a, &b)
            }
        }
    }

    /// Call resolution order: `parent()` inside a block, imported macros,
    /// macros of the running unit, then registered functions.
    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Value, TemplateError> {
        match callee {
            Expr::Var(name) => {
                if name == "parent" && args.is_empty() && self.current_block().is_some() {
                    return self.parent_block();
                }
                let args = self.eval_args(args)?;
                if let Some((unit, macro_name)) = self.imported_macros.get(name).cloned() {
                    return unit.call_macro(self, &macro_name, args);
                }
                let owner = self
                    .owner()
                    .filter(|unit| unit.get_macro(name).is_some())
                    .cloned();
                if let Some(owner) = owner {
                    return owner.call_macro(self, name, args);
                }
                match self.engine().functions().function(name) {
                    Some(function) => function(&args),
                    None => Err(TemplateError::render(format!("Unknown function '{}'", name))),
                }
            }
            Expr::Attr(target, name) => {
                let namespace = match target.as_ref() {
                    Expr::Var(alias) if alias == "_self" => self.owner().cloned(),
                    Expr::Var(alias) => self.imports.get(alias).cloned(),
                    _ => None,
                };
                match namespace {
                    Some(unit) => {
                        let args = self.eval_args(args)?;
                        unit.call_macro(self, name, args)
                    }
                    None => Err(TemplateError::render(format!("'{}' is not callable", callee))),
                }
            }
            other => Err(TemplateError::render(format!("'{}' is not callable", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TemplateError;
    use crate::models::template_config::TemplateConfig;
    use crate::template_provider::MemoryTemplateProvider;
    use crate::tpl::engine::TemplateEngine;
    use crate::value::Value;
    use serde::Serialize;
    use std::sync::Arc;

    fn render(source: &str, scope: Value) -> String {
        TemplateEngine::new()
            .render_inline_to_string(source, scope)
            .unwrap()
    }

    #[derive(Serialize)]
    struct User {
        name: String,
        age: u8,
        roles: Vec<String>,
    }

    #[test]
    fn test_render_simple() {
        assert_eq!(render("Hello", Value::Null), "Hello");
        assert_eq!(render("{{ 1 + 2 }}", Value::Null), "3");
        assert_eq!(render("{{ 7 / 2 }} {{ 7 // 2 }} {{ 2 ** 10 }}", Value::Null), "3.5 3 1024");
    }

    #[test]
    fn test_render_struct_scope() {
        let user = User {
            name: "tom".to_string(),
            age: 20,
            roles: vec!["admin".to_string(), "dev".to_string()],
        };
        let out = TemplateEngine::new()
            .render_inline(
                "{{ name|upper }} is {% if age >= 18 %}adult{% else %}minor{% endif %}: {{ roles|join(', ') }}",
                &user,
            )
            .unwrap();
        assert_eq!(out, "TOM is adult: admin, dev");
    }

    #[test]
    fn test_for_loop_variables() {
        let out = render(
            "{% for i, v in ['a', 'b', 'c'] %}{{ loop.index }}{{ v }}{{ i }}{% if not loop.last %},{% endif %}{% endfor %}",
            Value::Null,
        );
        assert_eq!(out, "1a0,2b1,3c2");
        assert_eq!(render("{% for x in [] %}x{% else %}empty{% endfor %}", Value::Null), "empty");
        assert_eq!(render("{% for x in 1..3 %}{{ x }}{% endfor %}", Value::Null), "123");
    }

    #[test]
    fn test_set_and_capture() {
        assert_eq!(render("{% set a = 2 %}{{ a * 3 }}", Value::Null), "6");
        assert_eq!(
            render("{% set s %}<b>{{ 'x' }}</b>{% endset %}[{{ s }}]", Value::Null),
            "[<b>x</b>]"
        );
    }

    #[test]
    fn test_tests_and_defaults() {
        assert_eq!(render("{{ x is defined ? 'y' : 'n' }}", Value::Null), "n");
        assert_eq!(render("{{ x|default('fallback') }}", Value::Null), "fallback");
        assert_eq!(render("{{ 4 is even }}{{ 4 is odd }}", Value::Null), "truefalse");
        assert_eq!(render("{{ 'b' in ['a', 'b'] }}{{ 'z' not in 'xyz' }}", Value::Null), "truefalse");
    }

    #[test]
    fn test_strict_variables() {
        let engine = TemplateEngine::builder()
            .config(TemplateConfig::new().strict_variables(true))
            .build();
        assert!(matches!(
            engine.render_inline_to_string("{{ missing }}", Value::Null),
            Err(TemplateError::Render(_))
        ));
        assert_eq!(
            engine
                .render_inline_to_string("{{ missing is defined }}", Value::Null)
                .unwrap(),
            "false"
        );
    }

    #[test]
    fn test_macros() {
        let out = render(
            "{% macro greet(name, greeting = 'Hello') %}{{ greeting }}, {{ name }}!{% endmacro %}{{ greet('Ann') }} {{ _self.greet('Bob', 'Hi') }}",
            Value::Null,
        );
        assert_eq!(out, "Hello, Ann! Hi, Bob!");
    }

    #[test]
    fn test_macro_scope_is_isolated() {
        let out = render(
            "{% set outer = 'x' %}{% macro m() %}[{{ outer }}]{% endmacro %}{{ m() }}",
            Value::Null,
        );
        assert_eq!(out, "[]");
    }

    #[test]
    fn test_include_and_import() {
        let provider = MemoryTemplateProvider::new()
            .with("item.html", "<li>{{ label }}</li>")
            .with("forms.html", "{% macro input(name) %}<input name=\"{{ name }}\">{% endmacro %}");
        let engine = TemplateEngine::builder().provider(Arc::new(provider)).build();

        let out = engine
            .render_inline_to_string(
                "{% for label in ['a', 'b'] %}{% include 'item.html' %}{% endfor %}",
                Value::Null,
            )
            .unwrap();
        assert_eq!(out, "<li>a</li><li>b</li>");

        let out = engine
            .render_inline_to_string(
                "{% include 'item.html' with {label: 'c'} only %}{% include 'nope.html' ignore missing %}",
                Value::Null,
            )
            .unwrap();
        assert_eq!(out, "<li>c</li>");

        let out = engine
            .render_inline_to_string(
                "{% import 'forms.html' as f %}{% from 'forms.html' import input as field %}{{ f.input('a') }}{{ field('b') }}",
                Value::Null,
            )
            .unwrap();
        assert_eq!(out, "<input name=\"a\"><input name=\"b\">");

        assert!(matches!(
            engine.render_inline_to_string("{% include 'nope.html' %}", Value::Null),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[test]
    fn test_recursive_include_is_bounded() {
        let provider = MemoryTemplateProvider::new().with("loop.html", "x{% include 'loop.html' %}");
        let engine = TemplateEngine::builder()
            .config(TemplateConfig::new().max_depth(5))
            .provider(Arc::new(provider))
            .build();
        assert!(matches!(
            engine.render_to_string("loop.html", Value::Null),
            Err(TemplateError::Render(_))
        ));
    }

    #[test]
    fn test_integer_edge_values_render() {
        let out = TemplateEngine::new()
            .render_inline(
                "{{ n % -1 }}|{{ n // -1 > 0 }}|{{ (n|abs) > 0 }}",
                &serde_json::json!({ "n": i64::MIN }),
            )
            .unwrap();
        assert_eq!(out, "0|true|true");
    }

    #[test]
    fn test_self_nested_blocks_are_bounded() {
        let engine = TemplateEngine::builder()
            .config(TemplateConfig::new().max_depth(16))
            .build();
        for source in [
            "{% block a %}x{% block a %}{% endblock %}{% endblock %}",
            "{% block a %}{% block b %}{% block a %}{% endblock %}{% endblock %}{% endblock %}",
        ] {
            match engine.render_inline_to_string(source, Value::Null) {
                Err(TemplateError::Render(msg)) => {
                    assert!(msg.contains("nesting depth"), "{}", msg)
                }
                other => panic!("Expected depth error for {}, got {:?}", source, other),
            }
        }
    }

    #[test]
    fn test_nested_blocks_within_depth_render() {
        let engine = TemplateEngine::builder()
            .config(TemplateConfig::new().max_depth(3))
            .build();
        assert_eq!(
            engine
                .render_inline_to_string(
                    "{% block a %}<{% block b %}{% block c %}c{% endblock %}{% endblock %}>{% endblock %}",
                    Value::Null,
                )
                .unwrap(),
            "<c>"
        );
    }
}

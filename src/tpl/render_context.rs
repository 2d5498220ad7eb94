use crate::error::TemplateError;
use crate::tpl::engine::TemplateEngine;
use crate::tpl::unit::CompiledUnit;
use crate::value::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Variable scope: the caller's root map plus a stack of locals.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    root: Value,
    locals: Vec<(String, Value)>,
}

impl Scope {
    pub fn new(root: Value) -> Self {
        let root = match root {
            Value::Map(_) => root,
            _ => Value::empty_map(),
        };
        Self {
            root,
            locals: Vec::new(),
        }
    }

    pub fn push(&mut self, key: &str, value: Value) {
        self.locals.push((key.to_string(), value));
    }

    pub fn pop(&mut self) {
        self.locals.pop();
    }

    /// Current depth of the locals stack, for a later [`truncate`](Self::truncate).
    pub fn mark(&self) -> usize {
        self.locals.len()
    }

    pub fn truncate(&mut self, mark: usize) {
        self.locals.truncate(mark);
    }

    /// Rebinds the innermost local named `key`, or pushes a new one.
    pub fn set(&mut self, key: &str, value: Value) {
        match self.locals.iter_mut().rev().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => self.push(key, value),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&Value> {
        // 1. 尝试直接匹配（查找局部变量或根对象的直接属性）
        if let Some(v) = self.get_from_scope(key) {
            return Some(v);
        }

        // 2. 尝试嵌套查找（例如 "user.name"）
        let (head, rest) = key.split_once('.')?;
        let head_value = self.get_from_scope(head)?;
        Self::resolve_path(head_value, rest)
    }

    fn get_from_scope(&self, key: &str) -> Option<&Value> {
        // 优先查找局部变量（栈结构，从后往前查以支持遮蔽）
        if let Some((_, v)) = self.locals.iter().rev().find(|(k, _)| k == key) {
            return Some(v);
        }
        self.root.get_attr(key)
    }

    /// 辅助函数：在 Value 中根据点号分隔的路径查找值
    fn resolve_path<'v>(mut current: &'v Value, path: &str) -> Option<&'v Value> {
        for part in path.split('.') {
            current = current.get_attr(part)?;
        }
        Some(current)
    }
}

/// Per-render runtime state handed to compiled units.
///
/// `templates` is the inheritance chain of the current render, most derived
/// first. `blocks` is the stack of blocks being rendered, each with the unit
/// whose definition runs. `owners` tracks whose instructions are executing,
/// which is what `_self` and unqualified macro calls resolve against.
pub struct RenderContext<'e> {
    engine: &'e TemplateEngine,
    output: String,
    scope: Scope,
    templates: Vec<Arc<CompiledUnit>>,
    blocks: Vec<(Arc<CompiledUnit>, String)>,
    owners: Vec<Arc<CompiledUnit>>,
    pub(crate) imports: HashMap<String, Arc<CompiledUnit>>,
    pub(crate) imported_macros: HashMap<String, (Arc<CompiledUnit>, String)>,
    depth: usize,
}

impl<'e> RenderContext<'e> {
    pub fn new(engine: &'e TemplateEngine, root: Value) -> Self {
        Self {
            engine,
            output: String::new(),
            scope: Scope::new(root),
            templates: Vec::new(),
            blocks: Vec::new(),
            owners: Vec::new(),
            imports: HashMap::new(),
            imported_macros: HashMap::new(),
            depth: 0,
        }
    }

    pub fn engine(&self) -> &'e TemplateEngine {
        self.engine
    }

    pub fn write_literal(&mut self, text: &str) {
        self.output.push_str(text);
    }

    pub fn write_expression(&mut self, value: &Value) {
        use std::fmt::Write;
        // writing into a String cannot fail
        let _ = write!(self.output, "{}", value);
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn into_output(self) -> String {
        self.output
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    /// Starts a fresh inheritance chain rooted at `unit`.
    pub fn set_current_template(&mut self, unit: Arc<CompiledUnit>) {
        self.templates = vec![unit];
    }

    pub fn current_template(&self) -> Option<&Arc<CompiledUnit>> {
        self.templates.first()
    }

    pub fn templates(&self) -> &[Arc<CompiledUnit>] {
        &self.templates
    }

    /// Appends a parent to the inheritance chain.
    pub fn push_parent(&mut self, unit: Arc<CompiledUnit>) {
        self.templates.push(unit);
    }

    /// Runs `body` with `unit` as the current template, restoring the
    /// previous chain afterwards.
    pub fn with_current_template<R>(
        &mut self,
        unit: Arc<CompiledUnit>,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        let saved = std::mem::take(&mut self.templates);
        self.set_current_template(unit);
        let result = body(self);
        self.templates = saved;
        result
    }

    pub fn with_current_block<R>(
        &mut self,
        unit: Arc<CompiledUnit>,
        name: &str,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        self.blocks.push((unit, name.to_string()));
        let result = body(self);
        self.blocks.pop();
        result
    }

    pub fn current_block(&self) -> Option<(&Arc<CompiledUnit>, &str)> {
        self.blocks
            .last()
            .map(|(unit, name)| (unit, name.as_str()))
    }

    pub fn with_owner<R>(
        &mut self,
        unit: Arc<CompiledUnit>,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        self.owners.push(unit);
        let result = body(self);
        self.owners.pop();
        result
    }

    pub fn owner(&self) -> Option<&Arc<CompiledUnit>> {
        self.owners.last()
    }

    /// Redirects output produced by `body` and returns it.
    pub fn capture(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<(), TemplateError>,
    ) -> Result<String, TemplateError> {
        let saved = std::mem::take(&mut self.output);
        let result = body(self);
        let captured = std::mem::replace(&mut self.output, saved);
        result.map(|()| captured)
    }

    /// Swaps in a scope holding nothing, for macro bodies.
    pub fn with_isolated_scope<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        self.with_scope(Scope::default(), body)
    }

    pub fn with_scope<R>(
        &mut self,
        scope: Scope,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        let saved = std::mem::replace(&mut self.scope, scope);
        let result = body(self);
        self.scope = saved;
        result
    }

    /// Swaps out imported macro namespaces while `body` runs.
    pub fn with_fresh_imports<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        let imports = std::mem::take(&mut self.imports);
        let imported_macros = std::mem::take(&mut self.imported_macros);
        let result = body(self);
        self.imports = imports;
        self.imported_macros = imported_macros;
        result
    }

    /// Enters one level of include / extends / macro nesting.
    pub fn descend<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        let max_depth = self.engine.config().max_depth;
        if self.depth >= max_depth {
            return Err(TemplateError::render(format!(
                "Maximum template nesting depth of {} exceeded",
                max_depth
            )));
        }
        self.depth += 1;
        let result = body(self);
        self.depth -= 1;
        result
    }
}

use crate::error::TemplateError;
use crate::models::template_config::TemplateConfig;
use crate::template_provider::{MemoryTemplateProvider, TemplateProvider};
use crate::tpl::cache::{CacheEntry, TemplateCache};
use crate::tpl::functions::FunctionRegistry;
use crate::tpl::render_context::RenderContext;
use crate::tpl::tags::{TagHandler, TagRegistry};
use crate::utils::contained_path;
use crate::value::{Value, to_value};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

const INLINE_NAME: &str = "inline";

/// 模板引擎：编译、缓存并渲染模板
///
/// Compilation goes through the tag registry and the configured provider;
/// compiled units are kept in an injected [`TemplateCache`].
pub struct TemplateEngine {
    config: TemplateConfig,
    provider: Arc<dyn TemplateProvider>,
    pub(crate) tags: TagRegistry,
    functions: FunctionRegistry,
    cache: Arc<TemplateCache>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// An engine with default options, no templates and a private cache.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> TemplateEngineBuilder {
        TemplateEngineBuilder::default()
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<dyn TemplateProvider> {
        &self.provider
    }

    pub fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn cache(&self) -> &Arc<TemplateCache> {
        &self.cache
    }

    /// Returns the compiled unit for `path`, compiling it on a cache miss.
    ///
    /// With caching disabled the entry is evicted first, so every call reads
    /// and compiles the template again. Names are relative to the provider
    /// root; absolute names and names climbing above it are not found.
    pub fn get_or_compile(&self, path: &str) -> Result<Arc<CacheEntry>, TemplateError> {
        let path = contained_path(path)
            .ok_or_else(|| TemplateError::NotFound(path.to_string()))?;
        if !self.config.cache {
            self.cache.evict_path(&path);
        } else if let Some(entry) = self.cache.get_path(&path) {
            return Ok(entry);
        }

        debug!("Compiling template '{}'", path);
        let source = self.provider.read(&path, self.config.cache)?;
        let entry = Arc::new(self.compile_template_text(&source, &path)?.load()?);
        self.cache.insert_path(&path, entry.clone());
        Ok(entry)
    }

    /// Same as [`get_or_compile`](Self::get_or_compile), keyed by the
    /// template text itself.
    pub fn get_or_compile_inline(&self, content: &str) -> Result<Arc<CacheEntry>, TemplateError> {
        if !self.config.cache {
            self.cache.evict_content(content);
        } else if let Some(entry) = self.cache.get_content(content) {
            return Ok(entry);
        }

        debug!("Compiling inline template ({} bytes)", content.len());
        let entry = Arc::new(self.compile_template_text(content, INLINE_NAME)?.load()?);
        self.cache.insert_content(content, entry.clone());
        Ok(entry)
    }

    fn render_entry(&self, entry: &CacheEntry, scope: Value) -> Result<String, TemplateError> {
        let mut ctx = RenderContext::new(self, scope);
        entry.unit.render(&mut ctx)?;
        Ok(ctx.into_output())
    }

    pub fn render_to_string(&self, path: &str, scope: Value) -> Result<String, TemplateError> {
        let entry = self.get_or_compile(path)?;
        self.render_entry(&entry, scope)
    }

    pub fn render_inline_to_string(
        &self,
        content: &str,
        scope: Value,
    ) -> Result<String, TemplateError> {
        let entry = self.get_or_compile_inline(content)?;
        self.render_entry(&entry, scope)
    }

    /// Renders `path` with any serializable value as the scope.
    pub fn render<T: Serialize + ?Sized>(
        &self,
        path: &str,
        scope: &T,
    ) -> Result<String, TemplateError> {
        self.render_to_string(path, to_value(scope)?)
    }

    pub fn render_inline<T: Serialize + ?Sized>(
        &self,
        content: &str,
        scope: &T,
    ) -> Result<String, TemplateError> {
        self.render_inline_to_string(content, to_value(scope)?)
    }

    /// Calls macro `name` defined in template `path` and returns its output.
    pub fn call_macro(
        &self,
        path: &str,
        name: &str,
        args: Vec<Value>,
    ) -> Result<String, TemplateError> {
        let entry = self.get_or_compile(path)?;
        let mut ctx = RenderContext::new(self, Value::Null);
        let unit = entry.unit.clone();
        let output = ctx.with_current_template(unit.clone(), |ctx| {
            unit.call_macro(ctx, name, args)
        })?;
        Ok(output.to_string())
    }
}

/// Builder for [`TemplateEngine`].
#[derive(Default)]
pub struct TemplateEngineBuilder {
    config: TemplateConfig,
    provider: Option<Arc<dyn TemplateProvider>>,
    cache: Option<Arc<TemplateCache>>,
    tags: TagRegistry,
    functions: FunctionRegistry,
}

impl TemplateEngineBuilder {
    pub fn config(mut self, config: TemplateConfig) -> Self {
        self.config = config;
        self
    }

    pub fn provider(mut self, provider: Arc<dyn TemplateProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Shares `cache` with other engines, e.g. [`TemplateCache::global`].
    pub fn cache(mut self, cache: Arc<TemplateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Registers an extension tag; it replaces a built-in of the same name.
    pub fn tag(mut self, name: &str, handler: impl TagHandler + 'static) -> Self {
        self.tags.register(name, handler);
        self
    }

    /// Registers a tag that only ends the body of an extension tag.
    pub fn terminator(mut self, name: &str) -> Self {
        self.tags.register_terminator(name);
        self
    }

    pub fn filter<F>(mut self, name: &str, filter: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        self.functions.register_filter(name, filter);
        self
    }

    pub fn function<F>(mut self, name: &str, function: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        self.functions.register_function(name, function);
        self
    }

    pub fn build(self) -> TemplateEngine {
        TemplateEngine {
            config: self.config,
            provider: self
                .provider
                .unwrap_or_else(|| Arc::new(MemoryTemplateProvider::new())),
            tags: self.tags,
            functions: self.functions,
            cache: self.cache.unwrap_or_default(),
        }
    }
}

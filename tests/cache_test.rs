use stanza::{MemoryTemplateProvider, TemplateCache, TemplateConfig, TemplateEngine, Value};
use std::sync::Arc;

fn provider(body: &str) -> Arc<MemoryTemplateProvider> {
    Arc::new(MemoryTemplateProvider::new().with("shared.html", body))
}

#[test]
fn test_engines_share_injected_cache() {
    let cache = Arc::new(TemplateCache::new());
    let a = TemplateEngine::builder()
        .provider(provider("{{ 1 + 1 }}"))
        .cache(cache.clone())
        .build();
    let b = TemplateEngine::builder()
        .provider(provider("never read"))
        .cache(cache.clone())
        .build();

    let first = a.get_or_compile("shared.html").unwrap();
    let second = b.get_or_compile("shared.html").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(b.render_to_string("shared.html", Value::Null).unwrap(), "2");
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_global_cache_is_one_instance() {
    assert!(Arc::ptr_eq(&TemplateCache::global(), &TemplateCache::global()));

    let engine = TemplateEngine::builder()
        .cache(TemplateCache::global())
        .build();
    let source = "global {{ 'cache' }} test";
    let unit = engine.get_or_compile_inline(source).unwrap();
    let other = TemplateEngine::builder()
        .cache(TemplateCache::global())
        .build();
    assert!(Arc::ptr_eq(&unit, &other.get_or_compile_inline(source).unwrap()));
}

#[test]
fn test_disabled_cache_sees_new_text() {
    let provider = Arc::new(MemoryTemplateProvider::new().with("t.html", "v1"));
    let engine = TemplateEngine::builder()
        .config(TemplateConfig::new().cache(false))
        .provider(provider.clone())
        .build();
    assert_eq!(engine.render_to_string("t.html", Value::Null).unwrap(), "v1");
    provider.add("t.html", "v2");
    assert_eq!(engine.render_to_string("t.html", Value::Null).unwrap(), "v2");
}

#[test]
fn test_enabled_cache_keeps_first_compilation() {
    let provider = Arc::new(MemoryTemplateProvider::new().with("t.html", "v1"));
    let engine = TemplateEngine::builder().provider(provider.clone()).build();
    assert_eq!(engine.render_to_string("t.html", Value::Null).unwrap(), "v1");
    provider.add("t.html", "v2");
    assert_eq!(engine.render_to_string("t.html", Value::Null).unwrap(), "v1");

    engine.cache().evict_path("t.html");
    assert_eq!(engine.render_to_string("t.html", Value::Null).unwrap(), "v2");
}

#[test]
fn test_compile_errors_are_not_cached() {
    let engine = TemplateEngine::new();
    assert!(engine.get_or_compile_inline("{% if x %}").is_err());
    assert!(engine.cache().is_empty());
}

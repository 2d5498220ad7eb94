use crate::tpl::unit::CompiledUnit;
use dashmap::DashMap;
use std::sync::{Arc, LazyLock};

/// A compiled template together with its program listing.
#[derive(Debug)]
pub struct CacheEntry {
    pub text: String,
    pub unit: Arc<CompiledUnit>,
}

/// 编译结果缓存：按路径与按内联内容分别存放
///
/// Entries are never evicted implicitly; a disabled `cache` option evicts
/// the entry for a key before it is recompiled.
#[derive(Debug, Default)]
pub struct TemplateCache {
    by_path: DashMap<String, Arc<CacheEntry>>,
    by_content: DashMap<String, Arc<CacheEntry>>,
}

static GLOBAL_CACHE: LazyLock<Arc<TemplateCache>> =
    LazyLock::new(|| Arc::new(TemplateCache::new()));

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache shared by engines that do not bring their own.
    pub fn global() -> Arc<TemplateCache> {
        GLOBAL_CACHE.clone()
    }

    pub fn get_path(&self, path: &str) -> Option<Arc<CacheEntry>> {
        self.by_path.get(path).map(|e| e.value().clone())
    }

    pub fn insert_path(&self, path: &str, entry: Arc<CacheEntry>) {
        self.by_path.insert(path.to_string(), entry);
    }

    pub fn evict_path(&self, path: &str) {
        self.by_path.remove(path);
    }

    pub fn get_content(&self, content: &str) -> Option<Arc<CacheEntry>> {
        self.by_content.get(content).map(|e| e.value().clone())
    }

    pub fn insert_content(&self, content: &str, entry: Arc<CacheEntry>) {
        self.by_content.insert(content.to_string(), entry);
    }

    pub fn evict_content(&self, content: &str) {
        self.by_content.remove(content);
    }

    pub fn clear(&self) {
        self.by_path.clear();
        self.by_content.clear();
    }

    pub fn len(&self) -> usize {
        self.by_path.len() + self.by_content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::engine::TemplateEngine;

    fn entry(source: &str) -> Arc<CacheEntry> {
        let generated = TemplateEngine::new()
            .compile_template_text(source, "t")
            .unwrap();
        Arc::new(generated.load().unwrap())
    }

    #[test]
    fn test_path_and_content_are_separate() {
        let cache = TemplateCache::new();
        cache.insert_path("a.html", entry("a"));
        cache.insert_content("a.html", entry("b"));
        assert_eq!(cache.len(), 2);

        cache.evict_path("a.html");
        assert!(cache.get_path("a.html").is_none());
        assert!(cache.get_content("a.html").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}

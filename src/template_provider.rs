use crate::asset_loader;
use crate::error::TemplateError;
use crate::utils::{contained_path, normalize_path};
use dashmap::DashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Source of template text, addressed by normalized path.
pub trait TemplateProvider: Send + Sync {
    /// Reads the template at `path`. Implementations holding their own copy
    /// of the text may serve it when `use_cache` is set.
    fn read(&self, path: &str, use_cache: bool) -> Result<String, TemplateError>;
}

/// Templates registered in memory.
#[derive(Debug, Default)]
pub struct MemoryTemplateProvider {
    templates: DashMap<String, String>,
}

impl MemoryTemplateProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, path: &str, content: &str) -> Self {
        self.add(path, content);
        self
    }

    pub fn add(&self, path: &str, content: &str) {
        self.templates
            .insert(normalize_path(path), content.to_string());
    }
}

impl TemplateProvider for MemoryTemplateProvider {
    fn read(&self, path: &str, _use_cache: bool) -> Result<String, TemplateError> {
        self.templates
            .get(&normalize_path(path))
            .map(|t| t.value().clone())
            .ok_or_else(|| TemplateError::NotFound(path.to_string()))
    }
}

/// 从模板根目录读取模板，路径不得越出根目录
#[derive(Debug)]
pub struct FileSystemTemplateProvider {
    root: PathBuf,
    contents: DashMap<String, String>,
}

impl FileSystemTemplateProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            contents: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The root-relative form of `path`; paths leaving the root are reported
    /// as not found.
    fn relative(&self, path: &str) -> Result<String, TemplateError> {
        contained_path(path).ok_or_else(|| {
            TemplateError::NotFound(format!(
                "{} (outside of template root {})",
                path,
                self.root.display()
            ))
        })
    }

    /// Reads every file below the root into the content cache and returns
    /// how many were loaded.
    pub fn preload(&self) -> Result<usize, TemplateError> {
        let mut count = 0;
        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let content = read_file(path)?;
            self.contents
                .insert(normalize_path(&relative.to_string_lossy()), content);
            count += 1;
        }
        info!("Preloaded {} templates from {}", count, self.root.display());
        Ok(count)
    }
}

fn read_file(path: &Path) -> Result<String, TemplateError> {
    fs::read_to_string(path).map_err(|source| {
        let display = path.display().to_string();
        if source.kind() == ErrorKind::NotFound {
            TemplateError::NotFound(display)
        } else {
            TemplateError::Io {
                path: display,
                source,
            }
        }
    })
}

impl TemplateProvider for FileSystemTemplateProvider {
    fn read(&self, path: &str, use_cache: bool) -> Result<String, TemplateError> {
        let key = self.relative(path)?;
        if use_cache {
            if let Some(content) = self.contents.get(&key) {
                return Ok(content.value().clone());
            }
        }

        let full = self.root.join(&key);
        debug!("Reading template {}", full.display());
        let content = read_file(&full)?;
        if use_cache {
            self.contents.insert(key, content.clone());
        }
        Ok(content)
    }
}

/// Templates embedded at build time with [`template_assets!`](crate::template_assets)
/// or registered through [`asset_loader`].
#[derive(Debug, Default, Clone, Copy)]
pub struct AssetTemplateProvider;

impl TemplateProvider for AssetTemplateProvider {
    fn read(&self, path: &str, _use_cache: bool) -> Result<String, TemplateError> {
        asset_loader::find_asset(path).ok_or_else(|| TemplateError::NotFound(path.to_string()))
    }
}

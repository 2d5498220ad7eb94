use crate::utils::normalize_path;
use anyhow::{Context, Result};
use dashmap::DashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use walkdir::WalkDir;

/// 模板名 → 模板内容
static TEMPLATE_ASSETS: OnceLock<DashMap<String, String>> = OnceLock::new();

fn store() -> &'static DashMap<String, String> {
    TEMPLATE_ASSETS.get_or_init(DashMap::new)
}

/// Registers embedded templates; called by code generated from
/// `template_assets!`.
pub fn load_assets(assets: Vec<(&str, &str)>) -> Result<()> {
    for (name, content) in assets {
        register(name, content, "memory")?;
    }
    Ok(())
}

pub fn find_asset(name: &str) -> Option<String> {
    store().get(&normalize_path(name)).map(|v| v.value().clone())
}

pub fn asset_names() -> Vec<String> {
    let mut names: Vec<String> = store().iter().map(|e| e.key().clone()).collect();
    names.sort();
    names
}

/// 递归读取指定目录及其子目录下的所有模板文件，以相对路径注册。
pub fn load_from_path(dir_path: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in WalkDir::new(dir_path).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let relative = path
            .strip_prefix(dir_path)
            .with_context(|| format!("Template outside of {}", dir_path.display()))?;
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read template: {}", path.display()))?;
        register(
            &relative.to_string_lossy(),
            &content,
            &path.display().to_string(),
        )?;
        count += 1;
    }
    Ok(count)
}

fn register(name: &str, content: &str, source: &str) -> Result<()> {
    let name = normalize_path(name);
    if store().insert(name.clone(), content.to_string()).is_some() {
        anyhow::bail!("Duplicate template '{}' registered from '{}'", name, source);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_and_find() {
        load_assets(vec![("loader/a.html", "A"), ("loader/b.html", "B")]).unwrap();
        assert_eq!(find_asset("./loader/a.html"), Some("A".to_string()));
        assert!(asset_names().contains(&"loader/b.html".to_string()));
        assert_eq!(find_asset("loader/missing.html"), None);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        load_assets(vec![("loader/dup.html", "1")]).unwrap();
        assert!(load_assets(vec![("loader/dup.html", "2")]).is_err());
    }

    #[test]
    fn test_load_from_path() {
        let dir = std::env::temp_dir().join(format!("stanza-assets-{}", std::process::id()));
        fs::create_dir_all(dir.join("mail")).unwrap();
        fs::write(dir.join("mail/welcome.txt"), "Welcome {{ name }}").unwrap();

        assert_eq!(load_from_path(&dir).unwrap(), 1);
        assert_eq!(
            find_asset("mail/welcome.txt"),
            Some("Welcome {{ name }}".to_string())
        );
        fs::remove_dir_all(&dir).unwrap();
    }
}

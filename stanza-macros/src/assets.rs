use glob::glob;
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use std::collections::hash_map::DefaultHasher;
use std::env;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use syn::{LitStr, parse_macro_input};

/// 模式中第一个通配符之前的目录，作为模板名的起点
fn base_dir(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    for part in Path::new(pattern).components() {
        let text = part.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) {
            break;
        }
        base.push(part);
    }
    if base.as_os_str() == pattern {
        // a literal file: its name is the last component
        base.pop();
    }
    base
}

pub fn template_assets_impl(input: TokenStream) -> TokenStream {
    // 1. 解析输入的字符串字面量（glob 模式）
    let pattern = parse_macro_input!(input as LitStr);
    let pattern_str = pattern.value();

    // 2. CARGO_MANIFEST_DIR 在编译时由 Cargo 设置，指向包含 Cargo.toml 的目录
    let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") else {
        return syn::Error::new(pattern.span(), "CARGO_MANIFEST_DIR is not set")
            .to_compile_error()
            .into();
    };
    let root = PathBuf::from(manifest_dir);
    let base = root.join(base_dir(&pattern_str));
    let full_pattern = root.join(&pattern_str);

    // 3. 查找匹配的文件
    let mut files: Vec<PathBuf> = match glob(&full_pattern.to_string_lossy()) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect(),
        Err(e) => {
            return syn::Error::new(pattern.span(), format!("Invalid glob pattern: {}", e))
                .to_compile_error()
                .into();
        }
    };
    files.sort();

    // 4. 模板名使用相对路径并统一为 `/` 分隔；内容由 include_str! 在编译时嵌入
    let assets: Vec<proc_macro2::TokenStream> = files
        .iter()
        .map(|file| {
            let name = file
                .strip_prefix(&base)
                .unwrap_or(file)
                .to_string_lossy()
                .replace('\\', "/");
            let path = file.to_string_lossy().to_string();
            quote! { (#name, include_str!(#path)) }
        })
        .collect();

    // 5. 基于模式字符串生成唯一的注册函数名，允许多次调用宏
    let mut hasher = DefaultHasher::new();
    pattern_str.hash(&mut hasher);
    let fn_name = format_ident!("__stanza_auto_register_templates_{}", hasher.finish());

    // 6. #[ctor] 使注册函数在 main 之前执行
    let output = quote! {
        #[stanza::ctor::ctor]
        fn #fn_name() {
            let assets = vec![
                #(#assets),*
            ];
            let _ = stanza::asset_loader::load_assets(assets);
        }
    };

    output.into()
}

use anyhow::{Context, bail};
use stanza::{FileSystemTemplateProvider, TemplateConfig, TemplateEngine, to_value};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (root, template, scope_file) = match args.as_slice() {
        [root, template] => (root, template, None),
        [root, template, scope] => (root, template, Some(scope)),
        _ => bail!("usage: stanza <template-dir> <template> [scope.json]"),
    };

    let scope = match scope_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read scope file: {}", path))?;
            let json: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("Invalid JSON in scope file: {}", path))?;
            to_value(&json)?
        }
        None => stanza::Value::empty_map(),
    };

    let engine = TemplateEngine::builder()
        .config(TemplateConfig::new())
        .provider(Arc::new(FileSystemTemplateProvider::new(root)))
        .build();

    info!("Rendering '{}' from {}", template, root);
    let output = engine.render_to_string(template, scope)?;
    print!("{}", output);
    Ok(())
}

use stanza::asset_loader;
use stanza::{AssetTemplateProvider, TemplateEngine, Value};
use std::sync::Arc;

stanza::template_assets!("tests/resources/templates/**/*.html");

#[test]
fn test_assets_registered_by_relative_name() {
    assert_eq!(
        asset_loader::find_asset("simple.html").as_deref(),
        Some("Hello {{ name }}!")
    );
    let names = asset_loader::asset_names();
    assert!(names.contains(&"partials/nav.html".to_string()), "{:?}", names);
}

#[test]
fn test_render_embedded_templates() {
    let engine = TemplateEngine::builder()
        .provider(Arc::new(AssetTemplateProvider))
        .build();
    assert_eq!(
        engine
            .render_to_string("partials/nav.html", Value::Null)
            .unwrap(),
        "<nav><a>home</a><a>about</a></nav>"
    );
    let out = engine
        .render(
            "page.html",
            &serde_json::json!({ "title": "Assets", "users": [] }),
        )
        .unwrap();
    assert!(out.starts_with("<!doctype html><title>Assets | Site</title>"), "{}", out);
}

use proc_macro::TokenStream;

mod assets;

/// Embeds every file matching a glob pattern (relative to the crate root) and
/// registers it as a template before `main` runs.
///
/// Template names are the file paths relative to the part of the pattern
/// before its first wildcard:
///
/// ```ignore
/// stanza::template_assets!("templates/**/*.html");
/// // templates/layout/base.html is registered as "layout/base.html"
/// ```
#[proc_macro]
pub fn template_assets(input: TokenStream) -> TokenStream {
    assets::template_assets_impl(input)
}

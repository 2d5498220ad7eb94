pub mod asset_loader;
pub mod error;
pub mod lexer;
pub mod models;
pub mod template_provider;
pub mod tpl;
pub mod utils;
pub mod value;

#[doc(hidden)]
pub use ctor;
pub use stanza_macros::template_assets;

pub use error::TemplateError;
pub use models::template_config::TemplateConfig;
pub use template_provider::{
    AssetTemplateProvider, FileSystemTemplateProvider, MemoryTemplateProvider, TemplateProvider,
};
pub use tpl::{TemplateCache, TemplateEngine, TemplateEngineBuilder};
pub use value::{Value, to_value};

mod builtin_tags;
pub mod cache;
pub mod engine;
pub mod expr;
pub mod functions;
pub mod instr;
mod parser;
mod render;
pub mod render_context;
pub mod segments;
pub mod tags;
pub mod unit;

pub use cache::{CacheEntry, TemplateCache};
pub use engine::{TemplateEngine, TemplateEngineBuilder};
pub use expr::{Expr, ExpressionParser};
pub use functions::FunctionRegistry;
pub use instr::{CustomInstr, Instr, MacroDef};
pub use render_context::{RenderContext, Scope};
pub use segments::{SegmentAccumulator, Segments};
pub use tags::{BuiltinTag, ParseOutcome, TagHandler, TagRegistry, Terminator};
pub use unit::{CompiledUnit, Generated};

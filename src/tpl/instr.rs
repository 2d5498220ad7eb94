use crate::error::TemplateError;
use crate::tpl::expr::Expr;
use crate::tpl::render_context::RenderContext;
use std::fmt::{self, Write};
use std::sync::Arc;

/// Behaviour contributed by an extension tag, executed by the interpreter.
pub trait CustomInstr: fmt::Debug + Send + Sync {
    fn execute(&self, ctx: &mut RenderContext<'_>) -> Result<(), TemplateError>;
}

/// One render-program instruction.
#[derive(Debug, Clone)]
pub enum Instr {
    WriteText(String),
    WriteExpr(Expr),
    If {
        branches: Vec<(Expr, Vec<Instr>)>,
        otherwise: Vec<Instr>,
    },
    For {
        key: Option<String>,
        value: String,
        iterable: Expr,
        body: Vec<Instr>,
        otherwise: Vec<Instr>,
    },
    Set {
        name: String,
        value: Expr,
    },
    Capture {
        name: String,
        body: Vec<Instr>,
    },
    CallBlock(String),
    Extends(Expr),
    Include {
        template: Expr,
        with: Option<Expr>,
        only: bool,
        ignore_missing: bool,
    },
    Import {
        template: Expr,
        alias: String,
    },
    FromImport {
        template: Expr,
        names: Vec<(String, String)>,
    },
    Custom(Arc<dyn CustomInstr>),
}

#[derive(Debug, Clone, Default)]
pub struct MacroDef {
    pub params: Vec<(String, Option<Expr>)>,
    pub body: Vec<Instr>,
}

impl MacroDef {
    pub fn signature(&self) -> String {
        self.params
            .iter()
            .map(|(name, default)| match default {
                Some(d) => format!("{} = {}", name, d),
                None => name.clone(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn pad(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

/// Appends a readable listing of `instrs` to `out`, one instruction per line.
pub fn write_listing(out: &mut String, instrs: &[Instr], indent: usize) -> fmt::Result {
    for instr in instrs {
        pad(out, indent);
        match instr {
            Instr::WriteText(text) => writeln!(out, "write_text {:?}", text)?,
            Instr::WriteExpr(expr) => writeln!(out, "write_expr {}", expr)?,
            Instr::If {
                branches,
                otherwise,
            } => {
                for (i, (cond, body)) in branches.iter().enumerate() {
                    if i > 0 {
                        pad(out, indent);
                    }
                    let head = if i == 0 { "if" } else { "elseif" };
                    writeln!(out, "{} {}:", head, cond)?;
                    write_listing(out, body, indent + 1)?;
                }
                if !otherwise.is_empty() {
                    pad(out, indent);
                    writeln!(out, "else:")?;
                    write_listing(out, otherwise, indent + 1)?;
                }
                pad(out, indent);
                writeln!(out, "end")?;
            }
            Instr::For {
                key,
                value,
                iterable,
                body,
                otherwise,
            } => {
                match key {
                    Some(key) => writeln!(out, "for {}, {} in {}:", key, value, iterable)?,
                    None => writeln!(out, "for {} in {}:", value, iterable)?,
                }
                write_listing(out, body, indent + 1)?;
                if !otherwise.is_empty() {
                    pad(out, indent);
                    writeln!(out, "else:")?;
                    write_listing(out, otherwise, indent + 1)?;
                }
                pad(out, indent);
                writeln!(out, "end")?;
            }
            Instr::Set { name, value } => writeln!(out, "set {} = {}", name, value)?,
            Instr::Capture { name, body } => {
                writeln!(out, "capture {}:", name)?;
                write_listing(out, body, indent + 1)?;
                pad(out, indent);
                writeln!(out, "end")?;
            }
            Instr::CallBlock(name) => writeln!(out, "call_block {:?}", name)?,
            Instr::Extends(parent) => writeln!(out, "extends {}", parent)?,
            Instr::Include {
                template,
                with,
                only,
                ignore_missing,
            } => {
                write!(out, "include {}", template)?;
                if *ignore_missing {
                    write!(out, " ignore missing")?;
                }
                if let Some(with) = with {
                    write!(out, " with {}", with)?;
                }
                if *only {
                    write!(out, " only")?;
                }
                writeln!(out)?;
            }
            Instr::Import { template, alias } => {
                writeln!(out, "import {} as {}", template, alias)?
            }
            Instr::FromImport { template, names } => {
                let names = names
                    .iter()
                    .map(|(name, alias)| format!("{} as {}", name, alias))
                    .collect::<Vec<_>>()
                    .join(", ");
                writeln!(out, "from {} import {}", template, names)?
            }
            Instr::Custom(custom) => writeln!(out, "custom {:?}", custom)?,
        }
    }
    Ok(())
}

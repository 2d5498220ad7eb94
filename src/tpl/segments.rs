use crate::error::TemplateError;
use crate::tpl::expr::Expr;
use crate::tpl::instr::{Instr, MacroDef, write_listing};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SegmentName {
    Main,
    Block(String),
    Macro(String),
}

#[derive(Debug)]
enum Frame {
    Segment(SegmentName),
    Capture(Vec<Instr>),
}

/// Named, append-only instruction buffers (`main`, one per block, one per
/// macro) with scoped write redirection.
///
/// Writing under an existing name appends, so a block entered from several
/// places accumulates its bodies in call order.
#[derive(Debug)]
pub struct SegmentAccumulator {
    main: Vec<Instr>,
    blocks: BTreeMap<String, Vec<Instr>>,
    macros: BTreeMap<String, Vec<Instr>>,
    macro_params: BTreeMap<String, Vec<(String, Option<Expr>)>>,
    frames: Vec<Frame>,
}

impl Default for SegmentAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentAccumulator {
    /// A fresh accumulator with `main` active.
    pub fn new() -> Self {
        Self {
            main: Vec::new(),
            blocks: BTreeMap::new(),
            macros: BTreeMap::new(),
            macro_params: BTreeMap::new(),
            frames: vec![Frame::Segment(SegmentName::Main)],
        }
    }

    /// Appends to the active segment (or the innermost capture).
    pub fn write(&mut self, instr: Instr) {
        match self.frames.last_mut() {
            Some(Frame::Capture(buf)) => buf.push(instr),
            Some(Frame::Segment(SegmentName::Block(name))) => {
                self.blocks.entry(name.clone()).or_default().push(instr)
            }
            Some(Frame::Segment(SegmentName::Macro(name))) => {
                self.macros.entry(name.clone()).or_default().push(instr)
            }
            Some(Frame::Segment(SegmentName::Main)) | None => self.main.push(instr),
        }
    }

    /// Runs `body` with the block segment `name` active, then restores the
    /// previous segment whether or not `body` failed.
    pub fn with_block<R>(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        self.blocks.entry(name.to_string()).or_default();
        self.scoped(Frame::Segment(SegmentName::Block(name.to_string())), body)
    }

    pub fn with_macro<R>(
        &mut self,
        name: &str,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        self.macros.entry(name.to_string()).or_default();
        self.scoped(Frame::Segment(SegmentName::Macro(name.to_string())), body)
    }

    /// Redirects writes made by `body` into a detached buffer and returns it.
    pub fn capture<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<(Vec<Instr>, R), TemplateError> {
        self.frames.push(Frame::Capture(Vec::new()));
        let result = body(self);
        let captured = match self.frames.pop() {
            Some(Frame::Capture(buf)) => buf,
            _ => Vec::new(),
        };
        result.map(|r| (captured, r))
    }

    fn scoped<R>(
        &mut self,
        frame: Frame,
        body: impl FnOnce(&mut Self) -> Result<R, TemplateError>,
    ) -> Result<R, TemplateError> {
        self.frames.push(frame);
        let result = body(self);
        self.frames.pop();
        result
    }

    pub fn set_macro_params(&mut self, name: &str, params: Vec<(String, Option<Expr>)>) {
        self.macro_params.insert(name.to_string(), params);
    }

    pub fn in_main(&self) -> bool {
        matches!(self.frames.last(), Some(Frame::Segment(SegmentName::Main)))
    }

    pub fn main(&self) -> &[Instr] {
        &self.main
    }

    pub fn block(&self, name: &str) -> Option<&[Instr]> {
        self.blocks.get(name).map(Vec::as_slice)
    }

    pub fn macro_segment(&self, name: &str) -> Option<&[Instr]> {
        self.macros.get(name).map(Vec::as_slice)
    }

    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    pub fn finish(self) -> Segments {
        let mut macro_params = self.macro_params;
        let macros = self
            .macros
            .into_iter()
            .map(|(name, body)| {
                let params = macro_params.remove(&name).unwrap_or_default();
                (name, MacroDef { params, body })
            })
            .collect();
        Segments {
            main: self.main,
            blocks: self.blocks,
            macros,
        }
    }
}

/// Finished segments of one compiled template.
#[derive(Debug, Clone, Default)]
pub struct Segments {
    pub main: Vec<Instr>,
    pub blocks: BTreeMap<String, Vec<Instr>>,
    pub macros: BTreeMap<String, MacroDef>,
}

impl Segments {
    /// Assembles the program listing: render entry, `main`, one method per
    /// block and the macro namespace.
    pub fn listing(&self, name: &str) -> String {
        let mut out = String::new();
        // writing into a String cannot fail
        let _ = self.write_program(&mut out, name);
        out
    }

    fn write_program(&self, out: &mut String, name: &str) -> std::fmt::Result {
        use std::fmt::Write;

        writeln!(out, "template {:?}", name)?;
        writeln!(out, "render:")?;
        writeln!(out, "  set_current_template")?;
        writeln!(out, "  call main")?;
        writeln!(out, "main:")?;
        write_listing(out, &self.main, 1)?;
        for (block, body) in &self.blocks {
            writeln!(out, "block {}:", block)?;
            writeln!(out, "  with_current_block {:?}", block)?;
            write_listing(out, body, 2)?;
        }
        writeln!(out, "macros:")?;
        writeln!(out, "  bind runtime")?;
        for (name, def) in &self.macros {
            writeln!(out, "  macro {}({}):", name, def.signature())?;
            write_listing(out, &def.body, 2)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Instr {
        Instr::WriteText(s.to_string())
    }

    #[test]
    fn test_writes_go_to_active_segment() {
        let mut acc = SegmentAccumulator::new();
        acc.write(text("a"));
        acc.with_block("content", |acc| {
            acc.write(text("b"));
            acc.with_macro("m", |acc| {
                acc.write(text("c"));
                Ok(())
            })?;
            acc.write(text("d"));
            Ok(())
        })
        .unwrap();
        acc.write(text("e"));

        assert_eq!(acc.main().len(), 2);
        assert_eq!(acc.block("content").map(<[Instr]>::len), Some(2));
        assert_eq!(acc.macro_segment("m").map(<[Instr]>::len), Some(1));
        assert!(acc.in_main());
    }

    #[test]
    fn test_block_reentry_concatenates() {
        let mut acc = SegmentAccumulator::new();
        acc.with_block("b", |acc| {
            acc.write(text("first"));
            Ok(())
        })
        .unwrap();
        acc.with_block("b", |acc| {
            acc.write(text("second"));
            Ok(())
        })
        .unwrap();

        let listing = acc.finish().listing("t");
        let first = listing.find("\"first\"").unwrap();
        let second = listing.find("\"second\"").unwrap();
        assert!(first < second);
        assert_eq!(listing.matches("block b:").count(), 1);
    }

    #[test]
    fn test_segment_restored_after_failure() {
        let mut acc = SegmentAccumulator::new();
        let result: Result<(), _> = acc.with_block("b", |_| Err(TemplateError::syntax("boom")));
        assert!(result.is_err());
        assert!(acc.in_main());
        acc.write(text("x"));
        assert_eq!(acc.main().len(), 1);
    }

    #[test]
    fn test_capture_detaches_writes() {
        let mut acc = SegmentAccumulator::new();
        let (captured, value) = acc
            .capture(|acc| {
                acc.write(text("inner"));
                acc.with_block("nested", |acc| {
                    acc.write(text("block body"));
                    Ok(())
                })?;
                Ok(42)
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(captured.len(), 1);
        assert!(acc.main().is_empty());
        assert_eq!(acc.block("nested").map(<[Instr]>::len), Some(1));
    }
}

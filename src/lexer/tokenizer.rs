use crate::error::TemplateError;
use crate::lexer::token::{ExprToken, ExprTokenKind, TemplateToken};

const OPERATORS_2: [&str; 7] = ["..", "//", "**", "==", "!=", "<=", ">="];
const OPERATORS_1: &str = "()[]{},.:|?=<>+-*/%~";

/// 将模板文本切分为 text / expression / block 三类 token
pub fn tokenize(source: &str) -> Result<Vec<TemplateToken>, TemplateError> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut trim_next = false;

    while pos < source.len() {
        let Some(start) = find_open(source, pos) else {
            push_text(&mut tokens, &source[pos..], trim_next, false);
            break;
        };

        let kind = source.as_bytes()[start + 1];
        let mut inner = start + 2;
        let trim_before = source[inner..].starts_with('-');
        if trim_before {
            inner += 1;
        }
        push_text(&mut tokens, &source[pos..start], trim_next, trim_before);

        match kind {
            b'#' => {
                let end = source[inner..]
                    .find("#}")
                    .map(|i| inner + i)
                    .ok_or_else(|| error_at(source, start, "Unterminated comment"))?;
                trim_next = end > inner && source[..end].ends_with('-');
                pos = end + 2;
            }
            b'{' => {
                let (expr, end, trim_after) = scan_expression(source, inner, Some("}}"))
                    .map_err(|e| reclassify_unterminated(e, source, start, "expression"))?;
                tokens.push(TemplateToken::Expression(expr));
                trim_next = trim_after;
                pos = end;
            }
            _ => {
                let (expr, end, trim_after) = scan_expression(source, inner, Some("%}"))
                    .map_err(|e| reclassify_unterminated(e, source, start, "block"))?;
                tokens.push(TemplateToken::Block(expr));
                trim_next = trim_after;
                pos = end;
            }
        }
    }

    Ok(tokens)
}

/// Tokenizes a standalone expression such as `1 + 2 * x`.
pub fn tokenize_expression(source: &str) -> Result<Vec<ExprToken>, TemplateError> {
    scan_expression(source, 0, None).map(|(tokens, _, _)| tokens)
}

fn find_open(source: &str, mut pos: usize) -> Option<usize> {
    while let Some(i) = source[pos..].find('{') {
        let at = pos + i;
        match source.as_bytes().get(at + 1) {
            Some(b'{') | Some(b'%') | Some(b'#') => return Some(at),
            _ => pos = at + 1,
        }
    }
    None
}

fn push_text(tokens: &mut Vec<TemplateToken>, text: &str, trim_start: bool, trim_end: bool) {
    let text = if trim_start { text.trim_start() } else { text };
    let text = if trim_end { text.trim_end() } else { text };
    if !text.is_empty() {
        tokens.push(TemplateToken::Text(text.to_string()));
    }
}

/// Scans expression tokens from `pos` until `close` (or the end of input when
/// `close` is `None`). Returns the tokens, the offset after the delimiter and
/// whether the delimiter requested trimming of the following text.
fn scan_expression(
    source: &str,
    mut pos: usize,
    close: Option<&str>,
) -> Result<(Vec<ExprToken>, usize, bool), TemplateError> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();

    loop {
        while pos < source.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let rest = &source[pos..];

        match close {
            Some(close) => {
                if rest.is_empty() {
                    return Err(error_at(source, pos, "Unterminated delimiter"));
                }
                if rest.starts_with('-') && rest[1..].starts_with(close) {
                    return Ok((tokens, pos + 1 + close.len(), true));
                }
                if rest.starts_with(close) {
                    return Ok((tokens, pos + close.len(), false));
                }
            }
            None if rest.is_empty() => return Ok((tokens, pos, false)),
            None => {}
        }

        let c = rest.chars().next().unwrap_or_default();
        if c.is_ascii_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            tokens.push(ExprToken::new(ExprTokenKind::Id, &rest[..len], pos));
            pos += len;
        } else if c.is_ascii_digit() {
            let len = number_len(rest);
            tokens.push(ExprToken::new(ExprTokenKind::Number, &rest[..len], pos));
            pos += len;
        } else if c == '"' || c == '\'' {
            let (value, len) = scan_string(rest, c).ok_or_else(|| {
                error_at(source, pos, "Unterminated string literal")
            })?;
            tokens.push(ExprToken::new(ExprTokenKind::String, value, pos));
            pos += len;
        } else if let Some(op) = OPERATORS_2.iter().find(|op| rest.starts_with(**op)) {
            tokens.push(ExprToken::new(ExprTokenKind::Operator, *op, pos));
            pos += op.len();
        } else if OPERATORS_1.contains(c) {
            tokens.push(ExprToken::new(ExprTokenKind::Operator, c.to_string(), pos));
            pos += 1;
        } else {
            return Err(error_at(
                source,
                pos,
                &format!("Unexpected character '{}'", c),
            ));
        }
    }
}

fn number_len(rest: &str) -> usize {
    let bytes = rest.as_bytes();
    if bytes.len() > 2 && bytes[0] == b'0' && matches!(bytes[1], b'x' | b'X' | b'b' | b'B') {
        let digits = rest[2..]
            .find(|ch: char| !ch.is_ascii_hexdigit())
            .unwrap_or(rest.len() - 2);
        return 2 + digits;
    }
    let mut len = rest
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(rest.len());
    // `1..3` is a range, not a fraction
    if bytes.get(len) == Some(&b'.') && bytes.get(len + 1).is_some_and(u8::is_ascii_digit) {
        len += 1;
        len += rest[len..]
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len() - len);
    }
    len
}

fn scan_string(rest: &str, quote: char) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                let (_, escaped) = chars.next()?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
            }
            c if c == quote => return Some((value, i + c.len_utf8())),
            c => value.push(c),
        }
    }
    None
}

pub(crate) fn position(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset.min(source.len())];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map(|i| before[i + 1..].chars().count())
        .unwrap_or_else(|| before.chars().count())
        + 1;
    (line, column)
}

fn error_at(source: &str, offset: usize, message: &str) -> TemplateError {
    let (line, column) = position(source, offset);
    TemplateError::Tokenize {
        message: message.to_string(),
        line,
        column,
    }
}

fn reclassify_unterminated(
    e: TemplateError,
    source: &str,
    start: usize,
    what: &str,
) -> TemplateError {
    match e {
        TemplateError::Tokenize { ref message, .. } if message == "Unterminated delimiter" => {
            error_at(source, start, &format!("Unterminated {}", what))
        }
        other => other,
    }
}

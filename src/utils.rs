/// 规范化路径：统一分隔符，去掉空段与 `.`，折叠 `..`
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let absolute = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// 模板相对路径：去掉 `.` 与空段，折叠 `..`
///
/// Returns `None` for absolute paths and for paths whose `..` segments climb
/// above the starting directory.
pub fn contained_path(path: &str) -> Option<String> {
    let path = path.replace('\\', "/");
    let first = path.split('/').next().unwrap_or_default();
    if path.starts_with('/') || first.ends_with(':') {
        return None;
    }
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Whether `path` stays inside `base` once both are normalized.
pub fn path_is_inside(base: &str, path: &str) -> bool {
    let base = normalize_path(base);
    let path = normalize_path(path);
    if path == base {
        return true;
    }
    let prefix = if base.ends_with('/') {
        base
    } else {
        format!("{}/", base)
    };
    path.starts_with(&prefix)
}

/// Interprets a numeric literal: `0x` hex, `0b` binary, a leading `0` for
/// octal, decimals with a fraction, or plain integers in `radix`.
pub fn interpret_number(text: &str, radix: Option<u32>) -> Option<f64> {
    let text = text.trim();
    if radix.is_none() && text.contains('.') {
        return text.parse::<f64>().ok();
    }
    interpret_integer(text, radix).map(|v| v as f64)
}

/// Integer form of [`interpret_number`], without going through `f64`.
pub fn interpret_integer(text: &str, radix: Option<u32>) -> Option<i64> {
    let text = text.trim();
    let (digits, radix) = match radix {
        Some(radix) => (text, radix),
        None => {
            if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                (hex, 16)
            } else if let Some(bin) = text.strip_prefix("0b").or_else(|| text.strip_prefix("0B")) {
                (bin, 2)
            } else if text.len() > 1 && text.starts_with('0') {
                (&text[1..], 8)
            } else {
                (text, 10)
            }
        }
    };
    i64::from_str_radix(digits, radix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/this/is//a/path/../test"), "/this/is/a/test");
        assert_eq!(normalize_path("this/is//a/path/../test"), "this/is/a/test");
        assert_eq!(normalize_path("../../"), "");
        assert_eq!(
            normalize_path("C:\\htdocs\\stanza\\benchmarks/../test/templates"),
            "C:/htdocs/stanza/test/templates"
        );
    }

    #[test]
    fn test_contained_path() {
        assert_eq!(contained_path("a/./b//c.html").as_deref(), Some("a/b/c.html"));
        assert_eq!(contained_path("a/../b.html").as_deref(), Some("b.html"));
        assert_eq!(contained_path("a\\b.html").as_deref(), Some("a/b.html"));
        assert_eq!(contained_path("../b.html"), None);
        assert_eq!(contained_path("a/../../b.html"), None);
        assert_eq!(contained_path("/etc/hostname"), None);
        assert_eq!(contained_path("C:/templates/a.html"), None);
    }

    #[test]
    fn test_path_is_inside() {
        assert!(path_is_inside("/base", "/base"));
        assert!(path_is_inside("/base/", "/base/"));
        assert!(path_is_inside("/base", "/base/test"));
        assert!(path_is_inside("/base", "/base/demo/../test"));
        assert!(!path_is_inside("/base", "/base/../test"));
        assert!(!path_is_inside("/base", "/base2"));
        assert!(!path_is_inside("/base/", "/base2/"));
    }

    #[test]
    fn test_interpret_number() {
        assert_eq!(interpret_number("0", None), Some(0.0));
        assert_eq!(interpret_number("10", None), Some(10.0));
        assert_eq!(interpret_number("0x10", None), Some(16.0));
        assert_eq!(interpret_number("0777", None), Some(511.0));
        assert_eq!(interpret_number("0b111", None), Some(7.0));
        assert_eq!(interpret_number("11.7", None), Some(11.7));
        assert_eq!(interpret_number("333", Some(16)), Some(819.0));
        assert_eq!(interpret_number("09", None), None);
    }

    #[test]
    fn test_interpret_integer_keeps_precision() {
        assert_eq!(
            interpret_integer("9007199254740993", None),
            Some(9_007_199_254_740_993)
        );
        assert_eq!(interpret_integer("0x7fffffffffffffff", None), Some(i64::MAX));
        assert_eq!(interpret_integer("0b101", None), Some(5));
        assert_eq!(interpret_integer("017", None), Some(15));
        assert_eq!(interpret_integer("1.5", None), None);
        assert_eq!(interpret_integer("99999999999999999999", None), None);
    }
}

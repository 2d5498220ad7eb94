use crate::error::TemplateError;
use crate::value::Value;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Arc;

pub type FilterFn = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, TemplateError> + Send + Sync>;
pub type FunctionFn = Arc<dyn Fn(&[Value]) -> Result<Value, TemplateError> + Send + Sync>;

/// Filters (`value|name(args)`) and functions (`name(args)`) callable from
/// expressions.
#[derive(Clone)]
pub struct FunctionRegistry {
    filters: HashMap<String, FilterFn>,
    functions: HashMap<String, FunctionFn>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            filters: HashMap::new(),
            functions: HashMap::new(),
        };
        registry.register_builtins();
        registry
    }

    pub fn register_filter<F>(&mut self, name: &str, filter: F)
    where
        F: Fn(&Value, &[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        self.filters.insert(name.to_string(), Arc::new(filter));
    }

    pub fn register_function<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, TemplateError> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    pub fn filter(&self, name: &str) -> Option<&FilterFn> {
        self.filters.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionFn> {
        self.functions.get(name)
    }

    fn register_builtins(&mut self) {
        self.register_filter("upper", |v, _| Ok(Value::Str(v.to_string().to_uppercase())));
        self.register_filter("lower", |v, _| Ok(Value::Str(v.to_string().to_lowercase())));
        self.register_filter("capitalize", |v, _| Ok(Value::Str(capitalize(&v.to_string()))));
        self.register_filter("title", |v, _| {
            let s = v.to_string();
            let words: Vec<String> = s.split(' ').map(capitalize).collect();
            Ok(Value::Str(words.join(" ")))
        });
        self.register_filter("trim", |v, _| Ok(Value::Str(v.to_string().trim().to_string())));
        self.register_filter("length", |v, _| Ok(Value::from(v.len().unwrap_or(0))));
        self.register_filter("join", |v, args| {
            let sep = args.first().map(Value::to_string).unwrap_or_default();
            match v {
                Value::List(items) => Ok(Value::Str(
                    items
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(&sep),
                )),
                other => Ok(Value::Str(other.to_string())),
            }
        });
        self.register_filter("default", |v, args| {
            if v.is_empty() {
                Ok(args.first().cloned().unwrap_or_default())
            } else {
                Ok(v.clone())
            }
        });
        self.register_filter("escape", |v, _| Ok(Value::Str(escape_html(&v.to_string()))));
        self.register_filter("e", |v, _| Ok(Value::Str(escape_html(&v.to_string()))));
        self.register_filter("raw", |v, _| Ok(v.clone()));
        self.register_filter("reverse", |v, _| match v {
            Value::List(items) => Ok(Value::List(items.iter().rev().cloned().collect())),
            other => Ok(Value::Str(other.to_string().chars().rev().collect())),
        });
        self.register_filter("first", |v, _| Ok(v.get_item(&Value::I64(0)).unwrap_or_default()));
        self.register_filter("last", |v, _| Ok(v.get_item(&Value::I64(-1)).unwrap_or_default()));
        self.register_filter("keys", |v, _| match v {
            Value::Map(m) => Ok(Value::List(m.keys().map(|k| Value::from(k.as_str())).collect())),
            Value::List(l) => Ok(Value::List((0..l.len()).map(Value::from).collect())),
            _ => Ok(Value::List(Vec::new())),
        });
        self.register_filter("sort", |v, _| match v {
            Value::List(items) => {
                let mut items = items.clone();
                items.sort_by(|a, b| a.compare(b).unwrap_or(std::cmp::Ordering::Equal));
                Ok(Value::List(items))
            }
            other => Ok(other.clone()),
        });
        self.register_filter("abs", |v, _| match v {
            Value::I64(n) => Ok(n
                .checked_abs()
                .map(Value::I64)
                .unwrap_or(Value::F64((*n as f64).abs()))),
            other => number(other, "abs").map(|n| Value::F64(n.abs())),
        });
        self.register_filter("round", |v, args| {
            let n = number(v, "round")?;
            let precision = args.first().and_then(Value::as_i64).unwrap_or(0);
            if precision <= 0 {
                return Ok(Value::I64(n.round() as i64));
            }
            let factor = 10f64.powi(precision as i32);
            Ok(Value::F64((n * factor).round() / factor))
        });
        self.register_filter("replace", |v, args| {
            let mut s = v.to_string();
            match args.first() {
                Some(Value::Map(pairs)) => {
                    for (from, to) in pairs {
                        s = s.replace(from.as_str(), &to.to_string());
                    }
                }
                Some(from) => {
                    let to = args.get(1).map(Value::to_string).unwrap_or_default();
                    s = s.replace(&from.to_string(), &to);
                }
                None => {}
            }
            Ok(Value::Str(s))
        });
        self.register_filter("date", |v, args| {
            let format = args
                .first()
                .map(Value::to_string)
                .unwrap_or_else(|| "%Y-%m-%d".to_string());
            format_date(v, &format)
        });
        self.register_filter("json_encode", |v, _| {
            serde_json::to_string(v)
                .map(Value::Str)
                .map_err(|e| TemplateError::Value(e.to_string()))
        });

        self.register_function("range", |args| match args {
            [end] => range(&Value::I64(0), end, None),
            [start, end] => range(start, end, None),
            [start, end, step, ..] => range(start, end, Some(step)),
            [] => Err(TemplateError::render("range() expects at least one argument")),
        });
        self.register_function("min", |args| extreme(args, std::cmp::Ordering::Less));
        self.register_function("max", |args| extreme(args, std::cmp::Ordering::Greater));
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn number(v: &Value, filter: &str) -> Result<f64, TemplateError> {
    v.as_f64().ok_or_else(|| {
        TemplateError::render(format!(
            "Filter '{}' expects a number but got {}",
            filter,
            v.type_name()
        ))
    })
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn format_date(v: &Value, format: &str) -> Result<Value, TemplateError> {
    let datetime = match v {
        Value::DateTime(dt) => *dt,
        Value::Date(d) => d.and_hms_opt(0, 0, 0).unwrap_or_default(),
        Value::Str(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
            .or_else(|_| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default())
            })
            .map_err(|e| TemplateError::render(format!("Invalid date '{}': {}", s, e)))?,
        Value::I64(ts) => chrono::DateTime::from_timestamp(*ts, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| TemplateError::render(format!("Invalid timestamp {}", ts)))?,
        other => {
            return Err(TemplateError::render(format!(
                "Filter 'date' cannot format a value of type {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Str(datetime.format(format).to_string()))
}

/// Inclusive range over integers or single characters.
pub fn range(start: &Value, end: &Value, step: Option<&Value>) -> Result<Value, TemplateError> {
    let step = match step {
        Some(s) => s
            .as_i64()
            .ok_or_else(|| TemplateError::render("range() step must be an integer"))?,
        None => 1,
    };
    if step == 0 {
        return Err(TemplateError::render("range() step must not be zero"));
    }
    let step = step.unsigned_abs() as usize;

    if let (Some(a), Some(b)) = (single_char(start), single_char(end)) {
        let chars: Vec<char> = if a <= b {
            (a..=b).step_by(step).collect()
        } else {
            (b..=a).rev().step_by(step).collect()
        };
        return Ok(Value::List(chars.into_iter().map(|c| Value::Str(c.to_string())).collect()));
    }

    let (a, b) = match (start.as_i64(), end.as_i64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(TemplateError::render(format!(
                "Cannot build a range from {} to {}",
                start.type_name(),
                end.type_name()
            )));
        }
    };
    let items: Vec<Value> = if a <= b {
        (a..=b).step_by(step).map(Value::I64).collect()
    } else {
        (b..=a).rev().step_by(step).map(Value::I64).collect()
    };
    Ok(Value::List(items))
}

fn single_char(v: &Value) -> Option<char> {
    let s = v.as_str()?;
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if !c.is_ascii_digit() => Some(c),
        _ => None,
    }
}

fn extreme(args: &[Value], keep: std::cmp::Ordering) -> Result<Value, TemplateError> {
    let items: &[Value] = match args {
        [Value::List(items)] => items.as_slice(),
        _ => args,
    };
    let mut best: Option<&Value> = None;
    for item in items {
        best = match best {
            Some(current) if item.compare(current) != Some(keep) => Some(current),
            _ => Some(item),
        };
    }
    Ok(best.cloned().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(name: &str, input: Value, args: &[Value]) -> Value {
        let registry = FunctionRegistry::new();
        let filter = registry.filter(name).unwrap();
        filter(&input, args).unwrap()
    }

    #[test]
    fn test_string_filters() {
        assert_eq!(apply("upper", "abc".into(), &[]), Value::from("ABC"));
        assert_eq!(apply("capitalize", "hELLO".into(), &[]), Value::from("Hello"));
        assert_eq!(apply("title", "hello big world".into(), &[]), Value::from("Hello Big World"));
        assert_eq!(apply("trim", "  x ".into(), &[]), Value::from("x"));
        assert_eq!(
            apply("escape", "<a href=\"x\">&</a>".into(), &[]),
            Value::from("&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;")
        );
        assert_eq!(
            apply("replace", "a-b-c".into(), &["-".into(), "+".into()]),
            Value::from("a+b+c")
        );
    }

    #[test]
    fn test_list_filters() {
        let list = Value::from(vec![3, 1, 2]);
        assert_eq!(apply("length", list.clone(), &[]), Value::I64(3));
        assert_eq!(apply("join", list.clone(), &[",".into()]), Value::from("3,1,2"));
        assert_eq!(apply("sort", list.clone(), &[]), Value::from(vec![1, 2, 3]));
        assert_eq!(apply("reverse", list.clone(), &[]), Value::from(vec![2, 1, 3]));
        assert_eq!(apply("first", list.clone(), &[]), Value::I64(3));
        assert_eq!(apply("last", list, &[]), Value::I64(2));
    }

    #[test]
    fn test_default_and_numbers() {
        assert_eq!(apply("default", Value::Null, &["n/a".into()]), Value::from("n/a"));
        assert_eq!(apply("default", "x".into(), &["n/a".into()]), Value::from("x"));
        assert_eq!(apply("abs", Value::I64(-4), &[]), Value::I64(4));
        assert_eq!(
            apply("abs", Value::I64(i64::MIN), &[]),
            Value::F64(-(i64::MIN as f64))
        );
        assert_eq!(apply("round", Value::F64(2.567), &[Value::I64(2)]), Value::F64(2.57));
        assert_eq!(apply("round", Value::F64(2.5), &[]), Value::I64(3));
    }

    #[test]
    fn test_date_filter() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(apply("date", date.into(), &["%d/%m/%Y".into()]), Value::from("09/03/2024"));
        assert_eq!(
            apply("date", "2024-03-09 10:30:00".into(), &["%H:%M".into()]),
            Value::from("10:30")
        );
    }

    #[test]
    fn test_range() {
        assert_eq!(
            range(&Value::I64(1), &Value::I64(3), None).unwrap(),
            Value::from(vec![1, 2, 3])
        );
        assert_eq!(
            range(&Value::I64(3), &Value::I64(1), None).unwrap(),
            Value::from(vec![3, 2, 1])
        );
        assert_eq!(
            range(&Value::I64(0), &Value::I64(10), Some(&Value::I64(5))).unwrap(),
            Value::from(vec![0, 5, 10])
        );
        assert_eq!(
            range(&"a".into(), &"c".into(), None).unwrap(),
            Value::from(vec!["a", "b", "c"])
        );
        assert!(range(&Value::I64(0), &Value::I64(1), Some(&Value::I64(0))).is_err());
    }

    #[test]
    fn test_min_max() {
        let registry = FunctionRegistry::new();
        let max = registry.function("max").unwrap();
        let min = registry.function("min").unwrap();
        assert_eq!(max(&[Value::I64(1), Value::I64(5), Value::I64(3)]).unwrap(), Value::I64(5));
        assert_eq!(min(&[Value::from(vec![4, 2, 8])]).unwrap(), Value::I64(2));
    }
}

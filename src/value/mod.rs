use crate::error::TemplateError;
use chrono::{NaiveDate, NaiveDateTime};
use serde::ser::{Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

pub mod serializer;

pub use serializer::to_value;

/// 模板作用域中的值
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(v) => v as f64,
            Number::Float(v) => v,
        }
    }
}

impl Value {
    pub fn empty_map() -> Self {
        Value::Map(BTreeMap::new())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I64(_) => "integer",
            Value::F64(_) => "float",
            Value::Str(_) => "string",
            Value::Date(_) => "date",
            Value::DateTime(_) => "datetime",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::I64(v) => *v != 0,
            Value::F64(v) => *v != 0.0 && !v.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => !l.is_empty(),
            Value::Map(m) => !m.is_empty(),
            Value::Date(_) | Value::DateTime(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self.to_number()? {
            Number::Int(v) => Some(v),
            Number::Float(v) if v.fract() == 0.0 => Some(v as i64),
            Number::Float(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.to_number().map(Number::as_f64)
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Str(s) => Some(s.chars().count()),
            Value::List(l) => Some(l.len()),
            Value::Map(m) => Some(m.len()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            other => other.len() == Some(0),
        }
    }

    pub fn is_iterable(&self) -> bool {
        matches!(self, Value::List(_) | Value::Map(_))
    }

    fn to_number(&self) -> Option<Number> {
        match self {
            Value::Null => Some(Number::Int(0)),
            Value::Bool(b) => Some(Number::Int(*b as i64)),
            Value::I64(v) => Some(Number::Int(*v)),
            Value::F64(v) => Some(Number::Float(*v)),
            Value::Str(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .map(Number::Int)
                    .or_else(|_| s.parse::<f64>().map(Number::Float))
                    .ok()
            }
            _ => None,
        }
    }

    /// 属性访问：`user.name`，列表支持数字下标
    pub fn get_attr(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(m) => m.get(key),
            Value::List(l) => key.parse::<usize>().ok().and_then(|i| l.get(i)),
            _ => None,
        }
    }

    /// 下标访问：`items[0]`、`map["key"]`，负数下标从末尾计算
    pub fn get_item(&self, index: &Value) -> Option<Value> {
        match self {
            Value::Map(m) => m.get(&index.to_string()).cloned(),
            Value::List(l) => {
                let i = index.as_i64()?;
                let i = if i < 0 { l.len() as i64 + i } else { i };
                usize::try_from(i).ok().and_then(|i| l.get(i)).cloned()
            }
            Value::Str(s) => {
                let i = index.as_i64()?;
                let count = s.chars().count() as i64;
                let i = if i < 0 { count + i } else { i };
                usize::try_from(i)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::Str(c.to_string()))
            }
            _ => None,
        }
    }

    pub fn contains(&self, needle: &Value) -> bool {
        match self {
            Value::List(l) => l.iter().any(|v| v.loose_eq(needle)),
            Value::Map(m) => m.contains_key(&needle.to_string()),
            Value::Str(s) => s.contains(&needle.to_string()),
            _ => false,
        }
    }

    /// Equality that treats integers and floats with the same magnitude as equal.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::I64(a), Value::F64(b)) | (Value::F64(b), Value::I64(a)) => *a as f64 == *b,
            (a, b) => a == b,
        }
    }

    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::List(_) | Value::Map(_), _) | (_, Value::List(_) | Value::Map(_)) => None,
            (a, b) => {
                let (a, b) = (a.to_number()?, b.to_number()?);
                match (a, b) {
                    (Number::Int(a), Number::Int(b)) => Some(a.cmp(&b)),
                    (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
                }
            }
        }
    }

    /// Key/value pairs a `for` loop walks over.
    pub fn iter_pairs(&self) -> Result<Vec<(Value, Value)>, TemplateError> {
        match self {
            Value::Null => Ok(Vec::new()),
            Value::List(l) => Ok(l
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::I64(i as i64), v.clone()))
                .collect()),
            Value::Map(m) => Ok(m
                .iter()
                .map(|(k, v)| (Value::Str(k.clone()), v.clone()))
                .collect()),
            Value::Str(s) => Ok(s
                .chars()
                .enumerate()
                .map(|(i, c)| (Value::I64(i as i64), Value::Str(c.to_string())))
                .collect()),
            other => Err(TemplateError::render(format!(
                "Cannot iterate over a value of type {}",
                other.type_name()
            ))),
        }
    }

    fn numbers(&self, other: &Value, op: &str) -> Result<(Number, Number), TemplateError> {
        match (self.to_number(), other.to_number()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(TemplateError::render(format!(
                "Unsupported operand types for '{}': {} and {}",
                op,
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, TemplateError> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => return Ok(Value::Str(format!("{}{}", a, b))),
            (Value::List(a), Value::List(b)) => {
                return Ok(Value::List(a.iter().chain(b.iter()).cloned().collect()));
            }
            _ => {}
        }
        Ok(match self.numbers(other, "+")? {
            (Number::Int(a), Number::Int(b)) => a
                .checked_add(b)
                .map(Value::I64)
                .unwrap_or(Value::F64(a as f64 + b as f64)),
            (a, b) => Value::F64(a.as_f64() + b.as_f64()),
        })
    }

    pub fn sub(&self, other: &Value) -> Result<Value, TemplateError> {
        Ok(match self.numbers(other, "-")? {
            (Number::Int(a), Number::Int(b)) => a
                .checked_sub(b)
                .map(Value::I64)
                .unwrap_or(Value::F64(a as f64 - b as f64)),
            (a, b) => Value::F64(a.as_f64() - b.as_f64()),
        })
    }

    pub fn mul(&self, other: &Value) -> Result<Value, TemplateError> {
        Ok(match self.numbers(other, "*")? {
            (Number::Int(a), Number::Int(b)) => a
                .checked_mul(b)
                .map(Value::I64)
                .unwrap_or(Value::F64(a as f64 * b as f64)),
            (a, b) => Value::F64(a.as_f64() * b.as_f64()),
        })
    }

    pub fn div(&self, other: &Value) -> Result<Value, TemplateError> {
        let (a, b) = self.numbers(other, "/")?;
        if b.as_f64() == 0.0 {
            return Err(TemplateError::render("Division by zero"));
        }
        Ok(match (a, b) {
            (Number::Int(a), Number::Int(b)) if a.checked_rem(b) == Some(0) => a
                .checked_div(b)
                .map(Value::I64)
                .unwrap_or(Value::F64(a as f64 / b as f64)),
            (a, b) => Value::F64(a.as_f64() / b.as_f64()),
        })
    }

    pub fn floor_div(&self, other: &Value) -> Result<Value, TemplateError> {
        let (a, b) = self.numbers(other, "//")?;
        if b.as_f64() == 0.0 {
            return Err(TemplateError::render("Division by zero"));
        }
        Ok(match (a, b) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_div_euclid(b)
                .map(Value::I64)
                .unwrap_or(Value::F64((a as f64 / b as f64).floor())),
            (a, b) => Value::F64((a.as_f64() / b.as_f64()).floor()),
        })
    }

    pub fn rem(&self, other: &Value) -> Result<Value, TemplateError> {
        let (a, b) = self.numbers(other, "%")?;
        if b.as_f64() == 0.0 {
            return Err(TemplateError::render("Modulo by zero"));
        }
        Ok(match (a, b) {
            // only i64::MIN % -1 overflows, and its remainder is 0
            (Number::Int(a), Number::Int(b)) => Value::I64(a.checked_rem(b).unwrap_or(0)),
            (a, b) => Value::F64(a.as_f64() % b.as_f64()),
        })
    }

    pub fn pow(&self, other: &Value) -> Result<Value, TemplateError> {
        Ok(match self.numbers(other, "**")? {
            (Number::Int(a), Number::Int(b)) if (0..=u32::MAX as i64).contains(&b) => a
                .checked_pow(b as u32)
                .map(Value::I64)
                .unwrap_or(Value::F64((a as f64).powf(b as f64))),
            (a, b) => Value::F64(a.as_f64().powf(b.as_f64())),
        })
    }

    pub fn neg(&self) -> Result<Value, TemplateError> {
        match self.to_number() {
            Some(Number::Int(v)) => Ok(v
                .checked_neg()
                .map(Value::I64)
                .unwrap_or(Value::F64(-(v as f64)))),
            Some(Number::Float(v)) => Ok(Value::F64(-v)),
            None => Err(TemplateError::render(format!(
                "Cannot negate a value of type {}",
                self.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::I64(v) => write!(f, "{}", v),
            Value::F64(v) => {
                if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
                    write!(f, "{}", *v as i64)
                } else {
                    write!(f, "{}", v)
                }
            }
            Value::Str(s) => f.write_str(s),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::DateTime(d) => write!(f, "{}", d.format("%Y-%m-%d %H:%M:%S")),
            Value::List(l) => {
                for (i, v) in l.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", v)?;
                }
                Ok(())
            }
            Value::Map(_) => {
                let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::I64(v) => serializer.serialize_i64(*v),
            Value::F64(v) => serializer.serialize_f64(*v),
            Value::Str(s) => serializer.serialize_str(s),
            Value::Date(_) | Value::DateTime(_) => serializer.collect_str(self),
            Value::List(l) => serializer.collect_seq(l),
            Value::Map(m) => serializer.collect_map(m),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I64(v as i64)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}
impl From<usize> for Value {
    fn from(v: usize) -> Self {
        i64::try_from(v)
            .map(Value::I64)
            .unwrap_or(Value::F64(v as f64))
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}
impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}
impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}
impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
impl From<BTreeMap<String, Value>> for Value {
    fn from(v: BTreeMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::I64(0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Str("0".into()).is_truthy());
        assert!(Value::F64(0.5).is_truthy());
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Null.to_string(), "");
        assert_eq!(Value::F64(3.0).to_string(), "3");
        assert_eq!(Value::F64(3.5).to_string(), "3.5");
        assert_eq!(Value::from(vec![1, 2, 3]).to_string(), "1,2,3");

        let mut map = BTreeMap::new();
        map.insert("a".to_string(), Value::I64(1));
        assert_eq!(Value::Map(map).to_string(), "{\"a\":1}");
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(Value::I64(1).add(&Value::I64(2)).unwrap(), Value::I64(3));
        assert_eq!(Value::I64(7).div(&Value::I64(2)).unwrap(), Value::F64(3.5));
        assert_eq!(Value::I64(6).div(&Value::I64(2)).unwrap(), Value::I64(3));
        assert_eq!(Value::I64(-7).floor_div(&Value::I64(2)).unwrap(), Value::I64(-4));
        assert_eq!(Value::I64(2).pow(&Value::I64(10)).unwrap(), Value::I64(1024));
        assert_eq!(
            Value::from("a").add(&Value::from("b")).unwrap(),
            Value::from("ab")
        );
        assert!(Value::I64(1).div(&Value::I64(0)).is_err());
        assert!(Value::List(vec![]).sub(&Value::I64(1)).is_err());
    }

    #[test]
    fn test_integer_overflow_falls_back_to_float() {
        let min = Value::I64(i64::MIN);
        let minus_one = Value::I64(-1);
        let flipped = Value::F64(-(i64::MIN as f64));
        assert_eq!(min.div(&minus_one).unwrap(), flipped);
        assert_eq!(min.floor_div(&minus_one).unwrap(), flipped);
        assert_eq!(min.rem(&minus_one).unwrap(), Value::I64(0));
        assert_eq!(min.neg().unwrap(), flipped);
        assert_eq!(Value::I64(-7).rem(&Value::I64(2)).unwrap(), Value::I64(-1));
    }

    #[test]
    fn test_compare_and_contains() {
        assert_eq!(Value::I64(1).compare(&Value::F64(1.5)), Some(Ordering::Less));
        assert_eq!(Value::from("b").compare(&Value::from("a")), Some(Ordering::Greater));
        assert!(Value::I64(2).loose_eq(&Value::F64(2.0)));
        assert!(Value::from(vec![1, 2]).contains(&Value::I64(2)));
        assert!(Value::from("hello").contains(&Value::from("ell")));
    }

    #[test]
    fn test_item_access() {
        let list = Value::from(vec!["a", "b", "c"]);
        assert_eq!(list.get_item(&Value::I64(-1)), Some(Value::from("c")));
        assert_eq!(list.get_attr("1"), Some(&Value::from("b")));
        assert_eq!(list.get_item(&Value::I64(5)), None);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

// The panel renders temperatures with a unit suffix. Depending on how the page was decoded the degree sign is either
// intact or arrives as the UTF-8 bytes read one at a time.
const CELSIUS_SUFFIXES: [&str; 2] = ["Â°C", "°C"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Float,
    Bool,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Float => f.write_str("float"),
            ValueType::Bool => f.write_str("bool"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TypedValue {
    Float(f64),
    Bool(bool),
}

/// Formats the value the way it is published: floats without a trailing `.0`, bools as `1`/`0`.
impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TypedValue::Float(v) => write!(f, "{}", v),
            TypedValue::Bool(v) => write!(f, "{}", u8::from(v)),
        }
    }
}

impl ValueType {
    /// Coerces raw element text, never failing. Text with no leading number reads as `0.0`.
    pub fn coerce(&self, raw: &str) -> TypedValue {
        match self {
            ValueType::Float => {
                let (number, _) = leading_float(strip_unit(raw));
                TypedValue::Float(number.unwrap_or(0.0))
            }
            ValueType::Bool => TypedValue::Bool(raw == "ON"),
        }
    }

    /// Like [`ValueType::coerce`], but a float whose text is not entirely numeric is an error instead of a zero.
    pub fn coerce_strict(&self, raw: &str) -> crate::Result<TypedValue> {
        match self {
            ValueType::Float => match leading_float(strip_unit(raw)) {
                (Some(number), "") => Ok(TypedValue::Float(number)),
                _ => Err(Error::InvalidValue {
                    raw: raw.to_owned(),
                    value_type: *self,
                }),
            },
            ValueType::Bool => Ok(self.coerce(raw)),
        }
    }
}

fn strip_unit(raw: &str) -> &str {
    let raw = raw.trim();
    CELSIUS_SUFFIXES
        .iter()
        .find_map(|suffix| raw.strip_suffix(suffix))
        .unwrap_or(raw)
        .trim()
}

/// Splits off the longest prefix of `s` that reads as a decimal number (optional sign, digits with at most one point,
/// optional exponent), returning it parsed along with whatever text follows.
fn leading_float(s: &str) -> (Option<f64>, &str) {
    let bytes = s.as_bytes();
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };

    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let int_end = digits_from(end);
    let mut mantissa_end = int_end;
    if bytes.get(int_end) == Some(&b'.') {
        mantissa_end = digits_from(int_end + 1);
    }

    // A lone sign or point is not a number.
    let has_digits = s[end..mantissa_end].bytes().any(|b| b.is_ascii_digit());
    if !has_digits {
        return (None, s);
    }
    end = mantissa_end;

    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+' | b'-')) {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }

    (s[..end].parse().ok(), &s[end..])
}

#[cfg(test)]
use pretty_assertions::assert_eq;

#[test]
fn test_coerce_float() {
    assert_eq!(ValueType::Float.coerce("21.5°C"), TypedValue::Float(21.5));
    assert_eq!(ValueType::Float.coerce("45.0Â°C"), TypedValue::Float(45.0));
    assert_eq!(ValueType::Float.coerce(" -3.5 °C "), TypedValue::Float(-3.5));
    assert_eq!(ValueType::Float.coerce("7"), TypedValue::Float(7.0));
    assert_eq!(ValueType::Float.coerce("1.5e2"), TypedValue::Float(150.0));
}

#[test]
fn test_coerce_float_is_lenient() {
    assert_eq!(ValueType::Float.coerce("abc"), TypedValue::Float(0.0));
    assert_eq!(ValueType::Float.coerce(""), TypedValue::Float(0.0));
    assert_eq!(ValueType::Float.coerce("-"), TypedValue::Float(0.0));
    assert_eq!(ValueType::Float.coerce("12.5 bar"), TypedValue::Float(12.5));
    assert_eq!(ValueType::Float.coerce("21,5°C"), TypedValue::Float(21.0));
    assert_eq!(ValueType::Float.coerce("3e"), TypedValue::Float(3.0));
}

#[test]
fn test_coerce_bool() {
    assert_eq!(ValueType::Bool.coerce("ON"), TypedValue::Bool(true));
    assert_eq!(ValueType::Bool.coerce("OFF"), TypedValue::Bool(false));
    assert_eq!(ValueType::Bool.coerce(""), TypedValue::Bool(false));
    assert_eq!(ValueType::Bool.coerce("on"), TypedValue::Bool(false));
    assert_eq!(ValueType::Bool.coerce(" ON"), TypedValue::Bool(false));
}

#[test]
fn test_coerce_strict() {
    assert_eq!(
        ValueType::Float.coerce_strict("21.5°C").unwrap(),
        TypedValue::Float(21.5)
    );
    assert_eq!(
        ValueType::Bool.coerce_strict("junk").unwrap(),
        TypedValue::Bool(false)
    );
    assert!(matches!(
        ValueType::Float.coerce_strict("abc"),
        Err(Error::InvalidValue { ref raw, value_type: ValueType::Float }) if raw == "abc"
    ));
    assert!(ValueType::Float.coerce_strict("12.5 bar").is_err());
}

#[test]
fn test_payload_format() {
    assert_eq!(TypedValue::Float(45.0).to_string(), "45");
    assert_eq!(TypedValue::Float(21.5).to_string(), "21.5");
    assert_eq!(TypedValue::Float(-0.25).to_string(), "-0.25");
    assert_eq!(TypedValue::Bool(true).to_string(), "1");
    assert_eq!(TypedValue::Bool(false).to_string(), "0");
}

#[test]
fn test_value_type_from_config() {
    let types: Vec<ValueType> = serde_json::from_str(r#"["float", "bool"]"#).unwrap();
    assert_eq!(types, vec![ValueType::Float, ValueType::Bool]);
    assert!(serde_json::from_str::<ValueType>(r#""string""#).is_err());
}

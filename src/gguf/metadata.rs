//! GGUF metadata values and typed accessors
//!
//! Metadata consumers downstream (architecture configs, tokenizer tables)
//! read keys permissively: a missing or differently-typed value yields the
//! zero value of the requested type rather than an error. Integer accessors
//! are cross-width, so a `u32` on the wire reads fine through
//! [`Value::as_int`].

/// A GGUF metadata value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned 8-bit integer
    U8(u8),
    /// Signed 8-bit integer
    I8(i8),
    /// Unsigned 16-bit integer
    U16(u16),
    /// Signed 16-bit integer
    I16(i16),
    /// Unsigned 32-bit integer
    U32(u32),
    /// Signed 32-bit integer
    I32(i32),
    /// 32-bit floating point
    F32(f32),
    /// Boolean (one byte on the wire)
    Bool(bool),
    /// UTF-8 string
    String(String),
    /// Typed array; nested arrays parse recursively
    Array(Vec<Value>),
    /// Unsigned 64-bit integer
    U64(u64),
    /// Signed 64-bit integer
    I64(i64),
    /// 64-bit floating point
    F64(f64),
}

const EMPTY: &[Value] = &[];

impl Value {
    /// Value as `u64`; any integer width converts, everything else is 0
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn as_uint(&self) -> u64 {
        match *self {
            Value::U8(v) => u64::from(v),
            Value::U16(v) => u64::from(v),
            Value::U32(v) => u64::from(v),
            Value::U64(v) => v,
            Value::I8(v) => v as u64,
            Value::I16(v) => v as u64,
            Value::I32(v) => v as u64,
            Value::I64(v) => v as u64,
            _ => 0,
        }
    }

    /// Value as `i64`; any integer width converts, everything else is 0
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn as_int(&self) -> i64 {
        match *self {
            Value::I8(v) => i64::from(v),
            Value::I16(v) => i64::from(v),
            Value::I32(v) => i64::from(v),
            Value::I64(v) => v,
            Value::U8(v) => i64::from(v),
            Value::U16(v) => i64::from(v),
            Value::U32(v) => i64::from(v),
            Value::U64(v) => v as i64,
            _ => 0,
        }
    }

    /// Value as `f64`; works for both float widths, everything else is 0
    #[must_use]
    pub fn as_float(&self) -> f64 {
        match *self {
            Value::F32(v) => f64::from(v),
            Value::F64(v) => v,
            _ => 0.0,
        }
    }

    /// Value as `bool`, or `false` if it is not a bool
    #[must_use]
    pub fn as_bool(&self) -> bool {
        matches!(self, Value::Bool(true))
    }

    /// Value as a string slice, or `""` if it is not a string
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Value::String(s) => s,
            _ => "",
        }
    }

    /// Value as an array slice, or an empty slice if it is not an array
    #[must_use]
    pub fn as_array(&self) -> &[Value] {
        match self {
            Value::Array(v) => v,
            _ => EMPTY,
        }
    }

    /// Array of integers widened to `i64`; empty for non-integer arrays
    #[must_use]
    pub fn as_ints(&self) -> Vec<i64> {
        self.as_array().iter().map(Value::as_int).collect()
    }

    /// Array of integers widened to `u64`; empty for non-integer arrays
    #[must_use]
    pub fn as_uints(&self) -> Vec<u64> {
        self.as_array().iter().map(Value::as_uint).collect()
    }

    /// Array of floats widened to `f64`; empty for non-float arrays
    #[must_use]
    pub fn as_floats(&self) -> Vec<f64> {
        self.as_array().iter().map(Value::as_float).collect()
    }

    /// Array of strings; non-string elements become `""`
    #[must_use]
    pub fn as_strings(&self) -> Vec<&str> {
        self.as_array().iter().map(Value::as_str).collect()
    }
}

/// A metadata key together with its value
#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    /// Metadata key (dotted namespace, e.g. `general.architecture`)
    pub key: String,
    /// Typed value
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_width_int_accessors() {
        assert_eq!(Value::U32(42).as_int(), 42);
        assert_eq!(Value::U8(255).as_uint(), 255);
        assert_eq!(Value::I16(-3).as_int(), -3);
        assert_eq!(Value::I64(-1).as_uint(), u64::MAX);
    }

    #[test]
    fn test_zero_value_on_mismatch() {
        assert_eq!(Value::String("x".into()).as_int(), 0);
        assert_eq!(Value::Bool(true).as_float(), 0.0);
        assert_eq!(Value::U32(7).as_str(), "");
        assert!(!Value::F32(1.0).as_bool());
        assert!(Value::U8(1).as_array().is_empty());
    }

    #[test]
    fn test_float_accessor() {
        assert!((Value::F32(1.5).as_float() - 1.5).abs() < 1e-9);
        assert!((Value::F64(2.5).as_float() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_array_accessors() {
        let arr = Value::Array(vec![Value::U32(1), Value::U32(2), Value::U32(3)]);
        assert_eq!(arr.as_ints(), vec![1, 2, 3]);
        assert_eq!(arr.as_uints(), vec![1, 2, 3]);

        let strs = Value::Array(vec![Value::String("a".into()), Value::String("b".into())]);
        assert_eq!(strs.as_strings(), vec!["a", "b"]);
    }
}

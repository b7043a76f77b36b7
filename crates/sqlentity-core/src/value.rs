//! Dynamic SQL values and the declared value types of mapped fields.

use crate::error::{Error, MappingError, MappingErrorKind, Result};
use serde::{Deserialize, Serialize};

/// A dynamically-typed SQL value.
///
/// Used for parameter binding, result fetching and entity snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 8-bit signed integer
    TinyInt(i8),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 32-bit floating point
    Float(f32),

    /// 64-bit floating point
    Double(f64),

    /// Arbitrary precision decimal (stored as string)
    Decimal(String),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// Date (days since epoch)
    Date(i32),

    /// Timestamp (microseconds since epoch)
    Timestamp(i64),

    /// UUID (as 16 bytes)
    Uuid([u8; 16]),

    /// JSON value
    Json(serde_json::Value),
}

/// The declared storage type of a mapped field.
///
/// Result values are coerced to this type when an entity is hydrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Float,
    Double,
    Decimal,
    Text,
    Bytes,
    Date,
    Timestamp,
    Uuid,
    Json,
}

impl ValueType {
    /// Get the SQL type name.
    pub const fn sql_name(&self) -> &'static str {
        match self {
            ValueType::Bool => "BOOLEAN",
            ValueType::TinyInt => "TINYINT",
            ValueType::SmallInt => "SMALLINT",
            ValueType::Int => "INTEGER",
            ValueType::BigInt => "BIGINT",
            ValueType::Float => "REAL",
            ValueType::Double => "DOUBLE",
            ValueType::Decimal => "DECIMAL",
            ValueType::Text => "TEXT",
            ValueType::Bytes => "BLOB",
            ValueType::Date => "DATE",
            ValueType::Timestamp => "TIMESTAMP",
            ValueType::Uuid => "UUID",
            ValueType::Json => "JSON",
        }
    }

    /// Is this one of the integer widths?
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            ValueType::TinyInt | ValueType::SmallInt | ValueType::Int | ValueType::BigInt
        )
    }
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "REAL",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::TinyInt(v) => Some(*v != 0),
            Value::SmallInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    ///
    /// Integer widths always widen. Floating point values convert only when
    /// they carry no fractional part; decimals only when they parse as an
    /// integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Value::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Value::Decimal(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::TinyInt(v) => Some(f64::from(*v)),
            Value::SmallInt(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::Decimal(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Best-effort conversion to a declared field type.
    ///
    /// Numeric results are brought to the declared numeric width so that a
    /// driver returning `BIGINT` for an `INTEGER` column still compares equal
    /// to the entity's own value. Values that cannot be represented in the
    /// target type are returned unchanged; NULL stays NULL.
    #[must_use]
    pub fn coerce(self, target: ValueType) -> Value {
        if self.is_null() {
            return self;
        }
        let converted = match target {
            ValueType::Bool => self.as_bool().map(Value::Bool),
            ValueType::TinyInt => self
                .as_i64()
                .and_then(|v| i8::try_from(v).ok())
                .map(Value::TinyInt),
            ValueType::SmallInt => self
                .as_i64()
                .and_then(|v| i16::try_from(v).ok())
                .map(Value::SmallInt),
            ValueType::Int => self
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Value::Int),
            ValueType::BigInt => self.as_i64().map(Value::BigInt),
            ValueType::Float => self.as_f64().map(|v| Value::Float(v as f32)),
            ValueType::Double => self.as_f64().map(Value::Double),
            ValueType::Decimal => match &self {
                Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                    self.as_i64().map(|v| Value::Decimal(v.to_string()))
                }
                Value::Float(_) | Value::Double(_) => {
                    self.as_f64().map(|v| Value::Decimal(v.to_string()))
                }
                Value::Text(s) => Some(Value::Decimal(s.clone())),
                _ => None,
            },
            ValueType::Timestamp => match &self {
                Value::Int(_) | Value::BigInt(_) => self.as_i64().map(Value::Timestamp),
                _ => None,
            },
            ValueType::Date => match &self {
                Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => self
                    .as_i64()
                    .and_then(|v| i32::try_from(v).ok())
                    .map(Value::Date),
                _ => None,
            },
            ValueType::Json => match &self {
                Value::Text(s) => serde_json::from_str(s).ok().map(Value::Json),
                _ => None,
            },
            ValueType::Text | ValueType::Bytes | ValueType::Uuid => None,
        };
        converted.unwrap_or(self)
    }

    /// Check whether this value already has the declared type.
    pub fn matches_type(&self, target: ValueType) -> bool {
        matches!(
            (self, target),
            (Value::Null, _)
                | (Value::Bool(_), ValueType::Bool)
                | (Value::TinyInt(_), ValueType::TinyInt)
                | (Value::SmallInt(_), ValueType::SmallInt)
                | (Value::Int(_), ValueType::Int)
                | (Value::BigInt(_), ValueType::BigInt)
                | (Value::Float(_), ValueType::Float)
                | (Value::Double(_), ValueType::Double)
                | (Value::Decimal(_), ValueType::Decimal)
                | (Value::Text(_), ValueType::Text)
                | (Value::Bytes(_), ValueType::Bytes)
                | (Value::Date(_), ValueType::Date)
                | (Value::Timestamp(_), ValueType::Timestamp)
                | (Value::Uuid(_), ValueType::Uuid)
                | (Value::Json(_), ValueType::Json)
        )
    }
}

fn conversion_error(expected: &'static str, value: &Value) -> Error {
    Error::Mapping(MappingError::new(
        MappingErrorKind::Conversion,
        format!("expected {}, found {}", expected, value.type_name()),
    ))
}

// Conversion implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::TinyInt(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl TryFrom<Value> for bool {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        value
            .as_bool()
            .ok_or_else(|| conversion_error("BOOLEAN", &value))
    }
}

impl TryFrom<Value> for i32 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        value
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .ok_or_else(|| conversion_error("INTEGER", &value))
    }
}

impl TryFrom<Value> for i64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        value
            .as_i64()
            .ok_or_else(|| conversion_error("BIGINT", &value))
    }
}

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        value
            .as_f64()
            .ok_or_else(|| conversion_error("DOUBLE", &value))
    }
}

impl TryFrom<Value> for String {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s),
            other => Err(conversion_error("TEXT", &other)),
        }
    }
}

impl TryFrom<Value> for Vec<u8> {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(b) => Ok(b),
            other => Err(conversion_error("BLOB", &other)),
        }
    }
}

impl TryFrom<Value> for serde_json::Value {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v),
            Value::Text(s) => {
                serde_json::from_str(&s).map_err(|_| conversion_error("JSON", &Value::Text(s)))
            }
            other => Err(conversion_error("JSON", &other)),
        }
    }
}

/// NULL converts to `None`; anything else goes through `T`'s conversion.
impl<T> TryFrom<Value> for Option<T>
where
    T: TryFrom<Value, Error = Error>,
{
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::try_from(value).map(Some)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_narrows_integer_width() {
        assert_eq!(Value::BigInt(7).coerce(ValueType::Int), Value::Int(7));
        assert_eq!(Value::Int(7).coerce(ValueType::BigInt), Value::BigInt(7));
        assert_eq!(
            Value::Double(1500.0).coerce(ValueType::BigInt),
            Value::BigInt(1500)
        );
    }

    #[test]
    fn coerce_leaves_unrepresentable_values_alone() {
        let big = Value::BigInt(i64::from(i32::MAX) + 1);
        assert_eq!(big.clone().coerce(ValueType::Int), big);
        assert_eq!(
            Value::Text("abc".into()).coerce(ValueType::BigInt),
            Value::Text("abc".into())
        );
        assert_eq!(Value::Double(1.5).coerce(ValueType::Int), Value::Double(1.5));
    }

    #[test]
    fn coerce_keeps_null() {
        assert_eq!(Value::Null.coerce(ValueType::BigInt), Value::Null);
        assert_eq!(Value::Null.coerce(ValueType::Text), Value::Null);
    }

    #[test]
    fn coerce_bool_and_decimal() {
        assert_eq!(Value::Int(1).coerce(ValueType::Bool), Value::Bool(true));
        assert_eq!(
            Value::BigInt(42).coerce(ValueType::Decimal),
            Value::Decimal("42".into())
        );
        assert_eq!(
            Value::Decimal("12".into()).coerce(ValueType::BigInt),
            Value::BigInt(12)
        );
    }

    #[test]
    fn try_from_reports_conversion_errors() {
        let err = i64::try_from(Value::Text("x".into())).unwrap_err();
        assert_eq!(err.mapping_kind(), Some(MappingErrorKind::Conversion));

        let n: Option<i64> = Value::Null.try_into().unwrap();
        assert_eq!(n, None);
        let n: Option<i64> = Value::Int(3).try_into().unwrap();
        assert_eq!(n, Some(3));
    }

    #[test]
    fn option_into_value() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
    }

    #[test]
    fn matches_type_accepts_null() {
        assert!(Value::Null.matches_type(ValueType::Int));
        assert!(Value::Int(1).matches_type(ValueType::Int));
        assert!(!Value::BigInt(1).matches_type(ValueType::Int));
    }
}

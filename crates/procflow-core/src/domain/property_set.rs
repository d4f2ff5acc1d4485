//! Typed, schema-validated variable store.
//!
//! Every key carries exactly one [`PropertySchema`]. Typed access goes through
//! [`PropertyType`]; a request whose Rust type disagrees with the declared
//! [`ValueType`] fails with [`CoreError::TypeMismatch`]. The store keeps
//! declaration order so that [`PropertySet::freeze`] is deterministic.

use crate::error::{CoreError, CoreResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Declared value type of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Text
    String,
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    /// Floating point decimal
    Decimal,
    /// Single character
    Char,
    /// Boolean
    Boolean,
    /// UTC timestamp
    DateTime,
    /// Raw bytes
    Bytes,
    /// JSON document
    Json,
    /// Structured payload of a named class
    Object,
    /// Untyped JSON value
    Any,
}

impl ValueType {
    /// How a non-null value of this type is encoded for persistence
    pub fn serialization_hint(self) -> SerializationHint {
        match self {
            ValueType::String | ValueType::Char => SerializationHint::String,
            ValueType::Int => SerializationHint::Int,
            ValueType::Long => SerializationHint::Long,
            ValueType::Decimal => SerializationHint::Double,
            ValueType::Boolean => SerializationHint::Bool,
            ValueType::DateTime => SerializationHint::DateTime,
            ValueType::Bytes => SerializationHint::ByteArray,
            ValueType::Json => SerializationHint::JsonString,
            ValueType::Object => SerializationHint::BinaryObject,
            ValueType::Any => SerializationHint::Object,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Persistence encoding of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerializationHint {
    /// No value
    Null,
    /// Integer slot, 32-bit
    Int,
    /// Integer slot, 64-bit
    Long,
    /// Boolean slot
    Bool,
    /// Double slot
    Double,
    /// Timestamp slot
    DateTime,
    /// String slot
    String,
    /// Base64 bytes in the string slot
    ByteArray,
    /// JSON text in the string slot
    JsonString,
    /// Base64 of the JSON encoding in the string slot
    BinaryObject,
    /// JSON text of an untyped value in the string slot
    Object,
}

/// A stored value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// No value
    Null,
    /// Text
    String(String),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// Floating point decimal
    Decimal(f64),
    /// Single character
    Char(char),
    /// Boolean
    Boolean(bool),
    /// UTC timestamp
    DateTime(DateTime<Utc>),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// JSON document
    Json(Value),
    /// Structured payload
    Object(Value),
}

impl PropertyValue {
    /// Whether this is [`PropertyValue::Null`]
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Null)
    }

    /// Name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::Null => "Null",
            PropertyValue::String(_) => "String",
            PropertyValue::Int(_) => "Int",
            PropertyValue::Long(_) => "Long",
            PropertyValue::Decimal(_) => "Decimal",
            PropertyValue::Char(_) => "Char",
            PropertyValue::Boolean(_) => "Boolean",
            PropertyValue::DateTime(_) => "DateTime",
            PropertyValue::Bytes(_) => "Bytes",
            PropertyValue::Json(_) => "Json",
            PropertyValue::Object(_) => "Object",
        }
    }

    /// Whether the value may be stored under `value_type`
    pub fn fits(&self, value_type: ValueType) -> bool {
        matches!(
            (self, value_type),
            (PropertyValue::Null, _)
                | (PropertyValue::String(_), ValueType::String)
                | (PropertyValue::Int(_), ValueType::Int)
                | (PropertyValue::Long(_), ValueType::Long)
                | (PropertyValue::Decimal(_), ValueType::Decimal)
                | (PropertyValue::Char(_), ValueType::Char)
                | (PropertyValue::Boolean(_), ValueType::Boolean)
                | (PropertyValue::DateTime(_), ValueType::DateTime)
                | (PropertyValue::Bytes(_), ValueType::Bytes)
                | (PropertyValue::Json(_), ValueType::Json | ValueType::Any)
                | (PropertyValue::Object(_), ValueType::Object)
        )
    }

    /// JSON view of the value, as seen by expressions
    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::Null => Value::Null,
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::Int(i) => Value::from(*i),
            PropertyValue::Long(l) => Value::from(*l),
            PropertyValue::Decimal(d) => serde_json::Number::from_f64(*d)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            PropertyValue::Char(c) => Value::String(c.to_string()),
            PropertyValue::Boolean(b) => Value::Bool(*b),
            PropertyValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            PropertyValue::Bytes(bytes) => Value::String(STANDARD.encode(bytes)),
            PropertyValue::Json(v) | PropertyValue::Object(v) => v.clone(),
        }
    }

    /// Compare against a min/max bound. Numbers compare across Int, Long
    /// and Decimal; strings and bytes compare their length against an
    /// integral bound.
    fn compare_to_bound(&self, bound: &PropertyValue) -> Option<Ordering> {
        match (self, bound) {
            (PropertyValue::Char(a), PropertyValue::Char(b)) => a.partial_cmp(b),
            (PropertyValue::DateTime(a), PropertyValue::DateTime(b)) => a.partial_cmp(b),
            (PropertyValue::String(s), _) => bound
                .as_integral()
                .map(|n| (s.chars().count() as i64).cmp(&n)),
            (PropertyValue::Bytes(bytes), _) => bound
                .as_integral()
                .map(|n| (bytes.len() as i64).cmp(&n)),
            _ => match (self.as_integral(), bound.as_integral()) {
                (Some(a), Some(b)) => Some(a.cmp(&b)),
                _ => self.as_number()?.partial_cmp(&bound.as_number()?),
            },
        }
    }

    /// Equality for possible-value lists; numbers match by value
    fn same_as(&self, other: &PropertyValue) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(_), Some(_)) => self.compare_to_bound(other) == Some(Ordering::Equal),
            _ => self == other,
        }
    }

    fn as_integral(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(i64::from(*i)),
            PropertyValue::Long(l) => Some(*l),
            _ => None,
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(f64::from(*i)),
            PropertyValue::Long(l) => Some(*l as f64),
            PropertyValue::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    /// Coerce a JSON value into `value_type`
    fn from_json(name: &str, value_type: ValueType, value: Value) -> CoreResult<PropertyValue> {
        let mismatch = |value: &Value| CoreError::TypeMismatch {
            name: name.to_string(),
            declared: value_type.to_string(),
            requested: json_kind(value).to_string(),
        };

        if value.is_null() {
            return Ok(PropertyValue::Null);
        }

        let converted = match value_type {
            ValueType::String => value.as_str().map(|s| PropertyValue::String(s.to_string())),
            ValueType::Int => integral(&value)
                .and_then(|i| i32::try_from(i).ok())
                .map(PropertyValue::Int),
            ValueType::Long => integral(&value).map(PropertyValue::Long),
            ValueType::Decimal => value.as_f64().map(PropertyValue::Decimal),
            ValueType::Char => value.as_str().and_then(single_char).map(PropertyValue::Char),
            ValueType::Boolean => value.as_bool().map(PropertyValue::Boolean),
            ValueType::DateTime => value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| PropertyValue::DateTime(dt.with_timezone(&Utc))),
            ValueType::Bytes => value
                .as_str()
                .and_then(|s| STANDARD.decode(s).ok())
                .map(PropertyValue::Bytes),
            ValueType::Json | ValueType::Any => return Ok(PropertyValue::Json(value)),
            ValueType::Object => return Ok(PropertyValue::Object(value)),
        };

        converted.ok_or_else(|| mismatch(&value))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn integral(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn single_char(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}

/// Rust types that map onto a declared [`ValueType`]
pub trait PropertyType: Sized {
    /// Name used in type-mismatch errors
    const TYPE_NAME: &'static str;

    /// Whether values of this type may be stored under `value_type`
    fn accepts(value_type: ValueType) -> bool;

    /// Wrap into a stored value
    fn into_value(self) -> PropertyValue;

    /// Extract from a stored value
    fn from_value(value: &PropertyValue) -> Option<Self>;
}

macro_rules! property_type {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl PropertyType for $ty {
            const TYPE_NAME: &'static str = $name;

            fn accepts(value_type: ValueType) -> bool {
                value_type == ValueType::$variant
            }

            fn into_value(self) -> PropertyValue {
                PropertyValue::$variant(self)
            }

            fn from_value(value: &PropertyValue) -> Option<Self> {
                match value {
                    PropertyValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }
    };
}

property_type!(String, String, "String");
property_type!(i32, Int, "Int");
property_type!(i64, Long, "Long");
property_type!(f64, Decimal, "Decimal");
property_type!(char, Char, "Char");
property_type!(bool, Boolean, "Boolean");
property_type!(DateTime<Utc>, DateTime, "DateTime");
property_type!(Vec<u8>, Bytes, "Bytes");

impl PropertyType for Value {
    const TYPE_NAME: &'static str = "Json";

    fn accepts(value_type: ValueType) -> bool {
        matches!(value_type, ValueType::Json | ValueType::Any)
    }

    fn into_value(self) -> PropertyValue {
        PropertyValue::Json(self)
    }

    fn from_value(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Json(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Schema of a single property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Declared type
    pub value_type: ValueType,

    /// Whether null may be stored explicitly
    #[serde(default)]
    pub nullable: bool,

    /// Initial value when none is supplied
    #[serde(default)]
    pub default: Option<PropertyValue>,

    /// Lower bound
    #[serde(default)]
    pub min: Option<PropertyValue>,

    /// Upper bound
    #[serde(default)]
    pub max: Option<PropertyValue>,

    /// Allowed values; empty means unrestricted
    #[serde(default)]
    pub possible_values: Vec<PropertyValue>,

    /// Class of an Object payload
    #[serde(default)]
    pub class_name: Option<String>,
}

impl PropertySchema {
    /// Unconstrained, non-nullable schema of `value_type`
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            nullable: false,
            default: None,
            min: None,
            max: None,
            possible_values: Vec::new(),
            class_name: None,
        }
    }

    /// String schema
    pub fn string() -> Self {
        Self::new(ValueType::String)
    }

    /// 32-bit integer schema
    pub fn int() -> Self {
        Self::new(ValueType::Int)
    }

    /// 64-bit integer schema
    pub fn long() -> Self {
        Self::new(ValueType::Long)
    }

    /// Decimal schema
    pub fn decimal() -> Self {
        Self::new(ValueType::Decimal)
    }

    /// Character schema
    pub fn char() -> Self {
        Self::new(ValueType::Char)
    }

    /// Boolean schema
    pub fn boolean() -> Self {
        Self::new(ValueType::Boolean)
    }

    /// Timestamp schema
    pub fn date_time() -> Self {
        Self::new(ValueType::DateTime)
    }

    /// Byte array schema
    pub fn bytes() -> Self {
        Self::new(ValueType::Bytes)
    }

    /// JSON document schema
    pub fn json() -> Self {
        Self::new(ValueType::Json)
    }

    /// Structured payload schema for `class_name`
    pub fn object(class_name: impl Into<String>) -> Self {
        let mut schema = Self::new(ValueType::Object);
        schema.class_name = Some(class_name.into());
        schema
    }

    /// Untyped schema
    pub fn any() -> Self {
        Self::new(ValueType::Any)
    }

    /// Allow explicit nulls
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the default value
    pub fn with_default<T: PropertyType>(mut self, value: T) -> Self {
        self.default = Some(value.into_value());
        self
    }

    /// Set the lower bound
    pub fn with_min<T: PropertyType>(mut self, value: T) -> Self {
        self.min = Some(value.into_value());
        self
    }

    /// Set the upper bound
    pub fn with_max<T: PropertyType>(mut self, value: T) -> Self {
        self.max = Some(value.into_value());
        self
    }

    /// Restrict to a set of values
    pub fn with_possible_values<T, I>(mut self, values: I) -> Self
    where
        T: PropertyType,
        I: IntoIterator<Item = T>,
    {
        self.possible_values = values.into_iter().map(PropertyType::into_value).collect();
        self
    }

    /// Persistence encoding of non-null values
    #[inline]
    pub fn serialization_hint(&self) -> SerializationHint {
        self.value_type.serialization_hint()
    }

    /// Schema class identity written next to the schema body
    pub fn kind(&self) -> String {
        format!("{}Schema", self.value_type)
    }

    /// Check `value` against the constraints of this schema
    pub fn validate(&self, name: &str, value: &PropertyValue) -> CoreResult<()> {
        let violation = |reason: String| CoreError::ConstraintViolation {
            name: name.to_string(),
            reason,
        };

        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err(violation("value is required".to_string()))
            };
        }

        if !value.fits(self.value_type) {
            return Err(CoreError::TypeMismatch {
                name: name.to_string(),
                declared: self.value_type.to_string(),
                requested: value.type_name().to_string(),
            });
        }

        if let PropertyValue::Decimal(d) = value {
            if !d.is_finite() {
                return Err(violation(format!("{} is not a finite number", d)));
            }
        }

        if !self.possible_values.is_empty()
            && !self.possible_values.iter().any(|p| value.same_as(p))
        {
            return Err(violation("not one of the possible values".to_string()));
        }

        if let Some(min) = &self.min {
            match value.compare_to_bound(min) {
                Some(Ordering::Less) => return Err(violation(format!("below minimum {:?}", min))),
                Some(_) => {}
                None => return Err(violation(format!("not comparable with minimum {:?}", min))),
            }
        }

        if let Some(max) = &self.max {
            match value.compare_to_bound(max) {
                Some(Ordering::Greater) => {
                    return Err(violation(format!("above maximum {:?}", max)))
                }
                Some(_) => {}
                None => return Err(violation(format!("not comparable with maximum {:?}", max))),
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PropertyEntry {
    schema: PropertySchema,
    value: PropertyValue,
}

/// Schema descriptor element of a frozen variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaElement {
    /// Schema class identity
    pub kind: String,
    /// JSON body of the schema
    pub body: String,
    /// Encoding of non-null values
    pub hint: SerializationHint,
}

/// Value element of a frozen variable; exactly one slot is used per hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueElement {
    /// Encoding of this value
    pub hint: SerializationHint,
    /// Integer slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int_value: Option<i64>,
    /// Double slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_value: Option<f64>,
    /// Boolean slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool_value: Option<bool>,
    /// String slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_value: Option<String>,
    /// Timestamp slot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_value: Option<DateTime<Utc>>,
}

impl ValueElement {
    fn empty(hint: SerializationHint) -> Self {
        Self {
            hint,
            int_value: None,
            double_value: None,
            bool_value: None,
            string_value: None,
            date_value: None,
        }
    }

    fn encode(value: &PropertyValue, schema: &PropertySchema) -> CoreResult<Self> {
        if value.is_null() {
            return Ok(Self::empty(SerializationHint::Null));
        }

        let mut element = Self::empty(schema.serialization_hint());
        match value {
            PropertyValue::Null => {}
            PropertyValue::Int(i) => element.int_value = Some(i64::from(*i)),
            PropertyValue::Long(l) => element.int_value = Some(*l),
            PropertyValue::Decimal(d) => element.double_value = Some(*d),
            PropertyValue::Boolean(b) => element.bool_value = Some(*b),
            PropertyValue::DateTime(dt) => element.date_value = Some(*dt),
            PropertyValue::String(s) => element.string_value = Some(s.clone()),
            PropertyValue::Char(c) => element.string_value = Some(c.to_string()),
            PropertyValue::Bytes(bytes) => element.string_value = Some(STANDARD.encode(bytes)),
            PropertyValue::Json(v) => element.string_value = Some(serde_json::to_string(v)?),
            PropertyValue::Object(v) => {
                element.string_value = Some(STANDARD.encode(serde_json::to_vec(v)?))
            }
        }
        Ok(element)
    }

    fn decode(&self, name: &str, schema: &PropertySchema) -> CoreResult<PropertyValue> {
        let missing = |slot: &str| {
            CoreError::SerializationError(format!("missing {} slot for '{}'", slot, name))
        };

        let value = match self.hint {
            SerializationHint::Null => PropertyValue::Null,
            SerializationHint::Int => {
                let raw = self.int_value.ok_or_else(|| missing("int"))?;
                PropertyValue::Int(i32::try_from(raw).map_err(|_| {
                    CoreError::SerializationError(format!("{} out of range for '{}'", raw, name))
                })?)
            }
            SerializationHint::Long => PropertyValue::Long(self.int_value.ok_or_else(|| missing("int"))?),
            SerializationHint::Double => {
                PropertyValue::Decimal(self.double_value.ok_or_else(|| missing("double"))?)
            }
            SerializationHint::Bool => {
                PropertyValue::Boolean(self.bool_value.ok_or_else(|| missing("bool"))?)
            }
            SerializationHint::DateTime => {
                PropertyValue::DateTime(self.date_value.ok_or_else(|| missing("date"))?)
            }
            SerializationHint::String => {
                let text = self.string_value.as_deref().ok_or_else(|| missing("string"))?;
                if schema.value_type == ValueType::Char {
                    PropertyValue::Char(single_char(text).ok_or_else(|| {
                        CoreError::SerializationError(format!("'{}' is not a single char", text))
                    })?)
                } else {
                    PropertyValue::String(text.to_string())
                }
            }
            SerializationHint::ByteArray => {
                let text = self.string_value.as_deref().ok_or_else(|| missing("string"))?;
                PropertyValue::Bytes(STANDARD.decode(text)?)
            }
            SerializationHint::JsonString | SerializationHint::Object => {
                let text = self.string_value.as_deref().ok_or_else(|| missing("string"))?;
                PropertyValue::Json(serde_json::from_str(text)?)
            }
            SerializationHint::BinaryObject => {
                let text = self.string_value.as_deref().ok_or_else(|| missing("string"))?;
                PropertyValue::Object(serde_json::from_slice(&STANDARD.decode(text)?)?)
            }
        };

        if !value.fits(schema.value_type) {
            return Err(CoreError::SerializationError(format!(
                "{:?} value does not fit {} schema of '{}'",
                self.hint, schema.value_type, name
            )));
        }
        Ok(value)
    }
}

/// A variable in persistence-ready form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenVariable {
    /// Variable name
    pub name: String,
    /// Schema descriptor
    pub schema: SchemaElement,
    /// Encoded value
    pub value: ValueElement,
}

/// Typed, schema-validated variable store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertySet {
    entries: IndexMap<String, PropertyEntry>,
}

impl PropertySet {
    /// Create an empty property set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`; its value starts as the schema default, or unset
    pub fn add(&mut self, name: &str, schema: PropertySchema) -> CoreResult<()> {
        let value = schema.default.clone().unwrap_or(PropertyValue::Null);
        if !value.is_null() {
            schema.validate(name, &value)?;
        }
        self.insert(name, schema, value)
    }

    /// Register `name` with an initial value
    pub fn add_with_value<T: PropertyType>(
        &mut self,
        name: &str,
        value: T,
        schema: PropertySchema,
    ) -> CoreResult<()> {
        let value = checked_value(name, &schema, value)?;
        self.insert(name, schema, value)
    }

    fn insert(&mut self, name: &str, schema: PropertySchema, value: PropertyValue) -> CoreResult<()> {
        if self.entries.contains_key(name) {
            return Err(CoreError::DuplicateVariable(name.to_string()));
        }
        self.entries
            .insert(name.to_string(), PropertyEntry { schema, value });
        Ok(())
    }

    fn entry(&self, name: &str) -> CoreResult<&PropertyEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| CoreError::VariableNotFound(name.to_string()))
    }

    fn entry_mut(&mut self, name: &str) -> CoreResult<&mut PropertyEntry> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| CoreError::VariableNotFound(name.to_string()))
    }

    /// Typed read; fails when the key is unknown, unset or differently typed
    pub fn get<T: PropertyType>(&self, name: &str) -> CoreResult<T> {
        self.try_get(name)?
            .ok_or_else(|| CoreError::VariableNotSet(name.to_string()))
    }

    /// Typed read returning `None` for an unset key
    pub fn try_get<T: PropertyType>(&self, name: &str) -> CoreResult<Option<T>> {
        let entry = self.entry(name)?;
        if !T::accepts(entry.schema.value_type) {
            return Err(type_mismatch::<T>(name, &entry.schema));
        }
        Ok(T::from_value(&entry.value))
    }

    /// Typed write, validated against the schema
    pub fn set<T: PropertyType>(&mut self, name: &str, value: T) -> CoreResult<()> {
        let entry = self.entry_mut(name)?;
        entry.value = checked_value(name, &entry.schema, value)?;
        Ok(())
    }

    /// Reset `name` to null; the schema must be nullable
    pub fn clear(&mut self, name: &str) -> CoreResult<()> {
        let entry = self.entry_mut(name)?;
        entry.schema.validate(name, &PropertyValue::Null)?;
        entry.value = PropertyValue::Null;
        Ok(())
    }

    /// Read a structured payload stored under an Object schema
    pub fn get_object<T: DeserializeOwned>(&self, name: &str) -> CoreResult<T> {
        let entry = self.entry(name)?;
        match &entry.value {
            PropertyValue::Object(v) => Ok(serde_json::from_value(v.clone())?),
            PropertyValue::Null if entry.schema.value_type == ValueType::Object => {
                Err(CoreError::VariableNotSet(name.to_string()))
            }
            _ => Err(CoreError::TypeMismatch {
                name: name.to_string(),
                declared: entry.schema.value_type.to_string(),
                requested: "Object".to_string(),
            }),
        }
    }

    /// Store a structured payload under an Object schema
    pub fn set_object<T: Serialize>(&mut self, name: &str, value: &T) -> CoreResult<()> {
        let entry = self.entry_mut(name)?;
        if entry.schema.value_type != ValueType::Object {
            return Err(CoreError::TypeMismatch {
                name: name.to_string(),
                declared: entry.schema.value_type.to_string(),
                requested: "Object".to_string(),
            });
        }
        let value = PropertyValue::Object(serde_json::to_value(value)?);
        entry.schema.validate(name, &value)?;
        entry.value = value;
        Ok(())
    }

    /// Store a JSON value, coerced into the declared type
    pub fn set_json(&mut self, name: &str, value: Value) -> CoreResult<()> {
        let entry = self.entry_mut(name)?;
        let value = PropertyValue::from_json(name, entry.schema.value_type, value)?;
        entry.schema.validate(name, &value)?;
        entry.value = value;
        Ok(())
    }

    /// Raw stored value
    pub fn value(&self, name: &str) -> Option<&PropertyValue> {
        self.entries.get(name).map(|entry| &entry.value)
    }

    /// Schema of `name`
    pub fn schema(&self, name: &str) -> Option<&PropertySchema> {
        self.entries.get(name).map(|entry| &entry.schema)
    }

    /// Whether `name` is declared
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Whether `name` is declared and holds a non-null value
    pub fn is_set(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .map(|entry| !entry.value.is_null())
            .unwrap_or(false)
    }

    /// Number of declared keys
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no key is declared
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(name, schema)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertySchema)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), &entry.schema))
    }

    /// JSON object of all values keyed by name
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(name, entry)| (name.clone(), entry.value.to_json()))
                .collect(),
        )
    }

    /// Persistence-ready elements, one per declared key in declaration order
    pub fn freeze(&self) -> CoreResult<Vec<FrozenVariable>> {
        self.entries
            .iter()
            .map(|(name, entry)| {
                Ok(FrozenVariable {
                    name: name.clone(),
                    schema: SchemaElement {
                        kind: entry.schema.kind(),
                        body: serde_json::to_string(&entry.schema)?,
                        hint: entry.schema.serialization_hint(),
                    },
                    value: ValueElement::encode(&entry.value, &entry.schema)?,
                })
            })
            .collect()
    }

    /// Rebuild a property set from [`PropertySet::freeze`] output
    pub fn unfreeze(elements: &[FrozenVariable]) -> CoreResult<PropertySet> {
        let mut properties = PropertySet::new();
        for element in elements {
            let schema: PropertySchema = serde_json::from_str(&element.schema.body)?;
            if schema.kind() != element.schema.kind
                || schema.serialization_hint() != element.schema.hint
            {
                return Err(CoreError::SerializationError(format!(
                    "schema descriptor of '{}' does not match its body",
                    element.name
                )));
            }
            let value = element.value.decode(&element.name, &schema)?;
            properties.insert(&element.name, schema, value)?;
        }
        Ok(properties)
    }
}

fn type_mismatch<T: PropertyType>(name: &str, schema: &PropertySchema) -> CoreError {
    CoreError::TypeMismatch {
        name: name.to_string(),
        declared: schema.value_type.to_string(),
        requested: T::TYPE_NAME.to_string(),
    }
}

fn checked_value<T: PropertyType>(
    name: &str,
    schema: &PropertySchema,
    value: T,
) -> CoreResult<PropertyValue> {
    if !T::accepts(schema.value_type) {
        return Err(type_mismatch::<T>(name, schema));
    }
    let value = value.into_value();
    schema.validate(name, &value)?;
    Ok(value)
}

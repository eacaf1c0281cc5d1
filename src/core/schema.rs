//! # Field Schemas
//!
//! Explicit per-opcode layout descriptors. A [`Schema`] is an ordered list of
//! typed [`Field`]s; the codec walks it to turn payload bytes into a
//! [`Record`] and back. Schemas are built and validated once when they are
//! registered, never re-derived per frame.
//!
//! All multi-byte values are big-endian (network order).

use crate::error::{constants, ProtocolError, Result};
use crate::session::Delta;
use serde::Serialize;

/// Width of a length or count prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LenPrefix {
    U8,
    U16,
}

impl LenPrefix {
    pub fn max(self) -> usize {
        match self {
            LenPrefix::U8 => u8::MAX as usize,
            LenPrefix::U16 => u16::MAX as usize,
        }
    }
}

/// Where a repeated field takes its element count from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Count {
    /// A count prefix written immediately before the elements.
    Prefix(LenPrefix),
    /// An integer field decoded earlier in the same record.
    Field(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldType {
    I8,
    U8,
    I16,
    U16,
    /// Unsigned 24-bit integer, used for quantized positions.
    U24,
    I32,
    U32,
    I64,
    F32,
    Bool,
    /// UTF-8 text with a 16-bit byte-length prefix.
    Str,
    /// Byte array with a length prefix.
    Bytes(LenPrefix),
    /// Byte array of a fixed length.
    Fixed(usize),
    /// A float in `0..=max` quantized to a `width`-byte unsigned integer.
    Compressed { width: u8, max: f32 },
    /// Repeated nested record.
    List { count: Count, item: Schema },
    /// One entity delta record.
    Delta,
}

impl FieldType {
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            FieldType::I8
                | FieldType::U8
                | FieldType::I16
                | FieldType::U16
                | FieldType::U24
                | FieldType::I32
                | FieldType::U32
                | FieldType::I64
        )
    }

    /// Inclusive range of values an integer field can carry.
    pub fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            FieldType::I8 => Some((i8::MIN.into(), i8::MAX.into())),
            FieldType::U8 => Some((0, u8::MAX.into())),
            FieldType::I16 => Some((i16::MIN.into(), i16::MAX.into())),
            FieldType::U16 => Some((0, u16::MAX.into())),
            FieldType::U24 => Some((0, (1 << 24) - 1)),
            FieldType::I32 => Some((i32::MIN.into(), i32::MAX.into())),
            FieldType::U32 => Some((0, u32::MAX.into())),
            FieldType::I64 => Some((i64::MIN, i64::MAX)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
    /// May be absent, but only at the end of the payload.
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    name: &'static str,
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
        }
    }

    /// Append a required field.
    pub fn field(mut self, name: &'static str, ty: FieldType) -> Self {
        self.fields.push(Field {
            name,
            ty,
            optional: false,
        });
        self
    }

    /// Append an optional trailing field.
    pub fn optional(mut self, name: &'static str, ty: FieldType) -> Self {
        self.fields.push(Field {
            name,
            ty,
            optional: true,
        });
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check the structural rules: unique names, trailing optionals, valid
    /// widths, and list counts that refer to earlier integer fields.
    pub fn validate(&self) -> Result<()> {
        let mut seen_optional = false;

        for (idx, field) in self.fields.iter().enumerate() {
            if self.fields[..idx].iter().any(|f| f.name == field.name) {
                return Err(ProtocolError::InvalidSchema(format!(
                    "{}: duplicate field name '{}'",
                    self.name, field.name
                )));
            }

            if field.optional {
                seen_optional = true;
            } else if seen_optional {
                return Err(ProtocolError::InvalidSchema(format!(
                    "{}: {} ('{}')",
                    self.name,
                    constants::ERR_OPTIONAL_NOT_TRAILING,
                    field.name
                )));
            }

            match &field.ty {
                FieldType::Compressed { width, max } => {
                    if !(1..=3).contains(width) {
                        return Err(ProtocolError::InvalidSchema(format!(
                            "{}: compressed width {width} of '{}' must be 1..=3",
                            self.name, field.name
                        )));
                    }
                    if !(max.is_finite() && *max > 0.0) {
                        return Err(ProtocolError::InvalidSchema(format!(
                            "{}: compressed range of '{}' must be positive",
                            self.name, field.name
                        )));
                    }
                }
                FieldType::List { count, item } => {
                    if let Count::Field(count_name) = count {
                        let earlier = self.fields[..idx]
                            .iter()
                            .find(|f| f.name == *count_name)
                            .filter(|f| f.ty.is_integer());
                        if earlier.is_none() {
                            return Err(ProtocolError::InvalidSchema(format!(
                                "{}: {} ('{count_name}' for '{}')",
                                self.name,
                                constants::ERR_UNKNOWN_COUNT_FIELD,
                                field.name
                            )));
                        }
                    }
                    item.validate()?;
                }
                _ => {}
            }
        }

        Ok(())
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Record>),
    Delta(Delta),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Delta(_) => "delta",
        }
    }
}

/// Field values in schema order. Trailing optional fields may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Record {
    fields: Vec<(&'static str, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: Value) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: &'static str, value: Value) {
        self.fields.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.fields.iter().map(|(name, value)| (*name, value))
    }

    fn require(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| ProtocolError::malformed(format!("missing field '{name}'")))
    }

    fn mismatch(name: &str, expected: &str, found: &Value) -> ProtocolError {
        ProtocolError::malformed(format!(
            "field '{name}' is {}, expected {expected}",
            found.type_name()
        ))
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        match self.require(name)? {
            Value::Int(v) => Ok(*v),
            other => Err(Self::mismatch(name, "int", other)),
        }
    }

    /// Integer narrowed to the Rust type the typed packet stores.
    pub fn int_as<T: TryFrom<i64>>(&self, name: &str) -> Result<T> {
        let v = self.int(name)?;
        T::try_from(v)
            .map_err(|_| ProtocolError::malformed(format!("field '{name}' out of range: {v}")))
    }

    pub fn opt_int_as<T: TryFrom<i64>>(&self, name: &str) -> Result<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(_) => self.int_as(name).map(Some),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64> {
        match self.require(name)? {
            Value::Float(v) => Ok(*v),
            other => Err(Self::mismatch(name, "float", other)),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<bool> {
        match self.require(name)? {
            Value::Bool(v) => Ok(*v),
            other => Err(Self::mismatch(name, "bool", other)),
        }
    }

    pub fn opt_boolean(&self, name: &str) -> Result<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(_) => self.boolean(name).map(Some),
        }
    }

    pub fn string(&self, name: &str) -> Result<String> {
        match self.require(name)? {
            Value::Str(v) => Ok(v.clone()),
            other => Err(Self::mismatch(name, "string", other)),
        }
    }

    pub fn bytes(&self, name: &str) -> Result<Vec<u8>> {
        match self.require(name)? {
            Value::Bytes(v) => Ok(v.clone()),
            other => Err(Self::mismatch(name, "bytes", other)),
        }
    }

    pub fn list(&self, name: &str) -> Result<&[Record]> {
        match self.require(name)? {
            Value::List(v) => Ok(v),
            other => Err(Self::mismatch(name, "list", other)),
        }
    }

    pub fn delta(&self, name: &str) -> Result<Delta> {
        match self.require(name)? {
            Value::Delta(v) => Ok(v.clone()),
            other => Err(Self::mismatch(name, "delta", other)),
        }
    }
}

//! Dynamically typed values crossing the module boundary

use crate::CallError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A self-describing value passed to or returned from an exported function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Error slot of a result vector
    Error(CallError),
}

/// Type tag of a [`Value`], as declared by a function signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Nil,
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Bytes,
    List,
    Map,
    Error,
    /// Accepts every value (parameters declared as `Value`)
    Any,
}

impl Value {
    /// Dynamic type of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::UInt(_) => ValueType::UInt,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::Bytes(_) => ValueType::Bytes,
            Value::List(_) => ValueType::List,
            Value::Map(_) => ValueType::Map,
            Value::Error(_) => ValueType::Error,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::UInt(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&CallError> {
        match self {
            Value::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl ValueType {
    /// Whether a value of type `actual` may be passed where `self` is declared
    pub fn accepts(self, actual: ValueType) -> bool {
        self == ValueType::Any || self == actual
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Nil => "nil",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::UInt => "uint",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::Bytes => "bytes",
            ValueType::List => "list",
            ValueType::Map => "map",
            ValueType::Error => "error",
            ValueType::Any => "any",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::UInt(u) => write!(f, "{}", u),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Error(e) => write!(f, "error({})", e),
        }
    }
}

/// Parameter and return types of one exported function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub returns: Vec<ValueType>,
}

impl Signature {
    pub fn new(params: Vec<ValueType>, returns: Vec<ValueType>) -> Self {
        Self { params, returns }
    }

    /// Validate arity, then each argument's type against its declared position
    pub fn check(&self, args: &[Value]) -> Result<(), CallError> {
        if args.len() != self.params.len() {
            return Err(CallError::arity(self.params.len(), args.len()));
        }
        for (position, (expected, arg)) in self.params.iter().zip(args).enumerate() {
            let actual = arg.value_type();
            if !expected.accepts(actual) {
                return Err(CallError::type_mismatch(position, *expected, actual));
            }
        }
        Ok(())
    }

    /// Result vector for a failed call: `Nil` padding, error in the final slot
    pub fn failure(&self, error: CallError) -> Vec<Value> {
        let mut out = vec![Value::Nil; self.returns.len().saturating_sub(1)];
        out.push(Value::Error(error));
        out
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<_> = self.params.iter().map(|t| t.name()).collect();
        let returns: Vec<_> = self.returns.iter().map(|t| t.name()).collect();
        write!(f, "({}) -> ({})", params.join(", "), returns.join(", "))
    }
}

//! Conversions between ordinary Rust types and [`Value`]
//!
//! Module authors write typed functions; these traits derive the
//! function's [`Signature`] and move arguments and results across the
//! dynamically typed boundary.

use crate::{CallError, Signature, Value, ValueType};
use std::collections::BTreeMap;
use std::fmt::Display;

/// A parameter type that can be extracted from a [`Value`]
pub trait FromValue: Sized {
    /// Declared type for signatures
    const TYPE: ValueType;

    /// Returns `None` when the value has a different dynamic type
    fn from_value(value: Value) -> Option<Self>;
}

/// A single return value
pub trait IntoValue {
    const TYPE: ValueType;

    fn into_value(self) -> Value;
}

/// A function's full return shape (zero or more values)
pub trait IntoValues {
    fn return_types() -> Vec<ValueType>;

    fn into_values(self) -> Vec<Value>;
}

macro_rules! direct {
    ($ty:ty, $variant:ident) => {
        impl FromValue for $ty {
            const TYPE: ValueType = ValueType::$variant;

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }

        impl IntoValue for $ty {
            const TYPE: ValueType = ValueType::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }
    };
}

direct!(bool, Bool);
direct!(i64, Int);
direct!(u64, UInt);
direct!(f64, Float);
direct!(String, Str);
direct!(Vec<u8>, Bytes);
direct!(Vec<Value>, List);
direct!(BTreeMap<String, Value>, Map);

impl FromValue for i32 {
    const TYPE: ValueType = ValueType::Int;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Int(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }
}

impl IntoValue for i32 {
    const TYPE: ValueType = ValueType::Int;

    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl FromValue for u32 {
    const TYPE: ValueType = ValueType::UInt;

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::UInt(v) => u32::try_from(v).ok(),
            _ => None,
        }
    }
}

impl IntoValue for u32 {
    const TYPE: ValueType = ValueType::UInt;

    fn into_value(self) -> Value {
        Value::UInt(u64::from(self))
    }
}

impl FromValue for Value {
    const TYPE: ValueType = ValueType::Any;

    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl IntoValue for Value {
    const TYPE: ValueType = ValueType::Any;

    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for &'static str {
    const TYPE: ValueType = ValueType::Str;

    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl IntoValue for CallError {
    const TYPE: ValueType = ValueType::Error;

    fn into_value(self) -> Value {
        Value::Error(self)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    const TYPE: ValueType = T::TYPE;

    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Nil,
        }
    }
}

impl IntoValues for () {
    fn return_types() -> Vec<ValueType> {
        Vec::new()
    }

    fn into_values(self) -> Vec<Value> {
        Vec::new()
    }
}

impl<T: IntoValue> IntoValues for T {
    fn return_types() -> Vec<ValueType> {
        vec![T::TYPE]
    }

    fn into_values(self) -> Vec<Value> {
        vec![self.into_value()]
    }
}

impl<A: IntoValue, B: IntoValue> IntoValues for (A, B) {
    fn return_types() -> Vec<ValueType> {
        vec![A::TYPE, B::TYPE]
    }

    fn into_values(self) -> Vec<Value> {
        vec![self.0.into_value(), self.1.into_value()]
    }
}

impl<A: IntoValue, B: IntoValue, C: IntoValue> IntoValues for (A, B, C) {
    fn return_types() -> Vec<ValueType> {
        vec![A::TYPE, B::TYPE, C::TYPE]
    }

    fn into_values(self) -> Vec<Value> {
        vec![self.0.into_value(), self.1.into_value(), self.2.into_value()]
    }
}

/// `(values..., error)`: the error slot is `Nil` on success
impl<T: IntoValues, E: Display> IntoValues for Result<T, E> {
    fn return_types() -> Vec<ValueType> {
        let mut types = T::return_types();
        types.push(ValueType::Error);
        types
    }

    fn into_values(self) -> Vec<Value> {
        match self {
            Ok(values) => {
                let mut out = values.into_values();
                out.push(Value::Nil);
                out
            }
            Err(e) => {
                let mut out = vec![Value::Nil; T::return_types().len()];
                out.push(Value::Error(CallError::module(e.to_string())));
                out
            }
        }
    }
}

/// A typed function callable through the dynamic boundary
///
/// Implemented for every `Fn` of up to six [`FromValue`] parameters whose
/// return type implements [`IntoValues`]. `Args` is the parameter tuple and
/// only serves to keep the impls apart.
pub trait Exportable<Args>: Send + Sync + 'static {
    fn signature(&self) -> Signature;

    /// Convert the arguments, call the function and convert its results
    fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>, CallError>;
}

macro_rules! exportable {
    ($($ty:ident $var:ident),*) => {
        impl<F, R, $($ty,)*> Exportable<($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + Send + Sync + 'static,
            R: IntoValues,
            $($ty: FromValue,)*
        {
            fn signature(&self) -> Signature {
                Signature::new(vec![$($ty::TYPE),*], R::return_types())
            }

            #[allow(unused_mut, unused_variables)]
            fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>, CallError> {
                self.signature().check(&args)?;
                let mut args = args.into_iter().enumerate();
                $(
                    let $var = {
                        let (position, value) = args
                            .next()
                            .ok_or_else(|| CallError::internal("argument list exhausted"))?;
                        let actual = value.value_type();
                        $ty::from_value(value)
                            .ok_or_else(|| CallError::type_mismatch(position, $ty::TYPE, actual))?
                    };
                )*
                Ok((self)($($var),*).into_values())
            }
        }
    };
}

exportable!();
exportable!(A1 a1);
exportable!(A1 a1, A2 a2);
exportable!(A1 a1, A2 a2, A3 a3);
exportable!(A1 a1, A2 a2, A3 a3, A4 a4);
exportable!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
exportable!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);

type ErasedCall = dyn Fn(Vec<Value>) -> Result<Vec<Value>, CallError> + Send + Sync;

/// A type-erased [`Exportable`] with its signature computed once
pub struct FunctionExport {
    signature: Signature,
    call: Box<ErasedCall>,
}

impl FunctionExport {
    pub fn new<F, Args>(f: F) -> Self
    where
        F: Exportable<Args>,
        Args: 'static,
    {
        let signature = f.signature();
        Self {
            signature,
            call: Box::new(move |args| f.invoke(args)),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn invoke(&self, args: Vec<Value>) -> Result<Vec<Value>, CallError> {
        (self.call)(args)
    }
}

impl std::fmt::Debug for FunctionExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionExport")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn greet(name: String) -> String {
        format!("hello {}", name)
    }

    fn divide(a: i64, b: i64) -> Result<i64, String> {
        if b == 0 {
            Err("division by zero".to_string())
        } else {
            Ok(a / b)
        }
    }

    #[test]
    fn test_signature_from_types() {
        let sig = Exportable::<(String,)>::signature(&greet);
        assert_eq!(sig.params, vec![ValueType::Str]);
        assert_eq!(sig.returns, vec![ValueType::Str]);

        let sig = Exportable::<(i64, i64)>::signature(&divide);
        assert_eq!(sig.returns, vec![ValueType::Int, ValueType::Error]);
    }

    #[test]
    fn test_invoke_typed_function() {
        let export = FunctionExport::new(greet);
        let out = export.invoke(vec![Value::Str("world".into())]).unwrap();
        assert_eq!(out, vec![Value::Str("hello world".into())]);
    }

    #[test]
    fn test_result_return_error_slot() {
        let export = FunctionExport::new(divide);
        let ok = export.invoke(vec![Value::Int(9), Value::Int(3)]).unwrap();
        assert_eq!(ok, vec![Value::Int(3), Value::Nil]);

        let err = export.invoke(vec![Value::Int(9), Value::Int(0)]).unwrap();
        assert_eq!(err.len(), 2);
        assert!(err[0].is_nil());
        assert_eq!(err[1].as_error().unwrap().kind, ErrorKind::Module);
    }

    #[test]
    fn test_invoke_rejects_wrong_type() {
        let export = FunctionExport::new(greet);
        let err = export.invoke(vec![Value::Int(1)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_narrow_integer_out_of_range() {
        let export = FunctionExport::new(|x: i32| x + 1);
        let err = export.invoke(vec![Value::Int(i64::MAX)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TypeMismatch);
    }

    #[test]
    fn test_zero_arity_and_unit_return() {
        let export = FunctionExport::new(|| ());
        assert!(export.signature().params.is_empty());
        assert!(export.invoke(vec![]).unwrap().is_empty());
    }

    #[test]
    fn test_tuple_return() {
        let export = FunctionExport::new(|s: String| (s.len() as u64, s));
        let out = export.invoke(vec![Value::Str("abc".into())]).unwrap();
        assert_eq!(out, vec![Value::UInt(3), Value::Str("abc".into())]);
    }
}

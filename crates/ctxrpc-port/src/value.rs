//! Live values passed to and returned from calls.
//!
//! Arrays and objects are shared handles: cloning one shares the node, and
//! two values are the same node when their handles point at the same
//! allocation. That is what lets a graph contain cycles and lets the
//! serializer preserve shared structure.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Number;

use crate::error::{Result, RpcError};
use crate::function::Function;

/// A value that can cross an endpoint boundary.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Moved out of band through the packet's transfer list.
    Binary(Bytes),
    Array(Array),
    Object(Object),
    /// Crosses as a token; the receiver gets a proxy that calls back.
    Function(Function),
}

impl Value {
    /// Build from plain JSON.
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(flag) => Value::Bool(flag),
            serde_json::Value::Number(number) => Value::Number(number),
            serde_json::Value::String(text) => Value::String(text),
            serde_json::Value::Array(items) => {
                Value::Array(Array::from_vec(items.into_iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => {
                let object = Object::new();
                for (key, value) in map {
                    object.insert(key, Value::from_json(value));
                }
                Value::Object(object)
            }
        }
    }

    /// Convert to plain JSON.
    ///
    /// Binary becomes an array of byte values and non-enumerable properties
    /// are skipped. Functions, accessors and cycles have no JSON form and
    /// fail with [`RpcError::NotData`].
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut ancestors = Vec::new();
        self.to_json_inner(&mut ancestors)
    }

    fn to_json_inner(&self, ancestors: &mut Vec<usize>) -> Result<serde_json::Value> {
        Ok(match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(flag) => serde_json::Value::Bool(*flag),
            Value::Number(number) => serde_json::Value::Number(number.clone()),
            Value::String(text) => serde_json::Value::String(text.clone()),
            Value::Binary(bytes) => serde_json::Value::Array(
                bytes.iter().map(|byte| serde_json::Value::from(*byte)).collect(),
            ),
            Value::Function(_) => return Err(RpcError::NotData("function".into())),
            Value::Array(array) => {
                enter(ancestors, array.addr())?;
                let mut items = Vec::with_capacity(array.len());
                for item in array.to_vec() {
                    items.push(item.to_json_inner(ancestors)?);
                }
                ancestors.pop();
                serde_json::Value::Array(items)
            }
            Value::Object(object) => {
                enter(ancestors, object.addr())?;
                let mut map = serde_json::Map::new();
                for (key, property) in object.entries() {
                    if !property.enumerable {
                        continue;
                    }
                    match property.slot {
                        Slot::Data(value) => {
                            map.insert(key, value.to_json_inner(ancestors)?);
                        }
                        Slot::Accessor(_) => {
                            return Err(RpcError::NotData(format!("accessor property {key:?}")))
                        }
                    }
                }
                ancestors.pop();
                serde_json::Value::Object(map)
            }
        })
    }

    /// Build from any serializable value.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        Ok(Value::from_json(serde_json::to_value(value)?))
    }

    /// Convert into a typed value via its JSON form.
    pub fn deserialize_into<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.to_json()?)?)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(number) => number.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(number) => number.as_i64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(array) => Some(array),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }

    /// A short name for the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }
}

fn enter(ancestors: &mut Vec<usize>, addr: usize) -> Result<()> {
    if ancestors.contains(&addr) {
        return Err(RpcError::NotData("cyclic structure".into()));
    }
    ancestors.push(addr);
    Ok(())
}

/// Primitives compare by value; arrays, objects and functions by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(flag) => write!(f, "Bool({flag})"),
            Value::Number(number) => write!(f, "Number({number})"),
            Value::String(text) => write!(f, "String({text:?})"),
            Value::Binary(bytes) => write!(f, "Binary({} bytes)", bytes.len()),
            Value::Array(array) => fmt::Debug::fmt(array, f),
            Value::Object(object) => fmt::Debug::fmt(object, f),
            Value::Function(function) => fmt::Debug::fmt(function, f),
        }
    }
}

impl From<bool> for Value {
    fn from(flag: bool) -> Self {
        Value::Bool(flag)
    }
}

macro_rules! from_integer {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(n: $ty) -> Self {
                Value::Number(Number::from(n))
            }
        })*
    };
}

from_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<f64> for Value {
    /// NaN and infinities have no JSON number form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::String(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::String(text)
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Binary(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(Array::from_vec(items))
    }
}

impl From<Array> for Value {
    fn from(array: Array) -> Self {
        Value::Array(array)
    }
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object)
    }
}

impl From<Function> for Value {
    fn from(function: Function) -> Self {
        Value::Function(function)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// A shared, mutable list.
#[derive(Clone, Default)]
pub struct Array {
    items: Arc<RwLock<Vec<Value>>>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self {
            items: Arc::new(RwLock::new(items)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.items.read().get(index).cloned()
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.items.write().push(value.into());
    }

    /// Replace the element at `index`. Returns false if out of bounds.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> bool {
        match self.items.write().get_mut(index) {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.items.read().clone()
    }

    /// True if both handles refer to the same array.
    pub fn ptr_eq(&self, other: &Array) -> bool {
        Arc::ptr_eq(&self.items, &other.items)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.items) as *const () as usize
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Array(len={}, @{:#x})", self.len(), self.addr())
    }
}

/// Where a property's value comes from.
#[derive(Clone, Debug)]
pub enum Slot {
    Data(Value),
    /// Read by calling the function with no arguments.
    Accessor(Function),
}

/// One own property of an [`Object`].
#[derive(Clone, Debug)]
pub struct Property {
    pub slot: Slot,
    pub enumerable: bool,
    pub writable: bool,
    pub configurable: bool,
}

impl Property {
    /// A data property with all flags set.
    pub fn data(value: impl Into<Value>) -> Self {
        Self {
            slot: Slot::Data(value.into()),
            enumerable: true,
            writable: true,
            configurable: true,
        }
    }

    /// An accessor property with all flags set.
    pub fn accessor(getter: Function) -> Self {
        Self {
            slot: Slot::Accessor(getter),
            enumerable: true,
            writable: true,
            configurable: true,
        }
    }

    pub fn enumerable(mut self, flag: bool) -> Self {
        self.enumerable = flag;
        self
    }

    pub fn writable(mut self, flag: bool) -> Self {
        self.writable = flag;
        self
    }

    pub fn configurable(mut self, flag: bool) -> Self {
        self.configurable = flag;
        self
    }
}

/// A shared, mutable map of properties in insertion order.
#[derive(Clone, Default)]
pub struct Object {
    props: Arc<RwLock<Vec<(String, Property)>>>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a data property, keeping the position of an existing key.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.define(key, Property::data(value));
    }

    /// Set a property with explicit slot and flags.
    pub fn define(&self, key: impl Into<String>, property: Property) {
        let key = key.into();
        let mut props = self.props.write();
        match props.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, slot)) => *slot = property,
            None => props.push((key, property)),
        }
    }

    /// Define an accessor property read through `getter`.
    pub fn define_getter(&self, key: impl Into<String>, getter: Function) {
        self.define(key, Property::accessor(getter));
    }

    /// The value of a data property. Accessors return `None`; use
    /// [`Object::read`] for those.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.property(key)?.slot {
            Slot::Data(value) => Some(value),
            Slot::Accessor(_) => None,
        }
    }

    pub fn property(&self, key: &str) -> Option<Property> {
        self.props
            .read()
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, property)| property.clone())
    }

    /// Read a property, calling its getter if it is an accessor.
    /// A missing key reads as `Null`.
    pub async fn read(&self, key: &str) -> Result<Value> {
        match self.property(key).map(|property| property.slot) {
            Some(Slot::Data(value)) => Ok(value),
            Some(Slot::Accessor(getter)) => getter.call(Vec::new()).await,
            None => Ok(Value::Null),
        }
    }

    pub fn remove(&self, key: &str) -> Option<Property> {
        let mut props = self.props.write();
        let index = props.iter().position(|(existing, _)| existing == key)?;
        Some(props.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.props.read().iter().any(|(existing, _)| existing == key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.props.read().iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.props.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the current properties.
    pub fn entries(&self) -> Vec<(String, Property)> {
        self.props.read().clone()
    }

    /// True if both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.props, &other.props)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.props) as *const () as usize
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object(keys={:?}, @{:#x})", self.keys(), self.addr())
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[test]
    fn json_conversion_keeps_plain_data() {
        let source = json!({"name": "ctx", "tags": ["a", "b"], "n": 3, "ok": true, "none": null});
        let value = Value::from_json(source.clone());
        assert_eq!(value.to_json().unwrap(), source);
    }

    #[test]
    fn object_keeps_insertion_order_and_position_on_replace() {
        let object = Object::new();
        object.insert("b", 1);
        object.insert("a", 2);
        object.insert("b", 3);
        assert_eq!(object.keys(), vec!["b", "a"]);
        assert_eq!(object.get("b"), Some(Value::from(3)));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Array::from_vec(vec![1.into()]);
        let b = Array::from_vec(vec![1.into()]);
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
        assert_eq!(Value::from("x"), Value::from("x"));
    }

    #[test]
    fn cycles_and_functions_are_not_data() {
        let object = Object::new();
        object.insert("self", object.clone());
        assert!(matches!(object_value(&object).to_json(), Err(RpcError::NotData(_))));

        let with_fn = Object::new();
        with_fn.insert("f", Function::from_sync(|_| Ok(Value::Null)));
        assert!(matches!(object_value(&with_fn).to_json(), Err(RpcError::NotData(_))));
    }

    #[test]
    fn shared_but_acyclic_nodes_are_data() {
        let shared = Array::from_vec(vec![1.into()]);
        let outer = Array::from_vec(vec![shared.clone().into(), shared.into()]);
        assert_eq!(Value::from(outer).to_json().unwrap(), json!([[1], [1]]));
    }

    #[test]
    fn hidden_properties_are_skipped_in_json() {
        let object = Object::new();
        object.insert("shown", 1);
        object.define("hidden", Property::data(2).enumerable(false));
        assert_eq!(object_value(&object).to_json().unwrap(), json!({"shown": 1}));
    }

    #[test]
    fn typed_round_trip_through_serde() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Point {
            x: i32,
            y: i32,
        }
        let value = Value::from_serialize(&Point { x: 1, y: -2 }).unwrap();
        assert_eq!(value.as_object().unwrap().get("y"), Some(Value::from(-2)));
        assert_eq!(value.deserialize_into::<Point>().unwrap(), Point { x: 1, y: -2 });
    }

    #[test]
    fn non_finite_floats_become_null() {
        assert!(Value::from(f64::NAN).is_null());
        assert_eq!(Value::from(1.5).as_f64(), Some(1.5));
    }

    #[tokio::test]
    async fn read_calls_accessors() {
        let object = Object::new();
        object.define_getter("answer", Function::from_sync(|_| Ok(Value::from(42))));
        object.insert("plain", "x");

        assert_eq!(object.get("answer"), None);
        assert_eq!(object.read("answer").await.unwrap(), Value::from(42));
        assert_eq!(object.read("plain").await.unwrap(), Value::from("x"));
        assert!(object.read("missing").await.unwrap().is_null());
    }

    fn object_value(object: &Object) -> Value {
        Value::Object(object.clone())
    }
}

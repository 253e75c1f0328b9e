//! JSON encoding of argument and result graphs.
//!
//! Primitives are plain JSON. Everything structured is an object tagged with
//! `"$type"`:
//!
//! ```text
//! {"$type":"array","id":0,"items":[...]}
//! {"$type":"object","id":1,"props":[{"key":"k","value":...}]}
//! {"$type":"ref","id":0}
//! {"$type":"binary","slot":0}
//! {"$type":"callback","scope":"main/math","id":"..."}
//! {"$type":"getter","scope":"main/math","id":"..."}
//! ```
//!
//! Node ids are scoped to one value list (a call's params or a return's
//! result), so a `ref` can point at any array or object emitted before it in
//! that list.

use serde::{Deserialize, Serialize};

/// Identifier of an array or object node within one value list.
pub type NodeId = u32;

/// One encoded value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Node(WireNode),
}

/// A structured or out-of-band value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "$type", rename_all = "snake_case")]
pub enum WireNode {
    Array {
        id: NodeId,
        items: Vec<WireValue>,
    },
    Object {
        id: NodeId,
        props: Vec<WireProperty>,
    },
    /// Another occurrence of an array or object already emitted.
    Ref { id: NodeId },
    /// Index into the packet's transfer list.
    Binary { slot: usize },
    /// A function owned by the endpoint named in `scope`.
    Callback(FunctionToken),
    /// An accessor owned by the endpoint named in `scope`; only valid as a
    /// property value.
    Getter(FunctionToken),
}

/// Placeholder for a function that stays on its home side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionToken {
    /// `participant/endpoint` of the side that registered the function.
    pub scope: String,
    /// Registry id on that side.
    pub id: String,
}

/// One own property of an encoded object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireProperty {
    pub key: String,
    pub value: WireValue,
    #[serde(default = "yes", skip_serializing_if = "is_true")]
    pub enumerable: bool,
    #[serde(default = "yes", skip_serializing_if = "is_true")]
    pub writable: bool,
    #[serde(default = "yes", skip_serializing_if = "is_true")]
    pub configurable: bool,
}

impl WireProperty {
    /// A property with all flags set.
    pub fn new(key: impl Into<String>, value: WireValue) -> Self {
        Self {
            key: key.into(),
            value,
            enumerable: true,
            writable: true,
            configurable: true,
        }
    }
}

fn yes() -> bool {
    true
}

fn is_true(flag: &bool) -> bool {
    *flag
}

impl WireValue {
    /// Shorthand for a callback token.
    pub fn callback(scope: impl Into<String>, id: impl Into<String>) -> Self {
        WireValue::Node(WireNode::Callback(FunctionToken {
            scope: scope.into(),
            id: id.into(),
        }))
    }

    /// Shorthand for a getter token.
    pub fn getter(scope: impl Into<String>, id: impl Into<String>) -> Self {
        WireValue::Node(WireNode::Getter(FunctionToken {
            scope: scope.into(),
            id: id.into(),
        }))
    }
}

impl From<serde_json::Number> for WireValue {
    fn from(number: serde_json::Number) -> Self {
        WireValue::Number(number)
    }
}

impl From<bool> for WireValue {
    fn from(flag: bool) -> Self {
        WireValue::Bool(flag)
    }
}

impl From<&str> for WireValue {
    fn from(text: &str) -> Self {
        WireValue::String(text.to_string())
    }
}

impl From<String> for WireValue {
    fn from(text: String) -> Self {
        WireValue::String(text)
    }
}

impl From<WireNode> for WireValue {
    fn from(node: WireNode) -> Self {
        WireValue::Node(node)
    }
}

use std::collections::HashMap;
use std::sync::Weak;

use bytes::Bytes;
use ctxrpc_wire::{FunctionToken, NodeId, WireError, WireNode, WireValue, SEPARATOR};

use crate::function::{Function, RemoteLink};
use crate::value::{Array, Object, Property, Slot, Value};

/// Decode a value list received by an endpoint.
///
/// Callback and getter tokens become remote functions bound to `link`. A
/// node is cached before its children are decoded, so `ref` nodes resolve
/// to the same handle and cycles come back as cycles. A token id seen more
/// than once yields one shared function.
pub fn deserialize(
    values: Vec<WireValue>,
    transfer: &[Bytes],
    link: &Weak<dyn RemoteLink>,
) -> Result<Vec<Value>, WireError> {
    let mut walker = Walker {
        transfer,
        link,
        nodes: HashMap::new(),
        functions: HashMap::new(),
    };
    values.into_iter().map(|value| walker.value(value)).collect()
}

struct Walker<'a> {
    transfer: &'a [Bytes],
    link: &'a Weak<dyn RemoteLink>,
    nodes: HashMap<NodeId, Value>,
    functions: HashMap<String, Function>,
}

impl Walker<'_> {
    fn value(&mut self, value: WireValue) -> Result<Value, WireError> {
        let node = match value {
            WireValue::Null => return Ok(Value::Null),
            WireValue::Bool(flag) => return Ok(Value::Bool(flag)),
            WireValue::Number(number) => return Ok(Value::Number(number)),
            WireValue::String(text) => return Ok(Value::String(text)),
            WireValue::Node(node) => node,
        };

        match node {
            WireNode::Array { id, items } => {
                let array = Array::new();
                self.define(id, Value::Array(array.clone()))?;
                for item in items {
                    array.push(self.value(item)?);
                }
                Ok(Value::Array(array))
            }
            WireNode::Object { id, props } => {
                let object = Object::new();
                self.define(id, Value::Object(object.clone()))?;
                for prop in props {
                    let slot = match prop.value {
                        WireValue::Node(WireNode::Getter(token)) => {
                            Slot::Accessor(self.function(token)?)
                        }
                        other => Slot::Data(self.value(other)?),
                    };
                    object.define(
                        prop.key,
                        Property {
                            slot,
                            enumerable: prop.enumerable,
                            writable: prop.writable,
                            configurable: prop.configurable,
                        },
                    );
                }
                Ok(Value::Object(object))
            }
            WireNode::Ref { id } => self.nodes.get(&id).cloned().ok_or(WireError::UnknownNode(id)),
            WireNode::Binary { slot } => self
                .transfer
                .get(slot)
                .cloned()
                .map(Value::Binary)
                .ok_or(WireError::MissingTransfer {
                    slot,
                    len: self.transfer.len(),
                }),
            WireNode::Callback(token) => Ok(Value::Function(self.function(token)?)),
            WireNode::Getter(_) => Err(WireError::MisplacedGetter),
        }
    }

    fn define(&mut self, id: NodeId, node: Value) -> Result<(), WireError> {
        if self.nodes.insert(id, node).is_some() {
            return Err(WireError::DuplicateNode(id));
        }
        Ok(())
    }

    /// Token ids travel back as the action segment of calls and cleanup
    /// notices, so one containing the separator is refused here.
    fn function(&mut self, token: FunctionToken) -> Result<Function, WireError> {
        if let Some(function) = self.functions.get(&token.id) {
            return Ok(function.clone());
        }
        if token.id.contains(SEPARATOR) {
            return Err(WireError::SeparatorInToken { id: token.id });
        }
        let id = token.id.clone();
        let function = Function::remote(token, self.link.clone());
        self.functions.insert(id, function.clone());
        Ok(function)
    }
}

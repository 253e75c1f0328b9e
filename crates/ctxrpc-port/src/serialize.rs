use std::collections::HashMap;

use bytes::Bytes;
use ctxrpc_wire::{NodeId, WireNode, WireProperty, WireValue};
use uuid::Uuid;

use crate::function::Function;
use crate::value::{Slot, Value};

/// Output of [`serialize`].
#[derive(Debug, Default)]
pub struct Serialized {
    /// Encoded values, one per input value.
    pub values: Vec<WireValue>,
    /// Functions that became tokens, keyed by their new registry id.
    pub functions: Vec<(String, Function)>,
    /// Binary payloads, indexed by the `slot` of their binary nodes.
    pub transfer: Vec<Bytes>,
}

/// Encode a value list for the endpoint whose scope is `scope`.
///
/// Arrays and objects seen twice (shared or cyclic) become `ref` nodes. A
/// function reached more than once gets one token id; the same buffer
/// reached more than once gets one transfer slot.
pub fn serialize(scope: &str, values: &[Value]) -> Serialized {
    let mut walker = Walker {
        scope,
        nodes: HashMap::new(),
        next_node: 0,
        function_ids: HashMap::new(),
        binary_slots: HashMap::new(),
        out: Serialized::default(),
    };
    let encoded = values.iter().map(|value| walker.value(value)).collect();
    walker.out.values = encoded;
    walker.out
}

struct Walker<'a> {
    scope: &'a str,
    nodes: HashMap<usize, NodeId>,
    next_node: NodeId,
    function_ids: HashMap<usize, String>,
    binary_slots: HashMap<(usize, usize), usize>,
    out: Serialized,
}

impl Walker<'_> {
    fn value(&mut self, value: &Value) -> WireValue {
        match value {
            Value::Null => WireValue::Null,
            Value::Bool(flag) => WireValue::Bool(*flag),
            Value::Number(number) => WireValue::Number(number.clone()),
            Value::String(text) => WireValue::String(text.clone()),
            Value::Binary(bytes) => WireNode::Binary {
                slot: self.binary(bytes),
            }
            .into(),
            Value::Function(function) => {
                let id = self.function(function);
                WireValue::callback(self.scope, id)
            }
            Value::Array(array) => {
                let id = match self.visit(array.addr()) {
                    Ok(id) => id,
                    Err(seen) => return WireNode::Ref { id: seen }.into(),
                };
                let items = array.to_vec().iter().map(|item| self.value(item)).collect();
                WireNode::Array { id, items }.into()
            }
            Value::Object(object) => {
                let id = match self.visit(object.addr()) {
                    Ok(id) => id,
                    Err(seen) => return WireNode::Ref { id: seen }.into(),
                };
                let props = object
                    .entries()
                    .into_iter()
                    .map(|(key, property)| {
                        let value = match &property.slot {
                            Slot::Data(value) => self.value(value),
                            Slot::Accessor(getter) => {
                                let id = self.function(getter);
                                WireValue::getter(self.scope, id)
                            }
                        };
                        WireProperty {
                            key,
                            value,
                            enumerable: property.enumerable,
                            writable: property.writable,
                            configurable: property.configurable,
                        }
                    })
                    .collect();
                WireNode::Object { id, props }.into()
            }
        }
    }

    /// A fresh node id, or `Err` with the id already given to this node.
    fn visit(&mut self, addr: usize) -> Result<NodeId, NodeId> {
        if let Some(seen) = self.nodes.get(&addr) {
            return Err(*seen);
        }
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(addr, id);
        Ok(id)
    }

    fn function(&mut self, function: &Function) -> String {
        if let Some(id) = self.function_ids.get(&function.addr()) {
            return id.clone();
        }
        let id = Uuid::new_v4().to_string();
        self.function_ids.insert(function.addr(), id.clone());
        self.out.functions.push((id.clone(), function.clone()));
        id
    }

    fn binary(&mut self, bytes: &Bytes) -> usize {
        let key = (bytes.as_ptr() as usize, bytes.len());
        if let Some(slot) = self.binary_slots.get(&key) {
            return *slot;
        }
        let slot = self.out.transfer.len();
        self.out.transfer.push(bytes.clone());
        self.binary_slots.insert(key, slot);
        slot
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::value::{Array, Object, Property};

    fn encode(values: &[Value]) -> (serde_json::Value, Serialized) {
        let out = serialize("main/math", values);
        (serde_json::to_value(&out.values).unwrap(), out)
    }

    #[test]
    fn plain_data_encodes_structurally() {
        let object = Object::new();
        object.insert("n", 1);
        object.insert("list", Value::from(vec![Value::from("a"), Value::Null]));

        let (json, out) = encode(&[object.into(), true.into()]);
        assert_eq!(
            json,
            json!([
                {"$type": "object", "id": 0, "props": [
                    {"key": "n", "value": 1},
                    {"key": "list", "value": {"$type": "array", "id": 1, "items": ["a", null]}}
                ]},
                true
            ])
        );
        assert!(out.functions.is_empty());
        assert!(out.transfer.is_empty());
    }

    #[test]
    fn self_reference_becomes_ref() {
        let object = Object::new();
        object.insert("me", object.clone());

        let (json, _) = encode(&[object.into()]);
        assert_eq!(
            json,
            json!([{"$type": "object", "id": 0, "props": [
                {"key": "me", "value": {"$type": "ref", "id": 0}}
            ]}])
        );
    }

    #[test]
    fn shared_nodes_across_the_list_share_ids() {
        let shared = Array::from_vec(vec![1.into()]);
        let (json, _) = encode(&[shared.clone().into(), shared.into()]);
        assert_eq!(json[1], json!({"$type": "ref", "id": 0}));
    }

    #[test]
    fn functions_become_tokens_and_are_collected() {
        let f = Function::from_sync(|_| Ok(Value::Null));
        let (json, out) = encode(&[f.clone().into(), f.into()]);

        assert_eq!(out.functions.len(), 1);
        let id = &out.functions[0].0;
        assert_eq!(json[0], json!({"$type": "callback", "scope": "main/math", "id": id}));
        assert_eq!(json[1], json[0]);
    }

    #[test]
    fn every_serialization_mints_new_ids() {
        let f = Value::Function(Function::from_sync(|_| Ok(Value::Null)));
        let first = serialize("s", std::slice::from_ref(&f));
        let second = serialize("s", &[f]);
        assert_ne!(first.functions[0].0, second.functions[0].0);
    }

    #[test]
    fn accessors_become_getters_and_flags_survive() {
        let object = Object::new();
        object.define_getter("answer", Function::from_sync(|_| Ok(Value::from(42))));
        object.define("fixed", Property::data(1).writable(false).configurable(false));

        let (json, out) = encode(&[object.into()]);
        let props = &json[0]["props"];
        assert_eq!(props[0]["value"]["$type"], "getter");
        assert_eq!(props[1], json!({"key": "fixed", "value": 1, "writable": false, "configurable": false}));
        assert_eq!(out.functions.len(), 1);
    }

    #[test]
    fn binaries_move_to_transfer_list() {
        let buffer = Bytes::from_static(b"payload");
        let other = Bytes::from_static(b"other");
        let (json, out) = encode(&[buffer.clone().into(), other.into(), buffer.into()]);

        assert_eq!(json[0], json!({"$type": "binary", "slot": 0}));
        assert_eq!(json[1], json!({"$type": "binary", "slot": 1}));
        assert_eq!(json[2], json!({"$type": "binary", "slot": 0}));
        assert_eq!(out.transfer.len(), 2);
    }
}

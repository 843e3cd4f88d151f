//! Output normalization.
//!
//! Capabilities return loosely shaped JSON. Everything downstream works on
//! [`NodeOutputs`], one item list per output port.

use relaycore::{Item, ItemList, NodeOutputs};
use serde_json::Value;

/// Convert a raw capability result into per-port item lists.
///
/// Ports past `declared_outputs` are dropped.
pub fn normalize_output(raw: Value, declared_outputs: usize) -> NodeOutputs {
    let mut outputs = match raw {
        Value::Array(elements) if !elements.is_empty() && elements.iter().all(Value::is_array) => {
            elements
                .into_iter()
                .map(|port| match port {
                    Value::Array(list) => normalize_list(list),
                    _ => Vec::new(),
                })
                .collect()
        }
        Value::Array(elements) => vec![normalize_list(elements)],
        other => vec![vec![normalize_item(other)]],
    };

    let declared = declared_outputs.max(1);
    if outputs.len() > declared {
        tracing::warn!(
            "Node returned {} output ports but declares {}, extra ports dropped",
            outputs.len(),
            declared
        );
        outputs.truncate(declared);
    }
    outputs
}

fn normalize_list(elements: Vec<Value>) -> ItemList {
    elements.into_iter().map(normalize_item).collect()
}

/// Normalize a single value into an item
pub fn normalize_item(value: Value) -> Item {
    if is_item_shaped(&value) {
        if let Ok(item) = serde_json::from_value::<Item>(value.clone()) {
            return item;
        }
    }
    Item::from_value(value)
}

fn is_item_shaped(value: &Value) -> bool {
    value
        .get("json")
        .map(Value::is_object)
        .unwrap_or(false)
}

/// A port list as JSON, used for step snapshots and events
pub fn outputs_to_value(outputs: &NodeOutputs) -> Value {
    serde_json::to_value(outputs).unwrap_or(Value::Null)
}

use crate::BinaryRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One unit of data flowing between nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Structured fields
    pub json: Map<String, Value>,

    /// Binary attachments, keyed by property name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary: BTreeMap<String, BinaryRef>,
}

/// Items on a single port
pub type ItemList = Vec<Item>;

/// One item list per output port, indexed by port number
pub type NodeOutputs = Vec<ItemList>;

impl Item {
    pub fn new(json: Map<String, Value>) -> Self {
        Self {
            json,
            binary: BTreeMap::new(),
        }
    }

    /// Build an item from any JSON value.
    ///
    /// Objects become the item's fields, anything else is stored under `value`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            Value::Null => Self::default(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                Self::new(map)
            }
        }
    }

    pub fn with_binary(mut self, key: impl Into<String>, binary: BinaryRef) -> Self {
        self.binary.insert(key.into(), binary);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.json.get(field)
    }

    /// The item's fields as a JSON object value
    pub fn json_value(&self) -> Value {
        Value::Object(self.json.clone())
    }
}

impl From<Value> for Item {
    fn from(value: Value) -> Self {
        Item::from_value(value)
    }
}

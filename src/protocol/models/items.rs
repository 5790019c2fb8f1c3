use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{ArbitraryJson, ItemStatus};

/// Conversation item.
///
/// Manual (de)serialization keeps items the bridge does not act on as raw
/// JSON while keeping strong typing for function calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    FunctionCall {
        id: Option<String>,
        status: Option<ItemStatus>,
        name: String,
        call_id: String,
        /// JSON-encoded argument object, exactly as produced by the model.
        arguments: String,
    },
    FunctionCallOutput {
        id: Option<String>,
        call_id: String,
        /// JSON-encoded result payload.
        output: String,
    },
    Unknown(ArbitraryJson),
}

impl Item {
    #[must_use]
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            id: None,
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

impl std::fmt::Display for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::FunctionCall { .. } => "function_call",
            Self::FunctionCallOutput { .. } => "function_call_output",
            Self::Unknown(value) => value
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown"),
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ItemRepr {
    FunctionCall {
        id: Option<String>,
        status: Option<ItemStatus>,
        name: String,
        call_id: String,
        #[serde(default)]
        arguments: String,
    },
    FunctionCallOutput {
        id: Option<String>,
        call_id: String,
        output: String,
    },
}

impl From<ItemRepr> for Item {
    fn from(repr: ItemRepr) -> Self {
        match repr {
            ItemRepr::FunctionCall {
                id,
                status,
                name,
                call_id,
                arguments,
            } => Self::FunctionCall {
                id,
                status,
                name,
                call_id,
                arguments,
            },
            ItemRepr::FunctionCallOutput { id, call_id, output } => {
                Self::FunctionCallOutput { id, call_id, output }
            }
        }
    }
}

impl Serialize for Item {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Unknown(value) => value.serialize(serializer),
            Self::FunctionCall {
                id,
                status,
                name,
                call_id,
                arguments,
            } => {
                let mut state = serializer.serialize_struct("Item", 6)?;
                state.serialize_field("type", "function_call")?;
                if let Some(value) = id {
                    state.serialize_field("id", value)?;
                }
                if let Some(value) = status {
                    state.serialize_field("status", value)?;
                }
                state.serialize_field("name", name)?;
                state.serialize_field("call_id", call_id)?;
                state.serialize_field("arguments", arguments)?;
                state.end()
            }
            Self::FunctionCallOutput { id, call_id, output } => {
                let mut state = serializer.serialize_struct("Item", 4)?;
                state.serialize_field("type", "function_call_output")?;
                if let Some(value) = id {
                    state.serialize_field("id", value)?;
                }
                state.serialize_field("call_id", call_id)?;
                state.serialize_field("output", output)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Item {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = ArbitraryJson::deserialize(deserializer)?;
        let is_known = matches!(
            value.get("type").and_then(|v| v.as_str()),
            Some("function_call" | "function_call_output")
        );
        if !is_known {
            return Ok(Self::Unknown(value));
        }
        ItemRepr::deserialize(value)
            .map(Into::into)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn function_call_round_trips_through_json() {
        let raw = json!({
            "type": "function_call",
            "id": "item_1",
            "status": "completed",
            "name": "checkBalance",
            "call_id": "call_9",
            "arguments": "{\"account\":\"12345\"}"
        });
        let item: Item = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(&item, Item::FunctionCall { name, .. } if name == "checkBalance"));
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }

    #[test]
    fn other_items_are_preserved() {
        let raw = json!({ "type": "message", "role": "assistant", "content": [] });
        let item: Item = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.to_string(), "message");
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }
}

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use crate::core::error::{Error, ErrorKind, Result};

/// Reserved field carrying the document id inside the stored representation.
/// Also the final tie-break sort key of paged queries. Documents may not
/// carry a field of this name themselves.
pub const ID_FIELD: &str = "__id";

/// Any record with a stable string identifier.
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    fn id(&self) -> String;
}

/// Attach the id to a caller-supplied value before it reaches a node.
pub(crate) fn to_stored(id: &str, value: Value) -> Result<Value> {
    match value {
        Value::Object(fields) if fields.contains_key(ID_FIELD) => Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("document {} uses the reserved field {}", id, ID_FIELD),
        )),
        Value::Object(mut fields) => {
            fields.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            Ok(Value::Object(fields))
        }
        other => Err(Error::new(
            ErrorKind::InvalidArgument,
            format!("document {} must serialize to an object, got {}", id, kind_name(&other)),
        )),
    }
}

/// Strip the reserved id field so callers get back exactly what they put.
pub(crate) fn from_stored(mut value: Value) -> Value {
    if let Value::Object(fields) = &mut value {
        fields.remove(ID_FIELD);
    }
    value
}

pub(crate) fn stored_id(value: &Value) -> Option<&str> {
    value.get(ID_FIELD).and_then(Value::as_str)
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

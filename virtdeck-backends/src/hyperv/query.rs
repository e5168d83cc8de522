//! JSON response handling for PowerShell queries.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AdapterError, Result};
use crate::types::InstanceState;

/// `ConvertTo-Json` emits a bare object when a query matches exactly one
/// entity and an array otherwise; both shapes must be accepted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

/// Decode a query response into a list, accepting both JSON shapes.
/// Empty output means the query matched nothing.
pub fn parse_one_or_many<T: DeserializeOwned>(raw: &str, what: &'static str) -> Result<Vec<T>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str::<OneOrMany<T>>(raw)
        .map(OneOrMany::into_vec)
        .map_err(|e| AdapterError::ParseFailed {
            what,
            detail: e.to_string(),
        })
}

/// Render a loosely-typed JSON property for display (GUIDs and timestamps
/// arrive as strings on some PowerShell versions and objects on others).
pub fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Map a Hyper-V `State` property into the shared vocabulary.
///
/// `ConvertTo-Json` serializes the state enum as a number on Windows
/// PowerShell and as its name on newer hosts; both encodings are mapped,
/// anything else is `Unknown`.
pub fn map_ps_state(value: &Value) -> InstanceState {
    match value {
        Value::String(s) => map_state_name(s),
        Value::Number(n) => match n.as_u64() {
            Some(2) => InstanceState::Running,
            Some(3) => InstanceState::Stopped,
            Some(6) => InstanceState::Suspended,
            Some(9) => InstanceState::Paused,
            _ => InstanceState::Unknown,
        },
        _ => InstanceState::Unknown,
    }
}

/// Map a textual Hyper-V state name.
pub fn map_state_name(name: &str) -> InstanceState {
    match name.trim() {
        "Running" => InstanceState::Running,
        "Off" => InstanceState::Stopped,
        "Paused" => InstanceState::Paused,
        "Saved" => InstanceState::Suspended,
        _ => InstanceState::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Record {
        #[serde(rename = "Name")]
        name: String,
    }

    #[test]
    fn single_object_becomes_one_element_list() {
        let records: Vec<Record> =
            parse_one_or_many(r#"{"Name":"VM1"}"#, "test record").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "VM1");
    }

    #[test]
    fn array_stays_a_list() {
        let records: Vec<Record> =
            parse_one_or_many(r#"[{"Name":"VM1"},{"Name":"VM2"}]"#, "test record").unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn empty_output_is_an_empty_list() {
        let records: Vec<Record> = parse_one_or_many("  \n", "test record").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn malformed_output_is_a_parse_failure() {
        let result: Result<Vec<Record>> = parse_one_or_many("not json", "test record");
        assert!(matches!(result, Err(AdapterError::ParseFailed { .. })));
    }

    #[test]
    fn state_maps_both_encodings() {
        assert_eq!(map_ps_state(&json!("Running")), InstanceState::Running);
        assert_eq!(map_ps_state(&json!("Off")), InstanceState::Stopped);
        assert_eq!(map_ps_state(&json!(2)), InstanceState::Running);
        assert_eq!(map_ps_state(&json!(3)), InstanceState::Stopped);
        assert_eq!(map_ps_state(&json!(9)), InstanceState::Paused);
        assert_eq!(map_ps_state(&json!(6)), InstanceState::Suspended);
        assert_eq!(map_ps_state(&json!(4)), InstanceState::Unknown);
        assert_eq!(map_ps_state(&json!(null)), InstanceState::Unknown);
    }
}

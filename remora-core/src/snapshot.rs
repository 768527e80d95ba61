//! Entity snapshots and the server's wire record

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::PayloadError;

/// Attribute bag holding an entity's last known state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(Map<String, Value>);

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Shallow merge: each top-level field of `partial` replaces the current
    /// value wholesale. Nested objects are not merged. Fields absent from
    /// `partial` are left untouched.
    pub fn merge(&mut self, partial: &Map<String, Value>) {
        for (field, value) in partial {
            self.0.insert(field.clone(), value.clone());
        }
    }
}

impl From<Map<String, Value>> for Snapshot {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Snapshot> for Value {
    fn from(snapshot: Snapshot) -> Self {
        Value::Object(snapshot.0)
    }
}

/// Actions the requesting principal may perform on an entity.
///
/// Computed by the server for display purposes; nothing client-side enforces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowedActions(Vec<String>);

impl AllowedActions {
    pub fn new(actions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(actions.into_iter().map(Into::into).collect())
    }

    pub fn permits(&self, action: &str) -> bool {
        self.0.iter().any(|a| a == action)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Entity payload as the naming service returns it, and as the config cache
/// stores it.
///
/// ```json
/// {"_key": "u1", "data": {"name": "ann"}, "allowedActions": ["read"]}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub data: Snapshot,
    #[serde(
        rename = "allowedActions",
        default,
        deserialize_with = "null_as_default"
    )]
    pub allowed_actions: AllowedActions,
}

impl EntityRecord {
    pub fn new(key: impl Into<String>, data: Snapshot, allowed_actions: AllowedActions) -> Self {
        Self {
            key: key.into(),
            data,
            allowed_actions,
        }
    }

    /// Decode a record out of an RPC result value.
    ///
    /// `method` only feeds the error message.
    pub fn from_value(method: &str, value: Value) -> Result<Self, PayloadError> {
        if !value.is_object() {
            return Err(PayloadError::NotAnObject {
                method: method.to_string(),
                found: json_kind(&value).to_string(),
            });
        }
        let record: EntityRecord =
            serde_json::from_value(value).map_err(|e| PayloadError::Malformed {
                method: method.to_string(),
                reason: e.to_string(),
            })?;
        if record.key.is_empty() {
            return Err(PayloadError::MissingKey {
                method: method.to_string(),
            });
        }
        Ok(record)
    }

    /// Decode a list of records out of an RPC result value, keeping order.
    pub fn list_from_value(method: &str, value: Value) -> Result<Vec<Self>, PayloadError> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| Self::from_value(method, item))
                .collect(),
            other => Err(PayloadError::NotAList {
                method: method.to_string(),
                found: json_kind(&other).to_string(),
            }),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Short JSON type name for error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn field_map_strategy() -> impl Strategy<Value = Map<String, Value>> {
        let value = prop_oneof![
            Just(Value::Null),
            any::<i64>().prop_map(Value::from),
            "[a-z]{0,6}".prop_map(Value::from),
            proptest::collection::btree_map("[a-z]{1,3}", any::<bool>().prop_map(Value::from), 0..3)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ];
        proptest::collection::btree_map("[a-e]{1,2}", value, 0..6)
            .prop_map(|m| m.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Property: merged fields take the partial's value wholesale, all
        /// other fields keep theirs.
        #[test]
        fn prop_merge_is_shallow(
            base in field_map_strategy(),
            partial in field_map_strategy(),
        ) {
            let mut snapshot = Snapshot::from(base.clone());
            snapshot.merge(&partial);

            for (field, value) in &partial {
                prop_assert_eq!(snapshot.get(field), Some(value));
            }
            for (field, value) in &base {
                if !partial.contains_key(field) {
                    prop_assert_eq!(snapshot.get(field), Some(value));
                }
            }
            let expected = base.keys().chain(partial.keys()).collect::<std::collections::BTreeSet<_>>();
            prop_assert_eq!(snapshot.len(), expected.len());
        }

        /// Property: merging the same partial twice changes nothing more.
        #[test]
        fn prop_merge_is_idempotent(
            base in field_map_strategy(),
            partial in field_map_strategy(),
        ) {
            let mut once = Snapshot::from(base);
            once.merge(&partial);
            let mut twice = once.clone();
            twice.merge(&partial);
            prop_assert_eq!(once, twice);
        }
    }
}

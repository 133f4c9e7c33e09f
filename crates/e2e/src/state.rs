//! Scratch data handed from earlier steps to later ones within one group run

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{E2eError, E2eResult};

/// Key-value state owned by a single group instance.
///
/// Reads of keys no earlier step wrote fail with [`E2eError::MissingState`]
/// instead of falling back to a default, so a later step never silently
/// passes on data an excluded or failed step did not produce.
#[derive(Debug, Default, Clone)]
pub struct CarriedState {
    values: BTreeMap<String, Value>,
}

impl CarriedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> E2eResult<()> {
        let key = key.into();
        let value = serde_json::to_value(value).map_err(|e| E2eError::StateShape {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        self.values.insert(key, value);
        Ok(())
    }

    /// Read a value an earlier step must have written
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> E2eResult<T> {
        let value = self.values.get(key).ok_or_else(|| E2eError::MissingState {
            key: key.to_string(),
        })?;
        decode(key, value)
    }

    pub fn get_str(&self, key: &str) -> E2eResult<&str> {
        match self.values.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(E2eError::StateShape {
                key: key.to_string(),
                reason: format!("expected a string, found {other}"),
            }),
            None => Err(E2eError::MissingState { key: key.to_string() }),
        }
    }

    /// Read a value that may legitimately be absent (finalizers)
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> E2eResult<Option<T>> {
        self.values.get(key).map(|value| decode(key, value)).transpose()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: &Value) -> E2eResult<T> {
    T::deserialize(value).map_err(|e| E2eError::StateShape {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_set_then_get() {
        let mut state = CarriedState::new();
        state.set("branch_id", "br-123").unwrap();
        state.set("checkpoint_at", 1_700_000_000i64).unwrap();

        assert_eq!(state.get_str("branch_id").unwrap(), "br-123");
        assert_eq!(state.get::<i64>("checkpoint_at").unwrap(), 1_700_000_000);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_missing_key_fails_loud() {
        let state = CarriedState::new();
        let err = state.get::<String>("restore_point").unwrap_err();
        assert!(matches!(err, E2eError::MissingState { ref key } if key == "restore_point"));
        assert_eq!(err.kind(), ErrorKind::MissingState);
    }

    #[test]
    fn test_wrong_shape_is_an_error() {
        let mut state = CarriedState::new();
        state.set("count", 4).unwrap();
        assert!(matches!(state.get_str("count"), Err(E2eError::StateShape { .. })));
        assert!(matches!(state.get::<Vec<String>>("count"), Err(E2eError::StateShape { .. })));
    }

    #[test]
    fn test_get_opt_absent_is_none() {
        let mut state = CarriedState::new();
        assert_eq!(state.get_opt::<String>("table").unwrap(), None);
        state.set("table", "e2e_rows").unwrap();
        assert_eq!(state.get_opt::<String>("table").unwrap().as_deref(), Some("e2e_rows"));
    }
}
